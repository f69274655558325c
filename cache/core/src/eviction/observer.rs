//! Bridge from store access notices to evictor events.

use super::policy::{AccessEvent, Evictor, FamilyId};
use crate::access::{AccessNotice, AccessObserver, AccessOp};
use std::sync::Arc;

/// Computes the byte size a value is accounted for.
pub type Weigher<V> = Box<dyn Fn(&V) -> u32 + Send + Sync>;

/// An [`AccessObserver`] that forwards every notice to an [`Evictor`] as an
/// [`AccessEvent`] tagged with the store's family.
pub struct EvictorObserver<V> {
    evictor: Arc<dyn Evictor>,
    family: FamilyId,
    weigher: Weigher<V>,
}

impl<V> EvictorObserver<V> {
    /// Forward to `evictor` on behalf of `family`, sizing values with
    /// `weigher`.
    pub fn new(evictor: Arc<dyn Evictor>, family: FamilyId, weigher: Weigher<V>) -> Self {
        Self {
            evictor,
            family,
            weigher,
        }
    }

    /// The evictor events are forwarded to.
    pub fn evictor(&self) -> &Arc<dyn Evictor> {
        &self.evictor
    }

    /// The family events are tagged with.
    pub fn family(&self) -> FamilyId {
        self.family
    }
}

impl<K, V> AccessObserver<K, V> for EvictorObserver<V> {
    fn on_access(&self, notice: AccessNotice<'_, K, V>) {
        let size = match notice.op {
            AccessOp::Create | AccessOp::Resize => (self.weigher)(notice.value),
            AccessOp::Access | AccessOp::Delete => 0,
        };
        self.evictor.record_access(AccessEvent {
            family: self.family,
            hash: notice.hash,
            record: notice.record,
            op: notice.op,
            size,
        });
    }
}
