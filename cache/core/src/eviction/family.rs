//! Registry of stores sharing one evictor.

use super::policy::{EvictionTarget, FamilyId};
use parking_lot::RwLock;
use std::sync::{Arc, Weak};

/// Maps family ids to the removal paths of the stores that own them.
///
/// Ids are handed out in order and never reused, so a victim selected just
/// before its family unregisters can never be routed to a different store.
#[derive(Default)]
pub struct FamilyRegistry {
    targets: RwLock<Vec<Option<Weak<dyn EvictionTarget>>>>,
}

impl FamilyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `target` and return its id.
    pub fn register(&self, target: Weak<dyn EvictionTarget>) -> FamilyId {
        let mut targets = self.targets.write();
        let id = FamilyId::from_raw(targets.len() as u32);
        targets.push(Some(target));
        id
    }

    /// Drop the target registered under `family`. Returns whether it was
    /// registered.
    pub fn unregister(&self, family: FamilyId) -> bool {
        let mut targets = self.targets.write();
        targets
            .get_mut(family.as_raw() as usize)
            .and_then(Option::take)
            .is_some()
    }

    /// The live target registered under `family`, if any.
    pub fn get(&self, family: FamilyId) -> Option<Arc<dyn EvictionTarget>> {
        self.targets
            .read()
            .get(family.as_raw() as usize)?
            .as_ref()?
            .upgrade()
    }

    /// Number of registered families.
    pub fn len(&self) -> usize {
        self.targets.read().iter().filter(|t| t.is_some()).count()
    }

    /// Whether no family is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::eviction::EvictOutcome;
    use crate::record::RecordId;

    struct NeverEvict;

    impl EvictionTarget for NeverEvict {
        fn evict_record(&self, _hash: u64, _record: RecordId) -> EvictOutcome {
            EvictOutcome::Vetoed
        }
    }

    #[test]
    fn test_register_and_get() {
        let registry = FamilyRegistry::new();
        let target: Arc<dyn EvictionTarget> = Arc::new(NeverEvict);
        let id = registry.register(Arc::downgrade(&target));

        let found = registry.get(id).expect("target should be live");
        assert_eq!(
            found.evict_record(0, RecordId::from_raw(1)),
            EvictOutcome::Vetoed
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ids_not_reused() {
        let registry = FamilyRegistry::new();
        let target: Arc<dyn EvictionTarget> = Arc::new(NeverEvict);

        let first = registry.register(Arc::downgrade(&target));
        assert!(registry.unregister(first));
        assert!(!registry.unregister(first));

        let second = registry.register(Arc::downgrade(&target));
        assert_ne!(first, second);
        assert!(registry.get(first).is_none());
        assert!(registry.get(second).is_some());
    }

    #[test]
    fn test_dead_target() {
        let registry = FamilyRegistry::new();
        let target: Arc<dyn EvictionTarget> = Arc::new(NeverEvict);
        let id = registry.register(Arc::downgrade(&target));
        drop(target);
        assert!(registry.get(id).is_none());
    }
}
