//! Reference-counted, zero-copy byte views.
//!
//! Every value a cache stores is a [`ByteView`]. Cloning or slicing a view
//! bumps an atomic reference count on the shared buffer; the bytes are never
//! copied and never mutated after publication. A view handed out by a lookup
//! therefore stays valid after the entry it came from is erased or evicted.

use bytes::Bytes;
use std::fmt;
use std::ops::{Deref, Range};

/// An immutable, cheaply cloneable view into a shared byte buffer.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ByteView {
    bytes: Bytes,
}

impl ByteView {
    /// Create an empty view.
    pub const fn new() -> Self {
        Self {
            bytes: Bytes::new(),
        }
    }

    /// Create a view over static bytes without allocating.
    pub const fn from_static(bytes: &'static [u8]) -> Self {
        Self {
            bytes: Bytes::from_static(bytes),
        }
    }

    /// Copy `data` into a new shared buffer.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self {
            bytes: Bytes::copy_from_slice(data),
        }
    }

    /// Length of the view in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the view is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Return a view of `range` within this view, sharing the same buffer.
    ///
    /// # Panics
    ///
    /// Panics if `range` is out of bounds, like slice indexing.
    #[inline]
    pub fn slice(&self, range: Range<usize>) -> Self {
        Self {
            bytes: self.bytes.slice(range),
        }
    }

    /// Borrow the underlying bytes.
    #[inline]
    pub fn as_bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Consume the view, returning the underlying `Bytes`.
    #[inline]
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

impl Deref for ByteView {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsRef<[u8]> for ByteView {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<Bytes> for ByteView {
    fn from(bytes: Bytes) -> Self {
        Self { bytes }
    }
}

impl From<Vec<u8>> for ByteView {
    fn from(data: Vec<u8>) -> Self {
        Self { bytes: data.into() }
    }
}

impl From<&'static [u8]> for ByteView {
    fn from(data: &'static [u8]) -> Self {
        Self::from_static(data)
    }
}

impl From<ByteView> for Bytes {
    fn from(view: ByteView) -> Self {
        view.bytes
    }
}

impl fmt::Debug for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteView")
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn test_slice_shares_buffer() {
        let view = ByteView::from(vec![1u8, 2, 3, 4, 5, 6]);
        let middle = view.slice(2..5);

        assert_eq!(&*middle, &[3, 4, 5]);
        assert_eq!(middle.as_bytes().as_ptr(), view[2..].as_ptr());
    }

    #[test]
    fn test_view_outlives_source() {
        let view = ByteView::copy_from_slice(b"hello world");
        let tail = view.slice(6..11);
        drop(view);
        assert_eq!(&*tail, b"world");
    }

    #[test]
    fn test_empty() {
        let view = ByteView::new();
        assert!(view.is_empty());
        assert_eq!(view.len(), 0);
        assert_eq!(ByteView::default(), view);
    }

    #[test]
    fn test_debug_hides_contents() {
        let view = ByteView::from_static(b"secret");
        assert_eq!(format!("{:?}", view), "ByteView { len: 6 }");
    }
}
