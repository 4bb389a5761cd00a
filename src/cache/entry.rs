//! Memory Cache Entry Types

use std::sync::Arc;

use bytes::Bytes;

/// Payloads that can report their approximate in-memory size
pub trait Weighable {
    /// Approximate retained size in bytes
    fn weight(&self) -> u64;
}

impl Weighable for Bytes {
    fn weight(&self) -> u64 {
        self.len() as u64
    }
}

impl Weighable for Vec<u8> {
    fn weight(&self) -> u64 {
        self.capacity() as u64
    }
}

impl Weighable for String {
    fn weight(&self) -> u64 {
        self.capacity() as u64
    }
}

impl<T: Weighable + ?Sized> Weighable for Arc<T> {
    fn weight(&self) -> u64 {
        (**self).weight()
    }
}

/// A cached payload plus the size it was charged when inserted
#[derive(Debug)]
pub struct MemoryEntry<V> {
    payload: Arc<V>,
    /// Weight captured at insertion; the tier sum is kept against this value
    size: u64,
}

impl<V: Weighable> MemoryEntry<V> {
    pub fn new(payload: Arc<V>) -> Self {
        let size = payload.weight();
        Self { payload, size }
    }
}

impl<V> MemoryEntry<V> {
    #[inline]
    pub fn payload(&self) -> &Arc<V> {
        &self.payload
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn into_payload(self) -> Arc<V> {
        self.payload
    }
}

impl<V> Clone for MemoryEntry<V> {
    fn clone(&self) -> Self {
        Self {
            payload: Arc::clone(&self.payload),
            size: self.size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_size_is_captured() {
        let entry = MemoryEntry::new(Arc::new(Bytes::from_static(b"hello")));
        assert_eq!(entry.size(), 5);
        assert_eq!(entry.payload().as_ref(), &Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_vec_weight_uses_capacity() {
        let v: Vec<u8> = Vec::with_capacity(64);
        assert_eq!(v.weight(), 64);
    }
}
