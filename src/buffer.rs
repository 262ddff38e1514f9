use crate::error::BenchError;

pub type KeyBuf = FixedBuf<20>;
pub type ValueBuf = FixedBuf<200>;

/// Caller-owned byte buffer with a fixed capacity and an explicit length.
///
/// Lookups copy into one of these instead of allocating, so a reader thread
/// reuses the same pair of buffers for every read.
#[derive(Clone)]
pub struct FixedBuf<const CAP: usize> {
    bytes: [u8; CAP],
    len: usize,
}

impl<const CAP: usize> FixedBuf<CAP> {
    pub const fn new() -> Self {
        FixedBuf { bytes: [0u8; CAP], len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Replace the contents with `src`. Fails without touching the buffer
    /// when `src` does not fit.
    pub fn fill_from(&mut self, src: &[u8]) -> Result<(), BenchError> {
        if src.len() > CAP {
            return Err(BenchError::ValueTooLarge { len: src.len(), capacity: CAP });
        }
        self.bytes[..src.len()].copy_from_slice(src);
        self.len = src.len();
        Ok(())
    }

    /// Writable view of the first `len` bytes, marking them as the contents.
    pub(crate) fn set_len_mut(&mut self, len: usize) -> Result<&mut [u8], BenchError> {
        if len > CAP {
            return Err(BenchError::ValueTooLarge { len, capacity: CAP });
        }
        self.len = len;
        Ok(&mut self.bytes[..len])
    }
}

impl<const CAP: usize> Default for FixedBuf<CAP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const CAP: usize> std::fmt::Debug for FixedBuf<CAP> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FixedBuf<{CAP}>({:?})", String::from_utf8_lossy(self.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_within_capacity() {
        let mut buf = FixedBuf::<8>::new();
        assert_eq!(buf.len(), 0);
        buf.fill_from(b"abc").unwrap();
        assert_eq!(buf.as_slice(), b"abc");
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn overflow_is_rejected_and_keeps_contents() {
        let mut buf = FixedBuf::<4>::new();
        buf.fill_from(b"ab").unwrap();
        let err = buf.fill_from(b"abcde").unwrap_err();
        assert!(matches!(err, BenchError::ValueTooLarge { len: 5, capacity: 4 }));
        assert_eq!(buf.as_slice(), b"ab");
    }

    #[test]
    fn exact_capacity_fits() {
        let mut buf = FixedBuf::<4>::new();
        buf.fill_from(b"abcd").unwrap();
        assert_eq!(buf.as_slice(), b"abcd");
        assert_eq!(buf.len(), 4);
    }
}
