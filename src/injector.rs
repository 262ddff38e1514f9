use redb::StorageBackend;
use std::fmt::{Debug, Formatter};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Number of low-level block reads the store has issued. Cloning shares the
/// same counter; it only ever grows.
#[derive(Clone, Default)]
pub struct PreadCounter(Arc<AtomicU64>);

impl PreadCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    fn record(&self) {
        self.0.fetch_add(1, Ordering::Release);
    }
}

impl Debug for PreadCounter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PreadCounter").field(&self.get()).finish()
    }
}

/// Storage backend that makes every block read slow.
///
/// Each `read` bumps the shared counter, sleeps for `delay` and then hands
/// the request to the wrapped backend. Writes and metadata calls pass
/// straight through and are not counted.
#[derive(Debug)]
pub struct LatencyInjector<B> {
    inner: B,
    delay: Duration,
    counter: PreadCounter,
}

impl<B: StorageBackend> LatencyInjector<B> {
    pub fn new(inner: B, delay: Duration, counter: PreadCounter) -> Self {
        LatencyInjector { inner, delay, counter }
    }
}

impl<B: StorageBackend> StorageBackend for LatencyInjector<B> {
    fn len(&self) -> Result<u64, io::Error> {
        self.inner.len()
    }

    fn read(&self, offset: u64, out: &mut [u8]) -> Result<(), io::Error> {
        self.counter.record();
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.inner.read(offset, out)
    }

    fn set_len(&self, len: u64) -> Result<(), io::Error> {
        self.inner.set_len(len)
    }

    fn sync_data(&self) -> Result<(), io::Error> {
        self.inner.sync_data()
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<(), io::Error> {
        self.inner.write(offset, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redb::backends::InMemoryBackend;
    use std::time::Instant;

    fn injector(delay: Duration) -> (LatencyInjector<InMemoryBackend>, PreadCounter) {
        let counter = PreadCounter::new();
        let backend = InMemoryBackend::new();
        backend.set_len(4096).unwrap();
        backend.write(0, &[7u8; 4096]).unwrap();
        (LatencyInjector::new(backend, delay, counter.clone()), counter)
    }

    #[test]
    fn counts_reads_only() {
        let (inj, counter) = injector(Duration::ZERO);
        let mut out = [0u8; 16];
        inj.read(0, &mut out).unwrap();
        inj.read(128, &mut out).unwrap();
        inj.write(0, &[1u8; 16]).unwrap();
        inj.sync_data().unwrap();
        assert_eq!(inj.len().unwrap(), 4096);
        assert_eq!(counter.get(), 2);
        assert_eq!(out, [7u8; 16]);
    }

    #[test]
    fn read_result_is_unchanged() {
        let (inj, _counter) = injector(Duration::ZERO);
        inj.write(100, b"hello").unwrap();
        let mut out = [0u8; 5];
        inj.read(100, &mut out).unwrap();
        assert_eq!(&out, b"hello");
    }

    #[test]
    fn read_is_delayed() {
        let (inj, counter) = injector(Duration::from_millis(5));
        let mut out = [0u8; 8];
        let start = Instant::now();
        for _ in 0..3 {
            inj.read(0, &mut out).unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(15));
        assert_eq!(counter.get(), 3);
    }

    #[test]
    fn concurrent_reads_are_counted_once_each() {
        let (inj, counter) = injector(Duration::ZERO);
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let mut out = [0u8; 8];
                    for _ in 0..1_000 {
                        inj.read(0, &mut out).unwrap();
                    }
                });
            }
        });
        assert_eq!(counter.get(), 4_000);
    }
}
