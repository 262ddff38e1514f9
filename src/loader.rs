use crate::buffer::{KeyBuf, ValueBuf};
use crate::database::{Database, Durability, Status};
use crate::error::BenchError;
use crate::generator::{VALUE_LEN, ValueGen, format_key};
use anyhow::{Context, Result};
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};
use thousands::Separable;
use tracing::debug;

/// Maximum rows written, or lookups issued, in one transaction.
pub const BATCH_SIZE: u64 = 10_000;

#[derive(Debug, Clone, Copy)]
pub struct LoadReport {
    pub rows: u64,
    pub batches: u64,
    pub elapsed: Duration,
}

impl Display for LoadReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let rate = if self.elapsed.is_zero() {
            0
        } else {
            (self.rows as f64 / self.elapsed.as_secs_f64()) as u64
        };
        write!(
            f,
            "loaded {} rows in {} batches | time: {:.1?} | throughput: {} rows/s",
            self.rows.separate_with_underscores(),
            self.batches,
            self.elapsed,
            rate.separate_with_underscores()
        )
    }
}

/// Insert rows `0..rows` in ascending key order, committing every
/// [`BATCH_SIZE`] rows. The last batch is committed durably.
pub fn load(db: &dyn Database, rows: u64, seed: u64) -> Result<LoadReport> {
    let start = Instant::now();
    db.init().context("create row table")?;

    let mut values = ValueGen::new(seed);
    let mut key = KeyBuf::new();
    let mut value = [0u8; VALUE_LEN];
    let mut batches = 0;

    let mut batch_start = 0;
    while batch_start < rows {
        let batch_end = (batch_start + BATCH_SIZE).min(rows);
        let mut txn = db.begin_write().context("begin load transaction")?;
        for seq in batch_start..batch_end {
            format_key(seq, &mut key);
            values.fill(&mut value);
            txn.put(key.as_slice(), &value)
                .with_context(|| format!("insert row {seq}"))?;
        }
        let durability = if batch_end == rows { Durability::Sync } else { Durability::NoSync };
        txn.commit(durability)
            .with_context(|| format!("commit rows {batch_start}..{batch_end}"))?;
        batches += 1;
        debug!(batch_start, batch_end, "load batch committed");
        batch_start = batch_end;
    }

    Ok(LoadReport { rows, batches, elapsed: start.elapsed() })
}

/// Check that exactly the keys `0..rows` are present.
pub fn verify(db: &dyn Database, rows: u64) -> Result<()> {
    let mut key = KeyBuf::new();
    let mut value = ValueBuf::new();
    let mut txn = db.begin_read().context("begin verify transaction")?;
    for seq in 0..=rows {
        if seq > 0 && seq % BATCH_SIZE == 0 {
            txn.commit().context("commit verify transaction")?;
            txn = db.begin_read().context("begin verify transaction")?;
        }
        format_key(seq, &mut key);
        let status = txn.get(key.as_slice(), &mut value)?;
        let expected = if seq < rows { Status::Found } else { Status::NotFound };
        if status != expected {
            return Err(BenchError::UnexpectedStatus {
                key: String::from_utf8_lossy(key.as_slice()).into_owned(),
                status,
            }
            .into());
        }
        if status == Status::Found && value.len() != VALUE_LEN {
            anyhow::bail!("row {seq} has a {} byte value, expected {VALUE_LEN}", value.len());
        }
    }
    txn.commit().context("commit verify transaction")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{DatabaseType, StoreOptions, get_db};
    use crate::injector::PreadCounter;
    use std::time::Duration;
    use tempfile::TempDir;

    fn store(kind: DatabaseType, tmp: &TempDir) -> Box<dyn Database> {
        let options = StoreOptions {
            dir: tmp.path().join("db"),
            cache_bytes: 1 << 20,
            injected_delay: Duration::ZERO,
            exclusive_reads: false,
        };
        get_db(kind, &options, &PreadCounter::new()).unwrap()
    }

    #[test]
    fn loads_exactly_the_requested_rows() {
        let tmp = TempDir::new().unwrap();
        let db = store(DatabaseType::Redb, &tmp);
        let report = load(db.as_ref(), 1_000, 1).unwrap();
        assert_eq!(report.rows, 1_000);
        assert_eq!(report.batches, 1);
        verify(db.as_ref(), 1_000).unwrap();
        db.close().unwrap();
    }

    #[test]
    fn batches_are_capped() {
        let tmp = TempDir::new().unwrap();
        let db = store(DatabaseType::MemBtree, &tmp);
        let report = load(db.as_ref(), 2 * BATCH_SIZE + 1, 1).unwrap();
        assert_eq!(report.batches, 3);
        verify(db.as_ref(), 2 * BATCH_SIZE + 1).unwrap();
    }

    #[test]
    fn rows_carry_fixed_format_values() {
        let tmp = TempDir::new().unwrap();
        let db = store(DatabaseType::Redb, &tmp);
        load(db.as_ref(), 10, 5).unwrap();
        let mut key = KeyBuf::new();
        let mut value = ValueBuf::new();
        let mut txn = db.begin_read().unwrap();
        format_key(9, &mut key);
        assert_eq!(key.as_slice(), b"0000000000000009");
        assert_eq!(txn.get(key.as_slice(), &mut value).unwrap(), Status::Found);
        assert_eq!(value.len(), VALUE_LEN);
        assert!(value.as_slice()[16..].iter().all(|&b| b == b' '));
    }

    #[test]
    fn verify_rejects_a_short_dataset() {
        let tmp = TempDir::new().unwrap();
        let db = store(DatabaseType::MemBtree, &tmp);
        load(db.as_ref(), 100, 1).unwrap();
        let err = verify(db.as_ref(), 101).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BenchError>(),
            Some(BenchError::UnexpectedStatus { status: Status::NotFound, .. })
        ));
        // a longer dataset than claimed is caught by the out-of-range probe
        let err = verify(db.as_ref(), 99).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BenchError>(),
            Some(BenchError::UnexpectedStatus { status: Status::Found, .. })
        ));
    }

    #[test]
    fn empty_load_creates_the_table() {
        let tmp = TempDir::new().unwrap();
        let db = store(DatabaseType::Redb, &tmp);
        let report = load(db.as_ref(), 0, 1).unwrap();
        assert_eq!(report.batches, 0);
        verify(db.as_ref(), 0).unwrap();
    }
}
