use crate::database::DatabaseType;
use crate::workload::ReadErrorMode;
use anyhow::{Result, bail, ensure};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ROWS: u64 = 100_000;
/// Hot-reader reads per loaded row.
pub const DEFAULT_READS_PER_ROW: u64 = 10;
pub const DEFAULT_DELAY_US: u64 = 1_000;
/// 400 pages of 4 KiB, small enough that the default dataset does not fit.
pub const DEFAULT_CACHE_KIB: usize = 400 * 4;
pub const DEFAULT_SEED: u64 = 0x3039;

#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub rows: u64,
    pub reads_per_row: u64,
    pub injected_delay: Duration,
    pub cache_bytes: usize,
    pub seed: u64,
    /// Store location; a scratch directory when unset.
    pub dir: Option<PathBuf>,
    pub database: DatabaseType,
    pub exclusive_reads: bool,
    pub error_mode: ReadErrorMode,
    pub verify: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            rows: DEFAULT_ROWS,
            reads_per_row: DEFAULT_READS_PER_ROW,
            injected_delay: Duration::from_micros(DEFAULT_DELAY_US),
            cache_bytes: DEFAULT_CACHE_KIB * 1024,
            seed: DEFAULT_SEED,
            dir: None,
            database: DatabaseType::Redb,
            exclusive_reads: false,
            error_mode: ReadErrorMode::Strict,
            verify: false,
        }
    }
}

impl BenchConfig {
    /// Bounded read count for every hot reader.
    pub fn hot_reads(&self) -> u64 {
        self.rows.saturating_mul(self.reads_per_row)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.rows > 0, "row count must be positive");
        ensure!(self.reads_per_row > 0, "reads per row must be positive");
        if self.exclusive_reads && self.database != DatabaseType::MemBtree {
            bail!("exclusive reads are only available with the mem-btree store");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_classic_run() {
        let config = BenchConfig::default();
        assert_eq!(config.rows, 100_000);
        assert_eq!(config.hot_reads(), 1_000_000);
        assert_eq!(config.injected_delay, Duration::from_millis(1));
        assert_eq!(config.cache_bytes, 400 * 4096);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_empty_dataset() {
        let config = BenchConfig { rows: 0, ..BenchConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn exclusive_reads_need_mem_btree() {
        let mut config = BenchConfig { exclusive_reads: true, ..BenchConfig::default() };
        assert!(config.validate().is_err());
        config.database = DatabaseType::MemBtree;
        config.validate().unwrap();
    }
}
