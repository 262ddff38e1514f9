mod mem_btree;
mod redb;

use crate::buffer::ValueBuf;
use crate::database::mem_btree::MemBTree;
use crate::database::redb::Redb;
use crate::injector::PreadCounter;
use anyhow::Result;
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

/// Outcome of a single lookup. Anything that is not one of these is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Found,
    NotFound,
    LockNotGranted,
    /// Neither bundled store detects deadlocks; stores that do report this.
    #[allow(dead_code)]
    Deadlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// Commit without waiting for the device.
    NoSync,
    Sync,
}

pub trait Database: Send + Sync {
    /// Create the row table. Called once on a freshly opened store.
    fn init(&self) -> Result<()>;
    fn begin_read(&self) -> Result<Box<dyn ReadTxn + '_>>;
    fn begin_write(&self) -> Result<Box<dyn WriteTxn + '_>>;
    fn close(self: Box<Self>) -> Result<()>;
}

pub trait ReadTxn {
    /// Look up `key`, copying the value into `out` when found.
    fn get(&mut self, key: &[u8], out: &mut ValueBuf) -> Result<Status>;
    fn commit(self: Box<Self>) -> Result<()>;
}

pub trait WriteTxn {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;
    fn commit(self: Box<Self>, durability: Durability) -> Result<()>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
// Update get_db when adding new variation
pub enum DatabaseType {
    Redb,
    MemBtree,
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Parent of the store's own subdirectory. Only that subdirectory is
    /// wiped on open.
    pub dir: PathBuf,
    pub cache_bytes: usize,
    pub injected_delay: Duration,
    /// Reads take exclusive row locks (mem-btree only).
    pub exclusive_reads: bool,
}

/// Open a fresh store, discarding any store previously created under `options.dir`.
pub fn get_db(
    database: DatabaseType,
    options: &StoreOptions,
    counter: &PreadCounter,
) -> Result<Box<dyn Database>> {
    match database {
        DatabaseType::Redb => Ok(Box::new(Redb::create(options, counter.clone())?)),
        DatabaseType::MemBtree => Ok(Box::new(MemBTree::new(options.exclusive_reads))),
    }
}
