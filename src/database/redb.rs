use crate::buffer::ValueBuf;
use crate::database::{Durability, ReadTxn, Status, StoreOptions, WriteTxn};
use crate::error::BenchError;
use crate::injector::{LatencyInjector, PreadCounter};
use anyhow::{Context, Result};
use redb::backends::FileBackend;
use redb::{
    Builder, Database, ReadOnlyTable, ReadTransaction, ReadableDatabase, TableDefinition,
    WriteTransaction,
};
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

static TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("data");
/// Subdirectory of the configured directory that the store owns. Only this
/// one is wiped on open; anything beside it is left alone.
const STORE_DIR: &str = "kvisolate-store";
const FILE_NAME: &str = "data.redb";

/// redb store whose block reads all go through a [`LatencyInjector`].
pub struct Redb {
    path: PathBuf,
    db: Database,
}

impl Redb {
    pub fn create(options: &StoreOptions, counter: PreadCounter) -> Result<Self> {
        let store_dir = options.dir.join(STORE_DIR);
        reset_dir(&store_dir)?;
        let path = store_dir.join(FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("open {path:?}"))?;
        let backend =
            LatencyInjector::new(FileBackend::new(file)?, options.injected_delay, counter);
        let db = Builder::new()
            .set_cache_size(options.cache_bytes)
            .create_with_backend(backend)
            .with_context(|| format!("create store at {path:?}"))?;
        debug!(
            ?path,
            cache_bytes = options.cache_bytes,
            delay = ?options.injected_delay,
            "store created"
        );
        Ok(Redb { path, db })
    }
}

fn reset_dir(dir: &Path) -> Result<(), BenchError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(source) => return Err(BenchError::Setup { path: dir.to_path_buf(), source }),
    }
    std::fs::create_dir_all(dir)
        .map_err(|source| BenchError::Setup { path: dir.to_path_buf(), source })
}

impl crate::database::Database for Redb {
    fn init(&self) -> Result<()> {
        let tx = self.db.begin_write()?;
        {
            let _ = tx.open_table(TABLE)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn begin_read(&self) -> Result<Box<dyn ReadTxn + '_>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(TABLE)?;
        Ok(Box::new(RedbRead { table, txn }))
    }

    fn begin_write(&self) -> Result<Box<dyn WriteTxn + '_>> {
        Ok(Box::new(RedbWrite { txn: self.db.begin_write()? }))
    }

    fn close(self: Box<Self>) -> Result<()> {
        let Redb { path, db } = *self;
        drop(db);
        debug!(?path, "store closed");
        Ok(())
    }
}

struct RedbRead {
    table: ReadOnlyTable<&'static [u8], &'static [u8]>,
    txn: ReadTransaction,
}

impl ReadTxn for RedbRead {
    fn get(&mut self, key: &[u8], out: &mut ValueBuf) -> Result<Status> {
        match self.table.get(key)? {
            Some(v) => {
                out.fill_from(v.value())?;
                Ok(Status::Found)
            }
            None => Ok(Status::NotFound),
        }
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let RedbRead { table, txn } = *self;
        // the transaction refuses to close while a table still borrows it
        drop(table);
        txn.close()?;
        Ok(())
    }
}

struct RedbWrite {
    txn: WriteTransaction,
}

impl WriteTxn for RedbWrite {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut t = self.txn.open_table(TABLE)?;
        t.insert(key, value)?;
        Ok(())
    }

    fn commit(self: Box<Self>, durability: Durability) -> Result<()> {
        let mut txn = self.txn;
        txn.set_durability(match durability {
            Durability::NoSync => redb::Durability::None,
            Durability::Sync => redb::Durability::Immediate,
        })?;
        txn.commit()?;
        Ok(())
    }
}
