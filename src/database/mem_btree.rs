use crate::buffer::ValueBuf;
use crate::database::{Database, Durability, ReadTxn, Status, WriteTxn};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

/// In-memory store. No block I/O, so the injector never sees its reads.
///
/// With `exclusive_reads` every lookup takes a no-wait exclusive row lock
/// held until the reading transaction commits; a second reader touching the
/// same key gets [`Status::LockNotGranted`].
#[derive(Default)]
pub struct MemBTree {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    exclusive_reads: bool,
    row_locks: Mutex<HashMap<Vec<u8>, u64>>,
    next_txn: AtomicU64,
}

impl MemBTree {
    pub fn new(exclusive_reads: bool) -> Self {
        MemBTree { exclusive_reads, ..Default::default() }
    }

    fn txn_id(&self) -> u64 {
        self.next_txn.fetch_add(1, Ordering::Relaxed)
    }
}

impl Database for MemBTree {
    fn init(&self) -> anyhow::Result<()> {
        self.data.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.row_locks.lock().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }

    fn begin_read(&self) -> anyhow::Result<Box<dyn ReadTxn + '_>> {
        Ok(Box::new(MemRead { db: self, id: self.txn_id(), held: Vec::new() }))
    }

    fn begin_write(&self) -> anyhow::Result<Box<dyn WriteTxn + '_>> {
        Ok(Box::new(MemWrite { db: self, pending: Vec::new() }))
    }

    fn close(self: Box<Self>) -> anyhow::Result<()> {
        Ok(())
    }
}

struct MemRead<'a> {
    db: &'a MemBTree,
    id: u64,
    held: Vec<Vec<u8>>,
}

impl MemRead<'_> {
    fn try_lock(&mut self, key: &[u8]) -> bool {
        let mut locks = self.db.row_locks.lock().unwrap_or_else(|e| e.into_inner());
        match locks.entry(key.to_vec()) {
            Entry::Occupied(owner) => *owner.get() == self.id,
            Entry::Vacant(slot) => {
                slot.insert(self.id);
                self.held.push(key.to_vec());
                true
            }
        }
    }

    fn release(&mut self) {
        if self.held.is_empty() {
            return;
        }
        let mut locks = self.db.row_locks.lock().unwrap_or_else(|e| e.into_inner());
        for key in self.held.drain(..) {
            locks.remove(&key);
        }
    }
}

impl ReadTxn for MemRead<'_> {
    fn get(&mut self, key: &[u8], out: &mut ValueBuf) -> anyhow::Result<Status> {
        if self.db.exclusive_reads && !self.try_lock(key) {
            return Ok(Status::LockNotGranted);
        }
        let data = self.db.data.read().unwrap_or_else(|e| e.into_inner());
        match data.get(key) {
            Some(v) => {
                out.fill_from(v)?;
                Ok(Status::Found)
            }
            None => Ok(Status::NotFound),
        }
    }

    fn commit(mut self: Box<Self>) -> anyhow::Result<()> {
        self.release();
        Ok(())
    }
}

impl Drop for MemRead<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

struct MemWrite<'a> {
    db: &'a MemBTree,
    pending: Vec<(Vec<u8>, Vec<u8>)>,
}

impl WriteTxn for MemWrite<'_> {
    fn put(&mut self, key: &[u8], value: &[u8]) -> anyhow::Result<()> {
        self.pending.push((Vec::from(key), Vec::from(value)));
        Ok(())
    }

    fn commit(self: Box<Self>, _durability: Durability) -> anyhow::Result<()> {
        let MemWrite { db, pending } = *self;
        db.data.write().unwrap_or_else(|e| e.into_inner()).extend(pending);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(exclusive_reads: bool) -> MemBTree {
        let db = MemBTree::new(exclusive_reads);
        db.init().unwrap();
        let mut w = db.begin_write().unwrap();
        w.put(b"a", b"1").unwrap();
        w.put(b"b", b"2").unwrap();
        w.commit(Durability::NoSync).unwrap();
        db
    }

    #[test]
    fn writes_are_invisible_until_commit() {
        let db = MemBTree::new(false);
        let mut out = ValueBuf::new();
        let mut w = db.begin_write().unwrap();
        w.put(b"k", b"v").unwrap();
        {
            let mut r = db.begin_read().unwrap();
            assert_eq!(r.get(b"k", &mut out).unwrap(), Status::NotFound);
        }
        w.commit(Durability::Sync).unwrap();
        let mut r = db.begin_read().unwrap();
        assert_eq!(r.get(b"k", &mut out).unwrap(), Status::Found);
        assert_eq!(out.as_slice(), b"v");
    }

    #[test]
    fn shared_reads_never_conflict() {
        let db = seeded(false);
        let mut out = ValueBuf::new();
        let mut r1 = db.begin_read().unwrap();
        let mut r2 = db.begin_read().unwrap();
        assert_eq!(r1.get(b"a", &mut out).unwrap(), Status::Found);
        assert_eq!(r2.get(b"a", &mut out).unwrap(), Status::Found);
    }

    #[test]
    fn exclusive_reads_conflict_until_commit() {
        let db = seeded(true);
        let mut out = ValueBuf::new();
        let mut r1 = db.begin_read().unwrap();
        let mut r2 = db.begin_read().unwrap();
        assert_eq!(r1.get(b"a", &mut out).unwrap(), Status::Found);
        // re-reading a key this transaction already holds is fine
        assert_eq!(r1.get(b"a", &mut out).unwrap(), Status::Found);
        assert_eq!(r2.get(b"a", &mut out).unwrap(), Status::LockNotGranted);
        assert_eq!(r2.get(b"b", &mut out).unwrap(), Status::Found);
        r1.commit().unwrap();
        assert_eq!(r2.get(b"a", &mut out).unwrap(), Status::Found);
    }

    #[test]
    fn dropped_reader_releases_locks() {
        let db = seeded(true);
        let mut out = ValueBuf::new();
        {
            let mut r1 = db.begin_read().unwrap();
            r1.get(b"a", &mut out).unwrap();
        }
        let mut r2 = db.begin_read().unwrap();
        assert_eq!(r2.get(b"a", &mut out).unwrap(), Status::Found);
    }

    #[test]
    fn init_discards_rows() {
        let db = seeded(false);
        db.init().unwrap();
        let mut out = ValueBuf::new();
        let mut r = db.begin_read().unwrap();
        assert_eq!(r.get(b"a", &mut out).unwrap(), Status::NotFound);
    }
}
