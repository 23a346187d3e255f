use crate::{KVStore, Result, StorageError};
use bytes::Bytes;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use tracing::{debug, info};

const RECORDS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("records");

/// redb-backed record store
///
/// Every append is its own write transaction, so a record is durable once
/// `append` returns.
pub struct RedbBackend {
    db: Database,
}

impl RedbBackend {
    /// Open (or create) the database at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening record store at {}", path.display());

        let db = Database::create(path)?;

        // Make sure the table exists so readers never see TableDoesNotExist
        let txn = db.begin_write()?;
        txn.open_table(RECORDS)?;
        txn.commit()?;

        Ok(Self { db })
    }
}

impl KVStore for RedbBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(RECORDS)?;
        let value = table.get(key)?.map(|v| Bytes::copy_from_slice(v.value()));
        Ok(value)
    }

    fn append(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(RECORDS)?;
            if table.get(key)?.is_some() {
                return Err(StorageError::record_exists(key));
            }
            table.insert(key, value)?;
        }
        txn.commit()?;

        debug!("Appended {} ({} bytes)", String::from_utf8_lossy(key), value.len());
        Ok(())
    }

    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(RECORDS)?;

        let mut records = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            let key = key.value();
            if key.starts_with(prefix) {
                records.push((Bytes::copy_from_slice(key), Bytes::copy_from_slice(value.value())));
            } else if key > prefix {
                // Sorted table: nothing after this point can match
                break;
            }
        }

        Ok(records)
    }
}
