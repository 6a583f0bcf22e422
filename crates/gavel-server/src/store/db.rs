use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableTable, TableDefinition};
use thiserror::Error;
use tokio::{task, time};
use tracing::debug;

use super::model::{Fields, Record};

const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

/// Default bound on a single blocking storage operation.
const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Storage-layer failure taxonomy. Both kinds are fatal to the operation —
/// the caller must assume nothing was persisted.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Persisted bytes failed to decode.
    #[error("collection data is corrupt: {0}")]
    Corrupt(String),
    /// The database could not be reached, written, or the operation timed out.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

macro_rules! unavailable_from {
    ($($err:ty),+) => {
        $(impl From<$err> for StoreError {
            fn from(e: $err) -> Self {
                StoreError::Unavailable(e.to_string())
            }
        })+
    };
}

unavailable_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError
);

/// Ordering policy for [`Store::read_all`], fixed per collection at design
/// time. The contact inbox reads newest-first; offers read in arrival order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InsertOrder {
    NewestFirst,
    OldestFirst,
}

/// A named collection of records with a fixed payload type and read order.
pub struct Collection<F> {
    name: &'static str,
    order: InsertOrder,
    _fields: PhantomData<F>,
}

impl<F> Collection<F> {
    pub const fn new(name: &'static str, order: InsertOrder) -> Self {
        Self {
            name,
            order,
            _fields: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn table(&self) -> TableDefinition<'static, u64, &'static [u8]> {
        TableDefinition::new(self.name)
    }
}

pub const CONTACT_MESSAGES: Collection<super::model::ContactFields> =
    Collection::new("contact_messages", InsertOrder::NewestFirst);

pub const ITEM_OFFERS: Collection<super::model::OfferFields> =
    Collection::new("item_offers", InsertOrder::OldestFirst);

/// Thread-safe handle to the redb store.
///
/// Every mutation runs inside a redb write transaction; redb serializes write
/// transactions, so concurrent appends or updates on the same collection
/// cannot lose each other's writes.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
    op_timeout: Duration,
}

impl Store {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_with_timeout(path, DEFAULT_OP_TIMEOUT)
    }

    /// Open with an explicit per-operation timeout for [`Store::run`].
    pub fn open_with_timeout(path: &Path, op_timeout: Duration) -> Result<Self, StoreError> {
        let db = Database::create(path)?;

        // Ensure all tables exist.
        let write_txn = db.begin_write()?;
        write_txn.open_table(CONTACT_MESSAGES.table())?;
        write_txn.open_table(ITEM_OFFERS.table())?;
        write_txn.open_table(COUNTERS)?;
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(db),
            op_timeout,
        })
    }

    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }

    /// Run a blocking store operation on the blocking pool, bounded by the
    /// configured operation timeout. Expiry surfaces as `Unavailable`.
    pub async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Store) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        let timeout = self.op_timeout;
        match time::timeout(timeout, task::spawn_blocking(move || op(&store))).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(StoreError::Unavailable(format!("storage task failed: {join}"))),
            Err(_) => Err(StoreError::Unavailable(format!(
                "storage operation timed out after {timeout:?}"
            ))),
        }
    }

    /// Append a new record to `collection` and return it.
    ///
    /// The record gets a fresh unique identifier, the current timestamp, and
    /// a not-yet-responded sub-state. If `idempotency_key` matches a record
    /// already in the collection, that record is returned and nothing is
    /// written — a safe retry path for non-idempotent submissions.
    pub fn append<F: Fields>(
        &self,
        collection: &Collection<F>,
        fields: F,
        idempotency_key: Option<String>,
    ) -> Result<Record<F>, StoreError> {
        let write_txn = self.db.begin_write()?;

        if let Some(ref idem) = idempotency_key {
            let existing = {
                let table = write_txn.open_table(collection.table())?;
                let mut hit = None;
                for item in table.iter()? {
                    let (_k, v) = item?;
                    let record: Record<F> = decode(v.value())?;
                    if record.idempotency_key.as_deref() == Some(idem.as_str()) {
                        hit = Some(record);
                        break;
                    }
                }
                hit
            };
            if let Some(existing) = existing {
                write_txn.abort()?;
                debug!(collection = collection.name, id = %existing.id,
                    "idempotency key matched existing record");
                return Ok(existing);
            }
        }

        let record = Record {
            id: generate_record_id(),
            created_at: Self::now(),
            idempotency_key,
            fields,
            responded: false,
            response: None,
        };

        {
            let mut table = write_txn.open_table(collection.table())?;
            let mut counters = write_txn.open_table(COUNTERS)?;
            let bytes = encode(&record)?;
            let seq = counters.get(collection.name)?.map(|g| g.value()).unwrap_or(0) + 1;
            counters.insert(collection.name, seq)?;
            table.insert(seq, bytes.as_slice())?;
        }
        write_txn.commit()?;

        debug!(collection = collection.name, id = %record.id, "appended record");
        Ok(record)
    }

    /// Read the full collection in its configured order. An empty or never
    /// written collection reads as an empty sequence.
    pub fn read_all<F: Fields>(
        &self,
        collection: &Collection<F>,
    ) -> Result<Vec<Record<F>>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(collection.table())?;

        let mut records = Vec::new();
        for item in table.iter()? {
            let (_k, v) = item?;
            records.push(decode(v.value())?);
        }
        if collection.order == InsertOrder::NewestFirst {
            records.reverse();
        }
        Ok(records)
    }

    /// Set the administrative response on the record with `id`, marking it
    /// responded. Returns `None` (collection untouched) when no record
    /// matches. Caller-supplied fields are left as submitted.
    pub fn update_by_id<F: Fields>(
        &self,
        collection: &Collection<F>,
        id: &str,
        response: &str,
    ) -> Result<Option<Record<F>>, StoreError> {
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(collection.table())?;

            let mut found: Option<(u64, Record<F>)> = None;
            for item in table.iter()? {
                let (k, v) = item?;
                let record: Record<F> = decode(v.value())?;
                if record.id == id {
                    found = Some((k.value(), record));
                    break;
                }
            }

            match found {
                None => None,
                Some((seq, mut record)) => {
                    record.responded = true;
                    record.response = Some(response.to_owned());
                    let bytes = encode(&record)?;
                    table.insert(seq, bytes.as_slice())?;
                    Some(record)
                }
            }
        };
        write_txn.commit()?;

        if let Some(ref record) = updated {
            debug!(collection = collection.name, id = %record.id, "recorded response");
        }
        Ok(updated)
    }
}

/// Generate a record identifier: 32 hex characters of randomness.
fn generate_record_id() -> String {
    use rand::Rng;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

fn encode<F: Fields>(record: &Record<F>) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(record, bincode::config::standard())
        .map_err(|e| StoreError::Unavailable(format!("encode record: {e}")))
}

fn decode<F: Fields>(bytes: &[u8]) -> Result<Record<F>, StoreError> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(record, _)| record)
        .map_err(|e| StoreError::Corrupt(format!("decode record: {e}")))
}

#[cfg(test)]
mod tests {
    use super::super::model::{ContactFields, OfferFields};
    use super::*;
    use tempfile::tempdir;

    fn make_store() -> (Store, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.db")).unwrap();
        (store, dir)
    }

    fn contact(name: &str) -> ContactFields {
        ContactFields {
            name: name.into(),
            email: format!("{name}@example.com"),
            message: "interested in the walnut dresser".into(),
        }
    }

    #[test]
    fn append_then_read_all_round_trips() {
        let (s, _dir) = make_store();
        let created = s.append(&CONTACT_MESSAGES, contact("ada"), None).unwrap();
        assert!(!created.responded);
        assert!(created.response.is_none());
        assert!(created.created_at > 0);

        let all = s.read_all(&CONTACT_MESSAGES).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0], created);
        assert_eq!(all[0].fields.message, "interested in the walnut dresser");
    }

    #[test]
    fn empty_collection_reads_empty() {
        let (s, _dir) = make_store();
        assert!(s.read_all(&ITEM_OFFERS).unwrap().is_empty());
    }

    #[test]
    fn contact_inbox_is_newest_first() {
        let (s, _dir) = make_store();
        let first = s.append(&CONTACT_MESSAGES, contact("first"), None).unwrap();
        let second = s.append(&CONTACT_MESSAGES, contact("second"), None).unwrap();

        let all = s.read_all(&CONTACT_MESSAGES).unwrap();
        assert_eq!(all[0].id, second.id);
        assert_eq!(all[1].id, first.id);
    }

    #[test]
    fn offers_keep_arrival_order() {
        let (s, _dir) = make_store();
        let offer = |t: &str| OfferFields {
            name: "seller".into(),
            email: "seller@example.com".into(),
            item_title: t.into(),
            item_description: "good condition".into(),
        };
        let a = s.append(&ITEM_OFFERS, offer("clock"), None).unwrap();
        let b = s.append(&ITEM_OFFERS, offer("lamp"), None).unwrap();

        let all = s.read_all(&ITEM_OFFERS).unwrap();
        assert_eq!(all[0].id, a.id);
        assert_eq!(all[1].id, b.id);
    }

    #[test]
    fn update_by_id_sets_response() {
        let (s, _dir) = make_store();
        let created = s.append(&CONTACT_MESSAGES, contact("ada"), None).unwrap();

        let updated = s
            .update_by_id(&CONTACT_MESSAGES, &created.id, "Thanks")
            .unwrap()
            .unwrap();
        assert!(updated.responded);
        assert_eq!(updated.response.as_deref(), Some("Thanks"));
        // Submitted fields untouched.
        assert_eq!(updated.fields, created.fields);

        let all = s.read_all(&CONTACT_MESSAGES).unwrap();
        assert_eq!(all[0], updated);
    }

    #[test]
    fn update_unknown_id_leaves_collection_unchanged() {
        let (s, _dir) = make_store();
        let created = s.append(&CONTACT_MESSAGES, contact("ada"), None).unwrap();

        let missing = s
            .update_by_id(&CONTACT_MESSAGES, "no-such-id", "Thanks")
            .unwrap();
        assert!(missing.is_none());

        let all = s.read_all(&CONTACT_MESSAGES).unwrap();
        assert_eq!(all, vec![created]);
    }

    #[test]
    fn idempotency_key_deduplicates() {
        let (s, _dir) = make_store();
        let first = s
            .append(&CONTACT_MESSAGES, contact("ada"), Some("req-1".into()))
            .unwrap();
        let retry = s
            .append(&CONTACT_MESSAGES, contact("ada"), Some("req-1".into()))
            .unwrap();
        assert_eq!(first.id, retry.id);
        assert_eq!(s.read_all(&CONTACT_MESSAGES).unwrap().len(), 1);

        let other = s
            .append(&CONTACT_MESSAGES, contact("ada"), Some("req-2".into()))
            .unwrap();
        assert_ne!(first.id, other.id);
        assert_eq!(s.read_all(&CONTACT_MESSAGES).unwrap().len(), 2);
    }

    #[test]
    fn collections_are_isolated() {
        let (s, _dir) = make_store();
        s.append(&CONTACT_MESSAGES, contact("ada"), None).unwrap();
        assert!(s.read_all(&ITEM_OFFERS).unwrap().is_empty());
    }

    // N concurrent appends on an empty collection must produce exactly N
    // records with N distinct ids — the lost-update case the whole-file
    // read-modify-write pattern fails.
    #[test]
    fn concurrent_appends_lose_nothing() {
        let (s, _dir) = make_store();
        const WRITERS: usize = 8;
        const PER_WRITER: usize = 5;

        let handles: Vec<_> = (0..WRITERS)
            .map(|w| {
                let store = s.clone();
                std::thread::spawn(move || {
                    for i in 0..PER_WRITER {
                        store
                            .append(&CONTACT_MESSAGES, contact(&format!("w{w}-{i}")), None)
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let all = s.read_all(&CONTACT_MESSAGES).unwrap();
        assert_eq!(all.len(), WRITERS * PER_WRITER);

        let mut ids: Vec<_> = all.iter().map(|r| r.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), WRITERS * PER_WRITER);
    }

    #[tokio::test]
    async fn run_bounds_operations() {
        let (s, _dir) = make_store();
        let record = s
            .run(|store| store.append(&CONTACT_MESSAGES, contact("ada"), None))
            .await
            .unwrap();
        assert!(!record.responded);

        let slow = Store {
            db: s.db.clone(),
            op_timeout: Duration::from_millis(10),
        };
        let err = slow
            .run(|_| {
                std::thread::sleep(Duration::from_millis(200));
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
