
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::{Collection, DocId, Document, Filter, ID_FIELD, Patch, Record};
use crate::wal::Wal;

pub type SharedCollection = Arc<RwLock<Collection>>;

const MAX_DB_NAME_LEN: usize = 64;

/// The store did not take the write (or could not serve the read).
/// Repositories surface this unchanged; nothing below retries.
#[derive(Debug)]
pub enum StoreError {
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        record: Record,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        records: Vec<Record>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { record, response } => {
                let mut batch = vec![(record, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { record, response }) => {
                            batch.push((record, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Record, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (record, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(record) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Record, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { records, response } => {
            let result = Wal::write_compact_file(wal.path(), &records)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Generic read/write access to named document collections.
///
/// Each collection lives behind its own RwLock inside a shared map; every
/// mutating call resolves its targets under the write lock, appends exactly
/// one WAL record, and only then touches memory, so a call that reported
/// success is durable and a call that failed changed nothing.
pub struct Store {
    collections: DashMap<String, SharedCollection>,
    wal_tx: mpsc::Sender<WalCommand>,
}

/// Map a database name onto its WAL file, sanitized against path traversal.
fn wal_file_path(data_dir: &Path, db_name: &str) -> io::Result<PathBuf> {
    if db_name.len() > MAX_DB_NAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "database name too long",
        ));
    }
    let safe_name: String = db_name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if safe_name.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "empty database name",
        ));
    }
    Ok(data_dir.join(format!("{safe_name}.wal")))
}

impl Store {
    /// Open the named database under `data_dir`, replaying its WAL into memory.
    pub fn open(data_dir: &Path, db_name: &str) -> io::Result<Self> {
        let wal_path = wal_file_path(data_dir, db_name)?;
        let records = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            collections: DashMap::new(),
            wal_tx,
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly (no contention).
        for record in &records {
            match record {
                Record::Inserted { collection, doc } => {
                    let coll = store.collection(collection);
                    let mut guard = coll.try_write().expect("replay: uncontended write");
                    guard.insert(doc.clone());
                }
                Record::Patched { collection, ids, patch } => {
                    let coll = store.collection(collection);
                    let mut guard = coll.try_write().expect("replay: uncontended write");
                    guard.patch_by_ids(ids, patch);
                }
            }
        }

        Ok(store)
    }

    fn collection(&self, name: &str) -> SharedCollection {
        self.collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Collection::new())))
            .clone()
    }

    /// Write a record to the WAL via the background group-commit writer.
    async fn wal_append(&self, record: &Record) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                record: record.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    // ── Gateway operations ───────────────────────────────────

    pub async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        let coll = self.collection(collection);
        let guard = coll.read().await;
        Ok(guard.find(filter))
    }

    pub async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, StoreError> {
        let coll = self.collection(collection);
        let guard = coll.read().await;
        Ok(guard.find_one(filter))
    }

    pub async fn count(&self, collection: &str) -> usize {
        let coll = self.collection(collection);
        coll.read().await.len()
    }

    /// Insert a document, assigning its `_id`. Returns the generated id.
    pub async fn insert_one(
        &self,
        collection: &str,
        mut doc: Document,
    ) -> Result<DocId, StoreError> {
        let id = Ulid::new();
        doc.set(ID_FIELD, Value::String(id.to_string()));

        let coll = self.collection(collection);
        let mut guard = coll.write().await;
        let record = Record::Inserted {
            collection: collection.to_string(),
            doc: doc.clone(),
        };
        self.wal_append(&record).await?;
        guard.insert(doc);
        Ok(id)
    }

    /// Patch the first document matching `filter`. Returns the count modified (0 or 1).
    pub async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        patch: Patch,
    ) -> Result<u64, StoreError> {
        self.update(collection, filter, patch, Some(1)).await
    }

    /// Patch every document matching `filter`. Returns the count modified.
    pub async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        patch: Patch,
    ) -> Result<u64, StoreError> {
        self.update(collection, filter, patch, None).await
    }

    async fn update(
        &self,
        collection: &str,
        filter: &Filter,
        patch: Patch,
        limit: Option<usize>,
    ) -> Result<u64, StoreError> {
        let coll = self.collection(collection);
        let mut guard = coll.write().await;
        let ids = guard.matching_ids(filter, limit);
        if ids.is_empty() {
            // Nothing matched — no durable write happens
            return Ok(0);
        }
        let record = Record::Patched {
            collection: collection.to_string(),
            ids: ids.clone(),
            patch: patch.clone(),
        };
        self.wal_append(&record).await?;
        Ok(guard.patch_by_ids(&ids, &patch))
    }

    // ── Compaction ───────────────────────────────────────────

    /// Compact the WAL by rewriting it with one insert per live document.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let mut records = Vec::new();
        let names: Vec<String> = self.collections.iter().map(|e| e.key().clone()).collect();
        for name in names {
            let coll = self.collection(&name);
            let guard = coll.read().await;
            for doc in guard.documents() {
                records.push(Record::Inserted {
                    collection: name.clone(),
                    doc: doc.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { records, response: tx })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
