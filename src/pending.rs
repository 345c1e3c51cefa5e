//! Correlation of outgoing requests with frames that arrive later.
//!
//! The bus has no request/response primitive. Each request registers an entry keyed by
//! (charger, expected record kind) holding a oneshot slot and a deadline. The dispatcher resolves
//! entries as matching frames arrive. Every entry ends exactly once: with a record, with a
//! timeout, or cancelled, and is removed from the table when it ends.
//!
//! Only one entry may exist per key. A second request for the same key is rejected rather than
//! sharing the first one's slot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{ClientError, Result};
use crate::message::{DecodedRecord, RecordKind};
use crate::ChargerId;

type Key = (ChargerId, RecordKind);

struct PendingRequest {
    // Distinguishes this entry from a later one registered under the same key.
    id: u64,
    deadline: Instant,
    timeout: Duration,
    slot: oneshot::Sender<Result<DecodedRecord>>,
}

#[derive(Default)]
struct TableState {
    entries: HashMap<Key, PendingRequest>,
    next_id: u64,
    closed: bool,
}

/// The in-flight requests of one client. Clones share the same table.
#[derive(Clone, Default)]
pub(crate) struct PendingTable {
    state: Arc<Mutex<TableState>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry for `(charger_id, kind)` that times out after `timeout`.
    pub fn register(&self, charger_id: ChargerId, kind: RecordKind, timeout: Duration) -> Result<PendingHandle> {
        let mut state = self.lock();
        if state.closed {
            return Err(ClientError::TransportDisconnected);
        }

        let key = (charger_id, kind);
        if state.entries.contains_key(&key) {
            return Err(ClientError::AlreadyPending { charger_id: key.0, kind });
        }

        let id = state.next_id;
        state.next_id += 1;
        let deadline = deadline_after(timeout);
        let (slot, rx) = oneshot::channel();
        state.entries.insert(key.clone(), PendingRequest { id, deadline, timeout, slot });
        trace!(charger_id = %key.0, %kind, id, "registered pending request");

        Ok(PendingHandle { table: self.clone(), key, id, deadline, timeout, rx })
    }

    /// Hand `record` to the entry waiting for it. Returns false when nobody was waiting.
    pub fn resolve(&self, charger_id: &ChargerId, record: DecodedRecord) -> bool {
        let key = (charger_id.clone(), record.kind());
        let entry = self.lock().entries.remove(&key);
        match entry {
            Some(entry) => {
                trace!(%charger_id, kind = %key.1, id = entry.id, "resolved pending request");
                // The waiter may have given up in the meantime; the record is then dropped.
                let _ = entry.slot.send(Ok(record));
                true
            }
            None => false,
        }
    }

    /// Time out every entry whose deadline is at or before `now`. Returns how many expired.
    pub fn expire(&self, now: Instant) -> usize {
        let mut state = self.lock();
        let expired: Vec<Key> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired.iter() {
            if let Some(entry) = state.entries.remove(key) {
                debug!(charger_id = %key.0, kind = %key.1, "pending request expired");
                let _ = entry.slot.send(Err(ClientError::RequestTimeout {
                    charger_id: key.0.clone(),
                    kind: key.1,
                    timeout: entry.timeout,
                }));
            }
        }

        expired.len()
    }

    /// End every entry with the error produced by `reason`. Returns how many were cancelled.
    pub fn cancel_all(&self, reason: impl Fn() -> ClientError) -> usize {
        let entries: Vec<(Key, PendingRequest)> = self.lock().entries.drain().collect();
        let count = entries.len();
        for ((charger_id, kind), entry) in entries {
            debug!(%charger_id, %kind, "pending request cancelled");
            let _ = entry.slot.send(Err(reason()));
        }
        count
    }

    /// Cancel everything with [`ClientError::TransportDisconnected`] and refuse new entries.
    pub fn close(&self) -> usize {
        self.lock().closed = true;
        self.cancel_all(|| ClientError::TransportDisconnected)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub fn contains(&self, charger_id: &ChargerId, kind: RecordKind) -> bool {
        self.lock().entries.contains_key(&(charger_id.clone(), kind))
    }

    fn remove_if_current(&self, key: &Key, id: u64) {
        let mut state = self.lock();
        if state.entries.get(key).is_some_and(|entry| entry.id == id) {
            state.entries.remove(key);
            trace!(charger_id = %key.0, kind = %key.1, id, "pending request abandoned");
        }
    }

    // Critical sections never panic, so a poisoned lock still guards consistent data.
    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// `now + timeout`, or a deadline decades away when that is not representable.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// The caller's side of a pending entry. Dropping it withdraws the entry.
pub(crate) struct PendingHandle {
    table: PendingTable,
    key: Key,
    id: u64,
    deadline: Instant,
    timeout: Duration,
    rx: oneshot::Receiver<Result<DecodedRecord>>,
}

impl PendingHandle {
    /// Wait until the entry is resolved, expired or cancelled.
    pub async fn wait(mut self) -> Result<DecodedRecord> {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(completion)) => completion,
            // The table went away without ending the entry.
            Ok(Err(_)) => Err(ClientError::TransportDisconnected),
            Err(_) => {
                self.table.remove_if_current(&self.key, self.id);
                // A frame may have landed between the deadline and the removal.
                if let Ok(completion) = self.rx.try_recv() {
                    return completion;
                }
                Err(ClientError::RequestTimeout {
                    charger_id: self.key.0.clone(),
                    kind: self.key.1,
                    timeout: self.timeout,
                })
            }
        }
    }
}

impl Drop for PendingHandle {
    fn drop(&mut self) {
        self.table.remove_if_current(&self.key, self.id);
    }
}

#[cfg(test)]
fn status_record() -> DecodedRecord {
    let message = hex::decode("aa55160102020103000005dc000004d20001e24000050002").unwrap();
    crate::message::decode(&message).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_register_rejected() {
    let table = PendingTable::new();
    let c1 = ChargerId::from("C1");

    let first = table.register(c1.clone(), RecordKind::Status, Duration::from_secs(5)).unwrap();
    let second = table.register(c1.clone(), RecordKind::Status, Duration::from_secs(5));
    assert!(matches!(second, Err(ClientError::AlreadyPending { kind: RecordKind::Status, .. })));

    // Different kind or different charger is independent.
    let _metrics = table.register(c1.clone(), RecordKind::Metrics, Duration::from_secs(5)).unwrap();
    let _other = table.register(ChargerId::from("C2"), RecordKind::Status, Duration::from_secs(5)).unwrap();
    assert_eq!(table.len(), 3);

    assert!(table.resolve(&c1, status_record()));
    assert!(!table.resolve(&c1, status_record()));
    assert_eq!(first.wait().await.unwrap(), status_record());
    assert!(!table.contains(&c1, RecordKind::Status));
    assert!(table.contains(&c1, RecordKind::Metrics));
}

#[tokio::test(start_paused = true)]
async fn test_wait_times_out_and_removes_entry() {
    let table = PendingTable::new();
    let c1 = ChargerId::from("C1");
    let handle = table.register(c1.clone(), RecordKind::Metrics, Duration::from_secs(5)).unwrap();

    let result = handle.wait().await;
    assert!(matches!(result, Err(ClientError::RequestTimeout { kind: RecordKind::Metrics, .. })));
    assert!(table.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_expire_only_past_deadlines() {
    let table = PendingTable::new();
    let short = table.register(ChargerId::from("C1"), RecordKind::Status, Duration::from_secs(1)).unwrap();
    let _long = table.register(ChargerId::from("C2"), RecordKind::Status, Duration::from_secs(10)).unwrap();

    assert_eq!(table.expire(Instant::now()), 0);
    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(table.expire(Instant::now()), 1);
    assert_eq!(table.len(), 1);
    assert!(matches!(short.wait().await, Err(ClientError::RequestTimeout { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_close_cancels_everything() {
    let table = PendingTable::new();
    let handles: Vec<PendingHandle> = ["C1", "C2", "C3"]
        .into_iter()
        .map(|id| table.register(ChargerId::from(id), RecordKind::Status, Duration::from_secs(5)).unwrap())
        .collect();

    assert_eq!(table.close(), 3);
    assert!(table.is_empty());
    for handle in handles {
        assert!(matches!(handle.wait().await, Err(ClientError::TransportDisconnected)));
    }

    let late = table.register(ChargerId::from("C4"), RecordKind::Status, Duration::from_secs(5));
    assert!(matches!(late, Err(ClientError::TransportDisconnected)));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_handle_withdraws_only_its_entry() {
    let table = PendingTable::new();
    let c1 = ChargerId::from("C1");
    let dropped = table.register(c1.clone(), RecordKind::Status, Duration::from_secs(5)).unwrap();
    let kept = table.register(c1.clone(), RecordKind::Metrics, Duration::from_secs(5)).unwrap();

    drop(dropped);
    assert!(!table.contains(&c1, RecordKind::Status));
    assert!(table.contains(&c1, RecordKind::Metrics));

    // The key is free again and the new entry is not disturbed by the old id.
    let again = table.register(c1.clone(), RecordKind::Status, Duration::from_secs(5)).unwrap();
    assert_eq!(table.len(), 2);
    drop(kept);
    drop(again);
    assert!(table.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_register_with_unbounded_timeout() {
    let table = PendingTable::new();
    let c1 = ChargerId::from("C1");
    let handle = table.register(c1.clone(), RecordKind::Status, Duration::MAX).unwrap();

    tokio::time::advance(Duration::from_secs(86_400)).await;
    assert_eq!(table.expire(Instant::now()), 0);
    assert!(table.resolve(&c1, status_record()));
    assert_eq!(handle.wait().await.unwrap(), status_record());
}
