//! Durable, crash-safe compliance state.
//!
//! Two storage tiers share one directory:
//!
//! - **Boot tier**: `current.lock`, a single encrypted record holding the
//!   current lock state. Written atomically (temp file + rename) on every
//!   transition and readable through
//!   [`ComplianceStateStore::read_boot_record`] before `init()`; this is
//!   what boot recovery consults before anything else is up.
//! - **Full tier**: the append-style lock history (`history.jsonl`,
//!   hash-chained for tamper evidence), escalation counters
//!   (`counters.state`) and the outbound queue (`queue.state`).
//!
//! All state lives in memory behind `RwLock`s with write-through
//! persistence. Persistence failures degrade to memory-only operation and
//! are logged; they are never surfaced as fatal. Uses XChaCha20-Poly1305
//! with a key derived from the device id, so a copied state directory is
//! useless on another device.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::WardenError;
use crate::lock::LockRecord;
use crate::queue::QueuedCommand;

/// XChaCha20-Poly1305 nonce size (24 bytes).
const NONCE_SIZE: usize = 24;

const CURRENT_FILE: &str = "current.lock";
const HISTORY_FILE: &str = "history.jsonl";
const COUNTERS_FILE: &str = "counters.state";
const QUEUE_FILE: &str = "queue.state";

/// Hash value that opens the history chain.
const GENESIS_HASH: &str = "genesis";

/// A persisted escalation counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationCounter {
    /// Violation category this counter tracks.
    pub category: String,
    /// Number of qualifying events since the last administrator reset.
    pub count: u32,
    /// Unix timestamp of the most recent event.
    pub last_event_at: i64,
}

/// One line of the hash-chained history file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChainedRecord {
    /// The lock record at this position.
    record: LockRecord,
    /// Hash of the previous line, or `genesis`.
    previous_hash: String,
    /// SHA-256 over `previous_hash || record`.
    entry_hash: String,
}

/// Durable storage for lock state, counters, and the outbound queue.
///
/// Only the LockStateMachine mutates lock records and only the
/// EscalationTracker mutates counters; the store itself is dumb storage
/// with a lifecycle.
pub struct ComplianceStateStore {
    device_id: String,
    state_dir: PathBuf,
    encryption_key: [u8; 32],
    current: RwLock<LockRecord>,
    history: RwLock<Vec<LockRecord>>,
    counters: RwLock<HashMap<String, EscalationCounter>>,
    queue: RwLock<Vec<QueuedCommand>>,
}

impl ComplianceStateStore {
    /// Create a store rooted at `state_dir`. No I/O happens until
    /// [`init`](Self::init).
    pub fn new(device_id: &str, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            device_id: device_id.to_string(),
            state_dir: state_dir.into(),
            encryption_key: derive_key(device_id),
            current: RwLock::new(LockRecord::unlocked(now_ts())),
            history: RwLock::new(Vec::new()),
            counters: RwLock::new(HashMap::new()),
            queue: RwLock::new(Vec::new()),
        }
    }

    /// Load persisted state into memory.
    pub fn init(&self) -> Result<(), WardenError> {
        std::fs::create_dir_all(&self.state_dir).map_err(|e| WardenError::Store {
            message: format!("cannot create state dir: {e}"),
        })?;

        if let Some(record) = Self::read_boot_record(&self.state_dir, &self.device_id) {
            if let Ok(mut current) = self.current.write() {
                *current = record;
            }
        }

        let history = self.load_history();
        let history_len = history.len();
        if let Ok(mut slot) = self.history.write() {
            *slot = history;
        }

        if let Some(counters) = self.load_encrypted::<HashMap<String, EscalationCounter>>(COUNTERS_FILE)
        {
            if let Ok(mut slot) = self.counters.write() {
                *slot = counters;
            }
        }

        if let Some(queue) = self.load_encrypted::<Vec<QueuedCommand>>(QUEUE_FILE) {
            if let Ok(mut slot) = self.queue.write() {
                *slot = queue;
            }
        }

        info!(
            state_dir = ?self.state_dir,
            history_len,
            "Store: initialized"
        );
        Ok(())
    }

    /// Flush everything and release the store.
    pub fn close(&self) {
        self.persist_history();
        self.persist_counters();
        self.persist_queue();
        debug!("Store: closed");
    }

    // ========================================================================
    // Boot tier
    // ========================================================================

    /// Read the boot-tier record before the store is initialized.
    ///
    /// The second argument is the device id the key was derived from.
    /// Returns `None` when the file is missing, unreadable, or fails
    /// authentication; a tampered file reads the same as a missing one.
    pub fn read_boot_record(state_dir: &Path, device_id: &str) -> Option<LockRecord> {
        let key = derive_key(device_id);
        let data = std::fs::read(state_dir.join(CURRENT_FILE)).ok()?;
        let plaintext = decrypt(&key, &data)?;
        match serde_json::from_slice::<LockRecord>(&plaintext) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Store: boot record corrupt ({e}), ignoring");
                None
            },
        }
    }

    /// The current lock record (snapshot read).
    #[must_use]
    pub fn current_record(&self) -> LockRecord {
        self.current
            .read()
            .map(|r| r.clone())
            .unwrap_or_else(|_| LockRecord::unlocked(now_ts()))
    }

    /// Persist a new current record to memory and the boot tier.
    ///
    /// The boot-tier write is atomic (temp + rename) so a crash mid-write
    /// leaves the previous record intact.
    pub fn persist_current(&self, record: &LockRecord) {
        if let Ok(mut current) = self.current.write() {
            *current = record.clone();
        }

        let Some(encrypted) = serde_json::to_vec(record)
            .ok()
            .and_then(|data| encrypt(&self.encryption_key, &data))
        else {
            warn!("Store: failed to encode current record, memory-only");
            return;
        };

        if let Err(e) = atomic_write(&self.state_dir.join(CURRENT_FILE), &encrypted) {
            warn!("Store: failed to persist current record: {e}");
        }
    }

    // ========================================================================
    // History
    // ========================================================================

    /// Append a transition record to the history.
    pub fn append_history(&self, record: &LockRecord) {
        if let Ok(mut history) = self.history.write() {
            history.push(record.clone());
        }
        self.persist_history();
    }

    /// All historical lock records, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<LockRecord> {
        self.history.read().map(|h| h.clone()).unwrap_or_default()
    }

    /// Mark every unresolved lock record resolved at `resolved_at`.
    ///
    /// Records are never deleted; resolution only sets the timestamp.
    /// Returns the number of records resolved.
    pub fn resolve_unresolved(&self, resolved_at: i64) -> usize {
        let mut resolved = 0;
        if let Ok(mut history) = self.history.write() {
            for record in history.iter_mut() {
                if record.is_unresolved() {
                    record.resolved_at = Some(resolved_at);
                    resolved += 1;
                }
            }
        }
        if resolved > 0 {
            self.persist_history();
        }
        resolved
    }

    /// The most recent unresolved record, if any.
    #[must_use]
    pub fn latest_unresolved(&self) -> Option<LockRecord> {
        self.history
            .read()
            .ok()?
            .iter()
            .rev()
            .find(|r| r.is_unresolved())
            .cloned()
    }

    fn load_history(&self) -> Vec<LockRecord> {
        let path = self.state_dir.join(HISTORY_FILE);
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };

        let mut records = Vec::new();
        let mut previous_hash = GENESIS_HASH.to_string();
        for (line_no, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: ChainedRecord = match serde_json::from_str(line) {
                Ok(e) => e,
                Err(e) => {
                    warn!(line = line_no, "Store: unparseable history line ({e}), stopping load");
                    break;
                },
            };

            let expected = chain_hash(&previous_hash, &entry.record);
            if entry.previous_hash != previous_hash || entry.entry_hash != expected {
                warn!(
                    line = line_no,
                    "Store: history hash chain broken (possible tampering), keeping verified prefix"
                );
                break;
            }

            previous_hash = entry.entry_hash.clone();
            records.push(entry.record);
        }
        records
    }

    fn persist_history(&self) {
        let records = self.history();
        let mut out = String::new();
        let mut previous_hash = GENESIS_HASH.to_string();
        for record in &records {
            let entry_hash = chain_hash(&previous_hash, record);
            let entry = ChainedRecord {
                record: record.clone(),
                previous_hash: previous_hash.clone(),
                entry_hash: entry_hash.clone(),
            };
            match serde_json::to_string(&entry) {
                Ok(line) => {
                    out.push_str(&line);
                    out.push('\n');
                },
                Err(e) => {
                    warn!("Store: failed to encode history entry: {e}");
                    return;
                },
            }
            previous_hash = entry_hash;
        }

        if let Err(e) = atomic_write(&self.state_dir.join(HISTORY_FILE), out.as_bytes()) {
            warn!("Store: failed to persist history: {e}");
        }
    }

    // ========================================================================
    // Escalation counters
    // ========================================================================

    /// The counter for a category, if one exists.
    #[must_use]
    pub fn counter(&self, category: &str) -> Option<EscalationCounter> {
        self.counters
            .read()
            .ok()
            .and_then(|c| c.get(category).cloned())
    }

    /// Write a counter through to storage.
    pub fn put_counter(&self, counter: EscalationCounter) {
        if let Ok(mut counters) = self.counters.write() {
            counters.insert(counter.category.clone(), counter);
        }
        self.persist_counters();
    }

    /// Remove a counter (administrator reset).
    pub fn remove_counter(&self, category: &str) {
        if let Ok(mut counters) = self.counters.write() {
            counters.remove(category);
        }
        self.persist_counters();
    }

    fn persist_counters(&self) {
        let snapshot = self
            .counters
            .read()
            .map(|c| c.clone())
            .unwrap_or_default();
        self.persist_encrypted(COUNTERS_FILE, &snapshot);
    }

    // ========================================================================
    // Outbound queue
    // ========================================================================

    /// Snapshot of the persisted queue.
    #[must_use]
    pub fn queue_snapshot(&self) -> Vec<QueuedCommand> {
        self.queue.read().map(|q| q.clone()).unwrap_or_default()
    }

    /// Replace the persisted queue with a new state.
    pub fn replace_queue(&self, commands: Vec<QueuedCommand>) {
        if let Ok(mut queue) = self.queue.write() {
            *queue = commands;
        }
        self.persist_queue();
    }

    fn persist_queue(&self) {
        let snapshot = self.queue.read().map(|q| q.clone()).unwrap_or_default();
        self.persist_encrypted(QUEUE_FILE, &snapshot);
    }

    // ========================================================================
    // Encrypted file helpers
    // ========================================================================

    fn load_encrypted<T: serde::de::DeserializeOwned>(&self, file: &str) -> Option<T> {
        let data = std::fs::read(self.state_dir.join(file)).ok()?;
        let plaintext = decrypt(&self.encryption_key, &data)?;
        match serde_json::from_slice(&plaintext) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(file = %file, "Store: corrupt state file ({e}), starting fresh");
                None
            },
        }
    }

    fn persist_encrypted<T: Serialize>(&self, file: &str, value: &T) {
        let Some(encrypted) = serde_json::to_vec(value)
            .ok()
            .and_then(|data| encrypt(&self.encryption_key, &data))
        else {
            warn!(file = %file, "Store: failed to encode state, memory-only");
            return;
        };

        if let Err(e) = atomic_write(&self.state_dir.join(file), &encrypted) {
            warn!(file = %file, "Store: failed to persist state: {e}");
        }
    }

}

/// Derive the state encryption key from the device id.
fn derive_key(device_id: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"warden-state-key:");
    hasher.update(device_id.as_bytes());
    hasher.finalize().into()
}

/// SHA-256 over the previous hash and the serialized record.
fn chain_hash(previous_hash: &str, record: &LockRecord) -> String {
    let mut hasher = Sha256::new();
    hasher.update(previous_hash.as_bytes());
    if let Ok(data) = serde_json::to_vec(record) {
        hasher.update(&data);
    }
    hex::encode(hasher.finalize())
}

/// Encrypt with XChaCha20-Poly1305; returns nonce || ciphertext.
fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Option<Vec<u8>> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let cipher = XChaCha20Poly1305::new_from_slice(key).ok()?;
    let ciphertext = cipher.encrypt(nonce, plaintext).ok()?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Some(result)
}

/// Decrypt nonce || ciphertext; `None` on authentication failure.
fn decrypt(key: &[u8; 32], data: &[u8]) -> Option<Vec<u8>> {
    if data.len() < NONCE_SIZE {
        warn!(data_len = data.len(), "Store: state file too short");
        return None;
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);

    let cipher = XChaCha20Poly1305::new_from_slice(key).ok()?;
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| {
            warn!("Store: decryption failed (possible tampering): {e}");
            e
        })
        .ok()
}

/// Write a file through a temp sibling and rename.
fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)
}

/// Current Unix timestamp.
pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
