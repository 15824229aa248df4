//! Roster fetch protocol.
//!
//! A fetch runs on the async runtime and may only touch the [`RosterSlot`]:
//! it replaces the stored snapshot and raises the pending flag. The tick
//! later takes the snapshot out of the slot and reconciles it.

use crate::descriptor::CharacterDescriptor;
use crate::directory::{CharacterDirectory, DirectoryError};
use crate::simulation::Owner;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};


/// Ordered roster produced by one successful fetch
pub type RosterSnapshot = Vec<CharacterDescriptor>;

/// Single-slot exchange between fetch tasks and the tick.
///
/// Holds at most one snapshot; a newer snapshot overwrites an unconsumed
/// older one (last completed fetch wins).
#[derive(Debug, Default)]
pub struct RosterSlot {
    snapshot: Mutex<Option<RosterSnapshot>>,
    pending: AtomicBool,
    /// Number of snapshots stored so far
    generation: AtomicU64,
}

impl RosterSlot {
    pub fn new() -> Self {
        Self {
            snapshot: Mutex::new(None),
            pending: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    /// Request reconciliation of the next snapshot.
    pub fn mark_pending(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Replace the stored snapshot and raise the pending flag.
    pub fn store(&self, snapshot: RosterSnapshot) {
        let mut slot = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(snapshot);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.pending.store(true, Ordering::SeqCst);
    }

    /// Copy of the stored snapshot, if any.
    pub fn peek(&self) -> Option<RosterSnapshot> {
        self.snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Take the snapshot for reconciliation.
    ///
    /// Returns `None` (and leaves the flag untouched) unless a reconciliation
    /// is pending and a snapshot has landed. On success the slot is emptied
    /// and the flag cleared, so the snapshot is reconciled exactly once.
    pub fn take_pending(&self) -> Option<RosterSnapshot> {
        if !self.is_pending() {
            return None;
        }
        let mut slot = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
        let snapshot = slot.take()?;
        self.pending.store(false, Ordering::SeqCst);
        Some(snapshot)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// Issues roster fetches against the character directory.
pub struct RosterFetcher {
    directory: Arc<dyn CharacterDirectory>,
    game_tag: String,
    timeout: Duration,
}

impl RosterFetcher {
    pub fn new(directory: Arc<dyn CharacterDirectory>, game_tag: impl Into<String>, timeout: Duration) -> Self {
        Self {
            directory,
            game_tag: game_tag.into(),
            timeout,
        }
    }

    /// Start an asynchronous roster fetch for `owner`.
    ///
    /// Marks `slot` pending immediately, then fetches on the runtime. On
    /// success the snapshot replaces whatever the slot holds; on failure the
    /// slot is left exactly as it was. Must be called from within a tokio
    /// runtime.
    pub fn request(
        &self,
        owner: &Owner,
        slot: &Arc<RosterSlot>,
    ) -> JoinHandle<Result<RosterSnapshot, DirectoryError>> {
        slot.mark_pending();

        let directory = Arc::clone(&self.directory);
        let slot = Arc::clone(slot);
        let owner = owner.clone();
        let game_tag = self.game_tag.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, directory.fetch_characters(&owner, &game_tag)).await {
                Ok(result) => result,
                Err(_) => Err(DirectoryError::Timeout),
            };

            match &result {
                Ok(roster) => {
                    info!(owner = %owner, companions = roster.len(), "Roster fetched");
                    slot.store(roster.clone());
                }
                Err(e) => {
                    warn!(owner = %owner, error = %e, "Roster fetch failed, keeping current companions");
                }
            }

            result
        })
    }
}
