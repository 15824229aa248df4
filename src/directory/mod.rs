//! Character directory - the external service that assigns companions.
//!
//! The orchestrator treats the directory as an opaque asynchronous call:
//! it either returns the owner's roster or fails. Nothing else about the
//! service's API is relied upon.

mod http;

pub use http::HttpDirectory;

use crate::descriptor::CharacterDescriptor;
use crate::simulation::Owner;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// Errors returned by a directory lookup
#[derive(Debug, Clone, PartialEq)]
pub enum DirectoryError {
    /// Request could not be sent or the connection failed
    Transport(String),
    /// Directory answered with a non-success status
    Status(u16),
    /// Response body was not a roster
    Malformed(String),
    /// No answer within the configured timeout
    Timeout,
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectoryError::Transport(e) => write!(f, "directory request failed: {}", e),
            DirectoryError::Status(code) => write!(f, "directory returned status {}", code),
            DirectoryError::Malformed(e) => write!(f, "malformed directory response: {}", e),
            DirectoryError::Timeout => write!(f, "directory request timed out"),
        }
    }
}

impl std::error::Error for DirectoryError {}

/// Source of companion rosters.
///
/// An `Ok` with an empty list means the owner has no companions assigned;
/// it is never used to signal a degraded service.
#[async_trait]
pub trait CharacterDirectory: Send + Sync {
    /// Fetch the characters assigned to `owner` for `game_tag`.
    async fn fetch_characters(
        &self,
        owner: &Owner,
        game_tag: &str,
    ) -> Result<Vec<CharacterDescriptor>, DirectoryError>;
}

/// Directory answering from memory.
///
/// Used for local runs without a directory service and in tests.
pub struct StaticDirectory {
    response: RwLock<Result<Vec<CharacterDescriptor>, DirectoryError>>,
    calls: AtomicUsize,
}

impl StaticDirectory {
    pub fn new(roster: Vec<CharacterDescriptor>) -> Self {
        Self {
            response: RwLock::new(Ok(roster)),
            calls: AtomicUsize::new(0),
        }
    }

    /// Directory whose every lookup fails with `error`.
    pub fn failing(error: DirectoryError) -> Self {
        Self {
            response: RwLock::new(Err(error)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_roster(&self, roster: Vec<CharacterDescriptor>) {
        if let Ok(mut response) = self.response.write() {
            *response = Ok(roster);
        }
    }

    pub fn set_failure(&self, error: DirectoryError) {
        if let Ok(mut response) = self.response.write() {
            *response = Err(error);
        }
    }

    /// Number of lookups served so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CharacterDirectory for StaticDirectory {
    async fn fetch_characters(
        &self,
        _owner: &Owner,
        _game_tag: &str,
    ) -> Result<Vec<CharacterDescriptor>, DirectoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.response.read() {
            Ok(response) => response.clone(),
            Err(_) => Err(DirectoryError::Transport("directory state poisoned".to_string())),
        }
    }
}
