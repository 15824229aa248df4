//! Owner record persistence.
//!
//! Each owner's name -> durable id record is stored as gzip-compressed JSON
//! in its own file, written atomically so a crash never leaves a partial
//! record behind.

use crate::registry::{CompanionRecord, CompanionRegistry};
use crate::simulation::{Owner, OwnerId};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const RECORD_VERSION: &str = "1";

/// Persisted companion bindings of one owner
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OwnerRecord {
    /// Record format version
    pub record_version: String,
    pub saved_at: DateTime<Utc>,
    pub owner: Owner,
    /// Companion name -> durable agent id
    pub companions: CompanionRecord,
}

impl OwnerRecord {
    pub fn from_registry(owner: &Owner, registry: &CompanionRegistry) -> Self {
        Self {
            record_version: RECORD_VERSION.to_string(),
            saved_at: Utc::now(),
            owner: owner.clone(),
            companions: registry.to_record(),
        }
    }

    /// Rebuild a registry; identities come back without entity ids.
    pub fn into_registry(self) -> CompanionRegistry {
        CompanionRegistry::from_record(self.companions)
    }
}

/// Directory of owner records, one file per owner.
#[derive(Clone, Debug)]
pub struct RecordStore {
    directory: PathBuf,
}

impl RecordStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// File holding the record of `owner`
    pub fn path_for(&self, owner: OwnerId) -> PathBuf {
        self.directory.join(format!("{}.json.gz", owner))
    }

    /// Save `record`, replacing any previous record of the same owner.
    ///
    /// Writes to a `.tmp` file, fsyncs, then renames over the target.
    pub fn save(&self, record: &OwnerRecord) -> Result<PathBuf> {
        fs::create_dir_all(&self.directory).with_context(|| {
            format!("Failed to create record directory {}", self.directory.display())
        })?;

        let json = serde_json::to_vec(record).context("Failed to serialize owner record")?;
        let path = self.path_for(record.owner.id);
        let tmp_path = path.with_extension("tmp");

        {
            let tmp_file = File::create(&tmp_path).context("Failed to create temporary record file")?;

            let mut encoder = GzEncoder::new(tmp_file, Compression::default());
            encoder
                .write_all(&json)
                .context("Failed to write compressed record data")?;

            let file = encoder.finish().context("Failed to finish compression")?;
            file.sync_all().context("Failed to sync record file to disk")?;
        }

        fs::rename(&tmp_path, &path).context("Failed to rename temporary record file")?;

        info!(
            owner = %record.owner,
            companions = record.companions.len(),
            path = %path.display(),
            "Owner record saved"
        );
        Ok(path)
    }

    /// Load the record of `owner`; `Ok(None)` when none was ever saved.
    pub fn load(&self, owner: OwnerId) -> Result<Option<OwnerRecord>> {
        let path = self.path_for(owner);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(owner = %owner, "No owner record on disk");
                return Ok(None);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to open record file {}", path.display()))
            }
        };

        let mut json = String::new();
        GzDecoder::new(file)
            .read_to_string(&mut json)
            .context("Failed to decompress record file")?;

        let record: OwnerRecord =
            serde_json::from_str(&json).context("Failed to deserialize owner record")?;
        Ok(Some(record))
    }
}
