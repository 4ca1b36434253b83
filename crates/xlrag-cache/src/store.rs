//! On-disk tier for cached payloads.
//!
//! Each entry is one file named after its identity. The file starts with a
//! single JSON header line followed by the stored (possibly compressed)
//! payload bytes. The header carries enough to re-check the source file
//! without loading anything else.

use crate::entry::CacheEntry;
use crate::keys::{CacheKey, sanitize_key};
use crate::types::{CompressionType, FingerprintPolicy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use xlrag_core::{Error, Result};

const FORMAT_VERSION: u32 = 1;
const ENTRY_EXTENSION: &str = "xlc";

/// Header line of a persisted entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedHeader {
    pub format_version: u32,
    pub identity: String,
    pub file_path: PathBuf,
    pub file_fingerprint: String,
    pub options_fingerprint: String,
    pub fingerprint_policy: FingerprintPolicy,
    pub compression: CompressionType,
    pub stored_size: u64,
    pub original_size: u64,
    pub created_at: DateTime<Utc>,
}

impl PersistedHeader {
    fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            identity: entry.key.identity().to_string(),
            file_path: entry.key.file_path.clone(),
            file_fingerprint: entry.key.file_fingerprint.clone(),
            options_fingerprint: entry.key.options_fingerprint.clone(),
            fingerprint_policy: entry.key.policy,
            compression: entry.compression,
            stored_size: entry.stored_size,
            original_size: entry.original_size,
            created_at: entry.created_at,
        }
    }

    /// Rebuild the key this entry was stored under.
    pub fn key(&self) -> CacheKey {
        CacheKey::from_parts(
            self.file_path.clone(),
            self.file_fingerprint.clone(),
            self.options_fingerprint.clone(),
            self.fingerprint_policy,
        )
    }
}

/// A header plus the stored payload bytes.
#[derive(Debug, Clone)]
pub struct PersistedEntry {
    pub header: PersistedHeader,
    pub data: Vec<u8>,
}

impl PersistedEntry {
    /// Rebuild the in-memory record for this entry.
    pub fn to_entry(&self) -> CacheEntry {
        let mut entry = CacheEntry::new(
            self.header.key(),
            self.header.stored_size,
            self.header.original_size,
            self.header.compression,
        );
        entry.created_at = self.header.created_at;
        entry
    }
}

/// Result of scanning a store directory.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub entries: Vec<PersistedHeader>,
    pub unreadable: Vec<PathBuf>,
}

/// Outcome of [`DiskStore::purge_stale`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub kept: usize,
    pub removed_stale: usize,
    pub removed_corrupt: usize,
}

/// Filesystem-backed store, one file per identity.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root_dir: PathBuf,
}

impl DiskStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    fn entry_path(&self, identity: &str) -> PathBuf {
        self.root_dir
            .join(format!("{}.{}", sanitize_key(identity), ENTRY_EXTENSION))
    }

    /// Write an entry, replacing any previous file for the same identity.
    pub fn save(&self, entry: &CacheEntry, data: &[u8]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.root_dir).map_err(|e| {
            Error::Storage(format!(
                "Failed to create cache dir {}: {}",
                self.root_dir.display(),
                e
            ))
        })?;

        let header = PersistedHeader::from_entry(entry);
        let mut contents = serde_json::to_vec(&header)?;
        contents.push(b'\n');
        contents.extend_from_slice(data);

        let path = self.entry_path(&header.identity);
        let mut tmp = NamedTempFile::new_in(&self.root_dir)
            .map_err(|e| Error::Storage(format!("Failed to create temp file: {}", e)))?;
        tmp.write_all(&contents)
            .map_err(|e| Error::Storage(format!("Failed to write cache entry: {}", e)))?;
        tmp.persist(&path)
            .map_err(|e| Error::Storage(format!("Failed to commit cache entry: {}", e.error)))?;

        debug!(identity = %header.identity, path = %path.display(), "Entry persisted");
        Ok(path)
    }

    /// Load the entry for `identity`.
    ///
    /// `Ok(None)` when no file exists; `Err` when the file exists but cannot
    /// be read or parsed.
    pub fn load(&self, identity: &str) -> Result<Option<PersistedEntry>> {
        let path = self.entry_path(identity);
        let contents = match std::fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Storage(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        let entry = parse_entry(&contents)
            .map_err(|e| Error::Storage(format!("{}: {}", path.display(), e)))?;
        if entry.header.identity != identity {
            return Err(Error::Storage(format!(
                "{}: header identity does not match file name",
                path.display()
            )));
        }
        Ok(Some(entry))
    }

    /// Remove the entry for `identity`. Returns whether a file existed.
    pub fn remove(&self, identity: &str) -> Result<bool> {
        let path = self.entry_path(identity);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Storage(format!(
                "Failed to delete cache entry: {}",
                e
            ))),
        }
    }

    /// Read the header of every entry in the directory.
    pub fn list(&self) -> Result<Listing> {
        let mut listing = Listing::default();
        for path in self.entry_files()? {
            match std::fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|contents| parse_entry(&contents))
            {
                Ok(entry) => listing.entries.push(entry.header),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unreadable cache entry");
                    listing.unreadable.push(path);
                }
            }
        }
        listing
            .entries
            .sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(listing)
    }

    /// Delete entries whose source file changed or vanished, and files that
    /// cannot be parsed.
    pub fn purge_stale(&self) -> Result<PurgeReport> {
        let listing = self.list()?;
        let mut report = PurgeReport::default();

        for header in listing.entries {
            if header.key().is_fresh() {
                report.kept += 1;
            } else {
                debug!(identity = %header.identity, "Purging stale entry");
                self.remove(&header.identity)?;
                report.removed_stale += 1;
            }
        }
        for path in listing.unreadable {
            std::fs::remove_file(&path)
                .map_err(|e| Error::Storage(format!("Failed to delete {}: {}", path.display(), e)))?;
            report.removed_corrupt += 1;
        }
        Ok(report)
    }

    /// Keep the `max_entries` most recently created entries and delete the
    /// rest. Unreadable files are left for [`DiskStore::purge_stale`].
    pub fn trim(&self, max_entries: usize) -> Result<usize> {
        let listing = self.list()?;
        let mut removed = 0;
        for header in listing.entries.iter().skip(max_entries) {
            if self.remove(&header.identity)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn entry_files(&self) -> Result<Vec<PathBuf>> {
        if !self.root_dir.exists() {
            return Ok(vec![]);
        }
        let read_dir = std::fs::read_dir(&self.root_dir)
            .map_err(|e| Error::Storage(format!("Failed to read cache dir: {}", e)))?;

        let mut files = vec![];
        for entry in read_dir {
            let entry =
                entry.map_err(|e| Error::Storage(format!("Failed to read entry: {}", e)))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(ENTRY_EXTENSION) {
                files.push(path);
            }
        }
        Ok(files)
    }
}

fn parse_entry(contents: &[u8]) -> std::result::Result<PersistedEntry, String> {
    let newline = contents
        .iter()
        .position(|b| *b == b'\n')
        .ok_or("missing header")?;
    let header: PersistedHeader = serde_json::from_slice(&contents[..newline])
        .map_err(|e| format!("invalid header: {}", e))?;
    if header.format_version != FORMAT_VERSION {
        return Err(format!("unsupported format version {}", header.format_version));
    }
    let data = contents[newline + 1..].to_vec();
    if data.len() as u64 != header.stored_size {
        return Err(format!(
            "truncated payload: expected {} bytes, found {}",
            header.stored_size,
            data.len()
        ));
    }
    if header.key().identity() != header.identity {
        return Err("header fingerprints do not match identity".into());
    }
    Ok(PersistedEntry { header, data })
}
