//! Cache key generation.
//!
//! A key combines a fingerprint of the source spreadsheet with a fingerprint
//! of the processing options. Neither the path nor the options are stored in
//! the identity itself; both are hashed so that identities have a fixed
//! length and can double as file names.

use crate::types::FingerprintPolicy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use xlrag_core::{Error, Result};

/// Identifies one cached computation: a source file processed with a given
/// set of options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheKey {
    /// Source file. Informational, and used to re-check freshness.
    pub file_path: PathBuf,
    /// Fingerprint of the file at key-generation time.
    pub file_fingerprint: String,
    /// Fingerprint of the canonicalized options.
    pub options_fingerprint: String,
    /// Policy the file fingerprint was computed with.
    pub policy: FingerprintPolicy,
    identity: String,
}

impl CacheKey {
    /// Assemble a key from already computed fingerprints.
    pub fn from_parts(
        file_path: impl Into<PathBuf>,
        file_fingerprint: String,
        options_fingerprint: String,
        policy: FingerprintPolicy,
    ) -> Self {
        let identity = combine(&file_fingerprint, &options_fingerprint);
        Self {
            file_path: file_path.into(),
            file_fingerprint,
            options_fingerprint,
            policy,
            identity,
        }
    }

    /// The opaque map key. Two keys are equal iff their identities are.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Recompute the file fingerprint and compare it with the recorded one.
    ///
    /// A file that can no longer be inspected is not fresh.
    pub fn is_fresh(&self) -> bool {
        match file_fingerprint(&self.file_path, self.policy) {
            Ok(current) => current == self.file_fingerprint,
            Err(_) => false,
        }
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity)
    }
}

/// Generate a key for `path` processed with `options`, fingerprinting the
/// file by its metadata.
pub fn make_key<O: Serialize + ?Sized>(path: impl AsRef<Path>, options: &O) -> Result<CacheKey> {
    make_key_with(path, options, FingerprintPolicy::Metadata)
}

/// Generate a key using an explicit fingerprint policy.
///
/// Fails with [`Error::SourceUnavailable`] when the file cannot be
/// inspected and with [`Error::InvalidOptions`] when the options do not
/// serialize to a JSON object.
pub fn make_key_with<O: Serialize + ?Sized>(
    path: impl AsRef<Path>,
    options: &O,
    policy: FingerprintPolicy,
) -> Result<CacheKey> {
    let path = path.as_ref();
    let options_fp = options_fingerprint(options)?;
    let file_fp = file_fingerprint(path, policy)?;
    Ok(CacheKey::from_parts(path, file_fp, options_fp, policy))
}

/// Fingerprint the current state of a source file.
pub fn file_fingerprint(path: &Path, policy: FingerprintPolicy) -> Result<String> {
    let metadata =
        std::fs::metadata(path).map_err(|e| Error::source_unavailable(path, e))?;
    if !metadata.is_file() {
        return Err(Error::source_unavailable(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
        ));
    }

    match policy {
        FingerprintPolicy::Metadata => {
            let canonical =
                std::fs::canonicalize(path).map_err(|e| Error::source_unavailable(path, e))?;
            let modified = metadata
                .modified()
                .map_err(|e| Error::source_unavailable(path, e))?;
            // Timestamps before the epoch hash as zero; size and path still apply.
            let mtime_nanos = modified
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);

            let mut hasher = Sha256::new();
            hasher.update(canonical.to_string_lossy().as_bytes());
            hasher.update([0u8]);
            hasher.update(metadata.len().to_le_bytes());
            hasher.update(mtime_nanos.to_le_bytes());
            Ok(hex::encode(&hasher.finalize()[..16]))
        }
        FingerprintPolicy::Content => {
            let mut file = File::open(path).map_err(|e| Error::source_unavailable(path, e))?;
            let mut hasher = Sha256::new();
            std::io::copy(&mut file, &mut hasher)
                .map_err(|e| Error::source_unavailable(path, e))?;
            Ok(hex::encode(hasher.finalize()))
        }
    }
}

/// Fingerprint a processing-options mapping.
///
/// Object keys are sorted at every nesting level before hashing, so equal
/// mappings fingerprint identically regardless of insertion order. `null`
/// is treated as an empty mapping.
pub fn options_fingerprint<O: Serialize + ?Sized>(options: &O) -> Result<String> {
    let value = serde_json::to_value(options)
        .map_err(|e| Error::InvalidOptions(format!("cannot serialize options: {}", e)))?;
    let value = match value {
        Value::Null => Value::Object(Map::new()),
        Value::Object(_) => canonicalize(value),
        other => {
            return Err(Error::InvalidOptions(format!(
                "options must be a mapping, got {}",
                json_kind(&other)
            )));
        }
    };

    let serialized = serde_json::to_string(&value)?;
    let hash = Sha256::digest(serialized.as_bytes());
    Ok(hex::encode(&hash[..16]))
}

/// Sanitize a key for use in filenames.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}

fn combine(file_fp: &str, options_fp: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_fp.as_bytes());
    hasher.update(b"|");
    hasher.update(options_fp.as_bytes());
    hex::encode(hasher.finalize())
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
