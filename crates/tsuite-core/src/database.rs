use crate::descriptor::TestDescriptor;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("expected-status database not found: {}", .0.display())]
    Missing(PathBuf),
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed expected-status database {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    /// Parsed fine, but the bytes on disk are not in canonical form.
    #[error("expected-status database is not canonically formatted")]
    FormatMismatch { database: Box<ExpectedStatusDatabase> },
    #[error("duplicate entry in expected-status database: {0}")]
    DuplicateEntry(String),
    #[error("invalid entry {path}: {reason}")]
    InvalidEntry { path: String, reason: String },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    #[serde(default)]
    test_files: Vec<TestDescriptor>,
}

/// Persisted expected statuses, ordered case-insensitively by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpectedStatusDatabase {
    entries: BTreeSet<TestDescriptor>,
}

#[derive(Debug, Default)]
pub struct Verification {
    pub valid: HashMap<String, TestDescriptor>,
    pub invalid: Vec<TestDescriptor>,
}

impl ExpectedStatusDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TestDescriptor> {
        self.entries.iter()
    }

    pub fn get(&self, path: &str) -> Option<&TestDescriptor> {
        self.entries.get(&TestDescriptor::new(path))
    }

    /// Drops any entry sharing an identity with an incoming one, then inserts.
    /// No field merging happens here; see [`ExpectedStatusDatabase::merged_with`].
    pub fn add_or_replace<I>(&mut self, tests: I)
    where
        I: IntoIterator<Item = TestDescriptor>,
    {
        for test in tests {
            self.entries.replace(test);
        }
    }

    pub fn remove<'a, I>(&mut self, tests: I)
    where
        I: IntoIterator<Item = &'a TestDescriptor>,
    {
        for test in tests {
            self.entries.remove(test);
        }
    }

    pub fn merged_with<'a, I>(&self, tests: I) -> Vec<TestDescriptor>
    where
        I: IntoIterator<Item = &'a TestDescriptor>,
    {
        tests
            .into_iter()
            .map(|incoming| match self.get(&incoming.path) {
                Some(existing) => TestDescriptor::merge(existing, incoming),
                None => incoming.clone(),
            })
            .collect()
    }

    pub fn verify_against_disk(&self, test_root: &Path) -> Verification {
        let mut verification = Verification::default();
        for entry in &self.entries {
            if test_root.join(&entry.path).is_file() {
                verification
                    .valid
                    .insert(entry.path.clone(), entry.clone());
            } else {
                verification.invalid.push(entry.clone());
            }
        }
        verification
    }

    fn from_document(document: Document) -> Result<Self, StoreError> {
        let mut seen = HashSet::new();
        let mut entries = BTreeSet::new();
        for entry in document.test_files {
            if entry.path.trim().is_empty() {
                return Err(StoreError::InvalidEntry {
                    path: entry.path,
                    reason: "empty path".to_string(),
                });
            }
            if let Some(versions) = entry.ecma_version.as_ref() {
                versions.validate().map_err(|reason| StoreError::InvalidEntry {
                    path: entry.path.clone(),
                    reason,
                })?;
            }
            if !seen.insert(entry.path.clone()) {
                return Err(StoreError::DuplicateEntry(entry.path));
            }
            entries.insert(entry);
        }
        Ok(Self { entries })
    }

    /// Canonical bytes: two-space pretty JSON with a trailing newline.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let document = Document {
            test_files: self.entries.iter().cloned().collect(),
        };
        let mut bytes = serde_json::to_vec_pretty(&document)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<ExpectedStatusDatabase, StoreError>;
    fn save(&self, database: &ExpectedStatusDatabase) -> Result<(), StoreError>;
    fn location(&self) -> &Path;
}

#[derive(Debug, Clone)]
pub struct JsonConfigStore {
    path: PathBuf,
    verify_format: bool,
}

impl JsonConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            verify_format: true,
        }
    }

    pub fn verify_format(mut self, enabled: bool) -> Self {
        self.verify_format = enabled;
        self
    }
}

impl ConfigStore for JsonConfigStore {
    fn load(&self) -> Result<ExpectedStatusDatabase, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::Missing(self.path.clone()))
            }
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        let document: Document =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Parse {
                path: self.path.clone(),
                message: e.to_string(),
            })?;
        let database = ExpectedStatusDatabase::from_document(document)?;
        if self.verify_format {
            let canonical = database
                .to_canonical_bytes()
                .map_err(|e| StoreError::Parse {
                    path: self.path.clone(),
                    message: e.to_string(),
                })?;
            if canonical != bytes {
                return Err(StoreError::FormatMismatch {
                    database: Box::new(database),
                });
            }
        }
        Ok(database)
    }

    fn save(&self, database: &ExpectedStatusDatabase) -> Result<(), StoreError> {
        let bytes = database
            .to_canonical_bytes()
            .map_err(|e| StoreError::Parse {
                path: self.path.clone(),
                message: e.to_string(),
            })?;
        atomic_write_bytes(&self.path, &bytes).map_err(|e| StoreError::io(&self.path, e))
    }

    fn location(&self) -> &Path {
        &self.path
    }
}

/// Temp file in the target directory, fsync, rename over the target.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}
