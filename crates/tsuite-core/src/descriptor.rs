use crate::config::RunConfiguration;
use crate::host::HostInfo;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

pub const MIN_VERSION: u32 = 5;
pub const MAX_VERSION: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Pass,
    Skip,
    /// Expected to fail: the test still runs, but a failure is not a regression.
    Fail,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pass => "PASS",
            Status::Skip => "SKIP",
            Status::Fail => "FAIL",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VersionSpec {
    Explicit {
        versions: BTreeSet<u32>,
    },
    Range {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<u32>,
    },
}

impl Default for VersionSpec {
    fn default() -> Self {
        VersionSpec::Range {
            min: None,
            max: None,
        }
    }
}

impl VersionSpec {
    pub fn for_versions(versions: &[u32]) -> Self {
        VersionSpec::Explicit {
            versions: versions.iter().copied().collect(),
        }
    }

    pub fn at_least(min: u32) -> Self {
        VersionSpec::Range {
            min: Some(min),
            max: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            VersionSpec::Explicit { versions } if versions.is_empty() => {
                Err("explicit version set is empty".to_string())
            }
            VersionSpec::Explicit { .. } => Ok(()),
            VersionSpec::Range { .. } => {
                let (lo, hi) = self.bounds();
                if lo > hi {
                    Err(format!("version range {}..{} is empty", lo, hi))
                } else {
                    Ok(())
                }
            }
        }
    }

    fn bounds(&self) -> (u32, u32) {
        match self {
            VersionSpec::Explicit { versions } => (
                versions.first().copied().unwrap_or(MAX_VERSION),
                versions.last().copied().unwrap_or(MAX_VERSION),
            ),
            VersionSpec::Range { min, max } => {
                (min.unwrap_or(MIN_VERSION), max.unwrap_or(MAX_VERSION))
            }
        }
    }

    /// Concrete, sorted list of versions. Never empty for a value that passes
    /// [`VersionSpec::validate`]; an invalid value falls back to the latest version.
    pub fn resolve(&self) -> Vec<u32> {
        let resolved: Vec<u32> = match self {
            VersionSpec::Explicit { versions } => versions.iter().copied().collect(),
            VersionSpec::Range { .. } => {
                let (lo, hi) = self.bounds();
                (lo..=hi).collect()
            }
        };
        if resolved.is_empty() {
            vec![MAX_VERSION]
        } else {
            resolved
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeBound {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,
}

impl RuntimeBound {
    pub fn excludes(&self, runtime_version: Option<u32>) -> bool {
        let Some(version) = runtime_version else {
            return false;
        };
        self.min.is_some_and(|min| version < min) || self.max.is_some_and(|max| version > max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Condition {
    BigEndian,
    LittleEndian,
    #[serde(rename = "X86_64")]
    X86_64,
    Aarch64,
    Linux,
    Macos,
    Windows,
    CompileMode,
    ExternalProcess,
    SharedContext,
}

impl Condition {
    pub fn holds(self, config: &RunConfiguration, host: &HostInfo) -> bool {
        match self {
            Condition::BigEndian => host.big_endian,
            Condition::LittleEndian => !host.big_endian,
            Condition::X86_64 => host.arch == "x86_64",
            Condition::Aarch64 => host.arch == "aarch64",
            Condition::Linux => host.os == "linux",
            Condition::Macos => host.os == "macos",
            Condition::Windows => host.os == "windows",
            Condition::CompileMode => config.is_compile(),
            Condition::ExternalProcess => config.uses_external_process(),
            Condition::SharedContext => config.is_shared_context(),
        }
    }

    pub fn byte_order(host: &HostInfo) -> Self {
        if host.big_endian {
            Condition::BigEndian
        } else {
            Condition::LittleEndian
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusOverride {
    pub condition: Condition,
    pub status: Status,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDescriptor {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecma_version: Option<VersionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_bound: Option<RuntimeBound>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_overrides: Option<Vec<StatusOverride>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_in_isolation: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl TestDescriptor {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Descriptor for a freshly discovered file: expected to pass, not isolated.
    pub fn discovered(path: impl Into<String>) -> Self {
        Self {
            status: Some(Status::Pass),
            run_in_isolation: Some(false),
            ..Self::new(path)
        }
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_override(mut self, condition: Condition, status: Status) -> Self {
        self.status_overrides
            .get_or_insert_with(Vec::new)
            .push(StatusOverride { condition, status });
        self
    }

    pub fn expected_status(&self) -> Status {
        self.status.unwrap_or(Status::Pass)
    }

    pub fn runs_in_isolation(&self) -> bool {
        self.run_in_isolation.unwrap_or(false)
    }

    pub fn versions(&self) -> Option<Vec<u32>> {
        self.ecma_version.as_ref().map(VersionSpec::resolve)
    }

    /// Platform bound first, then the first override whose condition holds,
    /// then the declared status.
    pub fn real_status(&self, config: &RunConfiguration, host: &HostInfo) -> Status {
        if self
            .runtime_bound
            .is_some_and(|bound| bound.excludes(host.runtime_version))
        {
            return Status::Skip;
        }
        self.status_overrides
            .iter()
            .flatten()
            .find(|o| o.condition.holds(config, host))
            .map(|o| o.status)
            .unwrap_or_else(|| self.expected_status())
    }

    pub fn override_for(&self, condition: Condition) -> Option<Status> {
        self.status_overrides
            .iter()
            .flatten()
            .find(|o| o.condition == condition)
            .map(|o| o.status)
    }

    /// Sets (or replaces in place) the override for `condition`.
    pub fn set_override(&mut self, condition: Condition, status: Status) {
        let overrides = self.status_overrides.get_or_insert_with(Vec::new);
        match overrides.iter_mut().find(|o| o.condition == condition) {
            Some(existing) => existing.status = status,
            None => overrides.push(StatusOverride { condition, status }),
        }
    }

    /// Moves (or adds) the override for `condition` to the front so that it is
    /// evaluated before every other override.
    pub fn set_leading_override(&mut self, condition: Condition, status: Status) {
        let overrides = self.status_overrides.get_or_insert_with(Vec::new);
        overrides.retain(|o| o.condition != condition);
        overrides.insert(0, StatusOverride { condition, status });
    }

    pub fn has_overrides(&self) -> bool {
        self.status_overrides.as_ref().is_some_and(|o| !o.is_empty())
    }

    /// Field-by-field merge: `incoming` wins wherever it has a value.
    pub fn merge(existing: &TestDescriptor, incoming: &TestDescriptor) -> TestDescriptor {
        TestDescriptor {
            path: incoming.path.clone(),
            ecma_version: incoming
                .ecma_version
                .clone()
                .or_else(|| existing.ecma_version.clone()),
            runtime_bound: incoming.runtime_bound.or(existing.runtime_bound),
            status: incoming.status.or(existing.status),
            status_overrides: incoming
                .status_overrides
                .clone()
                .or_else(|| existing.status_overrides.clone()),
            run_in_isolation: incoming.run_in_isolation.or(existing.run_in_isolation),
            blocked_by: incoming
                .blocked_by
                .clone()
                .or_else(|| existing.blocked_by.clone()),
            comment: incoming.comment.clone().or_else(|| existing.comment.clone()),
        }
    }
}

impl PartialEq for TestDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for TestDescriptor {}

impl Hash for TestDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl Ord for TestDescriptor {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_paths(&self.path, &other.path)
    }
}

impl PartialOrd for TestDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub fn compare_paths(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestResult {
    Passed,
    /// The test ran, but suite-specific logic chose to disregard its outcome.
    Ignored,
    Failed { details: String, timeout: bool },
}

impl TestResult {
    pub fn failed(details: impl Into<String>) -> Self {
        TestResult::Failed {
            details: details.into(),
            timeout: false,
        }
    }

    pub fn timeout(details: impl Into<String>) -> Self {
        TestResult::Failed {
            details: details.into(),
            timeout: true,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, TestResult::Failed { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TestResult::Failed { timeout: true, .. })
    }
}

/// One write-once result slot per discovered test, indexed like the
/// descriptor list the orchestrator owns.
#[derive(Debug)]
pub struct ResultSlots {
    slots: Vec<OnceLock<TestResult>>,
}

impl ResultSlots {
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| OnceLock::new()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Stores the result for `index`; hands the value back if the slot was
    /// already written or does not exist.
    pub fn record(&self, index: usize, result: TestResult) -> Result<(), TestResult> {
        match self.slots.get(index) {
            Some(slot) => slot.set(result),
            None => Err(result),
        }
    }

    pub fn get(&self, index: usize) -> Option<&TestResult> {
        self.slots.get(index).and_then(OnceLock::get)
    }
}
