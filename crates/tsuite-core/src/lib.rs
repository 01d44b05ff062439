//! Data model shared by the suite runner and its CLI: test descriptors, the
//! expected-status database and the immutable run configuration.

pub mod config;
pub mod database;
pub mod descriptor;
pub mod host;

pub use config::{apply_arg, usage, ArgAction, ConfigError, RunConfiguration, RunConfigurationBuilder};
pub use database::{
    atomic_write_bytes, ConfigStore, ExpectedStatusDatabase, JsonConfigStore, StoreError, Verification,
};
pub use descriptor::{
    compare_paths, Condition, ResultSlots, RuntimeBound, Status, StatusOverride, TestDescriptor, TestResult,
    VersionSpec, MAX_VERSION, MIN_VERSION,
};
pub use host::HostInfo;

pub const EXIT_OK: i32 = 0;
pub const EXIT_GATE_FAILED: i32 = 1;
/// No test files discovered, or the scheduler could not finish the run.
pub const EXIT_NO_TESTS: i32 = -1;
pub const EXIT_USAGE: i32 = -2;
