use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostInfo {
    pub big_endian: bool,
    pub arch: String,
    pub os: String,
    pub available_parallelism: usize,
    pub runtime_version: Option<u32>,
}

impl HostInfo {
    pub fn current(runtime_version: Option<u32>) -> Self {
        Self {
            big_endian: cfg!(target_endian = "big"),
            arch: std::env::consts::ARCH.to_string(),
            os: std::env::consts::OS.to_string(),
            available_parallelism: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            runtime_version,
        }
    }

    pub fn describe(&self) -> String {
        let runtime = self
            .runtime_version
            .map(|v| v.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        format!(
            "{}-{} ({}), runtime {}",
            self.os,
            self.arch,
            if self.big_endian { "big-endian" } else { "little-endian" },
            runtime
        )
    }
}
