//! Engine process configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default LibreOffice-style headless invocation. `{port}` and `{profile}`
/// are substituted per instance at spawn time.
pub const DEFAULT_LAUNCH_ARGS: &[&str] = &[
    "--headless",
    "--invisible",
    "--norestore",
    "--accept=socket,host=127.0.0.1,port={port};urp;",
    "-env:UserInstallation=file://{profile}",
];

/// Configuration for launching and talking to engine processes.
///
/// One config is shared by every instance in a pool; per-instance values
/// (port, profile directory) are derived from the instance ordinal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfficeConfig {
    /// Engine executable.
    pub binary: PathBuf,
    /// Argument template; `{port}` and `{profile}` placeholders are expanded.
    pub launch_args: Vec<String>,
    /// First control port; instance N listens on `base_port + N`.
    pub base_port: u16,
    /// Root under which per-instance profile directories are created.
    pub profile_root: PathBuf,
    /// Per-instance profile directory name; `{ordinal}` is expanded.
    pub profile_template: String,
    /// How long to wait for a freshly spawned process to become reachable.
    pub start_timeout_ms: u64,
    /// Delay between connect attempts while the process is starting.
    pub connect_retry_ms: u64,
    /// Upper bound for any single control-protocol round trip.
    pub call_timeout_ms: u64,
    /// Grace period between a quit request and a forced kill.
    pub stop_grace_ms: u64,
}

impl Default for OfficeConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("soffice"),
            launch_args: DEFAULT_LAUNCH_ARGS.iter().map(|s| s.to_string()).collect(),
            base_port: 8100,
            profile_root: std::env::temp_dir().join("rust-odc"),
            profile_template: "engine-{ordinal}".to_string(),
            start_timeout_ms: 120_000,
            connect_retry_ms: 250,
            call_timeout_ms: 120_000,
            stop_grace_ms: 5_000,
        }
    }
}

impl OfficeConfig {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn connect_retry(&self) -> Duration {
        Duration::from_millis(self.connect_retry_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn port_for(&self, ordinal: u32) -> u16 {
        self.base_port.wrapping_add(ordinal as u16)
    }

    pub fn profile_dir_for(&self, ordinal: u32) -> PathBuf {
        self.profile_root
            .join(expand_template(&self.profile_template, ordinal, 0))
    }

    pub fn launch_args_for(&self, ordinal: u32) -> Vec<String> {
        let port = self.port_for(ordinal);
        let profile = self.profile_dir_for(ordinal);
        self.launch_args
            .iter()
            .map(|arg| {
                arg.replace("{port}", &port.to_string())
                    .replace("{profile}", &profile.to_string_lossy())
            })
            .collect()
    }
}

fn expand_template(template: &str, ordinal: u32, port: u16) -> String {
    template
        .replace("{ordinal}", &ordinal.to_string())
        .replace("{port}", &port.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports_and_profiles_are_per_ordinal() {
        let config = OfficeConfig::default();
        assert_eq!(config.port_for(0), 8100);
        assert_eq!(config.port_for(3), 8103);

        let p0 = config.profile_dir_for(0);
        let p3 = config.profile_dir_for(3);
        assert_ne!(p0, p3);
        assert!(p0.ends_with("engine-0"));
    }

    #[test]
    fn launch_args_expand_placeholders() {
        let config = OfficeConfig::default();
        let args = config.launch_args_for(2);
        assert!(args.iter().any(|a| a.contains("port=8102")));
        assert!(args.iter().any(|a| a.contains("engine-2")));
        assert!(args.iter().all(|a| !a.contains("{port}")));
    }
}
