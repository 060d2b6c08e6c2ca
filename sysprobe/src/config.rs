use crate::config_channel::{ConfigRecord, Verbosity};
use crate::consumer::ReadErrorPolicy;
use crate::controller::ControllerSettings;
use crate::probe::ProbeTarget;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysprobe_common::{CONFIG_KEY, MESSAGE_LEN};
use tracing::warn;

pub const DEFAULT_MESSAGE: &str = "Default probe message";
pub const DEFAULT_LOG_FILE: &str = "syscalls.log";
pub const DEFAULT_OBJECT_PATH: &str = "target/bpfel-unknown-none/release/sysprobe-ebpf";

// 顶层配置结构体，所有字段都可省略

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub verbose: bool,
    pub message: String,
    /// `null` turns the durable event log off.
    pub log_file: Option<PathBuf>,
    pub object_path: PathBuf,
    /// Rolling file for diagnostics instead of stderr.
    pub diagnostics_directory: Option<PathBuf>,
    pub buffer_capacity_bytes: usize,
    pub drain_grace_ms: u64,
    pub read_error_policy: ReadErrorPolicy,
    pub probes: Vec<ProbeTarget>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            message: DEFAULT_MESSAGE.to_string(),
            log_file: Some(PathBuf::from(DEFAULT_LOG_FILE)),
            object_path: PathBuf::from(DEFAULT_OBJECT_PATH),
            diagnostics_directory: None,
            buffer_capacity_bytes: 4096,
            drain_grace_ms: 100,
            read_error_policy: ReadErrorPolicy::Abort,
            probes: ProbeTarget::default_targets(),
        }
    }
}

impl AppConfig {
    pub fn load_from_file(config_file_path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let config_content = fs::read_to_string(config_file_path)?;
        Self::from_yaml_str(&config_content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, Box<dyn std::error::Error>> {
        // 空文件按默认配置处理
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let loaded_config: AppConfig = serde_yaml::from_str(content)?;
        loaded_config.validate()?;
        Ok(loaded_config)
    }

    /// 探针列表可以替换（例如其它架构的符号），但不能为空或重复
    fn validate(&self) -> Result<(), String> {
        if self.probes.is_empty() {
            return Err("'probes' must list at least one probe".to_string());
        }
        for (i, probe) in self.probes.iter().enumerate() {
            if self.probes[..i].iter().any(|p| p.symbol == probe.symbol) {
                return Err(format!("probe symbol '{}' is listed twice", probe.symbol));
            }
        }
        Ok(())
    }

    pub fn config_record(&self) -> ConfigRecord {
        if self.message.len() > MESSAGE_LEN - 1 {
            warn!(
                "Message is {} bytes, truncating to {}.",
                self.message.len(),
                MESSAGE_LEN - 1
            );
        }
        ConfigRecord::new(Verbosity::from(self.verbose), &self.message)
    }

    pub fn to_controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            config_key: CONFIG_KEY,
            config: self.config_record(),
            probes: self.probes.clone(),
            buffer_capacity_bytes: self.buffer_capacity_bytes,
            drain_grace: Duration::from_millis(self.drain_grace_ms),
            read_error_policy: self.read_error_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = AppConfig::from_yaml_str("").unwrap();
        assert!(!config.verbose);
        assert_eq!(config.message, DEFAULT_MESSAGE);
        assert_eq!(config.log_file, Some(PathBuf::from("syscalls.log")));
        assert_eq!(config.probes, ProbeTarget::default_targets());
        assert_eq!(config.read_error_policy, ReadErrorPolicy::Abort);
    }

    #[test]
    fn parses_full_config() {
        let yaml = r#"
verbose: true
message: "tracing build box"
log_file: null
object_path: "/usr/lib/sysprobe/sysprobe-ebpf"
buffer_capacity_bytes: 16384
drain_grace_ms: 250
read_error_policy:
  mode: retry
  max_consecutive: 3
probes:
  - program: kprobe_sys_read
    symbol: __arm64_sys_read
"#;
        let config = AppConfig::from_yaml_str(yaml).unwrap();
        assert!(config.verbose);
        assert_eq!(config.log_file, None);
        assert_eq!(
            config.read_error_policy,
            ReadErrorPolicy::Retry { max_consecutive: 3 }
        );
        assert_eq!(config.probes.len(), 1);
        assert_eq!(config.probes[0].symbol, "__arm64_sys_read");

        let settings = config.to_controller_settings();
        assert_eq!(settings.drain_grace, Duration::from_millis(250));
        assert_eq!(settings.buffer_capacity_bytes, 16384);
        assert_eq!(settings.config.verbosity, Verbosity::Enabled);
        assert_eq!(settings.config.message.to_string(), "tracing build box");
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(AppConfig::from_yaml_str("verbosity: 1\n").is_err());
    }

    #[test]
    fn empty_probe_list_is_rejected() {
        let err = AppConfig::from_yaml_str("probes: []\n").unwrap_err();
        assert!(err.to_string().contains("at least one probe"));
    }

    #[test]
    fn duplicate_probe_symbol_is_rejected() {
        let yaml = r#"
probes:
  - program: kprobe_sys_read
    symbol: __x64_sys_read
  - program: kprobe_sys_write
    symbol: __x64_sys_read
"#;
        assert!(AppConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn abort_policy_parses() {
        let config = AppConfig::from_yaml_str("read_error_policy:\n  mode: abort\n").unwrap();
        assert_eq!(config.read_error_policy, ReadErrorPolicy::Abort);
    }
}
