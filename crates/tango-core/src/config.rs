//! Runtime configuration, per §6. Environment variables take precedence;
//! a `tango.toml` (or `~/.tango/tango.toml`) supplies anything the
//! environment leaves unset, and hard-coded defaults fill the rest —
//! mirroring the root binary's own config-loading layer.

use crate::error::{CoreError, Result};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TangoConfig {
    pub use_redis: bool,
    pub redis_hostname: String,
    pub redis_port: u16,
    pub prefix: String,

    pub max_jobid: i64,
    pub max_concurrent_jobs: usize,
    pub max_ec2_vms: usize,
    pub reuse_vms: bool,

    pub dispatch_period: Duration,
    pub waitvm_timeout: Duration,
    pub initializevm_timeout: Duration,
    pub copyin_timeout: Duration,
    pub copyout_timeout: Duration,
    pub timer_poll_interval: Duration,

    pub vm_ulimit_user_proc: u32,
    pub vm_ulimit_file_size: u64,
    pub max_output_file_size: u64,
    pub docker_volume_path: String,

    pub ec2_region: String,
    pub security_key_name: String,
    pub security_key_path: String,
    pub default_security_group: String,
    pub default_inst_type: String,

    pub logfile: String,
    pub log_timing: bool,
    pub keep_vm_after_failure: bool,
}

impl Default for TangoConfig {
    fn default() -> Self {
        Self {
            use_redis: false,
            redis_hostname: "localhost".into(),
            redis_port: 6379,
            prefix: "/tango".into(),

            max_jobid: 10_000,
            max_concurrent_jobs: 10,
            max_ec2_vms: 50,
            reuse_vms: false,

            dispatch_period: Duration::from_secs(1),
            waitvm_timeout: Duration::from_secs(300),
            initializevm_timeout: Duration::from_secs(300),
            copyin_timeout: Duration::from_secs(30),
            copyout_timeout: Duration::from_secs(30),
            timer_poll_interval: Duration::from_secs(30),

            vm_ulimit_user_proc: 100,
            vm_ulimit_file_size: 1_048_576,
            max_output_file_size: 4_096_000,
            docker_volume_path: "/tmp/tango".into(),

            ec2_region: "us-east-1".into(),
            security_key_name: String::new(),
            security_key_path: String::new(),
            default_security_group: "default".into(),
            default_inst_type: "t3.medium".into(),

            logfile: "tango.log".into(),
            log_timing: false,
            keep_vm_after_failure: false,
        }
    }
}

impl TangoConfig {
    /// Build from environment variables, falling back to `tango.toml` (or
    /// `~/.tango/tango.toml`) for anything unset, and finally to
    /// [`TangoConfig::default`].
    pub fn load() -> Result<Self> {
        let mut config = Self::default();
        ConfigFile::load_with_fallback().apply_to(&mut config);
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("USE_REDIS") {
            self.use_redis = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("REDIS_HOSTNAME") {
            self.redis_hostname = v;
        }
        if let Ok(v) = std::env::var("REDIS_PORT") {
            self.redis_port = parse_env("REDIS_PORT", &v)?;
        }
        if let Ok(v) = std::env::var("PREFIX") {
            self.prefix = v;
        }
        if let Ok(v) = std::env::var("MAX_JOBID") {
            self.max_jobid = parse_env("MAX_JOBID", &v)?;
        }
        if let Ok(v) = std::env::var("MAX_CONCURRENT_JOBS") {
            self.max_concurrent_jobs = parse_env("MAX_CONCURRENT_JOBS", &v)?;
        }
        if let Ok(v) = std::env::var("MAX_EC2_VMS") {
            self.max_ec2_vms = parse_env("MAX_EC2_VMS", &v)?;
        }
        if let Ok(v) = std::env::var("REUSE_VMS") {
            self.reuse_vms = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("DISPATCH_PERIOD") {
            self.dispatch_period = Duration::from_secs(parse_env("DISPATCH_PERIOD", &v)?);
        }
        if let Ok(v) = std::env::var("WAITVM_TIMEOUT") {
            self.waitvm_timeout = Duration::from_secs(parse_env("WAITVM_TIMEOUT", &v)?);
        }
        if let Ok(v) = std::env::var("INITIALIZEVM_TIMEOUT") {
            self.initializevm_timeout = Duration::from_secs(parse_env("INITIALIZEVM_TIMEOUT", &v)?);
        }
        if let Ok(v) = std::env::var("COPYIN_TIMEOUT") {
            self.copyin_timeout = Duration::from_secs(parse_env("COPYIN_TIMEOUT", &v)?);
        }
        if let Ok(v) = std::env::var("COPYOUT_TIMEOUT") {
            self.copyout_timeout = Duration::from_secs(parse_env("COPYOUT_TIMEOUT", &v)?);
        }
        if let Ok(v) = std::env::var("TIMER_POLL_INTERVAL") {
            self.timer_poll_interval = Duration::from_secs(parse_env("TIMER_POLL_INTERVAL", &v)?);
        }
        if let Ok(v) = std::env::var("VM_ULIMIT_USER_PROC") {
            self.vm_ulimit_user_proc = parse_env("VM_ULIMIT_USER_PROC", &v)?;
        }
        if let Ok(v) = std::env::var("VM_ULIMIT_FILE_SIZE") {
            self.vm_ulimit_file_size = parse_env("VM_ULIMIT_FILE_SIZE", &v)?;
        }
        if let Ok(v) = std::env::var("MAX_OUTPUT_FILE_SIZE") {
            self.max_output_file_size = parse_env("MAX_OUTPUT_FILE_SIZE", &v)?;
        }
        if let Ok(v) = std::env::var("DOCKER_VOLUME_PATH") {
            self.docker_volume_path = v;
        }
        if let Ok(v) = std::env::var("EC2_REGION") {
            self.ec2_region = v;
        }
        if let Ok(v) = std::env::var("SECURITY_KEY_NAME") {
            self.security_key_name = v;
        }
        if let Ok(v) = std::env::var("SECURITY_KEY_PATH") {
            self.security_key_path = v;
        }
        if let Ok(v) = std::env::var("DEFAULT_SECURITY_GROUP") {
            self.default_security_group = v;
        }
        if let Ok(v) = std::env::var("DEFAULT_INST_TYPE") {
            self.default_inst_type = v;
        }
        if let Ok(v) = std::env::var("LOGFILE") {
            self.logfile = v;
        }
        if let Ok(v) = std::env::var("LOG_TIMING") {
            self.log_timing = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("KEEP_VM_AFTER_FAILURE") {
            self.keep_vm_after_failure = parse_bool(&v);
        }
        Ok(())
    }
}

fn parse_bool(v: &str) -> bool {
    v == "1" || v.eq_ignore_ascii_case("true")
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| CoreError::Config(format!("invalid value for {name}: {value}")))
}

/// The TOML-loadable subset of configuration, overlaid onto defaults
/// before environment variables are applied.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub redis_hostname: Option<String>,
    #[serde(default)]
    pub redis_port: Option<u16>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub max_concurrent_jobs: Option<usize>,
    #[serde(default)]
    pub reuse_vms: Option<bool>,
    #[serde(default)]
    pub docker_volume_path: Option<String>,
    #[serde(default)]
    pub ec2_region: Option<String>,
    #[serde(default)]
    pub logfile: Option<String>,
}

impl ConfigFile {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| CoreError::Config(format!("reading {}: {err}", path.display())))?;
        toml::from_str(&text).map_err(|err| CoreError::Config(format!("parsing {}: {err}", path.display())))
    }

    /// Try `./tango.toml`, then `~/.tango/tango.toml`, then an empty default.
    pub fn load_with_fallback() -> Self {
        if let Ok(config) = Self::load(std::path::Path::new("tango.toml")) {
            return config;
        }
        if let Some(home) = home_dir() {
            let path = home.join(".tango").join("tango.toml");
            if let Ok(config) = Self::load(&path) {
                return config;
            }
        }
        Self::default()
    }

    pub fn apply_to(&self, config: &mut TangoConfig) {
        if let Some(v) = &self.redis_hostname {
            config.redis_hostname = v.clone();
        }
        if let Some(v) = self.redis_port {
            config.redis_port = v;
        }
        if let Some(v) = &self.prefix {
            config.prefix = v.clone();
        }
        if let Some(v) = self.max_concurrent_jobs {
            config.max_concurrent_jobs = v;
        }
        if let Some(v) = self.reuse_vms {
            config.reuse_vms = v;
        }
        if let Some(v) = &self.docker_volume_path {
            config.docker_volume_path = v.clone();
        }
        if let Some(v) = &self.ec2_region {
            config.ec2_region = v.clone();
        }
        if let Some(v) = &self.logfile {
            config.logfile = v.clone();
        }
    }
}

fn home_dir() -> Option<std::path::PathBuf> {
    std::env::var_os("HOME").map(std::path::PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = TangoConfig::default();
        assert_eq!(config.max_jobid, 10_000);
        assert!(!config.reuse_vms);
    }

    #[test]
    fn config_file_overlays_only_present_fields() {
        let mut config = TangoConfig::default();
        let file = ConfigFile { max_concurrent_jobs: Some(42), ..Default::default() };
        file.apply_to(&mut config);
        assert_eq!(config.max_concurrent_jobs, 42);
        assert_eq!(config.redis_hostname, "localhost");
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("1"));
        assert!(parse_bool("true"));
        assert!(parse_bool("True"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("no"));
    }
}
