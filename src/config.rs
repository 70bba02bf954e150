//! Runtime configuration.
//!
//! Each setting resolves as: CLI flag, then environment variable, then the
//! optional YAML config file, then the built-in default.

use crate::errors::{AppError, AppResult};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_DATABASE: &str = "./state/directory.sqlite";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

const ENV_BIND: &str = "PROFILE_DIRECTORY_BIND";
const ENV_DATA_DIR: &str = "PROFILE_DIRECTORY_DATA";
const ENV_DATABASE: &str = "PROFILE_DIRECTORY_DB";
const ENV_RELOAD_TOKEN: &str = "PROFILE_DIRECTORY_RELOAD_TOKEN";
const ENV_BUSY_TIMEOUT_MS: &str = "PROFILE_DIRECTORY_BUSY_TIMEOUT_MS";
const ENV_LOG_DIR: &str = "PROFILE_DIRECTORY_LOG_DIR";
const ENV_CONFIG: &str = "PROFILE_DIRECTORY_CONFIG";

/// Profile directory server.
///
/// Serves the reload trigger and link click redirects over HTTP. The reload
/// token is read from the environment or the config file only.
#[derive(Parser, Debug, Default)]
#[command(name = "profile-directory", version, about)]
pub struct Cli {
    /// HTTP bind address [env: PROFILE_DIRECTORY_BIND] [default: 127.0.0.1:3000]
    #[arg(long, short = 'b')]
    pub bind: Option<String>,

    /// Directory of profile JSON files [env: PROFILE_DIRECTORY_DATA] [default: ./data]
    #[arg(long, short = 'd')]
    pub data_dir: Option<PathBuf>,

    /// SQLite database path [env: PROFILE_DIRECTORY_DB] [default: ./state/directory.sqlite]
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// SQLite busy timeout in milliseconds [env: PROFILE_DIRECTORY_BUSY_TIMEOUT_MS] [default: 5000]
    #[arg(long)]
    pub busy_timeout_ms: Option<u64>,

    /// Write JSON logs to a daily rolling file here instead of stderr [env: PROFILE_DIRECTORY_LOG_DIR]
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// YAML config file [env: PROFILE_DIRECTORY_CONFIG]
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
struct FileConfig {
    bind: Option<String>,
    data_dir: Option<PathBuf>,
    database: Option<PathBuf>,
    reload_token: Option<String>,
    busy_timeout_ms: Option<u64>,
    log_dir: Option<PathBuf>,
}

#[derive(Clone)]
pub struct Config {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub database: PathBuf,
    pub reload_token: Option<String>,
    pub busy_timeout: Duration,
    pub log_dir: Option<PathBuf>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("data_dir", &self.data_dir)
            .field("database", &self.database)
            .field("reload_token", &self.reload_token.as_ref().map(|_| "<redacted>"))
            .field("busy_timeout", &self.busy_timeout)
            .field("log_dir", &self.log_dir)
            .finish()
    }
}

impl Config {
    pub fn load(cli: Cli) -> AppResult<Self> {
        Self::resolve(cli, |key| std::env::var(key).ok())
    }

    fn resolve(cli: Cli, env: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let config_path = cli.config.clone().or_else(|| env(ENV_CONFIG).map(PathBuf::from));
        let file = match config_path {
            Some(path) => read_config_file(&path)?,
            None => FileConfig::default(),
        };

        let bind_addr = cli
            .bind
            .or_else(|| env(ENV_BIND))
            .or(file.bind)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());

        let data_dir = cli
            .data_dir
            .or_else(|| env(ENV_DATA_DIR).map(PathBuf::from))
            .or(file.data_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let database = cli
            .database
            .or_else(|| env(ENV_DATABASE).map(PathBuf::from))
            .or(file.database)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE));

        let reload_token = env(ENV_RELOAD_TOKEN)
            .or(file.reload_token)
            .filter(|token| !token.trim().is_empty());

        let env_busy_timeout = match env(ENV_BUSY_TIMEOUT_MS) {
            Some(raw) => Some(raw.trim().parse::<u64>().map_err(|error| {
                AppError::Config(format!("{} must be a number of milliseconds: {}", ENV_BUSY_TIMEOUT_MS, error))
            })?),
            None => None,
        };
        let busy_timeout_ms = cli
            .busy_timeout_ms
            .or(env_busy_timeout)
            .or(file.busy_timeout_ms)
            .unwrap_or(DEFAULT_BUSY_TIMEOUT_MS);

        let log_dir = cli
            .log_dir
            .or_else(|| env(ENV_LOG_DIR).map(PathBuf::from))
            .or(file.log_dir);

        Ok(Self {
            bind_addr,
            data_dir,
            database,
            reload_token,
            busy_timeout: Duration::from_millis(busy_timeout_ms),
            log_dir,
        })
    }
}

fn read_config_file(path: &Path) -> AppResult<FileConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|error| AppError::Config(format!("failed reading {}: {}", path.display(), error)))?;
    if raw.trim().is_empty() {
        return Ok(FileConfig::default());
    }
    serde_yaml::from_str(&raw).map_err(|error| AppError::Config(format!("failed parsing {}: {}", path.display(), error)))
}

#[cfg(test)]
mod tests {
    use super::{Cli, Config, DEFAULT_BIND, DEFAULT_BUSY_TIMEOUT_MS, ENV_BIND, ENV_RELOAD_TOKEN};
    use crate::errors::AppError;
    use crate::test_support::ENV_MUTEX;
    use clap::Parser;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = Config::resolve(Cli::default(), env_of(&[])).expect("config");
        assert_eq!(config.bind_addr, DEFAULT_BIND);
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.database, PathBuf::from("./state/directory.sqlite"));
        assert_eq!(config.busy_timeout, Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS));
        assert!(config.reload_token.is_none());
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn cli_beats_env_beats_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("directory.yaml");
        std::fs::write(
            &file,
            "bind: 0.0.0.0:1\ndata_dir: /from/file\ndatabase: /file.sqlite\nreload_token: file-token\nbusy_timeout_ms: 10\n",
        )
        .expect("write config");

        let cli = Cli::parse_from([
            "profile-directory",
            "--bind",
            "0.0.0.0:3",
            "--config",
            file.to_str().expect("utf8 path"),
        ]);
        let env = env_of(&[
            ("PROFILE_DIRECTORY_BIND", "0.0.0.0:2"),
            ("PROFILE_DIRECTORY_DATA", "/from/env"),
        ]);
        let config = Config::resolve(cli, env).expect("config");

        assert_eq!(config.bind_addr, "0.0.0.0:3");
        assert_eq!(config.data_dir, PathBuf::from("/from/env"));
        assert_eq!(config.database, PathBuf::from("/file.sqlite"));
        assert_eq!(config.reload_token.as_deref(), Some("file-token"));
        assert_eq!(config.busy_timeout, Duration::from_millis(10));
    }

    #[test]
    fn reload_token_has_no_cli_flag() {
        let parsed = Cli::try_parse_from(["profile-directory", "--reload-token", "x"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn bad_values_are_config_errors() {
        let error = Config::resolve(Cli::default(), env_of(&[("PROFILE_DIRECTORY_BUSY_TIMEOUT_MS", "soon")]))
            .expect_err("bad timeout");
        assert!(matches!(error, AppError::Config(_)));

        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("bad.yaml");
        std::fs::write(&file, "unknown_key: 1\n").expect("write config");
        let cli = Cli {
            config: Some(file),
            ..Cli::default()
        };
        let error = Config::resolve(cli, env_of(&[])).expect_err("unknown key");
        assert!(matches!(error, AppError::Config(_)));
    }

    #[test]
    fn load_reads_process_environment() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::env::set_var(ENV_BIND, "127.0.0.1:4040");
        std::env::set_var(ENV_RELOAD_TOKEN, "env-token");

        let config = Config::load(Cli::default());

        std::env::remove_var(ENV_BIND);
        std::env::remove_var(ENV_RELOAD_TOKEN);
        let config = config.expect("config");
        assert_eq!(config.bind_addr, "127.0.0.1:4040");
        assert_eq!(config.reload_token.as_deref(), Some("env-token"));
        assert!(!format!("{:?}", config).contains("env-token"));
    }
}
