//! Helper configuration.
//!
//! Values come from built-in defaults, then an optional TOML file, then
//! `BOUGH_*` environment variables. `GIT_SMART_HTTP=0` turns smart HTTP off
//! the way git does.

use crate::Result;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment prefix for overrides, e.g. `BOUGH_POST_BUFFER`.
pub const ENV_PREFIX: &str = "BOUGH";

/// Settings for the HTTP remote helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Largest request sent in one buffered POST, in bytes.
    pub post_buffer: usize,
    /// `User-Agent` header for every request.
    pub user_agent: String,
    /// Ask for the smart protocol during discovery.
    pub smart_http: bool,
    /// Program used for `fetch-pack`, `http-push` and the plumbing behind
    /// a push.
    pub git_program: String,
    /// Program run as `<program> send-pack` for smart pushes. Empty means
    /// this helper itself.
    pub send_pack_program: String,
    /// Per-request timeout; `0` disables it.
    pub timeout_secs: u64,
    /// Buffered fetch requests above this size are gzip-compressed.
    pub gzip_threshold: usize,
    /// Deepest tree nesting followed by the dumb walker.
    pub max_tree_depth: usize,
    /// Credential helper command line; `fill`, `approve` or `reject` is
    /// appended.
    pub credential_helper: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            post_buffer: 1024 * 1024,
            user_agent: bough_git::AGENT.to_string(),
            smart_http: true,
            git_program: "git".to_string(),
            send_pack_program: String::new(),
            timeout_secs: 0,
            gzip_threshold: 1024,
            max_tree_depth: 2048,
            credential_helper: "git credential".to_string(),
        }
    }
}

/// Default location of the config file, `<config dir>/bough/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("bough").join("config.toml"))
}

impl RemoteConfig {
    /// Loads the configuration.
    ///
    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (file, required) = match path {
            Some(path) => (Some(path.to_path_buf()), true),
            None => (default_config_path(), false),
        };
        let mut config = Self::build(file.as_deref(), required, Environment::with_prefix(ENV_PREFIX))?;
        config.apply_smart_http_env(std::env::var("GIT_SMART_HTTP").ok().as_deref());
        debug!(?config, "loaded configuration");
        Ok(config)
    }

    fn build(file: Option<&Path>, required: bool, env: Environment) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(
                File::from(file)
                    .format(FileFormat::Toml)
                    .required(required),
            );
        }
        let config = builder
            .add_source(env.try_parsing(true))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Applies `GIT_SMART_HTTP`; only a false value has an effect.
    pub fn apply_smart_http_env(&mut self, value: Option<&str>) {
        if let Some(value) = value {
            if matches!(value.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off") {
                self.smart_http = false;
            }
        }
    }

    /// The program whose `send-pack` mode produces push requests.
    pub fn push_program(&self) -> PathBuf {
        if !self.send_pack_program.is_empty() {
            return PathBuf::from(&self.send_pack_program);
        }
        std::env::current_exe().unwrap_or_else(|_| PathBuf::from("git-remote-bough"))
    }

    /// The credential helper split into program and arguments.
    pub fn credential_command(&self) -> Vec<String> {
        self.credential_helper
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix(ENV_PREFIX).source(Some(map))
    }

    #[test]
    fn test_defaults() {
        let config = RemoteConfig::build(None, false, env(&[])).unwrap();
        assert_eq!(config, RemoteConfig::default());
        assert_eq!(config.post_buffer, 1 << 20);
        assert_eq!(config.credential_command(), ["git", "credential"]);
    }

    #[test]
    fn test_push_program() {
        let config = RemoteConfig::build(
            None,
            false,
            env(&[("BOUGH_SEND_PACK_PROGRAM", "/usr/libexec/push-child")]),
        )
        .unwrap();
        assert_eq!(config.push_program(), PathBuf::from("/usr/libexec/push-child"));
        assert_ne!(RemoteConfig::default().push_program(), PathBuf::new());
    }

    #[test]
    fn test_file_then_env() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let from_file = RemoteConfig {
            post_buffer: 4096,
            git_program: "/opt/git/bin/git".to_string(),
            ..RemoteConfig::default()
        };
        fs::write(&path, toml::to_string(&from_file).unwrap()).unwrap();

        let config = RemoteConfig::build(
            Some(&path),
            true,
            env(&[("BOUGH_POST_BUFFER", "65536"), ("BOUGH_SMART_HTTP", "false")]),
        )
        .unwrap();
        assert_eq!(config.post_buffer, 65536);
        assert_eq!(config.git_program, "/opt/git/bin/git");
        assert!(!config.smart_http);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "gzip_threshold = 10\n").unwrap();
        let config = RemoteConfig::build(Some(&path), true, env(&[])).unwrap();
        assert_eq!(config.gzip_threshold, 10);
        assert_eq!(config.max_tree_depth, 2048);
    }

    #[test]
    fn test_missing_required_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(RemoteConfig::build(Some(&path), true, env(&[])).is_err());
        assert!(RemoteConfig::build(Some(&path), false, env(&[])).is_ok());
    }

    #[test]
    fn test_smart_http_env() {
        let mut config = RemoteConfig::default();
        config.apply_smart_http_env(Some("1"));
        assert!(config.smart_http);
        config.apply_smart_http_env(None);
        assert!(config.smart_http);
        config.apply_smart_http_env(Some("0"));
        assert!(!config.smart_http);
    }
}
