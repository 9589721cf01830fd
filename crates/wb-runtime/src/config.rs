//! Server configuration: TOML file + CLI flags + defaults, merged once at
//! startup into an immutable [`ServerConfig`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::Deserialize;
use wb_core::{AccessToken, Root};

use crate::cli::ServeOpts;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
/// 8000..9000 with the default port.
pub const DEFAULT_PORT_ATTEMPTS: u16 = 1000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_MAX_READ_BYTES: u64 = 8 * 1024 * 1024;
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 64 * 1024 * 1024;
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;
const GENERATED_TOKEN_LEN: usize = 32;

/// On-disk config. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub root: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub port_attempts: Option<u16>,
    pub token: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub replay_lines: Option<usize>,
    pub max_read_bytes: Option<u64>,
    pub max_upload_bytes: Option<u64>,
    pub max_connections: Option<usize>,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub root: Root,
    pub host: String,
    pub port: u16,
    pub port_attempts: u16,
    pub token: AccessToken,
    /// True when no token was configured and one was generated.
    pub token_generated: bool,
    pub poll_interval: Duration,
    pub replay_lines: usize,
    pub max_read_bytes: u64,
    pub max_upload_bytes: u64,
    pub max_connections: usize,
    pub allowed_origins: Vec<String>,
}

impl ServerConfig {
    /// Defaults for everything but the root and the token.
    pub fn new(root: Root, token: AccessToken) -> Self {
        Self {
            root,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            port_attempts: DEFAULT_PORT_ATTEMPTS,
            token,
            token_generated: false,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            replay_lines: wb_tail::DEFAULT_REPLAY_LINES,
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            allowed_origins: Vec::new(),
        }
    }

    /// Merge CLI flags over the file config over defaults.
    pub fn from_sources(opts: ServeOpts, file: FileConfig) -> anyhow::Result<Self> {
        let root_path = match opts.root.or(file.root) {
            Some(path) => path,
            None => std::env::current_dir().context("resolving current directory")?,
        };
        let root = Root::new(&root_path)?;

        let (token, token_generated) = match opts.token.or(file.token) {
            Some(token) => (AccessToken::new(token)?, false),
            None => (AccessToken::new(generate_token())?, true),
        };

        let mut config = Self::new(root, token);
        config.token_generated = token_generated;
        if let Some(host) = opts.host.or(file.host) {
            config.host = host;
        }
        if let Some(port) = opts.port.or(file.port) {
            config.port = port;
        }
        if let Some(attempts) = file.port_attempts {
            config.port_attempts = attempts.max(1);
        }
        if let Some(ms) = opts.poll_interval_ms.or(file.poll_interval_ms) {
            anyhow::ensure!(ms > 0, "poll interval must be positive");
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(lines) = opts.replay_lines.or(file.replay_lines) {
            config.replay_lines = lines;
        }
        if let Some(bytes) = file.max_read_bytes {
            config.max_read_bytes = bytes;
        }
        if let Some(bytes) = file.max_upload_bytes {
            config.max_upload_bytes = bytes;
        }
        if let Some(max) = file.max_connections {
            config.max_connections = max.max(1);
        }
        config.allowed_origins = file.allowed_origins;
        Ok(config)
    }
}

pub fn generate_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_TOKEN_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_file_config() {
        let file = FileConfig::parse(
            r#"
            root = "/srv/files"
            port = 9100
            token = "abc"
            poll_interval_ms = 250
            allowed_origins = ["https://files.example.com"]
            "#,
        )
        .expect("test");
        assert_eq!(file.root.as_deref(), Some(Path::new("/srv/files")));
        assert_eq!(file.port, Some(9100));
        assert_eq!(file.poll_interval_ms, Some(250));
        assert_eq!(file.allowed_origins, vec!["https://files.example.com"]);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(FileConfig::parse("rooot = \"/tmp\"").is_err());
    }

    #[test]
    fn cli_overrides_file_and_defaults_fill_the_rest() {
        let dir = tempfile::tempdir().expect("test");
        let opts = ServeOpts {
            root: Some(dir.path().to_path_buf()),
            port: Some(9001),
            token: Some("from-cli".into()),
            ..Default::default()
        };
        let file = FileConfig {
            port: Some(7000),
            token: Some("from-file".into()),
            replay_lines: Some(20),
            ..Default::default()
        };
        let config = ServerConfig::from_sources(opts, file).expect("test");
        assert_eq!(config.port, 9001);
        assert_eq!(config.token.expose(), "from-cli");
        assert!(!config.token_generated);
        assert_eq!(config.replay_lines, 20);
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.poll_interval, Duration::from_millis(DEFAULT_POLL_INTERVAL_MS));
    }

    #[test]
    fn missing_token_is_generated() {
        let dir = tempfile::tempdir().expect("test");
        let opts = ServeOpts {
            root: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let config = ServerConfig::from_sources(opts, FileConfig::default()).expect("test");
        assert!(config.token_generated);
        assert_eq!(config.token.expose().len(), GENERATED_TOKEN_LEN);
        assert!(config.token.expose().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn invalid_root_and_zero_interval_fail() {
        let dir = tempfile::tempdir().expect("test");
        let bad_root = ServeOpts {
            root: Some(dir.path().join("missing")),
            token: Some("t".into()),
            ..Default::default()
        };
        assert!(ServerConfig::from_sources(bad_root, FileConfig::default()).is_err());

        let zero = ServeOpts {
            root: Some(dir.path().to_path_buf()),
            token: Some("t".into()),
            poll_interval_ms: Some(0),
            ..Default::default()
        };
        assert!(ServerConfig::from_sources(zero, FileConfig::default()).is_err());
    }
}
