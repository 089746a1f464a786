//! Configuration — YAML file plus environment overrides.
//!
//! ```yaml
//! request_timeout_secs: 30
//! socket_path: /tmp/relayprobe.sock
//! targets:
//!   - name: Gemini relay
//!     protocol: google
//!     base_url: https://relay.example.com
//!     model: gemini-1.5-flash
//!     keys_file: keys/gemini.txt
//!   - name: OpenAI
//!     protocol: openai
//!     model: gpt-4o-mini
//!     keys:
//!       - sk-...
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adapters::{Protocol, DEFAULT_REQUEST_TIMEOUT};
use crate::queue::TargetConfig;

pub const CONFIG_FILE_NAME: &str = "relayprobe.yaml";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    request_timeout_secs: Option<u64>,
    socket_path: Option<PathBuf>,
    targets: Vec<TargetEntry>,
}

#[derive(Debug, Deserialize)]
struct TargetEntry {
    name: String,
    protocol: Protocol,
    #[serde(default)]
    base_url: Option<String>,
    model: String,
    #[serde(default)]
    keys: Vec<String>,
    #[serde(default)]
    keys_file: Option<PathBuf>,
}

/// A target as loaded from config: name, probe config, raw key text.
#[derive(Debug, Clone)]
pub struct TargetSeed {
    pub name: String,
    pub config: TargetConfig,
    pub keys_text: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub socket_path: PathBuf,
    pub request_timeout: Duration,
    pub targets: Vec<TargetSeed>,
}

impl Config {
    /// Defaults rooted at `~/.relayprobe`.
    pub fn defaults() -> Result<Self> {
        let home = dirs::home_dir().context("Cannot determine home directory")?;
        Ok(Self::rooted_at(home.join(".relayprobe")))
    }

    fn rooted_at(data_dir: PathBuf) -> Self {
        Self {
            socket_path: data_dir.join("relayprobe.sock"),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            targets: Vec::new(),
            data_dir,
        }
    }

    /// Load from `path`, or from `~/.relayprobe/relayprobe.yaml` when it
    /// exists, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::defaults()?;
        let file = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Some(config.data_dir.join(CONFIG_FILE_NAME)).filter(|p| p.exists()),
        };
        if let Some(file) = file {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read config {}", file.display()))?;
            let base_dir = file.parent().unwrap_or_else(|| Path::new("."));
            config
                .merge_yaml(&text, base_dir)
                .with_context(|| format!("Invalid config {}", file.display()))?;
        }
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Merge a YAML document. Relative `keys_file` paths resolve against
    /// `base_dir`.
    fn merge_yaml(&mut self, text: &str, base_dir: &Path) -> Result<()> {
        let file: FileConfig = serde_yaml::from_str(text)?;
        if let Some(secs) = file.request_timeout_secs {
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(socket) = file.socket_path {
            self.socket_path = socket;
        }
        for entry in file.targets {
            let mut keys_text = entry.keys.join("\n");
            if let Some(keys_file) = &entry.keys_file {
                let path = base_dir.join(keys_file);
                let from_file = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read keys file {}", path.display()))?;
                if !keys_text.is_empty() {
                    keys_text.push('\n');
                }
                keys_text.push_str(&from_file);
            }
            self.targets.push(TargetSeed {
                name: entry.name,
                config: TargetConfig::new(entry.protocol, entry.base_url, entry.model),
                keys_text,
            });
        }
        Ok(())
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(socket) = var("RELAYPROBE_SOCKET").filter(|s| !s.is_empty()) {
            self.socket_path = PathBuf::from(socket);
        }
        if let Some(secs) = var("RELAYPROBE_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .with_context(|| format!("RELAYPROBE_TIMEOUT_SECS is not a number: '{}'", secs))?;
            self.request_timeout = Duration::from_secs(secs);
        }
        Ok(())
    }

    pub fn seeds(&self) -> Vec<(String, TargetConfig, String)> {
        self.targets
            .iter()
            .map(|t| (t.name.clone(), t.config.clone(), t.keys_text.clone()))
            .collect()
    }

    pub fn target(&self, name: &str) -> Option<&TargetSeed> {
        self.targets.iter().find(|t| t.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config::rooted_at(PathBuf::from("/tmp/relayprobe-test"))
    }

    #[test]
    fn test_defaults() {
        let cfg = base();
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert_eq!(cfg.socket_path, PathBuf::from("/tmp/relayprobe-test/relayprobe.sock"));
        assert!(cfg.targets.is_empty());
    }

    #[test]
    fn test_yaml_targets_and_keys_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keys.txt"), "AIzaFromFile1\n\nAIzaFromFile2\n").unwrap();

        let yaml = r#"
request_timeout_secs: 5
targets:
  - name: Gemini relay
    protocol: google
    base_url: "https://relay.example.com/"
    model: gemini-1.5-flash
    keys: [AIzaInline1]
    keys_file: keys.txt
  - name: OpenAI
    protocol: OPENAI
    base_url: ""
    model: gpt-4o-mini
"#;
        let mut cfg = base();
        cfg.merge_yaml(yaml, dir.path()).unwrap();

        assert_eq!(cfg.request_timeout, Duration::from_secs(5));
        assert_eq!(cfg.targets.len(), 2);

        let relay = cfg.target("Gemini relay").unwrap();
        assert_eq!(relay.config.protocol, Protocol::Google);
        assert_eq!(relay.config.base_url.as_deref(), Some("https://relay.example.com/"));
        let keys = crate::queue::parse_credentials(&relay.keys_text);
        assert_eq!(keys.len(), 3);
        assert_eq!(keys[0].expose(), "AIzaInline1");

        let openai = cfg.target("OpenAI").unwrap();
        assert_eq!(openai.config.protocol, Protocol::OpenAiCompatible);
        assert_eq!(openai.config.base_url, None);
        assert!(openai.keys_text.is_empty());
    }

    #[test]
    fn test_missing_keys_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = "targets:\n  - {name: t, protocol: google, model: m, keys_file: nope.txt}\n";
        let mut cfg = base();
        let err = cfg.merge_yaml(yaml, dir.path()).unwrap_err();
        assert!(err.to_string().contains("nope.txt"));
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = base();
        cfg.apply_env(|name| match name {
            "RELAYPROBE_SOCKET" => Some("/run/rp.sock".into()),
            "RELAYPROBE_TIMEOUT_SECS" => Some(" 12 ".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.socket_path, PathBuf::from("/run/rp.sock"));
        assert_eq!(cfg.request_timeout, Duration::from_secs(12));

        let bad = cfg.apply_env(|name| (name == "RELAYPROBE_TIMEOUT_SECS").then(|| "soon".into()));
        assert!(bad.is_err());
    }
}
