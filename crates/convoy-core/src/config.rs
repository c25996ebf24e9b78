//! Configuration management for convoy.
//!
//! Configuration is loaded from layered sources and merged, each layer
//! overriding the previous (§6):
//! 1. Built-in defaults (`Config::default()`)
//! 2. Global config: `~/.config/convoy/config.json`
//! 3. `CONVOY_CONFIG_CONTENT` environment variable (whole-file override)
//! 4. Project config: `convoy.json` or `convoy.jsonc`, discovered by
//!    walking up from the working directory
//! 5. Individual `CONVOY_*` environment variables
//!
//! A fifth, highest-precedence layer — explicit CLI flags — is applied by
//! the `convoy` binary via [`Config::merge`] after `Config::load` returns;
//! this crate only owns layers 1-5 above.
//!
//! Supports JSONC (JSON with comments) and variable substitution:
//! - `{env:VAR_NAME}` - Substitute environment variable
//! - `{file:path}` - Substitute file contents

use crate::error::{ConfigError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Static regex for variable substitution, compiled once.
static VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

/// Get the variable substitution regex, compiling it once on first use.
fn var_regex() -> &'static regex::Regex {
    VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\{(env|file):([^}]+)\}")
            .expect("Invalid regex pattern - this is a compile-time constant")
    })
}

/// Main configuration structure, covering the ambient engineering stack
/// (logging, storage) plus the operational knobs §6 lists: provider keys,
/// default model, shell path and timeouts, session idle expiry, and
/// provider retry budget.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// JSON Schema reference.
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Log level for the tracing subscriber.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,

    /// Default model in "provider/model" format, used for new Prompts
    /// unless the caller overrides it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Root directory for the JSON-document Event Store. Defaults to
    /// [`Config::data_dir`] when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Maximum retry attempts for a transient provider error before a
    /// Prompt is failed (§7).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retry_attempts: Option<u32>,

    /// Shell Session settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<ShellConfig>,

    /// Per-provider credentials and overrides, keyed by provider id
    /// (e.g. `"anthropic"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<HashMap<String, ProviderConfig>>,
}

/// Log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Shell Session Pool settings (§4.1, §5).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Shell executable a new Session is spawned with, e.g. `/bin/bash`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Per-command wall-clock timeout, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_timeout_secs: Option<u64>,

    /// How long an idle Shell Session may sit in the pool before being
    /// torn down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_idle_expiry_secs: Option<u64>,
}

impl ShellConfig {
    fn merge(mut self, other: Self) -> Self {
        self.path = merge_option(self.path, other.path);
        self.command_timeout_secs = merge_option(self.command_timeout_secs, other.command_timeout_secs);
        self.session_idle_expiry_secs =
            merge_option(self.session_idle_expiry_secs, other.session_idle_expiry_secs);
        self
    }
}

/// One provider's credentials and endpoint override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Config {
    /// Load configuration from all sources, innermost (built-in defaults)
    /// to outermost (`CONVOY_*` environment variables); CLI flags, the
    /// final layer, are the caller's responsibility.
    pub async fn load(project_dir: Option<&Path>) -> CoreResult<(Self, Vec<PathBuf>)> {
        let mut config = Config::default();
        let mut sources = Vec::new();

        if let Some(global_dir) = Self::global_config_dir() {
            for name in &["config.json", "convoy.json", "convoy.jsonc"] {
                let path = global_dir.join(name);
                if path.exists() {
                    let loaded = Self::load_file(&path).await?;
                    config = config.merge(loaded);
                    sources.push(path);
                    break;
                }
            }
        }

        if let Ok(content) = std::env::var("CONVOY_CONFIG_CONTENT") {
            let loaded = Self::parse_jsonc(&content, "<env>")?;
            config = config.merge(loaded);
        }

        if let Some(found) = Self::discover_project_config(project_dir) {
            let loaded = Self::load_file(&found).await?;
            config = config.merge(loaded);
            sources.push(found);
        }

        config = config.merge(Self::from_env());

        Ok((config, sources))
    }

    /// Walk up from `dir` looking for `convoy.jsonc`/`convoy.json`, the
    /// way most directory-scoped tool configs are discovered.
    fn discover_project_config(dir: Option<&Path>) -> Option<PathBuf> {
        let mut current = dir?;
        loop {
            for name in &["convoy.jsonc", "convoy.json"] {
                let candidate = current.join(name);
                if candidate.exists() {
                    return Some(candidate);
                }
            }
            current = current.parent()?;
        }
    }

    /// Build a partial [`Config`] from individual `CONVOY_*` environment
    /// variables, the layer above the project file and below CLI flags.
    fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(v) = std::env::var("CONVOY_MODEL") {
            config.model = Some(v);
        }
        if let Ok(v) = std::env::var("CONVOY_LOG_LEVEL") {
            config.log_level = match v.to_lowercase().as_str() {
                "debug" => Some(LogLevel::Debug),
                "info" => Some(LogLevel::Info),
                "warn" => Some(LogLevel::Warn),
                "error" => Some(LogLevel::Error),
                _ => None,
            };
        }
        if let Ok(v) = std::env::var("CONVOY_DATA_DIR") {
            config.data_dir = Some(v);
        }
        if let Ok(v) = std::env::var("CONVOY_MAX_RETRY_ATTEMPTS") {
            config.max_retry_attempts = v.parse().ok();
        }

        let mut shell = ShellConfig::default();
        if let Ok(v) = std::env::var("CONVOY_SHELL") {
            shell.path = Some(v);
        }
        if let Ok(v) = std::env::var("CONVOY_SHELL_COMMAND_TIMEOUT_SECS") {
            shell.command_timeout_secs = v.parse().ok();
        }
        if let Ok(v) = std::env::var("CONVOY_SESSION_IDLE_EXPIRY_SECS") {
            shell.session_idle_expiry_secs = v.parse().ok();
        }
        if shell.path.is_some() || shell.command_timeout_secs.is_some() || shell.session_idle_expiry_secs.is_some() {
            config.shell = Some(shell);
        }

        if let Ok(v) = std::env::var("CONVOY_ANTHROPIC_API_KEY") {
            config.provider.get_or_insert_with(HashMap::new).insert(
                "anthropic".to_string(),
                ProviderConfig {
                    api_key: Some(v),
                    base_url: None,
                },
            );
        }

        config
    }

    /// The global config directory.
    ///
    /// On Unix systems, prefers `~/.config/convoy` (XDG standard) over
    /// the platform-specific directory for better compatibility with
    /// other CLI tools.
    pub fn global_config_dir() -> Option<PathBuf> {
        #[cfg(unix)]
        {
            if let Some(home) = dirs::home_dir() {
                let xdg_config = home.join(".config").join("convoy");
                if xdg_config.exists() {
                    return Some(xdg_config);
                }
            }
        }

        dirs::config_dir().map(|d| d.join("convoy"))
    }

    /// The data directory backing the Event Store, when `data_dir` isn't
    /// set explicitly.
    pub fn data_dir() -> Option<PathBuf> {
        dirs::data_local_dir().map(|d| d.join("convoy"))
    }

    /// Load configuration from a file.
    pub async fn load_file(path: &Path) -> CoreResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let content = Self::substitute_variables(&content, path)?;
        Self::parse_jsonc(&content, &path.display().to_string())
    }

    /// Save configuration to the project config file, or the global
    /// config directory when `project_dir` is `None`.
    pub async fn save(&self, project_dir: Option<&Path>) -> CoreResult<()> {
        let path = if let Some(dir) = project_dir {
            dir.join("convoy.json")
        } else {
            let global_dir = Self::global_config_dir().ok_or_else(|| {
                ConfigError::InvalidPath("Could not determine config directory".to_string())
            })?;
            tokio::fs::create_dir_all(&global_dir).await?;
            global_dir.join("config.json")
        };

        let content = serde_json::to_string_pretty(self).map_err(|e| ConfigError::InvalidJson {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        tokio::fs::write(&path, content).await?;
        tracing::info!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Load existing config at `project_dir`'s path (if any), merge `self`
    /// on top, and save — for partial updates that shouldn't clobber
    /// unrelated fields.
    pub async fn save_partial(&self, project_dir: Option<&Path>) -> CoreResult<()> {
        let path = if let Some(dir) = project_dir {
            dir.join("convoy.json")
        } else {
            let global_dir = Self::global_config_dir().ok_or_else(|| {
                ConfigError::InvalidPath("Could not determine config directory".to_string())
            })?;
            tokio::fs::create_dir_all(&global_dir).await?;
            global_dir.join("config.json")
        };

        let existing = if path.exists() {
            Self::load_file(&path).await.unwrap_or_default()
        } else {
            Config::default()
        };

        let merged = existing.merge(self.clone());

        let content = serde_json::to_string_pretty(&merged).map_err(|e| ConfigError::InvalidJson {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        tokio::fs::write(&path, content).await?;
        tracing::info!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Parse JSONC (JSON with comments).
    fn parse_jsonc(content: &str, source: &str) -> CoreResult<Self> {
        let stripped = Self::strip_comments(content);

        serde_json::from_str(&stripped).map_err(|e| {
            ConfigError::InvalidJson {
                path: source.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Strip JSON comments.
    fn strip_comments(input: &str) -> String {
        let mut result = String::with_capacity(input.len());
        let mut chars = input.chars().peekable();
        let mut in_string = false;
        let mut escape_next = false;

        while let Some(c) = chars.next() {
            if escape_next {
                result.push(c);
                escape_next = false;
                continue;
            }

            if c == '\\' && in_string {
                result.push(c);
                escape_next = true;
                continue;
            }

            if c == '"' {
                in_string = !in_string;
                result.push(c);
                continue;
            }

            if in_string {
                result.push(c);
                continue;
            }

            if c == '/' {
                if let Some(&next) = chars.peek() {
                    if next == '/' {
                        chars.next();
                        for c in chars.by_ref() {
                            if c == '\n' {
                                result.push('\n');
                                break;
                            }
                        }
                        continue;
                    } else if next == '*' {
                        chars.next();
                        let mut prev = ' ';
                        for c in chars.by_ref() {
                            if prev == '*' && c == '/' {
                                break;
                            }
                            if c == '\n' {
                                result.push('\n');
                            }
                            prev = c;
                        }
                        continue;
                    }
                }
            }

            result.push(c);
        }

        result
    }

    /// Substitute variables in config content.
    ///
    /// Supports:
    /// - `{env:VAR_NAME}` - Environment variable
    /// - `{file:path}` - File contents (relative to config file)
    fn substitute_variables(content: &str, config_path: &Path) -> CoreResult<String> {
        let re = var_regex();
        let config_dir = config_path.parent().unwrap_or(Path::new("."));

        let mut result = content.to_string();
        let mut last_error: Option<ConfigError> = None;

        for cap in re.captures_iter(content) {
            let Some(full_match) = cap.get(0).map(|m| m.as_str()) else {
                continue;
            };
            let Some(kind) = cap.get(1).map(|m| m.as_str()) else {
                continue;
            };
            let Some(value) = cap.get(2).map(|m| m.as_str()) else {
                continue;
            };

            let replacement = match kind {
                "env" => match std::env::var(value) {
                    Ok(v) => v,
                    Err(_) => {
                        last_error = Some(ConfigError::EnvVarNotFound {
                            name: value.to_string(),
                        });
                        continue;
                    }
                },
                "file" => {
                    let file_path = config_dir.join(value);
                    match std::fs::read_to_string(&file_path) {
                        Ok(v) => v.trim().to_string(),
                        Err(_) => {
                            last_error = Some(ConfigError::FileRefNotFound {
                                path: file_path.display().to_string(),
                            });
                            continue;
                        }
                    }
                }
                _ => continue,
            };

            result = result.replace(full_match, &replacement);
        }

        if let Some(e) = last_error {
            return Err(e.into());
        }

        Ok(result)
    }

    /// Merge another config into this one (`other` takes precedence).
    pub fn merge(mut self, other: Self) -> Self {
        if other.schema.is_some() {
            self.schema = other.schema;
        }
        if other.log_level.is_some() {
            self.log_level = other.log_level;
        }
        if other.model.is_some() {
            self.model = other.model;
        }
        if other.data_dir.is_some() {
            self.data_dir = other.data_dir;
        }
        if other.max_retry_attempts.is_some() {
            self.max_retry_attempts = other.max_retry_attempts;
        }

        self.shell = match (self.shell, other.shell) {
            (Some(base), Some(other)) => Some(base.merge(other)),
            (base, None) => base,
            (None, other) => other,
        };

        self.provider = merge_hashmap(self.provider, other.provider);

        self
    }

    /// Split a "provider/model" id into its parts.
    pub fn parse_model(model: &str) -> Option<(&str, &str)> {
        model.split_once('/')
    }
}

/// Merge two Option values, `other` winning when present.
fn merge_option<T>(base: Option<T>, other: Option<T>) -> Option<T> {
    match (base, other) {
        (_, Some(o)) => Some(o),
        (b, None) => b,
    }
}

/// Merge two HashMaps, `other`'s entries overwriting `base`'s on key
/// collision.
fn merge_hashmap<K: std::hash::Hash + Eq, V>(
    base: Option<HashMap<K, V>>,
    other: Option<HashMap<K, V>>,
) -> Option<HashMap<K, V>> {
    match (base, other) {
        (Some(mut b), Some(o)) => {
            b.extend(o);
            Some(b)
        }
        (b, None) => b,
        (None, o) => o,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_comments() {
        let input = r#"{
            // Line comment
            "key": "value", // trailing comment
            /* block comment */
            "key2": "val/*not a comment*/ue"
        }"#;

        let result = Config::strip_comments(input);
        assert!(!result.contains("Line comment"));
        assert!(!result.contains("trailing comment"));
        assert!(!result.contains("block comment"));
        assert!(result.contains("val/*not a comment*/ue"));
    }

    #[test]
    fn test_parse_jsonc() {
        let input = r#"{
            // This is a comment
            "model": "anthropic/claude-sonnet-4-5",
            "log_level": "debug"
        }"#;

        let config = Config::parse_jsonc(input, "test").unwrap();
        assert_eq!(config.model, Some("anthropic/claude-sonnet-4-5".to_string()));
        assert_eq!(config.log_level, Some(LogLevel::Debug));
    }

    #[test]
    fn test_merge_config() {
        let base = Config {
            model: Some("anthropic/claude-3-5-sonnet".to_string()),
            max_retry_attempts: Some(3),
            ..Default::default()
        };

        let other = Config {
            log_level: Some(LogLevel::Warn),
            ..Default::default()
        };

        let merged = base.merge(other);
        assert_eq!(merged.model, Some("anthropic/claude-3-5-sonnet".to_string()));
        assert_eq!(merged.max_retry_attempts, Some(3));
        assert_eq!(merged.log_level, Some(LogLevel::Warn));
    }

    #[test]
    fn test_merge_shell_config_is_field_wise() {
        let base = Config {
            shell: Some(ShellConfig {
                path: Some("/bin/bash".to_string()),
                command_timeout_secs: Some(30),
                session_idle_expiry_secs: None,
            }),
            ..Default::default()
        };
        let other = Config {
            shell: Some(ShellConfig {
                path: None,
                command_timeout_secs: Some(60),
                session_idle_expiry_secs: Some(300),
            }),
            ..Default::default()
        };

        let merged = base.merge(other).shell.unwrap();
        assert_eq!(merged.path, Some("/bin/bash".to_string())); // preserved
        assert_eq!(merged.command_timeout_secs, Some(60)); // overwritten
        assert_eq!(merged.session_idle_expiry_secs, Some(300)); // added
    }

    #[test]
    fn test_parse_model() {
        assert_eq!(
            Config::parse_model("anthropic/claude-3-5-sonnet"),
            Some(("anthropic", "claude-3-5-sonnet"))
        );
        assert_eq!(Config::parse_model("invalid"), None);
    }

    #[tokio::test]
    async fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();

        let config = Config {
            model: Some("anthropic/claude-3-5-sonnet".to_string()),
            max_retry_attempts: Some(5),
            ..Default::default()
        };

        config.save(Some(dir.path())).await.unwrap();

        let config_path = dir.path().join("convoy.json");
        assert!(config_path.exists());

        let loaded = Config::load_file(&config_path).await.unwrap();
        assert_eq!(loaded.model, Some("anthropic/claude-3-5-sonnet".to_string()));
        assert_eq!(loaded.max_retry_attempts, Some(5));
    }

    #[tokio::test]
    async fn test_config_save_partial() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("convoy.json");

        let initial = Config {
            model: Some("openai/gpt-4".to_string()),
            log_level: Some(LogLevel::Info),
            ..Default::default()
        };
        initial.save(Some(dir.path())).await.unwrap();

        let update = Config {
            log_level: Some(LogLevel::Debug),
            ..Default::default()
        };
        update.save_partial(Some(dir.path())).await.unwrap();

        let loaded = Config::load_file(&config_path).await.unwrap();
        assert_eq!(loaded.model, Some("openai/gpt-4".to_string())); // preserved
        assert_eq!(loaded.log_level, Some(LogLevel::Debug)); // updated
    }

    #[test]
    fn test_discover_project_config_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("convoy.json"), r#"{"model": "anthropic/claude-sonnet-4-5"}"#).unwrap();

        let found = Config::discover_project_config(Some(&nested)).unwrap();
        assert_eq!(found, dir.path().join("convoy.json"));
    }

    #[test]
    fn test_substitute_env_var() {
        std::env::set_var("CONVOY_TEST_VAR", "secret-value");
        let content = r#"{"provider": {"anthropic": {"api_key": "{env:CONVOY_TEST_VAR}"}}}"#;
        let substituted = Config::substitute_variables(content, Path::new("convoy.json")).unwrap();
        assert!(substituted.contains("secret-value"));
        std::env::remove_var("CONVOY_TEST_VAR");
    }
}
