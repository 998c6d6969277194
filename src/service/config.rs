use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration
};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{Level, event};

use crate::domain::{constant::session, context::AgentContext, error::FlowError};

pub const DEFAULT_VERITY_URL: &str = "http://localhost:9000";
pub const DEFAULT_LISTENING_PORT: u16 = 4000;
pub const DEFAULT_REPLY_TIMEOUT_SECS: u64 = 30;
pub const CONTEXT_FILE_NAME: &str = "verity-context.json";
pub const SETTINGS_FILE_NAME: &str = "settings.yaml";

/// Settings as written in the YAML settings file. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct SettingsFile {
    verity_url:         Option<String>,
    listening_port:     Option<u16>,
    reply_timeout_secs: Option<u64>,
    context_path:       Option<PathBuf>
}

/// Application configuration for the agent runtime
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Base configuration directory
    pub config_dir:     PathBuf,
    /// Where the agent context is persisted between runs
    pub context_path:   PathBuf,
    /// Remote agent base URL used when creating a new context
    pub verity_url:     String,
    /// Port the webhook listens on
    pub listening_port: u16,
    /// Deadline applied to every awaited reply
    pub reply_timeout:  Duration
}

impl AppConfig {
    /// Load settings from the default configuration directory
    pub fn init() -> Result<Self, FlowError> {
        let project_dirs = ProjectDirs::from("com", "evernym", "verity-flow")
            .ok_or_else(|| FlowError::Configuration("unable to determine configuration directory".to_string()))?;

        Self::load_from_dir(project_dirs.config_dir())
    }

    /// Load settings from `config_dir`; a missing settings file yields defaults
    pub fn load_from_dir(config_dir: &Path) -> Result<Self, FlowError> {
        let settings_path = config_dir.join(SETTINGS_FILE_NAME);

        let settings = if settings_path.exists() {
            let content = fs::read_to_string(&settings_path).map_err(|e| {
                FlowError::FileSystem(format!("Failed to read settings {}: {}", settings_path.display(), e))
            })?;
            serde_yaml::from_str::<SettingsFile>(&content)?
        } else {
            SettingsFile::default()
        };

        Ok(Self::from_settings(config_dir.to_path_buf(), settings))
    }

    fn from_settings(config_dir: PathBuf, settings: SettingsFile) -> Self {
        let context_path = match settings.context_path {
            Some(path) if path.is_relative() => config_dir.join(path),
            Some(path) => path,
            None => config_dir.join(CONTEXT_FILE_NAME)
        };

        Self {
            context_path,
            config_dir,
            verity_url: settings.verity_url.unwrap_or_else(|| DEFAULT_VERITY_URL.to_string()),
            listening_port: settings.listening_port.unwrap_or(DEFAULT_LISTENING_PORT),
            reply_timeout: Duration::from_secs(settings.reply_timeout_secs.unwrap_or(DEFAULT_REPLY_TIMEOUT_SECS))
        }
    }

    /// Write the current settings to the settings file
    pub fn save(&self) -> Result<(), FlowError> {
        fs::create_dir_all(&self.config_dir).map_err(|e| FlowError::FileSystem(e.to_string()))?;

        let settings = SettingsFile {
            verity_url:         Some(self.verity_url.clone()),
            listening_port:     Some(self.listening_port),
            reply_timeout_secs: Some(self.reply_timeout.as_secs()),
            context_path:       Some(self.context_path.clone())
        };
        fs::write(self.config_dir.join(SETTINGS_FILE_NAME), serde_yaml::to_string(&settings)?)
            .map_err(|e| FlowError::FileSystem(format!("Failed to write settings: {}", e)))?;
        Ok(())
    }

    /// Default webhook URL when the context does not carry one
    pub fn default_endpoint_url(&self) -> String {
        format!("http://localhost:{}", self.listening_port)
    }

    pub fn load_context(&self) -> Result<Option<AgentContext>, FlowError> {
        load_context(&self.context_path)
    }

    pub fn save_context(&self, context: &AgentContext) -> Result<(), FlowError> {
        save_context(&self.context_path, context)
    }

    /// Reuse the persisted context, or create and persist a fresh one
    pub fn reuse_or_create_context(&self, reuse: bool) -> Result<AgentContext, FlowError> {
        if reuse {
            if let Some(context) = self.load_context()? {
                return Ok(context);
            }
        }

        let context = AgentContext::new(self.verity_url.clone()).with_endpoint_url(self.default_endpoint_url());
        self.save_context(&context)?;
        Ok(context)
    }
}

/// Read a persisted context; `None` when the file does not exist
pub fn load_context(path: &Path) -> Result<Option<AgentContext>, FlowError> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)
        .map_err(|e| FlowError::FileSystem(format!("Failed to read context {}: {}", path.display(), e)))?;
    let context: AgentContext = serde_json::from_str(&content)?;

    event!(Level::DEBUG, event = session::CONTEXT_LOADED, path = %path.display(), session_id = %context.session_id);
    Ok(Some(context))
}

pub fn save_context(path: &Path, context: &AgentContext) -> Result<(), FlowError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| FlowError::FileSystem(e.to_string()))?;
    }

    fs::write(path, serde_json::to_string_pretty(context)?)
        .map_err(|e| FlowError::FileSystem(format!("Failed to write context {}: {}", path.display(), e)))?;

    event!(Level::DEBUG, event = session::CONTEXT_SAVED, path = %path.display(), session_id = %context.session_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_missing_settings_yield_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load_from_dir(dir.path()).unwrap();

        assert_eq!(config.verity_url, DEFAULT_VERITY_URL);
        assert_eq!(config.listening_port, DEFAULT_LISTENING_PORT);
        assert_eq!(config.reply_timeout, Duration::from_secs(DEFAULT_REPLY_TIMEOUT_SECS));
        assert_eq!(config.context_path, dir.path().join(CONTEXT_FILE_NAME));
        assert_eq!(config.default_endpoint_url(), "http://localhost:4000");
    }

    #[test]
    fn test_settings_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(SETTINGS_FILE_NAME),
            "verity_url: https://vas.example.com\nreply_timeout_secs: 5\ncontext_path: ctx.json\n"
        )
        .unwrap();

        let config = AppConfig::load_from_dir(dir.path()).unwrap();

        assert_eq!(config.verity_url, "https://vas.example.com");
        assert_eq!(config.listening_port, DEFAULT_LISTENING_PORT);
        assert_eq!(config.reply_timeout, Duration::from_secs(5));
        assert_eq!(config.context_path, dir.path().join("ctx.json"));
    }

    #[test]
    fn test_save_then_load_settings() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::load_from_dir(dir.path()).unwrap();
        config.listening_port = 4100;
        config.save().unwrap();

        assert_eq!(AppConfig::load_from_dir(dir.path()).unwrap().listening_port, 4100);
    }

    #[test]
    fn test_malformed_settings_are_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(SETTINGS_FILE_NAME), "listening_port: [not, a, port]\n").unwrap();

        assert!(matches!(AppConfig::load_from_dir(dir.path()), Err(FlowError::Serialization(_))));
    }

    #[test]
    fn test_context_is_reused_only_when_asked() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load_from_dir(dir.path()).unwrap();
        assert!(config.load_context().unwrap().is_none());

        let created = config.reuse_or_create_context(true).unwrap();
        assert_eq!(created.endpoint_url.as_deref(), Some("http://localhost:4000"));

        let reused = config.reuse_or_create_context(true).unwrap();
        assert_eq!(reused, created);

        let fresh = config.reuse_or_create_context(false).unwrap();
        assert_ne!(fresh.session_id, created.session_id);
        assert_eq!(config.load_context().unwrap().unwrap(), fresh);
    }

    #[test]
    fn test_context_json_uses_camel_case_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONTEXT_FILE_NAME);
        save_context(&path, &AgentContext::new(DEFAULT_VERITY_URL).with_domain_did("did:sov:abc")).unwrap();

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["verityUrl"], DEFAULT_VERITY_URL);
        assert_eq!(raw["domainDID"], "did:sov:abc");
    }
}
