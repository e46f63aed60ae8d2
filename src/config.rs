//! Bridge configuration.
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. A TOML (or `.json`) file passed with `--config`
//! 3. `CHATKIT_*` environment variables
//! 4. Command line flags

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::Path;

use chatkit_messenger::{ConfigError, MessengerConfig};
use chatkit_protocol::{FrameParams, Profile};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// Configuration for an in-process host/frame pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Origin of the embedding page.
    #[serde(default = "default_host_origin")]
    pub host_origin: String,

    /// Origin the ChatKit frame is served from.
    #[serde(default = "default_frame_origin")]
    pub frame_origin: String,

    /// Capability profile the frame runs under.
    #[serde(default)]
    pub profile: Profile,

    /// Base for relative URLs in proxied requests.
    #[serde(default)]
    pub base_url: Option<Url>,

    /// Shared messenger settings. `target_origin` is set per side.
    #[serde(default)]
    pub messenger: MessengerConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host_origin: default_host_origin(),
            frame_origin: default_frame_origin(),
            profile: Profile::default(),
            base_url: None,
            messenger: MessengerConfig::default(),
        }
    }
}

impl BridgeConfig {
    #[must_use]
    pub const fn profile(mut self, profile: Profile) -> Self {
        self.profile = profile;
        self
    }

    #[must_use]
    pub fn base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    #[must_use]
    pub fn messenger(mut self, messenger: MessengerConfig) -> Self {
        self.messenger = messenger;
        self
    }

    /// Parameters for the frame URL, with this host as the referrer.
    #[must_use]
    pub fn frame_params(&self, options: Value) -> FrameParams {
        FrameParams {
            options,
            referrer: self.host_origin.clone(),
            profile: self.profile,
        }
    }

    /// Load from `path`, or defaults when `None`, then apply the environment.
    ///
    /// # Errors
    /// Returns the first [`ConfigError`] from the file or the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = path.map_or_else(|| Ok(Self::default()), Self::from_file)?;
        config.with_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from a file, JSON by extension and TOML otherwise.
    ///
    /// # Errors
    /// Returns [`ConfigError::Io`] if the file cannot be read and
    /// [`ConfigError::Parse`] if it does not parse.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content).map_err(|e| ConfigError::parse(e.to_string()))
        } else {
            toml::from_str(&content)
                .map_err(|e| ConfigError::parse(format!("Failed to parse config: {e}")))
        }
    }

    /// Override fields from `CHATKIT_HOST_ORIGIN`, `CHATKIT_FRAME_ORIGIN`,
    /// `CHATKIT_PROFILE` and `CHATKIT_BASE_URL`, plus the messenger variables
    /// read by [`MessengerConfig::from_lookup`].
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] for a variable that does not parse.
    pub fn with_lookup<L>(mut self, lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        if let Some(origin) = lookup("CHATKIT_HOST_ORIGIN") {
            self.host_origin = origin;
        }
        if let Some(origin) = lookup("CHATKIT_FRAME_ORIGIN") {
            self.frame_origin = origin;
        }
        if let Some(profile) = lookup("CHATKIT_PROFILE") {
            self.profile = profile
                .trim()
                .parse()
                .map_err(|e: chatkit_protocol::ProtocolError| {
                    ConfigError::invalid("CHATKIT_PROFILE", e.to_string())
                })?;
        }
        if let Some(base_url) = lookup("CHATKIT_BASE_URL") {
            self.base_url = Some(
                Url::parse(base_url.trim())
                    .map_err(|e| ConfigError::invalid("CHATKIT_BASE_URL", e.to_string()))?,
            );
        }

        let env = MessengerConfig::from_lookup(&lookup)?;
        let defaults = MessengerConfig::default();
        if env.retry.base_delay != defaults.retry.base_delay {
            self.messenger.retry.base_delay = env.retry.base_delay;
        }
        if env.retry.max_delay != defaults.retry.max_delay {
            self.messenger.retry.max_delay = env.retry.max_delay;
        }
        if env.retry.max_attempts != defaults.retry.max_attempts {
            self.messenger.retry.max_attempts = env.retry.max_attempts;
        }
        if env.request_timeout.is_some() {
            self.messenger.request_timeout = env.request_timeout;
        }

        Ok(self)
    }
}

fn default_host_origin() -> String {
    "http://localhost:3000".to_string()
}

fn default_frame_origin() -> String {
    "https://cdn.platform.openai.com".to_string()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use std::collections::HashMap;
    use std::io::Write;
    use std::time::Duration;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.host_origin, "http://localhost:3000");
        assert_eq!(config.profile, Profile::default());
        assert!(config.base_url.is_none());
    }

    #[test]
    fn test_frame_params_use_host_origin_as_referrer() {
        let params = BridgeConfig::default().frame_params(serde_json::json!({ "theme": "dark" }));
        assert_eq!(params.referrer, "http://localhost:3000");
        assert_eq!(params.options["theme"], "dark");
    }

    #[test]
    fn test_toml_file_with_nested_messenger_table() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
host_origin = "https://app.example"
base_url = "https://api.example/v1/"

[messenger]
request_timeout_ms = 2500

[messenger.retry]
max_attempts = 2
"#
        )
        .unwrap();

        let config = BridgeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.host_origin, "https://app.example");
        assert_eq!(config.frame_origin, default_frame_origin());
        assert_eq!(
            config.base_url.as_ref().map(Url::as_str),
            Some("https://api.example/v1/")
        );
        assert_eq!(config.messenger.request_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.messenger.retry.max_attempts, 2);
    }

    #[test]
    fn test_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{ "frame_origin": "https://frame.example" }}"#).unwrap();

        let config = BridgeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.frame_origin, "https://frame.example");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = BridgeConfig::from_file(Path::new("/nonexistent/bridge.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_environment_overrides_file_values() {
        let config = BridgeConfig::default()
            .with_lookup(lookup(&[
                ("CHATKIT_FRAME_ORIGIN", "https://frame.example"),
                ("CHATKIT_BASE_URL", "https://api.example/"),
                ("CHATKIT_RETRY_ATTEMPTS", "1"),
                ("CHATKIT_REQUEST_TIMEOUT_MS", "100"),
            ]))
            .unwrap();

        assert_eq!(config.frame_origin, "https://frame.example");
        assert_eq!(config.base_url.unwrap().as_str(), "https://api.example/");
        assert_eq!(config.messenger.retry.max_attempts, 1);
        assert_eq!(config.messenger.request_timeout, Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_invalid_environment_values_name_the_variable() {
        let error = BridgeConfig::default()
            .with_lookup(lookup(&[("CHATKIT_BASE_URL", "not a url")]))
            .unwrap_err();
        assert!(matches!(error, ConfigError::Invalid { ref field, .. } if field == "CHATKIT_BASE_URL"));

        let error = BridgeConfig::default()
            .with_lookup(lookup(&[("CHATKIT_PROFILE", "enterprise")]))
            .unwrap_err();
        assert!(matches!(error, ConfigError::Invalid { ref field, .. } if field == "CHATKIT_PROFILE"));
    }
}
