//! Configuration loading, environment overrides and validation.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::frame::DEFAULT_JPEG_QUALITY;
use crate::registry::DEFAULT_MAX_SESSIONS;

/// Top-level lcm-live configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions: Option<SessionsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub render: Option<RenderConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Directory of static files (the browser client) served at `/`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<String>,

    /// Seconds a new connection may take to send its parameter message.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: None,
            static_dir: None,
            handshake_timeout_secs: default_handshake_timeout(),
        }
    }
}

fn default_port() -> u16 {
    7860
}

fn default_handshake_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Global cap on concurrent sessions (default: 4).
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Session lifetime in seconds; 0 disables the timeout.
    #[serde(default)]
    pub timeout_secs: f64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            timeout_secs: 0.0,
        }
    }
}

fn default_max_sessions() -> usize {
    DEFAULT_MAX_SESSIONS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Upper bound on emitted frames per second (default: 120).
    #[serde(default = "default_max_fps")]
    pub max_fps: f64,

    /// JPEG quality of output frames, 1-100 (default: 85).
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_fps: default_max_fps(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

fn default_max_fps() -> f64 {
    120.0
}

fn default_jpeg_quality() -> u8 {
    DEFAULT_JPEG_QUALITY
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    /// Return input frames unchanged. Useful without a model server.
    #[default]
    Passthrough,
    /// Forward frames to an HTTP inference server.
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub kind: PipelineKind,

    /// Inference endpoint for the remote pipeline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Per-frame request timeout in ms (default: 10000).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Enable the model's content-safety filter.
    #[serde(default)]
    pub safety_checker: bool,

    /// Denoising steps requested from the model (default: 4).
    #[serde(default = "default_inference_steps")]
    pub num_inference_steps: u32,

    /// Resize input frames to this width before transforming.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,

    /// Resize input frames to this height before transforming.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            kind: PipelineKind::default(),
            url: None,
            api_key: None,
            api_key_env: None,
            request_timeout_ms: default_request_timeout(),
            safety_checker: false,
            num_inference_steps: default_inference_steps(),
            width: None,
            height: None,
        }
    }
}

impl PipelineConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }

    /// Target frame size, if both dimensions are configured.
    pub fn frame_size(&self) -> Option<(u32, u32)> {
        self.width.zip(self.height)
    }
}

fn default_request_timeout() -> u64 {
    10_000
}

fn default_inference_steps() -> u32 {
    4
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-target log level overrides (e.g. "lcm_live_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

static ENV_REF: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex"));

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    ENV_REF
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::LcmError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file location.
    pub fn config_dir() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Apply `MAX_SESSIONS`, `TIMEOUT`, `SAFETY_CHECKER` and `PORT` from the
    /// process environment.
    pub fn apply_env_overrides(&mut self) {
        for warning in self.apply_overrides(|key| std::env::var(key).ok()) {
            warn!("{warning}");
        }
    }

    /// Apply overrides from an arbitrary key lookup. Returns a warning for
    /// every value that could not be parsed; such values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();

        if let Some(raw) = lookup("MAX_SESSIONS") {
            match raw.trim().parse::<usize>() {
                Ok(n) => self.sessions.get_or_insert_with(Default::default).max_sessions = n,
                Err(_) => warnings.push(format!("Ignoring invalid MAX_SESSIONS={raw}")),
            }
        }

        if let Some(raw) = lookup("TIMEOUT") {
            match raw.trim().parse::<f64>() {
                Ok(secs) if secs <= 0.0 || seconds_to_duration(secs).is_some() => {
                    self.sessions.get_or_insert_with(Default::default).timeout_secs = secs
                }
                _ => warnings.push(format!("Ignoring invalid TIMEOUT={raw}")),
            }
        }

        if let Some(raw) = lookup("SAFETY_CHECKER") {
            let enabled = matches!(raw.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes");
            self.pipeline.get_or_insert_with(Default::default).safety_checker = enabled;
        }

        if let Some(raw) = lookup("PORT") {
            match raw.trim().parse::<u16>() {
                Ok(port) => self.gateway.get_or_insert_with(Default::default).port = port,
                Err(_) => warnings.push(format!("Ignoring invalid PORT={raw}")),
            }
        }

        warnings
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or_else(default_port)
    }

    pub fn bind_addr(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(
            self.gateway
                .as_ref()
                .map(|g| g.handshake_timeout_secs)
                .unwrap_or_else(default_handshake_timeout),
        )
    }

    pub fn max_sessions(&self) -> usize {
        self.sessions
            .as_ref()
            .map(|s| s.max_sessions)
            .unwrap_or_else(default_max_sessions)
    }

    /// Session lifetime, or `None` when disabled.
    pub fn session_timeout(&self) -> Option<Duration> {
        let secs = self.sessions.as_ref().map(|s| s.timeout_secs).unwrap_or(0.0);
        seconds_to_duration(secs).filter(|limit| !limit.is_zero())
    }

    /// Minimum spacing between two emitted output frames.
    pub fn min_frame_interval(&self) -> Duration {
        let fps = self.render.as_ref().map(|r| r.max_fps).unwrap_or_else(default_max_fps);
        if fps.is_finite() && fps > 0.0 {
            seconds_to_duration(1.0 / fps)
                .unwrap_or_else(|| Duration::from_secs_f64(1.0 / default_max_fps()))
        } else {
            Duration::ZERO
        }
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.render
            .as_ref()
            .map(|r| r.jpeg_quality)
            .unwrap_or_else(default_jpeg_quality)
    }

    pub fn pipeline(&self) -> PipelineConfig {
        self.pipeline.clone().unwrap_or_default()
    }

    pub fn safety_checker(&self) -> bool {
        self.pipeline.as_ref().is_some_and(|p| p.safety_checker)
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
            if let Some(dir) = &gw.static_dir {
                if !Path::new(dir).is_dir() {
                    warnings.push(format!("Static directory not found: {dir}"));
                }
            }
        }

        if let Some(sessions) = &self.sessions {
            if sessions.max_sessions == 0 {
                errors.push("sessions.max_sessions must be at least 1".to_string());
            }
            if sessions.timeout_secs < 0.0 {
                errors.push("sessions.timeout_secs cannot be negative".to_string());
            } else if seconds_to_duration(sessions.timeout_secs).is_none() {
                errors.push(format!(
                    "sessions.timeout_secs is out of range: {}",
                    sessions.timeout_secs
                ));
            }
        }

        if let Some(render) = &self.render {
            if !(1..=100).contains(&render.jpeg_quality) {
                errors.push(format!(
                    "render.jpeg_quality must be within 1-100, got {}",
                    render.jpeg_quality
                ));
            }
            if render.max_fps < 0.0 {
                errors.push("render.max_fps cannot be negative".to_string());
            } else if render.max_fps > 0.0 && seconds_to_duration(1.0 / render.max_fps).is_none() {
                errors.push(format!("render.max_fps is out of range: {}", render.max_fps));
            }
        }

        if let Some(pipeline) = &self.pipeline {
            match pipeline.kind {
                PipelineKind::Remote if pipeline.url.is_none() => {
                    errors.push("Remote pipeline requires pipeline.url".to_string());
                }
                PipelineKind::Passthrough if pipeline.safety_checker => {
                    warnings.push(
                        "Safety checker has no effect with the passthrough pipeline".to_string(),
                    );
                }
                _ => {}
            }
            if pipeline.width.is_some() != pipeline.height.is_some() {
                warnings.push(
                    "pipeline.width and pipeline.height must both be set to resize frames"
                        .to_string(),
                );
            }
        }

        (warnings, errors)
    }

}

/// Seconds as a `Duration`, or `None` if negative, NaN or too large.
fn seconds_to_duration(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

/// Base directory for lcm-live data: `~/.lcm_live/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".lcm_live")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.gateway_port(), 7860);
        assert_eq!(config.max_sessions(), 4);
        assert_eq!(config.session_timeout(), None);
        assert_eq!(config.jpeg_quality(), 85);
        assert!(!config.safety_checker());
        let interval = config.min_frame_interval();
        assert!(interval > Duration::from_millis(8) && interval < Duration::from_millis(9));
    }

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, variable name unique to this test
        unsafe { std::env::set_var("TEST_LCM_URL", "http://model:9000") };
        let input = r#"{"url": "${TEST_LCM_URL}", "other": "plain"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains("http://model:9000"));
        assert!(result.contains("plain"));
        unsafe { std::env::remove_var("TEST_LCM_URL") };
    }

    #[test]
    fn test_env_var_missing() {
        let input = r#"{"key": "${NONEXISTENT_VAR_LCM_TEST}"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains(r#""""#));
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        let warnings = config.apply_overrides(lookup_from(&[
            ("MAX_SESSIONS", "1"),
            ("TIMEOUT", "1.5"),
            ("SAFETY_CHECKER", "True"),
            ("PORT", "9000"),
        ]));
        assert!(warnings.is_empty());
        assert_eq!(config.max_sessions(), 1);
        assert_eq!(config.session_timeout(), Some(Duration::from_millis(1500)));
        assert!(config.safety_checker());
        assert_eq!(config.gateway_port(), 9000);
    }

    #[test]
    fn test_zero_timeout_disables() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[("TIMEOUT", "0")]));
        assert_eq!(config.session_timeout(), None);
    }

    #[test]
    fn test_invalid_overrides_warn() {
        let mut config = Config::default();
        let warnings = config.apply_overrides(lookup_from(&[
            ("MAX_SESSIONS", "lots"),
            ("TIMEOUT", "soon"),
        ]));
        assert_eq!(warnings.len(), 2);
        assert_eq!(config.max_sessions(), 4);
        assert_eq!(config.session_timeout(), None);
    }

    #[test]
    fn test_safety_checker_false_values() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[("SAFETY_CHECKER", "None")]));
        assert!(!config.safety_checker());
    }

    #[test]
    fn test_load_json5_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                // comments are allowed
                sessions: { max_sessions: 2, timeout_secs: 30 },
                render: { max_fps: 30 },
                pipeline: { kind: "remote", url: "http://127.0.0.1:9000/transform" },
            }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_sessions(), 2);
        assert_eq!(config.session_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.pipeline().kind, PipelineKind::Remote);
        assert_eq!(config.jpeg_quality(), 85);
        let (_, errors) = config.validate();
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn test_load_missing_file_defaults() {
        let config = Config::load(Path::new("/nonexistent/lcm-live/config.json")).unwrap();
        assert_eq!(config.max_sessions(), 4);
    }

    #[test]
    fn test_load_invalid_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ sessions: ").unwrap();
        assert!(matches!(Config::load(&path), Err(crate::error::LcmError::Config(_))));
    }

    #[test]
    fn test_load_unreadable_path_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(Config::load(dir.path()), Err(crate::error::LcmError::Io(_))));
    }

    #[test]
    fn test_logging_config_defaults() {
        let config: Config = json5::from_str(r#"{ "logging": {} }"#).unwrap();
        let logging = config.logging.expect("logging should be present");
        assert_eq!(logging.format, "plain");
        assert!(logging.level.is_none());
        assert_eq!(logging.output, "stderr");
        assert!(logging.filters.is_empty());
    }

    #[test]
    fn test_validate_remote_without_url() {
        let config = Config {
            pipeline: Some(PipelineConfig {
                kind: PipelineKind::Remote,
                ..PipelineConfig::default()
            }),
            ..Config::default()
        };
        let (_warnings, errors) = config.validate();
        assert!(errors.iter().any(|e| e.contains("pipeline.url")), "got: {errors:?}");
    }

    #[test]
    fn test_validate_bad_values() {
        let config = Config {
            gateway: Some(GatewayConfig {
                port: 0,
                ..GatewayConfig::default()
            }),
            sessions: Some(SessionsConfig {
                max_sessions: 0,
                timeout_secs: -1.0,
            }),
            render: Some(RenderConfig {
                max_fps: 60.0,
                jpeg_quality: 0,
            }),
            ..Config::default()
        };
        let (_warnings, errors) = config.validate();
        assert_eq!(errors.len(), 4, "got: {errors:?}");
    }

    #[test]
    fn test_huge_timeout_override_is_ignored() {
        let mut config = Config::default();
        let warnings = config.apply_overrides(lookup_from(&[("TIMEOUT", "1e20")]));
        assert_eq!(warnings.len(), 1, "got: {warnings:?}");
        assert_eq!(config.session_timeout(), None);

        let warnings = config.apply_overrides(lookup_from(&[("TIMEOUT", "inf")]));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_out_of_range_durations_do_not_panic() {
        let config = Config {
            sessions: Some(SessionsConfig {
                max_sessions: 4,
                timeout_secs: 1e20,
            }),
            render: Some(RenderConfig {
                max_fps: 1e-300,
                jpeg_quality: 85,
            }),
            ..Config::default()
        };
        assert_eq!(config.session_timeout(), None);
        let interval = config.min_frame_interval();
        assert!(interval > Duration::from_millis(8) && interval < Duration::from_millis(9));

        let (_warnings, errors) = config.validate();
        assert!(errors.iter().any(|e| e.contains("timeout_secs is out of range")), "got: {errors:?}");
        assert!(errors.iter().any(|e| e.contains("max_fps is out of range")), "got: {errors:?}");
    }

    #[test]
    fn test_large_finite_timeout_is_kept() {
        let mut config = Config::default();
        let warnings = config.apply_overrides(lookup_from(&[("TIMEOUT", "86400")]));
        assert!(warnings.is_empty());
        assert_eq!(config.session_timeout(), Some(Duration::from_secs(86_400)));
    }
}
