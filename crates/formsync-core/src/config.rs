//! Engine configuration
//!
//! [`EngineConfig`] collects every tunable of the engine. It loads from TOML,
//! and CLI flags override individual fields through the `with_*` builders.

use crate::request::RequestKind;
use formsync_diff::{RenderConfig, DEFAULT_FULL_UPDATE_THRESHOLD};
use formsync_session::{LockWait, RegistryConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Errors loading or writing configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid TOML or unknown field
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config could not be written as TOML
    #[error("cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Engine settings
///
/// # Example
///
/// ```rust
/// use formsync_core::EngineConfig;
///
/// let config = EngineConfig::from_toml_str("full_update_threshold = 5").unwrap();
/// assert_eq!(config.full_update_threshold, 5);
/// assert_eq!(config.lock_wait_ms, 30_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Buffered attribute count above which a full update is sent instead
    pub full_update_threshold: usize,
    /// Lock wait for interactive (Ajax) requests, in milliseconds
    pub ajax_lock_wait_ms: u64,
    /// Lock wait for non-interactive requests, in milliseconds
    pub lock_wait_ms: u64,
    /// Idle time after which a document's session expires, in seconds
    pub session_idle_secs: u64,
    /// Maximum live documents before eviction to the store
    pub max_documents: u64,
    /// Path prefix applied to absolute URLs in full-update fragments
    pub context_path: String,
    /// Namespace URIs dropped from full-update fragments
    pub swallowed_namespaces: Vec<String>,
    /// Return the dynamic-state blob with every response
    pub include_dynamic_state: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            full_update_threshold: DEFAULT_FULL_UPDATE_THRESHOLD,
            ajax_lock_wait_ms: 0,
            lock_wait_ms: 30_000,
            session_idle_secs: 30 * 60,
            max_documents: 10_000,
            context_path: String::new(),
            swallowed_namespaces: Vec::new(),
            include_dynamic_state: false,
        }
    }
}

impl EngineConfig {
    /// Parse from a TOML document; missing fields keep their defaults
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] on invalid TOML or unknown fields.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file is unreadable or invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&source)?;
        tracing::debug!(path = %path.display(), "Loaded engine config");
        Ok(config)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// Returns [`ConfigError::Serialize`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// With full-update threshold
    #[inline]
    #[must_use]
    pub fn with_full_update_threshold(mut self, threshold: usize) -> Self {
        self.full_update_threshold = threshold;
        self
    }

    /// With interactive lock wait
    #[inline]
    #[must_use]
    pub fn with_ajax_lock_wait(mut self, wait: Duration) -> Self {
        self.ajax_lock_wait_ms = duration_ms(wait);
        self
    }

    /// With non-interactive lock wait
    #[inline]
    #[must_use]
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait_ms = duration_ms(wait);
        self
    }

    /// With session idle timeout
    #[inline]
    #[must_use]
    pub fn with_session_idle(mut self, idle: Duration) -> Self {
        self.session_idle_secs = idle.as_secs();
        self
    }

    /// With maximum live documents
    #[inline]
    #[must_use]
    pub fn with_max_documents(mut self, max_documents: u64) -> Self {
        self.max_documents = max_documents;
        self
    }

    /// With URL context path
    #[inline]
    #[must_use]
    pub fn with_context_path(mut self, context_path: impl Into<String>) -> Self {
        self.context_path = context_path.into();
        self
    }

    /// With an additional swallowed namespace
    #[inline]
    #[must_use]
    pub fn with_swallowed_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.swallowed_namespaces.push(namespace.into());
        self
    }

    /// With dynamic-state blob in responses
    #[inline]
    #[must_use]
    pub fn with_dynamic_state(mut self, include: bool) -> Self {
        self.include_dynamic_state = include;
        self
    }

    /// Lock wait for a request kind
    #[must_use]
    pub fn lock_wait(&self, kind: RequestKind) -> LockWait {
        let ms = match kind {
            RequestKind::Ajax => self.ajax_lock_wait_ms,
            RequestKind::NonInteractive => self.lock_wait_ms,
        };
        if ms == 0 {
            LockWait::Immediate
        } else {
            LockWait::Bounded(Duration::from_millis(ms))
        }
    }

    /// Registry settings
    #[must_use]
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            idle_timeout: Duration::from_secs(self.session_idle_secs),
            max_documents: self.max_documents,
        }
    }

    /// Full-update renderer settings
    #[must_use]
    pub fn render_config(&self) -> RenderConfig {
        self.swallowed_namespaces.iter().fold(
            RenderConfig::default().with_context_path(self.context_path.clone()),
            |config, namespace| config.with_swallowed_namespace(namespace.clone()),
        )
    }
}

fn duration_ms(wait: Duration) -> u64 {
    u64::try_from(wait.as_millis()).unwrap_or(u64::MAX)
}
