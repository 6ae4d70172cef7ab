//! Tracing subscriber setup with a runtime-adjustable level.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

#[derive(Debug, thiserror::Error)]
pub enum LogLevelError {
    #[error("unknown log level `{0}`")]
    UnknownLevel(String),
    #[error("failed to reload log filter: {0}")]
    Reload(#[from] reload::Error),
}

/// Reads and changes the global log level after startup.
#[derive(Clone)]
pub struct LogLevelHandle {
    reload: Option<reload::Handle<EnvFilter, Registry>>,
    current: Arc<RwLock<String>>,
}

impl LogLevelHandle {
    /// A handle not attached to any subscriber. Level changes are recorded only.
    #[must_use]
    pub fn detached(level: &str) -> Self {
        Self {
            reload: None,
            current: Arc::new(RwLock::new(level.to_string())),
        }
    }

    #[must_use]
    pub fn current(&self) -> String {
        self.current.read().clone()
    }

    /// Replaces the active filter with `level` for every target.
    ///
    /// # Errors
    ///
    /// Returns [`LogLevelError::UnknownLevel`] if `level` is not a level name,
    /// or [`LogLevelError::Reload`] if the subscriber has been dropped.
    pub fn set(&self, level: &str) -> Result<(), LogLevelError> {
        let parsed = parse_level(level)?;
        if let Some(reload) = &self.reload {
            reload.reload(EnvFilter::default().add_directive(parsed.into()))?;
        }
        *self.current.write() = parsed.to_string().to_lowercase();
        Ok(())
    }
}

impl std::fmt::Debug for LogLevelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogLevelHandle")
            .field("attached", &self.reload.is_some())
            .field("current", &self.current())
            .finish()
    }
}

fn parse_level(level: &str) -> Result<LevelFilter, LogLevelError> {
    level
        .trim()
        .parse::<LevelFilter>()
        .map_err(|_| LogLevelError::UnknownLevel(level.to_string()))
}

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set. With `json`, events
/// are written as one JSON object per line.
///
/// # Errors
///
/// Returns an error if `level` is not a level name or a global subscriber is
/// already installed.
pub fn init(level: &str, json: bool) -> anyhow::Result<LogLevelHandle> {
    let default = parse_level(level)?;
    let filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .from_env_lossy();
    let (filter, reload) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_current_span(true)))
        .with((!json).then(fmt::layer))
        .try_init()?;

    Ok(LogLevelHandle {
        reload: Some(reload),
        current: Arc::new(RwLock::new(default.to_string().to_lowercase())),
    })
}
