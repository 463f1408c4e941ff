//! Runtime log level control.
//!
//! The subscriber is installed before configuration is read, so the level a
//! config file asks for is applied afterwards through a reload handle.

use once_cell::sync::OnceCell;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Registry, reload};

static RELOAD: OnceCell<reload::Handle<EnvFilter, Registry>> = OnceCell::new();

/// Filter from `RUST_LOG`, falling back to `info` (or `debug` when requested).
pub fn env_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_to_str(default_level(debug))))
}

pub fn default_level(debug: bool) -> LevelFilter {
    if debug { LevelFilter::DEBUG } else { LevelFilter::INFO }
}

pub fn set_reload_handle(handle: reload::Handle<EnvFilter, Registry>) {
    let _ = RELOAD.set(handle);
}

/// Raise the level to `debug` unless `RUST_LOG` already pins one.
///
/// Returns the level now in effect, or `None` when nothing was changed.
pub fn enable_debug() -> Option<LevelFilter> {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return None;
    }
    let handle = RELOAD.get()?;
    handle.reload(EnvFilter::new(level_to_str(LevelFilter::DEBUG))).ok()?;
    Some(LevelFilter::DEBUG)
}

fn level_to_str(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::ERROR => "error",
        LevelFilter::WARN => "warn",
        LevelFilter::DEBUG => "debug",
        LevelFilter::TRACE => "trace",
        _ => "info",
    }
}
