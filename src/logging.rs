//! Logging for the daemon's diagnostic channel.
//!
//! All diagnostics go to stderr: stdout is reserved for the change
//! records the controlling process reads. Levels come from
//! [`LoggingConfig`], with `RUST_LOG` overriding the file when set.
//!
//! # Configuration
//!
//! ```toml
//! [logging]
//! default = "warn"
//!
//! [logging.modules]
//! "treewatch::watcher" = "debug"   # walker and dispatcher tracing
//! ```
//!
//! # Environment Variable
//!
//! ```bash
//! RUST_LOG=treewatch::watcher=trace treewatch run --root /srv/data
//! ```

use std::sync::Once;

use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Wall-clock timestamps with millisecond precision.
struct ClockTime;

impl FormatTime for ClockTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Level directives for the subscriber: `RUST_LOG` verbatim when set,
/// otherwise the configured default plus one directive per module entry.
fn filter_from(config: &LoggingConfig) -> EnvFilter {
    if let Ok(spec) = std::env::var("RUST_LOG") {
        return EnvFilter::new(spec);
    }

    let mut directives = vec![config.default.clone()];
    directives.extend(
        config
            .modules
            .iter()
            .map(|(module, level)| format!("{module}={level}")),
    );
    EnvFilter::new(directives.join(","))
}

/// Install the stderr subscriber. Later calls are no-ops, so library
/// users and tests can call it freely.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_timer(ClockTime)
            .with_target(true)
            .with_filter(filter_from(config));
        tracing_subscriber::registry().with(layer).init();
    });
}

/// Install the stderr subscriber with the default levels (`warn`).
pub fn init() {
    init_with_config(&LoggingConfig::default());
}

/// Operational event carrying a `subsystem` field, at info level.
///
/// # Examples
/// ```ignore
/// log_event!("daemon", "watching", "{} ({})", root.display(), handle);
/// log_event!("engine", "started");
/// ```
#[macro_export]
macro_rules! log_event {
    ($subsystem:expr, $event:expr) => {
        tracing::info!(subsystem = $subsystem, "{}", $event)
    };
    ($subsystem:expr, $event:expr, $($arg:tt)*) => {
        tracing::info!(subsystem = $subsystem, "{}: {}", $event, format_args!($($arg)*))
    };
}

/// Debug-level counterpart of [`log_event!`].
#[macro_export]
macro_rules! debug_event {
    ($subsystem:expr, $event:expr) => {
        tracing::debug!(subsystem = $subsystem, "{}", $event)
    };
    ($subsystem:expr, $event:expr, $($arg:tt)*) => {
        tracing::debug!(subsystem = $subsystem, "{}: {}", $event, format_args!($($arg)*))
    };
}
