//! Tracing subscriber setup shared by anything embedding the runner — a
//! single place to turn a debug flag and an optional log directory into a
//! configured global subscriber.

use std::path::Path;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a global tracing subscriber. `debug` widens the default filter
/// from `info` to `debug`; `RUST_LOG` always wins if set. When `log_dir` is
/// given, a daily-rolling file appender is layered in alongside stderr.
pub fn init_tracing(debug: bool, log_dir: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter).with(fmt::layer());

    match log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "zypher.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            registry
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}
