use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter directives, e.g. `PORTAL_LOG=portal_core=debug`.
pub const LOG_ENV: &str = "PORTAL_LOG";
/// When set, logs go to this file instead of stderr.
pub const LOG_FILE_ENV: &str = "PORTAL_LOG_FILE";

const DEFAULT_DIRECTIVES: &str = "warn,portal_core=info,portal_cli=info";

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Install the global subscriber. Stdout stays reserved for command output.
pub fn init_tracing() {
    let log_file = std::env::var_os(LOG_FILE_ENV).map(PathBuf::from);

    let file = log_file.as_ref().and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!("Warning: cannot open log file {}: {}", path.display(), e);
                None
            }
        }
    });

    let layer = match file {
        Some(file) => fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .with_filter(env_filter())
            .boxed(),
        None => fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(env_filter())
            .boxed(),
    };

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry().with(layer).try_init();
}
