//! Tracing setup for `ptm-node`.
//!
//! By default the node logs its own and the resync library's events at
//! `info` and HTTP request spans from `tower_http` at `debug`. `RUST_LOG`
//! replaces that filter entirely. Output goes to stderr in either format.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter applied by `run` when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "ptm_node=info,ptm_resync=info,tower_http=debug";

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Colored lines with file and line numbers, for a terminal.
    Pretty,
    /// One JSON object per event, for collectors.
    Json,
}

impl LogFormat {
    /// Maps the `--log-format` value; anything but "json" means `Pretty`.
    pub fn from_str_lossy(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

fn filter(default_directives: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives))
}

/// Install the global subscriber. Panics if one is already installed, so
/// `main` calls it once per subcommand.
pub fn init_logging(default_directives: &str, format: LogFormat) {
    let registry = tracing_subscriber::registry().with(filter(default_directives));

    match format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }

    tracing::debug!(?format, directives = default_directives, "tracing ready");
}
