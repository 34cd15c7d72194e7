/*!
 * Logging and tracing initialization for the CLI
 */

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize structured logging. `verbose` forces `debug` even when
/// `RUST_LOG` is unset; otherwise the default level is `warn` so normal
/// command output isn't drowned out.
pub fn init_logging(verbose: bool) {
    let default_directive = if verbose { "tango=debug" } else { "tango=warn" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
