pub mod compare;
pub mod evaluate;
pub mod init;
pub mod quantise;

use tracing_subscriber::EnvFilter;

/// Logs to stderr at `info`, or `debug` when verbose. `RUST_LOG` wins over both.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();
}
