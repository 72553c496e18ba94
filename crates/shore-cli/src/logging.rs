use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` tiene prioridad; si no está, `-v`/`-q` eligen el nivel de los
/// crates `shore*`. Los registros de `log` llegan vía `tracing-log`.
pub fn setup_logging(verbosity: u8, quiet: bool) {
    let default = if quiet {
        "shore=error"
    } else {
        match verbosity {
            0 => "shore=info",
            1 => "shore=debug",
            _ => "shore=trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false).compact();
    tracing_subscriber::registry().with(filter).with(stderr_layer).init();
}
