//! lsc - LineScript compiler binary.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_env("LSC_LOG").unwrap_or_else(|_| EnvFilter::new("error")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match lsc_drv::parse_args(&args) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("CliError: {}", message);
            std::process::exit(2);
        }
    };

    let mut session = lsc_drv::Session::new(config);
    std::process::exit(session.run());
}
