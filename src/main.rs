use clap::{CommandFactory, FromArgMatches};
use hexrus::cli::{self, Cli};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so dumps on stdout stay clean.
    // RUST_LOG=hexrus=debug shows chunk loading and undo activity.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches)?;
    cli::run(cli, &matches)
}
