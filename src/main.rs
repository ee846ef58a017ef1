// Purpose: Provide the binary entry for the Appfile compiler CLI.
// Inputs/Outputs: Reads process args and returns the exit code from the CLI dispatcher.
// Invariants: Main must not bypass centralized CLI argument handling.
// Gotchas: Tracing goes to stderr so command output stays scriptable.

use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let code = appc::cli::run_cli(std::env::args().skip(1));
    std::process::exit(code);
}
