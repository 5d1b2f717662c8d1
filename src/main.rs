// ABOUTME: Entry point for the chainrun CLI application.
// ABOUTME: Loads inputs, runs the script, and exits with the remote status.

mod cli;

use chainrun::Runner;
use chainrun::error::Result;
use chainrun::ssh::Stdio;
use clap::Parser;
use cli::Cli;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbose flag when set.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            let mut chain = Vec::new();
            let mut cause = std::error::Error::source(&e);
            while let Some(err) = cause {
                chain.push(err.to_string());
                cause = err.source();
            }
            tracing::debug!(error = %e, causes = ?chain, "run failed");
            eprintln!("Error: {e}");
            e.exit_code()
        }
    };

    // Exit explicitly: the runtime would otherwise wait on the blocking stdin reader.
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.load_options().load(|prompt| rpassword::prompt_password(prompt))?;
    Runner::new(config).run(Stdio::inherit()).await?;
    Ok(())
}
