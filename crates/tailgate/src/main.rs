use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

#[tokio::main]
async fn main() -> Result<()> {
    let parsed = cli::Cli::parse();

    match parsed.dispatch().await {
        Ok(()) => Ok(()),
        Err(err) => {
            // Unmet preconditions exit with 2
            if let Some(error) = err.downcast_ref::<tailgate_core::errors::TailgateError>() {
                use tailgate_core::errors::TailgateError;
                if matches!(
                    error,
                    TailgateError::NotFound { .. }
                        | TailgateError::NotRunning { .. }
                        | TailgateError::NotAuthenticated { .. }
                        | TailgateError::AlreadyAuthenticated { .. }
                ) {
                    eprintln!("Error: {}", error);
                    std::process::exit(2);
                }
            }
            Err(err)
        }
    }
}
