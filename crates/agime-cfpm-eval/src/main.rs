use agime_cfpm_eval::cli::Cli;
use agime_cfpm_eval::logging::setup_logging;
use clap::Parser;
use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    setup_logging()?;

    let cli = Cli::parse();
    Ok(cli.execute().await)
}
