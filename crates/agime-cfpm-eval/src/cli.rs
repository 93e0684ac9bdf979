use crate::commands::resume::{self, ResumeArgs};
use crate::commands::run::{self, RunArgs};
use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "cfpm-eval",
    version,
    about = "Regression evaluation of the AGIME CFPM memory subsystem",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a fresh session, run two turns and evaluate the resulting memory
    Run(RunArgs),
    /// Resume an existing session, send one follow-up and evaluate its memory
    Resume(ResumeArgs),
}

impl Cli {
    pub async fn execute(self) -> ExitCode {
        match self.command {
            Command::Run(args) => run::handle(args).await,
            Command::Resume(args) => resume::handle(args).await,
        }
    }
}
