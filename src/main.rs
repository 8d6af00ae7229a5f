use anyhow::Result;
use clap::Parser;

use cachegate::{cli::Cli, logging, run, settings::Settings};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load(&cli)?;
    logging::init_logger(settings.log)?;
    settings.apply_cli_port(&cli);
    run(settings).await
}
