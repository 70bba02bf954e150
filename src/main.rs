use clap::Parser;
use profile_directory::config::{Cli, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load(Cli::parse())?;
    profile_directory::run(config).await
}
