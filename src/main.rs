use clap::Parser;
use vmgate::cli::{check, console, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match cli.command {
        Commands::Check(args) => check::execute(&args.config)?,
        Commands::Console(args) => console::execute(args).await?,
    }
    Ok(())
}
