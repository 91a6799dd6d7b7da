use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = chatpilot_lib::cli::Cli::parse();
    chatpilot_lib::run(cli).await?;
    Ok(())
}
