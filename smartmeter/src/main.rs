use anyhow::Context;
use clap::Parser;
use smartmeter::{Args, Settings, app};

fn init_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let settings = Settings::from_args(&args).context("Invalid configuration")?;
    log::info!("Starting smartmeter {}", env!("CARGO_PKG_VERSION"));
    app::run(settings).await
}
