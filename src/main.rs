use clap::Parser;
use shardweave::cli::{self, Cli};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> ExitCode {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  let cancel = CancellationToken::new();
  let on_interrupt = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      info!("Interrupt received, stopping");
      on_interrupt.cancel();
    }
  });

  match cli::run(cli, cancel).await {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      eprintln!("{}", err);
      ExitCode::FAILURE
    }
  }
}
