use tokio::signal;

use voicewire::config::Config;
use voicewire::session::Session;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    let session = Session::new(config);
    session.start().await?;

    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Received Ctrl+C, shutting down...");
        }
        _ = session.finished() => {
            log::info!("Connection ended, shutting down...");
        }
    }

    session.stop().await;
    Ok(())
}
