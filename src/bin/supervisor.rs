use gridbot_core::application::system::Application;
use gridbot_core::config::Config;
use tracing::{error, info, Level};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    info!("starting supervisor");

    let config = Config::from_env()?;
    let app = Application::build(config).await?;
    let handle = app.start().await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
        }
        result = handle.supervisor_task => {
            if let Err(e) = result {
                error!("supervisor task panicked: {e}");
            }
        }
    }

    app.shutdown().await;
    Ok(())
}
