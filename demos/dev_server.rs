use anyhow::Context;
use devserver_runner::host::{LaunchMode, ProcessLauncher};
use devserver_runner::prober::HttpProbe;
use devserver_runner::{Config, ServerController, ServerState};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG=devserver::output=info shows the server's own output.
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "demos/devserver.json".to_string());
    let config = Config::from_file(&config_path)
        .with_context(|| format!("loading {}", config_path))?;

    let probe = Arc::new(HttpProbe::new(config.prober.request_timeout)?);
    let controller = ServerController::new(config, Arc::new(ProcessLauncher::new()), probe)?;
    tracing::info!(server_id = %controller.id(), "Starting dev server demo");

    let mut states = controller.subscribe_state();
    controller
        .start(LaunchMode::Run)
        .await
        .context("starting the dev server")?;
    println!("Dev server launched, pid {:?}", controller.pid());

    let watcher = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            println!("Server state: {:?}", state);
            if state == ServerState::Stopped {
                break;
            }
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => println!("\nStopping dev server..."),
        _ = wait_until_stopped(&controller) => println!("Dev server exited on its own"),
    }

    controller.stop(false);
    let _ = watcher.await;

    let locations = controller.load_publish_locations();
    for (module, url) in locations.iter() {
        println!("- {} published at {}", module, url);
    }
    Ok(())
}

async fn wait_until_stopped(controller: &ServerController) {
    let mut states = controller.subscribe_state();
    let _ = states.wait_for(|s| *s == ServerState::Stopped).await;
}
