use std::sync::Arc;

use anyhow::Result;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rift_domain::{BattleWorkshop, RiftWorkshop, Workshop};
use rift_workshop::application::WorkshopRuntime;
use rift_workshop::config::{WorkshopConfig, WorkshopKind};
use rift_workshop::infrastructure::generation::{DisabledGeneration, HttpGenerationClient};
use rift_workshop::infrastructure::hardware::{run_line_source, HardwareBridge};
use rift_workshop::infrastructure::websocket::BroadcastClient;
use rift_workshop::ports::{BroadcastPort, GenerationPort};

/// Spawns a task that cancels `cancel_token` on SIGTERM/SIGINT
fn setup_shutdown_signal(cancel_token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }

        cancel_token.cancel();
    });
}

fn load_dotenv_from_repo_root() {
    let repo_root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..");

    // Prefer local overrides.
    for filename in [".env.local", ".env"] {
        let path = repo_root.join(filename);
        if path.exists() {
            let _ = dotenvy::from_path(path);
        }
    }
}

pub async fn run() -> Result<()> {
    load_dotenv_from_repo_root();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rift_workshop=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkshopConfig::from_env()?;
    tracing::info!("Configuration loaded");
    tracing::info!("  Workshop: {} ({})", config.kind, config.device_id);
    tracing::info!("  Relay: {}", config.ws_url);
    match &config.generation {
        Some(generation) => tracing::info!("  Generation: {}", generation.url),
        None => tracing::info!("  Generation: disabled"),
    }

    let cancel_token = CancellationToken::new();
    setup_shutdown_signal(cancel_token.clone());

    let client = Arc::new(BroadcastClient::new(
        config.ws_url.as_str(),
        config.reconnect_delay,
    ));
    let generation: Arc<dyn GenerationPort> = match &config.generation {
        Some(generation) => Arc::new(HttpGenerationClient::new(
            generation.url.as_str(),
            generation.api_key.clone(),
            generation.timeout,
        )),
        None => Arc::new(DisabledGeneration),
    };

    match config.kind {
        WorkshopKind::Battle => {
            let workshop = BattleWorkshop::new(config.battle.clone())?;
            run_workshop(&config, workshop, client, generation, cancel_token).await
        }
        WorkshopKind::Rift => {
            let workshop = RiftWorkshop::new(config.rift.clone())?;
            run_workshop(&config, workshop, client, generation, cancel_token).await
        }
    }
}

async fn run_workshop<W>(
    config: &WorkshopConfig,
    workshop: W,
    client: Arc<BroadcastClient>,
    generation: Arc<dyn GenerationPort>,
    cancel_token: CancellationToken,
) -> Result<()>
where
    W: Workshop,
    W::Phase: Send + Sync + 'static,
{
    let broadcast: Arc<dyn BroadcastPort> = client.clone();
    let mut runtime = WorkshopRuntime::new(config.device_id.clone(), workshop, broadcast, generation);

    let transport = {
        let client = client.clone();
        let events = runtime.sender();
        let cancel = cancel_token.clone();
        tokio::spawn(async move {
            client.run(events, cancel).await;
        })
    };

    let bench = config.stdin_hardware.then(|| {
        let bridge = HardwareBridge::new(runtime.sender(), config.roles.clone(), config.debounce);
        let cancel = cancel_token.clone();
        tokio::spawn(async move {
            tracing::info!("Reading bench commands from stdin");
            run_line_source(BufReader::new(tokio::io::stdin()), &bridge, cancel).await;
        })
    });

    runtime.run(cancel_token.clone()).await;

    cancel_token.cancel();
    if let Err(e) = transport.await {
        tracing::warn!(error = %e, "Relay client task failed");
    }
    if let Some(bench) = bench {
        bench.abort();
    }

    tracing::info!("Workshop stopped");
    Ok(())
}
