//! Tower Duel headless reference client
//!
//! Connects to the match relay, joins the queue, submits a prompt from the
//! environment and logs every stage of the match. Useful for soaking the
//! relay protocol without a renderer attached.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tower_duel_client::assets::HttpAssetFactory;
use tower_duel_client::session::{Session, SessionConfig, SessionEvent};
use tower_duel_client::util::time::Timer;
use tower_duel_client::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    info!("Starting Tower Duel client");
    info!("Relay endpoint: {}", config.relay_url);

    let session_config = SessionConfig {
        tower_hp_poll: config.tower_hp_poll,
        ..Default::default()
    };
    let factory = Arc::new(HttpAssetFactory::new());
    let handle = Session::connect(session_config, &config.relay_url, factory).await?;

    let mut events = handle.events();
    let timer = Timer::new();

    loop {
        tokio::select! {
            _ = shutdown_signal() => {
                info!("Shutting down");
                handle.shutdown();
                break;
            }

            event = events.recv() => match event {
                Ok(SessionEvent::Queued) => info!("In queue"),
                Ok(SessionEvent::OpponentFound { player_number }) => {
                    info!(player_number, "Opponent found");
                    if let Some(prompt) = &config.prompt {
                        handle.submit_prompt(prompt)?;
                        info!("Prompt submitted, preparing battle");
                    } else {
                        warn!("No PROMPT configured; waiting without submitting");
                    }
                }
                Ok(SessionEvent::Analyzing) => info!("Both prompts in, builds generating"),
                Ok(SessionEvent::Preparing) => info!("Builds received, loading assets"),
                Ok(SessionEvent::AssetProgress { ready, total }) => {
                    info!(ready, total, "Asset materialized");
                }
                Ok(SessionEvent::MatchStarted(setup)) => {
                    info!(
                        player_number = setup.player_number,
                        assets = setup.assets.len(),
                        "Match started"
                    );
                }
                Ok(SessionEvent::OpponentShot { power }) => info!(power, "Opponent fired"),
                Ok(SessionEvent::TowerHpChanged { side, hp }) => {
                    info!(?side, hp, "Tower health changed");
                }
                Ok(SessionEvent::GameOver { victory }) => {
                    info!(
                        result = if victory { "YOU WIN" } else { "YOU LOSE" },
                        "Game over"
                    );
                    handle.shutdown();
                    break;
                }
                Ok(SessionEvent::Disconnected) => {
                    warn!("Connection to the relay lost");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Event consumer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    info!("Session finished after {}s", timer.elapsed_secs());
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
