//! Runs a geobattle server backed by a directory of session documents.
//!
//! ```text
//! cargo run -p battle-server            # serve
//! cargo run -p battle-server -- seed    # write a sample duel and print its ids
//! ```
//!
//! Configuration comes from the environment (see `ServerConfig`). Clients
//! authenticate with their player id as the token, which is only suitable
//! for local development.

use std::sync::Arc;

use geobattle::prelude::*;
use geobattle::telemetry::init_tracing;
use geobattle_store::CombatSnapshot;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

/// Trusts the token to be the player's id.
struct DevAuthenticator;

impl Authenticator for DevAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<PlayerId, AuthError> {
        token
            .parse()
            .map_err(|_| AuthError("token must be a player id".into()))
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), GeobattleError> {
    init_tracing();

    let config = ServerConfig::from_env()?;
    let store = Arc::new(JsonDirStore::open(config.data_dir.clone()).await?);

    if std::env::args().nth(1).as_deref() == Some("seed") {
        return seed(&store).await;
    }

    let (inbox, mut frames) = mpsc::unbounded_channel::<BattleFrame>();
    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            tracing::debug!(
                session_id = %frame.session_id,
                player_id = %frame.player_id,
                seq = frame.seq,
                bytes = frame.data.len(),
                "battle frame"
            );
        }
    });

    let server = GeobattleServerBuilder::from_config(&config)
        .battle_inbox(inbox)
        .build(store, DevAuthenticator)
        .await?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for ctrl-c");
            return;
        }
        tracing::info!("shutdown signal received");
        trigger.cancel();
    });

    server.run_until(shutdown).await
}

/// Writes a two-player duel with one persisted snapshot.
async fn seed(store: &JsonDirStore) -> Result<(), GeobattleError> {
    let session_id = SessionId::new_v4();
    let attacker = PlayerId::new_v4();
    let defender = PlayerId::new_v4();

    let record = SessionRecord::new("duel", SessionStatus::InProgress)
        .with_player(attacker, "attacker")
        .with_player(defender, "defender")
        .with_snapshot(
            defender,
            CombatSnapshot {
                hp: 80,
                mp: 40,
                stance: "guard".into(),
                last_position_id: None,
            },
        );
    store.put_session(session_id, &record).await?;

    println!("session  {session_id}");
    println!("attacker {attacker}");
    println!("defender {defender}");
    println!("data dir {}", store.root().display());
    Ok(())
}
