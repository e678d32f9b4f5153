//! Headless portal session.
//!
//! Wires the SQLite backend to the core for a single user: runs the
//! application-status tracker, resolves the messaging counterpart, and when
//! one exists keeps the conversation live. Outgoing messages are read from
//! stdin (`/attach <path>` uploads a file); everything else is logged.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use anteroom_core::CoreConfig;
use anteroom_core::counterpart::CounterpartyResolver;
use anteroom_core::notify::{Notifier, TracingAlertSink};
use anteroom_core::ports::Directory;
use anteroom_core::status::StatusTracker;
use anteroom_core::sync::{Attachment, EngineHandle, MessageSyncEngine};
use anteroom_store::Database;
use anteroom_store::backend::SqliteBackend;
use anteroom_store::dispatcher::ChangeDispatcher;
use anteroom_store::storage::FileObjectStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "anteroom=debug".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("ANTEROOM_DB_PATH").unwrap_or_else(|_| "anteroom.db".into());
    let data_dir = std::env::var("ANTEROOM_DATA_DIR").unwrap_or_else(|_| "anteroom-data".into());
    let username = std::env::var("ANTEROOM_USERNAME")
        .context("ANTEROOM_USERNAME must name the session user")?;
    let config = CoreConfig::default();

    // Backend
    let db = Arc::new(Database::open(&PathBuf::from(&db_path))?);
    let objects = FileObjectStore::new(PathBuf::from(&data_dir)).await?;
    let backend = SqliteBackend::new(db.clone(), ChangeDispatcher::new(), objects);

    // Session identity, role resolved once here
    let Some(user_row) = db.get_user_by_username(&username)? else {
        bail!("unknown user '{}'", username);
    };
    let user = backend
        .user_by_id(user_row.id.parse()?)
        .await?
        .context("session user vanished from the directory")?;
    info!("Session for {} ({:?})", user.username, user.role);

    let notifier = Arc::new(Notifier::new(Arc::new(TracingAlertSink), config.notify_cooldown));

    // Status tracking
    let tracker = StatusTracker::new(backend.clone(), backend.clone(), notifier.clone(), user.id);
    let _poll_loop = tracker.spawn(config.poll_interval);
    let mut state_rx = tracker.watch_state();
    let mut leave_rx = tracker.watch_leave();

    // Counterpart + conversation. Cached for the whole session.
    let resolver = CounterpartyResolver::new(backend.clone());
    let session = match resolver.resolve(&user).await {
        Some(counterpart) => {
            info!("Conversation with {}", counterpart.identity.username);
            let engine = MessageSyncEngine::new(
                backend.clone(),
                backend.clone(),
                backend.clone(),
                notifier.clone(),
                user.id,
                counterpart.identity.id,
                config.fallback_refresh,
            );
            let live = engine.activate();
            Some((engine, live, counterpart))
        }
        None => {
            info!("No conversation available");
            None
        }
    };
    if let Some((engine, _, counterpart)) = &session {
        spawn_view_logger(engine, user.id, counterpart.identity.username.clone());
    }

    // Session loop: stdin commands plus tracker signals.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            result = state_rx.changed() => {
                if result.is_err() {
                    break;
                }
                info!("Application status: {:?}", *state_rx.borrow_and_update());
            }
            result = leave_rx.changed() => {
                if result.is_err() || *leave_rx.borrow_and_update() {
                    info!("Leaving the gated area");
                    break;
                }
            }
            line = lines.next_line() => {
                match line? {
                    None => break, // EOF
                    Some(line) => handle_line(line.trim(), &session).await,
                }
            }
        }
    }

    info!("Session ended");
    Ok(())
}

async fn handle_line(
    line: &str,
    session: &Option<(Arc<MessageSyncEngine>, EngineHandle, anteroom_core::counterpart::Counterpart)>,
) {
    if line.is_empty() {
        return;
    }
    let Some((engine, _, _)) = session else {
        warn!("No conversation available, message dropped");
        return;
    };

    if let Some(path) = line.strip_prefix("/attach ") {
        let path = path.trim();
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Cannot read {}: {}", path, e);
                return;
            }
        };
        let name = PathBuf::from(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".into());
        if let Err(e) = engine.send("", Some(Attachment { name, bytes })).await {
            warn!("Attachment send failed: {}", e);
        }
        return;
    }

    if let Err(e) = engine.send(line, None).await {
        warn!("Send failed: {}", e);
    }
}

/// Log each new message as the merged view advances.
fn spawn_view_logger(engine: &Arc<MessageSyncEngine>, self_id: uuid::Uuid, peer: String) {
    let mut view_rx = engine.watch_messages();
    tokio::spawn(async move {
        let mut seen = 0usize;
        while view_rx.changed().await.is_ok() {
            let view = view_rx.borrow_and_update().clone();
            for msg in view.iter().skip(seen) {
                let who = if msg.sender_id == self_id { "me" } else { peer.as_str() };
                let body = if msg.content.is_empty() {
                    msg.attachment_url.as_deref().unwrap_or("<empty>")
                } else {
                    &msg.content
                };
                info!("[{}] {}: {}", msg.created_at.format("%H:%M:%S"), who, body);
            }
            seen = view.len();
        }
    });
}
