use std::sync::Arc;

use anyhow::Result;
use ircsync::app::action::{Action, Notification};
use ircsync::app::command::{parse_command, Command};
use ircsync::app::event::AppEvent;
use ircsync::app::state::{MessageTarget, StoreState};
use ircsync::app::Store;
use ircsync::config;
use ircsync::irc::connection::ConnectParams;
use ircsync::irc::manager::IrcManager;
use ircsync::logging;
use ircsync::persist::{FileStore, Persisted};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = config::load_config()?;
    logging::init(&cfg.logging);

    let data_dir = cfg
        .storage
        .data_dir
        .clone()
        .unwrap_or_else(FileStore::default_dir);
    info!(dir = %data_dir.display(), "loading persisted state");
    let persist = Persisted::load(Box::new(FileStore::new(data_dir)));

    run(Store::new(cfg, persist)).await
}

async fn run(mut store: Store) -> Result<()> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<AppEvent>();
    let mut manager = IrcManager::new(event_tx.clone());

    // Spawn stdin input task
    let input_tx = event_tx.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if input_tx.send(AppEvent::Input(line)).is_err() {
                        break;
                    }
                }
                Ok(None) | Err(_) => {
                    let _ = input_tx.send(AppEvent::Input("/quit".to_string()));
                    break;
                }
            }
        }
    });

    // Spawn tick task (50ms)
    let tick_tx = event_tx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(50));
        loop {
            interval.tick().await;
            if tick_tx.send(AppEvent::Tick).is_err() {
                break;
            }
        }
    });

    // Spawn transcript printer
    let snapshots = store.subscribe();
    tokio::spawn(print_transcript(snapshots));

    let auto: Vec<_> = store
        .saved_servers()
        .iter()
        .filter(|s| s.auto_connect)
        .cloned()
        .collect();
    if auto.is_empty() {
        warn!("no server has auto_connect set, nothing to do");
    }
    for saved in auto {
        let (server_id, action) = store.connect_server(saved);
        store.select(server_id, MessageTarget::Server);
        execute(action, &mut manager, &event_tx).await;
    }

    // Main event loop
    loop {
        let event = event_rx.recv().await;
        let Some(event) = event else { break };

        let quitting = matches!(
            &event,
            AppEvent::Input(line) if matches!(parse_command(line), Some(Command::Quit { .. }))
        );

        let actions = store.handle_app_event(event);
        for action in actions {
            execute(action, &mut manager, &event_tx).await;
        }

        if quitting {
            manager.send_quit_all(Some(store.config().behavior.quit_message.as_str()));
            break;
        }
    }

    Ok(())
}

async fn execute(action: Action, manager: &mut IrcManager, event_tx: &mpsc::UnboundedSender<AppEvent>) {
    match action {
        Action::SendRaw { server_id, line } => {
            if let Err(e) = manager.send_raw(server_id, &line) {
                let _ = event_tx.send(AppEvent::Error {
                    server_id,
                    error: format!("Send failed: {}", e),
                });
            }
        }
        Action::Connect {
            server_id,
            host,
            port,
            tls,
            nickname,
            username,
            realname,
            // PASS goes out from the store during registration.
            password: _,
        } => {
            let params = ConnectParams {
                host,
                port,
                tls,
                nickname,
                username,
                realname,
            };
            if let Err(e) = manager.connect(server_id, params).await {
                let _ = event_tx.send(AppEvent::Error {
                    server_id,
                    error: format!("Connection failed: {:#}", e),
                });
                let _ = event_tx.send(AppEvent::Disconnected {
                    server_id,
                    reason: "connection failed".to_string(),
                });
            }
        }
        Action::Disconnect { server_id, message } => {
            manager.disconnect(server_id, message.as_deref());
        }
        Action::Notify(Notification {
            server_id,
            kind,
            title,
            body,
        }) => {
            info!(server_id, ?kind, title = %title, "{}", body);
        }
    }
}

/// Print every new message of every context as snapshots arrive.
async fn print_transcript(mut rx: watch::Receiver<Arc<StoreState>>) {
    let mut last_seen = 0u64;
    while rx.changed().await.is_ok() {
        let state = rx.borrow_and_update().clone();
        let mut fresh = Vec::new();
        for server in &state.servers {
            let contexts = std::iter::once((String::new(), &server.messages))
                .chain(server.channels.iter().map(|c| (c.name.clone(), &c.messages)))
                .chain(
                    server
                        .private_chats
                        .iter()
                        .map(|p| (p.username.clone(), &p.messages)),
                );
            for (label, messages) in contexts {
                for msg in messages.iter().filter(|m| m.id >= last_seen) {
                    fresh.push((msg.id, format!("{}{}", server.name, suffix(&label)), msg));
                }
            }
        }
        fresh.sort_by_key(|(id, _, _)| *id);
        for (id, place, msg) in fresh {
            let sender = if msg.sender.is_empty() { "*" } else { &msg.sender };
            println!("[{}] <{}> {}", place, sender, msg.content);
            last_seen = id + 1;
        }
        debug!(last_seen, "transcript updated");
    }
}

fn suffix(label: &str) -> String {
    if label.is_empty() {
        String::new()
    } else {
        format!("/{}", label)
    }
}
