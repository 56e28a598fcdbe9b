use crate::app::event::{AppEvent, ServerId};
use crate::irc::connection::{spawn_connection, ConnectParams, IrcConnection};
use anyhow::{Context, Result};
use irc::proto::Message;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Owns one transport per server and writes raw lines to them.
pub struct IrcManager {
    connections: HashMap<ServerId, IrcConnection>,
    event_tx: mpsc::UnboundedSender<AppEvent>,
}

impl IrcManager {
    pub fn new(event_tx: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self {
            connections: HashMap::new(),
            event_tx,
        }
    }

    pub async fn connect(&mut self, server_id: ServerId, params: ConnectParams) -> Result<()> {
        let host = params.host.clone();
        let conn = spawn_connection(server_id, params, self.event_tx.clone())
            .await
            .with_context(|| format!("Failed to connect to {}", host))?;
        self.connections.insert(server_id, conn);
        Ok(())
    }

    pub fn is_connected(&self, server_id: ServerId) -> bool {
        self.connections.contains_key(&server_id)
    }

    pub fn disconnect(&mut self, server_id: ServerId, message: Option<&str>) {
        if let Some(conn) = self.connections.remove(&server_id) {
            let _ = conn.sender.send_quit(message.unwrap_or("Leaving"));
        }
    }

    /// Parse and send one protocol line. Tags survive the round trip.
    pub fn send_raw(&self, server_id: ServerId, line: &str) -> Result<()> {
        let Some(conn) = self.connections.get(&server_id) else {
            tracing::debug!(server_id, "dropping line for unconnected server");
            return Ok(());
        };
        let message = parse_line(line)?;
        tracing::trace!(server_id, line, "send");
        conn.sender.send(message)?;
        Ok(())
    }

    pub fn send_quit_all(&mut self, message: Option<&str>) {
        let msg = message.unwrap_or("Leaving");
        for (_id, conn) in self.connections.drain() {
            let _ = conn.sender.send_quit(msg);
        }
    }
}

fn parse_line(line: &str) -> Result<Message> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    trimmed
        .parse::<Message>()
        .with_context(|| format!("Invalid outbound line: {}", trimmed))
}
