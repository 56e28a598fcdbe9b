use crate::app::event::{AppEvent, ServerId};
use crate::irc::decode::RawLine;
use anyhow::Result;
use futures::StreamExt;
use irc::client::prelude::*;
use irc::client::ClientStream;
use tokio::sync::mpsc;
use tracing::{trace, warn};

pub struct IrcConnection {
    pub server_id: ServerId,
    pub sender: irc::client::Sender,
}

/// Where and as whom to connect.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub nickname: String,
    pub username: String,
    pub realname: String,
}

/// Open the socket and start forwarding lines as [`AppEvent::Irc`].
///
/// Registration (`CAP LS`, `PASS`, `NICK`, `USER`) is driven by the store
/// once [`AppEvent::Connected`] arrives, so the client never calls
/// `identify()` itself.
pub async fn spawn_connection(
    server_id: ServerId,
    params: ConnectParams,
    event_tx: mpsc::UnboundedSender<AppEvent>,
) -> Result<IrcConnection> {
    let config = Config {
        server: Some(params.host),
        port: Some(params.port),
        use_tls: Some(params.tls),
        alt_nicks: vec![format!("{}_", params.nickname)],
        nickname: Some(params.nickname),
        username: Some(params.username),
        realname: Some(params.realname),
        ..Config::default()
    };

    let mut client = Client::from_config(config).await?;
    let sender = client.sender();
    let stream = client.stream()?;

    let _ = event_tx.send(AppEvent::Connected { server_id });
    tokio::spawn(forward_lines(server_id, stream, event_tx));

    Ok(IrcConnection { server_id, sender })
}

/// Tokenize and hand over every received line until the stream ends.
async fn forward_lines(
    server_id: ServerId,
    mut stream: ClientStream,
    event_tx: mpsc::UnboundedSender<AppEvent>,
) {
    let reason = loop {
        match stream.next().await {
            Some(Ok(message)) => {
                trace!(server_id, line = %message.to_string().trim_end(), "recv");
                let line = RawLine::from(&message);
                if event_tx.send(AppEvent::Irc { server_id, line }).is_err() {
                    // store is gone, nobody to tell
                    return;
                }
            }
            Some(Err(e)) => {
                warn!(server_id, error = %e, "read failed");
                break e.to_string();
            }
            None => break "Connection closed".to_string(),
        }
    };
    let _ = event_tx.send(AppEvent::Disconnected { server_id, reason });
}
