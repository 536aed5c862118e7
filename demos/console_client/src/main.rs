//! Console Client Example
//!
//! Plays the adapter side of the protocol from a terminal: every stdin line
//! is sent as a [`MessageReceive`] and every [`MessageSend`] from the host is
//! printed. The connection is retried every few seconds until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! cargo run --package console-client -- --url ws://127.0.0.1:8765/ws/console
//! cargo run --package console-client -- --group 10001 --user 42
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use gscore::core::{
    BoxedTransport, CLOSE_NORMAL, ConnectionHandler, ConnectionInfo, MessageReceive, MessageSend,
    Segment, Transport, UserType,
};
use gscore::runtime::{LoggingBuilder, wait_for_shutdown};
use gscore::transport::{WsClient, WsClientConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "console-client", about = "Chat with a gscore host from the terminal")]
struct Args {
    /// Host endpoint; the last path segment is the adapter's bot id.
    #[arg(long, default_value = "ws://127.0.0.1:8765/ws/console")]
    url: String,

    /// Sends as a group message in this group instead of a direct message.
    #[arg(long)]
    group: Option<String>,

    #[arg(long, default_value = "10000")]
    user: String,

    /// Permission level, 0 is the highest.
    #[arg(long, default_value_t = 3)]
    pm: u8,

    #[arg(long, default_value_t = 5)]
    reconnect_secs: u64,
}

impl Args {
    fn frame(&self, line: &str) -> MessageReceive {
        MessageReceive {
            bot_id: "console".into(),
            user_type: if self.group.is_some() {
                UserType::Group
            } else {
                UserType::Direct
            },
            group_id: self.group.clone(),
            user_id: self.user.clone(),
            user_pm: self.pm,
            content: vec![Segment::text(line)],
            ..Default::default()
        }
    }
}

/// Prints host replies.
struct Printer;

#[async_trait]
impl ConnectionHandler for Printer {
    async fn on_connect(&self, bot_id: &str, _info: ConnectionInfo, _t: BoxedTransport) -> u64 {
        info!(bot_id = %bot_id, "Connected, type a message and press enter");
        0
    }

    async fn on_message(&self, _bot_id: &str, data: &[u8]) {
        match MessageSend::decode(data) {
            Ok(message) => {
                let target = message.target_id.as_deref().unwrap_or("-");
                println!("[{} -> {}] {}", message.bot_id, target, message.plain_text());
            }
            Err(e) => warn!(error = %e, "Host sent an undecodable frame"),
        }
    }

    async fn on_disconnect(&self, bot_id: &str, _generation: u64) {
        info!(bot_id = %bot_id, "Disconnected");
    }

    async fn on_error(&self, bot_id: &str, error: &str) {
        warn!(bot_id = %bot_id, error = %error, "Connection error");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    LoggingBuilder::new().init();
    let args = Args::parse();

    let config = WsClientConfig::new(&args.url)
        .with_reconnect_delay(Duration::from_secs(args.reconnect_secs));
    let client = WsClient::new(config, "console", Arc::new(Printer));
    let sender = client.sender();

    let shutdown = CancellationToken::new();
    let client_task = tokio::spawn(client.run(shutdown.clone()));

    let ctrl_c = wait_for_shutdown();
    tokio::pin!(ctrl_c);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => {
                    if let Err(e) = sender.send(args.frame(&line).encode()).await {
                        warn!(error = %e, "Message not queued");
                    }
                }
                None => break,
            },
            _ = &mut ctrl_c => break,
        }
    }

    sender.close(CLOSE_NORMAL).await;
    shutdown.cancel();
    client_task.await??;
    Ok(())
}
