//! wsrelay client
//!
//! Small interactive client for poking a running relay:
//! - Sends each `--message` (or each stdin line) as a text frame
//! - Prints every frame the server sends back

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser)]
#[command(name = "wsrelay-client")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Send messages to a wsrelay server and print the replies")]
struct Cli {
    /// Server URL
    #[arg(default_value = "ws://127.0.0.1:8080")]
    url: String,

    /// Message to send (repeatable). Reads stdin lines when absent.
    #[arg(short, long)]
    message: Vec<String>,

    /// Seconds to keep listening after the last message
    #[arg(short, long, default_value = "1")]
    wait: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (socket, _) = tokio_tungstenite::connect_async(cli.url.as_str())
        .await
        .with_context(|| format!("connecting to {}", cli.url))?;
    eprintln!("Connected to {}", cli.url);

    let (mut sink, mut source) = socket.split();

    let printer = tokio::spawn(async move {
        while let Some(frame) = source.next().await {
            match frame {
                Ok(Message::Text(text)) => println!("< {}", text.as_str()),
                Ok(Message::Close(_)) => {
                    eprintln!("Server closed the connection");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    eprintln!("Receive failed: {}", e);
                    break;
                }
            }
        }
    });

    if cli.message.is_empty() {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if line.is_empty() {
                continue;
            }
            sink.send(Message::text(line)).await?;
        }
    } else {
        for message in &cli.message {
            sink.send(Message::text(message.clone())).await?;
        }
    }

    tokio::time::sleep(Duration::from_secs(cli.wait)).await;

    let _ = sink.send(Message::Close(None)).await;
    let _ = tokio::time::timeout(Duration::from_secs(2), printer).await;

    Ok(())
}
