use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Poke at a running camera relay from the terminal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one JSON object to the data hub
    Send {
        #[arg(short, long, default_value = "ws://localhost:3001")]
        url: String,
        /// JSON object to broadcast
        message: String,
    },
    /// Print every message broadcast by the data hub
    Tail {
        #[arg(short, long, default_value = "ws://localhost:3001")]
        url: String,
    },
    /// Subscribe to the stream relay and report frames
    Frames {
        #[arg(short, long, default_value = "ws://localhost:3000")]
        url: String,
        /// Stop after this many frames
        #[arg(short, long)]
        count: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Send { url, message } => {
            let value: Value = serde_json::from_str(&message)?;
            if !value.is_object() {
                return Err("message must be a JSON object".into());
            }
            let (mut ws, _) = connect_async(url.as_str()).await?;
            ws.send(Message::Text(value.to_string().into())).await?;
            ws.close(None).await?;
        }
        Commands::Tail { url } => {
            let (mut ws, _) = connect_async(url.as_str()).await?;
            while let Some(msg) = ws.next().await {
                match msg? {
                    Message::Text(text) => print_json(text.as_str())?,
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
        Commands::Frames { url, count } => {
            let (mut ws, _) = connect_async(url.as_str()).await?;
            let mut seen = 0u64;
            while let Some(msg) = ws.next().await {
                match msg? {
                    Message::Binary(frame) => {
                        seen += 1;
                        println!("frame {:>6}  {:>8} bytes", seen, frame.len());
                        if count.is_some_and(|limit| seen >= limit) {
                            break;
                        }
                    }
                    Message::Text(text) => {
                        eprint!("notice: ");
                        print_json(text.as_str())?;
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            ws.close(None).await.ok();
        }
    }

    Ok(())
}

fn print_json(text: &str) -> Result<(), Box<dyn std::error::Error>> {
    match serde_json::from_str::<Value>(text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
