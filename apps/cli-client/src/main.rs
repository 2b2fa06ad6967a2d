use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use common::MailMessage;
use gateway_client::GatewayClient;

#[derive(Debug, Parser)]
#[command(name = "rfmail")]
#[command(about = "Client for RFMailNet store-and-forward gateways")]
struct Cli {
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    gateway_url: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Send {
        #[arg(long)]
        dest: String,
        #[arg(long)]
        body: String,
        #[arg(long, default_value_t = 5)]
        ttl: u32,
        #[arg(long)]
        msgid: Option<String>,
        #[arg(long)]
        origin: Option<String>,
    },
    Health,
    Routes,
    Inbox,
    Read {
        msgid: String,
    },
    Outbox,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = GatewayClient::new(&cli.gateway_url);

    match cli.command {
        Commands::Send {
            dest,
            body,
            ttl,
            msgid,
            origin,
        } => {
            let msgid = msgid.unwrap_or_else(gateway_client::generate_msgid);
            let mut msg = MailMessage::new(msgid, &dest, ttl).with_body(body);
            if let Some(origin) = origin {
                msg = msg.with_origin(origin);
            }

            let receipt = client.stage_message(&msg).await?;
            if let Some(error) = receipt.error {
                bail!("gateway refused the message: {error}");
            }
            println!("staged message {} for {}", receipt.msgid, dest);
        }
        Commands::Health => {
            let health = client.health().await?;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
        Commands::Routes => {
            let routes = client.routes().await?;
            println!("{}", serde_json::to_string_pretty(&routes)?);
        }
        Commands::Inbox => {
            let entries = client.inbox().await?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Commands::Read { msgid } => {
            let msg = client.read_message(&msgid).await?;
            println!("{}", serde_json::to_string_pretty(&msg)?);
        }
        Commands::Outbox => {
            let pending = client.outbox().await?;
            println!("{}", serde_json::to_string_pretty(&pending)?);
        }
    }

    Ok(())
}
