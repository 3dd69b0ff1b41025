//! Send one message to a Sense conversation and stream the reply to stdout.
//!
//! Ctrl-C cancels the in-flight reply; whatever arrived so far is kept.

use std::io::Write as _;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use sense_stream::observability::init_observability;
use sense_stream::prelude::*;
use sense_stream::{HttpTransport, Role, TranscriptEntry};
use tracing::debug;

#[derive(Debug, Parser)]
#[command(name = "sense-chat", version, about = "Chat with the Sense underwriting assistant")]
struct Cli {
    /// Conversation (chat) id to post into.
    #[arg(long, short = 'c', env = "SENSE_CONVERSATION_ID")]
    conversation: String,

    /// Backend base URL.
    #[arg(long, env = "SENSE_API_BASE_URL")]
    base_url: Option<String>,

    /// Bearer token.
    #[arg(long, env = "SENSE_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Print the stored conversation before sending.
    #[arg(long)]
    history: bool,

    /// Print the final reply as JSON instead of streaming text.
    #[arg(long)]
    json: bool,

    /// Message text; multiple words are joined with spaces.
    #[arg(required = true)]
    message: Vec<String>,
}

impl Cli {
    fn client_config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = ClientConfig::from_env().context("reading SENSE_API_* settings")?;
        if let Some(base_url) = &self.base_url {
            config = config.base_url(base_url.clone());
        }
        if let Some(token) = &self.token {
            config = config.token(token.clone());
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    init_observability();
    let cli = Cli::parse();

    let transport = Arc::new(HttpTransport::new(cli.client_config()?)?);
    let conversation_id = ConversationId::new(cli.conversation.clone());

    let mut transcript = if cli.history {
        let messages = transport
            .fetch_history(&conversation_id)
            .await
            .with_context(|| format!("loading history of {conversation_id}"))?;
        let transcript = Transcript::from_history(conversation_id.clone(), messages);
        for entry in transcript.entries() {
            print_entry(entry);
        }
        transcript
    } else {
        Transcript::new(conversation_id.clone())
    };

    let text = cli.message.join(" ");
    transcript.push_user(text.clone());
    let client = StreamingReplyClient::new(transport);
    let exchange = client.send(conversation_id, text)?;
    debug!(message_id = %exchange.id(), "exchange started");

    let reply = stream_reply(exchange, !cli.json).await?;
    let status = reply.status;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&reply)?);
    }
    transcript.push_reply(reply)?;

    if !cli.json
        && let Some(draft) = transcript.latest_email_draft()
    {
        println!("\n--- email draft ---");
        println!("To: {}\nSubject: {}\n\n{}", draft.to, draft.subject, draft.body);
    }

    if status == MessageStatus::Failed {
        anyhow::bail!("reply did not complete");
    }
    Ok(())
}

/// Echoes the reply as it grows and returns its terminal state.
async fn stream_reply(exchange: Exchange, echo: bool) -> anyhow::Result<AccumulatingMessage> {
    let cancel = exchange.cancel_handle();
    let mut message = exchange.message();
    let mut stdout = std::io::stdout();
    let mut printed = 0;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("listening for Ctrl-C")?;
                cancel.cancel();
            }
            update = message.changed() => {
                let Some(snapshot) = update else { break };
                if echo {
                    // Text only grows, so the printed prefix stays valid.
                    stdout.write_all(snapshot.text[printed..].as_bytes())?;
                    stdout.flush()?;
                    printed = snapshot.text.len();
                }
                if snapshot.status.is_terminal() {
                    break;
                }
            }
        }
    }
    if echo {
        println!();
    }
    Ok(exchange.finish().await)
}

fn print_entry(entry: &TranscriptEntry) {
    let who = match entry.role {
        Role::User => "you",
        Role::Assistant => "sense",
    };
    println!("{who}> {}", entry.text);
}
