//! `mentorchat tail`: follow a conversation as one participant
//!
//! Keeps a chat session open: the user shows as online, incoming messages
//! are printed and marked seen, and the peer's presence changes are shown.

use std::collections::HashSet;

use chrono::{Local, NaiveDate};
use clap::Args;
use mentorchat_core::{ChatSession, Message, MessageKey, SessionEvent, SessionOptions, UserId};
use mentorchat_net::HubUrl;
use tracing::info;

use crate::error::Result;

#[derive(Args, Debug)]
#[command(about = "Follow a conversation, marking incoming messages seen")]
pub struct TailArgs {
    /// Hub to connect to (mentorchat://host:port/token)
    #[arg(long)]
    pub hub: HubUrl,

    /// Viewing user
    #[arg(long = "as", value_name = "USER")]
    pub user: UserId,

    /// The other participant
    #[arg(long, value_name = "PEER")]
    pub with: UserId,

    /// Leave incoming messages unseen
    #[arg(long)]
    pub no_mark_seen: bool,
}

pub async fn run(args: TailArgs) -> Result<()> {
    let backend = super::connect(&args.hub, "tail").await?;
    let options = SessionOptions {
        auto_mark_seen: !args.no_mark_seen,
    };
    let mut session =
        ChatSession::open_with(backend, args.user.clone(), args.with.clone(), options).await?;
    println!("-- {} with {} --", session.room_id(), args.with);

    let mut transcript = Transcript::new(args.user);
    loop {
        tokio::select! {
            event = session.next_event() => match event {
                Some(SessionEvent::Messages { messages, .. }) => {
                    for line in transcript.render(&messages) {
                        println!("{}", line);
                    }
                }
                Some(SessionEvent::PeerPresence(record)) => {
                    println!("-- {}: {} --", args.with, record.status_line());
                }
                None => {
                    info!("Hub connection ended");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.close().await?;
    Ok(())
}

/// Turns successive full snapshots into printable lines
///
/// A date line goes out whenever the local day of the next printed message
/// differs from the previous one.
struct Transcript {
    viewer: UserId,
    printed: HashSet<MessageKey>,
    acknowledged: HashSet<MessageKey>,
    day: Option<NaiveDate>,
}

impl Transcript {
    fn new(viewer: UserId) -> Self {
        Self {
            viewer,
            printed: HashSet::new(),
            acknowledged: HashSet::new(),
            day: None,
        }
    }

    fn render(&mut self, messages: &[Message]) -> Vec<String> {
        let mut lines = Vec::new();
        for message in messages {
            let own = message.sender_id == self.viewer;
            if self.printed.insert(message.key) {
                if let Some(day) = local_day(message) {
                    if self.day != Some(day) {
                        self.day = Some(day);
                        lines.push(format!("== {} ==", day.format("%A, %B %-d, %Y")));
                    }
                }
                lines.push(format_line(message));
                if own && message.seen {
                    self.acknowledged.insert(message.key);
                }
            } else if own && message.seen && self.acknowledged.insert(message.key) {
                lines.push(format!("   seen: {}", message.payload.preview()));
            }
        }
        lines
    }
}

fn local_day(message: &Message) -> Option<NaiveDate> {
    message
        .sent_at()
        .map(|t| t.with_timezone(&Local).date_naive())
}

fn format_line(message: &Message) -> String {
    let time = message
        .sent_at()
        .map(|t| t.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_default();
    format!("[{}] {}: {}", time, message.sender_id, message.payload.preview())
}
