//! `mentorchat presence` and `mentorchat rooms`: one-shot queries

use clap::Args;
use mentorchat_core::{ChatBackend, PresenceTracker, SeenReconciler, UserId};
use mentorchat_net::HubUrl;

use crate::error::Result;

#[derive(Args, Debug)]
#[command(about = "Show a user's presence")]
pub struct PresenceArgs {
    /// Hub to connect to (mentorchat://host:port/token)
    #[arg(long)]
    pub hub: HubUrl,

    pub user: UserId,
}

#[derive(Args, Debug)]
#[command(about = "List the rooms a user takes part in")]
pub struct RoomsArgs {
    /// Hub to connect to (mentorchat://host:port/token)
    #[arg(long)]
    pub hub: HubUrl,

    pub user: UserId,
}

pub async fn presence(args: PresenceArgs) -> Result<()> {
    let backend = super::connect(&args.hub, "presence").await?;
    let record = PresenceTracker::new(backend).current(&args.user).await?;
    println!("{}: {}", args.user, record.status_line());
    Ok(())
}

pub async fn rooms(args: RoomsArgs) -> Result<()> {
    let backend = super::connect(&args.hub, "rooms").await?;
    let rooms = backend.list_rooms(&args.user).await?;
    let reconciler = SeenReconciler::new(backend);

    if rooms.is_empty() {
        println!("{} has no rooms", args.user);
    }
    for room in rooms {
        let peer = room
            .id
            .peer_of(&args.user)
            .map(|p| p.to_string())
            .unwrap_or_default();
        let unseen = reconciler.unseen_count(&room.id, &args.user).await?;
        println!(
            "{}  with {}  since {}  {}",
            room.id,
            peer,
            room.created_at.format("%Y-%m-%d"),
            unread_label(unseen)
        );
    }
    Ok(())
}

fn unread_label(unseen: usize) -> String {
    match unseen {
        0 => "all read".to_string(),
        1 => "1 unread".to_string(),
        n => format!("{} unread", n),
    }
}
