//! `mentorchat say`: send one message and exit

use clap::Args;
use mentorchat_core::{room, ChatBackend, Message, MessageChannel, Payload, UserId};
use mentorchat_net::HubUrl;
use std::sync::Arc;
use tracing::info;

use crate::error::Result;

#[derive(Args, Debug)]
#[command(about = "Send one message to a peer")]
pub struct SayArgs {
    /// Hub to connect to (mentorchat://host:port/token)
    #[arg(long)]
    pub hub: HubUrl,

    /// Sending user
    #[arg(long = "as", value_name = "USER")]
    pub user: UserId,

    /// Receiving user
    #[arg(long, value_name = "PEER")]
    pub to: UserId,

    /// Message text
    #[arg(required_unless_present = "image", conflicts_with = "image")]
    pub text: Option<String>,

    /// Send an image by URL instead of text
    #[arg(long, value_name = "URL")]
    pub image: Option<String>,

    /// Caption for the image
    #[arg(long, requires = "image")]
    pub caption: Option<String>,
}

impl SayArgs {
    fn payload(&self) -> Payload {
        match &self.image {
            Some(url) => Payload::image(url.clone(), self.caption.clone()),
            None => Payload::text(self.text.clone().unwrap_or_default()),
        }
    }
}

pub async fn run(args: SayArgs) -> Result<()> {
    let backend = super::connect(&args.hub, "say").await?;
    let message = send(backend, &args).await?;
    info!(room_id = %message.room_id, key = %message.key, "Message sent");
    println!("sent #{} to {}", message.key, message.room_id);
    Ok(())
}

async fn send(backend: Arc<dyn ChatBackend>, args: &SayArgs) -> Result<Message> {
    let room_id = room::resolve(&args.user, &args.to)?;
    backend.ensure_room(&room_id).await?;
    let channel = MessageChannel::new(backend);
    Ok(channel.send(&room_id, &args.user, args.payload()).await?)
}
