//! TCP client serving [`ChatBackend`] from a remote hub
//!
//! Requests are matched to replies by id. Each watch owns a local
//! `watch` channel fed from hub snapshots; dropping the last receiver sends
//! `Unwatch`. When the connection ends every pending call fails and every
//! watch sender is dropped, so feeds end while keeping their last value.
//!
//! A dedicated task reads the socket, so a frame is never abandoned half-read
//! when the connection loop wakes for something else.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mentorchat_core::{
    ChatBackend, Message, MessageKey, MessageList, NewMessage, PresenceRecord, Room, RoomId,
    UserId,
};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::hub_url::HubUrl;
use crate::protocol::{Frame, Reply, Request, WatchTarget};

/// Hub is considered dead after this long without any frame
const HUB_DEAD_TIMEOUT_MS: u64 = 15_000;

/// Handshake must complete within this window
const HANDSHAKE_TIMEOUT_MS: u64 = 5_000;

/// Decoded frames buffered between the reader task and the connection loop
const INBOUND_QUEUE: usize = 64;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

enum ClientCommand {
    Send(Frame),
    Disconnect,
}

enum SlotSender {
    Room(watch::Sender<MessageList>),
    Presence(watch::Sender<PresenceRecord>),
}

struct WatchSlot {
    sender: SlotSender,
    closer: JoinHandle<()>,
}

/// State shared with the connection task
struct Shared {
    connected: AtomicBool,
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    watches: Mutex<HashMap<u64, WatchSlot>>,
}

impl Shared {
    /// Fail every pending call and end every watch
    async fn tear_down(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.pending.lock().await.clear();
        for (_, slot) in self.watches.lock().await.drain() {
            slot.closer.abort();
        }
    }
}

/// Backend handle talking to a hub
pub struct RemoteBackend {
    shared: Arc<Shared>,
    cmd_tx: mpsc::Sender<ClientCommand>,
    next_id: AtomicU64,
    server: String,
    connection: JoinHandle<()>,
}

impl RemoteBackend {
    /// Connect to a hub and complete the handshake
    pub async fn connect(url: &HubUrl, client: impl Into<String>) -> Result<Self> {
        let addr = url.socket_addr();
        info!(addr = %addr, "Connecting to hub");

        let stream = TcpStream::connect(addr).await?;
        let (mut reader, mut writer) = tokio::io::split(stream);

        write_frame(
            &mut writer,
            &Frame::Hello {
                token: url.token.clone(),
                client: client.into(),
            },
        )
        .await?;

        let handshake = tokio::time::timeout(
            Duration::from_millis(HANDSHAKE_TIMEOUT_MS),
            read_frame(&mut reader),
        )
        .await
        .map_err(|_| Error::Protocol("Handshake timed out".into()))?;

        let server = match handshake? {
            Frame::Welcome { server } => server,
            Frame::Rejected { reason } => {
                warn!(reason = %reason, "Hub rejected connection");
                return Err(Error::Rejected(reason));
            }
            _ => return Err(Error::Protocol("Expected Welcome".into())),
        };

        let shared = Arc::new(Shared {
            connected: AtomicBool::new(true),
            pending: Mutex::new(HashMap::new()),
            watches: Mutex::new(HashMap::new()),
        });

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let connection = tokio::spawn(connection_task(
            reader,
            writer,
            shared.clone(),
            cmd_tx.clone(),
            cmd_rx,
        ));

        info!(server = %server, "Connected to hub");

        Ok(RemoteBackend {
            shared,
            cmd_tx,
            next_id: AtomicU64::new(1),
            server,
            connection,
        })
    }

    /// Server name from the handshake
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Get current connection state
    pub fn connection_state(&self) -> ConnectionState {
        if self.shared.connected.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Disconnect from the hub
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(ClientCommand::Disconnect).await;
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn send(&self, frame: Frame) -> Result<()> {
        self.cmd_tx
            .send(ClientCommand::Send(frame))
            .await
            .map_err(|_| Error::NotConnected)
    }

    async fn request(&self, request: Request) -> Result<Reply> {
        let request_id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(request_id, tx);

        // Teardown may have run before the insert
        if !self.shared.connected.load(Ordering::SeqCst) {
            self.shared.pending.lock().await.remove(&request_id);
            return Err(Error::NotConnected);
        }

        if let Err(e) = self.send(Frame::Request { request_id, request }).await {
            self.shared.pending.lock().await.remove(&request_id);
            return Err(e);
        }

        match rx.await.map_err(|_| Error::ConnectionClosed)? {
            Reply::Failed { reason } => Err(Error::Remote(reason)),
            reply => Ok(reply),
        }
    }

    /// Register a local channel, ask the hub to feed it, wait for the first value
    async fn open_watch<T>(
        &self,
        target: WatchTarget,
        initial: T,
        wrap: fn(watch::Sender<T>) -> SlotSender,
    ) -> Result<watch::Receiver<T>>
    where
        T: Send + Sync + 'static,
    {
        let watch_id = self.next_id();
        let (tx, mut rx) = watch::channel(initial);

        let closer = tokio::spawn(close_watch(
            watch_id,
            tx.clone(),
            self.shared.clone(),
            self.cmd_tx.clone(),
        ));
        self.shared.watches.lock().await.insert(
            watch_id,
            WatchSlot {
                sender: wrap(tx),
                closer,
            },
        );

        if !self.shared.connected.load(Ordering::SeqCst) {
            if let Some(slot) = self.shared.watches.lock().await.remove(&watch_id) {
                slot.closer.abort();
            }
            return Err(Error::NotConnected);
        }

        self.send(Frame::Watch { watch_id, target }).await?;

        rx.changed()
            .await
            .map_err(|_| Error::Remote(format!("watch {} was refused", watch_id)))?;
        Ok(rx)
    }
}

impl Drop for RemoteBackend {
    fn drop(&mut self) {
        self.connection.abort();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let shared = self.shared.clone();
            handle.spawn(async move { shared.tear_down().await });
        }
    }
}

fn unexpected(reply: Reply) -> mentorchat_core::Error {
    Error::Protocol(format!("Unexpected reply: {:?}", reply)).into()
}

#[async_trait]
impl ChatBackend for RemoteBackend {
    async fn append_message(
        &self,
        room_id: &RoomId,
        message: NewMessage,
    ) -> mentorchat_core::Result<Message> {
        let request = Request::AppendMessage {
            room_id: room_id.clone(),
            message,
        };
        match self.request(request).await? {
            Reply::Appended { message } => Ok(message),
            other => Err(unexpected(other)),
        }
    }

    async fn load_messages(&self, room_id: &RoomId) -> mentorchat_core::Result<Vec<Message>> {
        let request = Request::LoadMessages {
            room_id: room_id.clone(),
        };
        match self.request(request).await? {
            Reply::Messages { messages } => Ok(messages),
            other => Err(unexpected(other)),
        }
    }

    async fn set_seen(
        &self,
        room_id: &RoomId,
        keys: &[MessageKey],
    ) -> mentorchat_core::Result<usize> {
        let request = Request::SetSeen {
            room_id: room_id.clone(),
            keys: keys.to_vec(),
        };
        match self.request(request).await? {
            Reply::SeenUpdated { changed } => Ok(changed),
            other => Err(unexpected(other)),
        }
    }

    async fn put_presence(
        &self,
        user_id: &UserId,
        record: PresenceRecord,
    ) -> mentorchat_core::Result<()> {
        let request = Request::PutPresence {
            user_id: user_id.clone(),
            record,
        };
        match self.request(request).await? {
            Reply::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn load_presence(
        &self,
        user_id: &UserId,
    ) -> mentorchat_core::Result<Option<PresenceRecord>> {
        let request = Request::LoadPresence {
            user_id: user_id.clone(),
        };
        match self.request(request).await? {
            Reply::Presence { record } => Ok(record),
            other => Err(unexpected(other)),
        }
    }

    async fn ensure_room(&self, room_id: &RoomId) -> mentorchat_core::Result<bool> {
        let request = Request::EnsureRoom {
            room_id: room_id.clone(),
        };
        match self.request(request).await? {
            Reply::RoomEnsured { created } => Ok(created),
            other => Err(unexpected(other)),
        }
    }

    async fn list_rooms(&self, user_id: &UserId) -> mentorchat_core::Result<Vec<Room>> {
        let request = Request::ListRooms {
            user_id: user_id.clone(),
        };
        match self.request(request).await? {
            Reply::Rooms { rooms } => Ok(rooms),
            other => Err(unexpected(other)),
        }
    }

    async fn watch_room(
        &self,
        room_id: &RoomId,
    ) -> mentorchat_core::Result<watch::Receiver<MessageList>> {
        let target = WatchTarget::Room {
            room_id: room_id.clone(),
        };
        Ok(self
            .open_watch(target, Arc::new(Vec::new()), SlotSender::Room)
            .await?)
    }

    async fn watch_presence(
        &self,
        user_id: &UserId,
    ) -> mentorchat_core::Result<watch::Receiver<PresenceRecord>> {
        let target = WatchTarget::Presence {
            user_id: user_id.clone(),
        };
        Ok(self
            .open_watch(target, PresenceRecord::unknown(), SlotSender::Presence)
            .await?)
    }
}

/// Wait until the last receiver is gone, then release the hub side
async fn close_watch<T>(
    watch_id: u64,
    sender: watch::Sender<T>,
    shared: Arc<Shared>,
    cmd_tx: mpsc::Sender<ClientCommand>,
) {
    sender.closed().await;
    shared.watches.lock().await.remove(&watch_id);
    let _ = cmd_tx
        .send(ClientCommand::Send(Frame::Unwatch { watch_id }))
        .await;
    debug!(watch_id, "Watch released");
}

/// Read frames until the socket fails or the loop goes away
async fn reader_task(mut reader: ReadHalf<TcpStream>, inbound: mpsc::Sender<Result<Frame>>) {
    loop {
        let result = read_frame(&mut reader).await;
        let failed = result.is_err();
        if inbound.send(result).await.is_err() || failed {
            return;
        }
    }
}

/// Main connection task
async fn connection_task(
    reader: ReadHalf<TcpStream>,
    mut writer: WriteHalf<TcpStream>,
    shared: Arc<Shared>,
    cmd_tx: mpsc::Sender<ClientCommand>,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
) {
    let check_interval = Duration::from_millis(1000);
    let mut last_frame = Instant::now();
    let mut chunks = Chunks::default();

    let (inbound_tx, mut inbound) = mpsc::channel(INBOUND_QUEUE);
    let reader = tokio::spawn(reader_task(reader, inbound_tx));

    loop {
        tokio::select! {
            // Incoming frame from the hub
            result = inbound.recv() => {
                match result {
                    Some(Ok(Frame::ServerShutdown)) => {
                        info!("Hub is shutting down");
                        break;
                    }
                    Some(Ok(frame)) => {
                        last_frame = Instant::now();
                        handle_hub_frame(frame, &shared, &cmd_tx, &mut chunks).await;
                    }
                    Some(Err(Error::ConnectionClosed)) | None => {
                        debug!("Hub closed connection");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Read error");
                        break;
                    }
                }
            }

            // Outgoing command
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ClientCommand::Send(frame)) => {
                        match write_frame(&mut writer, &frame).await {
                            Ok(()) => {}
                            // Nothing was written; only this call fails
                            Err(Error::Protocol(reason)) => {
                                warn!(reason = %reason, "Frame not sent");
                                refuse(frame, reason, &shared).await;
                            }
                            Err(e) => {
                                warn!(error = %e, "Write error");
                                break;
                            }
                        }
                    }
                    Some(ClientCommand::Disconnect) | None => {
                        debug!("Disconnect requested");
                        break;
                    }
                }
            }

            // Liveness watchdog
            _ = tokio::time::sleep(check_interval) => {
                let elapsed = last_frame.elapsed().as_millis() as u64;
                if elapsed > HUB_DEAD_TIMEOUT_MS {
                    warn!(elapsed_ms = elapsed, "Hub appears dead");
                    break;
                }
            }
        }
    }

    reader.abort();
    shared.tear_down().await;
    info!("Disconnected from hub");
}

/// Fail the call behind an outgoing frame that could not be encoded
async fn refuse(frame: Frame, reason: String, shared: &Shared) {
    match frame {
        Frame::Request { request_id, .. } => {
            if let Some(tx) = shared.pending.lock().await.remove(&request_id) {
                let _ = tx.send(Reply::Failed { reason });
            }
        }
        Frame::Watch { watch_id, .. } => {
            if let Some(slot) = shared.watches.lock().await.remove(&watch_id) {
                slot.closer.abort();
            }
        }
        _ => {}
    }
}

/// Leading runs of message lists still waiting for their closing frame
#[derive(Default)]
struct Chunks {
    runs: HashMap<u64, Vec<Message>>,
}

impl Chunks {
    fn push(&mut self, id: u64, messages: Vec<Message>) {
        self.runs.entry(id).or_default().extend(messages);
    }

    /// Complete list for `id`, ending with `rest`
    fn finish(&mut self, id: u64, rest: Vec<Message>) -> Vec<Message> {
        match self.runs.remove(&id) {
            Some(mut messages) => {
                messages.extend(rest);
                messages
            }
            None => rest,
        }
    }

    fn discard(&mut self, id: u64) {
        self.runs.remove(&id);
    }
}

/// Handle a frame from the hub
async fn handle_hub_frame(
    frame: Frame,
    shared: &Shared,
    cmd_tx: &mpsc::Sender<ClientCommand>,
    chunks: &mut Chunks,
) {
    match frame {
        Frame::MessageChunk { id, messages } => chunks.push(id, messages),
        Frame::Reply { request_id, reply } => {
            let reply = match reply {
                Reply::Messages { messages } => Reply::Messages {
                    messages: chunks.finish(request_id, messages),
                },
                other => {
                    chunks.discard(request_id);
                    other
                }
            };
            match shared.pending.lock().await.remove(&request_id) {
                Some(tx) => {
                    let _ = tx.send(reply);
                }
                None => debug!(request_id, "Reply for unknown request"),
            }
        }
        Frame::RoomSnapshot { watch_id, messages } => {
            let messages = chunks.finish(watch_id, messages);
            let watches = shared.watches.lock().await;
            match watches.get(&watch_id).map(|slot| &slot.sender) {
                Some(SlotSender::Room(tx)) => {
                    tx.send_replace(Arc::new(messages));
                }
                Some(SlotSender::Presence(_)) => {
                    warn!(watch_id, "Room snapshot on a presence watch");
                }
                None => debug!(watch_id, "Snapshot for released watch"),
            }
        }
        Frame::PresenceSnapshot { watch_id, record } => {
            let watches = shared.watches.lock().await;
            match watches.get(&watch_id).map(|slot| &slot.sender) {
                Some(SlotSender::Presence(tx)) => {
                    tx.send_replace(record);
                }
                Some(SlotSender::Room(_)) => {
                    warn!(watch_id, "Presence snapshot on a room watch");
                }
                None => debug!(watch_id, "Snapshot for released watch"),
            }
        }
        Frame::WatchFailed { watch_id, reason } => {
            warn!(watch_id, reason = %reason, "Watch failed");
            chunks.discard(watch_id);
            if let Some(slot) = shared.watches.lock().await.remove(&watch_id) {
                slot.closer.abort();
                // The hub may still be forwarding
                let _ = cmd_tx.try_send(ClientCommand::Send(Frame::Unwatch { watch_id }));
            }
        }
        Frame::Ping => {
            let _ = cmd_tx.try_send(ClientCommand::Send(Frame::Pong));
        }
        Frame::Pong => {
            debug!("Received pong");
        }
        _ => {
            debug!("Ignoring unexpected frame type");
        }
    }
}
