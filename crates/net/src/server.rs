//! TCP hub server
//!
//! Serves a [`ChatBackend`] to remote clients. Each connection gets its own
//! writer task; requests on one connection are answered in order, and every
//! watch runs as a forwarding task until the client unwatches or leaves.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mentorchat_core::{ChatBackend, Message, MessageList, PresenceRecord};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::frame::{read_frame, split_messages, write_frame};
use crate::hub_url::HubUrl;
use crate::protocol::{Frame, Reply, Request, WatchTarget};

/// Maximum number of connected peers
const MAX_PEERS: usize = 64;

/// Maximum live watches per connection
const MAX_WATCHES_PER_PEER: usize = 128;

/// Keepalive interval in milliseconds
const HEARTBEAT_INTERVAL_MS: u64 = 5000;

/// Outgoing frame queue per peer
const PEER_QUEUE: usize = 64;

/// Connected peer state
struct Peer {
    client: String,
    tx: mpsc::Sender<Frame>,
}

/// Server state shared across tasks
struct ServerState {
    token: String,
    peers: HashMap<Uuid, Peer>,
}

/// Hub server handle
pub struct HubServer {
    addr: SocketAddr,
    state: Arc<RwLock<ServerState>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl HubServer {
    /// Bind `addr` and start serving `backend`
    pub async fn start(
        addr: SocketAddr,
        backend: Arc<dyn ChatBackend>,
        token: String,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, "Hub server started");

        let (shutdown_tx, _) = broadcast::channel(1);
        let state = Arc::new(RwLock::new(ServerState {
            token,
            peers: HashMap::new(),
        }));

        // Spawn accept loop
        tokio::spawn(accept_loop(
            listener,
            state.clone(),
            backend,
            shutdown_tx.clone(),
        ));

        // Spawn heartbeat task
        tokio::spawn(heartbeat_task(state.clone(), shutdown_tx.subscribe()));

        Ok(HubServer {
            addr: bound_addr,
            state,
            shutdown_tx,
        })
    }

    /// Get the server's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// URL clients use to reach this hub
    pub async fn url(&self) -> HubUrl {
        HubUrl::from_addr(self.addr, self.state.read().await.token.clone())
    }

    /// Number of connected peers
    pub async fn peer_count(&self) -> usize {
        self.state.read().await.peers.len()
    }

    /// Names clients gave in their handshake
    pub async fn peer_names(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .peers
            .values()
            .map(|p| p.client.clone())
            .collect()
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        info!("Hub shutdown initiated");
    }
}

/// Accept incoming connections
async fn accept_loop(
    listener: TcpListener,
    state: Arc<RwLock<ServerState>>,
    backend: Arc<dyn ChatBackend>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            state.clone(),
                            backend.clone(),
                            shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

/// Handle a single client connection
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<RwLock<ServerState>>,
    backend: Arc<dyn ChatBackend>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (mut reader, writer) = tokio::io::split(stream);
    let (tx, rx) = mpsc::channel(PEER_QUEUE);
    let writer_handle = tokio::spawn(writer_task(writer, rx));

    // First frame must be Hello
    let peer_id = match handle_hello(&mut reader, &state, &tx).await {
        Ok(id) => id,
        Err(e) => {
            warn!(addr = %addr, error = %e, "Handshake failed");
            let _ = tx
                .send(Frame::Rejected {
                    reason: e.to_string(),
                })
                .await;
            close_writer(tx, writer_handle).await;
            return;
        }
    };

    info!(addr = %addr, peer_id = %peer_id, "Peer connected");

    let mut watches: HashMap<u64, JoinHandle<()>> = HashMap::new();

    // Read loop
    loop {
        tokio::select! {
            frame = read_frame(&mut reader) => {
                match frame {
                    Ok(frame) => {
                        handle_frame(frame, peer_id, backend.as_ref(), &tx, &mut watches).await;
                    }
                    Err(Error::ConnectionClosed) => {
                        debug!(peer_id = %peer_id, "Connection closed");
                        break;
                    }
                    Err(e) => {
                        warn!(peer_id = %peer_id, error = %e, "Read error");
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                let _ = tx.send(Frame::ServerShutdown).await;
                break;
            }
        }
    }

    // Cleanup
    for (_, handle) in watches.drain() {
        handle.abort();
    }
    state.write().await.peers.remove(&peer_id);
    close_writer(tx, writer_handle).await;

    info!(peer_id = %peer_id, "Peer disconnected");
}

/// Let the writer flush what is queued, then stop it
async fn close_writer(tx: mpsc::Sender<Frame>, writer_handle: JoinHandle<()>) {
    drop(tx);
    let abort = writer_handle.abort_handle();
    if tokio::time::timeout(Duration::from_secs(1), writer_handle)
        .await
        .is_err()
    {
        abort.abort();
    }
}

/// Handle the Hello handshake
async fn handle_hello(
    reader: &mut ReadHalf<TcpStream>,
    state: &Arc<RwLock<ServerState>>,
    tx: &mpsc::Sender<Frame>,
) -> Result<Uuid> {
    let frame = read_frame(reader).await?;

    match frame {
        Frame::Hello { token, client } => {
            let mut s = state.write().await;

            // Validate token
            if token != s.token {
                return Err(Error::Rejected("Invalid token".into()));
            }

            // Check capacity
            if s.peers.len() >= MAX_PEERS {
                return Err(Error::ServerFull);
            }

            let peer_id = Uuid::new_v4();
            s.peers.insert(
                peer_id,
                Peer {
                    client,
                    tx: tx.clone(),
                },
            );
            drop(s);

            tx.send(Frame::Welcome {
                server: format!("mentorchat-hub/{}", env!("CARGO_PKG_VERSION")),
            })
            .await
            .map_err(|_| Error::ConnectionClosed)?;

            Ok(peer_id)
        }
        _ => Err(Error::Protocol("Expected Hello".into())),
    }
}

/// Writer task - sends frames to the client
///
/// A frame that cannot be encoded never reaches the socket; its request or
/// watch is refused instead and the connection carries on.
async fn writer_task(mut writer: WriteHalf<TcpStream>, mut rx: mpsc::Receiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        match write_frame(&mut writer, &frame).await {
            Ok(()) => {}
            Err(Error::Protocol(reason)) => {
                warn!(reason = %reason, "Frame not sent");
                if let Some(refusal) = frame.refusal(reason) {
                    if let Err(e) = write_frame(&mut writer, &refusal).await {
                        debug!(error = %e, "Write failed");
                        break;
                    }
                }
            }
            Err(e) => {
                debug!(error = %e, "Write failed");
                break;
            }
        }
    }
}

/// Queue a message list as chunks, closing with the frame built by `last`
///
/// Returns false once the peer is gone.
async fn send_messages(
    tx: &mpsc::Sender<Frame>,
    id: u64,
    messages: Vec<Message>,
    last: impl FnOnce(Vec<Message>) -> Frame,
) -> bool {
    let mut runs = split_messages(messages);
    let rest = runs.pop().unwrap_or_default();
    for messages in runs {
        if tx.send(Frame::MessageChunk { id, messages }).await.is_err() {
            return false;
        }
    }
    tx.send(last(rest)).await.is_ok()
}

/// Handle an incoming frame
async fn handle_frame(
    frame: Frame,
    peer_id: Uuid,
    backend: &dyn ChatBackend,
    tx: &mpsc::Sender<Frame>,
    watches: &mut HashMap<u64, JoinHandle<()>>,
) {
    match frame {
        Frame::Request {
            request_id,
            request,
        } => {
            match execute(backend, request).await {
                Reply::Messages { messages } => {
                    send_messages(tx, request_id, messages, |messages| Frame::Reply {
                        request_id,
                        reply: Reply::Messages { messages },
                    })
                    .await;
                }
                reply => {
                    let _ = tx.send(Frame::Reply { request_id, reply }).await;
                }
            }
        }
        Frame::Watch { watch_id, target } => {
            watches.retain(|_, handle| !handle.is_finished());
            if let Err(reason) = start_watch(watch_id, target, backend, tx, watches).await {
                debug!(peer_id = %peer_id, watch_id, reason = %reason, "Watch refused");
                let _ = tx.send(Frame::WatchFailed { watch_id, reason }).await;
            }
        }
        Frame::Unwatch { watch_id } => {
            if let Some(handle) = watches.remove(&watch_id) {
                handle.abort();
                debug!(peer_id = %peer_id, watch_id, "Watch stopped");
            }
        }
        Frame::Ping => {
            let _ = tx.send(Frame::Pong).await;
        }
        Frame::Pong => {}
        _ => {
            debug!(peer_id = %peer_id, "Ignoring unexpected frame type");
        }
    }
}

/// Run one backend call on behalf of a client
async fn execute(backend: &dyn ChatBackend, request: Request) -> Reply {
    let result = match request {
        Request::AppendMessage { room_id, message } => {
            // Clients are not trusted to have validated
            if !room_id.has_participant(&message.sender_id) {
                return Reply::Failed {
                    reason: format!(
                        "{} is not a participant of room {}",
                        message.sender_id, room_id
                    ),
                };
            }
            match message.payload.clone().validated() {
                Ok(payload) => {
                    let message = mentorchat_core::NewMessage { payload, ..message };
                    backend
                        .append_message(&room_id, message)
                        .await
                        .map(|message| Reply::Appended { message })
                }
                Err(e) => Err(e),
            }
        }
        Request::LoadMessages { room_id } => backend
            .load_messages(&room_id)
            .await
            .map(|messages| Reply::Messages { messages }),
        Request::SetSeen { room_id, keys } => backend
            .set_seen(&room_id, &keys)
            .await
            .map(|changed| Reply::SeenUpdated { changed }),
        Request::PutPresence { user_id, record } => backend
            .put_presence(&user_id, record)
            .await
            .map(|()| Reply::Done),
        Request::LoadPresence { user_id } => backend
            .load_presence(&user_id)
            .await
            .map(|record| Reply::Presence { record }),
        Request::EnsureRoom { room_id } => backend
            .ensure_room(&room_id)
            .await
            .map(|created| Reply::RoomEnsured { created }),
        Request::ListRooms { user_id } => backend
            .list_rooms(&user_id)
            .await
            .map(|rooms| Reply::Rooms { rooms }),
    };

    result.unwrap_or_else(|e| Reply::Failed {
        reason: e.to_string(),
    })
}

async fn start_watch(
    watch_id: u64,
    target: WatchTarget,
    backend: &dyn ChatBackend,
    tx: &mpsc::Sender<Frame>,
    watches: &mut HashMap<u64, JoinHandle<()>>,
) -> std::result::Result<(), String> {
    if watches.contains_key(&watch_id) {
        return Err(format!("watch {} already active", watch_id));
    }
    if watches.len() >= MAX_WATCHES_PER_PEER {
        return Err("too many watches".into());
    }

    let handle = match target {
        WatchTarget::Room { room_id } => {
            let rx = backend
                .watch_room(&room_id)
                .await
                .map_err(|e| e.to_string())?;
            tokio::spawn(forward_room(watch_id, rx, tx.clone()))
        }
        WatchTarget::Presence { user_id } => {
            let rx = backend
                .watch_presence(&user_id)
                .await
                .map_err(|e| e.to_string())?;
            tokio::spawn(forward_presence(watch_id, rx, tx.clone()))
        }
    };

    watches.insert(watch_id, handle);
    Ok(())
}

/// Push the current room log, then one snapshot per change
async fn forward_room(
    watch_id: u64,
    mut rx: watch::Receiver<MessageList>,
    tx: mpsc::Sender<Frame>,
) {
    loop {
        let messages = rx.borrow_and_update().as_ref().clone();
        let sent = send_messages(&tx, watch_id, messages, |messages| Frame::RoomSnapshot {
            watch_id,
            messages,
        })
        .await;
        if !sent {
            return;
        }
        if rx.changed().await.is_err() {
            let _ = tx
                .send(Frame::WatchFailed {
                    watch_id,
                    reason: "watch closed".into(),
                })
                .await;
            return;
        }
    }
}

/// Push the current presence record, then one per change
async fn forward_presence(
    watch_id: u64,
    mut rx: watch::Receiver<PresenceRecord>,
    tx: mpsc::Sender<Frame>,
) {
    loop {
        let record = *rx.borrow_and_update();
        if tx
            .send(Frame::PresenceSnapshot { watch_id, record })
            .await
            .is_err()
        {
            return;
        }
        if rx.changed().await.is_err() {
            let _ = tx
                .send(Frame::WatchFailed {
                    watch_id,
                    reason: "watch closed".into(),
                })
                .await;
            return;
        }
    }
}

/// Heartbeat task - pings every peer so dead links surface
async fn heartbeat_task(state: Arc<RwLock<ServerState>>, mut shutdown_rx: broadcast::Receiver<()>) {
    let interval = Duration::from_millis(HEARTBEAT_INTERVAL_MS);

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let s = state.read().await;
                for peer in s.peers.values() {
                    // A full queue already means traffic is flowing
                    let _ = peer.tx.try_send(Frame::Ping);
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("Heartbeat task shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentorchat_core::LocalBackend;

    fn backend() -> Arc<dyn ChatBackend> {
        Arc::new(LocalBackend::in_memory().unwrap())
    }

    async fn raw_connect(server: &HubServer) -> TcpStream {
        TcpStream::connect(server.addr()).await.unwrap()
    }

    #[tokio::test]
    async fn test_server_start() {
        let server = HubServer::start(
            "127.0.0.1:0".parse().unwrap(), // Random port
            backend(),
            "test-token".to_string(),
        )
        .await
        .unwrap();

        assert!(server.addr().port() > 0);
        assert_eq!(server.url().await.token, "test-token");
        server.shutdown();
    }

    #[tokio::test]
    async fn test_bad_token_is_rejected() {
        let server = HubServer::start("127.0.0.1:0".parse().unwrap(), backend(), "right".into())
            .await
            .unwrap();

        let mut stream = raw_connect(&server).await;
        write_frame(
            &mut stream,
            &Frame::Hello {
                token: "wrong".into(),
                client: "test".into(),
            },
        )
        .await
        .unwrap();

        match read_frame(&mut stream).await.unwrap() {
            Frame::Rejected { reason } => assert!(reason.contains("Invalid token")),
            other => panic!("Wrong frame: {:?}", other),
        }
        assert_eq!(server.peer_count().await, 0);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_request_reply_over_raw_frames() {
        let server = HubServer::start("127.0.0.1:0".parse().unwrap(), backend(), "t".into())
            .await
            .unwrap();

        let mut stream = raw_connect(&server).await;
        write_frame(
            &mut stream,
            &Frame::Hello {
                token: "t".into(),
                client: "raw".into(),
            },
        )
        .await
        .unwrap();
        assert!(matches!(
            read_frame(&mut stream).await.unwrap(),
            Frame::Welcome { .. }
        ));
        assert_eq!(server.peer_names().await, vec!["raw".to_string()]);

        write_frame(
            &mut stream,
            &Frame::Request {
                request_id: 1,
                request: Request::LoadPresence {
                    user_id: "mentor1".parse().unwrap(),
                },
            },
        )
        .await
        .unwrap();

        // Pings may interleave; skip them
        loop {
            match read_frame(&mut stream).await.unwrap() {
                Frame::Reply {
                    request_id: 1,
                    reply: Reply::Presence { record },
                } => {
                    assert!(record.is_none());
                    break;
                }
                Frame::Ping => continue,
                other => panic!("Wrong frame: {:?}", other),
            }
        }
        server.shutdown();
    }

    #[tokio::test]
    async fn test_append_from_outsider_fails() {
        let backend = backend();
        let reply = execute(
            backend.as_ref(),
            Request::AppendMessage {
                room_id: "mentor1_student7".parse().unwrap(),
                message: mentorchat_core::NewMessage {
                    sender_id: "intruder".parse().unwrap(),
                    timestamp: 1,
                    payload: mentorchat_core::Payload::text("hi"),
                },
            },
        )
        .await;
        assert!(matches!(reply, Reply::Failed { .. }));
    }
}
