//! Connection management and command dispatch.
//!
//! A [`Connection`] owns one socket to one backend for one session:
//! `Closed → HandshakeInProgress → Open → Closed`, no reuse. Exactly one
//! physical read is in flight at any time. Without event listening the
//! sending task reads its own reply inline; with event listening a single
//! reader task owns all reads and fans frames out to the one-slot reply
//! rendezvous or the event queue.

use crate::command::CommandCatalog;
use crate::config::ConnectionConfig;
use crate::error::ClientError;
use crate::events::{BackendEvent, ListenerId, ListenerRegistry};
use parking_lot::Mutex as SyncMutex;
use reclink_protocol::{Decoder, Encoder, Packet, ProtocolVersion};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    HandshakeInProgress,
    Open,
}

const STATE_CLOSED: u8 = 0;
const STATE_HANDSHAKE: u8 = 1;
const STATE_OPEN: u8 = 2;

/// A connection to one backend.
pub struct Connection {
    config: ConnectionConfig,
    state: AtomicU8,
    /// Set once the session is over; a retired connection never reopens.
    retired: AtomicBool,
    /// Fixed by a successful handshake, immutable afterwards.
    negotiated: SyncMutex<Option<ProtocolVersion>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    reader: Mutex<Option<OwnedReadHalf>>,
    decoder: Mutex<Decoder>,
    /// Serializes commands: a new command may not be sent while a reply is
    /// outstanding.
    command_gate: Mutex<()>,
    /// Rendezvous slot for the reply to the in-flight command.
    awaiting_reply: SyncMutex<Option<oneshot::Sender<Packet>>>,
    /// Whether the dedicated reader task owns the socket reads.
    reader_task_running: AtomicBool,
    /// Handle to the reader task, aborted on teardown. The task owns the read
    /// half, so aborting it never waits behind a parked read.
    reader_task: SyncMutex<Option<JoinHandle<()>>>,
    events_enabled: AtomicBool,
    event_tx: SyncMutex<Option<mpsc::UnboundedSender<BackendEvent>>>,
    listeners: Arc<ListenerRegistry>,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(STATE_CLOSED),
            retired: AtomicBool::new(false),
            negotiated: SyncMutex::new(None),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            decoder: Mutex::new(Decoder::new()),
            command_gate: Mutex::new(()),
            awaiting_reply: SyncMutex::new(None),
            reader_task_running: AtomicBool::new(false),
            reader_task: SyncMutex::new(None),
            events_enabled: AtomicBool::new(false),
            event_tx: SyncMutex::new(None),
            listeners: Arc::new(ListenerRegistry::new()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::SeqCst) {
            STATE_HANDSHAKE => ConnectionState::HandshakeInProgress,
            STATE_OPEN => ConnectionState::Open,
            _ => ConnectionState::Closed,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let value = match state {
            ConnectionState::Closed => STATE_CLOSED,
            ConnectionState::HandshakeInProgress => STATE_HANDSHAKE,
            ConnectionState::Open => STATE_OPEN,
        };
        self.state.store(value, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// The version fixed by the handshake; `None` before it completes.
    pub fn negotiated_version(&self) -> Option<ProtocolVersion> {
        *self.negotiated.lock()
    }

    /// Connects and performs the version handshake and announce.
    ///
    /// A handshake rejection is fatal by policy: the connection closes and
    /// no downgrade retry happens here. The error carries the backend's
    /// advertised version so a caller may retry with a fresh connection at a
    /// lower preferred version.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ClientError> {
        if self.retired.load(Ordering::SeqCst) {
            return Err(ClientError::ConnectionClosed);
        }
        if self.state() != ConnectionState::Closed {
            return Err(ClientError::AlreadyConnected);
        }

        tracing::debug!("connecting to {}", self.config.addr);
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.addr),
        )
        .await
        .map_err(|_| ClientError::Timeout)?
        .map_err(ClientError::Io)?;
        stream.set_nodelay(true).ok();

        let (read_half, write_half) = stream.into_split();
        *self.reader.lock().await = Some(read_half);
        *self.writer.lock().await = Some(write_half);
        self.decoder.lock().await.clear();
        self.set_state(ConnectionState::HandshakeInProgress);

        if let Err(err) = self.open_session().await {
            self.teardown().await;
            return Err(err);
        }
        self.set_state(ConnectionState::Open);

        if self.events_enabled.load(Ordering::SeqCst) {
            self.spawn_reader_tasks();
        }
        Ok(())
    }

    async fn open_session(&self) -> Result<(), ClientError> {
        self.handshake().await?;
        self.announce().await
    }

    /// Version handshake: offer the preferred version (with its token from
    /// the token era onward) and accept whatever the backend fixes.
    async fn handshake(&self) -> Result<(), ClientError> {
        let preferred = self.config.preferred_version;
        let mut args = vec![
            "PROTO_VERSION".to_string(),
            preferred.numeric_id().to_string(),
        ];
        if let Some(token) = preferred.token() {
            args.push(token.to_string());
        }
        self.write_frame(&Packet::new(args)).await?;

        let reply = self.read_reply_inline().await?;
        match reply.arg(0) {
            Some("ACCEPT") => {
                let numeric = reply
                    .arg(1)
                    .and_then(|s| s.parse::<i32>().ok())
                    .ok_or_else(|| ClientError::UnexpectedReply(reply.args.clone()))?;
                let version = ProtocolVersion::from_numeric(numeric)?;
                *self.negotiated.lock() = Some(version);
                tracing::debug!("handshake accepted at {version}");
                Ok(())
            }
            Some("REJECT") => {
                let backend_version = reply.arg(1).and_then(|s| s.parse().ok()).unwrap_or(-1);
                tracing::debug!("handshake rejected, backend speaks {backend_version}");
                Err(ClientError::HandshakeRejected { backend_version })
            }
            _ => Err(ClientError::UnexpectedReply(reply.args.clone())),
        }
    }

    /// Announces the client so the backend knows its name, mode, and whether
    /// to push event frames on this socket.
    async fn announce(&self) -> Result<(), ClientError> {
        let events_flag = if self.events_enabled.load(Ordering::SeqCst) {
            "1"
        } else {
            "0"
        };
        let packet = Packet::new(vec![
            "ANN".to_string(),
            self.config.announce_mode.as_wire_str().to_string(),
            self.config.client_name.clone(),
            events_flag.to_string(),
        ]);
        self.write_frame(&packet).await?;

        let reply = self.read_reply_inline().await?;
        if reply.arg(0) == Some("OK") {
            Ok(())
        } else {
            Err(ClientError::UnexpectedReply(reply.args))
        }
    }

    /// Sends a command and blocks until its reply frame arrives.
    ///
    /// The command is validated against the catalogue before any byte is
    /// written; an out-of-range command with a registered fallback is
    /// rewritten to the legacy wire command. Replies come back in send
    /// order because at most one command is in flight.
    pub async fn send<I, S>(&self, command: &str, args: I) -> Result<Packet, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.state() != ConnectionState::Open {
            return Err(ClientError::NotConnected);
        }
        let version = self.negotiated_version().ok_or(ClientError::NotConnected)?;
        let dispatch = CommandCatalog::global().resolve(command, version)?;
        if dispatch.is_fallback() {
            tracing::debug!(
                command,
                wire = dispatch.wire_name(),
                "substituting fallback command"
            );
        }
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let frame = Encoder::encode_command(dispatch.wire_name(), &args)?;

        let _gate = self.command_gate.lock().await;
        if self.state() != ConnectionState::Open {
            return Err(ClientError::NotConnected);
        }

        if self.reader_task_running.load(Ordering::SeqCst) {
            let (tx, rx) = oneshot::channel();
            *self.awaiting_reply.lock() = Some(tx);
            self.write_bytes(&frame).await?;
            match tokio::time::timeout(self.config.read_timeout, rx).await {
                Ok(Ok(packet)) => Ok(packet),
                Ok(Err(_)) => Err(ClientError::ConnectionClosed),
                Err(_) => {
                    self.awaiting_reply.lock().take();
                    self.teardown().await;
                    Err(ClientError::Timeout)
                }
            }
        } else {
            self.write_bytes(&frame).await?;
            self.read_reply_inline().await
        }
    }

    /// Starts backend event delivery.
    ///
    /// Spawns the dedicated reader task (the only physical reader from then
    /// on) and the dispatch task draining the event queue. Call before
    /// [`Connection::connect`] so the announce step asks the backend to push
    /// events on this socket; the backend only sends events it was asked
    /// for.
    pub fn enable_event_listening(self: &Arc<Self>) {
        self.events_enabled.store(true, Ordering::SeqCst);
        if self.is_open() {
            self.spawn_reader_tasks();
        }
    }

    /// Registers an event callback; events arrive in wire order.
    pub fn add_event_listener(
        &self,
        listener: impl Fn(&BackendEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.listeners.add(listener)
    }

    /// Unregisters a callback; returns whether it was registered.
    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Closes the connection, sending a best-effort goodbye.
    ///
    /// Closing is the only cancellation mechanism: the reader task is
    /// aborted even while parked in a pending read, and the write-side
    /// shutdown signals the backend that the session is over.
    pub async fn close(&self) -> Result<(), ClientError> {
        if self.is_open() {
            tracing::debug!("closing connection");
            let _ = self.write_frame(&Packet::from_args(["DONE"])).await;
        }
        self.teardown().await;
        Ok(())
    }

    /// Marks the session dead. Frames already buffered are abandoned.
    fn poison(&self) {
        self.set_state(ConnectionState::Closed);
        self.retired.store(true, Ordering::SeqCst);
    }

    /// Full session teardown: stop the reader task, shut the socket down,
    /// drop any rendezvous still waiting. Idempotent, and runs even when the
    /// state is already Closed so a connection poisoned by a timeout still
    /// releases its task and socket halves.
    async fn teardown(&self) {
        self.poison();
        if let Some(task) = self.reader_task.lock().take() {
            task.abort();
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        let _ = self.reader.lock().await.take();
        self.decoder.lock().await.clear();
        *self.event_tx.lock() = None;
        drop(self.awaiting_reply.lock().take());
    }

    async fn write_frame(&self, packet: &Packet) -> Result<(), ClientError> {
        let encoded = Encoder::encode_packet(packet)?;
        self.write_bytes(&encoded).await
    }

    async fn write_bytes(&self, encoded: &[u8]) -> Result<(), ClientError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ClientError::NotConnected)?;
        writer.write_all(encoded).await.map_err(ClientError::Io)?;
        Ok(())
    }

    /// Reads frames on the caller's task until a reply arrives.
    ///
    /// Used during the handshake and whenever no reader task is running.
    /// Event frames encountered on the way are queued, not returned.
    async fn read_reply_inline(&self) -> Result<Packet, ClientError> {
        let result = tokio::time::timeout(self.config.read_timeout, async {
            let mut buf = vec![0u8; self.config.read_buffer_size];
            loop {
                loop {
                    let decoded = self.decoder.lock().await.decode_packet()?;
                    match decoded {
                        Some(packet) if packet.is_event() => {
                            if let Some(event) = BackendEvent::from_packet(&packet) {
                                self.queue_event(event);
                            }
                        }
                        Some(packet) => return Ok(packet),
                        None => break,
                    }
                }
                let n = {
                    let mut guard = self.reader.lock().await;
                    let reader = guard.as_mut().ok_or(ClientError::NotConnected)?;
                    reader.read(&mut buf).await.map_err(ClientError::Io)?
                };
                if n == 0 {
                    return Err(ClientError::ConnectionClosed);
                }
                self.decoder.lock().await.extend(&buf[..n]);
            }
        })
        .await;

        match result {
            Ok(Ok(packet)) => Ok(packet),
            Ok(Err(err)) => {
                self.teardown().await;
                Err(err)
            }
            Err(_) => {
                self.teardown().await;
                Err(ClientError::Timeout)
            }
        }
    }

    fn spawn_reader_tasks(self: &Arc<Self>) {
        if self.reader_task_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        *self.event_tx.lock() = Some(tx);

        // Listener callbacks run on their own task so a slow callback never
        // stalls the socket reader.
        let listeners = Arc::clone(&self.listeners);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                listeners.notify(&event);
            }
        });

        // The task takes the read half outright: a parked read then lives
        // inside the task and cannot hold any lock teardown needs, so
        // aborting the task is enough to unblock close().
        let conn = Arc::clone(self);
        let task = tokio::spawn(async move {
            let Some(reader) = conn.reader.lock().await.take() else {
                return;
            };
            if let Err(err) = conn.read_loop(reader).await {
                tracing::debug!("reader task ended: {err}");
            }
            conn.poison();
            drop(conn.awaiting_reply.lock().take());
            *conn.event_tx.lock() = None;
        });
        *self.reader_task.lock() = Some(task);
        tracing::debug!("reader task started");
    }

    /// The single physical reader: classifies each frame as an event (queue)
    /// or a reply (rendezvous slot).
    async fn read_loop(&self, mut reader: OwnedReadHalf) -> Result<(), ClientError> {
        let mut buf = vec![0u8; self.config.read_buffer_size];
        loop {
            loop {
                let decoded = self.decoder.lock().await.decode_packet()?;
                let Some(packet) = decoded else { break };
                if packet.is_event() {
                    if let Some(event) = BackendEvent::from_packet(&packet) {
                        self.queue_event(event);
                    }
                } else {
                    match self.awaiting_reply.lock().take() {
                        Some(tx) => {
                            let _ = tx.send(packet);
                        }
                        None => {
                            tracing::warn!("dropping reply frame with no command in flight")
                        }
                    }
                }
            }
            let n = reader.read(&mut buf).await.map_err(ClientError::Io)?;
            if n == 0 {
                return Err(ClientError::ConnectionClosed);
            }
            self.decoder.lock().await.extend(&buf[..n]);
        }
    }

    fn queue_event(&self, event: BackendEvent) {
        match self.event_tx.lock().as_ref() {
            Some(tx) => {
                let _ = tx.send(event);
            }
            // No dispatch task; deliver on the current task.
            None => self.listeners.notify(&event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;

    fn config() -> ConnectionConfig {
        ConnectionConfig::new("127.0.0.1:6543".parse().unwrap())
    }

    #[test]
    fn test_new_connection_is_closed() {
        let conn = Connection::new(config());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.negotiated_version().is_none());
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn test_send_requires_open_connection() {
        let conn = Connection::new(config());
        let err = conn.send("QUERY_UPTIME", Vec::<String>::new()).await;
        assert!(matches!(err, Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn test_close_retires_connection() {
        let conn = Arc::new(Connection::new(config()));
        conn.close().await.unwrap();
        let err = conn.connect().await;
        assert!(matches!(err, Err(ClientError::ConnectionClosed)));
    }

    #[test]
    fn test_listener_registration() {
        let conn = Connection::new(config());
        let id = conn.add_event_listener(|_| {});
        assert!(conn.remove_event_listener(id));
        assert!(!conn.remove_event_listener(id));
    }
}
