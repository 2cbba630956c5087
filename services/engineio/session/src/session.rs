//! Per-client session record.
//!
//! A session outlives the individual requests and sockets serving it. All
//! mutation happens while the registry lock is held; every change of state
//! or buffer signals the session's notifier so a parked poll re-evaluates.

use engineio_wire::{encode_frame, Packet, TransportType};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::handshake::Handshake;
use crate::state::SessionState;
use crate::websocket::WsFrame;

/// Session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sid(String);

impl Sid {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The id as sent on the wire
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Sid {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for Sid {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Sid {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Slot for the single parked poll of a session.
///
/// Dropping the slot wakes the parked poll. A slot whose poll went away
/// (request dropped by the server) counts as vacant.
#[derive(Debug)]
pub struct PollSlot {
    cancel: oneshot::Sender<()>,
}

impl PollSlot {
    /// Create a slot and the receiver the poll waits on
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (cancel, cancelled) = oneshot::channel();
        (Self { cancel }, cancelled)
    }

    /// Whether the poll owning this slot is still waiting
    pub fn is_active(&self) -> bool {
        !self.cancel.is_closed()
    }
}

/// Slot holding a background task, aborted when the slot is dropped
#[derive(Debug)]
pub struct TaskSlot {
    handle: JoinHandle<()>,
}

impl TaskSlot {
    /// Wrap a spawned task
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self { handle }
    }

    /// Whether the task has completed
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

/// WebSocket attached to a session
#[derive(Debug)]
pub struct SocketSlot {
    id: u64,
    outgoing: mpsc::UnboundedSender<WsFrame>,
    // Dropped with the slot, which ends the socket's read loop
    _detach: oneshot::Sender<()>,
}

impl SocketSlot {
    /// Attach an outgoing channel, returning the slot and its detach signal
    pub fn new(outgoing: mpsc::UnboundedSender<WsFrame>) -> (Self, oneshot::Receiver<()>) {
        let (detach, detached) = oneshot::channel();
        let slot = Self {
            id: NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed),
            outgoing,
            _detach: detach,
        };
        (slot, detached)
    }

    /// Process-unique socket id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a frame; fails silently once the writer is gone
    pub fn send(&self, frame: WsFrame) {
        if self.outgoing.send(frame).is_err() {
            debug!("WebSocket {} writer gone, frame dropped", self.id);
        }
    }

    /// Queue a packet as a single frame
    pub fn send_packet(&self, packet: &Packet) {
        self.send(encode_frame(packet).into());
    }
}

/// Server-side state of one logical client
#[derive(Debug)]
pub struct Session {
    id: Sid,
    transport: TransportType,
    state: SessionState,
    buffer: Vec<Packet>,
    connection_time: SystemTime,
    latest_reaction: Instant,
    handshake: Arc<Handshake>,
    pending_poll: Option<PollSlot>,
    heartbeat: Option<TaskSlot>,
    socket: Option<SocketSlot>,
    notify: Arc<Notify>,
}

impl Session {
    /// Create a session in the `opening` state
    pub fn new(id: Sid, transport: TransportType, handshake: Handshake) -> Self {
        Self {
            id,
            transport,
            state: SessionState::Opening,
            buffer: Vec::new(),
            connection_time: SystemTime::now(),
            latest_reaction: Instant::now(),
            handshake: Arc::new(handshake),
            pending_poll: None,
            heartbeat: None,
            socket: None,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Session id
    pub fn id(&self) -> &Sid {
        &self.id
    }

    /// Current transport
    pub fn transport(&self) -> TransportType {
        self.transport
    }

    /// Switch transport; only polling to websocket is allowed
    pub fn upgrade_transport(&mut self) -> bool {
        if self.transport >= TransportType::Websocket {
            return false;
        }
        self.transport = TransportType::Websocket;
        self.notify.notify_one();
        true
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Change state and wake the parked poll
    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.notify.notify_one();
    }

    /// Packets waiting for the next poll
    pub fn buffer(&self) -> &[Packet] {
        &self.buffer
    }

    /// Append packets for the next poll
    pub fn push_packets(&mut self, packets: impl IntoIterator<Item = Packet>) {
        self.buffer.extend(packets);
        self.notify.notify_one();
    }

    /// Take the buffered packets, leaving the buffer empty
    pub fn take_buffer(&mut self) -> Vec<Packet> {
        let packets = std::mem::take(&mut self.buffer);
        self.notify.notify_one();
        packets
    }

    /// When the session was opened
    pub fn connection_time(&self) -> SystemTime {
        self.connection_time
    }

    /// Request metadata captured at open
    pub fn handshake(&self) -> &Arc<Handshake> {
        &self.handshake
    }

    /// Record a reaction from the client
    pub fn touch(&mut self) {
        self.latest_reaction = Instant::now();
    }

    /// Time since the last client reaction
    pub fn silence(&self) -> Duration {
        Instant::now().saturating_duration_since(self.latest_reaction)
    }

    /// Whether a poll is parked on this session
    pub fn has_pending_poll(&self) -> bool {
        self.pending_poll.as_ref().is_some_and(PollSlot::is_active)
    }

    /// Park a poll, cancelling any previous one
    pub fn set_pending_poll(&mut self, slot: PollSlot) {
        self.pending_poll = Some(slot);
    }

    /// Release the poll slot, waking its poll if still parked
    pub fn clear_pending_poll(&mut self) {
        self.pending_poll = None;
    }

    /// Install the heartbeat task, aborting the previous one
    pub fn set_heartbeat(&mut self, slot: TaskSlot) {
        self.heartbeat = Some(slot);
    }

    /// Whether a heartbeat task is installed and running
    pub fn has_heartbeat(&self) -> bool {
        self.heartbeat.as_ref().is_some_and(|slot| !slot.is_finished())
    }

    /// Attached WebSocket, if any
    pub fn socket(&self) -> Option<&SocketSlot> {
        self.socket.as_ref()
    }

    /// Attach a WebSocket
    pub fn attach_socket(&mut self, socket: SocketSlot) {
        self.socket = Some(socket);
    }

    /// Notifier signalled on every state or buffer change
    pub fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    /// Tear down everything the session owns.
    ///
    /// Cancels the parked poll and heartbeat task, sends a close frame on
    /// the attached socket and detaches it.
    pub fn shutdown(&mut self) {
        self.state = SessionState::Closed;
        self.pending_poll = None;
        self.heartbeat = None;
        if let Some(socket) = self.socket.take() {
            socket.send(WsFrame::Close);
        }
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engineio_wire::PacketType;
    use crate::state::HeartbeatState;

    fn session() -> Session {
        Session::new(Sid::new(), TransportType::Polling, Handshake::default())
    }

    #[test]
    fn test_sid_is_unique() {
        assert_ne!(Sid::new(), Sid::new());
        assert_eq!(Sid::from("abc").to_string(), "abc");
    }

    #[tokio::test]
    async fn test_changes_signal_notifier() {
        let mut session = session();
        let notify = session.notifier();

        session.set_state(SessionState::Heartbeat(HeartbeatState::SendingPing));
        // The stored permit completes the next wait immediately
        notify.notified().await;

        session.push_packets([Packet::text(PacketType::Noop)]);
        notify.notified().await;
        assert_eq!(session.take_buffer().len(), 1);
        assert!(session.buffer().is_empty());
    }

    #[tokio::test]
    async fn test_poll_slot_cancel_on_replace() {
        let mut session = session();

        let (first, first_rx) = PollSlot::new();
        session.set_pending_poll(first);
        assert!(session.has_pending_poll());

        let (second, _second_rx) = PollSlot::new();
        session.set_pending_poll(second);
        assert!(first_rx.await.is_err());
        assert!(session.has_pending_poll());
    }

    #[tokio::test]
    async fn test_poll_slot_vacant_when_poller_gone() {
        let mut session = session();
        let (slot, rx) = PollSlot::new();
        session.set_pending_poll(slot);
        drop(rx);
        assert!(!session.has_pending_poll());
    }

    #[tokio::test]
    async fn test_task_slot_aborts_on_drop() {
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        });

        let slot = TaskSlot::new(handle);
        drop(slot);
        // Aborting the task drops its captured sender
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_closes_socket() {
        let mut session = session();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (socket, detached) = SocketSlot::new(tx);
        session.attach_socket(socket);

        session.shutdown();

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(rx.recv().await, Some(WsFrame::Close));
        assert!(detached.await.is_err());
        assert!(session.socket().is_none());
    }

    #[test]
    fn test_transport_is_monotonic() {
        let mut session = session();
        assert!(session.upgrade_transport());
        assert!(!session.upgrade_transport());
        assert_eq!(session.transport(), TransportType::Websocket);
    }
}
