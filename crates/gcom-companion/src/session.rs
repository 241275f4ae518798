//! Companion link session state machine.
//!
//! The session owns the listening socket and at most one peer. Every new peer
//! is asked for its SystemInfo, and the reply decides whether the previous
//! session is resumed, reset, or replaced by a fresh capability query.

use std::net::IpAddr;

use crossbeam_channel::Receiver;
use gcom_common::EventBus;
use gcom_message::{
    Capabilities, CommandCode, DecodeStatus, ImageTagged, ImageUntagged, Message, MessageCodec,
    MessageType, ResponseCode, SystemInfo,
};
use gcom_metrics::{metric_defs, Link};
use tracing::{debug, info, trace, warn};

use crate::transport::{PeerLink, PeerListener};

/// Default listening port.
pub const DEFAULT_COMPANION_PORT: u16 = 42069;

/// Photo frequency is sent in tenths of a hertz.
const FREQUENCY_SCALE: f64 = 10.0;

// ============================================================================
// State and Events
// ============================================================================

/// Companion link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompanionStatus {
    /// Not listening.
    Offline,
    /// Listening, no peer attached.
    Searching,
    /// One peer attached.
    Connected,
}

impl CompanionStatus {
    fn ordinal(self) -> f64 {
        match self {
            CompanionStatus::Offline => 0.0,
            CompanionStatus::Searching => 1.0,
            CompanionStatus::Connected => 2.0,
        }
    }
}

impl std::fmt::Display for CompanionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompanionStatus::Offline => write!(f, "offline"),
            CompanionStatus::Searching => write!(f, "searching"),
            CompanionStatus::Connected => write!(f, "connected"),
        }
    }
}

/// Events published by [`CompanionSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompanionEvent {
    /// A peer was accepted and asked for its SystemInfo.
    PeerConnected,
    /// The active peer went away or was cancelled.
    PeerDropped,
    /// The peer answered a RESET or RESUME command.
    ConnectionReestablished {
        command: CommandCode,
        response: ResponseCode,
    },
    SystemInfo(SystemInfo),
    Capabilities(Capabilities),
    Response {
        command: CommandCode,
        code: ResponseCode,
    },
    ImageTagged(ImageTagged),
    ImageUntagged(ImageUntagged),
}

/// What to send after a SystemInfo arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeDecision {
    /// Same peer, dropped mid-session, auto-resume on.
    Resume,
    /// Same peer, dropped mid-session, auto-resume off.
    Reset,
    /// New peer, or the previous session ended cleanly.
    QueryCapabilities,
}

impl ResumeDecision {
    /// Apply the resume/reset policy.
    pub fn decide(previous_system_id: Option<&str>, info: &SystemInfo, auto_resume: bool) -> Self {
        let same_peer = previous_system_id == Some(info.system_id.as_str());
        match (same_peer && info.dropped, auto_resume) {
            (true, true) => ResumeDecision::Resume,
            (true, false) => ResumeDecision::Reset,
            (false, _) => ResumeDecision::QueryCapabilities,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            ResumeDecision::Resume => "resume",
            ResumeDecision::Reset => "reset",
            ResumeDecision::QueryCapabilities => "query",
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// Single-peer companion link.
pub struct CompanionSession<L: PeerListener> {
    listener: L,
    peer: Option<L::Link>,
    codec: MessageCodec,
    status: CompanionStatus,
    previous_system_id: Option<String>,
    auto_resume: bool,
    events: EventBus<CompanionEvent>,
}

impl<L: PeerListener> CompanionSession<L> {
    /// Create an offline session. Auto-resume starts enabled.
    pub fn new(listener: L) -> Self {
        CompanionSession {
            listener,
            peer: None,
            codec: MessageCodec::new(),
            status: CompanionStatus::Offline,
            previous_system_id: None,
            auto_resume: true,
            events: EventBus::new(),
        }
    }

    pub fn status(&self) -> CompanionStatus {
        self.status
    }

    pub fn auto_resume(&self) -> bool {
        self.auto_resume
    }

    /// Toggle the resume policy. Read only when a SystemInfo arrives.
    pub fn set_auto_resume(&mut self, enabled: bool) {
        self.auto_resume = enabled;
    }

    /// Identity remembered from the last new peer.
    pub fn previous_system_id(&self) -> Option<&str> {
        self.previous_system_id.as_deref()
    }

    pub fn has_peer(&self) -> bool {
        self.peer.is_some()
    }

    pub fn peer(&self) -> Option<&L::Link> {
        self.peer.as_ref()
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    pub fn subscribe(&mut self) -> Receiver<CompanionEvent> {
        self.events.subscribe()
    }

    /// Start listening, restarting first if already running.
    pub fn start(&mut self, address: IpAddr, port: u16) -> bool {
        if self.status != CompanionStatus::Offline {
            self.stop();
        }

        match self.listener.listen(address, port) {
            Ok(()) => {
                info!("companion link listening on {}:{}", address, port);
                self.set_status(CompanionStatus::Searching);
                true
            }
            Err(e) => {
                warn!("failed to listen on {}:{}: {}", address, port, e);
                false
            }
        }
    }

    /// Listen on every IPv4 interface.
    pub fn start_any(&mut self, port: u16) -> bool {
        self.start(IpAddr::from([0, 0, 0, 0]), port)
    }

    /// Drop any peer and stop listening.
    pub fn stop(&mut self) {
        self.cancel_connection();
        self.listener.close();
        self.set_status(CompanionStatus::Offline);
    }

    /// Drop the active peer, if any, and go back to searching.
    pub fn cancel_connection(&mut self) {
        if self.status == CompanionStatus::Connected {
            self.set_status(CompanionStatus::Searching);
        }

        if let Some(mut peer) = self.peer.take() {
            self.codec.clear();
            peer.close();
            info!("companion peer dropped");
            metrics::counter!(metric_defs::PEER_DROPS.name, &Link::Companion.labels()).increment(1);
            self.events.publish(CompanionEvent::PeerDropped);
            self.listener.resume_accepting();
        }
    }

    /// Encode and write `message` to the active peer.
    pub fn send(&mut self, message: &Message) -> bool {
        let Some(peer) = self.peer.as_mut() else {
            debug!("no companion peer to send {:?} to", message.message_type());
            return false;
        };
        if !peer.is_connected() {
            return false;
        }

        let frame = match MessageCodec::encode(message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("failed to encode {:?}: {}", message.message_type(), e);
                return false;
            }
        };

        match peer.write_frame(frame) {
            Ok(()) => {
                trace!("sent {:?}", message.message_type());
                metrics::counter!(metric_defs::FRAMES_SENT.name, &Link::Companion.labels()).increment(1);
                true
            }
            Err(e) => {
                warn!("companion write failed: {}", e);
                false
            }
        }
    }

    /// Ask the companion computer to start relaying images.
    pub fn start_image_relay(&mut self, photo_frequency_hz: f64) -> bool {
        let packed = (photo_frequency_hz * FREQUENCY_SCALE).round();
        if !(0.0..=u8::MAX as f64).contains(&packed) {
            warn!("photo frequency {} Hz cannot be encoded", photo_frequency_hz);
            return false;
        }
        self.send(&Message::Command {
            command: CommandCode::ImageRelayStart,
            args: vec![packed as u8],
        })
    }

    pub fn stop_image_relay(&mut self) -> bool {
        self.send(&Message::command(CommandCode::ImageRelayStop))
    }

    // ========================================================================
    // Transport Callbacks
    // ========================================================================

    /// A new inbound connection was accepted.
    ///
    /// Connections arriving while a peer is attached, or while offline, are
    /// closed without any event.
    pub fn handle_peer_connected(&mut self, mut link: L::Link) {
        if self.peer.is_some() || self.status == CompanionStatus::Offline {
            debug!("rejecting extra companion connection");
            link.close();
            return;
        }

        self.codec.clear();
        self.peer = Some(link);
        self.set_status(CompanionStatus::Connected);
        self.listener.pause_accepting();

        if self.send(&Message::request(MessageType::SystemInfo)) {
            info!("companion peer connected");
            metrics::counter!(metric_defs::PEER_CONNECTIONS.name, &Link::Companion.labels()).increment(1);
            self.events.publish(CompanionEvent::PeerConnected);
        } else {
            warn!("could not request system info from new peer");
            self.cancel_connection();
        }
    }

    /// Bytes arrived from the active peer. Every complete frame is handled
    /// before returning.
    pub fn handle_peer_data(&mut self, data: &[u8]) {
        if self.peer.is_none() {
            return;
        }
        metrics::counter!(metric_defs::BYTES_RECEIVED.name, &Link::Companion.labels())
            .increment(data.len() as u64);
        self.codec.push(data);

        // A handler may drop the peer, which also clears the codec.
        while self.peer.is_some() {
            match self.codec.decode() {
                DecodeStatus::Success(message) => {
                    metrics::counter!(metric_defs::FRAMES_DECODED.name, &Link::Companion.labels()).increment(1);
                    self.handle_message(message);
                }
                DecodeStatus::Corrupt(e) => {
                    debug!("companion frame discarded: {}", e);
                    metrics::counter!(metric_defs::FRAMES_CORRUPT.name, &Link::Companion.labels()).increment(1);
                }
                DecodeStatus::Incomplete => break,
            }
        }
    }

    /// The active peer's connection closed.
    pub fn handle_peer_disconnected(&mut self) {
        if self.peer.is_some() {
            self.cancel_connection();
        }
    }

    // ========================================================================
    // Message Handling
    // ========================================================================

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::SystemInfo(info) => {
                self.events.publish(CompanionEvent::SystemInfo(info.clone()));
                self.handle_system_info(&info);
            }
            Message::Capabilities(caps) => {
                debug!("companion capabilities 0x{:08X}", caps.bits());
                self.events.publish(CompanionEvent::Capabilities(caps));
            }
            Message::Response { command, code } => {
                self.events.publish(CompanionEvent::Response { command, code });
                self.handle_response(command, code);
            }
            Message::ImageTagged(image) => {
                self.events.publish(CompanionEvent::ImageTagged(image));
            }
            Message::ImageUntagged(image) => {
                self.events.publish(CompanionEvent::ImageUntagged(image));
            }
            Message::Request { target } => {
                debug!("ignoring request for {:?} from companion", target);
            }
            Message::Command { command, .. } => {
                debug!("ignoring command {} from companion", command);
            }
        }
    }

    fn handle_system_info(&mut self, info: &SystemInfo) {
        let decision = ResumeDecision::decide(self.previous_system_id(), info, self.auto_resume);
        info!(
            "companion '{}' v{} (dropped: {}) -> {}",
            info.system_id,
            info.version,
            info.dropped,
            decision.as_str()
        );
        metrics::counter!(
            metric_defs::SESSION_DECISIONS.name,
            &Link::Companion.labels_with("decision", decision.as_str())
        )
        .increment(1);

        let reply = match decision {
            ResumeDecision::Resume => Message::command(CommandCode::SystemResume),
            ResumeDecision::Reset => Message::command(CommandCode::SystemReset),
            ResumeDecision::QueryCapabilities => {
                self.previous_system_id = Some(info.system_id.clone());
                Message::request(MessageType::Capabilities)
            }
        };
        if !self.send(&reply) {
            warn!("{} reply to companion '{}' not sent", decision.as_str(), info.system_id);
        }
    }

    fn handle_response(&mut self, command: CommandCode, code: ResponseCode) {
        match command {
            CommandCode::SystemReset => {
                self.events.publish(CompanionEvent::ConnectionReestablished {
                    command,
                    response: code,
                });
                if !self.send(&Message::request(MessageType::Capabilities)) {
                    warn!("capabilities request after reset not sent");
                }
            }
            CommandCode::SystemResume => {
                self.events.publish(CompanionEvent::ConnectionReestablished {
                    command,
                    response: code,
                });
                if code.is_error() {
                    warn!("companion failed to resume ({}), going offline", code);
                    self.stop();
                }
            }
            CommandCode::ImageRelayStart | CommandCode::ImageRelayStop => {
                if code.is_error() {
                    warn!("{} rejected: {}", command, code);
                }
            }
        }
    }

    fn set_status(&mut self, status: CompanionStatus) {
        if self.status != status {
            debug!("companion status {} -> {}", self.status, status);
            self.status = status;
            metrics::gauge!(metric_defs::SESSION_STATE.name, &Link::Companion.labels()).set(status.ordinal());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;

    // ========================================================================
    // In-memory transport
    // ========================================================================

    #[derive(Default)]
    struct ListenerState {
        listening: bool,
        accepting: bool,
        fail_listen: bool,
        listen_calls: usize,
    }

    #[derive(Clone, Default)]
    struct MockListener(Rc<RefCell<ListenerState>>);

    impl PeerListener for MockListener {
        type Link = MockLink;

        fn listen(&mut self, _address: IpAddr, _port: u16) -> io::Result<()> {
            let mut state = self.0.borrow_mut();
            state.listen_calls += 1;
            if state.fail_listen {
                return Err(io::Error::new(io::ErrorKind::AddrInUse, "in use"));
            }
            state.listening = true;
            state.accepting = true;
            Ok(())
        }

        fn close(&mut self) {
            let mut state = self.0.borrow_mut();
            state.listening = false;
            state.accepting = false;
        }

        fn pause_accepting(&mut self) {
            self.0.borrow_mut().accepting = false;
        }

        fn resume_accepting(&mut self) {
            self.0.borrow_mut().accepting = true;
        }
    }

    #[derive(Default)]
    struct LinkState {
        connected: bool,
        closed: bool,
        fail_writes: bool,
        written: Vec<Bytes>,
    }

    #[derive(Clone)]
    struct MockLink(Rc<RefCell<LinkState>>);

    impl MockLink {
        fn new() -> Self {
            MockLink(Rc::new(RefCell::new(LinkState {
                connected: true,
                ..Default::default()
            })))
        }

        fn failing() -> Self {
            let link = Self::new();
            link.0.borrow_mut().fail_writes = true;
            link
        }

        fn sent(&self) -> Vec<Message> {
            let mut codec = MessageCodec::new();
            for frame in &self.0.borrow().written {
                codec.push(frame);
            }
            codec.drain().map(|m| m.expect("valid frame")).collect()
        }

        fn last_sent(&self) -> Option<Message> {
            self.sent().pop()
        }
    }

    impl PeerLink for MockLink {
        fn is_connected(&self) -> bool {
            self.0.borrow().connected
        }

        fn write_frame(&mut self, frame: Bytes) -> io::Result<()> {
            let mut state = self.0.borrow_mut();
            if state.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken"));
            }
            state.written.push(frame);
            Ok(())
        }

        fn close(&mut self) {
            let mut state = self.0.borrow_mut();
            state.connected = false;
            state.closed = true;
        }
    }

    fn started() -> (CompanionSession<MockListener>, MockListener, Receiver<CompanionEvent>) {
        let listener = MockListener::default();
        let mut session = CompanionSession::new(listener.clone());
        let events = session.subscribe();
        assert!(session.start_any(DEFAULT_COMPANION_PORT));
        (session, listener, events)
    }

    fn frame(message: &Message) -> Bytes {
        MessageCodec::encode(message).unwrap()
    }

    fn system_info(id: &str, dropped: bool) -> Message {
        Message::SystemInfo(SystemInfo {
            system_id: id.to_string(),
            version: 1,
            dropped,
        })
    }

    /// Connect a peer that reports `id`, answer its capability query, and disconnect.
    fn establish_previous(session: &mut CompanionSession<MockListener>, id: &str) {
        let link = MockLink::new();
        session.handle_peer_connected(link.clone());
        session.handle_peer_data(&frame(&system_info(id, false)));
        session.handle_peer_disconnected();
        assert_eq!(session.previous_system_id(), Some(id));
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    #[test]
    fn test_start_stop_transitions() {
        let (mut session, listener, _events) = started();
        assert_eq!(session.status(), CompanionStatus::Searching);
        assert!(listener.0.borrow().listening);

        session.stop();
        assert_eq!(session.status(), CompanionStatus::Offline);
        assert!(!listener.0.borrow().listening);
    }

    #[test]
    fn test_start_when_running_restarts() {
        let (mut session, listener, events) = started();
        let link = MockLink::new();
        session.handle_peer_connected(link.clone());

        assert!(session.start_any(DEFAULT_COMPANION_PORT));
        assert_eq!(session.status(), CompanionStatus::Searching);
        assert_eq!(listener.0.borrow().listen_calls, 2);
        assert!(link.0.borrow().closed);
        let received: Vec<_> = events.try_iter().collect();
        assert_eq!(received, vec![CompanionEvent::PeerConnected, CompanionEvent::PeerDropped]);
    }

    #[test]
    fn test_start_failure_stays_offline() {
        let listener = MockListener::default();
        listener.0.borrow_mut().fail_listen = true;
        let mut session = CompanionSession::new(listener);
        assert!(!session.start_any(1));
        assert_eq!(session.status(), CompanionStatus::Offline);
    }

    #[test]
    fn test_cancel_and_stop_safe_without_peer() {
        let mut session = CompanionSession::new(MockListener::default());
        let events = session.subscribe();
        session.cancel_connection();
        session.stop();
        assert_eq!(session.status(), CompanionStatus::Offline);
        assert!(events.try_recv().is_err());
    }

    // ========================================================================
    // Peer handling
    // ========================================================================

    #[test]
    fn test_new_peer_requests_system_info() {
        let (mut session, listener, events) = started();
        let link = MockLink::new();
        session.handle_peer_connected(link.clone());

        assert_eq!(session.status(), CompanionStatus::Connected);
        assert!(!listener.0.borrow().accepting);
        assert_eq!(link.sent(), vec![Message::request(MessageType::SystemInfo)]);
        assert_eq!(events.try_recv().unwrap(), CompanionEvent::PeerConnected);
    }

    #[test]
    fn test_failed_initial_request_drops_peer() {
        let (mut session, listener, events) = started();
        session.handle_peer_connected(MockLink::failing());

        assert_eq!(session.status(), CompanionStatus::Searching);
        assert!(!session.has_peer());
        assert!(listener.0.borrow().accepting);
        assert_eq!(events.try_iter().collect::<Vec<_>>(), vec![CompanionEvent::PeerDropped]);
    }

    #[test]
    fn test_second_peer_produces_no_events() {
        let (mut session, _listener, events) = started();
        let first = MockLink::new();
        session.handle_peer_connected(first.clone());
        assert_eq!(events.try_recv().unwrap(), CompanionEvent::PeerConnected);

        let second = MockLink::new();
        session.handle_peer_connected(second.clone());
        assert!(second.0.borrow().closed);
        assert!(second.sent().is_empty());
        assert!(events.try_recv().is_err());
        assert!(!first.0.borrow().closed);
    }

    #[test]
    fn test_disconnect_emits_single_drop() {
        let (mut session, listener, events) = started();
        session.handle_peer_connected(MockLink::new());
        session.handle_peer_disconnected();
        session.handle_peer_disconnected();

        assert_eq!(session.status(), CompanionStatus::Searching);
        assert!(listener.0.borrow().accepting);
        let received: Vec<_> = events.try_iter().collect();
        assert_eq!(received, vec![CompanionEvent::PeerConnected, CompanionEvent::PeerDropped]);
    }

    #[test]
    fn test_send_requires_connected_peer() {
        let (mut session, _listener, _events) = started();
        assert!(!session.send(&Message::command(CommandCode::ImageRelayStop)));

        let link = MockLink::new();
        session.handle_peer_connected(link.clone());
        link.0.borrow_mut().connected = false;
        assert!(!session.send(&Message::command(CommandCode::ImageRelayStop)));
    }

    #[test]
    fn test_data_split_and_garbage() {
        let (mut session, _listener, events) = started();
        session.handle_peer_connected(MockLink::new());
        let _ = events.try_recv();

        let caps = Message::Capabilities(Capabilities::TAGGED_CAMERA);
        let bytes = frame(&caps);
        session.handle_peer_data(&[0x00, 0x01]);
        session.handle_peer_data(&bytes[..5]);
        assert!(events.try_recv().is_err());
        session.handle_peer_data(&bytes[5..]);

        assert_eq!(
            events.try_recv().unwrap(),
            CompanionEvent::Capabilities(Capabilities::TAGGED_CAMERA)
        );
    }

    #[test]
    fn test_images_are_republished_in_order() {
        let (mut session, _listener, events) = started();
        session.handle_peer_connected(MockLink::new());
        let _ = events.try_recv();

        let mut burst = Vec::new();
        for seq in 0..3u8 {
            burst.extend_from_slice(&frame(&Message::ImageUntagged(ImageUntagged {
                sequence: seq,
                image: Bytes::from(vec![seq; 8]),
            })));
        }
        session.handle_peer_data(&burst);

        let sequences: Vec<u8> = events
            .try_iter()
            .map(|e| match e {
                CompanionEvent::ImageUntagged(img) => img.sequence,
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    // ========================================================================
    // Resume / reset policy
    // ========================================================================

    #[test]
    fn test_decision_table() {
        let info = |id: &str, dropped| SystemInfo {
            system_id: id.to_string(),
            version: 1,
            dropped,
        };
        assert_eq!(ResumeDecision::decide(Some("X"), &info("X", true), true), ResumeDecision::Resume);
        assert_eq!(ResumeDecision::decide(Some("X"), &info("X", true), false), ResumeDecision::Reset);
        assert_eq!(
            ResumeDecision::decide(Some("X"), &info("X", false), true),
            ResumeDecision::QueryCapabilities
        );
        assert_eq!(
            ResumeDecision::decide(Some("X"), &info("Y", true), true),
            ResumeDecision::QueryCapabilities
        );
        assert_eq!(ResumeDecision::decide(None, &info("X", true), true), ResumeDecision::QueryCapabilities);
    }

    #[test]
    fn test_same_peer_dropped_with_auto_resume_sends_resume() {
        let (mut session, _listener, _events) = started();
        establish_previous(&mut session, "X");

        let link = MockLink::new();
        session.handle_peer_connected(link.clone());
        session.handle_peer_data(&frame(&system_info("X", true)));
        assert_eq!(link.last_sent(), Some(Message::command(CommandCode::SystemResume)));
    }

    #[test]
    fn test_same_peer_dropped_without_auto_resume_sends_reset() {
        let (mut session, _listener, _events) = started();
        establish_previous(&mut session, "X");
        session.set_auto_resume(false);

        let link = MockLink::new();
        session.handle_peer_connected(link.clone());
        session.handle_peer_data(&frame(&system_info("X", true)));
        assert_eq!(link.last_sent(), Some(Message::command(CommandCode::SystemReset)));
    }

    #[test]
    fn test_same_peer_clean_queries_capabilities() {
        let (mut session, _listener, _events) = started();
        establish_previous(&mut session, "X");

        let link = MockLink::new();
        session.handle_peer_connected(link.clone());
        session.handle_peer_data(&frame(&system_info("X", false)));
        assert_eq!(link.last_sent(), Some(Message::request(MessageType::Capabilities)));
        assert_eq!(session.previous_system_id(), Some("X"));
    }

    #[test]
    fn test_new_peer_replaces_identity() {
        let (mut session, _listener, events) = started();
        establish_previous(&mut session, "X");
        let _: Vec<_> = events.try_iter().collect();

        let link = MockLink::new();
        session.handle_peer_connected(link.clone());
        session.handle_peer_data(&frame(&system_info("Y", true)));

        assert_eq!(link.last_sent(), Some(Message::request(MessageType::Capabilities)));
        assert_eq!(session.previous_system_id(), Some("Y"));
        let received: Vec<_> = events.try_iter().collect();
        assert_eq!(
            received,
            vec![
                CompanionEvent::PeerConnected,
                CompanionEvent::SystemInfo(SystemInfo {
                    system_id: "Y".to_string(),
                    version: 1,
                    dropped: true,
                }),
            ]
        );
    }

    #[test]
    fn test_unsent_reply_keeps_peer_and_identity() {
        let (mut session, _listener, events) = started();
        let link = MockLink::new();
        session.handle_peer_connected(link.clone());
        link.0.borrow_mut().fail_writes = true;

        session.handle_peer_data(&frame(&system_info("Z", false)));

        assert_eq!(link.sent(), vec![Message::request(MessageType::SystemInfo)]);
        assert_eq!(session.status(), CompanionStatus::Connected);
        assert!(session.has_peer());
        assert_eq!(session.previous_system_id(), Some("Z"));
        assert_eq!(events.try_iter().count(), 2);
    }

    #[test]
    fn test_reset_response_requeries_capabilities() {
        let (mut session, _listener, events) = started();
        let link = MockLink::new();
        session.handle_peer_connected(link.clone());
        let _ = events.try_recv();

        session.handle_peer_data(&frame(&Message::Response {
            command: CommandCode::SystemReset,
            code: ResponseCode::SystemBusy,
        }));

        let received: Vec<_> = events.try_iter().collect();
        assert_eq!(
            received[1],
            CompanionEvent::ConnectionReestablished {
                command: CommandCode::SystemReset,
                response: ResponseCode::SystemBusy,
            }
        );
        assert_eq!(link.last_sent(), Some(Message::request(MessageType::Capabilities)));
        assert_eq!(session.status(), CompanionStatus::Connected);
    }

    #[test]
    fn test_failed_resume_goes_offline() {
        let (mut session, listener, events) = started();
        let link = MockLink::new();
        session.handle_peer_connected(link.clone());
        let _ = events.try_recv();

        session.handle_peer_data(&frame(&Message::Response {
            command: CommandCode::SystemResume,
            code: ResponseCode::ResumeFailed,
        }));

        assert_eq!(session.status(), CompanionStatus::Offline);
        assert!(link.0.borrow().closed);
        assert!(!listener.0.borrow().listening);
        let received: Vec<_> = events.try_iter().collect();
        assert_eq!(
            received,
            vec![
                CompanionEvent::Response {
                    command: CommandCode::SystemResume,
                    code: ResponseCode::ResumeFailed,
                },
                CompanionEvent::ConnectionReestablished {
                    command: CommandCode::SystemResume,
                    response: ResponseCode::ResumeFailed,
                },
                CompanionEvent::PeerDropped,
            ]
        );
    }

    #[test]
    fn test_successful_resume_keeps_session() {
        let (mut session, _listener, _events) = started();
        let link = MockLink::new();
        session.handle_peer_connected(link.clone());
        session.handle_peer_data(&frame(&Message::Response {
            command: CommandCode::SystemResume,
            code: ResponseCode::NoError,
        }));
        assert_eq!(session.status(), CompanionStatus::Connected);
        assert_eq!(link.sent().len(), 1);
    }

    #[test]
    fn test_frames_after_failed_resume_are_discarded() {
        let (mut session, _listener, events) = started();
        session.handle_peer_connected(MockLink::new());
        let _ = events.try_recv();

        let mut burst = frame(&Message::Response {
            command: CommandCode::SystemResume,
            code: ResponseCode::ResumeFailed,
        })
        .to_vec();
        burst.extend_from_slice(&frame(&Message::Capabilities(Capabilities::UNTAGGED_CAMERA)));
        session.handle_peer_data(&burst);

        assert!(events
            .try_iter()
            .all(|e| !matches!(e, CompanionEvent::Capabilities(_))));
    }

    // ========================================================================
    // Image relay commands
    // ========================================================================

    #[test]
    fn test_image_relay_frequency_packing() {
        let (mut session, _listener, _events) = started();
        let link = MockLink::new();
        session.handle_peer_connected(link.clone());

        assert!(session.start_image_relay(1.5));
        assert_eq!(
            link.last_sent(),
            Some(Message::Command {
                command: CommandCode::ImageRelayStart,
                args: vec![15],
            })
        );

        assert!(session.start_image_relay(0.26));
        assert_eq!(
            link.last_sent(),
            Some(Message::Command {
                command: CommandCode::ImageRelayStart,
                args: vec![3],
            })
        );

        assert!(!session.start_image_relay(30.0));
        assert!(!session.start_image_relay(-1.0));
        assert!(!session.start_image_relay(f64::NAN));

        assert!(session.stop_image_relay());
        assert_eq!(link.last_sent(), Some(Message::command(CommandCode::ImageRelayStop)));
    }
}
