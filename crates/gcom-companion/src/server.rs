//! TCP driver for the companion session.
//!
//! A single tokio task owns the [`CompanionSession`] and serializes every
//! state change: shell commands arrive over an mpsc channel, inbound
//! connections come from the listener while accepting is enabled, and each
//! accepted socket runs a reader and a writer task that report back with
//! their connection id so events from a dropped socket are ignored.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::Receiver;
use gcom_message::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::session::{CompanionEvent, CompanionSession, CompanionStatus};
use crate::transport::{PeerLink, PeerListener};

const READ_BUFFER_SIZE: usize = 8192;

// ============================================================================
// Listener
// ============================================================================

/// Non-blocking TCP listener with an accept gate.
#[derive(Debug, Default)]
pub struct TcpPeerListener {
    listener: Option<TcpListener>,
    accepting: bool,
}

impl TcpPeerListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting && self.listener.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        match &self.listener {
            Some(listener) => listener.accept().await,
            None => std::future::pending().await,
        }
    }
}

impl PeerListener for TcpPeerListener {
    type Link = TcpPeerLink;

    fn listen(&mut self, address: IpAddr, port: u16) -> io::Result<()> {
        self.close();
        let listener = std::net::TcpListener::bind((address, port))?;
        listener.set_nonblocking(true)?;
        self.listener = Some(TcpListener::from_std(listener)?);
        self.accepting = true;
        Ok(())
    }

    fn close(&mut self) {
        self.listener = None;
        self.accepting = false;
    }

    fn pause_accepting(&mut self) {
        self.accepting = false;
    }

    fn resume_accepting(&mut self) {
        self.accepting = true;
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Notifications from per-connection tasks.
#[derive(Debug)]
enum LinkEvent {
    Data { id: u64, data: Bytes },
    Closed { id: u64 },
}

/// An accepted TCP connection served by a reader and a writer task.
pub struct TcpPeerLink {
    id: u64,
    peer_addr: SocketAddr,
    writer: Option<mpsc::UnboundedSender<Bytes>>,
    connected: Arc<AtomicBool>,
    reader_task: JoinHandle<()>,
}

impl TcpPeerLink {
    fn spawn(id: u64, stream: TcpStream, peer_addr: SocketAddr, events: mpsc::UnboundedSender<LinkEvent>) -> Self {
        let _ = stream.set_nodelay(true);
        let (mut reader, mut writer) = stream.into_split();
        let connected = Arc::new(AtomicBool::new(true));
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Bytes>();

        let reader_connected = connected.clone();
        let reader_events = events.clone();
        let reader_task = tokio::spawn(async move {
            let mut buf = vec![0u8; READ_BUFFER_SIZE];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let data = Bytes::copy_from_slice(&buf[..n]);
                        if reader_events.send(LinkEvent::Data { id, data }).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("companion read error: {}", e);
                        break;
                    }
                }
            }
            reader_connected.store(false, Ordering::SeqCst);
            let _ = reader_events.send(LinkEvent::Closed { id });
        });

        let writer_connected = connected.clone();
        tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                if let Err(e) = writer.write_all(&frame).await {
                    debug!("companion write error: {}", e);
                    writer_connected.store(false, Ordering::SeqCst);
                    let _ = events.send(LinkEvent::Closed { id });
                    return;
                }
            }
            let _ = writer.shutdown().await;
        });

        TcpPeerLink {
            id,
            peer_addr,
            writer: Some(frame_tx),
            connected,
            reader_task,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl PeerLink for TcpPeerLink {
    fn is_connected(&self) -> bool {
        self.writer.is_some() && self.connected.load(Ordering::SeqCst)
    }

    fn write_frame(&mut self, frame: Bytes) -> io::Result<()> {
        if !self.is_connected() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "peer not connected"));
        }
        match &self.writer {
            Some(writer) => writer
                .send(frame)
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "writer task stopped")),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "peer closed")),
        }
    }

    fn close(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        // Dropping the sender lets the writer task flush and shut down.
        self.writer = None;
        self.reader_task.abort();
    }
}

impl Drop for TcpPeerLink {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

// ============================================================================
// Actor
// ============================================================================

enum CompanionCommand {
    Start {
        address: IpAddr,
        port: u16,
        reply: oneshot::Sender<bool>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    CancelConnection {
        reply: oneshot::Sender<()>,
    },
    Send {
        message: Message,
        reply: oneshot::Sender<bool>,
    },
    StartImageRelay {
        frequency_hz: f64,
        reply: oneshot::Sender<bool>,
    },
    StopImageRelay {
        reply: oneshot::Sender<bool>,
    },
    SetAutoResume(bool),
    Status {
        reply: oneshot::Sender<CompanionStatus>,
    },
    LocalAddr {
        reply: oneshot::Sender<Option<SocketAddr>>,
    },
    Subscribe {
        reply: oneshot::Sender<Receiver<CompanionEvent>>,
    },
    Shutdown,
}

/// Cloneable handle to a running companion driver.
#[derive(Clone)]
pub struct CompanionHandle {
    commands: mpsc::UnboundedSender<CompanionCommand>,
}

impl CompanionHandle {
    /// Spawn the driver task on the current runtime. The session starts offline.
    pub fn spawn(auto_resume: bool) -> (Self, JoinHandle<()>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let mut session = CompanionSession::new(TcpPeerListener::new());
        session.set_auto_resume(auto_resume);
        let task = tokio::spawn(run(session, command_rx));
        (CompanionHandle { commands }, task)
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> CompanionCommand) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(build(tx)).ok()?;
        rx.await.ok()
    }

    pub async fn start(&self, address: IpAddr, port: u16) -> bool {
        self.request(|reply| CompanionCommand::Start { address, port, reply })
            .await
            .unwrap_or(false)
    }

    pub async fn stop(&self) {
        let _ = self.request(|reply| CompanionCommand::Stop { reply }).await;
    }

    pub async fn cancel_connection(&self) {
        let _ = self.request(|reply| CompanionCommand::CancelConnection { reply }).await;
    }

    pub async fn send(&self, message: Message) -> bool {
        self.request(|reply| CompanionCommand::Send { message, reply })
            .await
            .unwrap_or(false)
    }

    pub async fn start_image_relay(&self, frequency_hz: f64) -> bool {
        self.request(|reply| CompanionCommand::StartImageRelay { frequency_hz, reply })
            .await
            .unwrap_or(false)
    }

    pub async fn stop_image_relay(&self) -> bool {
        self.request(|reply| CompanionCommand::StopImageRelay { reply })
            .await
            .unwrap_or(false)
    }

    pub fn set_auto_resume(&self, enabled: bool) {
        let _ = self.commands.send(CompanionCommand::SetAutoResume(enabled));
    }

    pub async fn status(&self) -> CompanionStatus {
        self.request(|reply| CompanionCommand::Status { reply })
            .await
            .unwrap_or(CompanionStatus::Offline)
    }

    /// Address the listener is bound to, if listening.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.request(|reply| CompanionCommand::LocalAddr { reply })
            .await
            .flatten()
    }

    /// Subscribe to session events. Returns `None` if the driver has exited.
    pub async fn subscribe(&self) -> Option<Receiver<CompanionEvent>> {
        self.request(|reply| CompanionCommand::Subscribe { reply }).await
    }

    /// Stop the session and end the driver task.
    pub fn shutdown(&self) {
        let _ = self.commands.send(CompanionCommand::Shutdown);
    }
}

async fn run(
    mut session: CompanionSession<TcpPeerListener>,
    mut commands: mpsc::UnboundedReceiver<CompanionCommand>,
) {
    let (link_tx, mut link_rx) = mpsc::unbounded_channel::<LinkEvent>();
    let mut next_id: u64 = 0;

    loop {
        let accepting = session.listener().is_accepting();
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                if !handle_command(&mut session, command) {
                    break;
                }
            }

            accepted = session.listener().accept(), if accepting => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        next_id += 1;
                        info!("companion connection from {}", peer_addr);
                        let link = TcpPeerLink::spawn(next_id, stream, peer_addr, link_tx.clone());
                        session.handle_peer_connected(link);
                    }
                    Err(e) => warn!("companion accept failed: {}", e),
                }
            }

            Some(event) = link_rx.recv() => {
                let current = session.peer().map(TcpPeerLink::id);
                match event {
                    LinkEvent::Data { id, data } if current == Some(id) => session.handle_peer_data(&data),
                    LinkEvent::Closed { id } if current == Some(id) => session.handle_peer_disconnected(),
                    stale => trace!("ignoring stale link event {:?}", stale),
                }
            }
        }
    }

    session.stop();
    debug!("companion driver exited");
}

/// Returns false when the driver should exit.
fn handle_command(session: &mut CompanionSession<TcpPeerListener>, command: CompanionCommand) -> bool {
    match command {
        CompanionCommand::Start { address, port, reply } => {
            let _ = reply.send(session.start(address, port));
        }
        CompanionCommand::Stop { reply } => {
            session.stop();
            let _ = reply.send(());
        }
        CompanionCommand::CancelConnection { reply } => {
            session.cancel_connection();
            let _ = reply.send(());
        }
        CompanionCommand::Send { message, reply } => {
            let _ = reply.send(session.send(&message));
        }
        CompanionCommand::StartImageRelay { frequency_hz, reply } => {
            let _ = reply.send(session.start_image_relay(frequency_hz));
        }
        CompanionCommand::StopImageRelay { reply } => {
            let _ = reply.send(session.stop_image_relay());
        }
        CompanionCommand::SetAutoResume(enabled) => session.set_auto_resume(enabled),
        CompanionCommand::Status { reply } => {
            let _ = reply.send(session.status());
        }
        CompanionCommand::LocalAddr { reply } => {
            let _ = reply.send(session.listener().local_addr());
        }
        CompanionCommand::Subscribe { reply } => {
            let _ = reply.send(session.subscribe());
        }
        CompanionCommand::Shutdown => return false,
    }
    true
}
