//! TCP driver for the autopilot relay.
//!
//! One tokio task owns the [`AutopilotRelay`]. Each connection attempt runs
//! in its own task that reports lookup, connect, data and close back to the
//! driver. Attempts are numbered, and notifications from an abandoned
//! attempt are dropped.

use std::io;
use std::time::Instant;

use bytes::Bytes;
use crossbeam_channel::Receiver;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::mission::Waypoint;
use crate::modes::FlightMode;
use crate::relay::{
    AutopilotRelay, CameraTrigger, FlightCommand, RelayEvent, RelayStatus, UploadState, GCS_COMPONENT_ID,
    GCS_SYSTEM_ID,
};
use crate::transport::{AutopilotLink, SocketState};

const READ_BUFFER_SIZE: usize = 4096;

// ============================================================================
// Connection
// ============================================================================

/// Notifications from a connection task.
#[derive(Debug)]
enum LinkEvent {
    State { attempt: u64, state: SocketState },
    Attached { attempt: u64, writer: mpsc::UnboundedSender<Bytes> },
    Data { attempt: u64, data: Bytes },
    Closed { attempt: u64 },
}

impl LinkEvent {
    fn attempt(&self) -> u64 {
        match self {
            LinkEvent::State { attempt, .. }
            | LinkEvent::Attached { attempt, .. }
            | LinkEvent::Data { attempt, .. }
            | LinkEvent::Closed { attempt } => *attempt,
        }
    }
}

/// What the relay should be told about a [`LinkEvent`].
enum Notification {
    State(SocketState),
    Data(Bytes),
}

/// Outbound TCP connection to the autopilot bridge.
pub struct TcpAutopilotLink {
    state: SocketState,
    attempt: u64,
    events: mpsc::UnboundedSender<LinkEvent>,
    writer: Option<mpsc::UnboundedSender<Bytes>>,
    task: Option<JoinHandle<()>>,
}

impl TcpAutopilotLink {
    fn new(events: mpsc::UnboundedSender<LinkEvent>) -> Self {
        TcpAutopilotLink {
            state: SocketState::Unconnected,
            attempt: 0,
            events,
            writer: None,
            task: None,
        }
    }

    /// Fold a task notification into the link state.
    fn apply(&mut self, event: LinkEvent) -> Option<Notification> {
        if event.attempt() != self.attempt || self.task.is_none() {
            return None;
        }

        match event {
            LinkEvent::State { state, .. } => {
                self.state = state;
                Some(Notification::State(state))
            }
            LinkEvent::Attached { writer, .. } => {
                self.writer = Some(writer);
                self.state = SocketState::Connected;
                Some(Notification::State(SocketState::Connected))
            }
            LinkEvent::Data { data, .. } => Some(Notification::Data(data)),
            LinkEvent::Closed { .. } => {
                if let Some(task) = self.task.take() {
                    task.abort();
                }
                self.writer = None;
                self.state = SocketState::Unconnected;
                Some(Notification::State(SocketState::Unconnected))
            }
        }
    }
}

impl AutopilotLink for TcpAutopilotLink {
    fn state(&self) -> SocketState {
        self.state
    }

    fn connect(&mut self, address: &str, port: u16) {
        self.disconnect();
        self.state = SocketState::HostLookup;
        let attempt = self.attempt;
        self.task = Some(tokio::spawn(run_connection(
            attempt,
            address.to_string(),
            port,
            self.events.clone(),
        )));
    }

    fn disconnect(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        // Dropping the sender lets the writer task flush and shut down.
        self.writer = None;
        self.state = SocketState::Unconnected;
        self.attempt += 1;
    }

    fn write(&mut self, frame: Bytes) -> io::Result<()> {
        match (&self.writer, self.state) {
            (Some(writer), SocketState::Connected) => writer
                .send(frame)
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "writer task stopped")),
            _ => Err(io::Error::new(io::ErrorKind::NotConnected, "autopilot not connected")),
        }
    }
}

impl Drop for TcpAutopilotLink {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_connection(attempt: u64, address: String, port: u16, events: mpsc::UnboundedSender<LinkEvent>) {
    let _ = events.send(LinkEvent::State {
        attempt,
        state: SocketState::HostLookup,
    });
    let target = match lookup_host((address.as_str(), port)).await {
        Ok(mut addrs) => addrs.next(),
        Err(e) => {
            warn!("cannot resolve {}: {}", address, e);
            None
        }
    };
    let Some(target) = target else {
        let _ = events.send(LinkEvent::Closed { attempt });
        return;
    };

    let _ = events.send(LinkEvent::State {
        attempt,
        state: SocketState::Connecting,
    });
    let stream = match TcpStream::connect(target).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!("autopilot connect to {} failed: {}", target, e);
            let _ = events.send(LinkEvent::Closed { attempt });
            return;
        }
    };
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();

    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Bytes>();
    let writer_events = events.clone();
    tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if let Err(e) = writer.write_all(&frame).await {
                debug!("autopilot write error: {}", e);
                let _ = writer_events.send(LinkEvent::Closed { attempt });
                return;
            }
        }
        let _ = writer.shutdown().await;
    });

    if events.send(LinkEvent::Attached { attempt, writer: frame_tx }).is_err() {
        return;
    }

    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let data = Bytes::copy_from_slice(&buf[..n]);
                if events.send(LinkEvent::Data { attempt, data }).is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!("autopilot read error: {}", e);
                break;
            }
        }
    }
    let _ = events.send(LinkEvent::Closed { attempt });
}

// ============================================================================
// Actor
// ============================================================================

enum RelayCommand {
    Configure { address: String, port: u16 },
    Start { reply: oneshot::Sender<bool> },
    Stop { reply: oneshot::Sender<()> },
    Execute {
        command: FlightCommand,
        reply: oneshot::Sender<bool>,
    },
    Status { reply: oneshot::Sender<RelayStatus> },
    UploadState { reply: oneshot::Sender<UploadState> },
    Subscribe { reply: oneshot::Sender<Receiver<RelayEvent>> },
    Shutdown,
}

/// Cloneable handle to a running relay driver.
#[derive(Clone)]
pub struct RelayHandle {
    commands: mpsc::UnboundedSender<RelayCommand>,
}

impl RelayHandle {
    /// Spawn the driver on the current runtime with the default ground
    /// station identity.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        Self::spawn_with_identity(GCS_SYSTEM_ID, GCS_COMPONENT_ID)
    }

    pub fn spawn_with_identity(system_id: u8, component_id: u8) -> (Self, JoinHandle<()>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let relay = AutopilotRelay::with_identity(TcpAutopilotLink::new(link_tx), system_id, component_id);
        let task = tokio::spawn(run(relay, command_rx, link_rx));
        (RelayHandle { commands }, task)
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> RelayCommand) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(build(tx)).ok()?;
        rx.await.ok()
    }

    pub fn configure(&self, address: impl Into<String>, port: u16) {
        let _ = self.commands.send(RelayCommand::Configure {
            address: address.into(),
            port,
        });
    }

    pub async fn start(&self) -> bool {
        self.request(|reply| RelayCommand::Start { reply }).await.unwrap_or(false)
    }

    pub async fn stop(&self) {
        let _ = self.request(|reply| RelayCommand::Stop { reply }).await;
    }

    pub async fn execute(&self, command: FlightCommand) -> bool {
        self.request(|reply| RelayCommand::Execute { command, reply })
            .await
            .unwrap_or(false)
    }

    pub async fn set_mode(&self, mode: FlightMode) -> bool {
        self.execute(FlightCommand::SetMode(mode)).await
    }

    pub async fn change_speed(&self, speed: f64) -> bool {
        self.execute(FlightCommand::ChangeSpeed(speed)).await
    }

    pub async fn arm(&self) -> bool {
        self.execute(FlightCommand::Arm).await
    }

    pub async fn start_mission(&self) -> bool {
        self.execute(FlightCommand::StartMission).await
    }

    pub async fn takeoff(&self, altitude: f64) -> bool {
        self.execute(FlightCommand::Takeoff { altitude }).await
    }

    pub async fn land(&self) -> bool {
        self.execute(FlightCommand::Land).await
    }

    pub async fn clear_mission(&self) -> bool {
        self.execute(FlightCommand::ClearMission).await
    }

    pub async fn trigger_camera(&self, trigger: CameraTrigger) -> bool {
        self.execute(FlightCommand::TriggerCamera(trigger)).await
    }

    pub async fn write_mission(&self, takeoff_altitude: f64, waypoints: Vec<Waypoint>, climb_angle: f64) -> bool {
        self.execute(FlightCommand::WriteMission {
            takeoff_altitude,
            waypoints,
            climb_angle,
        })
        .await
    }

    pub async fn status(&self) -> RelayStatus {
        self.request(|reply| RelayCommand::Status { reply })
            .await
            .unwrap_or(RelayStatus::Disconnected)
    }

    pub async fn upload_state(&self) -> UploadState {
        self.request(|reply| RelayCommand::UploadState { reply })
            .await
            .unwrap_or(UploadState::Ready)
    }

    /// Subscribe to relay events. Returns `None` if the driver has exited.
    pub async fn subscribe(&self) -> Option<Receiver<RelayEvent>> {
        self.request(|reply| RelayCommand::Subscribe { reply }).await
    }

    /// Disconnect and end the driver task.
    pub fn shutdown(&self) {
        let _ = self.commands.send(RelayCommand::Shutdown);
    }
}

async fn run(
    mut relay: AutopilotRelay<TcpAutopilotLink>,
    mut commands: mpsc::UnboundedReceiver<RelayCommand>,
    mut link_events: mpsc::UnboundedReceiver<LinkEvent>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                if !handle_command(&mut relay, command) {
                    break;
                }
            }

            Some(event) = link_events.recv() => {
                match relay.link_mut().apply(event) {
                    Some(Notification::State(state)) => relay.handle_state_changed(state, Instant::now()),
                    Some(Notification::Data(data)) => relay.handle_bytes(&data),
                    None => trace!("ignoring stale autopilot link event"),
                }
            }
        }
    }

    relay.stop();
    info!("autopilot driver exited");
}

/// Returns false when the driver should exit.
fn handle_command(relay: &mut AutopilotRelay<TcpAutopilotLink>, command: RelayCommand) -> bool {
    match command {
        RelayCommand::Configure { address, port } => relay.configure(address, port),
        RelayCommand::Start { reply } => {
            let _ = reply.send(relay.start());
        }
        RelayCommand::Stop { reply } => {
            relay.stop();
            let _ = reply.send(());
        }
        RelayCommand::Execute { command, reply } => {
            let _ = reply.send(relay.execute(command));
        }
        RelayCommand::Status { reply } => {
            let _ = reply.send(relay.status());
        }
        RelayCommand::UploadState { reply } => {
            let _ = reply.send(relay.upload_state());
        }
        RelayCommand::Subscribe { reply } => {
            let _ = reply.send(relay.subscribe());
        }
        RelayCommand::Shutdown => return false,
    }
    true
}
