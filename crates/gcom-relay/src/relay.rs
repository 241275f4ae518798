//! Autopilot relay state machine.
//!
//! The relay is a MAVLink client of the autopilot bridge. It tracks the
//! connection, turns operator commands into MAVLink messages, and answers
//! the autopilot's item requests during a mission upload. A connection that
//! drops mid-upload has [`UPLOAD_RECONNECT_GRACE`] to come back before the
//! upload is declared failed, since the autopilot stops re-requesting items
//! after that.

use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::Receiver;
use gcom_common::EventBus;
use gcom_mavlink::dialect::{
    MavCmd, MavMessage, MavMissionResult, MavResult, CAMERA_FEEDBACK_DATA, COMMAND_LONG_DATA,
    DIGICAM_CONTROL_DATA, GLOBAL_POSITION_INT_DATA, MISSION_CLEAR_ALL_DATA, MISSION_COUNT_DATA,
};
use gcom_mavlink::mavlink::{MavHeader, Message};
use gcom_mavlink::{FrameStatus, MavlinkCodec, MavlinkEncoder};
use gcom_metrics::{metric_defs, Link};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::mission::{MissionPlan, Waypoint, CLIMB_ANGLE_RANGE};
use crate::modes::{FlightMode, VehicleClass};
use crate::transport::{AutopilotLink, SocketState};

pub const DEFAULT_AUTOPILOT_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_AUTOPILOT_PORT: u16 = 14550;

/// MAVLink identity of the ground station.
pub const GCS_SYSTEM_ID: u8 = 2;
pub const GCS_COMPONENT_ID: u8 = 1;

/// How long a mid-upload disconnect may last before the upload fails.
pub const UPLOAD_RECONNECT_GRACE: Duration = Duration::from_millis(7000);

const DEFAULT_TARGET_SYSTEM: u8 = 1;
const DEFAULT_TARGET_COMPONENT: u8 = 1;

/// SET_MODE is sent raw: the typed base_mode cannot carry the bare flag.
const SET_MODE_MSG_ID: u32 = 11;
const MAV_MODE_FLAG_CUSTOM_MODE_ENABLED: u8 = 1;

// ============================================================================
// State and Events
// ============================================================================

/// Relay connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl RelayStatus {
    fn ordinal(self) -> f64 {
        match self {
            RelayStatus::Disconnected => 0.0,
            RelayStatus::Connecting => 1.0,
            RelayStatus::Connected => 2.0,
        }
    }
}

impl std::fmt::Display for RelayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayStatus::Disconnected => write!(f, "disconnected"),
            RelayStatus::Connecting => write!(f, "connecting"),
            RelayStatus::Connected => write!(f, "connected"),
        }
    }
}

/// Mission upload state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadState {
    Ready,
    Sending,
}

/// Events published by [`AutopilotRelay`].
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Connected,
    Disconnected,
    GlobalPosition(GLOBAL_POSITION_INT_DATA),
    CameraFeedback(CAMERA_FEEDBACK_DATA),
    MissionRequest { seq: u16 },
    MissionAck(MavMissionResult),
    CommandAck { command: MavCmd, result: MavResult },
    /// A mission upload finished. `true` if the autopilot accepted it.
    UploadResult(bool),
    /// A command was acknowledged. `true` if accepted.
    CommandResult(bool),
}

/// DIGICAM_CONTROL parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraTrigger {
    pub session: u8,
    pub zoom_pos: u8,
    pub zoom_step: i8,
    pub focus_lock: u8,
    pub shot: u8,
    pub command_id: u8,
    pub extra_param: u8,
    pub extra_value: f32,
}

impl Default for CameraTrigger {
    /// A single shot with everything else left alone.
    fn default() -> Self {
        CameraTrigger {
            session: 0,
            zoom_pos: 0,
            zoom_step: 0,
            focus_lock: 0,
            shot: 1,
            command_id: 0,
            extra_param: 0,
            extra_value: 0.0,
        }
    }
}

/// Operator commands, for drivers that queue them.
#[derive(Debug, Clone, PartialEq)]
pub enum FlightCommand {
    SetMode(FlightMode),
    ChangeSpeed(f64),
    Arm,
    StartMission,
    Takeoff { altitude: f64 },
    Land,
    ClearMission,
    TriggerCamera(CameraTrigger),
    WriteMission {
        takeoff_altitude: f64,
        waypoints: Vec<Waypoint>,
        climb_angle: f64,
    },
}

// ============================================================================
// Relay
// ============================================================================

/// MAVLink client of the autopilot bridge.
pub struct AutopilotRelay<T: AutopilotLink> {
    link: T,
    encoder: MavlinkEncoder,
    codec: MavlinkCodec,
    status: RelayStatus,
    address: String,
    port: u16,
    target_system: u8,
    target_component: u8,
    vehicle_class: VehicleClass,
    /// Present only while uploading.
    upload: Option<MissionPlan>,
    disconnected_at: Option<Instant>,
    events: EventBus<RelayEvent>,
}

impl<T: AutopilotLink> AutopilotRelay<T> {
    /// Create a disconnected relay targeting the default bridge endpoint.
    pub fn new(link: T) -> Self {
        Self::with_identity(link, GCS_SYSTEM_ID, GCS_COMPONENT_ID)
    }

    /// Like [`AutopilotRelay::new`] with a custom ground-station identity.
    pub fn with_identity(link: T, system_id: u8, component_id: u8) -> Self {
        AutopilotRelay {
            link,
            encoder: MavlinkEncoder::new(system_id, component_id),
            codec: MavlinkCodec::new(),
            status: RelayStatus::Disconnected,
            address: DEFAULT_AUTOPILOT_ADDRESS.to_string(),
            port: DEFAULT_AUTOPILOT_PORT,
            target_system: DEFAULT_TARGET_SYSTEM,
            target_component: DEFAULT_TARGET_COMPONENT,
            vehicle_class: VehicleClass::default(),
            upload: None,
            disconnected_at: None,
            events: EventBus::new(),
        }
    }

    pub fn status(&self) -> RelayStatus {
        self.status
    }

    pub fn upload_state(&self) -> UploadState {
        if self.upload.is_some() {
            UploadState::Sending
        } else {
            UploadState::Ready
        }
    }

    /// Vehicle class from the last heartbeat.
    pub fn vehicle_class(&self) -> VehicleClass {
        self.vehicle_class
    }

    /// Target (system, component) from the last heartbeat.
    pub fn target(&self) -> (u8, u8) {
        (self.target_system, self.target_component)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn link(&self) -> &T {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut T {
        &mut self.link
    }

    pub fn subscribe(&mut self) -> Receiver<RelayEvent> {
        self.events.subscribe()
    }

    /// Set the bridge endpoint, dropping any open connection first.
    pub fn configure(&mut self, address: impl Into<String>, port: u16) {
        if self.link.state() != SocketState::Unconnected {
            self.stop();
        }
        self.address = address.into();
        self.port = port;
    }

    /// Begin connecting. Fails if the transport is not idle.
    pub fn start(&mut self) -> bool {
        let state = self.link.state();
        if state != SocketState::Unconnected {
            debug!("autopilot link busy ({}), not connecting", state);
            return false;
        }

        info!("connecting to autopilot at {}:{}", self.address, self.port);
        self.set_status(RelayStatus::Connecting);
        self.link.connect(&self.address, self.port);
        true
    }

    /// Drop the connection. A pending upload is abandoned without a result.
    pub fn stop(&mut self) {
        if self.upload.take().is_some() {
            debug!("mission upload abandoned");
        }
        self.disconnected_at = None;

        if self.link.state() == SocketState::Unconnected && self.status == RelayStatus::Disconnected {
            return;
        }
        self.link.disconnect();
        self.handle_disconnected(Instant::now());
    }

    /// Run a queued command.
    pub fn execute(&mut self, command: FlightCommand) -> bool {
        match command {
            FlightCommand::SetMode(mode) => self.set_mode(mode),
            FlightCommand::ChangeSpeed(speed) => self.change_speed(speed),
            FlightCommand::Arm => self.arm(),
            FlightCommand::StartMission => self.start_mission(),
            FlightCommand::Takeoff { altitude } => self.takeoff(altitude),
            FlightCommand::Land => self.land(),
            FlightCommand::ClearMission => self.clear_mission(),
            FlightCommand::TriggerCamera(trigger) => self.trigger_camera(trigger),
            FlightCommand::WriteMission {
                takeoff_altitude,
                waypoints,
                climb_angle,
            } => self.write_mission(takeoff_altitude, waypoints, climb_angle),
        }
    }

    // ========================================================================
    // Flight Commands
    // ========================================================================

    pub fn set_mode(&mut self, mode: FlightMode) -> bool {
        let Some(custom_mode) = mode.custom_mode(self.vehicle_class) else {
            debug!("{} is not available on {:?}", mode, self.vehicle_class);
            return false;
        };
        if !self.is_connected() {
            return false;
        }

        let mut payload = [0u8; 6];
        payload[..4].copy_from_slice(&custom_mode.to_le_bytes());
        payload[4] = self.target_system;
        payload[5] = MAV_MODE_FLAG_CUSTOM_MODE_ENABLED;

        match self.encoder.encode_raw(SET_MODE_MSG_ID, &payload) {
            Ok(frame) => self.write(frame),
            Err(e) => {
                warn!("failed to encode SET_MODE: {}", e);
                false
            }
        }
    }

    /// Set the target speed in m/s.
    pub fn change_speed(&mut self, speed: f64) -> bool {
        if !self.vehicle_class.speed_range().contains(&speed) {
            debug!("speed {} m/s out of range for {:?}", speed, self.vehicle_class);
            return false;
        }
        self.command_long(MavCmd::MAV_CMD_DO_CHANGE_SPEED, [0.0, speed as f32, 0.0, 0.0, 0.0, 0.0, 0.0])
    }

    pub fn arm(&mut self) -> bool {
        self.command_long(MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
    }

    pub fn start_mission(&mut self) -> bool {
        self.command_long(MavCmd::MAV_CMD_MISSION_START, [0.0; 7])
    }

    pub fn takeoff(&mut self, altitude: f64) -> bool {
        if !self.vehicle_class.supports_vertical_commands() {
            return false;
        }
        self.command_long(MavCmd::MAV_CMD_NAV_TAKEOFF, [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, altitude as f32])
    }

    pub fn land(&mut self) -> bool {
        if !self.vehicle_class.supports_vertical_commands() {
            return false;
        }
        self.command_long(MavCmd::MAV_CMD_NAV_LAND, [0.0; 7])
    }

    pub fn clear_mission(&mut self) -> bool {
        if self.upload.is_some() {
            return false;
        }
        self.send(&MavMessage::MISSION_CLEAR_ALL(MISSION_CLEAR_ALL_DATA {
            target_system: self.target_system,
            target_component: self.target_component,
            ..Default::default()
        }))
    }

    pub fn trigger_camera(&mut self, trigger: CameraTrigger) -> bool {
        self.send(&MavMessage::DIGICAM_CONTROL(DIGICAM_CONTROL_DATA {
            extra_value: trigger.extra_value,
            target_system: self.target_system,
            target_component: self.target_component,
            session: trigger.session,
            zoom_pos: trigger.zoom_pos,
            zoom_step: trigger.zoom_step,
            focus_lock: trigger.focus_lock,
            shot: trigger.shot,
            command_id: trigger.command_id,
            extra_param: trigger.extra_param,
        }))
    }

    /// Start a mission upload by announcing the item count.
    ///
    /// The autopilot then pulls each item. Completion arrives as
    /// [`RelayEvent::UploadResult`].
    pub fn write_mission(&mut self, takeoff_altitude: f64, waypoints: Vec<Waypoint>, climb_angle: f64) -> bool {
        if self.upload.is_some() {
            debug!("mission upload already in progress");
            return false;
        }
        if !self.is_connected() {
            return false;
        }
        if !CLIMB_ANGLE_RANGE.contains(&climb_angle) {
            warn!("climb angle {} outside {:?}", climb_angle, CLIMB_ANGLE_RANGE);
            return false;
        }

        let plan = MissionPlan {
            takeoff_altitude,
            waypoints,
            climb_angle,
        };
        let Ok(count) = u16::try_from(plan.item_count()) else {
            warn!("mission of {} waypoints is too long", plan.waypoints.len());
            return false;
        };

        let announced = self.send(&MavMessage::MISSION_COUNT(MISSION_COUNT_DATA {
            count,
            target_system: self.target_system,
            target_component: self.target_component,
            ..Default::default()
        }));
        if announced {
            info!("uploading mission of {} items", count);
            self.upload = Some(plan);
            self.disconnected_at = None;
        }
        announced
    }

    fn command_long(&mut self, command: MavCmd, params: [f32; 7]) -> bool {
        let [param1, param2, param3, param4, param5, param6, param7] = params;
        self.send(&MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            param1,
            param2,
            param3,
            param4,
            param5,
            param6,
            param7,
            command,
            target_system: self.target_system,
            target_component: self.target_component,
            confirmation: 0,
        }))
    }

    fn is_connected(&self) -> bool {
        self.link.state() == SocketState::Connected
    }

    fn send(&mut self, message: &MavMessage) -> bool {
        if !self.is_connected() {
            debug!("autopilot not connected, dropping {}", message.message_name());
            return false;
        }
        let frame = self.encoder.encode(message);
        self.write(frame)
    }

    fn write(&mut self, frame: Bytes) -> bool {
        match self.link.write(frame) {
            Ok(()) => {
                metrics::counter!(metric_defs::FRAMES_SENT.name, &Link::Autopilot.labels()).increment(1);
                true
            }
            Err(e) => {
                warn!("autopilot write failed: {}", e);
                false
            }
        }
    }

    fn set_status(&mut self, status: RelayStatus) {
        self.status = status;
        metrics::gauge!(metric_defs::SESSION_STATE.name, &Link::Autopilot.labels()).set(status.ordinal());
    }

    // ========================================================================
    // Transport Callbacks
    // ========================================================================

    /// The transport moved to `state`.
    pub fn handle_state_changed(&mut self, state: SocketState, now: Instant) {
        trace!("autopilot socket {}", state);
        match state {
            SocketState::HostLookup | SocketState::Connecting => self.set_status(RelayStatus::Connecting),
            SocketState::Connected => self.handle_connected(now),
            SocketState::Unconnected => {
                // Also covers a failed attempt.
                if self.status != RelayStatus::Disconnected {
                    self.handle_disconnected(now);
                }
            }
            SocketState::Closing => {}
        }
    }

    pub fn handle_connected(&mut self, now: Instant) {
        if self.status == RelayStatus::Connected {
            return;
        }

        if let Some(since) = self.disconnected_at.take() {
            let outage = now.saturating_duration_since(since);
            if self.upload.is_some() {
                if outage >= UPLOAD_RECONNECT_GRACE {
                    warn!("autopilot was gone for {:?}, mission upload abandoned", outage);
                    self.finish_upload(false, "timeout");
                } else {
                    info!("autopilot back after {:?}, mission upload continues", outage);
                }
            }
        }

        self.codec.clear();
        self.set_status(RelayStatus::Connected);
        info!("autopilot connected");
        metrics::counter!(metric_defs::PEER_CONNECTIONS.name, &Link::Autopilot.labels()).increment(1);
        self.events.publish(RelayEvent::Connected);
    }

    /// The connection closed or an attempt failed.
    pub fn handle_disconnected(&mut self, now: Instant) {
        // The grace period counts from the first drop, not from each retry.
        if self.upload.is_some() && self.disconnected_at.is_none() {
            self.disconnected_at = Some(now);
        }

        self.codec.clear();
        if self.status == RelayStatus::Connected {
            metrics::counter!(metric_defs::PEER_DROPS.name, &Link::Autopilot.labels()).increment(1);
        }
        self.set_status(RelayStatus::Disconnected);
        info!("autopilot disconnected");
        self.events.publish(RelayEvent::Disconnected);
    }

    /// Bytes arrived from the bridge. Every complete frame is handled.
    pub fn handle_bytes(&mut self, data: &[u8]) {
        metrics::counter!(metric_defs::BYTES_RECEIVED.name, &Link::Autopilot.labels())
            .increment(data.len() as u64);
        self.codec.push(data);

        loop {
            match self.codec.decode() {
                FrameStatus::Success(header, message) => {
                    metrics::counter!(metric_defs::FRAMES_DECODED.name, &Link::Autopilot.labels()).increment(1);
                    self.handle_message(header, message);
                }
                FrameStatus::Corrupt(e) => {
                    trace!("autopilot frame discarded: {}", e);
                    metrics::counter!(metric_defs::FRAMES_CORRUPT.name, &Link::Autopilot.labels()).increment(1);
                }
                FrameStatus::Incomplete => break,
            }
        }
    }

    fn handle_message(&mut self, header: MavHeader, message: MavMessage) {
        match message {
            MavMessage::HEARTBEAT(heartbeat) => {
                self.target_system = header.system_id;
                self.target_component = header.component_id;
                let class = VehicleClass::from_mav_type(heartbeat.mavtype);
                if class != self.vehicle_class {
                    info!("vehicle class is now {:?}", class);
                    self.vehicle_class = class;
                }
            }
            MavMessage::GLOBAL_POSITION_INT(position) => {
                self.events.publish(RelayEvent::GlobalPosition(position));
            }
            MavMessage::CAMERA_FEEDBACK(feedback) => {
                self.events.publish(RelayEvent::CameraFeedback(feedback));
            }
            MavMessage::MISSION_REQUEST(request) => self.handle_mission_request(request.seq),
            MavMessage::MISSION_REQUEST_INT(request) => self.handle_mission_request(request.seq),
            MavMessage::MISSION_ACK(ack) => self.handle_mission_ack(ack.mavtype),
            MavMessage::COMMAND_ACK(ack) => self.handle_command_ack(ack.command, ack.result),
            other => trace!("ignoring {}", other.message_name()),
        }
    }

    fn handle_mission_request(&mut self, seq: u16) {
        self.events.publish(RelayEvent::MissionRequest { seq });

        let Some(plan) = &self.upload else {
            debug!("mission item {} requested with no upload in progress", seq);
            return;
        };
        let Some(item) = plan.item(seq, self.vehicle_class) else {
            warn!("mission item {} requested, last is {}", seq, plan.land_seq());
            return;
        };

        let data = item.to_mavlink(self.target_system, self.target_component);
        if self.send(&MavMessage::MISSION_ITEM_INT(data)) {
            trace!("sent mission item {}", seq);
            metrics::counter!(metric_defs::MISSION_ITEMS_SENT.name, &Link::Autopilot.labels()).increment(1);
        }
    }

    fn handle_mission_ack(&mut self, result: MavMissionResult) {
        self.events.publish(RelayEvent::MissionAck(result));

        if self.upload.is_none() {
            return;
        }
        match result {
            MavMissionResult::MAV_MISSION_INVALID_SEQUENCE => {
                debug!("autopilot reported an out-of-sequence item");
            }
            MavMissionResult::MAV_MISSION_ACCEPTED => {
                info!("mission accepted");
                self.finish_upload(true, "accepted");
            }
            other => {
                warn!("mission rejected: {:?}", other);
                self.finish_upload(false, "rejected");
            }
        }
    }

    fn handle_command_ack(&mut self, command: MavCmd, result: MavResult) {
        self.events.publish(RelayEvent::CommandAck { command, result });

        let accepted = result == MavResult::MAV_RESULT_ACCEPTED;
        let label = if accepted { "accepted" } else { "rejected" };
        debug!("{:?} acknowledged with {:?}", command, result);
        metrics::counter!(metric_defs::COMMAND_ACKS.name, &Link::Autopilot.labels_with("result", label)).increment(1);
        self.events.publish(RelayEvent::CommandResult(accepted));
    }

    fn finish_upload(&mut self, success: bool, result: &'static str) {
        self.upload = None;
        self.disconnected_at = None;
        metrics::counter!(metric_defs::MISSION_UPLOADS.name, &Link::Autopilot.labels_with("result", result)).increment(1);
        self.events.publish(RelayEvent::UploadResult(success));
    }
}
