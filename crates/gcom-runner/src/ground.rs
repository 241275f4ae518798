//! Ground station orchestration.
//!
//! [`GroundStation`] starts both link drivers from a [`GcomConfig`] and runs
//! an event monitor thread that logs link activity, watches the image
//! sequence for gaps, and keeps a [`LinkStats`] snapshot.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use gcom_companion::server::CompanionHandle;
use gcom_companion::{CompanionEvent, ImageSequenceTracker};
use gcom_message::{Capabilities, SystemInfo};
use gcom_relay::client::RelayHandle;
use gcom_relay::RelayEvent;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::{ConfigError, GcomConfig};

/// Errors that stop the runner from starting.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot listen for the companion on {address}:{port}")]
    CompanionListen { address: IpAddr, port: u16 },

    #[error("link driver exited during startup")]
    DriverGone,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Last vehicle position reported by the autopilot.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    /// Metres above mean sea level.
    pub altitude_msl: f64,
}

/// Counters and last-known values gathered from link events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkStats {
    pub companion_connected: bool,
    pub autopilot_connected: bool,
    pub companion: Option<SystemInfo>,
    pub capabilities: Option<Capabilities>,
    pub images_tagged: u64,
    pub images_untagged: u64,
    pub sequence_gaps: u64,
    pub missing_images: u64,
    pub position: Option<Position>,
    pub uploads_succeeded: u64,
    pub uploads_failed: u64,
    pub commands_accepted: u64,
    pub commands_rejected: u64,
}

// ============================================================================
// Event Monitor
// ============================================================================

/// Consumes link events on a dedicated thread.
pub(crate) struct EventMonitor {
    stats: Arc<Mutex<LinkStats>>,
    images: ImageSequenceTracker,
}

impl EventMonitor {
    pub(crate) fn new(stats: Arc<Mutex<LinkStats>>) -> Self {
        EventMonitor {
            stats,
            images: ImageSequenceTracker::new(),
        }
    }

    /// Process events until `stop` fires or a link driver goes away.
    fn run(mut self, companion: Receiver<CompanionEvent>, relay: Receiver<RelayEvent>, stop: Receiver<()>) {
        loop {
            crossbeam_channel::select! {
                recv(companion) -> event => match event {
                    Ok(event) => self.on_companion(event),
                    Err(_) => break,
                },
                recv(relay) -> event => match event {
                    Ok(event) => self.on_relay(event),
                    Err(_) => break,
                },
                recv(stop) -> _ => break,
            }
        }
        debug!("event monitor exited");
    }

    pub(crate) fn on_companion(&mut self, event: CompanionEvent) {
        let mut stats = self.stats.lock();
        match event {
            CompanionEvent::PeerConnected => {
                self.images.reset();
                stats.companion_connected = true;
            }
            CompanionEvent::PeerDropped => {
                warn!("companion computer dropped");
                stats.companion_connected = false;
            }
            CompanionEvent::SystemInfo(info) => {
                info!(
                    "companion {} (protocol v{}){}",
                    info.system_id,
                    info.version,
                    if info.dropped { ", recovering a dropped session" } else { "" }
                );
                stats.companion = Some(info);
            }
            CompanionEvent::ConnectionReestablished { command, response } => {
                if response.is_error() {
                    warn!("companion {} failed: {}", command, response);
                } else {
                    info!("companion {} succeeded", command);
                }
            }
            CompanionEvent::Capabilities(capabilities) => {
                info!(
                    "companion capabilities: tagged camera {}, untagged camera {}",
                    capabilities.has_tagged_camera(),
                    capabilities.has_untagged_camera()
                );
                stats.capabilities = Some(capabilities);
            }
            CompanionEvent::Response { command, code } => {
                if code.is_error() {
                    warn!("companion rejected {}: {}", command, code);
                } else {
                    debug!("companion answered {} with {}", command, code);
                }
            }
            CompanionEvent::ImageTagged(image) => {
                trace!(
                    "tagged image {} at {:.7}, {:.7} ({} bytes)",
                    image.sequence,
                    image.latitude_deg(),
                    image.longitude_deg(),
                    image.image.len()
                );
                stats.images_tagged += 1;
                Self::track(&mut self.images, &mut stats, image.sequence);
            }
            CompanionEvent::ImageUntagged(image) => {
                trace!("untagged image {} ({} bytes)", image.sequence, image.image.len());
                stats.images_untagged += 1;
                Self::track(&mut self.images, &mut stats, image.sequence);
            }
        }
    }

    fn track(images: &mut ImageSequenceTracker, stats: &mut LinkStats, sequence: u8) {
        if let Some(gap) = images.observe(sequence) {
            warn!("{} images missing between {} and {}", gap.missing(), gap.from, gap.to);
            stats.sequence_gaps += 1;
            stats.missing_images += gap.missing() as u64;
        }
    }

    pub(crate) fn on_relay(&mut self, event: RelayEvent) {
        let mut stats = self.stats.lock();
        match event {
            RelayEvent::Connected => stats.autopilot_connected = true,
            RelayEvent::Disconnected => stats.autopilot_connected = false,
            RelayEvent::GlobalPosition(position) => {
                stats.position = Some(Position {
                    latitude: position.lat as f64 / 1e7,
                    longitude: position.lon as f64 / 1e7,
                    altitude_msl: position.alt as f64 / 1000.0,
                });
            }
            RelayEvent::CameraFeedback(feedback) => {
                debug!("camera fired, image {}", feedback.img_idx);
            }
            RelayEvent::MissionRequest { seq } => trace!("autopilot requested mission item {}", seq),
            RelayEvent::MissionAck(result) => debug!("mission ack {:?}", result),
            RelayEvent::CommandAck { command, result } => debug!("{:?} -> {:?}", command, result),
            RelayEvent::UploadResult(true) => {
                info!("mission upload complete");
                stats.uploads_succeeded += 1;
            }
            RelayEvent::UploadResult(false) => {
                warn!("mission upload failed");
                stats.uploads_failed += 1;
            }
            RelayEvent::CommandResult(accepted) => {
                if accepted {
                    stats.commands_accepted += 1;
                } else {
                    stats.commands_rejected += 1;
                }
            }
        }
    }
}

// ============================================================================
// Ground Station
// ============================================================================

/// Both links and the monitor, started from configuration.
pub struct GroundStation {
    companion: CompanionHandle,
    relay: RelayHandle,
    stats: Arc<Mutex<LinkStats>>,
    stop: Sender<()>,
    monitor: Option<thread::JoinHandle<()>>,
    drivers: Vec<JoinHandle<()>>,
}

impl GroundStation {
    /// Spawn both drivers on the current runtime and bring the links up.
    pub async fn start(config: &GcomConfig) -> Result<Self, RunnerError> {
        let (companion, companion_task) = CompanionHandle::spawn(config.companion.auto_resume);
        let (relay, relay_task) =
            RelayHandle::spawn_with_identity(config.autopilot.system_id, config.autopilot.component_id);

        let companion_events = companion.subscribe().await.ok_or(RunnerError::DriverGone)?;
        let relay_events = relay.subscribe().await.ok_or(RunnerError::DriverGone)?;

        let stats = Arc::new(Mutex::new(LinkStats::default()));
        let (stop, stop_rx) = crossbeam_channel::bounded(1);
        let monitor = EventMonitor::new(stats.clone());
        let monitor = thread::Builder::new()
            .name("gcom-events".to_string())
            .spawn(move || monitor.run(companion_events, relay_events, stop_rx))?;

        let station = GroundStation {
            companion,
            relay,
            stats,
            stop,
            monitor: Some(monitor),
            drivers: vec![companion_task, relay_task],
        };

        let address = config.companion.bind_address;
        let port = config.companion.port;
        if !station.companion.start(address, port).await {
            station.shutdown().await;
            return Err(RunnerError::CompanionListen { address, port });
        }

        let endpoint = config.autopilot.endpoint();
        station.relay.configure(endpoint.address.clone(), endpoint.port);
        if config.autopilot.autostart {
            info!("autopilot bridge at {}", endpoint);
            station.relay.start().await;
        } else {
            info!("autopilot bridge at {} (not started)", endpoint);
        }

        Ok(station)
    }

    pub fn companion(&self) -> &CompanionHandle {
        &self.companion
    }

    pub fn relay(&self) -> &RelayHandle {
        &self.relay
    }

    /// Address the companion listener is bound to.
    pub async fn companion_addr(&self) -> Option<SocketAddr> {
        self.companion.local_addr().await
    }

    pub fn stats(&self) -> LinkStats {
        self.stats.lock().clone()
    }

    /// Stop both drivers and wait for the monitor to finish.
    pub async fn shutdown(mut self) {
        self.companion.shutdown();
        self.relay.shutdown();
        for driver in self.drivers.drain(..) {
            let _ = driver.await;
        }

        let _ = self.stop.try_send(());
        if let Some(monitor) = self.monitor.take() {
            let _ = tokio::task::spawn_blocking(move || monitor.join()).await;
        }
        info!("ground station stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use gcom_message::{CommandCode, ImageUntagged, ResponseCode};

    fn monitor() -> (EventMonitor, Arc<Mutex<LinkStats>>) {
        let stats = Arc::new(Mutex::new(LinkStats::default()));
        (EventMonitor::new(stats.clone()), stats)
    }

    fn image(sequence: u8) -> CompanionEvent {
        CompanionEvent::ImageUntagged(ImageUntagged {
            sequence,
            image: Bytes::from_static(b"jpeg"),
        })
    }

    #[test]
    fn test_image_gaps_counted() {
        let (mut monitor, stats) = monitor();
        monitor.on_companion(CompanionEvent::PeerConnected);
        for seq in [0, 1, 2, 5, 6] {
            monitor.on_companion(image(seq));
        }

        let stats = stats.lock();
        assert_eq!(stats.images_untagged, 5);
        assert_eq!(stats.sequence_gaps, 1);
        assert_eq!(stats.missing_images, 2);
    }

    #[test]
    fn test_new_peer_resets_sequence() {
        let (mut monitor, stats) = monitor();
        monitor.on_companion(CompanionEvent::PeerConnected);
        monitor.on_companion(image(10));
        monitor.on_companion(CompanionEvent::PeerDropped);
        assert!(!stats.lock().companion_connected);

        monitor.on_companion(CompanionEvent::PeerConnected);
        monitor.on_companion(image(0));
        assert_eq!(stats.lock().sequence_gaps, 0);
        assert!(stats.lock().companion_connected);
    }

    #[test]
    fn test_companion_details_recorded() {
        let (mut monitor, stats) = monitor();
        let info = SystemInfo {
            system_id: "obc-1".to_string(),
            version: 1,
            dropped: false,
        };
        monitor.on_companion(CompanionEvent::SystemInfo(info.clone()));
        monitor.on_companion(CompanionEvent::Capabilities(Capabilities::TAGGED_CAMERA));
        monitor.on_companion(CompanionEvent::ConnectionReestablished {
            command: CommandCode::SystemResume,
            response: ResponseCode::ResumeFailed,
        });

        let stats = stats.lock();
        assert_eq!(stats.companion, Some(info));
        assert_eq!(stats.capabilities, Some(Capabilities::TAGGED_CAMERA));
    }

    #[test]
    fn test_relay_results_counted() {
        let (mut monitor, stats) = monitor();
        monitor.on_relay(RelayEvent::Connected);
        monitor.on_relay(RelayEvent::UploadResult(true));
        monitor.on_relay(RelayEvent::UploadResult(false));
        monitor.on_relay(RelayEvent::CommandResult(false));

        let stats = stats.lock();
        assert!(stats.autopilot_connected);
        assert_eq!((stats.uploads_succeeded, stats.uploads_failed), (1, 1));
        assert_eq!((stats.commands_accepted, stats.commands_rejected), (0, 1));
    }
}
