//! Mission plans and the items sent while uploading one.
//!
//! An uploaded mission always carries three items beyond the waypoints:
//!
//! ```text
//! seq 0          home placeholder (overwritten by the autopilot)
//! seq 1          takeoff
//! seq 2..=n+1    waypoints in caller order
//! seq n+2        land
//! ```

use gcom_mavlink::dialect::{MavCmd, MavFrame, MISSION_ITEM_INT_DATA};
use serde::{Deserialize, Serialize};

use crate::modes::VehicleClass;

/// Items added around the waypoints: home, takeoff and land.
pub const EXTRA_MISSION_ITEMS: usize = 3;

/// Latitude and longitude travel as degrees x 1e7.
const COORD_SCALE: f64 = 1e7;

/// Accepted takeoff climb angles in degrees.
pub const CLIMB_ANGLE_RANGE: std::ops::RangeInclusive<f64> = 0.0..=90.0;

/// A single navigation waypoint.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Waypoint {
    /// Metres above mean sea level.
    pub altitude_msl: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// Position assigned by the mission source. Upload order is list order.
    pub order: i32,
}

impl Waypoint {
    pub fn new(latitude: f64, longitude: f64, altitude_msl: f64) -> Self {
        Waypoint {
            altitude_msl,
            latitude,
            longitude,
            order: 0,
        }
    }
}

/// Everything needed to answer item requests during one upload.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionPlan {
    pub takeoff_altitude: f64,
    pub waypoints: Vec<Waypoint>,
    /// Takeoff pitch in degrees, used by fixed-wing craft only.
    pub climb_angle: f64,
}

impl MissionPlan {
    /// Number of items announced in MISSION_COUNT.
    pub fn item_count(&self) -> usize {
        self.waypoints.len() + EXTRA_MISSION_ITEMS
    }

    /// Sequence number of the terminal land item.
    pub fn land_seq(&self) -> usize {
        self.waypoints.len() + 2
    }

    /// Build the item for `seq`, or `None` if it is past the land item.
    pub fn item(&self, seq: u16, class: VehicleClass) -> Option<MissionItem> {
        let index = seq as usize;
        let fixed_wing = class == VehicleClass::FixedWing;

        if index == self.land_seq() {
            let landing_altitude = match (fixed_wing, self.waypoints.last()) {
                (true, Some(last)) => last.altitude_msl as f32,
                _ => 0.0,
            };
            return Some(MissionItem {
                seq,
                command: MavCmd::MAV_CMD_NAV_LAND,
                autocontinue: false,
                param1: landing_altitude,
                x: 0,
                y: 0,
                z: 0.0,
            });
        }

        match index {
            0 => Some(MissionItem {
                seq,
                command: MavCmd::MAV_CMD_NAV_WAYPOINT,
                autocontinue: true,
                param1: 0.0,
                x: 0,
                y: 0,
                z: 0.0,
            }),
            1 => Some(MissionItem {
                seq,
                command: MavCmd::MAV_CMD_NAV_TAKEOFF,
                autocontinue: true,
                param1: if fixed_wing { self.climb_angle as f32 } else { 0.0 },
                x: 0,
                y: 0,
                z: self.takeoff_altitude as f32,
            }),
            _ => {
                let waypoint = self.waypoints.get(index - 2)?;
                Some(MissionItem {
                    seq,
                    command: MavCmd::MAV_CMD_NAV_WAYPOINT,
                    autocontinue: true,
                    param1: 0.0,
                    x: scale_coordinate(waypoint.latitude),
                    y: scale_coordinate(waypoint.longitude),
                    z: waypoint.altitude_msl as f32,
                })
            }
        }
    }
}

/// The fields of a MISSION_ITEM_INT that vary between items.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MissionItem {
    pub seq: u16,
    pub command: MavCmd,
    pub autocontinue: bool,
    pub param1: f32,
    pub x: i32,
    pub y: i32,
    pub z: f32,
}

impl MissionItem {
    pub fn to_mavlink(self, target_system: u8, target_component: u8) -> MISSION_ITEM_INT_DATA {
        MISSION_ITEM_INT_DATA {
            param1: self.param1,
            x: self.x,
            y: self.y,
            z: self.z,
            seq: self.seq,
            command: self.command,
            target_system,
            target_component,
            frame: MavFrame::MAV_FRAME_GLOBAL,
            current: 0,
            autocontinue: self.autocontinue as u8,
            ..Default::default()
        }
    }
}

fn scale_coordinate(degrees: f64) -> i32 {
    (degrees * COORD_SCALE).round() as i32
}
