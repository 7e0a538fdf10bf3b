//! Core telemetry and device identity types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Metres per second to miles per hour
pub const MPS_TO_MPH: f32 = 2.23694;

/// A world-space three component vector
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// One value per wheel, in the order the simulator sends them
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Wheels {
    pub rear_left: f32,
    pub rear_right: f32,
    pub front_left: f32,
    pub front_right: f32,
}

/// Car and session state from the extended part of the packet
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionBlock {
    /// SLI Pro native support flag
    pub native_support: f32,
    /// Race position
    pub race_position: f32,
    /// KERS energy left
    pub kers_level: f32,
    /// KERS maximum energy
    pub kers_max_level: f32,
    /// 0 = off, 1 = on
    pub drs: f32,
    /// 0 (off) to 2 (high)
    pub traction_control: f32,
    /// 0 (off) or 1 (on)
    pub anti_lock_brakes: f32,
    /// Current fuel mass
    pub fuel_in_tank: f32,
    pub fuel_capacity: f32,
    /// 0 = none, 1 = pitting, 2 = in pit area
    pub in_pits: f32,
    /// 0 = sector 1, 1 = sector 2, 2 = sector 3
    pub sector: f32,
    pub sector1_time: f32,
    pub sector2_time: f32,
    /// Brake temperatures in centigrade
    pub brake_temps: [f32; 4],
    /// Tyre pressures in PSI
    pub tyre_pressures: [f32; 4],
    pub team_id: f32,
    pub total_laps: f32,
    /// Track length in metres
    pub track_size: f32,
    pub last_lap_time: f32,
    /// RPM at which the rev limiter kicks in
    pub max_rpm: f32,
}

/// One decoded telemetry sample
///
/// Snapshots are created fresh for each datagram by [`crate::decode`] and are
/// never mutated afterwards. Values are passed through exactly as received,
/// including out-of-range or non-finite ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub time: f32,
    pub lap_time: f32,
    pub lap_distance: f32,
    pub total_distance: f32,
    pub position: Vec3,
    /// Speed in metres per second
    pub speed: f32,
    pub velocity: Vec3,
    pub right: Vec3,
    pub forward: Vec3,
    pub suspension_position: Wheels,
    pub suspension_velocity: Wheels,
    pub wheel_speed: Wheels,
    pub throttle: f32,
    pub steer: f32,
    pub brake: f32,
    pub clutch: f32,
    pub gear: f32,
    pub gforce_lateral: f32,
    pub gforce_longitudinal: f32,
    pub lap: f32,
    pub engine_rate: f32,
    pub session: SessionBlock,
}

impl TelemetrySnapshot {
    /// Current gear as an integer
    pub fn gear(&self) -> i32 {
        self.gear as i32
    }

    /// Engine rate as a percentage of the rev limiter, truncated
    ///
    /// The float to int conversion saturates, so a zero max RPM yields
    /// `i32::MAX` (or 0 when the engine rate is also zero).
    pub fn rev_light_percent(&self) -> i32 {
        ((100.0 * self.engine_rate) / self.session.max_rpm) as i32
    }

    /// Speed converted to miles per hour, truncated
    pub fn speed_mph(&self) -> i32 {
        (self.speed * MPS_TO_MPH) as i32
    }

    /// Compact payload pushed to browser viewers
    pub fn data_point(&self) -> DataPoint {
        DataPoint {
            gear: self.gear(),
            speed: self.speed_mph(),
        }
    }
}

/// JSON document sent to WebSocket viewers for every snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPoint {
    #[serde(rename = "Gear")]
    pub gear: i32,
    #[serde(rename = "Speed")]
    pub speed: i32,
}

/// Identity of a USB HID sink
///
/// Two descriptors are equal when all four fields are equal. A physical device
/// is recognised across unplug/replug cycles by this tuple alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SinkDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub usage_page: u16,
    pub usage: u16,
}

impl SinkDescriptor {
    pub const fn new(vendor_id: u16, product_id: u16, usage_page: u16, usage: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            usage_page,
            usage,
        }
    }
}

impl fmt::Display for SinkDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VID={:#06x} PID={:#06x} UsagePage={:#06x} Usage={:#06x}",
            self.vendor_id, self.product_id, self.usage_page, self.usage
        )
    }
}
