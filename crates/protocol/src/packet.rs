//! Fixed-layout telemetry packet decoding
//!
//! Every field is a little-endian `f32` at a 4-byte aligned offset. The packet
//! is 264 bytes long; the last 8 bytes are not interpreted.
//!
//! # Layout
//!
//! ```text
//! 0    time, lap time, lap distance, total distance
//! 16   position xyz, speed, velocity xyz
//! 44   right vector xyz, forward vector xyz
//! 68   suspension position [4], suspension velocity [4], wheel speed [4]
//! 116  throttle, steer, brake, clutch, gear, lateral g, longitudinal g, lap
//! 148  engine rate
//! 152  native support, race position, kers level/max, drs, tc, abs
//! 180  fuel in tank/capacity, in pits, sector, sector 1/2 time
//! 204  brake temps [4], tyre pressures [4], team id
//! 240  total laps, track size, last lap time, max rpm
//! ```
//!
//! Decoding reads each field directly from the buffer; there is no generic or
//! serde-based path because it runs once per datagram on the receive loop.

use crate::error::{DecodeError, Result};
use crate::types::{SessionBlock, TelemetrySnapshot, Vec3, Wheels};
use byteorder::{ByteOrder, LittleEndian};

/// Size of one telemetry datagram in bytes
pub const PACKET_SIZE: usize = 264;

/// Byte offsets of every field in the packet
pub mod offsets {
    pub const TIME: usize = 0;
    pub const LAP_TIME: usize = 4;
    pub const LAP_DISTANCE: usize = 8;
    pub const TOTAL_DISTANCE: usize = 12;
    pub const POSITION: usize = 16;
    pub const SPEED: usize = 28;
    pub const VELOCITY: usize = 32;
    pub const RIGHT: usize = 44;
    pub const FORWARD: usize = 56;
    pub const SUSPENSION_POSITION: usize = 68;
    pub const SUSPENSION_VELOCITY: usize = 84;
    pub const WHEEL_SPEED: usize = 100;
    pub const THROTTLE: usize = 116;
    pub const STEER: usize = 120;
    pub const BRAKE: usize = 124;
    pub const CLUTCH: usize = 128;
    pub const GEAR: usize = 132;
    pub const GFORCE_LATERAL: usize = 136;
    pub const GFORCE_LONGITUDINAL: usize = 140;
    pub const LAP: usize = 144;
    pub const ENGINE_RATE: usize = 148;
    pub const NATIVE_SUPPORT: usize = 152;
    pub const RACE_POSITION: usize = 156;
    pub const KERS_LEVEL: usize = 160;
    pub const KERS_MAX_LEVEL: usize = 164;
    pub const DRS: usize = 168;
    pub const TRACTION_CONTROL: usize = 172;
    pub const ANTI_LOCK_BRAKES: usize = 176;
    pub const FUEL_IN_TANK: usize = 180;
    pub const FUEL_CAPACITY: usize = 184;
    pub const IN_PITS: usize = 188;
    pub const SECTOR: usize = 192;
    pub const SECTOR1_TIME: usize = 196;
    pub const SECTOR2_TIME: usize = 200;
    pub const BRAKE_TEMPS: usize = 204;
    pub const TYRE_PRESSURES: usize = 220;
    pub const TEAM_ID: usize = 236;
    pub const TOTAL_LAPS: usize = 240;
    pub const TRACK_SIZE: usize = 244;
    pub const LAST_LAP_TIME: usize = 248;
    pub const MAX_RPM: usize = 252;
}

/// Decode a telemetry datagram into a snapshot
///
/// Buffers longer than [`PACKET_SIZE`] are accepted and the extra bytes are
/// ignored. No range validation is performed.
///
/// # Example
/// ```
/// use protocol::{PACKET_SIZE, decode, offsets};
///
/// let mut buf = [0u8; PACKET_SIZE];
/// buf[offsets::ENGINE_RATE..offsets::ENGINE_RATE + 4].copy_from_slice(&6000.0f32.to_le_bytes());
/// buf[offsets::MAX_RPM..offsets::MAX_RPM + 4].copy_from_slice(&8000.0f32.to_le_bytes());
///
/// let snapshot = decode(&buf).unwrap();
/// assert_eq!(snapshot.rev_light_percent(), 75);
/// ```
pub fn decode(buf: &[u8]) -> Result<TelemetrySnapshot> {
    if buf.len() < PACKET_SIZE {
        return Err(DecodeError::ShortBuffer {
            needed: PACKET_SIZE,
            actual: buf.len(),
        });
    }
    let b = &buf[..PACKET_SIZE];

    Ok(TelemetrySnapshot {
        time: f32_at(b, offsets::TIME),
        lap_time: f32_at(b, offsets::LAP_TIME),
        lap_distance: f32_at(b, offsets::LAP_DISTANCE),
        total_distance: f32_at(b, offsets::TOTAL_DISTANCE),
        position: vec3_at(b, offsets::POSITION),
        speed: f32_at(b, offsets::SPEED),
        velocity: vec3_at(b, offsets::VELOCITY),
        right: vec3_at(b, offsets::RIGHT),
        forward: vec3_at(b, offsets::FORWARD),
        suspension_position: wheels_at(b, offsets::SUSPENSION_POSITION),
        suspension_velocity: wheels_at(b, offsets::SUSPENSION_VELOCITY),
        wheel_speed: wheels_at(b, offsets::WHEEL_SPEED),
        throttle: f32_at(b, offsets::THROTTLE),
        steer: f32_at(b, offsets::STEER),
        brake: f32_at(b, offsets::BRAKE),
        clutch: f32_at(b, offsets::CLUTCH),
        gear: f32_at(b, offsets::GEAR),
        gforce_lateral: f32_at(b, offsets::GFORCE_LATERAL),
        gforce_longitudinal: f32_at(b, offsets::GFORCE_LONGITUDINAL),
        lap: f32_at(b, offsets::LAP),
        engine_rate: f32_at(b, offsets::ENGINE_RATE),
        session: SessionBlock {
            native_support: f32_at(b, offsets::NATIVE_SUPPORT),
            race_position: f32_at(b, offsets::RACE_POSITION),
            kers_level: f32_at(b, offsets::KERS_LEVEL),
            kers_max_level: f32_at(b, offsets::KERS_MAX_LEVEL),
            drs: f32_at(b, offsets::DRS),
            traction_control: f32_at(b, offsets::TRACTION_CONTROL),
            anti_lock_brakes: f32_at(b, offsets::ANTI_LOCK_BRAKES),
            fuel_in_tank: f32_at(b, offsets::FUEL_IN_TANK),
            fuel_capacity: f32_at(b, offsets::FUEL_CAPACITY),
            in_pits: f32_at(b, offsets::IN_PITS),
            sector: f32_at(b, offsets::SECTOR),
            sector1_time: f32_at(b, offsets::SECTOR1_TIME),
            sector2_time: f32_at(b, offsets::SECTOR2_TIME),
            brake_temps: quad_at(b, offsets::BRAKE_TEMPS),
            tyre_pressures: quad_at(b, offsets::TYRE_PRESSURES),
            team_id: f32_at(b, offsets::TEAM_ID),
            total_laps: f32_at(b, offsets::TOTAL_LAPS),
            track_size: f32_at(b, offsets::TRACK_SIZE),
            last_lap_time: f32_at(b, offsets::LAST_LAP_TIME),
            max_rpm: f32_at(b, offsets::MAX_RPM),
        },
    })
}

#[inline(always)]
fn f32_at(b: &[u8], offset: usize) -> f32 {
    LittleEndian::read_f32(&b[offset..offset + 4])
}

#[inline(always)]
fn vec3_at(b: &[u8], offset: usize) -> Vec3 {
    Vec3 {
        x: f32_at(b, offset),
        y: f32_at(b, offset + 4),
        z: f32_at(b, offset + 8),
    }
}

#[inline(always)]
fn quad_at(b: &[u8], offset: usize) -> [f32; 4] {
    [
        f32_at(b, offset),
        f32_at(b, offset + 4),
        f32_at(b, offset + 8),
        f32_at(b, offset + 12),
    ]
}

#[inline(always)]
fn wheels_at(b: &[u8], offset: usize) -> Wheels {
    let [rear_left, rear_right, front_left, front_right] = quad_at(b, offset);
    Wheels {
        rear_left,
        rear_right,
        front_left,
        front_right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(buf: &mut [u8], offset: usize, value: f32) {
        buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    #[test]
    fn test_last_field_fits_packet() {
        assert_eq!(offsets::MAX_RPM + 4, 256);
        assert!(offsets::MAX_RPM + 4 <= PACKET_SIZE);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let buf = [0u8; PACKET_SIZE - 1];
        assert_eq!(
            decode(&buf),
            Err(DecodeError::ShortBuffer {
                needed: PACKET_SIZE,
                actual: PACKET_SIZE - 1
            })
        );
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn test_zero_packet_decodes_to_default() {
        let buf = [0u8; PACKET_SIZE];
        assert_eq!(decode(&buf).unwrap(), TelemetrySnapshot::default());
    }

    #[test]
    fn test_wheel_order() {
        let mut buf = [0u8; PACKET_SIZE];
        put(&mut buf, offsets::WHEEL_SPEED, 1.0);
        put(&mut buf, offsets::WHEEL_SPEED + 4, 2.0);
        put(&mut buf, offsets::WHEEL_SPEED + 8, 3.0);
        put(&mut buf, offsets::WHEEL_SPEED + 12, 4.0);

        let snapshot = decode(&buf).unwrap();
        assert_eq!(snapshot.wheel_speed.rear_left, 1.0);
        assert_eq!(snapshot.wheel_speed.rear_right, 2.0);
        assert_eq!(snapshot.wheel_speed.front_left, 3.0);
        assert_eq!(snapshot.wheel_speed.front_right, 4.0);
    }

    #[test]
    fn test_out_of_range_values_pass_through() {
        let mut buf = [0u8; PACKET_SIZE];
        put(&mut buf, offsets::FUEL_IN_TANK, -12.5);
        put(&mut buf, offsets::THROTTLE, f32::INFINITY);

        let snapshot = decode(&buf).unwrap();
        assert_eq!(snapshot.session.fuel_in_tank, -12.5);
        assert_eq!(snapshot.throttle, f32::INFINITY);
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut long = vec![0u8; PACKET_SIZE + 100];
        put(&mut long, offsets::GEAR, 3.0);
        long[PACKET_SIZE..].fill(0xff);

        let snapshot = decode(&long).unwrap();
        assert_eq!(snapshot.gear(), 3);
        assert_eq!(decode(&long[..PACKET_SIZE]).unwrap(), snapshot);
    }
}
