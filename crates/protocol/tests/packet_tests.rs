//! Integration tests for telemetry packet decoding
//!
//! Builds packets field by field at the documented offsets and checks that
//! the decoded snapshot reproduces every value bit for bit.

use proptest::prelude::*;
use protocol::{DecodeError, PACKET_SIZE, TelemetrySnapshot, Vec3, Wheels, decode, offsets};

/// Value stored in field `index` of the synthetic packet
fn field_value(index: usize) -> f32 {
    index as f32 * 1.25 + 0.5
}

/// Packet where every 4-byte slot holds a distinct value
fn make_indexed_packet() -> Vec<u8> {
    let mut buf = vec![0u8; PACKET_SIZE];
    for index in 0..PACKET_SIZE / 4 {
        buf[index * 4..index * 4 + 4].copy_from_slice(&field_value(index).to_le_bytes());
    }
    buf
}

fn at(offset: usize) -> f32 {
    field_value(offset / 4)
}

fn assert_bits(actual: f32, expected: f32, name: &str) {
    assert_eq!(
        actual.to_bits(),
        expected.to_bits(),
        "field {name}: {actual} != {expected}"
    );
}

fn assert_vec3(actual: &Vec3, offset: usize, name: &str) {
    assert_bits(actual.x, at(offset), &format!("{name}.x"));
    assert_bits(actual.y, at(offset + 4), &format!("{name}.y"));
    assert_bits(actual.z, at(offset + 8), &format!("{name}.z"));
}

fn assert_wheels(actual: &Wheels, offset: usize, name: &str) {
    assert_bits(actual.rear_left, at(offset), &format!("{name}.rear_left"));
    assert_bits(actual.rear_right, at(offset + 4), &format!("{name}.rear_right"));
    assert_bits(actual.front_left, at(offset + 8), &format!("{name}.front_left"));
    assert_bits(actual.front_right, at(offset + 12), &format!("{name}.front_right"));
}

mod exactness {
    use super::*;

    #[test]
    fn test_every_field_maps_to_its_offset() {
        let s = decode(&make_indexed_packet()).expect("full packet decodes");

        assert_bits(s.time, at(offsets::TIME), "time");
        assert_bits(s.lap_time, at(offsets::LAP_TIME), "lap_time");
        assert_bits(s.lap_distance, at(offsets::LAP_DISTANCE), "lap_distance");
        assert_bits(s.total_distance, at(offsets::TOTAL_DISTANCE), "total_distance");
        assert_vec3(&s.position, offsets::POSITION, "position");
        assert_bits(s.speed, at(offsets::SPEED), "speed");
        assert_vec3(&s.velocity, offsets::VELOCITY, "velocity");
        assert_vec3(&s.right, offsets::RIGHT, "right");
        assert_vec3(&s.forward, offsets::FORWARD, "forward");
        assert_wheels(
            &s.suspension_position,
            offsets::SUSPENSION_POSITION,
            "suspension_position",
        );
        assert_wheels(
            &s.suspension_velocity,
            offsets::SUSPENSION_VELOCITY,
            "suspension_velocity",
        );
        assert_wheels(&s.wheel_speed, offsets::WHEEL_SPEED, "wheel_speed");
        assert_bits(s.throttle, at(offsets::THROTTLE), "throttle");
        assert_bits(s.steer, at(offsets::STEER), "steer");
        assert_bits(s.brake, at(offsets::BRAKE), "brake");
        assert_bits(s.clutch, at(offsets::CLUTCH), "clutch");
        assert_bits(s.gear, at(offsets::GEAR), "gear");
        assert_bits(s.gforce_lateral, at(offsets::GFORCE_LATERAL), "gforce_lateral");
        assert_bits(
            s.gforce_longitudinal,
            at(offsets::GFORCE_LONGITUDINAL),
            "gforce_longitudinal",
        );
        assert_bits(s.lap, at(offsets::LAP), "lap");
        assert_bits(s.engine_rate, at(offsets::ENGINE_RATE), "engine_rate");

        let session = &s.session;
        assert_bits(session.native_support, at(offsets::NATIVE_SUPPORT), "native_support");
        assert_bits(session.race_position, at(offsets::RACE_POSITION), "race_position");
        assert_bits(session.kers_level, at(offsets::KERS_LEVEL), "kers_level");
        assert_bits(session.kers_max_level, at(offsets::KERS_MAX_LEVEL), "kers_max_level");
        assert_bits(session.drs, at(offsets::DRS), "drs");
        assert_bits(session.traction_control, at(offsets::TRACTION_CONTROL), "tc");
        assert_bits(session.anti_lock_brakes, at(offsets::ANTI_LOCK_BRAKES), "abs");
        assert_bits(session.fuel_in_tank, at(offsets::FUEL_IN_TANK), "fuel_in_tank");
        assert_bits(session.fuel_capacity, at(offsets::FUEL_CAPACITY), "fuel_capacity");
        assert_bits(session.in_pits, at(offsets::IN_PITS), "in_pits");
        assert_bits(session.sector, at(offsets::SECTOR), "sector");
        assert_bits(session.sector1_time, at(offsets::SECTOR1_TIME), "sector1_time");
        assert_bits(session.sector2_time, at(offsets::SECTOR2_TIME), "sector2_time");
        for i in 0..4 {
            assert_bits(
                session.brake_temps[i],
                at(offsets::BRAKE_TEMPS + i * 4),
                "brake_temps",
            );
            assert_bits(
                session.tyre_pressures[i],
                at(offsets::TYRE_PRESSURES + i * 4),
                "tyre_pressures",
            );
        }
        assert_bits(session.team_id, at(offsets::TEAM_ID), "team_id");
        assert_bits(session.total_laps, at(offsets::TOTAL_LAPS), "total_laps");
        assert_bits(session.track_size, at(offsets::TRACK_SIZE), "track_size");
        assert_bits(session.last_lap_time, at(offsets::LAST_LAP_TIME), "last_lap_time");
        assert_bits(session.max_rpm, at(offsets::MAX_RPM), "max_rpm");
    }

    #[test]
    fn test_nan_payload_preserved() {
        let mut buf = vec![0u8; PACKET_SIZE];
        let weird_nan = f32::from_bits(0x7fc0_1234);
        buf[offsets::STEER..offsets::STEER + 4].copy_from_slice(&weird_nan.to_le_bytes());

        let s = decode(&buf).unwrap();
        assert_eq!(s.steer.to_bits(), 0x7fc0_1234);
    }

    #[test]
    fn test_rev_light_scenario() {
        let mut buf = vec![0u8; PACKET_SIZE];
        buf[offsets::ENGINE_RATE..offsets::ENGINE_RATE + 4]
            .copy_from_slice(&6000.0f32.to_le_bytes());
        buf[offsets::MAX_RPM..offsets::MAX_RPM + 4].copy_from_slice(&8000.0f32.to_le_bytes());

        let s = decode(&buf).unwrap();
        assert_eq!(s.rev_light_percent(), 75);
    }
}

mod rejection {
    use super::*;

    #[test]
    fn test_every_short_length_rejected() {
        let packet = make_indexed_packet();
        for len in 0..PACKET_SIZE {
            match decode(&packet[..len]) {
                Err(DecodeError::ShortBuffer { needed, actual }) => {
                    assert_eq!(needed, PACKET_SIZE);
                    assert_eq!(actual, len);
                }
                Ok(_) => panic!("{len}-byte buffer produced a snapshot"),
            }
        }
    }
}

mod reuse {
    use super::*;

    #[test]
    fn test_reused_buffer_decodes_latest_contents() {
        let mut buf = [0u8; PACKET_SIZE];
        let mut seen = Vec::new();

        for gear in 1..=6 {
            buf[offsets::GEAR..offsets::GEAR + 4].copy_from_slice(&(gear as f32).to_le_bytes());
            seen.push(decode(&buf).unwrap().gear());
        }

        assert_eq!(seen, vec![1, 2, 3, 4, 5, 6]);
    }
}

proptest! {
    #[test]
    fn prop_any_full_packet_decodes(
        bytes in proptest::collection::vec(any::<u8>(), PACKET_SIZE..PACKET_SIZE + 64)
    ) {
        prop_assert!(decode(&bytes).is_ok());
    }

    #[test]
    fn prop_decode_is_pure(bytes in proptest::collection::vec(any::<u8>(), PACKET_SIZE)) {
        let first: TelemetrySnapshot = decode(&bytes).unwrap();
        let second: TelemetrySnapshot = decode(&bytes).unwrap();
        // Compare through the raw bits so NaN fields are handled
        prop_assert_eq!(first.engine_rate.to_bits(), second.engine_rate.to_bits());
        prop_assert_eq!(first.session.max_rpm.to_bits(), second.session.max_rpm.to_bits());
        prop_assert_eq!(first.time.to_bits(), second.time.to_bits());
        let raw_time = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        prop_assert_eq!(first.time.to_bits(), raw_time);
    }

    #[test]
    fn prop_short_packets_rejected(len in 0usize..PACKET_SIZE) {
        let bytes = vec![0u8; len];
        let rejected = matches!(decode(&bytes), Err(DecodeError::ShortBuffer { .. }));
        prop_assert!(rejected);
    }
}
