//! Wire codec for the Powered Up (LWP3) frames this crate speaks.
//!
//! Every frame starts with a length byte and the hub id (always `0x00`),
//! followed by the message type. Only two outbound frames and one inbound
//! frame are understood here; everything else the hub pushes is ignored.

use bytes::{BufMut, Bytes, BytesMut};

/// Length of a motor speed frame
pub const MOTOR_FRAME_LEN: usize = 9;

/// Length of a battery request frame
pub const BATTERY_REQUEST_LEN: usize = 5;

/// Length byte of the motor frame
///
/// The hub accepts the 9-byte motor frame with a length byte one short.
pub const MOTOR_LENGTH_BYTE: u8 = 0x08;

/// Length byte of the battery request frame
pub const BATTERY_LENGTH_BYTE: u8 = 0x05;

/// Hub id byte, always zero for a directly connected hub
pub const HUB_ID: u8 = 0x00;

/// Port output command message type
pub const MSG_PORT_OUTPUT_COMMAND: u8 = 0x81;

/// Hub properties message type
pub const MSG_HUB_PROPERTIES: u8 = 0x01;

/// Startup and completion flags: execute immediately, request feedback
pub const STARTUP_IMMEDIATE_WITH_FEEDBACK: u8 = 0x11;

/// `StartPower` sub-command
pub const SUBCMD_START_POWER: u8 = 0x01;

/// Maximum power byte (100 %)
pub const MAX_POWER: u8 = 0x64;

/// Acceleration/deceleration profile flags
pub const USE_PROFILE: u8 = 0x7f;

/// Battery voltage hub property
pub const PROPERTY_BATTERY_VOLTAGE: u8 = 0x06;

/// Property operation: request update
pub const PROPERTY_REQUEST_UPDATE: u8 = 0x02;

/// Lowest accepted speed
pub const MIN_SPEED: i8 = -100;

/// Highest accepted speed
pub const MAX_SPEED: i8 = 100;

/// Outbound hub command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubCommand {
    /// Run the motor on `port` at `speed` percent (negative is reverse)
    MotorSpeed {
        /// Motor port
        port: u8,
        /// Requested speed, clamped to -100..=100 on encode
        speed: i32,
    },
    /// Ask the hub to push its battery level
    BatteryRequest,
}

impl HubCommand {
    /// Serialize the command to its wire frame
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        match *self {
            Self::MotorSpeed { port, speed } => encode_motor_command(port, speed),
            Self::BatteryRequest => encode_battery_request(),
        }
    }
}

/// Clamp any integer into the motor speed range
#[must_use]
pub fn clamp_speed(speed: i32) -> i8 {
    let clamped = speed.clamp(i32::from(MIN_SPEED), i32::from(MAX_SPEED));
    i8::try_from(clamped).unwrap_or(0)
}

/// Two's-complement byte for a clamped speed
#[must_use]
pub const fn speed_byte(speed: i8) -> u8 {
    speed.to_le_bytes()[0]
}

/// Encode a motor speed frame
///
/// Out-of-range speeds are clamped rather than rejected, so this never fails.
///
/// Layout: `[len, hub, 0x81, port, 0x11, 0x01, speed, 0x64, 0x7f]`
#[must_use]
pub fn encode_motor_command(port: u8, speed: i32) -> Bytes {
    let mut buf = BytesMut::with_capacity(MOTOR_FRAME_LEN);

    buf.put_u8(MOTOR_LENGTH_BYTE);
    buf.put_u8(HUB_ID);
    buf.put_u8(MSG_PORT_OUTPUT_COMMAND);
    buf.put_u8(port);
    buf.put_u8(STARTUP_IMMEDIATE_WITH_FEEDBACK);
    buf.put_u8(SUBCMD_START_POWER);
    buf.put_u8(speed_byte(clamp_speed(speed)));
    buf.put_u8(MAX_POWER);
    buf.put_u8(USE_PROFILE);

    buf.freeze()
}

/// Encode the battery level request frame
#[must_use]
pub fn encode_battery_request() -> Bytes {
    let mut buf = BytesMut::with_capacity(BATTERY_REQUEST_LEN);

    buf.put_u8(BATTERY_LENGTH_BYTE);
    buf.put_u8(HUB_ID);
    buf.put_u8(MSG_HUB_PROPERTIES);
    buf.put_u8(PROPERTY_BATTERY_VOLTAGE);
    buf.put_u8(PROPERTY_REQUEST_UPDATE);

    buf.freeze()
}

/// Extract the battery percentage from a hub notification
///
/// Returns `None` for any frame that is not a battery property update. The hub
/// pushes many other notification types; those are not errors.
#[must_use]
pub fn decode_battery_notification(payload: &[u8]) -> Option<u8> {
    match payload {
        [0x06, _, _, PROPERTY_BATTERY_VOLTAGE, _, pct, ..] => Some(*pct),
        _ => None,
    }
}

/// Lowercase hex rendering used in diagnostics
#[must_use]
pub fn to_hex(data: &[u8]) -> String {
    use std::fmt::Write as _;

    data.iter().fold(String::with_capacity(data.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
