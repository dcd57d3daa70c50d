//! Input report codec
//!
//! The controller delivers its state as a fixed 10-byte HID input report.

use std::fmt;
use thiserror::Error;

/// Length of an input report on the wire.
pub const REPORT_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid report length: {0} (expected {REPORT_LEN})")]
    InvalidLength(usize),
}

/// One decoded input report.
///
/// # Wire Layout (10 bytes)
///
/// ```text
/// [0] : low nibble = dpad (0-8, 8 = centered), high nibble padding
/// [1] : buttons group A (8 bits)
/// [2] : buttons group B (top 7 bits, bit 0 padding)
/// [3] : left stick X
/// [4] : left stick Y
/// [5] : right stick X (Z)
/// [6] : right stick Y (Rz)
/// [7] : brake / left trigger
/// [8] : throttle / right trigger
/// [9] : reserved (volume, play/pause)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputReport {
    pub dpad: u8,
    pub buttons1: u8,
    pub buttons2: u8,
    pub stick_x: u8,
    pub stick_y: u8,
    pub stick_z: u8,
    pub stick_rz: u8,
    pub brake: u8,
    pub throttle: u8,
    pub reserved: u8,
}

/// Decode a notification payload. Range checks on the dpad happen later.
pub fn decode(bytes: &[u8]) -> Result<InputReport, DecodeError> {
    let bytes: &[u8; REPORT_LEN] = bytes
        .try_into()
        .map_err(|_| DecodeError::InvalidLength(bytes.len()))?;

    Ok(InputReport {
        dpad: bytes[0] & 0x0F,
        buttons1: bytes[1],
        buttons2: bytes[2],
        stick_x: bytes[3],
        stick_y: bytes[4],
        stick_z: bytes[5],
        stick_rz: bytes[6],
        brake: bytes[7],
        throttle: bytes[8],
        reserved: bytes[9],
    })
}

impl InputReport {
    pub fn to_bytes(&self) -> [u8; REPORT_LEN] {
        [
            self.dpad,
            self.buttons1,
            self.buttons2,
            self.stick_x,
            self.stick_y,
            self.stick_z,
            self.stick_rz,
            self.brake,
            self.throttle,
            self.reserved,
        ]
    }
}

impl fmt::Display for InputReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dpad: {:x}", self.dpad)?;
        writeln!(f, "Buttons1: {:x}", self.buttons1)?;
        writeln!(f, "Buttons2: {:x}", self.buttons2)?;
        writeln!(f, "StickX: {:x}", self.stick_x)?;
        writeln!(f, "StickY: {:x}", self.stick_y)?;
        writeln!(f, "StickZ: {:x}", self.stick_z)?;
        writeln!(f, "StickRz: {:x}", self.stick_rz)?;
        writeln!(f, "Brake: {:x}", self.brake)?;
        writeln!(f, "Throttle: {:x}", self.throttle)?;
        write!(f, "Reserved: {:x}", self.reserved)
    }
}
