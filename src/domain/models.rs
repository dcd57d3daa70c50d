use serde::{Deserialize, Serialize};
use std::fmt;

/// 48-bit Bluetooth device address, most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BdAddr(pub [u8; 6]);

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressType {
    #[default]
    Public,
    Random,
    RpaPublic,
    RpaRandom,
}

/// A peripheral seen during scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub address: BdAddr,
    pub address_type: AddressType,
    pub name: Option<String>,
}

/// Attribute UUID as reported by the link layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Uuid {
    Uuid16(u16),
    Uuid32(u32),
    Uuid128([u8; 16]),
}

impl Uuid {
    pub fn is_uuid16(&self, value: u16) -> bool {
        matches!(self, Uuid::Uuid16(v) if *v == value)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uuid::Uuid16(v) => write!(f, "0x{:04X}", v),
            Uuid::Uuid32(v) => write!(f, "0x{:08X}", v),
            Uuid::Uuid128(bytes) => {
                for (i, b) in bytes.iter().enumerate() {
                    if matches!(i, 4 | 6 | 8 | 10) {
                        f.write_str("-")?;
                    }
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

/// Inclusive attribute handle range of a discovered service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HandleRange {
    pub start: u16,
    pub end: u16,
}

impl HandleRange {
    pub fn contains(&self, handle: u16) -> bool {
        handle >= self.start && handle <= self.end
    }
}

/// Stable identifier of one logical control.
///
/// Declaration order is the order the tracker walks a report in, and the
/// index into the publish table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControlId {
    Dpd,
    Rsb,
    Opt,
    Men,
    Stb,
    Rtb,
    Ltb,
    Gas,
    Cpt,
    Lab,
    Lbb,
    Lxb,
    Lyb,
    Lbp,
    Rbp,
    Lsb,
    Ljs,
    Rjs,
    Ltr,
    Rtr,
}

impl ControlId {
    pub const COUNT: usize = 20;

    pub const ALL: [ControlId; Self::COUNT] = [
        ControlId::Dpd,
        ControlId::Rsb,
        ControlId::Opt,
        ControlId::Men,
        ControlId::Stb,
        ControlId::Rtb,
        ControlId::Ltb,
        ControlId::Gas,
        ControlId::Cpt,
        ControlId::Lab,
        ControlId::Lbb,
        ControlId::Lxb,
        ControlId::Lyb,
        ControlId::Lbp,
        ControlId::Rbp,
        ControlId::Lsb,
        ControlId::Ljs,
        ControlId::Rjs,
        ControlId::Ltr,
        ControlId::Rtr,
    ];

    /// The 3-character identifier used on the output line.
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlId::Dpd => "DPD",
            ControlId::Rsb => "RSB",
            ControlId::Opt => "OPT",
            ControlId::Men => "MEN",
            ControlId::Stb => "STB",
            ControlId::Rtb => "RTB",
            ControlId::Ltb => "LTB",
            ControlId::Gas => "GAS",
            ControlId::Cpt => "CPT",
            ControlId::Lab => "LAB",
            ControlId::Lbb => "LBB",
            ControlId::Lxb => "LXB",
            ControlId::Lyb => "LYB",
            ControlId::Lbp => "LBP",
            ControlId::Rbp => "RBP",
            ControlId::Lsb => "LSB",
            ControlId::Ljs => "LJS",
            ControlId::Rjs => "RJS",
            ControlId::Ltr => "LTR",
            ControlId::Rtr => "RTR",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn kind(&self) -> ControlKind {
        match self {
            ControlId::Dpd => ControlKind::DPad,
            ControlId::Ljs | ControlId::Rjs => ControlKind::Stick,
            ControlId::Ltr | ControlId::Rtr => ControlKind::Trigger,
            _ => ControlKind::Button,
        }
    }
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Button,
    Stick,
    Trigger,
    DPad,
}

/// Compass state of the directional pad. `Centered` means nothing is pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DpadDirection {
    N,
    NE,
    E,
    SE,
    S,
    SW,
    W,
    NW,
    #[default]
    Centered,
}

impl DpadDirection {
    /// Maps the raw report nibble. Only 0..=8 are valid.
    pub fn from_raw(value: u8) -> Option<Self> {
        let dir = match value {
            0 => Self::N,
            1 => Self::NE,
            2 => Self::E,
            3 => Self::SE,
            4 => Self::S,
            5 => Self::SW,
            6 => Self::W,
            7 => Self::NW,
            8 => Self::Centered,
            _ => return None,
        };
        Some(dir)
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::N => "N",
            Self::NE => "NE",
            Self::E => "E",
            Self::SE => "SE",
            Self::S => "S",
            Self::SW => "SW",
            Self::W => "W",
            Self::NW => "NW",
            Self::Centered => "NO",
        }
    }
}

/// Current value of one control.
///
/// Equality is exact, including on the percentage floats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlValue {
    Button(bool),
    Stick { x: f32, y: f32 },
    Trigger(f32),
    DPad(DpadDirection),
}

impl ControlValue {
    /// Neutral value a control starts with.
    pub fn neutral(kind: ControlKind) -> Self {
        match kind {
            ControlKind::Button => ControlValue::Button(false),
            ControlKind::Stick => ControlValue::Stick { x: 0.0, y: 0.0 },
            ControlKind::Trigger => ControlValue::Trigger(0.0),
            ControlKind::DPad => ControlValue::DPad(DpadDirection::Centered),
        }
    }
}
