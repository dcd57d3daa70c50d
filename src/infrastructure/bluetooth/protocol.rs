//! HID-over-GATT Protocol Constants
//!
//! Attribute UUIDs, link-layer status codes, advertisement parsing and the
//! fixed scan/security parameters used to reach the controller.

use crate::domain::models::AddressType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// HID Service
pub const HID_SERVICE_UUID: u16 = 0x1812;

/// HID Report characteristic, carries the input report notifications
pub const HID_REPORT_CHAR_UUID: u16 = 0x2A4D;

/// Client Characteristic Configuration descriptor
pub const CLIENT_CONFIG_DESCR_UUID: u16 = 0x2902;

/// Value written to the client configuration descriptor: notifications on (0x0001, LE)
pub const NOTIFY_ENABLE: [u8; 2] = 0x0001u16.to_le_bytes();

/// Characteristic property bit for notify
pub const CHAR_PROP_NOTIFY: u8 = 0x10;

/// Application id of the single client profile
pub const APP_ID: u16 = 0;

/// ATT MTU bounds accepted by the link layer
pub const ATT_MIN_MTU: u16 = 23;
pub const ATT_MAX_MTU: u16 = 517;

/// Link-layer error code for an out-of-range command argument
pub const ERR_INVALID_ARG: i32 = 0x102;

/// Advertising data AD types
pub mod ad_type {
    pub const NAME_COMPLETE: u8 = 0x09;
}

/// Status code carried by every link-layer completion event. Zero is success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status(pub u16);

impl Status {
    pub const OK: Status = Status(0);

    pub fn is_ok(&self) -> bool {
        *self == Self::OK
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    Passive,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanParams {
    pub scan_type: ScanType,
    pub own_addr_type: AddressType,
    pub filter_allow_all: bool,
    /// Units of 0.625 ms
    pub interval: u16,
    /// Units of 0.625 ms
    pub window: u16,
    pub filter_duplicates: bool,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            scan_type: ScanType::Active,
            own_addr_type: AddressType::RpaPublic,
            filter_allow_all: true,
            interval: 0x50,
            window: 0x30,
            filter_duplicates: false,
        }
    }
}

/// Where a completed service search took its results from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceSource {
    #[default]
    RemoteDevice,
    Cache,
    Unknown,
}

/// Authentication mode bits as negotiated during pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthMode(pub u8);

impl AuthMode {
    pub const BOND: u8 = 0x01;
    pub const MITM: u8 = 0x04;
    pub const SC: u8 = 0x08;

    pub const SC_MITM_BOND: AuthMode = AuthMode(Self::SC | Self::MITM | Self::BOND);

    pub fn name(&self) -> &'static str {
        match self.0 {
            0x00 => "NO_BOND",
            0x01 => "BOND",
            0x04 => "REQ_MITM",
            0x05 => "REQ_BOND_MITM",
            0x08 => "REQ_SC_ONLY",
            0x09 => "REQ_SC_BOND",
            0x0C => "REQ_SC_MITM",
            0x0D => "REQ_SC_MITM_BOND",
            _ => "INVALID_AUTH_REQ",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    None,
    PeerEnc,
    PeerId,
    PeerCsrk,
    PeerLinkKey,
    LocalLinkKey,
    LocalEnc,
    LocalCsrk,
}

impl KeyType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "LE_KEY_NONE",
            Self::PeerEnc => "LE_KEY_PENC",
            Self::PeerId => "LE_KEY_PID",
            Self::PeerCsrk => "LE_KEY_PCSRK",
            Self::PeerLinkKey => "LE_KEY_PLK",
            Self::LocalLinkKey => "LE_KEY_LLK",
            Self::LocalEnc => "LE_KEY_LENC",
            Self::LocalCsrk => "LE_KEY_LCSRK",
        }
    }
}

/// Find the first AD structure of `wanted` type in raw advertising data.
pub fn find_ad_field(data: &[u8], wanted: u8) -> Option<&[u8]> {
    let mut i = 0;
    while i < data.len() {
        let len = data[i] as usize;
        if len == 0 || i + len >= data.len() {
            break;
        }
        if data[i + 1] == wanted {
            return Some(&data[i + 2..i + 1 + len]);
        }
        i += len + 1;
    }
    None
}

/// The complete local name from advertising data, falling back to the scan response.
pub fn complete_name<'a>(adv_data: &'a [u8], scan_rsp: &'a [u8]) -> Option<&'a [u8]> {
    find_ad_field(adv_data, ad_type::NAME_COMPLETE)
        .or_else(|| find_ad_field(scan_rsp, ad_type::NAME_COMPLETE))
}
