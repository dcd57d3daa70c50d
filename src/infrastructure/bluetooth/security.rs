//! Pairing policy
//!
//! The bridge runs headless, so pairing questions are answered by a policy
//! object instead of a user. [`AcceptAllPolicy`] is the default.

use crate::domain::models::BdAddr;
use crate::infrastructure::bluetooth::protocol::AuthMode;

/// Key distribution mask bits
pub const KEY_MASK_ENC: u8 = 0x01;
pub const KEY_MASK_ID: u8 = 0x02;

/// SMP IO capability code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoCapability(pub u8);

impl IoCapability {
    /// Headless: no display, no keyboard
    pub const NO_INPUT_NO_OUTPUT: IoCapability = IoCapability(0x03);
}

/// Security parameters pushed to the link layer before scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityParams {
    pub auth_req: AuthMode,
    pub io_capability: IoCapability,
    pub max_key_size: u8,
    pub init_key: u8,
    pub rsp_key: u8,
    pub oob_support: bool,
}

impl Default for SecurityParams {
    fn default() -> Self {
        Self {
            auth_req: AuthMode::SC_MITM_BOND,
            io_capability: IoCapability::NO_INPUT_NO_OUTPUT,
            max_key_size: 16,
            init_key: KEY_MASK_ENC | KEY_MASK_ID,
            rsp_key: KEY_MASK_ENC | KEY_MASK_ID,
            oob_support: false,
        }
    }
}

pub trait SecurityPolicy: Send {
    fn params(&self) -> SecurityParams {
        SecurityParams::default()
    }

    fn accept_security_request(&self, address: BdAddr) -> bool;

    fn confirm_numeric_comparison(&self, address: BdAddr, passkey: u32) -> bool;

    /// Passkey to enter when the peer displays one. `None` leaves the request unanswered.
    fn passkey(&self, _address: BdAddr) -> Option<u32> {
        None
    }

    /// Temporary key for out-of-band pairing.
    fn oob_key(&self, address: BdAddr) -> [u8; 16];
}

/// Accepts every request and answers OOB with a fixed temporary key.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllPolicy;

/// Both sides of an OOB pairing must use the same temporary key.
pub const FIXED_OOB_KEY: [u8; 16] = [1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];

impl SecurityPolicy for AcceptAllPolicy {
    fn accept_security_request(&self, _address: BdAddr) -> bool {
        true
    }

    fn confirm_numeric_comparison(&self, _address: BdAddr, _passkey: u32) -> bool {
        true
    }

    fn oob_key(&self, _address: BdAddr) -> [u8; 16] {
        FIXED_OOB_KEY
    }
}
