//! Radio link surface
//!
//! The link layer (GAP/GATT client, pairing, transport) is an external
//! collaborator. It is driven through [`RadioLink`] commands and reports back
//! asynchronously with [`LinkEvent`]s.

use crate::domain::models::{AddressType, BdAddr, HandleRange, Uuid};
use crate::infrastructure::bluetooth::protocol::{
    AuthMode, KeyType, ScanParams, ServiceSource, Status,
};
use crate::infrastructure::bluetooth::security::SecurityParams;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("link command {command} rejected with code 0x{code:x}")]
    Rejected { command: &'static str, code: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicElem {
    pub uuid: Uuid,
    pub handle: u16,
    pub properties: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorElem {
    pub uuid: Uuid,
    pub handle: u16,
}

/// Inbound events from the link layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LinkEvent {
    AppRegistered {
        #[serde(default)]
        status: Status,
        app_id: u16,
        interface: u8,
    },
    LocalPrivacyConfigured {
        #[serde(default)]
        status: Status,
    },
    ScanParametersSet {
        #[serde(default)]
        status: Status,
    },
    ScanStarted {
        #[serde(default)]
        status: Status,
    },
    ScanResult {
        address: BdAddr,
        #[serde(default)]
        address_type: AddressType,
        #[serde(default)]
        rssi: i8,
        #[serde(default)]
        adv_data: Vec<u8>,
        #[serde(default)]
        scan_rsp: Vec<u8>,
    },
    ScanComplete,
    ScanStopped {
        #[serde(default)]
        status: Status,
    },
    SecurityRequest {
        address: BdAddr,
    },
    NumericComparison {
        address: BdAddr,
        passkey: u32,
    },
    PasskeyRequest {
        address: BdAddr,
    },
    PasskeyNotify {
        address: BdAddr,
        passkey: u32,
    },
    OobRequest {
        address: BdAddr,
    },
    KeyExchanged {
        key_type: KeyType,
    },
    LocalIdentityRoot,
    LocalEncryptionRoot,
    AuthenticationComplete {
        address: BdAddr,
        #[serde(default)]
        address_type: AddressType,
        success: bool,
        #[serde(default)]
        fail_reason: u8,
        #[serde(default)]
        auth_mode: AuthMode,
    },
    ConnectionOpened {
        #[serde(default)]
        status: Status,
        conn_id: u16,
        address: BdAddr,
    },
    MtuConfigured {
        #[serde(default)]
        status: Status,
        conn_id: u16,
        mtu: u16,
    },
    ServiceSearchResult {
        conn_id: u16,
        uuid: Uuid,
        start_handle: u16,
        end_handle: u16,
        #[serde(default)]
        is_primary: bool,
    },
    ServiceSearchComplete {
        #[serde(default)]
        status: Status,
        conn_id: u16,
        #[serde(default)]
        source: ServiceSource,
    },
    CharacteristicsEnumerated {
        #[serde(default)]
        status: Status,
        conn_id: u16,
        characteristics: Vec<CharacteristicElem>,
    },
    NotifyRegistered {
        #[serde(default)]
        status: Status,
        handle: u16,
    },
    DescriptorsEnumerated {
        #[serde(default)]
        status: Status,
        conn_id: u16,
        handle: u16,
        descriptors: Vec<DescriptorElem>,
    },
    DescriptorWritten {
        #[serde(default)]
        status: Status,
        conn_id: u16,
        handle: u16,
    },
    CharacteristicWritten {
        #[serde(default)]
        status: Status,
        conn_id: u16,
        handle: u16,
    },
    Notification {
        conn_id: u16,
        handle: u16,
        value: Vec<u8>,
    },
    ServiceChanged {
        address: BdAddr,
    },
    Disconnected {
        #[serde(default)]
        reason: u16,
    },
}

impl LinkEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LinkEvent::AppRegistered { .. } => "app_registered",
            LinkEvent::LocalPrivacyConfigured { .. } => "local_privacy_configured",
            LinkEvent::ScanParametersSet { .. } => "scan_parameters_set",
            LinkEvent::ScanStarted { .. } => "scan_started",
            LinkEvent::ScanResult { .. } => "scan_result",
            LinkEvent::ScanComplete => "scan_complete",
            LinkEvent::ScanStopped { .. } => "scan_stopped",
            LinkEvent::SecurityRequest { .. } => "security_request",
            LinkEvent::NumericComparison { .. } => "numeric_comparison",
            LinkEvent::PasskeyRequest { .. } => "passkey_request",
            LinkEvent::PasskeyNotify { .. } => "passkey_notify",
            LinkEvent::OobRequest { .. } => "oob_request",
            LinkEvent::KeyExchanged { .. } => "key_exchanged",
            LinkEvent::LocalIdentityRoot => "local_identity_root",
            LinkEvent::LocalEncryptionRoot => "local_encryption_root",
            LinkEvent::AuthenticationComplete { .. } => "authentication_complete",
            LinkEvent::ConnectionOpened { .. } => "connection_opened",
            LinkEvent::MtuConfigured { .. } => "mtu_configured",
            LinkEvent::ServiceSearchResult { .. } => "service_search_result",
            LinkEvent::ServiceSearchComplete { .. } => "service_search_complete",
            LinkEvent::CharacteristicsEnumerated { .. } => "characteristics_enumerated",
            LinkEvent::NotifyRegistered { .. } => "notify_registered",
            LinkEvent::DescriptorsEnumerated { .. } => "descriptors_enumerated",
            LinkEvent::DescriptorWritten { .. } => "descriptor_written",
            LinkEvent::CharacteristicWritten { .. } => "characteristic_written",
            LinkEvent::Notification { .. } => "notification",
            LinkEvent::ServiceChanged { .. } => "service_changed",
            LinkEvent::Disconnected { .. } => "disconnected",
        }
    }
}

/// Outbound commands, one per [`RadioLink`] capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    SetLocalMtu(u16),
    SetSecurityParams(SecurityParams),
    RegisterApp(u16),
    ConfigurePrivacy,
    SetScanParameters(ScanParams),
    StartScanning { duration_secs: u32 },
    StopScanning,
    OpenConnection { address: BdAddr, address_type: AddressType },
    NegotiateMtu { conn_id: u16, mtu: u16 },
    SearchService { conn_id: u16, uuid: Uuid },
    EnumerateCharacteristics { conn_id: u16, range: HandleRange },
    RegisterForNotify { address: BdAddr, handle: u16 },
    EnumerateDescriptors { conn_id: u16, handle: u16 },
    WriteDescriptor { conn_id: u16, handle: u16, value: Vec<u8> },
    SecurityResponse { address: BdAddr, accept: bool },
    ConfirmReply { address: BdAddr, accept: bool },
    PasskeyReply { address: BdAddr, passkey: u32 },
    OobReply { address: BdAddr, key: [u8; 16] },
}

impl LinkCommand {
    pub fn name(&self) -> &'static str {
        match self {
            LinkCommand::SetLocalMtu(_) => "set_local_mtu",
            LinkCommand::SetSecurityParams(_) => "set_security_params",
            LinkCommand::RegisterApp(_) => "register_app",
            LinkCommand::ConfigurePrivacy => "configure_privacy",
            LinkCommand::SetScanParameters(_) => "set_scan_parameters",
            LinkCommand::StartScanning { .. } => "start_scanning",
            LinkCommand::StopScanning => "stop_scanning",
            LinkCommand::OpenConnection { .. } => "open_connection",
            LinkCommand::NegotiateMtu { .. } => "negotiate_mtu",
            LinkCommand::SearchService { .. } => "search_service",
            LinkCommand::EnumerateCharacteristics { .. } => "enumerate_characteristics",
            LinkCommand::RegisterForNotify { .. } => "register_for_notify",
            LinkCommand::EnumerateDescriptors { .. } => "enumerate_descriptors",
            LinkCommand::WriteDescriptor { .. } => "write_descriptor",
            LinkCommand::SecurityResponse { .. } => "security_response",
            LinkCommand::ConfirmReply { .. } => "confirm_reply",
            LinkCommand::PasskeyReply { .. } => "passkey_reply",
            LinkCommand::OobReply { .. } => "oob_reply",
        }
    }
}

/// Capabilities the link layer exposes to the bridge.
///
/// Every call only issues the request; results arrive later as events.
pub trait RadioLink: Send {
    fn set_local_mtu(&mut self, mtu: u16) -> Result<(), LinkError>;
    fn set_security_params(&mut self, params: &SecurityParams) -> Result<(), LinkError>;
    fn register_app(&mut self, app_id: u16) -> Result<(), LinkError>;
    fn configure_privacy(&mut self) -> Result<(), LinkError>;
    fn set_scan_parameters(&mut self, params: &ScanParams) -> Result<(), LinkError>;
    fn start_scanning(&mut self, duration_secs: u32) -> Result<(), LinkError>;
    fn stop_scanning(&mut self) -> Result<(), LinkError>;
    fn open_connection(&mut self, address: BdAddr, address_type: AddressType)
        -> Result<(), LinkError>;
    fn negotiate_mtu(&mut self, conn_id: u16, mtu: u16) -> Result<(), LinkError>;
    fn search_service(&mut self, conn_id: u16, uuid: Uuid) -> Result<(), LinkError>;
    fn enumerate_characteristics(&mut self, conn_id: u16, range: HandleRange)
        -> Result<(), LinkError>;
    fn register_for_notify(&mut self, address: BdAddr, handle: u16) -> Result<(), LinkError>;
    fn enumerate_descriptors(&mut self, conn_id: u16, handle: u16) -> Result<(), LinkError>;
    fn write_descriptor(&mut self, conn_id: u16, handle: u16, value: &[u8])
        -> Result<(), LinkError>;
    fn security_response(&mut self, address: BdAddr, accept: bool) -> Result<(), LinkError>;
    fn confirm_reply(&mut self, address: BdAddr, accept: bool) -> Result<(), LinkError>;
    fn passkey_reply(&mut self, address: BdAddr, passkey: u32) -> Result<(), LinkError>;
    fn oob_reply(&mut self, address: BdAddr, key: &[u8; 16]) -> Result<(), LinkError>;
}

/// Issue one command on the link.
pub fn execute(link: &mut dyn RadioLink, command: &LinkCommand) -> Result<(), LinkError> {
    match command {
        LinkCommand::SetLocalMtu(mtu) => link.set_local_mtu(*mtu),
        LinkCommand::SetSecurityParams(params) => link.set_security_params(params),
        LinkCommand::RegisterApp(app_id) => link.register_app(*app_id),
        LinkCommand::ConfigurePrivacy => link.configure_privacy(),
        LinkCommand::SetScanParameters(params) => link.set_scan_parameters(params),
        LinkCommand::StartScanning { duration_secs } => link.start_scanning(*duration_secs),
        LinkCommand::StopScanning => link.stop_scanning(),
        LinkCommand::OpenConnection {
            address,
            address_type,
        } => link.open_connection(*address, *address_type),
        LinkCommand::NegotiateMtu { conn_id, mtu } => link.negotiate_mtu(*conn_id, *mtu),
        LinkCommand::SearchService { conn_id, uuid } => link.search_service(*conn_id, *uuid),
        LinkCommand::EnumerateCharacteristics { conn_id, range } => {
            link.enumerate_characteristics(*conn_id, *range)
        }
        LinkCommand::RegisterForNotify { address, handle } => {
            link.register_for_notify(*address, *handle)
        }
        LinkCommand::EnumerateDescriptors { conn_id, handle } => {
            link.enumerate_descriptors(*conn_id, *handle)
        }
        LinkCommand::WriteDescriptor {
            conn_id,
            handle,
            value,
        } => link.write_descriptor(*conn_id, *handle, value),
        LinkCommand::SecurityResponse { address, accept } => {
            link.security_response(*address, *accept)
        }
        LinkCommand::ConfirmReply { address, accept } => link.confirm_reply(*address, *accept),
        LinkCommand::PasskeyReply { address, passkey } => link.passkey_reply(*address, *passkey),
        LinkCommand::OobReply { address, key } => link.oob_reply(*address, key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_parse_from_tagged_json() {
        let event: LinkEvent = serde_json::from_str(
            r#"{"event":"connection_opened","conn_id":3,"address":[1,2,3,4,5,6]}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            LinkEvent::ConnectionOpened {
                status: Status::OK,
                conn_id: 3,
                address: BdAddr([1, 2, 3, 4, 5, 6]),
            }
        );
        assert_eq!(event.name(), "connection_opened");
    }

    #[test]
    fn unit_events_parse() {
        let event: LinkEvent = serde_json::from_str(r#"{"event":"scan_complete"}"#).unwrap();
        assert_eq!(event, LinkEvent::ScanComplete);
    }

    #[test]
    fn uuid_variants_parse() {
        let event: LinkEvent = serde_json::from_str(
            r#"{"event":"service_search_result","conn_id":0,"uuid":{"uuid16":6162},"start_handle":1,"end_handle":9}"#,
        )
        .unwrap();
        match event {
            LinkEvent::ServiceSearchResult { uuid, .. } => assert!(uuid.is_uuid16(0x1812)),
            other => panic!("unexpected {:?}", other),
        }
    }
}
