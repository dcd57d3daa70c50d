//! Connection State Machine
//!
//! Drives the controller from scanning to an active notification subscription.
//! The machine is pure: each inbound [`LinkEvent`] updates the
//! [`ConnectionContext`] and yields the [`Effect`]s the caller must carry out.

use crate::domain::models::{AddressType, BdAddr, DeviceIdentity, HandleRange, Uuid};
use crate::domain::report::{self, InputReport};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::link::{
    CharacteristicElem, DescriptorElem, LinkCommand, LinkEvent,
};
use crate::infrastructure::bluetooth::protocol::{self, ScanParams, Status};
use crate::infrastructure::bluetooth::security::SecurityPolicy;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Scanning,
    Connecting,
    NegotiatingMtu,
    DiscoveringService,
    DiscoveringCharacteristics,
    EnablingNotifications,
    Active,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Scanning => "Scanning",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::NegotiatingMtu => "NegotiatingMtu",
            ConnectionState::DiscoveringService => "DiscoveringService",
            ConnectionState::DiscoveringCharacteristics => "DiscoveringCharacteristics",
            ConnectionState::EnablingNotifications => "EnablingNotifications",
            ConnectionState::Active => "Active",
            ConnectionState::Disconnected => "Disconnected",
        };
        f.write_str(name)
    }
}

/// Everything known about the single peer connection.
#[derive(Debug, Default)]
pub struct ConnectionContext {
    pub interface: Option<u8>,
    pub conn_id: Option<u16>,
    pub peer: Option<DeviceIdentity>,
    pub service_range: Option<HandleRange>,
    pub notify_handle: Option<u16>,
    pub service_found: bool,
    connecting: AtomicBool,
}

impl ConnectionContext {
    /// Claims the single connection slot. Returns false if an attempt is already in flight.
    ///
    /// The machine is the single writer: every event is handled through `&mut self`,
    /// so two advertisements can never race here. The compare-exchange only keeps
    /// the claim a single step.
    pub fn try_begin_connecting(&self) -> bool {
        self.connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::Acquire)
    }

    fn clear_connecting(&self) {
        self.connecting.store(false, Ordering::Release);
    }

    fn reset_link(&mut self) {
        self.clear_connecting();
        self.conn_id = None;
        self.service_found = false;
        self.service_range = None;
        self.notify_handle = None;
    }
}

/// Side effect requested by the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Command(LinkCommand),
    Report(InputReport),
}

/// Static parameters of the machine, taken from the settings.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub target_name: String,
    pub scan_params: ScanParams,
    pub scan_duration_secs: u32,
    pub mtu: u16,
    pub rescan_on_disconnect: bool,
    pub debug_raw_report_logging: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for MachineConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            target_name: settings.target_device_name.clone(),
            scan_params: ScanParams::default(),
            scan_duration_secs: settings.scan_duration_secs,
            mtu: settings.local_mtu,
            rescan_on_disconnect: settings.rescan_on_disconnect,
            debug_raw_report_logging: settings.debug_raw_report_logging,
        }
    }
}

pub struct ConnectionMachine {
    state: ConnectionState,
    ctx: ConnectionContext,
    config: MachineConfig,
    policy: Box<dyn SecurityPolicy>,
}

/// Logs a failed step. Returns true when the step must be abandoned.
fn step_failed(step: &str, status: Status) -> bool {
    if status.is_ok() {
        return false;
    }
    error!("{} failed, status {}", step, status);
    true
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn command(command: LinkCommand) -> Vec<Effect> {
    vec![Effect::Command(command)]
}

impl ConnectionMachine {
    pub fn new(config: MachineConfig, policy: Box<dyn SecurityPolicy>) -> Self {
        Self {
            state: ConnectionState::Idle,
            ctx: ConnectionContext::default(),
            config,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.ctx
    }

    pub fn policy(&self) -> &dyn SecurityPolicy {
        self.policy.as_ref()
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!("Connection state {} -> {}", self.state, next);
            self.state = next;
        }
    }

    fn ignore(&self, event: &LinkEvent) -> Vec<Effect> {
        debug!("Ignoring {} in state {}", event.name(), self.state);
        Vec::new()
    }

    /// Commands that start a fresh scan, unless a connection attempt is in flight.
    pub fn restart_scan(&mut self) -> Vec<Effect> {
        if self.ctx.is_connecting() {
            warn!("Connection attempt in flight, not rescanning");
            return Vec::new();
        }
        info!("Restarting scan for {}", self.config.target_name);
        command(LinkCommand::StartScanning {
            duration_secs: self.config.scan_duration_secs,
        })
    }

    /// The link refused to issue `command`. A refused connection attempt frees the slot.
    pub fn command_failed(&mut self, command: &LinkCommand) {
        if let LinkCommand::OpenConnection { .. } = command {
            self.ctx.clear_connecting();
            self.set_state(ConnectionState::Disconnected);
        }
    }

    pub fn handle(&mut self, event: LinkEvent) -> Vec<Effect> {
        match event {
            LinkEvent::AppRegistered {
                status,
                app_id,
                interface,
            } => {
                if step_failed("Application registration", status) {
                    return Vec::new();
                }
                info!("Application {} registered on interface {}", app_id, interface);
                self.ctx.interface = Some(interface);
                command(LinkCommand::ConfigurePrivacy)
            }
            LinkEvent::LocalPrivacyConfigured { status } => {
                if step_failed("Local privacy configuration", status) {
                    return Vec::new();
                }
                command(LinkCommand::SetScanParameters(self.config.scan_params))
            }
            LinkEvent::ScanParametersSet { status } => {
                if step_failed("Setting scan parameters", status) {
                    return Vec::new();
                }
                command(LinkCommand::StartScanning {
                    duration_secs: self.config.scan_duration_secs,
                })
            }
            LinkEvent::ScanStarted { status } => {
                if step_failed("Starting scan", status) {
                    return Vec::new();
                }
                info!("Scanning for {}", self.config.target_name);
                if !self.ctx.is_connecting() {
                    self.set_state(ConnectionState::Scanning);
                }
                Vec::new()
            }
            LinkEvent::ScanResult {
                address,
                address_type,
                rssi,
                adv_data,
                scan_rsp,
            } => self.on_scan_result(address, address_type, rssi, &adv_data, &scan_rsp),
            LinkEvent::ScanComplete => {
                info!("Scan window elapsed");
                if self.state == ConnectionState::Scanning && !self.ctx.is_connecting() {
                    self.set_state(ConnectionState::Idle);
                }
                Vec::new()
            }
            LinkEvent::ScanStopped { status } => {
                if !step_failed("Stopping scan", status) {
                    info!("Scan stopped");
                }
                Vec::new()
            }
            LinkEvent::SecurityRequest { address } => {
                let accept = self.policy.accept_security_request(address);
                info!("Security request from {}, accept: {}", address, accept);
                command(LinkCommand::SecurityResponse { address, accept })
            }
            LinkEvent::NumericComparison { address, passkey } => {
                let accept = self.policy.confirm_numeric_comparison(address, passkey);
                info!("Numeric comparison {:06} with {}, accept: {}", passkey, address, accept);
                command(LinkCommand::ConfirmReply { address, accept })
            }
            LinkEvent::PasskeyRequest { address } => match self.policy.passkey(address) {
                Some(passkey) => {
                    info!("Passkey requested by {}, replying", address);
                    command(LinkCommand::PasskeyReply { address, passkey })
                }
                None => {
                    warn!("Passkey requested by {}, no passkey configured", address);
                    Vec::new()
                }
            },
            LinkEvent::PasskeyNotify { address, passkey } => {
                info!("Passkey for {}: {:06}", address, passkey);
                Vec::new()
            }
            LinkEvent::OobRequest { address } => {
                info!("Out-of-band key requested by {}", address);
                command(LinkCommand::OobReply {
                    address,
                    key: self.policy.oob_key(address),
                })
            }
            LinkEvent::KeyExchanged { key_type } => {
                info!("Key exchanged: {}", key_type.name());
                Vec::new()
            }
            LinkEvent::LocalIdentityRoot => {
                info!("Local identity root key ready");
                Vec::new()
            }
            LinkEvent::LocalEncryptionRoot => {
                info!("Local encryption root key ready");
                Vec::new()
            }
            LinkEvent::AuthenticationComplete {
                address,
                address_type,
                success,
                fail_reason,
                auth_mode,
            } => {
                info!("Authentication with {} ({:?}) complete", address, address_type);
                if success {
                    info!("Pairing succeeded, auth mode {}", auth_mode.name());
                } else {
                    warn!("Pairing failed, reason 0x{:x}", fail_reason);
                }
                Vec::new()
            }
            event @ LinkEvent::ConnectionOpened { .. } => self.on_connection_opened(event),
            event @ LinkEvent::MtuConfigured { .. } => self.on_mtu_configured(event),
            event @ LinkEvent::ServiceSearchResult { .. } => self.on_service_result(event),
            event @ LinkEvent::ServiceSearchComplete { .. } => self.on_search_complete(event),
            event @ LinkEvent::CharacteristicsEnumerated { .. } => {
                self.on_characteristics(event)
            }
            event @ LinkEvent::NotifyRegistered { .. } => self.on_notify_registered(event),
            event @ LinkEvent::DescriptorsEnumerated { .. } => self.on_descriptors(event),
            event @ LinkEvent::DescriptorWritten { .. } => self.on_descriptor_written(event),
            LinkEvent::CharacteristicWritten {
                status,
                conn_id,
                handle,
            } => {
                if !step_failed("Characteristic write", status) {
                    info!("Characteristic 0x{:04x} written on connection {}", handle, conn_id);
                }
                Vec::new()
            }
            LinkEvent::Notification {
                conn_id,
                handle,
                value,
            } => self.on_notification(conn_id, handle, &value),
            LinkEvent::ServiceChanged { address } => self.on_service_changed(address),
            LinkEvent::Disconnected { reason } => {
                info!("Disconnected, reason 0x{:x}", reason);
                self.ctx.reset_link();
                self.set_state(ConnectionState::Disconnected);
                if self.config.rescan_on_disconnect {
                    self.restart_scan()
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn on_scan_result(
        &mut self,
        address: BdAddr,
        address_type: AddressType,
        rssi: i8,
        adv_data: &[u8],
        scan_rsp: &[u8],
    ) -> Vec<Effect> {
        let Some(name) = protocol::complete_name(adv_data, scan_rsp) else {
            return Vec::new();
        };
        if name != self.config.target_name.as_bytes() {
            debug!("Skipping {} ({})", address, String::from_utf8_lossy(name));
            return Vec::new();
        }
        if !self.ctx.try_begin_connecting() {
            debug!("Already connecting, ignoring advertisement from {}", address);
            return Vec::new();
        }

        info!(
            "Found {} at {} (rssi {}), connecting",
            self.config.target_name, address, rssi
        );
        self.ctx.peer = Some(DeviceIdentity {
            address,
            address_type,
            name: Some(self.config.target_name.clone()),
        });
        self.set_state(ConnectionState::Connecting);
        vec![
            Effect::Command(LinkCommand::StopScanning),
            Effect::Command(LinkCommand::OpenConnection {
                address,
                address_type,
            }),
        ]
    }

    fn on_connection_opened(&mut self, event: LinkEvent) -> Vec<Effect> {
        let LinkEvent::ConnectionOpened {
            status,
            conn_id,
            address,
        } = event
        else {
            return Vec::new();
        };
        if self.state != ConnectionState::Connecting {
            return self.ignore(&event);
        }
        if step_failed("Opening connection", status) {
            self.ctx.clear_connecting();
            self.set_state(ConnectionState::Disconnected);
            return Vec::new();
        }

        info!("Connected to {}, connection id {}", address, conn_id);
        self.ctx.conn_id = Some(conn_id);
        self.set_state(ConnectionState::NegotiatingMtu);
        command(LinkCommand::NegotiateMtu {
            conn_id,
            mtu: self.config.mtu,
        })
    }

    fn on_mtu_configured(&mut self, event: LinkEvent) -> Vec<Effect> {
        let LinkEvent::MtuConfigured {
            status,
            conn_id,
            mtu,
        } = event
        else {
            return Vec::new();
        };
        if self.state != ConnectionState::NegotiatingMtu {
            return self.ignore(&event);
        }
        if step_failed("MTU negotiation", status) {
            return Vec::new();
        }

        info!("MTU {} on connection {}", mtu, conn_id);
        self.set_state(ConnectionState::DiscoveringService);
        command(LinkCommand::SearchService {
            conn_id,
            uuid: Uuid::Uuid16(protocol::HID_SERVICE_UUID),
        })
    }

    fn on_service_result(&mut self, event: LinkEvent) -> Vec<Effect> {
        let LinkEvent::ServiceSearchResult {
            uuid,
            start_handle,
            end_handle,
            is_primary,
            ..
        } = event
        else {
            return Vec::new();
        };
        if self.state != ConnectionState::DiscoveringService {
            return self.ignore(&event);
        }
        if !uuid.is_uuid16(protocol::HID_SERVICE_UUID) {
            debug!("Skipping service {}", uuid);
            return Vec::new();
        }
        if self.ctx.service_found {
            debug!("Service already found, keeping the first result");
            return Vec::new();
        }

        info!(
            "HID service at 0x{:04x}..0x{:04x} (primary: {})",
            start_handle, end_handle, is_primary
        );
        self.ctx.service_found = true;
        self.ctx.service_range = Some(HandleRange {
            start: start_handle,
            end: end_handle,
        });
        Vec::new()
    }

    fn on_search_complete(&mut self, event: LinkEvent) -> Vec<Effect> {
        let LinkEvent::ServiceSearchComplete {
            status,
            conn_id,
            source,
        } = event
        else {
            return Vec::new();
        };
        if self.state != ConnectionState::DiscoveringService {
            return self.ignore(&event);
        }
        if step_failed("Service search", status) {
            return Vec::new();
        }
        debug!("Service search complete, source {:?}", source);

        let range = match self.ctx.service_range {
            Some(range) if self.ctx.service_found => range,
            _ => {
                warn!("HID service not found, discovery stopped");
                return Vec::new();
            }
        };
        self.set_state(ConnectionState::DiscoveringCharacteristics);
        command(LinkCommand::EnumerateCharacteristics { conn_id, range })
    }

    fn select_report_characteristic(&self, characteristics: &[CharacteristicElem]) -> Option<u16> {
        let range = self.ctx.service_range?;
        characteristics
            .iter()
            .find(|c| {
                c.uuid.is_uuid16(protocol::HID_REPORT_CHAR_UUID)
                    && c.properties & protocol::CHAR_PROP_NOTIFY != 0
                    && range.contains(c.handle)
            })
            .map(|c| c.handle)
    }

    fn on_characteristics(&mut self, event: LinkEvent) -> Vec<Effect> {
        let LinkEvent::CharacteristicsEnumerated {
            status,
            characteristics,
            ..
        } = &event
        else {
            return Vec::new();
        };
        if self.state != ConnectionState::DiscoveringCharacteristics {
            return self.ignore(&event);
        }
        if step_failed("Characteristic enumeration", *status) {
            return Vec::new();
        }
        debug!("{} characteristics in service", characteristics.len());

        let Some(handle) = self.select_report_characteristic(characteristics) else {
            warn!("No notifying report characteristic, discovery stopped");
            return Vec::new();
        };
        let Some(peer) = self.ctx.peer.as_ref() else {
            warn!("No peer recorded, cannot register for notifications");
            return Vec::new();
        };

        info!("Report characteristic at 0x{:04x}", handle);
        let address = peer.address;
        self.ctx.notify_handle = Some(handle);
        self.set_state(ConnectionState::EnablingNotifications);
        command(LinkCommand::RegisterForNotify { address, handle })
    }

    fn on_notify_registered(&mut self, event: LinkEvent) -> Vec<Effect> {
        let LinkEvent::NotifyRegistered { status, handle } = event else {
            return Vec::new();
        };
        if self.state != ConnectionState::EnablingNotifications {
            return self.ignore(&event);
        }
        if step_failed("Notification registration", status) {
            return Vec::new();
        }
        let Some(conn_id) = self.ctx.conn_id else {
            return self.ignore(&event);
        };
        command(LinkCommand::EnumerateDescriptors { conn_id, handle })
    }

    fn on_descriptors(&mut self, event: LinkEvent) -> Vec<Effect> {
        let LinkEvent::DescriptorsEnumerated {
            status,
            conn_id,
            descriptors,
            ..
        } = &event
        else {
            return Vec::new();
        };
        if self.state != ConnectionState::EnablingNotifications {
            return self.ignore(&event);
        }
        if step_failed("Descriptor enumeration", *status) {
            return Vec::new();
        }

        let config_descr: Option<&DescriptorElem> = descriptors
            .iter()
            .find(|d| d.uuid.is_uuid16(protocol::CLIENT_CONFIG_DESCR_UUID));
        let Some(descr) = config_descr else {
            warn!("No client configuration descriptor, discovery stopped");
            return Vec::new();
        };

        command(LinkCommand::WriteDescriptor {
            conn_id: *conn_id,
            handle: descr.handle,
            value: protocol::NOTIFY_ENABLE.to_vec(),
        })
    }

    fn on_descriptor_written(&mut self, event: LinkEvent) -> Vec<Effect> {
        let LinkEvent::DescriptorWritten { status, handle, .. } = event else {
            return Vec::new();
        };
        if self.state != ConnectionState::EnablingNotifications {
            return self.ignore(&event);
        }
        if step_failed("Descriptor write", status) {
            return Vec::new();
        }
        info!("Notifications enabled (descriptor 0x{:04x})", handle);
        self.set_state(ConnectionState::Active);
        Vec::new()
    }

    fn on_notification(&mut self, conn_id: u16, handle: u16, value: &[u8]) -> Vec<Effect> {
        if self.config.debug_raw_report_logging {
            debug!(
                "Notification on {} handle 0x{:04x}: {}",
                conn_id,
                handle,
                hex(value)
            );
        }
        match report::decode(value) {
            Ok(report) => vec![Effect::Report(report)],
            Err(e) => {
                warn!("Dropping report: {}", e);
                Vec::new()
            }
        }
    }

    fn on_service_changed(&mut self, address: BdAddr) -> Vec<Effect> {
        let Some(conn_id) = self.ctx.conn_id else {
            debug!("Service changed on {} while not connected", address);
            return Vec::new();
        };
        info!("Service changed on {}, rediscovering", address);
        self.ctx.service_found = false;
        self.ctx.service_range = None;
        self.ctx.notify_handle = None;
        self.set_state(ConnectionState::DiscoveringService);
        command(LinkCommand::SearchService {
            conn_id,
            uuid: Uuid::Uuid16(protocol::HID_SERVICE_UUID),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::protocol::{ad_type, ServiceSource};
    use crate::infrastructure::bluetooth::security::{AcceptAllPolicy, FIXED_OOB_KEY};

    const TARGET: &str = "Pad-01";
    const PEER: BdAddr = BdAddr([0xAA, 0xBB, 0xCC, 0x01, 0x02, 0x03]);
    const CONN: u16 = 4;
    const REPORT_HANDLE: u16 = 0x0012;
    const CCCD_HANDLE: u16 = 0x0013;

    fn machine() -> ConnectionMachine {
        machine_with(|_| {})
    }

    fn machine_with(tweak: impl FnOnce(&mut MachineConfig)) -> ConnectionMachine {
        let mut config = MachineConfig {
            target_name: TARGET.to_string(),
            ..Default::default()
        };
        tweak(&mut config);
        ConnectionMachine::new(config, Box::new(AcceptAllPolicy))
    }

    fn advertisement(name: &str) -> Vec<u8> {
        let mut data = vec![0x02, 0x01, 0x06, name.len() as u8 + 1, ad_type::NAME_COMPLETE];
        data.extend_from_slice(name.as_bytes());
        data
    }

    fn scan_result(name: &str) -> LinkEvent {
        LinkEvent::ScanResult {
            address: PEER,
            address_type: AddressType::Public,
            rssi: -60,
            adv_data: advertisement(name),
            scan_rsp: Vec::new(),
        }
    }

    fn commands(effects: Vec<Effect>) -> Vec<LinkCommand> {
        effects
            .into_iter()
            .filter_map(|e| match e {
                Effect::Command(c) => Some(c),
                Effect::Report(_) => None,
            })
            .collect()
    }

    fn hid_service() -> LinkEvent {
        LinkEvent::ServiceSearchResult {
            conn_id: CONN,
            uuid: Uuid::Uuid16(protocol::HID_SERVICE_UUID),
            start_handle: 0x0010,
            end_handle: 0x0020,
            is_primary: true,
        }
    }

    fn search_complete(status: Status) -> LinkEvent {
        LinkEvent::ServiceSearchComplete {
            status,
            conn_id: CONN,
            source: ServiceSource::RemoteDevice,
        }
    }

    fn report_characteristics() -> LinkEvent {
        LinkEvent::CharacteristicsEnumerated {
            status: Status::OK,
            conn_id: CONN,
            characteristics: vec![
                CharacteristicElem {
                    uuid: Uuid::Uuid16(0x2A4B),
                    handle: 0x0011,
                    properties: 0x02,
                },
                // report characteristic without notify, must be skipped
                CharacteristicElem {
                    uuid: Uuid::Uuid16(protocol::HID_REPORT_CHAR_UUID),
                    handle: 0x0015,
                    properties: 0x02,
                },
                CharacteristicElem {
                    uuid: Uuid::Uuid16(protocol::HID_REPORT_CHAR_UUID),
                    handle: REPORT_HANDLE,
                    properties: 0x12,
                },
            ],
        }
    }

    fn connected(m: &mut ConnectionMachine) {
        m.handle(scan_result(TARGET));
        m.handle(LinkEvent::ConnectionOpened {
            status: Status::OK,
            conn_id: CONN,
            address: PEER,
        });
    }

    fn discovering_characteristics(m: &mut ConnectionMachine) {
        connected(m);
        m.handle(LinkEvent::MtuConfigured {
            status: Status::OK,
            conn_id: CONN,
            mtu: 23,
        });
        m.handle(hid_service());
        m.handle(search_complete(Status::OK));
    }

    fn active(m: &mut ConnectionMachine) {
        discovering_characteristics(m);
        m.handle(report_characteristics());
        m.handle(LinkEvent::NotifyRegistered {
            status: Status::OK,
            handle: REPORT_HANDLE,
        });
        m.handle(LinkEvent::DescriptorsEnumerated {
            status: Status::OK,
            conn_id: CONN,
            handle: REPORT_HANDLE,
            descriptors: vec![DescriptorElem {
                uuid: Uuid::Uuid16(protocol::CLIENT_CONFIG_DESCR_UUID),
                handle: CCCD_HANDLE,
            }],
        });
        m.handle(LinkEvent::DescriptorWritten {
            status: Status::OK,
            conn_id: CONN,
            handle: CCCD_HANDLE,
        });
    }

    #[test]
    fn bring_up_chain_issues_scan_commands() {
        let mut m = machine();
        let effects = m.handle(LinkEvent::AppRegistered {
            status: Status::OK,
            app_id: 0,
            interface: 3,
        });
        assert_eq!(commands(effects), vec![LinkCommand::ConfigurePrivacy]);
        assert_eq!(m.context().interface, Some(3));

        let effects = m.handle(LinkEvent::LocalPrivacyConfigured { status: Status::OK });
        assert_eq!(
            commands(effects),
            vec![LinkCommand::SetScanParameters(ScanParams::default())]
        );

        let effects = m.handle(LinkEvent::ScanParametersSet { status: Status::OK });
        assert_eq!(
            commands(effects),
            vec![LinkCommand::StartScanning { duration_secs: 30 }]
        );

        assert!(m.handle(LinkEvent::ScanStarted { status: Status::OK }).is_empty());
        assert_eq!(m.state(), ConnectionState::Scanning);
    }

    #[test]
    fn failed_registration_stops_bring_up() {
        let mut m = machine();
        let effects = m.handle(LinkEvent::AppRegistered {
            status: Status(0x85),
            app_id: 0,
            interface: 3,
        });
        assert!(effects.is_empty());
        assert_eq!(m.context().interface, None);
    }

    #[test]
    fn matching_advertisement_connects_once() {
        let mut m = machine();
        m.handle(LinkEvent::ScanStarted { status: Status::OK });

        let effects = m.handle(scan_result(TARGET));
        assert_eq!(
            commands(effects),
            vec![
                LinkCommand::StopScanning,
                LinkCommand::OpenConnection {
                    address: PEER,
                    address_type: AddressType::Public,
                },
            ]
        );
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert!(m.context().is_connecting());

        // repeated advertisement for the same device
        assert!(m.handle(scan_result(TARGET)).is_empty());
    }

    #[test]
    fn name_must_match_exactly() {
        let mut m = machine();
        assert!(m.handle(scan_result("Pad-0")).is_empty());
        assert!(m.handle(scan_result("Pad-011")).is_empty());
        assert!(m.handle(scan_result("pad-01")).is_empty());
        assert!(!m.context().is_connecting());
    }

    #[test]
    fn name_in_scan_response_matches() {
        let mut m = machine();
        let effects = m.handle(LinkEvent::ScanResult {
            address: PEER,
            address_type: AddressType::Random,
            rssi: -70,
            adv_data: vec![0x02, 0x01, 0x06],
            scan_rsp: advertisement(TARGET),
        });
        assert_eq!(commands(effects).len(), 2);
    }

    #[test]
    fn full_discovery_reaches_active() {
        let mut m = machine();
        m.handle(scan_result(TARGET));
        let effects = m.handle(LinkEvent::ConnectionOpened {
            status: Status::OK,
            conn_id: CONN,
            address: PEER,
        });
        assert_eq!(
            commands(effects),
            vec![LinkCommand::NegotiateMtu {
                conn_id: CONN,
                mtu: 23
            }]
        );
        assert_eq!(m.state(), ConnectionState::NegotiatingMtu);

        let effects = m.handle(LinkEvent::MtuConfigured {
            status: Status::OK,
            conn_id: CONN,
            mtu: 23,
        });
        assert_eq!(
            commands(effects),
            vec![LinkCommand::SearchService {
                conn_id: CONN,
                uuid: Uuid::Uuid16(0x1812)
            }]
        );

        assert!(m.handle(hid_service()).is_empty());
        assert!(m.context().service_found);

        let effects = m.handle(search_complete(Status::OK));
        assert_eq!(
            commands(effects),
            vec![LinkCommand::EnumerateCharacteristics {
                conn_id: CONN,
                range: HandleRange {
                    start: 0x0010,
                    end: 0x0020
                },
            }]
        );

        let effects = m.handle(report_characteristics());
        assert_eq!(
            commands(effects),
            vec![LinkCommand::RegisterForNotify {
                address: PEER,
                handle: REPORT_HANDLE
            }]
        );
        assert_eq!(m.context().notify_handle, Some(REPORT_HANDLE));

        let effects = m.handle(LinkEvent::NotifyRegistered {
            status: Status::OK,
            handle: REPORT_HANDLE,
        });
        assert_eq!(
            commands(effects),
            vec![LinkCommand::EnumerateDescriptors {
                conn_id: CONN,
                handle: REPORT_HANDLE
            }]
        );

        let effects = m.handle(LinkEvent::DescriptorsEnumerated {
            status: Status::OK,
            conn_id: CONN,
            handle: REPORT_HANDLE,
            descriptors: vec![
                DescriptorElem {
                    uuid: Uuid::Uuid16(0x2908),
                    handle: 0x0014,
                },
                DescriptorElem {
                    uuid: Uuid::Uuid16(protocol::CLIENT_CONFIG_DESCR_UUID),
                    handle: CCCD_HANDLE,
                },
            ],
        });
        assert_eq!(
            commands(effects),
            vec![LinkCommand::WriteDescriptor {
                conn_id: CONN,
                handle: CCCD_HANDLE,
                value: vec![0x01, 0x00],
            }]
        );

        m.handle(LinkEvent::DescriptorWritten {
            status: Status::OK,
            conn_id: CONN,
            handle: CCCD_HANDLE,
        });
        assert_eq!(m.state(), ConnectionState::Active);
    }

    #[test]
    fn failed_connection_frees_the_slot() {
        let mut m = machine();
        m.handle(scan_result(TARGET));
        let effects = m.handle(LinkEvent::ConnectionOpened {
            status: Status(0x3E),
            conn_id: CONN,
            address: PEER,
        });
        assert!(effects.is_empty());
        assert!(!m.context().is_connecting());
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn failed_mtu_negotiation_abandons_discovery() {
        let mut m = machine();
        connected(&mut m);
        let effects = m.handle(LinkEvent::MtuConfigured {
            status: Status(0x01),
            conn_id: CONN,
            mtu: 0,
        });
        assert!(effects.is_empty());
        assert_eq!(m.state(), ConnectionState::NegotiatingMtu);
    }

    #[test]
    fn missing_service_stops_discovery() {
        let mut m = machine();
        connected(&mut m);
        m.handle(LinkEvent::MtuConfigured {
            status: Status::OK,
            conn_id: CONN,
            mtu: 23,
        });
        m.handle(LinkEvent::ServiceSearchResult {
            conn_id: CONN,
            uuid: Uuid::Uuid16(0x180F),
            start_handle: 1,
            end_handle: 5,
            is_primary: true,
        });
        assert!(m.handle(search_complete(Status::OK)).is_empty());
        assert_eq!(m.state(), ConnectionState::DiscoveringService);
    }

    #[test]
    fn failed_search_status_is_not_retried() {
        let mut m = machine();
        connected(&mut m);
        m.handle(LinkEvent::MtuConfigured {
            status: Status::OK,
            conn_id: CONN,
            mtu: 23,
        });
        m.handle(hid_service());
        assert!(m.handle(search_complete(Status(0x85))).is_empty());
        assert_eq!(m.state(), ConnectionState::DiscoveringService);
    }

    #[test]
    fn first_service_result_wins() {
        let mut m = machine();
        connected(&mut m);
        m.handle(LinkEvent::MtuConfigured {
            status: Status::OK,
            conn_id: CONN,
            mtu: 23,
        });
        m.handle(hid_service());
        m.handle(LinkEvent::ServiceSearchResult {
            conn_id: CONN,
            uuid: Uuid::Uuid16(protocol::HID_SERVICE_UUID),
            start_handle: 0x0030,
            end_handle: 0x0040,
            is_primary: true,
        });
        assert_eq!(
            m.context().service_range,
            Some(HandleRange {
                start: 0x0010,
                end: 0x0020
            })
        );
    }

    #[test]
    fn missing_characteristic_stops_discovery() {
        let mut m = machine();
        discovering_characteristics(&mut m);
        let effects = m.handle(LinkEvent::CharacteristicsEnumerated {
            status: Status::OK,
            conn_id: CONN,
            characteristics: vec![CharacteristicElem {
                uuid: Uuid::Uuid16(protocol::HID_REPORT_CHAR_UUID),
                handle: REPORT_HANDLE,
                properties: 0x02,
            }],
        });
        assert!(effects.is_empty());
        assert_eq!(m.state(), ConnectionState::DiscoveringCharacteristics);
    }

    #[test]
    fn missing_config_descriptor_stops_discovery() {
        let mut m = machine();
        discovering_characteristics(&mut m);
        m.handle(report_characteristics());
        m.handle(LinkEvent::NotifyRegistered {
            status: Status::OK,
            handle: REPORT_HANDLE,
        });
        let effects = m.handle(LinkEvent::DescriptorsEnumerated {
            status: Status::OK,
            conn_id: CONN,
            handle: REPORT_HANDLE,
            descriptors: Vec::new(),
        });
        assert!(effects.is_empty());
        assert_eq!(m.state(), ConnectionState::EnablingNotifications);
    }

    #[test]
    fn failed_descriptor_write_stays_inactive() {
        let mut m = machine();
        discovering_characteristics(&mut m);
        m.handle(report_characteristics());
        m.handle(LinkEvent::DescriptorWritten {
            status: Status(0x05),
            conn_id: CONN,
            handle: CCCD_HANDLE,
        });
        assert_eq!(m.state(), ConnectionState::EnablingNotifications);
    }

    #[test]
    fn out_of_order_events_are_ignored() {
        let mut m = machine();
        assert!(m
            .handle(LinkEvent::MtuConfigured {
                status: Status::OK,
                conn_id: CONN,
                mtu: 23,
            })
            .is_empty());
        assert!(m.handle(search_complete(Status::OK)).is_empty());
        assert_eq!(m.state(), ConnectionState::Idle);
    }

    #[test]
    fn notifications_become_reports() {
        let mut m = machine();
        active(&mut m);
        let effects = m.handle(LinkEvent::Notification {
            conn_id: CONN,
            handle: REPORT_HANDLE,
            value: vec![0, 0x80, 0, 128, 128, 128, 128, 0, 255, 0],
        });
        assert_eq!(effects.len(), 1);
        match &effects[0] {
            Effect::Report(report) => {
                assert_eq!(report.dpad, 0);
                assert_eq!(report.buttons1, 0x80);
                assert_eq!(report.throttle, 255);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn short_notification_is_dropped() {
        let mut m = machine_with(|c| c.debug_raw_report_logging = true);
        active(&mut m);
        let effects = m.handle(LinkEvent::Notification {
            conn_id: CONN,
            handle: REPORT_HANDLE,
            value: vec![8, 0, 0],
        });
        assert!(effects.is_empty());
    }

    #[test]
    fn service_changed_rediscovers() {
        let mut m = machine();
        active(&mut m);
        let effects = m.handle(LinkEvent::ServiceChanged { address: PEER });
        assert_eq!(
            commands(effects),
            vec![LinkCommand::SearchService {
                conn_id: CONN,
                uuid: Uuid::Uuid16(protocol::HID_SERVICE_UUID),
            }]
        );
        assert_eq!(m.state(), ConnectionState::DiscoveringService);
        assert!(!m.context().service_found);

        m.handle(hid_service());
        let effects = m.handle(search_complete(Status::OK));
        assert_eq!(commands(effects).len(), 1);
        assert_eq!(m.state(), ConnectionState::DiscoveringCharacteristics);
    }

    #[test]
    fn service_changed_without_connection_is_ignored() {
        let mut m = machine();
        assert!(m.handle(LinkEvent::ServiceChanged { address: PEER }).is_empty());
    }

    #[test]
    fn disconnect_allows_a_fresh_cycle() {
        let mut m = machine();
        active(&mut m);
        assert!(m.handle(LinkEvent::Disconnected { reason: 0x13 }).is_empty());
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert!(!m.context().is_connecting());
        assert!(!m.context().service_found);
        assert_eq!(m.context().conn_id, None);

        let effects = m.handle(scan_result(TARGET));
        assert_eq!(commands(effects).len(), 2);
        assert_eq!(m.state(), ConnectionState::Connecting);
    }

    #[test]
    fn disconnect_rescans_when_configured() {
        let mut m = machine_with(|c| c.rescan_on_disconnect = true);
        active(&mut m);
        let effects = m.handle(LinkEvent::Disconnected { reason: 0x08 });
        assert_eq!(
            commands(effects),
            vec![LinkCommand::StartScanning { duration_secs: 30 }]
        );
    }

    #[test]
    fn refused_open_frees_the_slot() {
        let mut m = machine();
        m.handle(scan_result(TARGET));
        m.command_failed(&LinkCommand::OpenConnection {
            address: PEER,
            address_type: AddressType::Public,
        });
        assert!(!m.context().is_connecting());
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn restart_scan_refused_while_connecting() {
        let mut m = machine();
        m.handle(scan_result(TARGET));
        assert!(m.restart_scan().is_empty());
    }

    #[test]
    fn scan_complete_returns_to_idle() {
        let mut m = machine();
        m.handle(LinkEvent::ScanStarted { status: Status::OK });
        m.handle(LinkEvent::ScanComplete);
        assert_eq!(m.state(), ConnectionState::Idle);
    }

    #[test]
    fn security_requests_follow_policy() {
        let mut m = machine();
        assert_eq!(
            commands(m.handle(LinkEvent::SecurityRequest { address: PEER })),
            vec![LinkCommand::SecurityResponse {
                address: PEER,
                accept: true
            }]
        );
        assert_eq!(
            commands(m.handle(LinkEvent::NumericComparison {
                address: PEER,
                passkey: 123456
            })),
            vec![LinkCommand::ConfirmReply {
                address: PEER,
                accept: true
            }]
        );
        assert_eq!(
            commands(m.handle(LinkEvent::OobRequest { address: PEER })),
            vec![LinkCommand::OobReply {
                address: PEER,
                key: FIXED_OOB_KEY
            }]
        );
        assert!(m.handle(LinkEvent::PasskeyRequest { address: PEER }).is_empty());
    }

    #[test]
    fn hex_dump_format() {
        assert_eq!(hex(&[0x08, 0xff, 0x00]), "08 ff 00");
    }
}
