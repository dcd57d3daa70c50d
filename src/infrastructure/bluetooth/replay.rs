//! Replay link
//!
//! Runs the bridge without radio hardware. Link events are read from a
//! JSON-lines script, one [`LinkEvent`] per line, and every command the
//! bridge issues is logged instead of transmitted.
//!
//! ```text
//! # comment lines and blank lines are skipped
//! {"event":"app_registered","app_id":0,"interface":3}
//! {"event":"notification","conn_id":0,"handle":18,"value":[8,0,0,128,128,128,128,0,0,0]}
//! ```

use crate::domain::models::{AddressType, BdAddr, HandleRange, Uuid};
use crate::infrastructure::bluetooth::link::{LinkCommand, LinkError, LinkEvent, RadioLink};
use crate::infrastructure::bluetooth::protocol::{self, ScanParams};
use crate::infrastructure::bluetooth::security::SecurityParams;
use crate::infrastructure::bluetooth::service::BluetoothService;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("invalid event: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read event script: {0}")]
    Read(#[from] std::io::Error),
}

/// Parse one script line into an event.
pub fn parse_event(line: &str) -> Result<LinkEvent, ScriptError> {
    Ok(serde_json::from_str(line.trim())?)
}

fn is_skipped(line: &str) -> bool {
    let line = line.trim();
    line.is_empty() || line.starts_with('#')
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    pub events: u64,
    pub rejected_lines: u64,
}

/// Feed every event of `reader` into the service. Unparsable lines are logged and skipped.
///
/// Returns early once the service can no longer deliver reports.
pub async fn feed<R>(reader: R, service: &mut BluetoothService) -> Result<ReplayStats, ScriptError>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = ReplayStats::default();
    let mut lines = reader.lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if is_skipped(&line) {
            continue;
        }
        match parse_event(&line) {
            Ok(event) => {
                service.dispatch(event);
                stats.events += 1;
                if service.is_stopped() {
                    warn!("Report consumer gone, abandoning the event feed at line {}", line_no);
                    break;
                }
            }
            Err(e) => {
                warn!("Script line {}: {}", line_no, e);
                stats.rejected_lines += 1;
            }
        }
    }

    info!(
        "Event script finished: {} events, {} rejected lines",
        stats.events, stats.rejected_lines
    );
    Ok(stats)
}

/// A [`RadioLink`] that logs every command instead of transmitting it.
///
/// Only argument checks a real stack would make are enforced.
#[derive(Debug, Default)]
pub struct ReplayLink {
    issued: u64,
}

impl ReplayLink {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn issued(&self) -> u64 {
        self.issued
    }

    fn log(&mut self, command: LinkCommand) -> Result<(), LinkError> {
        self.issued += 1;
        info!("-> #{} {}: {:?}", self.issued, command.name(), command);
        Ok(())
    }

    fn check_mtu(command: &LinkCommand, mtu: u16) -> Result<(), LinkError> {
        if (protocol::ATT_MIN_MTU..=protocol::ATT_MAX_MTU).contains(&mtu) {
            return Ok(());
        }
        warn!("MTU {} outside {}..={}", mtu, protocol::ATT_MIN_MTU, protocol::ATT_MAX_MTU);
        Err(LinkError::Rejected {
            command: command.name(),
            code: protocol::ERR_INVALID_ARG,
        })
    }
}

impl RadioLink for ReplayLink {
    fn set_local_mtu(&mut self, mtu: u16) -> Result<(), LinkError> {
        let command = LinkCommand::SetLocalMtu(mtu);
        Self::check_mtu(&command, mtu)?;
        self.log(command)
    }

    fn set_security_params(&mut self, params: &SecurityParams) -> Result<(), LinkError> {
        self.log(LinkCommand::SetSecurityParams(*params))
    }

    fn register_app(&mut self, app_id: u16) -> Result<(), LinkError> {
        self.log(LinkCommand::RegisterApp(app_id))
    }

    fn configure_privacy(&mut self) -> Result<(), LinkError> {
        self.log(LinkCommand::ConfigurePrivacy)
    }

    fn set_scan_parameters(&mut self, params: &ScanParams) -> Result<(), LinkError> {
        self.log(LinkCommand::SetScanParameters(*params))
    }

    fn start_scanning(&mut self, duration_secs: u32) -> Result<(), LinkError> {
        self.log(LinkCommand::StartScanning { duration_secs })
    }

    fn stop_scanning(&mut self) -> Result<(), LinkError> {
        self.log(LinkCommand::StopScanning)
    }

    fn open_connection(
        &mut self,
        address: BdAddr,
        address_type: AddressType,
    ) -> Result<(), LinkError> {
        self.log(LinkCommand::OpenConnection {
            address,
            address_type,
        })
    }

    fn negotiate_mtu(&mut self, conn_id: u16, mtu: u16) -> Result<(), LinkError> {
        let command = LinkCommand::NegotiateMtu { conn_id, mtu };
        Self::check_mtu(&command, mtu)?;
        self.log(command)
    }

    fn search_service(&mut self, conn_id: u16, uuid: Uuid) -> Result<(), LinkError> {
        self.log(LinkCommand::SearchService { conn_id, uuid })
    }

    fn enumerate_characteristics(
        &mut self,
        conn_id: u16,
        range: HandleRange,
    ) -> Result<(), LinkError> {
        self.log(LinkCommand::EnumerateCharacteristics { conn_id, range })
    }

    fn register_for_notify(&mut self, address: BdAddr, handle: u16) -> Result<(), LinkError> {
        self.log(LinkCommand::RegisterForNotify { address, handle })
    }

    fn enumerate_descriptors(&mut self, conn_id: u16, handle: u16) -> Result<(), LinkError> {
        self.log(LinkCommand::EnumerateDescriptors { conn_id, handle })
    }

    fn write_descriptor(
        &mut self,
        conn_id: u16,
        handle: u16,
        value: &[u8],
    ) -> Result<(), LinkError> {
        self.log(LinkCommand::WriteDescriptor {
            conn_id,
            handle,
            value: value.to_vec(),
        })
    }

    fn security_response(&mut self, address: BdAddr, accept: bool) -> Result<(), LinkError> {
        self.log(LinkCommand::SecurityResponse { address, accept })
    }

    fn confirm_reply(&mut self, address: BdAddr, accept: bool) -> Result<(), LinkError> {
        self.log(LinkCommand::ConfirmReply { address, accept })
    }

    fn passkey_reply(&mut self, address: BdAddr, passkey: u32) -> Result<(), LinkError> {
        self.log(LinkCommand::PasskeyReply { address, passkey })
    }

    fn oob_reply(&mut self, address: BdAddr, key: &[u8; 16]) -> Result<(), LinkError> {
        self.log(LinkCommand::OobReply { address, key: *key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::settings::Settings;
    use crate::infrastructure::bluetooth::link;
    use crate::infrastructure::report_queue;

    #[test]
    fn parses_event_lines() {
        let event = parse_event(r#"  {"event":"disconnected","reason":19}  "#).unwrap();
        assert_eq!(event, LinkEvent::Disconnected { reason: 19 });
    }

    #[test]
    fn rejects_unknown_events() {
        assert!(matches!(
            parse_event(r#"{"event":"warp_drive"}"#),
            Err(ScriptError::Parse(_))
        ));
        assert!(parse_event("not json").is_err());
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        assert!(is_skipped(""));
        assert!(is_skipped("   "));
        assert!(is_skipped("# bring-up"));
        assert!(!is_skipped(r#"{"event":"scan_complete"}"#));
    }

    #[test]
    fn replay_link_accepts_every_command() {
        let mut replay = ReplayLink::new();
        link::execute(&mut replay, &LinkCommand::ConfigurePrivacy).unwrap();
        link::execute(&mut replay, &LinkCommand::StopScanning).unwrap();
        assert_eq!(replay.issued(), 2);
    }

    #[test]
    fn replay_link_refuses_out_of_range_mtu() {
        let mut replay = ReplayLink::new();
        assert_eq!(
            replay.set_local_mtu(8),
            Err(LinkError::Rejected {
                command: "set_local_mtu",
                code: protocol::ERR_INVALID_ARG
            })
        );
        assert!(replay.negotiate_mtu(0, 1024).is_err());
        assert!(replay.negotiate_mtu(0, 517).is_ok());
        assert_eq!(replay.issued(), 1);
    }

    #[tokio::test]
    async fn closed_queue_ends_the_feed() {
        let script = "\
{\"event\":\"notification\",\"conn_id\":0,\"handle\":18,\"value\":[9,0,0,128,128,128,128,0,0,0]}
{\"event\":\"notification\",\"conn_id\":0,\"handle\":18,\"value\":[0,0,0,128,128,128,128,0,0,0]}
{\"event\":\"notification\",\"conn_id\":0,\"handle\":18,\"value\":[8,0,0,128,128,128,128,0,0,0]}
";
        let (producer, consumer) = report_queue::channel(8);
        drop(consumer);
        let mut service =
            BluetoothService::new(&Settings::default(), Box::new(ReplayLink::new()), producer);

        let stats = feed(script.as_bytes(), &mut service).await.unwrap();
        assert_eq!(stats.events, 1);
        assert!(service.is_stopped());
    }

    #[tokio::test]
    async fn feed_dispatches_script() {
        let script = "\
# notifications before discovery still reach the queue
{\"event\":\"notification\",\"conn_id\":0,\"handle\":18,\"value\":[8,0,0,128,128,128,128,0,0,0]}

{\"event\":\"bogus\"}
{\"event\":\"notification\",\"conn_id\":0,\"handle\":18,\"value\":[1,2,3]}
";
        let (producer, mut consumer) = report_queue::channel(8);
        let mut service =
            BluetoothService::new(&Settings::default(), Box::new(ReplayLink::new()), producer);

        let stats = feed(script.as_bytes(), &mut service).await.unwrap();
        assert_eq!(
            stats,
            ReplayStats {
                events: 2,
                rejected_lines: 1
            }
        );
        // the short notification is dropped by the codec
        assert_eq!(consumer.dequeue().map(|r| r.dpad), Some(8));
        assert!(consumer.dequeue().is_none());
    }
}
