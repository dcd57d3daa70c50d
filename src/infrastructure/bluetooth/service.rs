//! Bluetooth Service Module
//!
//! Main service that feeds link events through the connection machine,
//! issues the resulting commands on the radio link and hands decoded
//! reports to the report queue.

use crate::domain::models::DeviceIdentity;
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::connection::{
    ConnectionMachine, ConnectionState, Effect, MachineConfig,
};
use crate::infrastructure::bluetooth::link::{self, LinkCommand, LinkError, LinkEvent, RadioLink};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::security::{AcceptAllPolicy, SecurityPolicy};
use crate::infrastructure::report_queue::{QueueError, ReportProducer};
use tracing::{error, info, trace, warn};

/// Main Bluetooth service, the radio-event side of the bridge
pub struct BluetoothService {
    machine: ConnectionMachine,
    link: Box<dyn RadioLink>,
    producer: ReportProducer,
    local_mtu: u16,
    consumer_gone: bool,
}

impl BluetoothService {
    /// Create a service with the accept-all pairing policy
    pub fn new(settings: &Settings, link: Box<dyn RadioLink>, producer: ReportProducer) -> Self {
        Self::with_policy(settings, link, producer, Box::new(AcceptAllPolicy))
    }

    pub fn with_policy(
        settings: &Settings,
        link: Box<dyn RadioLink>,
        producer: ReportProducer,
        policy: Box<dyn SecurityPolicy>,
    ) -> Self {
        Self {
            machine: ConnectionMachine::new(MachineConfig::from(settings), policy),
            link,
            producer,
            local_mtu: settings.local_mtu,
            consumer_gone: false,
        }
    }

    /// Bring up the client: MTU, security parameters, then application registration.
    /// The rest of the chain follows from the link's events.
    pub fn start(&mut self) -> Result<(), LinkError> {
        info!("Starting Bluetooth service");
        let params = self.machine.policy().params();
        let bootstrap = [
            LinkCommand::SetLocalMtu(self.local_mtu),
            LinkCommand::SetSecurityParams(params),
            LinkCommand::RegisterApp(protocol::APP_ID),
        ];
        for command in &bootstrap {
            link::execute(self.link.as_mut(), command).inspect_err(|e| {
                error!("Bootstrap command {} failed: {}", command.name(), e);
            })?;
        }
        Ok(())
    }

    /// Handle one inbound event from the link layer. Never blocks.
    pub fn dispatch(&mut self, event: LinkEvent) {
        trace!("Event {}", event.name());
        let effects = self.machine.handle(event);
        self.apply(effects);
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    pub fn peer(&self) -> Option<&DeviceIdentity> {
        self.machine.context().peer.as_ref()
    }

    pub fn queue(&self) -> &ReportProducer {
        &self.producer
    }

    /// True once the report consumer has hung up. No further report can be delivered.
    pub fn is_stopped(&self) -> bool {
        self.consumer_gone
    }

    #[cfg(test)]
    pub fn machine(&self) -> &ConnectionMachine {
        &self.machine
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Command(command) => {
                    if let Err(e) = link::execute(self.link.as_mut(), &command) {
                        error!("Command {} failed: {}", command.name(), e);
                        self.machine.command_failed(&command);
                    }
                }
                Effect::Report(report) => match self.producer.enqueue(report) {
                    Ok(()) => {}
                    // already counted and logged by the queue
                    Err(QueueError::Full(_)) => {}
                    Err(QueueError::Closed) => {
                        if !self.consumer_gone {
                            warn!("Report consumer stopped, no more reports can be delivered");
                            self.consumer_gone = true;
                        }
                    }
                },
            }
        }
    }
}
