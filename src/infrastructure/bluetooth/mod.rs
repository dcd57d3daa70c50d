//! Bluetooth Module
//!
//! Connects to the game controller over BLE and turns its input report
//! notifications into decoded reports for the report queue.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    BluetoothService                      │
//! │  (Coordinator - executes effects, feeds the queue)       │
//! └──────────┬──────────────────────────────────┬───────────┘
//!            │ LinkEvent                         │ LinkCommand
//!            ▼                                   ▼
//! ┌────────────────────┐               ┌─────────────────┐
//! │ ConnectionMachine  │               │   RadioLink     │
//! │                    │               │                 │
//! │ - scan filter      │               │ - ReplayLink    │
//! │ - pairing policy   │               │   (JSON script) │
//! │ - GATT discovery   │               │                 │
//! └────────────────────┘               └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - UUIDs, status codes, advertisement parsing, scan parameters
//! - [`link`] - Link layer capability trait, inbound events and outbound commands
//! - [`security`] - Pairing policy
//! - [`connection`] - Connection, pairing and service discovery state machine
//! - [`service`] - Main service coordinator
//! - [`replay`] - Hardware-free link driven by an event script

pub mod connection;
pub mod link;
pub mod protocol;
pub mod replay;
pub mod security;
pub mod service;

// Re-export main service for convenience
pub use service::BluetoothService;
