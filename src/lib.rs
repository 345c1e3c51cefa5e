//! Read the live status and electrical metrics of EV-Meter chargers.
//!
//! The chargers do not answer requests directly. They sit on a publish/subscribe bus (the vendor
//! runs an MQTT broker) and, when asked, publish a compact binary "BLEWIFI" frame describing
//! themselves. This crate publishes the request, picks the matching frame out of the inbound
//! traffic, decodes it and hands back a typed value, or a timeout if the charger stays silent.
//!
//! Currently the following data can be accessed:
//!
//! - Charger state, vehicle (pilot) state, charging state and phase configuration
//! - Power (kW), session and lifetime energy (kWh)
//! - Warning and error flags
//! - Per-phase voltage (V) and current (A), set current and circuit breaker rating (A)
//! - Temperature (°C), WiFi network and signal (dBm), firmware versions, ping latency (ms)
//!
//! The network connection is not part of this crate: implement [`Transport`] over your MQTT
//! client of choice. [`MemoryTransport`] is an in-process implementation.
//!
//! # Example
//!
//! ```rust
//! # use std::sync::Arc;
//! # use std::time::Duration;
//! # use evmeter::{ChargerClient, ClientConfig, MemoryTransport};
//! #
//! # #[tokio::main]
//! # pub async fn main(){
//!     let transport = Arc::new(MemoryTransport::new());
//!     let config = ClientConfig::new("a1b2c3").with_request_timeout(Duration::from_millis(100));
//!     let client = ChargerClient::connect(transport.clone(), config).await.unwrap();
//!
//!     // Nobody answers on an in-process bus.
//!     let status = client.get_charger_status("0434335121105646").await;
//!     assert!(status.is_err());
//!
//!     client.disconnect().await.unwrap();
//! # }
//! ```

mod charger_client;
mod charger_id;
mod charger_state;
mod config;
mod dispatcher;
mod error;
pub mod message;
mod pending;
mod record_mapper;
pub mod transport;

pub use charger_client::ChargerClient;
pub use charger_id::ChargerId;
pub use charger_state::{
    ChargerMetrics, ChargerState, ChargerStatus, ChargingState, Errors, EvStatus, EvseStatus, PhaseType, Warnings,
};
pub use config::ClientConfig;
pub use dispatcher::ChargerEvent;
pub use error::{ClientError, Result};
pub use message::{decode, DecodeError, DecodedRecord, RecordKind};
pub use record_mapper::{map_record, ChargerReading};
pub use transport::{BusMessage, DefaultTopicScheme, MemoryTransport, TopicScheme, Transport};
