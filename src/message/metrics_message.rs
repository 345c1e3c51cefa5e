use serde::{Deserialize, Serialize};

use super::{be_u16, require_payload, DecodeError};

/// A frame type which contains per-phase electrical readings and device diagnostics.
///
/// Values are raw device units; scaling happens in the record mapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsRecord {
    /// Phase voltages in V/10
    pub voltage_l1: u16,
    pub voltage_l2: u16,
    pub voltage_l3: u16,
    /// Phase currents in A/100
    pub current_l1: u16,
    pub current_l2: u16,
    pub current_l3: u16,
    /// The current the charger offers the vehicle in A/10
    pub set_current: u16,
    /// Rating of the upstream circuit breaker in A
    pub circuit_breaker_limit: u8,
    /// Internal temperature in °C/10
    pub temperature_raw: i16,
    pub wifi_network: String,
    /// Signal strength in dBm
    pub wifi_rssi: i8,
    /// `[major, minor, patch]`
    pub firmware_version: [u8; 3],
    /// `[major, minor, patch]` of the communication module
    pub platform_version: [u8; 3],
    pub evse_status: u8,
    /// Average broker round trip in ms/10
    pub ping_latency_raw: u16,
}

impl MetricsRecord {
    /// Everything up to and including the SSID length byte.
    pub(crate) const FIXED_LEN: usize = 28;

    pub(crate) fn parse(payload: &[u8]) -> Result<Self, DecodeError> {
        require_payload(payload, Self::FIXED_LEN)?;

        let ssid_len = payload[27] as usize;
        require_payload(payload, Self::FIXED_LEN + ssid_len)?;
        let wifi_network = String::from_utf8_lossy(&payload[Self::FIXED_LEN..Self::FIXED_LEN + ssid_len]).into_owned();

        Ok(Self {
            voltage_l1: be_u16(payload, 0),
            voltage_l2: be_u16(payload, 2),
            voltage_l3: be_u16(payload, 4),
            current_l1: be_u16(payload, 6),
            current_l2: be_u16(payload, 8),
            current_l3: be_u16(payload, 10),
            set_current: be_u16(payload, 12),
            circuit_breaker_limit: payload[14],
            temperature_raw: i16::from_be_bytes([payload[15], payload[16]]),
            wifi_rssi: payload[17] as i8,
            evse_status: payload[18],
            ping_latency_raw: be_u16(payload, 19),
            firmware_version: [payload[21], payload[22], payload[23]],
            platform_version: [payload[24], payload[25], payload[26]],
            wifi_network,
        })
    }
}

#[test]
fn test_parse_metrics_happy() {
    let message =
        hex::decode("aa55250208fd08fa09060642063e064a00a02000f5c300007b01040202000707486f6d654e6574").unwrap();
    let record = super::decode(&message).unwrap();
    let expected = MetricsRecord {
        voltage_l1: 2301,
        voltage_l2: 2298,
        voltage_l3: 2310,
        current_l1: 1602,
        current_l2: 1598,
        current_l3: 1610,
        set_current: 160,
        circuit_breaker_limit: 32,
        temperature_raw: 245,
        wifi_network: "HomeNet".to_string(),
        wifi_rssi: -61,
        firmware_version: [1, 4, 2],
        platform_version: [2, 0, 7],
        evse_status: 0,
        ping_latency_raw: 123,
    };
    assert_eq!(record, super::DecodedRecord::Metrics(expected));
}

#[test]
fn test_parse_metrics_negative_temperature() {
    let message =
        hex::decode("aa551e02000000000000000000000000000010ffc9b000000000000000000000").unwrap();
    match super::decode(&message).unwrap() {
        super::DecodedRecord::Metrics(metrics) => {
            assert_eq!(metrics.temperature_raw, -55);
            assert_eq!(metrics.wifi_rssi, -80);
            assert_eq!(metrics.wifi_network, "");
        }
        other => panic!("expected metrics record, got {other:?}"),
    }
}

#[test]
fn test_parse_metrics_ssid_overruns_frame() {
    // SSID length byte claims 9 bytes but the frame ends after 2.
    let message =
        hex::decode("aa55200208fd08fa09060642063e064a00a02000f5c300007b01040202000709486f").unwrap();
    assert_eq!(super::decode(&message), Err(DecodeError::Truncated { needed: 41, available: 34 }));
}
