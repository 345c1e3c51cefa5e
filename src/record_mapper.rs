//! Turns decoded frames into the values presented to callers.
//!
//! Raw integers are divided by their fixed scale factor and small codes are looked up in the
//! enums of [`crate::charger_state`]. Mapping never fails: codes the crate does not know map to
//! the `Unknown` member of their enum.

use serde::{Deserialize, Serialize};

use crate::charger_state::{ChargerMetrics, ChargerStatus, Errors, Warnings};
use crate::message::{DecodedRecord, MetricsRecord, StatusRecord};

const POWER_KW_DIVISOR: f64 = 100.0;
const SESSION_ENERGY_KWH_DIVISOR: f64 = 100.0;
const TOTAL_ENERGY_KWH_DIVISOR: f64 = 10.0;
const VOLTAGE_DIVISOR: f64 = 10.0;
const CURRENT_DIVISOR: f64 = 100.0;
const SET_CURRENT_DIVISOR: f64 = 10.0;
const TEMPERATURE_DIVISOR: f64 = 10.0;
const PING_MS_DIVISOR: f64 = 10.0;

/// A frame the crate knows how to present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChargerReading {
    Status(ChargerStatus),
    Metrics(ChargerMetrics),
}

/// Map a decoded frame to its public shape. Returns `None` for frames of unknown type.
pub fn map_record(record: &DecodedRecord) -> Option<ChargerReading> {
    match record {
        DecodedRecord::Status(status) => Some(ChargerReading::Status(map_status(status))),
        DecodedRecord::Metrics(metrics) => Some(ChargerReading::Metrics(map_metrics(metrics))),
        DecodedRecord::Unknown(_) => None,
    }
}

pub fn map_status(record: &StatusRecord) -> ChargerStatus {
    ChargerStatus {
        charger_state: record.charger_state.into(),
        ev_status: record.ev_status.into(),
        charging_state: record.charging_state.into(),
        phase_type: record.phase_type.into(),
        power_kw: record.power_raw as f64 / POWER_KW_DIVISOR,
        session_energy_kwh: record.session_energy_raw as f64 / SESSION_ENERGY_KWH_DIVISOR,
        total_energy_kwh: record.total_energy_raw as f64 / TOTAL_ENERGY_KWH_DIVISOR,
        warnings: Warnings::from_bits_retain(record.warning_bits),
        errors: Errors::from_bits_retain(record.error_bits),
    }
}

pub fn map_metrics(record: &MetricsRecord) -> ChargerMetrics {
    ChargerMetrics {
        voltage_l1: record.voltage_l1 as f64 / VOLTAGE_DIVISOR,
        voltage_l2: record.voltage_l2 as f64 / VOLTAGE_DIVISOR,
        voltage_l3: record.voltage_l3 as f64 / VOLTAGE_DIVISOR,
        current_l1: record.current_l1 as f64 / CURRENT_DIVISOR,
        current_l2: record.current_l2 as f64 / CURRENT_DIVISOR,
        current_l3: record.current_l3 as f64 / CURRENT_DIVISOR,
        set_current: record.set_current as f64 / SET_CURRENT_DIVISOR,
        circuit_breaker: record.circuit_breaker_limit as f64,
        temperature: record.temperature_raw as f64 / TEMPERATURE_DIVISOR,
        wifi_network: record.wifi_network.clone(),
        wifi_rssi: record.wifi_rssi as i16,
        firmware_version: version_string(record.firmware_version),
        platform_version: version_string(record.platform_version),
        evse_status: record.evse_status.into(),
        avg_ping_latency: record.ping_latency_raw as f64 / PING_MS_DIVISOR,
    }
}

fn version_string([major, minor, patch]: [u8; 3]) -> String {
    format!("{major}.{minor}.{patch}")
}

#[cfg(test)]
use crate::charger_state::{ChargerState, ChargingState, EvStatus, EvseStatus, PhaseType};

#[test]
fn test_map_status_frame() {
    let message = hex::decode("aa55160102020103000005dc000004d20001e24000050002").unwrap();
    let record = crate::message::decode(&message).unwrap();
    let status = match map_record(&record) {
        Some(ChargerReading::Status(status)) => status,
        other => panic!("expected status, got {other:?}"),
    };

    assert_eq!(status.charger_state, ChargerState::Charging);
    assert_eq!(status.ev_status, EvStatus::Ready);
    assert_eq!(status.charging_state, ChargingState::Charging);
    assert_eq!(status.phase_type, PhaseType::ThreePhase);
    assert_eq!(status.power_kw, 15.0);
    assert_eq!(status.session_energy_kwh, 12.34);
    assert_eq!(status.total_energy_kwh, 12345.6);
    assert_eq!(status.warnings, Warnings::OVER_TEMPERATURE | Warnings::LOW_VOLTAGE);
    assert_eq!(status.errors, Errors::RESIDUAL_CURRENT);
}

#[test]
fn test_map_metrics_frame() {
    let message =
        hex::decode("aa55250208fd08fa09060642063e064a00a02000f5c300007b01040202000707486f6d654e6574").unwrap();
    let record = crate::message::decode(&message).unwrap();
    let metrics = match map_record(&record) {
        Some(ChargerReading::Metrics(metrics)) => metrics,
        other => panic!("expected metrics, got {other:?}"),
    };

    assert_eq!(metrics.voltage_l1, 230.1);
    assert_eq!(metrics.voltage_l2, 229.8);
    assert_eq!(metrics.voltage_l3, 231.0);
    assert_eq!(metrics.current_l1, 16.02);
    assert_eq!(metrics.current_l2, 15.98);
    assert_eq!(metrics.current_l3, 16.1);
    assert_eq!(metrics.set_current, 16.0);
    assert_eq!(metrics.circuit_breaker, 32.0);
    assert_eq!(metrics.temperature, 24.5);
    assert_eq!(metrics.wifi_network, "HomeNet");
    assert_eq!(metrics.wifi_rssi, -61);
    assert_eq!(metrics.firmware_version, "1.4.2");
    assert_eq!(metrics.platform_version, "2.0.7");
    assert_eq!(metrics.evse_status, EvseStatus::Ok);
    assert_eq!(metrics.avg_ping_latency, 12.3);
}

#[test]
fn test_map_unknown_frame() {
    let message = hex::decode("aa5517000102030405060708090a0b0c0d0e0f101112131415").unwrap();
    let record = crate::message::decode(&message).unwrap();
    assert_eq!(map_record(&record), None);
}

#[test]
fn test_map_unknown_codes() {
    let record = StatusRecord {
        charger_state: 99,
        ev_status: 99,
        charging_state: 99,
        phase_type: 0,
        power_raw: 0,
        session_energy_raw: 0,
        total_energy_raw: 0,
        warning_bits: 0,
        error_bits: 0x8000,
    };
    let status = map_status(&record);
    assert_eq!(status.charger_state, ChargerState::Unknown(99));
    assert_eq!(status.ev_status, EvStatus::Unknown(99));
    assert_eq!(status.charging_state, ChargingState::Unknown(99));
    assert_eq!(status.phase_type, PhaseType::Unknown(0));
    assert!(status.warnings.is_empty());
    assert_eq!(status.errors.bits(), 0x8000);
}
