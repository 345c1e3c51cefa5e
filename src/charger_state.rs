use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// The reported status of the charger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargerStatus {
    pub charger_state: ChargerState,
    pub ev_status: EvStatus,
    pub charging_state: ChargingState,
    pub phase_type: PhaseType,
    /// Active power in kW
    pub power_kw: f64,
    /// Energy delivered in the current session in kWh
    pub session_energy_kwh: f64,
    /// Lifetime energy delivered in kWh
    pub total_energy_kwh: f64,
    pub warnings: Warnings,
    pub errors: Errors,
}

/// Detailed electrical readings and diagnostics of the charger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargerMetrics {
    /// Phase voltages in V
    pub voltage_l1: f64,
    pub voltage_l2: f64,
    pub voltage_l3: f64,
    /// Phase currents in A
    pub current_l1: f64,
    pub current_l2: f64,
    pub current_l3: f64,
    /// The current offered to the vehicle in A
    pub set_current: f64,
    /// Rating of the upstream circuit breaker in A
    pub circuit_breaker: f64,
    /// Internal temperature in °C
    pub temperature: f64,
    pub wifi_network: String,
    /// WiFi signal strength in dBm
    pub wifi_rssi: i16,
    pub firmware_version: String,
    /// Version of the communication module firmware
    pub platform_version: String,
    pub evse_status: EvseStatus,
    /// Average broker round trip in ms
    pub avg_ping_latency: f64,
}

impl ChargerMetrics {
    /// Average voltage over the phases that are live, in V. A phase reading 0 V is not connected.
    pub fn voltage_avg(&self) -> f64 {
        let live: Vec<f64> = self.phases().filter(|(v, _)| *v > 0.0).map(|(v, _)| v).collect();
        average(&live)
    }

    /// Average current over the phases that are live, in A.
    pub fn current_avg(&self) -> f64 {
        let live: Vec<f64> = self.phases().filter(|(v, _)| *v > 0.0).map(|(_, a)| a).collect();
        average(&live)
    }

    fn phases(&self) -> impl Iterator<Item = (f64, f64)> {
        [
            (self.voltage_l1, self.current_l1),
            (self.voltage_l2, self.current_l2),
            (self.voltage_l3, self.current_l3),
        ]
        .into_iter()
    }
}

fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Operating state of the charge point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargerState {
    Available,
    Preparing,
    Charging,
    SuspendedEv,
    SuspendedEvse,
    Finishing,
    Faulted,
    Unavailable,
    /// A code this crate does not know about
    Unknown(u8),
}

impl From<u8> for ChargerState {
    fn from(code: u8) -> Self {
        match code {
            0 => ChargerState::Available,
            1 => ChargerState::Preparing,
            2 => ChargerState::Charging,
            3 => ChargerState::SuspendedEv,
            4 => ChargerState::SuspendedEvse,
            5 => ChargerState::Finishing,
            6 => ChargerState::Faulted,
            7 => ChargerState::Unavailable,
            other => ChargerState::Unknown(other),
        }
    }
}

/// Vehicle connection state as seen on the control pilot (IEC 61851 states A to F)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvStatus {
    Disconnected,
    Connected,
    Ready,
    VentilationRequired,
    NoPower,
    Error,
    Unknown(u8),
}

impl From<u8> for EvStatus {
    fn from(code: u8) -> Self {
        match code {
            0 => EvStatus::Disconnected,
            1 => EvStatus::Connected,
            2 => EvStatus::Ready,
            3 => EvStatus::VentilationRequired,
            4 => EvStatus::NoPower,
            5 => EvStatus::Error,
            other => EvStatus::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargingState {
    NotCharging,
    Charging,
    Paused,
    Completed,
    Unknown(u8),
}

impl From<u8> for ChargingState {
    fn from(code: u8) -> Self {
        match code {
            0 => ChargingState::NotCharging,
            1 => ChargingState::Charging,
            2 => ChargingState::Paused,
            3 => ChargingState::Completed,
            other => ChargingState::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseType {
    SinglePhase,
    ThreePhase,
    Unknown(u8),
}

impl From<u8> for PhaseType {
    fn from(code: u8) -> Self {
        match code {
            1 => PhaseType::SinglePhase,
            3 => PhaseType::ThreePhase,
            other => PhaseType::Unknown(other),
        }
    }
}

/// Health of the EVSE controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvseStatus {
    Ok,
    Initializing,
    Updating,
    Fault,
    Unknown(u8),
}

impl From<u8> for EvseStatus {
    fn from(code: u8) -> Self {
        match code {
            0 => EvseStatus::Ok,
            1 => EvseStatus::Initializing,
            2 => EvseStatus::Updating,
            3 => EvseStatus::Fault,
            other => EvseStatus::Unknown(other),
        }
    }
}

bitflags! {
    /// Conditions the charger reports without interrupting the session.
    ///
    /// Bits without a name are kept as-is.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Warnings: u16 {
        const OVER_TEMPERATURE = 1 << 0;
        const HIGH_VOLTAGE = 1 << 1;
        const LOW_VOLTAGE = 1 << 2;
        const PHASE_IMBALANCE = 1 << 3;
        const WEAK_WIFI = 1 << 4;
        const CURRENT_DERATED = 1 << 5;
    }
}

bitflags! {
    /// Faults that stop or prevent charging.
    ///
    /// Bits without a name are kept as-is.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Errors: u16 {
        const GROUND_FAULT = 1 << 0;
        const RESIDUAL_CURRENT = 1 << 1;
        const OVERCURRENT = 1 << 2;
        const RELAY_WELDED = 1 << 3;
        const PILOT_FAULT = 1 << 4;
        const OVER_TEMPERATURE = 1 << 5;
        const METER_FAILURE = 1 << 6;
        const COMMUNICATION_LOST = 1 << 7;
    }
}

#[test]
fn test_unknown_codes_are_preserved() {
    assert_eq!(ChargerState::from(2), ChargerState::Charging);
    assert_eq!(ChargerState::from(42), ChargerState::Unknown(42));
    assert_eq!(EvStatus::from(9), EvStatus::Unknown(9));
    assert_eq!(PhaseType::from(2), PhaseType::Unknown(2));
    assert_eq!(EvseStatus::from(200), EvseStatus::Unknown(200));
}

#[test]
fn test_flags_keep_unnamed_bits() {
    let warnings = Warnings::from_bits_retain(0x8001);
    assert!(warnings.contains(Warnings::OVER_TEMPERATURE));
    assert!(!warnings.contains(Warnings::HIGH_VOLTAGE));
    assert_eq!(warnings.bits(), 0x8001);
}

#[cfg(test)]
fn metrics_with_phases(voltages: [f64; 3], currents: [f64; 3]) -> ChargerMetrics {
    ChargerMetrics {
        voltage_l1: voltages[0],
        voltage_l2: voltages[1],
        voltage_l3: voltages[2],
        current_l1: currents[0],
        current_l2: currents[1],
        current_l3: currents[2],
        set_current: 16.0,
        circuit_breaker: 32.0,
        temperature: 20.0,
        wifi_network: String::new(),
        wifi_rssi: -60,
        firmware_version: "1.0.0".to_string(),
        platform_version: "1.0.0".to_string(),
        evse_status: EvseStatus::Ok,
        avg_ping_latency: 10.0,
    }
}

#[test]
fn test_averages_skip_dead_phases() {
    let metrics = metrics_with_phases([230.0, 0.0, 0.0], [16.0, 0.0, 0.0]);
    assert_eq!(metrics.voltage_avg(), 230.0);
    assert_eq!(metrics.current_avg(), 16.0);

    let metrics = metrics_with_phases([230.0, 232.0, 234.0], [10.0, 11.0, 12.0]);
    assert_eq!(metrics.voltage_avg(), 232.0);
    assert_eq!(metrics.current_avg(), 11.0);

    let metrics = metrics_with_phases([0.0, 0.0, 0.0], [0.0, 0.0, 0.0]);
    assert_eq!(metrics.voltage_avg(), 0.0);
}
