use serde::{Deserialize, Serialize};

use super::{be_u16, be_u32, require_payload, DecodeError};

/// A frame type which contains the charger's operating state and energy counters.
///
/// Values are raw device units; scaling happens in the record mapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub charger_state: u8,
    pub ev_status: u8,
    pub charging_state: u8,
    pub phase_type: u8,
    /// Active power in kW/100
    pub power_raw: u32,
    /// Energy delivered in the current session in kWh/100
    pub session_energy_raw: u32,
    /// Lifetime energy delivered in kWh/10
    pub total_energy_raw: u32,
    pub warning_bits: u16,
    pub error_bits: u16,
}

impl StatusRecord {
    pub(crate) const PAYLOAD_LEN: usize = 20;

    pub(crate) fn parse(payload: &[u8]) -> Result<Self, DecodeError> {
        require_payload(payload, Self::PAYLOAD_LEN)?;

        Ok(Self {
            charger_state: payload[0],
            ev_status: payload[1],
            charging_state: payload[2],
            phase_type: payload[3],
            power_raw: be_u32(payload, 4),
            session_energy_raw: be_u32(payload, 8),
            total_energy_raw: be_u32(payload, 12),
            warning_bits: be_u16(payload, 16),
            error_bits: be_u16(payload, 18),
        })
    }
}

#[test]
fn test_parse_status_happy() {
    let message = hex::decode("aa55160102020103000005dc000004d20001e24000050002").unwrap();
    let record = super::decode(&message).unwrap();
    let expected = StatusRecord {
        charger_state: 2,
        ev_status: 2,
        charging_state: 1,
        phase_type: 3,
        power_raw: 1500,
        session_energy_raw: 1234,
        total_energy_raw: 123456,
        warning_bits: 0x0005,
        error_bits: 0x0002,
    };
    assert_eq!(record, super::DecodedRecord::Status(expected));
}

#[test]
fn test_parse_status_short_payload() {
    // Header declares a status frame but only 4 payload bytes follow.
    let message = hex::decode("aa55060102020103").unwrap();
    assert_eq!(super::decode(&message), Err(DecodeError::Truncated { needed: 24, available: 8 }));
}
