use crate::cache::CachedData;
use crate::settings::PowerMeterKind;
use serde_json::{json, Value};

/// OpenDTU live data for a two-string inverter on a sunny afternoon
pub fn inverter_payload() -> Value {
    json!({
        "inverters": [{
            "serial": "114182912345",
            "name": "Balkon",
            "order": 0,
            "data_age": 4,
            "poll_enabled": true,
            "reachable": true,
            "producing": true,
            "limit_relative": 100,
            "limit_absolute": 800,
            "AC": {
                "0": {
                    "Power": {"v": 312.4, "u": "W", "d": 1},
                    "Voltage": {"v": 231.2, "u": "V", "d": 1},
                    "Current": {"v": 1.35, "u": "A", "d": 2},
                    "Frequency": {"v": 50.01, "u": "Hz", "d": 2}
                }
            },
            "DC": {
                "0": {
                    "name": {"u": "Roof East"},
                    "Power": {"v": 160.2, "u": "W", "d": 1},
                    "YieldDay": {"v": 901.0, "u": "Wh", "d": 0},
                    "YieldTotal": {"v": 256.25, "u": "kWh", "d": 3}
                },
                "1": {
                    "name": {"u": "Roof West"},
                    "Power": {"v": 165.1, "u": "W", "d": 1},
                    "YieldDay": {"v": 949.5, "u": "Wh", "d": 0},
                    "YieldTotal": {"v": 256.0, "u": "kWh", "d": 3}
                }
            }
        }],
        "total": {
            "Power": {"v": 312.4, "u": "W", "d": 1},
            "YieldDay": {"v": 1850.5, "u": "Wh", "d": 0},
            "YieldTotal": {"v": 512.25, "u": "kWh", "d": 3}
        }
    })
}

/// Grid draw of 87 W as reported by the selected meter
pub fn power_meter_payload(kind: PowerMeterKind) -> Value {
    match kind {
        PowerMeterKind::Tasmota => json!({
            "StatusSNS": {
                "Time": "2024-06-01T14:02:11",
                "": {"total_in": 4211.2, "total_out": 120.7, "current": 87.0}
            }
        }),
        PowerMeterKind::Shelly => json!({
            "meters": [{"power": 87.0, "is_valid": true, "total": 4211200}],
            "emeters": []
        }),
    }
}

pub fn mock_data(kind: PowerMeterKind) -> CachedData {
    CachedData {
        dtu: inverter_payload(),
        power_draw: Some(power_meter_payload(kind)),
    }
}
