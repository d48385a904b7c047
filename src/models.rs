use crate::cache::CachedData;
use crate::error::DecodeError;
use crate::settings::{PowerMeterKind, Settings};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// A single OpenDTU reading, e.g. `{"v": 312.4, "u": "W", "d": 1}`
#[derive(Debug, Clone, Deserialize)]
pub struct Measurement {
    pub v: f64,
}

/// Response of `GET /api/livedata/status?inv=<serial>`
#[derive(Debug, Clone, Deserialize)]
pub struct LiveDataResponse {
    pub inverters: Vec<InverterData>,
    #[serde(default)]
    pub total: Option<TotalData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InverterData {
    #[serde(default)]
    pub name: Option<String>,
    pub producing: bool,
    pub reachable: bool,
    #[serde(rename = "AC", default)]
    pub ac: BTreeMap<String, AcChannel>,
    #[serde(rename = "DC", default)]
    pub dc: BTreeMap<String, DcChannel>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AcChannel {
    pub power: Measurement,
    #[serde(default)]
    pub yield_day: Option<Measurement>,
    #[serde(default)]
    pub yield_total: Option<Measurement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelName {
    pub u: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DcChannel {
    #[serde(default)]
    pub name: Option<ChannelName>,
    #[serde(rename = "Power")]
    pub power: Measurement,
    #[serde(rename = "YieldDay", default)]
    pub yield_day: Option<Measurement>,
    #[serde(rename = "YieldTotal", default)]
    pub yield_total: Option<Measurement>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TotalData {
    pub yield_day: Measurement,
    pub yield_total: Measurement,
}

/// Tasmota `Status 8` response; the SML meter is reported under an empty key
#[derive(Debug, Deserialize)]
struct TasmotaStatus {
    #[serde(rename = "StatusSNS")]
    status_sns: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct TasmotaMeter {
    current: f64,
}

/// Shelly EM / 3EM `/status` response
#[derive(Debug, Deserialize)]
struct ShellyStatus {
    meters: Vec<ShellyMeter>,
}

#[derive(Debug, Deserialize)]
struct ShellyMeter {
    power: f64,
}

/// Extract the current grid draw in watts from a power meter payload.
pub fn meter_power(kind: PowerMeterKind, payload: &Value) -> Result<f64, DecodeError> {
    match kind {
        PowerMeterKind::Tasmota => {
            let status = TasmotaStatus::deserialize(payload)?;
            let meter = status
                .status_sns
                .get("")
                .ok_or(DecodeError::NoMeterReading)?;
            Ok(TasmotaMeter::deserialize(meter)?.current)
        }
        PowerMeterKind::Shelly => {
            let status = ShellyStatus::deserialize(payload)?;
            status
                .meters
                .first()
                .map(|m| m.power)
                .ok_or(DecodeError::NoMeterReading)
        }
    }
}

/// Colour band of a power figure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerBand {
    Red,
    Yellow,
    Green,
}

impl PowerBand {
    /// Bands are inclusive on their lower bound: `[0, red)` is red,
    /// `[red, yellow)` yellow, everything above green.
    pub fn classify(power: f64, red_threshold: f64, yellow_threshold: f64) -> Self {
        if power < red_threshold {
            PowerBand::Red
        } else if power < yellow_threshold {
            PowerBand::Yellow
        } else {
            PowerBand::Green
        }
    }

    /// Grid draw above the threshold is flagged yellow.
    pub fn for_power_draw(draw: f64, threshold: f64) -> Self {
        if draw > threshold {
            PowerBand::Yellow
        } else {
            PowerBand::Green
        }
    }

    pub fn css_class(&self) -> &'static str {
        match self {
            PowerBand::Red => "red",
            PowerBand::Yellow => "yellow",
            PowerBand::Green => "green",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DcString {
    pub name: String,
    pub power_w: f64,
}

/// Display-ready figures derived from a cached or fresh payload
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetData {
    pub inverter_name: Option<String>,
    pub producing: bool,
    pub reachable: bool,
    pub power_w: f64,
    pub yield_day_kwh: f64,
    pub yield_total_kwh: f64,
    pub dc_strings: Vec<DcString>,
    pub power_draw_w: Option<f64>,
}

impl WidgetData {
    /// Validate the DTU payload and summarise it. The power meter payload is
    /// best effort: a mismatch only drops the reading.
    pub fn from_cached(data: &CachedData, settings: &Settings) -> Result<Self, DecodeError> {
        let response = LiveDataResponse::deserialize(&data.dtu)?;
        let mut widget = Self::from_live_data(&response)?;

        if settings.show_power_draw {
            widget.power_draw_w = data.power_draw.as_ref().and_then(|payload| {
                meter_power(settings.power_meter, payload)
                    .map_err(|e| warn!("ignoring power meter payload: {}", e))
                    .ok()
            });
        }

        Ok(widget)
    }

    pub fn from_live_data(response: &LiveDataResponse) -> Result<Self, DecodeError> {
        let inverter = response.inverters.first().ok_or(DecodeError::NoInverters)?;
        let ac = inverter.ac.get("0").ok_or(DecodeError::NoAcChannel)?;

        // Yield: the queried inverter's own figures first; `total` spans all
        // inverters and is only used when the inverter reports none.
        let (yield_day_wh, yield_total_kwh) = match (&ac.yield_day, &ac.yield_total) {
            (Some(day), Some(total)) => Some((day.v, total.v)),
            _ => dc_yields(inverter),
        }
        .or_else(|| {
            response
                .total
                .as_ref()
                .map(|t| (t.yield_day.v, t.yield_total.v))
        })
        .unwrap_or((0.0, 0.0));

        let mut channels: Vec<(&String, &DcChannel)> = inverter.dc.iter().collect();
        channels.sort_by_key(|(key, _)| key.parse::<u32>().unwrap_or(u32::MAX));
        let dc_strings = channels
            .into_iter()
            .map(|(key, channel)| DcString {
                name: channel
                    .name
                    .as_ref()
                    .map(|n| n.u.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| format!("String {}", key)),
                power_w: channel.power.v,
            })
            .collect();

        Ok(Self {
            inverter_name: inverter.name.clone().filter(|n| !n.trim().is_empty()),
            producing: inverter.producing,
            reachable: inverter.reachable,
            power_w: ac.power.v,
            yield_day_kwh: yield_day_wh / 1000.0,
            yield_total_kwh,
            dc_strings,
            power_draw_w: None,
        })
    }

    pub fn power_band(&self, settings: &Settings) -> PowerBand {
        PowerBand::classify(
            self.power_w,
            settings.red_threshold,
            settings.yellow_threshold,
        )
    }
}

/// Sum of the per-string yields, if any string reports them.
fn dc_yields(inverter: &InverterData) -> Option<(f64, f64)> {
    let channels: Vec<&DcChannel> = inverter
        .dc
        .values()
        .filter(|c| c.yield_day.is_some() || c.yield_total.is_some())
        .collect();
    if channels.is_empty() {
        return None;
    }
    let day = channels
        .iter()
        .filter_map(|c| c.yield_day.as_ref())
        .map(|m| m.v)
        .sum::<f64>();
    let total = channels
        .iter()
        .filter_map(|c| c.yield_total.as_ref())
        .map(|m| m.v)
        .sum::<f64>();
    Some((day, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_classify_band_boundaries() {
        assert_eq!(PowerBand::classify(219.9, 220.0, 260.0), PowerBand::Red);
        assert_eq!(PowerBand::classify(220.0, 220.0, 260.0), PowerBand::Yellow);
        assert_eq!(PowerBand::classify(259.9, 220.0, 260.0), PowerBand::Yellow);
        assert_eq!(PowerBand::classify(260.0, 220.0, 260.0), PowerBand::Green);
        assert_eq!(PowerBand::classify(400.0, 220.0, 260.0), PowerBand::Green);
    }

    #[test]
    fn test_power_draw_band() {
        assert_eq!(PowerBand::for_power_draw(0.0, 0.0), PowerBand::Green);
        assert_eq!(PowerBand::for_power_draw(0.1, 0.0), PowerBand::Yellow);
        assert_eq!(PowerBand::for_power_draw(-150.0, 0.0), PowerBand::Green);
    }

    #[test]
    fn test_widget_data_from_live_data() {
        let data = CachedData {
            dtu: mock::inverter_payload(),
            power_draw: None,
        };
        let widget = WidgetData::from_cached(&data, &Settings::default()).unwrap();

        assert!(widget.producing);
        assert_eq!(widget.power_w, 312.4);
        assert_eq!(widget.yield_day_kwh, 1.8505);
        assert_eq!(widget.yield_total_kwh, 512.25);
        assert_eq!(
            widget.dc_strings,
            vec![
                DcString { name: "Roof East".to_string(), power_w: 160.2 },
                DcString { name: "Roof West".to_string(), power_w: 165.1 },
            ]
        );
        assert_eq!(widget.power_draw_w, None);
    }

    #[test]
    fn test_yield_falls_back_to_dc_strings() {
        let payload = json!({
            "inverters": [{
                "producing": false,
                "reachable": true,
                "AC": {"0": {"Power": {"v": 0.0}}},
                "DC": {
                    "0": {"name": {"u": ""}, "Power": {"v": 0.0}, "YieldDay": {"v": 1000.0}, "YieldTotal": {"v": 10.5}},
                    "1": {"Power": {"v": 0.0}, "YieldDay": {"v": 500.0}, "YieldTotal": {"v": 4.5}}
                }
            }]
        });
        let response = LiveDataResponse::deserialize(&payload).unwrap();
        let widget = WidgetData::from_live_data(&response).unwrap();

        assert_eq!(widget.yield_day_kwh, 1.5);
        assert_eq!(widget.yield_total_kwh, 15.0);
        assert_eq!(widget.dc_strings[0].name, "String 0");
        assert_eq!(widget.dc_strings[1].name, "String 1");
    }

    #[test]
    fn test_yield_prefers_inverter_over_total() {
        // `total` covers a second inverter as well
        let payload = json!({
            "inverters": [{
                "producing": true,
                "reachable": true,
                "AC": {"0": {"Power": {"v": 250.0}}},
                "DC": {
                    "0": {"Power": {"v": 250.0}, "YieldDay": {"v": 2000.0}, "YieldTotal": {"v": 100.0}}
                }
            }],
            "total": {
                "Power": {"v": 600.0},
                "YieldDay": {"v": 5000.0},
                "YieldTotal": {"v": 300.0}
            }
        });
        let response = LiveDataResponse::deserialize(&payload).unwrap();
        let widget = WidgetData::from_live_data(&response).unwrap();

        assert_eq!(widget.power_w, 250.0);
        assert_eq!(widget.yield_day_kwh, 2.0);
        assert_eq!(widget.yield_total_kwh, 100.0);
    }

    #[test]
    fn test_yield_uses_total_when_inverter_has_none() {
        let payload = json!({
            "inverters": [{
                "producing": true,
                "reachable": true,
                "AC": {"0": {"Power": {"v": 250.0}}},
                "DC": {"0": {"Power": {"v": 250.0}}}
            }],
            "total": {
                "Power": {"v": 250.0},
                "YieldDay": {"v": 1500.0},
                "YieldTotal": {"v": 42.0}
            }
        });
        let response = LiveDataResponse::deserialize(&payload).unwrap();
        let widget = WidgetData::from_live_data(&response).unwrap();

        assert_eq!(widget.yield_day_kwh, 1.5);
        assert_eq!(widget.yield_total_kwh, 42.0);
    }

    #[test]
    fn test_shape_mismatch_is_decode_error() {
        let data = CachedData {
            dtu: json!({"inverters": [{"producing": "yes"}]}),
            power_draw: None,
        };
        assert!(matches!(
            WidgetData::from_cached(&data, &Settings::default()),
            Err(DecodeError::Shape(_))
        ));

        let data = CachedData {
            dtu: json!({"inverters": []}),
            power_draw: None,
        };
        assert!(matches!(
            WidgetData::from_cached(&data, &Settings::default()),
            Err(DecodeError::NoInverters)
        ));
    }

    #[test]
    fn test_meter_power_tasmota() {
        let payload = json!({"StatusSNS": {"Time": "2024-05-01T12:00:00", "": {"current": 431.0}}});
        assert_eq!(meter_power(PowerMeterKind::Tasmota, &payload).unwrap(), 431.0);

        let missing = json!({"StatusSNS": {"Time": "2024-05-01T12:00:00"}});
        assert!(matches!(
            meter_power(PowerMeterKind::Tasmota, &missing),
            Err(DecodeError::NoMeterReading)
        ));
    }

    #[test]
    fn test_meter_power_shelly() {
        let payload = json!({"meters": [{"power": -120.5, "is_valid": true}, {"power": 3.0}]});
        assert_eq!(meter_power(PowerMeterKind::Shelly, &payload).unwrap(), -120.5);

        let empty = json!({"meters": []});
        assert!(meter_power(PowerMeterKind::Shelly, &empty).is_err());
    }

    #[test]
    fn test_bad_meter_payload_drops_reading_only() {
        let settings = Settings {
            show_power_draw: true,
            power_meter: PowerMeterKind::Shelly,
            ..Settings::default()
        };
        let data = CachedData {
            dtu: mock::inverter_payload(),
            power_draw: Some(json!({"unexpected": true})),
        };
        let widget = WidgetData::from_cached(&data, &settings).unwrap();
        assert_eq!(widget.power_draw_w, None);
    }
}
