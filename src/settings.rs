use crate::cache::write_atomic;
use crate::error::{SettingsError, StorageError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const APP_DIR: &str = "dtuwidget";
const SETTINGS_FILE: &str = "opendtu-config.json";
const SCRATCH_FILE: &str = "settings-local.json";
const CONFIG_ENV: &str = "DTUWIDGET_CONFIG";

/// How long the local scratch copy may shadow the authoritative file.
pub const SCRATCH_TTL_MS: i64 = 300_000;

/// Power meter backend used for the optional "power draw" reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerMeterKind {
    Tasmota,
    Shelly,
}

/// User settings, stored as a flat camelCase JSON document.
///
/// Missing fields fall back to the placeholder defaults so a hand-edited file
/// only needs the values that differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub dtu_api_url: String,
    pub dtu_user: String,
    pub dtu_pass: String,
    #[serde(rename = "powermeter")]
    pub power_meter: PowerMeterKind,
    pub tasmota_api_url: String,
    pub tasmota_user: String,
    pub tasmota_pass: String,
    pub shelly_api_url: String,
    pub shelly_user: String,
    pub shelly_pass: String,
    #[serde(with = "numeric_flag")]
    pub show_power_draw: bool,
    pub power_draw_threshold: f64,
    pub red_threshold: f64,
    pub yellow_threshold: f64,
    pub green_threshold: f64,
    pub inverter_serial: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dtu_api_url: "http://change-me/api/livedata/status/".to_string(),
            dtu_user: "changeme".to_string(),
            dtu_pass: "changeme".to_string(),
            power_meter: PowerMeterKind::Tasmota,
            tasmota_api_url: "http://change-me/cm?cmnd=status%208".to_string(),
            tasmota_user: "changeme".to_string(),
            tasmota_pass: "changeme".to_string(),
            shelly_api_url: "https://change-me/".to_string(),
            shelly_user: "changeme".to_string(),
            shelly_pass: "changeme".to_string(),
            show_power_draw: false,
            power_draw_threshold: 0.0,
            red_threshold: 220.0,
            yellow_threshold: 260.0,
            green_threshold: 400.0,
            inverter_serial: "XXXXXXXXXXXX".to_string(),
        }
    }
}

/// Connection details of the selected power meter
pub struct MeterAccess<'a> {
    pub url: &'a str,
    pub user: &'a str,
    pub pass: &'a str,
}

impl Settings {
    pub fn meter_access(&self) -> MeterAccess<'_> {
        match self.power_meter {
            PowerMeterKind::Tasmota => MeterAccess {
                url: &self.tasmota_api_url,
                user: &self.tasmota_user,
                pass: &self.tasmota_pass,
            },
            PowerMeterKind::Shelly => MeterAccess {
                url: &self.shelly_api_url,
                user: &self.shelly_user,
                pass: &self.shelly_pass,
            },
        }
    }

    /// True while the DTU URL still points at the generated placeholder host.
    pub fn is_placeholder(&self) -> bool {
        self.dtu_api_url.contains("change-me")
    }
}

/// `showPowerDraw` is written as `0|1`; `true|false` is accepted as well.
mod numeric_flag {
    use serde::de::{self, Deserializer};
    use serde::{Deserialize, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Bool(b) => Ok(b),
            Value::Number(n) => n
                .as_f64()
                .map(|v| v != 0.0)
                .ok_or_else(|| de::Error::custom("invalid number for showPowerDraw")),
            Value::Null => Ok(false),
            other => Err(de::Error::custom(format!(
                "showPowerDraw must be 0, 1, true or false, got {}",
                other
            ))),
        }
    }
}

/// Local copy of the settings with the time it was taken
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScratchCopy {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    saved_at: DateTime<Utc>,
    /// Authoritative file the copy was taken from
    source: PathBuf,
    settings: Settings,
}

/// Two-tier settings storage: the authoritative (user-synced) document plus a
/// short-lived scratch copy in the local cache directory.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    scratch_path: PathBuf,
    scratch_ttl: Duration,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>, scratch_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            scratch_path: scratch_path.into(),
            scratch_ttl: Duration::milliseconds(SCRATCH_TTL_MS),
        }
    }

    /// Resolve the settings location: `$DTUWIDGET_CONFIG`, then the CLI
    /// override, then the platform config directory.
    pub fn locate(cli_override: Option<PathBuf>) -> Self {
        let path = std::env::var(CONFIG_ENV)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .or(cli_override)
            .unwrap_or_else(Self::default_path);
        Self::new(path, Self::default_scratch_path())
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join(SETTINGS_FILE)
    }

    fn default_scratch_path() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join(SCRATCH_FILE)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Settings, SettingsError> {
        self.load_at(Utc::now())
    }

    pub(crate) fn load_at(&self, now: DateTime<Utc>) -> Result<Settings, SettingsError> {
        if let Some(settings) = self.read_scratch(now) {
            debug!(path = %self.scratch_path.display(), "using local settings copy");
            return Ok(settings);
        }

        let settings = self.load_authoritative()?;
        if let Err(e) = self.write_scratch(&settings, now) {
            warn!("failed to refresh local settings copy: {}", e);
        }
        Ok(settings)
    }

    /// Read the authoritative document, creating it with defaults on first run.
    pub fn load_authoritative(&self) -> Result<Settings, SettingsError> {
        if !self.path.exists() {
            return self.create_default();
        }

        let content = std::fs::read_to_string(&self.path).map_err(|source| SettingsError::Read {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Write the default settings document and return its contents.
    pub fn create_default(&self) -> Result<Settings, SettingsError> {
        let settings = Settings::default();
        let content = serde_json::to_string_pretty(&settings).map_err(|source| {
            SettingsError::Serialize {
                path: self.path.clone(),
                source,
            }
        })?;
        write_atomic(&self.path, &content).map_err(|source| SettingsError::Write {
            path: self.path.clone(),
            source,
        })?;
        info!(path = %self.path.display(), "created default settings");
        Ok(settings)
    }

    fn read_scratch(&self, now: DateTime<Utc>) -> Option<Settings> {
        let content = std::fs::read_to_string(&self.scratch_path).ok()?;
        let copy: ScratchCopy = match serde_json::from_str(&content) {
            Ok(copy) => copy,
            Err(e) => {
                debug!("ignoring unreadable local settings copy: {}", e);
                return None;
            }
        };
        if copy.source != self.path {
            debug!(
                source = %copy.source.display(),
                "local settings copy belongs to another settings file"
            );
            return None;
        }
        let age = now.signed_duration_since(copy.saved_at);
        (age >= Duration::zero() && age < self.scratch_ttl).then_some(copy.settings)
    }

    fn write_scratch(&self, settings: &Settings, now: DateTime<Utc>) -> Result<(), StorageError> {
        let copy = ScratchCopy {
            saved_at: now,
            source: self.path.clone(),
            settings: settings.clone(),
        };
        let content = serde_json::to_string(&copy).map_err(|source| StorageError::Json {
            path: self.scratch_path.clone(),
            source,
        })?;
        write_atomic(&self.scratch_path, &content).map_err(|source| StorageError::Io {
            path: self.scratch_path.clone(),
            source,
        })
    }
}
