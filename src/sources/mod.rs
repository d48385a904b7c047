pub mod http;

use crate::error::FetchError;
use crate::settings::Settings;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

pub use http::HttpSource;

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// One authenticated JSON GET
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub url: String,
    pub user: String,
    pub pass: String,
    pub query: Vec<(String, String)>,
    pub timeout: Duration,
}

impl Endpoint {
    /// `GET <dtuApiUrl>?inv=<serial>`
    pub fn inverter(settings: &Settings, timeout: Duration) -> Self {
        Self {
            url: settings.dtu_api_url.clone(),
            user: settings.dtu_user.clone(),
            pass: settings.dtu_pass.clone(),
            query: vec![("inv".to_string(), settings.inverter_serial.clone())],
            timeout,
        }
    }

    /// The power meter selected by `powermeter`, queried as configured.
    pub fn power_meter(settings: &Settings, timeout: Duration) -> Self {
        let access = settings.meter_access();
        Self {
            url: access.url.to_string(),
            user: access.user.to_string(),
            pass: access.pass.to_string(),
            query: Vec::new(),
            timeout,
        }
    }
}

/// Source of JSON documents. Implementations report every failure through
/// the returned [`FetchError`] and never retry.
#[async_trait]
pub trait JsonSource: Send + Sync {
    async fn get_json(&self, endpoint: &Endpoint) -> Result<Value, FetchError>;
}
