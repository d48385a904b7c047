//! Refresh orchestration: live fetch, cache write, stale fallback and the
//! optimistic fast path.

use crate::cache::{CacheStore, CachedData};
use crate::error::FetchError;
use crate::models::WidgetData;
use crate::settings::Settings;
use crate::sources::{Endpoint, JsonSource, DEFAULT_TIMEOUT};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cached data younger than this is shown without waiting for the network.
pub const OPTIMISTIC_MAX_AGE_MS: i64 = 120_000;

/// Where the displayed figures came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Network,
    Cache,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub widget: WidgetData,
    /// Time the payload was fetched; the cache timestamp for cached data
    pub as_of: DateTime<Utc>,
    pub origin: Origin,
    pub cache_write_failed: bool,
}

/// Why no live data is available
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    Connection(String),
    UnexpectedResponse(String),
}

impl From<&FetchError> for FailureCause {
    fn from(err: &FetchError) -> Self {
        if err.is_decode() {
            FailureCause::UnexpectedResponse(err.to_string())
        } else {
            FailureCause::Connection(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Fresh(Snapshot),
    StaleFallback {
        snapshot: Snapshot,
        cause: FailureCause,
    },
    /// Live fetch failed and no usable cache entry exists.
    HardFail { cause: FailureCause },
}

/// Handle to the detached refresh started by the optimistic path.
///
/// It carries no result; awaiting it only keeps the runtime alive until the
/// cache write has happened.
pub struct BackgroundRefresh(JoinHandle<()>);

impl BackgroundRefresh {
    pub async fn settle(self) {
        if let Err(e) = self.0.await {
            warn!("background refresh aborted: {}", e);
        }
    }
}

pub struct Refresh {
    pub outcome: RefreshOutcome,
    pub background: Option<BackgroundRefresh>,
}

pub struct Refresher {
    source: Arc<dyn JsonSource>,
    cache: CacheStore,
    settings: Arc<Settings>,
    timeout: std::time::Duration,
    optimistic_max_age: Duration,
}

impl Refresher {
    pub fn new(source: Arc<dyn JsonSource>, cache: CacheStore, settings: Arc<Settings>) -> Self {
        Self {
            source,
            cache,
            settings,
            timeout: DEFAULT_TIMEOUT,
            optimistic_max_age: Duration::milliseconds(OPTIMISTIC_MAX_AGE_MS),
        }
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Serve a recent cache entry immediately and refresh in the background,
    /// otherwise fetch live data and fall back to the cache on failure.
    pub async fn refresh(&self) -> Refresh {
        let now = Utc::now();
        if let Some(entry) = self.cache.load() {
            let age = entry.age(now);
            if age >= Duration::zero() && age < self.optimistic_max_age {
                match WidgetData::from_cached(&entry.data, &self.settings) {
                    Ok(widget) => {
                        debug!(age_ms = age.num_milliseconds(), "showing cached data");
                        let background = self.spawn_background();
                        return Refresh {
                            outcome: RefreshOutcome::Fresh(Snapshot {
                                widget,
                                as_of: entry.timestamp,
                                origin: Origin::Cache,
                                cache_write_failed: false,
                            }),
                            background: Some(background),
                        };
                    }
                    Err(e) => warn!("cached payload unusable, fetching: {}", e),
                }
            }
        }

        Refresh {
            outcome: self.refresh_now().await,
            background: None,
        }
    }

    /// Always hit the network; fall back to the cache if that fails.
    pub async fn refresh_now(&self) -> RefreshOutcome {
        match fetch_and_store(
            self.source.as_ref(),
            &self.cache,
            &self.settings,
            self.timeout,
        )
        .await
        {
            Ok(snapshot) => RefreshOutcome::Fresh(snapshot),
            Err(cause) => self.fall_back(cause),
        }
    }

    fn fall_back(&self, cause: FailureCause) -> RefreshOutcome {
        let Some(entry) = self.cache.load() else {
            info!("no cached data to fall back to");
            return RefreshOutcome::HardFail { cause };
        };

        match WidgetData::from_cached(&entry.data, &self.settings) {
            Ok(widget) => {
                info!(as_of = %entry.timestamp, "showing stale data");
                RefreshOutcome::StaleFallback {
                    snapshot: Snapshot {
                        widget,
                        as_of: entry.timestamp,
                        origin: Origin::Cache,
                        cache_write_failed: false,
                    },
                    cause,
                }
            }
            Err(e) => {
                warn!("cached payload unusable: {}", e);
                RefreshOutcome::HardFail { cause }
            }
        }
    }

    /// Detached: nothing in this run waits on its result, and it may race the
    /// next run's cache read.
    fn spawn_background(&self) -> BackgroundRefresh {
        let source = Arc::clone(&self.source);
        let cache = self.cache.clone();
        let settings = Arc::clone(&self.settings);
        let timeout = self.timeout;

        BackgroundRefresh(tokio::spawn(async move {
            match fetch_and_store(source.as_ref(), &cache, &settings, timeout).await {
                Ok(_) => debug!("background refresh stored new data"),
                Err(cause) => warn!("background refresh failed: {:?}", cause),
            }
        }))
    }
}

/// Fetch the inverter and, if enabled, the power meter concurrently. The
/// cache is written only when the inverter payload is valid; a failed meter
/// request just drops the reading.
async fn fetch_and_store(
    source: &dyn JsonSource,
    cache: &CacheStore,
    settings: &Settings,
    timeout: std::time::Duration,
) -> Result<Snapshot, FailureCause> {
    let inverter = Endpoint::inverter(settings, timeout);
    let meter = settings
        .show_power_draw
        .then(|| Endpoint::power_meter(settings, timeout));

    let (primary, secondary) = tokio::join!(source.get_json(&inverter), async {
        match &meter {
            Some(endpoint) => Some(source.get_json(endpoint).await),
            None => None,
        }
    });

    let dtu = primary.map_err(|e| FailureCause::from(&e))?;
    let power_draw = match secondary {
        Some(Ok(payload)) => Some(payload),
        Some(Err(e)) => {
            info!("power meter unavailable: {}", e);
            None
        }
        None => None,
    };

    let data = CachedData { dtu, power_draw };
    let widget = WidgetData::from_cached(&data, settings)
        .map_err(|e| FailureCause::UnexpectedResponse(e.to_string()))?;

    let fetched_at = Utc::now();
    let cache_write_failed = cache.save_at(&data, fetched_at).is_err();

    Ok(Snapshot {
        widget,
        as_of: fetched_at,
        origin: Origin::Network,
        cache_write_failed,
    })
}
