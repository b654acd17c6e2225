//! Active weather warnings, keyed by location code.
//!
//! The whole map is replaced on every poll; a location whose warning was
//! lifted disappears as soon as the next poll lands.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::{Error, HazardRecord, Result, SourceAdapter};
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// `var alarminfo=` before the feed.
const FEED_PREFIX_LEN: usize = 14;
/// `;` after the feed.
const FEED_SUFFIX_LEN: usize = 1;
/// Characters dropped per ancestor step (location → district → province).
const ANCESTOR_STEPS: [usize; 3] = [0, 2, 4];

pub type HazardMap = HashMap<String, Vec<HazardRecord>>;

#[derive(Debug, Deserialize)]
struct HazardFeed {
    #[serde(default)]
    data: Vec<Vec<String>>,
}

/// Decode the wrapped alert feed into a code → records map.
///
/// Each row is `[name, file, lon, lat, code, code2]`; the key is the file
/// name's prefix before the first `-`.
pub fn decode_hazard_payload(raw: &[u8]) -> Result<HazardMap> {
    if raw.len() < FEED_PREFIX_LEN + FEED_SUFFIX_LEN {
        return Err(Error::DecodeFailure(format!(
            "alert feed too short: {} bytes",
            raw.len()
        )));
    }
    let body = &raw[FEED_PREFIX_LEN..raw.len() - FEED_SUFFIX_LEN];
    let feed: HazardFeed = serde_json::from_slice(body)
        .map_err(|e| Error::DecodeFailure(format!("alert feed: {}", e)))?;

    let mut map = HazardMap::new();
    for row in feed.data {
        let [name, file_name, longitude, latitude, code, code2] =
            match <[String; 6]>::try_from(row) {
                Ok(fields) => fields,
                Err(row) => {
                    debug!("Skipping alert row with {} fields", row.len());
                    continue;
                }
            };
        let key = file_name.split('-').next().unwrap_or_default().to_string();
        map.entry(key).or_default().push(HazardRecord {
            name,
            file_name,
            longitude,
            latitude,
            code,
            code2,
        });
    }
    Ok(map)
}

#[derive(Debug, Default)]
pub struct HazardIndex {
    entries: RwLock<HazardMap>,
}

impl HazardIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn replace(&self, map: HazardMap) {
        *self.entries.write().await = map;
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Records for `code`, falling back to its district and province codes.
    pub async fn lookup(&self, code: &str) -> Option<Vec<HazardRecord>> {
        let entries = self.entries.read().await;
        ANCESTOR_STEPS
            .iter()
            .filter_map(|&cut| code.len().checked_sub(cut).filter(|&n| n > 0))
            .filter_map(|n| code.get(..n))
            .find_map(|key| entries.get(key).filter(|records| !records.is_empty()))
            .cloned()
    }

    /// One poll: fetch, decode, replace. Returns the number of keyed locations.
    pub async fn refresh(&self, adapter: &dyn SourceAdapter) -> Result<usize> {
        let raw = adapter.fetch_hazard_list().await?;
        let map = decode_hazard_payload(&raw)?;
        let count = map.len();
        self.replace(map).await;
        Ok(count)
    }

    /// Poll every `period` until cancelled. The first failed poll ends the loop.
    pub async fn run_poller(
        self: Arc<Self>,
        adapter: Arc<dyn SourceAdapter>,
        period: Duration,
        cancel: CancellationToken,
    ) -> Result<()> {
        loop {
            match self.refresh(adapter.as_ref()).await {
                Ok(count) => info!("Hazard index refreshed: {} locations under warning", count),
                Err(e) => {
                    error!("Hazard poll failed, poller stopping: {}", e);
                    return Err(e);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Hazard poller cancelled");
                    return Ok(());
                }
                _ = tokio::time::sleep(period) => {}
            }
        }
    }
}
