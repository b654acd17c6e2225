//! Hierarchical region directory: province → district → location.
//!
//! Built once at startup, either from the snapshot file or by crawling the
//! directory page and every province page, then shared read-only behind an
//! `Arc`. Children are keyed by the transliterated name.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, OnceLock};

use common::{Error, Location, Result, SourceAdapter, Transliterator};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

const CITY_BLOCK_START: &str = r#"<div class="conMidtab3">"#;
const CITY_BLOCK_END: &str = "</div>";
/// Link text of the per-row detail column.
const PLACEHOLDER: &str = "详情";
const MAX_SEGMENTS: usize = 3;

static PROVINCE_LINK: OnceLock<Regex> = OnceLock::new();
static LOCATION_LINK: OnceLock<Regex> = OnceLock::new();
static HAN_RUN: OnceLock<Regex> = OnceLock::new();

fn province_link() -> &'static Regex {
    PROVINCE_LINK.get_or_init(|| {
        Regex::new(r#"(/textFC/[a-z-]{3,20}\.shtml)"[^>]*>(\p{Han}+)<"#)
            .expect("static pattern compiles")
    })
}

fn location_link() -> &'static Regex {
    LOCATION_LINK.get_or_init(|| {
        Regex::new(r#"(/weather/([0-9]{6,12})\.shtml)"[^>]*>(\p{Han}+)<"#)
            .expect("static pattern compiles")
    })
}

fn han_run() -> &'static Regex {
    HAN_RUN.get_or_init(|| Regex::new(r"\p{Han}+").expect("static pattern compiles"))
}

/// Index key for a name: its transliteration, or the lower-cased input when
/// the transliteration is empty (already-latin input).
pub fn key_for(translit: &dyn Transliterator, name: &str) -> String {
    let key = translit.ascii_key(name);
    if key.is_empty() {
        name.trim().to_lowercase()
    } else {
        key
    }
}

/// One node of the directory tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationNode {
    pub name: String,
    pub ascii_key: String,
    pub full_path: String,
    pub ascii_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub locator: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, LocationNode>,
}

impl LocationNode {
    fn child(parent: &LocationNode, name: &str, ascii_key: String) -> Self {
        Self {
            name: name.to_string(),
            full_path: format!("{},{}", parent.full_path, name),
            ascii_path: format!("{},{}", parent.ascii_path, ascii_key),
            ascii_key,
            ..Default::default()
        }
    }

    pub fn to_location(&self) -> Location {
        Location {
            name: self.name.clone(),
            full_path: self.full_path.clone(),
            ascii_path: self.ascii_path.clone(),
            code: self.code.clone(),
            locator: self.locator.clone(),
        }
    }

    fn entry(&self) -> CityEntry {
        CityEntry {
            name: self.full_path.clone(),
            spell: self.ascii_path.clone(),
        }
    }
}

/// One row of a city listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CityEntry {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Spell")]
    pub spell: String,
}

/// Listing grouped by province key (or `province,district` key).
pub type CityListing = BTreeMap<String, Vec<CityEntry>>;

/// `(name, locator)` of every province linked from the directory page.
pub fn parse_directory(html: &str) -> Vec<(String, String)> {
    let mut seen = Vec::<String>::new();
    let mut out = Vec::new();
    for caps in province_link().captures_iter(html) {
        let locator = caps[1].to_string();
        if seen.contains(&locator) {
            continue;
        }
        seen.push(locator.clone());
        out.push((caps[2].to_string(), locator));
    }
    out
}

/// Fill `province` with the district blocks of its page.
///
/// A district name seen twice ends parsing: the page repeats its first
/// table further down for the next day's outlook.
pub fn parse_province(province: &mut LocationNode, html: &str, translit: &dyn Transliterator) {
    for (start, _) in html.match_indices(CITY_BLOCK_START) {
        let rest = &html[start..];
        let block = match rest[CITY_BLOCK_START.len()..].find(CITY_BLOCK_END) {
            Some(end) => &rest[..CITY_BLOCK_START.len() + end],
            None => rest,
        };
        let Some(district_name) = han_run().find(block).map(|m| m.as_str()) else {
            continue;
        };
        let district_key = key_for(translit, district_name);
        if province.children.contains_key(&district_key) {
            break;
        }

        let mut district = LocationNode::child(province, district_name, district_key.clone());
        for caps in location_link().captures_iter(block) {
            let name = &caps[3];
            if name == PLACEHOLDER {
                continue;
            }
            let key = key_for(translit, name);
            let mut leaf = LocationNode::child(&district, name, key.clone());
            leaf.locator = caps[1].to_string();
            leaf.code = caps[2].to_string();
            district.children.entry(key).or_insert(leaf);
        }
        province.children.insert(district_key, district);
    }

    // A province named after its capital district takes the capital's code.
    let own = &province.ascii_key;
    let capital_code = province
        .children
        .get(own)
        .and_then(|district| district.children.get(own))
        .map(|leaf| leaf.code.clone());
    if let Some(code) = capital_code {
        province.code = code;
    }
}

/// Immutable region tree plus a code lookup table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionIndex {
    provinces: BTreeMap<String, LocationNode>,
    #[serde(skip)]
    by_code: HashMap<String, Location>,
}

impl RegionIndex {
    pub fn from_provinces(provinces: BTreeMap<String, LocationNode>) -> Self {
        let mut index = Self {
            provinces,
            by_code: HashMap::new(),
        };
        index.reindex();
        index
    }

    fn reindex(&mut self) {
        self.by_code.clear();
        for province in self.provinces.values() {
            for district in province.children.values() {
                for leaf in district.children.values() {
                    if !leaf.code.is_empty() && !leaf.locator.is_empty() {
                        self.by_code
                            .entry(leaf.code.clone())
                            .or_insert_with(|| leaf.to_location());
                    }
                }
            }
        }
    }

    pub fn province_count(&self) -> usize {
        self.provinces.len()
    }

    pub fn location_count(&self) -> usize {
        self.by_code.len()
    }

    /// Crawl the directory page and every province page it links.
    ///
    /// Province pages are fetched concurrently, at most `concurrency` at a
    /// time; the index is returned only after every fetch has finished. A
    /// province whose page fails is kept without districts.
    pub async fn build(
        adapter: Arc<dyn SourceAdapter>,
        translit: Arc<dyn Transliterator>,
        directory: &str,
        concurrency: usize,
    ) -> Result<Self> {
        let html = adapter.fetch_page(directory).await?;
        let entries = parse_directory(&html);
        info!("Region directory lists {} provinces", entries.len());

        let permits = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for (name, locator) in entries {
            let adapter = adapter.clone();
            let translit = translit.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let ascii_key = key_for(translit.as_ref(), &name);
                let mut province = LocationNode {
                    full_path: name.clone(),
                    ascii_path: ascii_key.clone(),
                    name,
                    ascii_key,
                    locator,
                    ..Default::default()
                };
                let Ok(_permit) = permits.acquire_owned().await else {
                    return province;
                };
                match adapter.fetch_page(&province.locator).await {
                    Ok(page) => parse_province(&mut province, &page, translit.as_ref()),
                    Err(e) => warn!("Province page {} failed: {}", province.locator, e),
                }
                debug!(
                    "Parsed {} with {} districts",
                    province.name,
                    province.children.len()
                );
                province
            });
        }

        let mut provinces = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(province) => {
                    provinces
                        .entry(province.ascii_key.clone())
                        .or_insert(province);
                }
                Err(e) => warn!("Province task failed: {}", e),
            }
        }

        if provinces.is_empty() {
            return Err(Error::EmptyResult(format!(
                "no provinces found at {}",
                directory
            )));
        }
        let index = Self::from_provinces(provinces);
        info!(
            "Region index built: {} provinces, {} locations",
            index.province_count(),
            index.location_count()
        );
        Ok(index)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)?;
        let mut index: RegionIndex = serde_json::from_slice(&raw)?;
        index.reindex();
        Ok(index)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_vec(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Load the snapshot at `path`, or build from the network and persist.
    pub async fn load_or_build(
        path: &Path,
        adapter: Arc<dyn SourceAdapter>,
        translit: Arc<dyn Transliterator>,
        directory: &str,
        concurrency: usize,
    ) -> Result<Self> {
        match Self::load(path) {
            Ok(index) if index.province_count() > 0 => {
                info!(
                    "Loaded region index from {} ({} provinces)",
                    path.display(),
                    index.province_count()
                );
                return Ok(index);
            }
            Ok(_) => warn!("Region snapshot {} is empty, rebuilding", path.display()),
            Err(e) => info!("No usable region snapshot at {} ({}), building", path.display(), e),
        }

        let index = Self::build(adapter, translit, directory, concurrency).await?;
        if let Err(e) = index.save(path) {
            warn!("Failed to persist region snapshot to {}: {}", path.display(), e);
        }
        Ok(index)
    }

    /// Resolve a comma-separated `province[,district[,location]]` path.
    ///
    /// An omitted district defaults to the province and an omitted location
    /// to the district, so `北京` means `北京,北京,北京`.
    pub fn resolve(&self, translit: &dyn Transliterator, path: &str) -> Result<Location> {
        let keys = path_keys(translit, path)?;
        let province = keys[0].clone();
        let mut district = keys.get(1).cloned().unwrap_or_default();
        let mut location = keys.get(2).cloned().unwrap_or_default();
        if district.is_empty() {
            district = province.clone();
            location = province.clone();
        }
        if location.is_empty() {
            location = district.clone();
        }

        let node = self
            .provinces
            .get(&province)
            .and_then(|p| p.children.get(&district))
            .and_then(|d| d.children.get(&location))
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        if node.code.is_empty() || node.locator.is_empty() {
            return Err(Error::NotFound(path.to_string()));
        }
        Ok(node.to_location())
    }

    pub fn find_by_code(&self, code: &str) -> Option<&Location> {
        self.by_code.get(code)
    }

    /// City listing: all provinces with their districts, one province's
    /// districts, or one district's locations.
    pub fn list(&self, translit: &dyn Transliterator, path: &str) -> Result<CityListing> {
        let mut listing = CityListing::new();
        if path.trim().is_empty() {
            for (key, province) in &self.provinces {
                listing.insert(
                    key.clone(),
                    province.children.values().map(LocationNode::entry).collect(),
                );
            }
            return Ok(listing);
        }

        let keys = path_keys(translit, path)?;
        let province = self
            .provinces
            .get(&keys[0])
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        match keys.as_slice() {
            [key] => {
                listing.insert(
                    key.clone(),
                    province.children.values().map(LocationNode::entry).collect(),
                );
            }
            [p, d] => {
                let district = province
                    .children
                    .get(d)
                    .ok_or_else(|| Error::NotFound(path.to_string()))?;
                listing.insert(
                    format!("{},{}", p, d),
                    district.children.values().map(LocationNode::entry).collect(),
                );
            }
            _ => {
                return Err(Error::BadParameter(format!(
                    "city listing takes at most two segments: {}",
                    path
                )))
            }
        }
        Ok(listing)
    }
}

/// Split a path into index keys. Empty inner segments are kept as empty keys.
fn path_keys(translit: &dyn Transliterator, path: &str) -> Result<Vec<String>> {
    let segments: Vec<&str> = path.split(',').map(str::trim).collect();
    if segments.len() > MAX_SEGMENTS {
        return Err(Error::BadParameter(format!(
            "at most {} path segments allowed: {}",
            MAX_SEGMENTS, path
        )));
    }
    if segments[0].is_empty() {
        return Err(Error::BadParameter("province is required".into()));
    }
    Ok(segments
        .into_iter()
        .map(|s| if s.is_empty() { String::new() } else { key_for(translit, s) })
        .collect())
}
