//! Per-field screen-coordinate cache.
//!
//! Every successful click records where on screen it landed, together with
//! the page scroll position at the time. When locator-based resolution
//! fails during a retry episode, the cached point (adjusted for any scroll
//! delta since it was saved) stands in for the element. Entries age out and
//! are bounds-checked so stale or implausible coordinates never reach the
//! pointer.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

const CACHE_VERSION: &str = "1.0";

#[derive(Debug, Error)]
pub enum CoordCacheError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// One field's last-good coordinates.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoordinateEntry {
    pub screen_x: i32,
    pub screen_y: i32,
    pub offset_x: i32,
    pub offset_y: i32,

    /// Vertical page scroll at save time; reuse compensates against the
    /// current scroll position.
    pub scroll_reference_y: f64,

    pub success_count: u32,
    pub last_success: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Validity rules applied on read.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinateValidity {
    /// Maximum entry age in seconds.
    pub max_age_secs: i64,

    pub min_success_count: u32,

    /// Plausible screen bounds; anything outside is treated as garbage.
    pub max_screen_x: i32,
    pub max_screen_y: i32,
}

impl Default for CoordinateValidity {
    fn default() -> Self {
        Self {
            max_age_secs: 24 * 3600,
            min_success_count: 1,
            max_screen_x: 3840,
            max_screen_y: 2160,
        }
    }
}

impl CoordinateValidity {
    fn is_valid(&self, entry: &CoordinateEntry, now: DateTime<Utc>) -> bool {
        if entry.success_count < self.min_success_count {
            return false;
        }
        if now - entry.last_success > Duration::seconds(self.max_age_secs) {
            return false;
        }
        let (x, y) = (entry.screen_x, entry.screen_y);
        if x < 0 || y < 0 || x > self.max_screen_x || y > self.max_screen_y {
            return false;
        }
        true
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct CacheFile {
    cache_version: String,
    last_updated: DateTime<Utc>,
    coordinates: BTreeMap<String, CoordinateEntry>,
}

impl Default for CacheFile {
    fn default() -> Self {
        Self {
            cache_version: CACHE_VERSION.to_string(),
            last_updated: Utc::now(),
            coordinates: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct CacheStatistics {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Coordinate cache with optional file persistence.
pub struct CoordinateCache {
    path: Option<PathBuf>,
    validity: CoordinateValidity,
    inner: Mutex<CacheFile>,
}

impl CoordinateCache {
    /// Load the cache from disk, falling back to an empty cache when the
    /// file is missing or unreadable.
    pub fn load<P: AsRef<Path>>(path: P, validity: CoordinateValidity) -> Self {
        let path = path.as_ref().to_path_buf();
        let inner = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<CacheFile>(&raw) {
                Ok(file) => {
                    info!(
                        entries = file.coordinates.len(),
                        path = %path.display(),
                        "coordinate cache loaded"
                    );
                    file
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "coordinate cache unreadable, starting empty");
                    CacheFile::default()
                }
            },
            Err(_) => CacheFile::default(),
        };
        Self {
            path: Some(path),
            validity,
            inner: Mutex::new(inner),
        }
    }

    /// In-memory cache, no persistence. Used by tests and dry runs.
    pub fn in_memory(validity: CoordinateValidity) -> Self {
        Self {
            path: None,
            validity,
            inner: Mutex::new(CacheFile::default()),
        }
    }

    /// Record a successful click. Called unconditionally on success, not
    /// only during retries, so the cache always carries the freshest
    /// coordinates.
    pub fn save(
        &self,
        field: &str,
        screen_x: i32,
        screen_y: i32,
        offset_x: i32,
        offset_y: i32,
        scroll_reference_y: f64,
    ) -> Result<(), CoordCacheError> {
        let now = Utc::now();
        {
            let mut inner = self.inner.lock();
            let entry = inner
                .coordinates
                .entry(field.to_string())
                .or_insert_with(|| CoordinateEntry {
                    screen_x,
                    screen_y,
                    offset_x,
                    offset_y,
                    scroll_reference_y,
                    success_count: 0,
                    last_success: now,
                    created_at: now,
                });
            entry.screen_x = screen_x;
            entry.screen_y = screen_y;
            entry.offset_x = offset_x;
            entry.offset_y = offset_y;
            entry.scroll_reference_y = scroll_reference_y;
            entry.success_count = entry.success_count.saturating_add(1);
            entry.last_success = now;
            inner.last_updated = now;
        }
        debug!(field, screen_x, screen_y, "coordinate saved");
        self.persist()
    }

    /// Valid entry for a field, or `None` if absent, expired or
    /// implausible.
    pub fn get(&self, field: &str) -> Option<CoordinateEntry> {
        let inner = self.inner.lock();
        let entry = inner.coordinates.get(field)?;
        if self.validity.is_valid(entry, Utc::now()) {
            Some(entry.clone())
        } else {
            debug!(field, "cached coordinate expired or invalid");
            None
        }
    }

    /// Screen point for a field adjusted for the vertical scroll delta
    /// observed since the entry was saved.
    pub fn adjusted_point(&self, field: &str, current_scroll_y: f64) -> Option<(i32, i32)> {
        let entry = self.get(field)?;
        let delta = current_scroll_y - entry.scroll_reference_y;
        let adjusted_y = entry.screen_y - delta.round() as i32;
        Some((entry.screen_x, adjusted_y))
    }

    /// Drop entries that no longer pass validity; returns how many were
    /// removed.
    pub fn sweep_expired(&self) -> Result<usize, CoordCacheError> {
        let removed = {
            let mut inner = self.inner.lock();
            let now = Utc::now();
            let before = inner.coordinates.len();
            let validity = self.validity.clone();
            inner.coordinates.retain(|_, entry| validity.is_valid(entry, now));
            before - inner.coordinates.len()
        };
        if removed > 0 {
            info!(removed, "expired coordinates swept");
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn statistics(&self) -> CacheStatistics {
        let inner = self.inner.lock();
        let now = Utc::now();
        let total = inner.coordinates.len();
        let valid = inner
            .coordinates
            .values()
            .filter(|entry| self.validity.is_valid(entry, now))
            .count();
        CacheStatistics {
            total_entries: total,
            valid_entries: valid,
            expired_entries: total - valid,
            last_updated: Some(inner.last_updated),
        }
    }

    /// Clear all entries.
    pub fn reset(&self) -> Result<(), CoordCacheError> {
        {
            let mut inner = self.inner.lock();
            *inner = CacheFile::default();
        }
        self.persist()
    }

    fn persist(&self) -> Result<(), CoordCacheError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let inner = self.inner.lock();
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &*inner)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache() -> CoordinateCache {
        CoordinateCache::in_memory(CoordinateValidity::default())
    }

    #[test]
    fn save_then_get_roundtrip() {
        let cache = cache();
        cache.save("ship_info", 640, 400, 0, -4, 120.0).unwrap();
        let entry = cache.get("ship_info").unwrap();
        assert_eq!(entry.screen_x, 640);
        assert_eq!(entry.success_count, 1);

        cache.save("ship_info", 642, 404, 0, -4, 130.0).unwrap();
        let entry = cache.get("ship_info").unwrap();
        assert_eq!(entry.screen_x, 642);
        assert_eq!(entry.success_count, 2);
    }

    #[test]
    fn entries_outside_screen_bounds_invalid() {
        let cache = cache();
        cache.save("weird", 9000, 300, 0, 0, 0.0).unwrap();
        assert!(cache.get("weird").is_none());
    }

    #[test]
    fn aged_entries_invalid_even_with_high_success_count() {
        let cache = CoordinateCache::in_memory(CoordinateValidity {
            max_age_secs: 0,
            ..CoordinateValidity::default()
        });
        for _ in 0..10 {
            cache.save("order_no", 300, 200, 0, 0, 0.0).unwrap();
        }
        // max_age 0: anything older than "now" is expired.
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(cache.get("order_no").is_none());
    }

    #[test]
    fn scroll_delta_compensation() {
        let cache = cache();
        cache.save("ship_info", 640, 500, 0, 0, 100.0).unwrap();
        // Page scrolled 150px further down since the save; the element
        // moved up on screen by the same amount.
        let (x, y) = cache.adjusted_point("ship_info", 250.0).unwrap();
        assert_eq!((x, y), (640, 350));
    }

    #[test]
    fn sweep_reports_removed_count() {
        let cache = CoordinateCache::in_memory(CoordinateValidity {
            max_screen_x: 100,
            ..CoordinateValidity::default()
        });
        cache.save("ok", 50, 50, 0, 0, 0.0).unwrap();
        cache.save("bad", 500, 50, 0, 0, 0.0).unwrap();
        assert_eq!(cache.sweep_expired().unwrap(), 1);
        assert_eq!(cache.statistics().total_entries, 1);
    }

    #[test]
    fn persists_across_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("coordinate_cache.json");
        {
            let cache = CoordinateCache::load(&path, CoordinateValidity::default());
            cache.save("order_no", 320, 240, 2, 3, 80.0).unwrap();
        }
        let reloaded = CoordinateCache::load(&path, CoordinateValidity::default());
        let entry = reloaded.get("order_no").unwrap();
        assert_eq!(entry.offset_y, 3);
        assert_eq!(entry.scroll_reference_y, 80.0);
    }
}
