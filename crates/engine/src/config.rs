//! Engine tuning knobs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Per-field pixel offset applied to the computed element center before
/// clicking.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct FieldOffset {
    pub x: i32,
    pub y: i32,
}

/// Optional page-advance configuration: instead of scrolling through one
/// long list, click a pager control every `orders_per_page` orders and
/// re-learn the locator pattern for the fresh page.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PagerConfig {
    pub next_page_locator: String,
    pub orders_per_page: u32,
}

/// All empirically-tuned loop behavior, configurable rather than baked in.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Delay before each click, in milliseconds.
    pub pre_click_delay_ms: u64,

    /// Delay between consecutive field operations.
    pub action_interval_ms: u64,

    /// Wait after an advance for the page to settle.
    pub advance_wait_ms: u64,

    /// Base pixel amount of one advance scroll.
    pub scroll_base_amount: f64,

    /// Extra scroll multiplier applied per consecutive duplicate.
    pub scroll_escalation_step: f64,

    /// Consecutive duplicates of the same order id before the run gives
    /// up.
    pub duplicate_streak_cutoff: u32,

    /// Clipboard capture wait.
    pub capture_timeout_ms: u64,
    pub capture_poll_ms: u64,
    pub capture_min_length: usize,
    pub capture_max_length: usize,

    /// The field whose click triggers the page's copy action. It receives
    /// exactly one click; every other clicked field gets one extra
    /// same-position click for robustness.
    pub capture_trigger_field: Option<String>,

    /// Field names whose text carries the order identifier.
    pub order_id_fields: Vec<String>,

    /// Per-field click offsets.
    pub offsets: HashMap<String, FieldOffset>,

    /// Cap the run to the first N orders (debug aid).
    pub order_limit: Option<u32>,

    pub pager: Option<PagerConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pre_click_delay_ms: 1200,
            action_interval_ms: 1000,
            advance_wait_ms: 1500,
            scroll_base_amount: 600.0,
            scroll_escalation_step: 0.8,
            duplicate_streak_cutoff: 3,
            capture_timeout_ms: 12_000,
            capture_poll_ms: 500,
            capture_min_length: 10,
            capture_max_length: 1000,
            capture_trigger_field: None,
            order_id_fields: vec![
                "订单编号".to_string(),
                "order_no".to_string(),
                "order_id".to_string(),
            ],
            offsets: HashMap::new(),
            order_limit: None,
            pager: None,
        }
    }
}

impl EngineConfig {
    /// Fast timings for tests and dry runs.
    pub fn fast() -> Self {
        Self {
            pre_click_delay_ms: 0,
            action_interval_ms: 0,
            advance_wait_ms: 0,
            capture_timeout_ms: 800,
            capture_poll_ms: 20,
            ..Self::default()
        }
    }

    pub fn is_order_id_field(&self, field_name: &str) -> bool {
        self.order_id_fields
            .iter()
            .any(|known| field_name == known || field_name.contains(known.as_str()))
    }

    pub fn is_capture_trigger(&self, field_name: &str) -> bool {
        self.capture_trigger_field
            .as_deref()
            .map(|trigger| trigger == field_name)
            .unwrap_or(false)
    }

    pub fn offset_for(&self, field_name: &str) -> FieldOffset {
        self.offsets.get(field_name).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_id_field_matches_by_containment() {
        let config = EngineConfig::default();
        assert!(config.is_order_id_field("order_no"));
        assert!(config.is_order_id_field("订单编号文本"));
        assert!(!config.is_order_id_field("ship_info"));
    }

    #[test]
    fn capture_trigger_requires_exact_name() {
        let config = EngineConfig {
            capture_trigger_field: Some("copy_ship_info".to_string()),
            ..EngineConfig::default()
        };
        assert!(config.is_capture_trigger("copy_ship_info"));
        assert!(!config.is_capture_trigger("copy_ship_info_2"));
    }
}
