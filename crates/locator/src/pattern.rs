//! Loop-pattern inference from two sample locators.
//!
//! Given the locators of the 1st and 2nd item of a repeating list, find the
//! segment whose integer index advances between them. That segment is the
//! loop dimension; every other difference is noise. The index distance
//! between the two samples is the per-item stride.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::PatternError;
use crate::types::Locator;

static INDEX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(\d+)\]").expect("index regex"));

/// A learned per-item locator template.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocatorPattern {
    /// Absolute index of the loop segment in the first sample's segment
    /// list.
    pub segment_index: usize,

    /// The matched segment with its integer index replaced by a
    /// placeholder, kept for display and reports.
    pub template: String,

    /// Index value of the first item.
    pub start_index: i64,

    /// Index distance between consecutive items.
    pub step: i64,

    /// Set when the pattern came from the single-locator fallback rather
    /// than a confirmed increasing diff.
    pub low_confidence: bool,
}

impl LocatorPattern {
    /// Generate the locator for the k-th item (1-based) from a base
    /// locator that shares the learned shape.
    ///
    /// If the base locator's segment at the pattern position carries no
    /// integer index, the base is returned unchanged.
    pub fn generate(&self, base: &Locator, k: u32) -> Locator {
        let mut parts: Vec<String> = base.segments().iter().map(|s| s.to_string()).collect();
        if parts.len() > self.segment_index {
            let target = self.start_index + (i64::from(k) - 1) * self.step;
            let segment = &parts[self.segment_index];
            if INDEX_RE.is_match(segment) {
                let replaced = INDEX_RE
                    .replace(segment, format!("[{target}]").as_str())
                    .into_owned();
                parts[self.segment_index] = replaced;
                return Locator::from_segments(&parts);
            }
        }
        base.clone()
    }

    /// Derive a pattern from a single locator by treating its last indexed
    /// segment as the loop dimension. Used when no second reference is
    /// available.
    pub fn from_single(locator: &Locator) -> Result<Self, PatternError> {
        let parts = locator.segments();
        let mut found = None;
        for (i, part) in parts.iter().enumerate() {
            if let Some(caps) = INDEX_RE.captures(part) {
                let value: i64 = caps[1].parse().unwrap_or(1);
                found = Some((i, part.to_string(), value));
            }
        }
        match found {
            Some((segment_index, segment, start_index)) => Ok(Self {
                segment_index,
                template: placeholder_template(&segment),
                start_index,
                step: 1,
                low_confidence: true,
            }),
            None => Err(PatternError::NoIndexableSegment(
                locator.as_str().to_string(),
            )),
        }
    }
}

/// Learns patterns against a shared second reference locator.
///
/// Each field has its own base locator; the diff is recomputed per field so
/// that `generate(pattern, 1)` always reproduces the field's own base.
#[derive(Clone, Debug)]
pub struct PatternLearner {
    reference: Locator,
}

impl PatternLearner {
    pub fn new(reference: Locator) -> Self {
        Self { reference }
    }

    pub fn learn_for(&self, base: &Locator) -> Result<LocatorPattern, PatternError> {
        learn(base, &self.reference)
    }
}

/// Infer a [`LocatorPattern`] from two locators believed to reference the
/// 1st and 2nd item of the same list.
pub fn learn(first: &Locator, second: &Locator) -> Result<LocatorPattern, PatternError> {
    if first.as_str() == second.as_str() {
        return Err(PatternError::IdenticalInputs);
    }

    let parts1 = first.segments();
    let parts2 = second.segments();

    // Unequal depth: align from the tail and compare the overlapping
    // suffix only.
    let min_len = parts1.len().min(parts2.len());
    let offset1 = parts1.len() - min_len;
    let offset2 = parts2.len() - min_len;
    if parts1.len() != parts2.len() {
        debug!(
            first_depth = parts1.len(),
            second_depth = parts2.len(),
            "reference locators differ in depth, aligning last {min_len} segments"
        );
    }

    let mut qualifying: Vec<(usize, i64, i64)> = Vec::new();
    for i in 0..min_len {
        let a = parts1[offset1 + i];
        let b = parts2[offset2 + i];
        if a == b {
            continue;
        }
        let idx_a = INDEX_RE.captures(a).and_then(|c| c[1].parse::<i64>().ok());
        let idx_b = INDEX_RE.captures(b).and_then(|c| c[1].parse::<i64>().ok());
        if let (Some(idx_a), Some(idx_b)) = (idx_a, idx_b) {
            if idx_b > idx_a {
                qualifying.push((offset1 + i, idx_a, idx_b));
            }
        }
    }

    if let Some(&(segment_index, start_index, next_index)) = qualifying.first() {
        // Leftmost wins: inner indices vary for unrelated reasons, the
        // outermost repeating container is the loop dimension.
        if qualifying.len() > 1 {
            debug!(
                candidates = qualifying.len(),
                "multiple increasing index diffs, keeping leftmost"
            );
        }
        let segment = parts1[segment_index].to_string();
        debug!(
            segment_index,
            start_index, next_index, "learned locator pattern from reference pair"
        );
        return Ok(LocatorPattern {
            segment_index,
            template: placeholder_template(&segment),
            start_index,
            step: next_index - start_index,
            low_confidence: false,
        });
    }

    // No confirmed increasing index: fall back to the rightmost indexed
    // segment of the first locator and flag the result.
    warn!(
        first = first.as_str(),
        second = second.as_str(),
        "no increasing index diff between references, falling back to rightmost index"
    );
    LocatorPattern::from_single(first)
}

fn placeholder_template(segment: &str) -> String {
    INDEX_RE.replace(segment, "[{}]").into_owned()
}
