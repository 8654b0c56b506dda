//! Association store: one reconciled clipboard content per order id.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use shipharvest_core_types::OrderId;
use tracing::{debug, info, warn};

use crate::errors::ClipboardError;
use crate::score::{score, ContentScore, ScoreLimits};

/// The link between an order id and its reconciled clipboard content.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClipboardAssociation {
    pub order_id: OrderId,
    pub content: String,
    pub confidence: i32,
    pub reason: String,
    pub needs_review: bool,
    pub updated_at: DateTime<Utc>,
}

/// What `associate` did with the offered content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssociateOutcome {
    /// First association for this order id.
    Stored { needs_review: bool },
    /// Offered content superseded the existing association.
    Replaced { needs_review: bool },
    /// Existing association won the conflict; nothing changed.
    KeptExisting,
    RejectedEmptyContent,
    RejectedMissingOrderId,
}

impl AssociateOutcome {
    pub fn accepted(&self) -> bool {
        matches!(
            self,
            AssociateOutcome::Stored { .. } | AssociateOutcome::Replaced { .. }
        )
    }
}

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    updated_at: DateTime<Utc>,
    associations: BTreeMap<String, ClipboardAssociation>,
}

/// Holds exactly one current association per order id. Superseding writes
/// go through the conflict-resolution rules; losers are dropped, but
/// invalid winners stay flagged for manual review instead of being
/// deleted.
pub struct AssociationStore {
    map: DashMap<String, ClipboardAssociation>,
    limits: ScoreLimits,
    path: Option<PathBuf>,
}

impl AssociationStore {
    pub fn new(limits: ScoreLimits) -> Self {
        Self {
            map: DashMap::new(),
            limits,
            path: None,
        }
    }

    /// Store with snapshot persistence at `path`.
    pub fn with_snapshot<P: AsRef<Path>>(limits: ScoreLimits, path: P) -> Self {
        Self {
            map: DashMap::new(),
            limits,
            path: Some(path.as_ref().to_path_buf()),
        }
    }

    /// Offer content for an order id and resolve against any existing
    /// association. Associating the same (id, content) twice in a row is
    /// idempotent.
    pub fn associate(&self, order_id: &OrderId, content: &str) -> AssociateOutcome {
        if content.trim().is_empty() {
            debug!(order_id = %order_id, "empty content rejected");
            return AssociateOutcome::RejectedEmptyContent;
        }
        if order_id.is_placeholder() {
            warn!("association rejected: missing or placeholder order id");
            return AssociateOutcome::RejectedMissingOrderId;
        }

        let verdict = score(content, &self.limits);
        let candidate = ClipboardAssociation {
            order_id: order_id.clone(),
            content: content.to_string(),
            confidence: verdict.confidence,
            reason: verdict.reason.clone(),
            needs_review: !verdict.valid,
            updated_at: Utc::now(),
        };

        let outcome = match self.map.get(&order_id.0) {
            None => {
                let needs_review = candidate.needs_review;
                self.map.insert(order_id.0.clone(), candidate);
                AssociateOutcome::Stored { needs_review }
            }
            Some(existing) => {
                if candidate.content == existing.content {
                    // Same content re-offered: nothing to resolve.
                    drop(existing);
                    return AssociateOutcome::KeptExisting;
                }
                // An approved or originally-valid entry counts as valid;
                // the review flag is the arbiter.
                let existing_valid = !existing.needs_review;
                let replace = prefer_candidate(&candidate, &verdict, &existing, existing_valid);
                drop(existing);
                if replace {
                    // Both invalid: the better of two bad options still
                    // needs a human look.
                    let mut winner = candidate;
                    if !verdict.valid {
                        winner.needs_review = true;
                    }
                    let needs_review = winner.needs_review;
                    self.map.insert(order_id.0.clone(), winner);
                    AssociateOutcome::Replaced { needs_review }
                } else {
                    if !verdict.valid && !existing_valid {
                        if let Some(mut entry) = self.map.get_mut(&order_id.0) {
                            entry.needs_review = true;
                        }
                        if let Err(err) = self.persist() {
                            warn!(error = %err, "association snapshot write failed");
                        }
                    }
                    AssociateOutcome::KeptExisting
                }
            }
        };

        if outcome.accepted() {
            info!(
                order_id = %order_id,
                confidence = verdict.confidence,
                valid = verdict.valid,
                "clipboard content associated"
            );
            if let Err(err) = self.persist() {
                warn!(error = %err, "association snapshot write failed");
            }
        }
        outcome
    }

    pub fn get(&self, order_id: &OrderId) -> Option<ClipboardAssociation> {
        self.map.get(&order_id.0).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// All associations, ordered by order id.
    pub fn snapshot(&self) -> Vec<ClipboardAssociation> {
        let mut all: Vec<ClipboardAssociation> =
            self.map.iter().map(|entry| entry.clone()).collect();
        all.sort_by(|a, b| a.order_id.0.cmp(&b.order_id.0));
        all
    }

    /// Associations flagged for manual review.
    pub fn review_queue(&self) -> Vec<ClipboardAssociation> {
        self.snapshot()
            .into_iter()
            .filter(|a| a.needs_review)
            .collect()
    }

    /// Operator confirmed the stored content is correct.
    pub fn approve(&self, order_id: &OrderId) -> bool {
        let updated = match self.map.get_mut(&order_id.0) {
            Some(mut entry) => {
                entry.needs_review = false;
                true
            }
            None => false,
        };
        if updated {
            let _ = self.persist();
        }
        updated
    }

    /// Operator replaced the stored content; the edit is trusted.
    pub fn edit(&self, order_id: &OrderId, new_content: &str) -> bool {
        if new_content.trim().is_empty() {
            return false;
        }
        let updated = match self.map.get_mut(&order_id.0) {
            Some(mut entry) => {
                let verdict: ContentScore = score(new_content, &self.limits);
                entry.content = new_content.to_string();
                entry.confidence = verdict.confidence;
                entry.reason = verdict.reason;
                entry.needs_review = false;
                entry.updated_at = Utc::now();
                true
            }
            None => false,
        };
        if updated {
            let _ = self.persist();
        }
        updated
    }

    /// Operator deleted the association entirely.
    pub fn remove(&self, order_id: &OrderId) -> bool {
        let removed = self.map.remove(&order_id.0).is_some();
        if removed {
            let _ = self.persist();
        }
        removed
    }

    /// Wipe everything at the start of a run: no association survives
    /// across runs.
    pub fn clear_for_new_run(&self) -> Result<(), ClipboardError> {
        self.map.clear();
        self.persist()
    }

    /// Drop stored associations that no longer pass scoring (over-long or
    /// invalid content that slipped in). Returns how many were removed.
    pub fn clean_invalid(&self) -> Result<usize, ClipboardError> {
        let before = self.map.len();
        let limits = self.limits;
        self.map
            .retain(|_, assoc| score(&assoc.content, &limits).valid);
        let removed = before - self.map.len();
        if removed > 0 {
            info!(removed, "invalid associations cleaned");
            self.persist()?;
        }
        Ok(removed)
    }

    /// Load a previously persisted snapshot, merging into the current map.
    pub fn load(&self) -> Result<usize, ClipboardError> {
        let Some(path) = &self.path else {
            return Ok(0);
        };
        if !path.exists() {
            return Ok(0);
        }
        let raw = std::fs::read_to_string(path)?;
        let snapshot: SnapshotFile = serde_json::from_str(&raw)?;
        let count = snapshot.associations.len();
        for (key, assoc) in snapshot.associations {
            self.map.insert(key, assoc);
        }
        info!(count, "association snapshot loaded");
        Ok(count)
    }

    fn persist(&self) -> Result<(), ClipboardError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = SnapshotFile {
            updated_at: Utc::now(),
            associations: self
                .map
                .iter()
                .map(|entry| (entry.key().clone(), entry.clone()))
                .collect(),
        };
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &snapshot)?;
        writer.flush()?;
        Ok(())
    }
}

/// Conflict resolution: prefer the valid one; both valid → higher
/// confidence, near-ties (< 10 apart) prefer the longer text; both invalid
/// → same rule picks the better of two bad options.
fn prefer_candidate(
    candidate: &ClipboardAssociation,
    candidate_score: &ContentScore,
    existing: &ClipboardAssociation,
    existing_valid: bool,
) -> bool {
    match (candidate_score.valid, existing_valid) {
        (true, false) => true,
        (false, true) => false,
        _ => {
            if (candidate.confidence - existing.confidence).abs() < 10 {
                candidate.content.chars().count() > existing.content.chars().count()
            } else {
                candidate.confidence > existing.confidence
            }
        }
    }
}
