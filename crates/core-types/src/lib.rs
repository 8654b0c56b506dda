use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Shared error type carried across the collection crates.
#[derive(Debug, Error, Clone)]
pub enum HarvestError {
    #[error("{message}")]
    Message { message: String },
}

impl HarvestError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier parsed out of an order's on-page text.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Placeholder ids produced while the real id was still unknown must
    /// never be used as association keys.
    pub fn is_placeholder(&self) -> bool {
        let id = self.0.trim();
        id.is_empty() || id.starts_with("temp_order")
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a field operation does when its turn comes up.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldAction {
    /// Read and return the element's trimmed text.
    ReadText,
    /// Move the pointer to the element center and click.
    Click,
    /// Click, then wait for the clipboard to deliver fresh content.
    ClickAndCapture,
}

impl FieldAction {
    pub fn name(&self) -> &'static str {
        match self {
            FieldAction::ReadText => "read_text",
            FieldAction::Click => "click",
            FieldAction::ClickAndCapture => "click_and_capture",
        }
    }
}

/// Whether an operation repeats for every order or only runs once.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    Always,
    OnceOnFirstOrder,
}

/// One configured field operation. Produced by the collection setup step;
/// read-only for the duration of a run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationSpec {
    pub name: String,

    /// Structural path to the element for the first order.
    pub locator: String,

    pub action: FieldAction,

    #[serde(default = "default_loop_mode")]
    pub loop_mode: LoopMode,

    /// Execution position within one order; ascending.
    #[serde(default)]
    pub order: u32,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Marks the field whose text carries the total order count.
    #[serde(default)]
    pub is_order_count_source: bool,
}

fn default_loop_mode() -> LoopMode {
    LoopMode::Always
}

fn default_enabled() -> bool {
    true
}

impl OperationSpec {
    pub fn new(name: impl Into<String>, locator: impl Into<String>, action: FieldAction) -> Self {
        Self {
            name: name.into(),
            locator: locator.into(),
            action,
            loop_mode: LoopMode::Always,
            order: 0,
            enabled: true,
            is_order_count_source: false,
        }
    }

    pub fn with_order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }

    pub fn once_on_first_order(mut self) -> Self {
        self.loop_mode = LoopMode::OnceOnFirstOrder;
        self
    }

    pub fn as_order_count_source(mut self) -> Self {
        self.is_order_count_source = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// One collected order: field values keyed by operation name.
///
/// Built incrementally while the order's fields execute; committed to the
/// result set only when at least one field produced a value.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: Option<OrderId>,
    pub fields: BTreeMap<String, String>,
    pub sequence_index: u32,
    pub collected_at: DateTime<Utc>,
}

impl OrderRecord {
    pub fn new(sequence_index: u32) -> Self {
        Self {
            order_id: None,
            fields: BTreeMap::new(),
            sequence_index,
            collected_at: Utc::now(),
        }
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
