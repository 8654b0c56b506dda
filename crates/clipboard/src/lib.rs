//! Clipboard reconciliation.
//!
//! The system clipboard is an asynchronous, unreliable channel: the page
//! writes shipping content into it some time after a copy trigger is
//! clicked, other software may write unrelated text, and a capture can
//! silently fail. This crate owns that channel end to end: waiting for a
//! post-click update, scoring candidate text for plausibility as shipping
//! content, and associating the winner with the order being processed
//! under explicit conflict-resolution rules. Nothing is discarded —
//! content that fails scoring is stored flagged for manual review.

pub mod errors;
pub mod monitor;
pub mod ports;
pub mod reconciler;
pub mod score;
pub mod store;

pub use errors::ClipboardError;
pub use monitor::{ClipboardMonitor, CurrentOrderCell};
pub use ports::{ClipboardPort, MemoryClipboard};
pub use reconciler::{AwaitOptions, ClipboardReconciler};
pub use score::{score, ContentScore, ScoreLimits};
pub use store::{AssociateOutcome, AssociationStore, ClipboardAssociation};
