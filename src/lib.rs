//! shipharvest — automated per-order shipping-record collection.
//!
//! The binary wires the collection crates together: configuration,
//! logging, the dry-run harness, the association review workflow and the
//! export handoff. Live collection additionally needs platform adapters
//! for the page, pointer, clipboard and capture ports; everything above
//! those seams lives here and in the `crates/` members.

pub mod app;
pub mod cli;
pub mod config;
pub mod export;

pub use config::HarvestConfig;
