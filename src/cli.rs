//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "shipharvest",
    version,
    about = "Automated per-order shipping-record collection"
)]
pub struct Cli {
    /// Configuration file (TOML or JSON).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "shipharvest_engine=debug".
    #[arg(long, global = true, default_value = "info")]
    pub log: String,

    /// Also write daily-rotated log files into this directory.
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the collection loop against the scripted demo page.
    DryRun {
        /// Number of demo orders to collect.
        #[arg(short, long, default_value_t = 3)]
        orders: u32,

        /// Export the resulting report.
        #[arg(long)]
        export: bool,
    },

    /// Learn the locator pattern and print generated locators per field.
    Plan {
        /// How many orders to expand.
        #[arg(short, long, default_value_t = 5)]
        orders: u32,
    },

    /// Review clipboard associations flagged for manual attention.
    Review(ReviewArgs),

    /// Coordinate cache maintenance.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Score a text file as candidate shipping content.
    Score {
        /// File holding the candidate text.
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct ReviewArgs {
    /// List flagged associations.
    #[arg(long)]
    pub list: bool,

    /// Order id to act on.
    #[arg(long)]
    pub order_id: Option<String>,

    /// Confirm the stored content is correct.
    #[arg(long)]
    pub approve: bool,

    /// Replace the stored content.
    #[arg(long)]
    pub edit: Option<String>,

    /// Delete the association.
    #[arg(long)]
    pub delete: bool,
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show entry counts and freshness.
    Stats,
    /// Drop expired or implausible entries.
    Sweep,
    /// Clear every entry.
    Reset,
}
