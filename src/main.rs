use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use shipharvest_cli::cli::{CacheAction, Cli, Command};
use shipharvest_cli::{app, export, HarvestConfig};
use shipharvest_coord_cache::CoordinateCache;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log.clone()));
    // The non-blocking writer guard must outlive main.
    let _log_guard = match &cli.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "shipharvest.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    };

    let config = HarvestConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::DryRun { orders, export: do_export } => {
            let report = app::dry_run(orders).await?;
            println!(
                "collected {}/{} orders ({} associations, {} flagged for review)",
                report.summary.orders_committed,
                report.summary.orders_requested,
                report.associations.len(),
                report.review_pending(),
            );
            if do_export {
                let (json, csv) = export::write_report(&report, &config.paths.export_dir)?;
                println!("report: {}", json.display());
                println!("records: {}", csv.display());
            }
        }

        Command::Plan { orders } => {
            for field_plan in app::plan(&config, orders)? {
                println!(
                    "{} (start {}, step {}{})",
                    field_plan.field,
                    field_plan.pattern.start_index,
                    field_plan.pattern.step,
                    if field_plan.pattern.low_confidence {
                        ", low confidence"
                    } else {
                        ""
                    }
                );
                for (k, locator) in field_plan.locators.iter().enumerate() {
                    println!("  #{} {}", k + 1, locator);
                }
            }
        }

        Command::Review(args) => {
            let store = app::open_association_store(&config)?;
            if args.list || args.order_id.is_none() {
                let queue = store.review_queue();
                if queue.is_empty() {
                    println!("nothing flagged for review");
                }
                for assoc in queue {
                    println!(
                        "{}  confidence {:>3}  {}",
                        assoc.order_id,
                        assoc.confidence,
                        assoc.content.lines().next().unwrap_or_default()
                    );
                }
            } else if let Some(order_id) = args.order_id {
                let message = app::review_action(
                    &store,
                    &order_id,
                    args.approve,
                    args.edit.as_deref(),
                    args.delete,
                )?;
                println!("{message}");
            }
        }

        Command::Cache { action } => {
            let cache = CoordinateCache::load(
                &config.paths.coordinate_cache_file,
                config.coordinate_validity.clone(),
            );
            match action {
                CacheAction::Stats => {
                    let stats = cache.statistics();
                    println!(
                        "{} entries ({} valid, {} expired)",
                        stats.total_entries, stats.valid_entries, stats.expired_entries
                    );
                }
                CacheAction::Sweep => {
                    let removed = cache.sweep_expired()?;
                    println!("{removed} expired entries removed");
                }
                CacheAction::Reset => {
                    cache.reset()?;
                    println!("coordinate cache cleared");
                }
            }
        }

        Command::Score { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let result = app::score_text(&text, config.score_limits);
            println!(
                "{} (confidence {}): {}",
                if result.valid { "valid" } else { "invalid" },
                result.confidence,
                result.reason
            );
        }
    }

    Ok(())
}
