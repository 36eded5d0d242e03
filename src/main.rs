//! # Awful Feed Routes
//!
//! Turns sites without usable feeds (HTML listings, JSONP endpoints,
//! undocumented mobile APIs, browser-only boards) into RSS or JSON feeds.
//!
//! ## Features
//!
//! - Nine site routes: Ali213, Gamersky, cnjxol, Nikkei (Chinese edition),
//!   JavDB, Sukebei, OneJAV, ZodGame and x1080x
//! - A process-wide single-flight cache: concurrent requests for the same item
//!   share one upstream fetch, and results are reused until they expire
//! - Bounded-concurrency detail fetching with per-item timeouts and a
//!   per-route strict or lenient failure policy
//! - Cookie-cloud sync for routes that need a logged-in session
//! - WebDriver-backed pages for sites behind JavaScript challenges
//!
//! ## Usage
//!
//! ```sh
//! awful_feed_routes zodgame forum 13 -o ./feeds
//! awful_feed_routes --list-routes
//! ```
//!
//! Exits with 2 when the request or configuration is rejected (unknown route,
//! bad parameter, missing setting) and 1 on upstream or other failures.
//!
//! ## Architecture
//!
//! Every route runs the same pipeline:
//! 1. **Listing**: fetch the index page and parse item stubs
//! 2. **Enrichment**: fetch each stub's detail through the cache
//! 3. **Output**: dedupe, wrap in a feed envelope and write RSS or JSON

use clap::Parser;
use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod backoff;
mod browser;
mod cache;
mod cli;
mod config;
mod cookie_cloud;
mod cookies;
mod enrich;
mod error;
mod http;
mod models;
mod outputs;
mod render;
mod routes;
mod utils;

use cli::Cli;
use config::Config;
use routes::{RouteContext, RouteParams};
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();

    // Parse CLI
    let args = Cli::parse();
    debug!(?args.route, ?args.params, ?args.format, "Parsed CLI arguments");

    if args.list_routes {
        for route in routes::registry() {
            println!("{}\n  {}\n", route.name(), route.describe().replace('\n', "\n  "));
        }
        return Ok(ExitCode::SUCCESS);
    }

    // ---- Load config ----
    let mut config = match Config::load(&args.config).await {
        Ok(config) => config,
        Err(e) => {
            error!(path = %args.config, error = %e, "Failed to load configuration");
            return Ok(ExitCode::from(e.exit_status()));
        }
    };
    if let Some(ttl) = args.cache_ttl_secs {
        config.cache.ttl_secs = ttl;
    }
    if let Some(concurrency) = args.concurrency {
        config.enrich.concurrency = concurrency.max(1);
    }
    let sweep_every = Duration::from_secs(config.cache.sweep_interval_secs.max(1));

    let ctx = RouteContext::new(config)?;
    let _sweeper = ctx.cache.spawn_sweeper(sweep_every);

    let name = args.route.as_deref().unwrap_or_default();
    let Some(route) = routes::find(name) else {
        let e = error::Error::InvalidParameter(format!("unknown route `{name}`"));
        warn!(route = %name, "Unknown route (see --list-routes)");
        return Ok(ExitCode::from(e.exit_status()));
    };
    let params = RouteParams::new(args.params.clone(), args.query.clone());

    // Early check: ensure output dir is writable
    if let Some(dir) = &args.output_dir {
        if let Err(e) = ensure_writable_dir(dir).await {
            error!(
                path = %dir,
                error = %e,
                "Output directory is not writable (fix perms or choose a different path)"
            );
            return Err(e.into());
        }
    }

    // ---- Run the route ----
    let mut feed = None;
    for run in 1..=args.repeat.max(1) {
        let t0 = std::time::Instant::now();
        match routes::run(Arc::clone(&route), &ctx, &params).await {
            Ok(result) => {
                info!(
                    run,
                    items = result.item.len(),
                    elapsed_ms = t0.elapsed().as_millis() as u64,
                    "Route finished"
                );
                feed = Some(result);
            }
            Err(e) if e.is_client_error() => {
                warn!(run, route = %name, error = %e, "Route rejected the request");
                return Ok(ExitCode::from(e.exit_status()));
            }
            Err(e) => {
                error!(run, route = %name, error = %e, "Route failed");
                return Err(e.into());
            }
        }
    }
    let stats = ctx.cache.stats();
    info!(
        hits = stats.hits,
        joins = stats.joins,
        misses = stats.misses,
        entries = stats.entries,
        "Cache stats"
    );

    // ---- Output ----
    if let Some(feed) = feed {
        outputs::write_feed(&feed, name, args.format, args.output_dir.as_deref()).await?;
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    Ok(ExitCode::SUCCESS)
}
