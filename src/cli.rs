//! Command-line interface definitions.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Settings that also live in the config file can be overridden here.

use clap::{Parser, ValueEnum};

/// Serialization format for the produced feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Rss,
    Json,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Rss => "xml",
            OutputFormat::Json => "json",
        }
    }
}

/// Command-line arguments.
///
/// # Examples
///
/// ```sh
/// # Ali213 news, RSS on stdout
/// awful_feed_routes ali213 news today
///
/// # Zodgame forum 13 as JSON into ./feeds
/// awful_feed_routes zodgame forum 13 --format json --output-dir ./feeds
///
/// # javdb with a query parameter
/// awful_feed_routes javdb rankings/movies --query p=daily --query limit=10
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Route name (see --list-routes)
    #[arg(required_unless_present = "list_routes")]
    pub route: Option<String>,

    /// Positional route parameters
    pub params: Vec<String>,

    /// Route query parameters as key=value
    #[arg(short, long = "query", value_parser = parse_key_value)]
    pub query: Vec<(String, String)>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "rss")]
    pub format: OutputFormat,

    /// Write the feed to `{dir}/{route}.{xml|json}` instead of stdout
    #[arg(short, long)]
    pub output_dir: Option<String>,

    /// Path to config.yaml
    #[arg(short, long, env = "AWFUL_FEEDS_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Override the cache TTL from the config file
    #[arg(long)]
    pub cache_ttl_secs: Option<u64>,

    /// Override detail-fetch concurrency from the config file
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Run the route this many times against the same cache
    #[arg(long, default_value_t = 1)]
    pub repeat: usize,

    /// List the available routes and exit
    #[arg(long)]
    pub list_routes: bool,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got `{s}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from([
            "awful_feed_routes",
            "zodgame",
            "forum",
            "13",
            "--format",
            "json",
            "--output-dir",
            "./feeds",
        ]);

        assert_eq!(cli.route.as_deref(), Some("zodgame"));
        assert_eq!(cli.params, vec!["forum", "13"]);
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.output_dir.as_deref(), Some("./feeds"));
        assert_eq!(cli.repeat, 1);
    }

    #[test]
    fn test_cli_query_pairs() {
        let cli = Cli::parse_from([
            "awful_feed_routes",
            "javdb",
            "-q",
            "domain=javdb36.com",
            "--query",
            "limit=5",
        ]);

        assert_eq!(
            cli.query,
            vec![
                ("domain".to_string(), "javdb36.com".to_string()),
                ("limit".to_string(), "5".to_string()),
            ]
        );
        assert_eq!(cli.format, OutputFormat::Rss);
    }

    #[test]
    fn test_cli_rejects_bad_query() {
        assert!(Cli::try_parse_from(["awful_feed_routes", "javdb", "-q", "nope"]).is_err());
    }

    #[test]
    fn test_list_routes_needs_no_route() {
        let cli = Cli::parse_from(["awful_feed_routes", "--list-routes"]);
        assert!(cli.list_routes);
        assert!(cli.route.is_none());
    }
}
