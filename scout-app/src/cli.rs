use clap::{ArgGroup, Parser, ValueEnum};
use scout_common::ScoutError;
use scout_config::{ExportFormat, ScoutConfig};
use scout_web::search::SeedList;
use std::path::PathBuf;

/// Find storefronts and collect their public contact details.
///
/// Exit codes: 0 run completed (partial results included), 1 startup or
/// configuration error, 2 discovery failed before any store was found,
/// 3 the results file could not be written.
#[derive(Parser, Debug)]
#[command(name = "storefront-scout", version)]
#[command(group(
    ArgGroup::new("source")
        .required(true)
        .multiple(true)
        .args(["query", "country", "urls", "url_file"])
))]
pub struct Cli {
    /// Raw search query, used instead of the generated `site:` query
    #[arg(long)]
    pub query: Option<String>,

    /// Country or region to look for in store pages
    #[arg(long)]
    pub country: Option<String>,

    /// Visit these store URLs instead of searching
    #[arg(long, num_args = 1.., value_name = "URL")]
    pub urls: Vec<String>,

    /// File with one store URL per line (`#` starts a comment)
    #[arg(long, value_name = "PATH")]
    pub url_file: Option<PathBuf>,

    /// Platform domain for the `site:` operator and result filtering
    #[arg(long, value_name = "DOMAIN")]
    pub site: Option<String>,

    /// Maximum number of stores in the output
    #[arg(long, value_name = "N")]
    pub max_results: Option<usize>,

    /// Minimum delay between page loads, in seconds
    #[arg(long, value_name = "SECS", value_parser = parse_delay)]
    pub delay: Option<f64>,

    /// Show the browser window
    #[arg(long)]
    pub no_headless: bool,

    /// Output path; the extension follows the format
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub format: Option<FormatArg>,

    /// YAML configuration file
    #[arg(long, env = "SCOUT_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[arg(long, value_name = "URL")]
    pub webdriver_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Csv,
    Json,
    Both,
}

impl From<FormatArg> for ExportFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Csv => ExportFormat::Csv,
            FormatArg::Json => ExportFormat::Json,
            FormatArg::Both => ExportFormat::Both,
        }
    }
}

fn parse_delay(raw: &str) -> Result<f64, String> {
    let secs: f64 = raw.parse().map_err(|e| format!("{raw:?} is not a number: {e}"))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("delay must be a non-negative number of seconds, got {raw}"));
    }
    Ok(secs)
}

impl Cli {
    /// Overlay command-line flags on the loaded configuration.
    pub fn apply(&self, cfg: &mut ScoutConfig) {
        if let Some(query) = &self.query {
            cfg.search.query = Some(query.clone());
        }
        if let Some(country) = &self.country {
            cfg.search.country = Some(country.clone());
        }
        if let Some(site) = &self.site {
            let site = site.trim().trim_start_matches("site:").to_string();
            cfg.search.platform.signatures = vec![site.clone()];
            cfg.search.platform.site = site;
        }
        if let Some(max) = self.max_results {
            cfg.max_results = max;
        }
        if let Some(secs) = self.delay {
            cfg.rate.min_delay_ms = (secs * 1000.0).round() as u64;
        }
        if self.no_headless {
            cfg.browser.headless = false;
        }
        if let Some(path) = &self.output {
            cfg.export.path = path.clone();
        }
        if let Some(format) = self.format {
            cfg.export.format = format.into();
        }
        if let Some(url) = &self.webdriver_url {
            cfg.browser.webdriver_url = url.clone();
        }
    }

    /// Seed URLs from `--urls` and `--url-file`, or `None` to search.
    pub fn seeds(&self) -> Result<Option<Vec<String>>, ScoutError> {
        let mut seeds = self.urls.clone();
        if let Some(path) = &self.url_file {
            seeds.extend(SeedList::from_file(path)?);
        }
        if seeds.is_empty() {
            if self.url_file.is_some() {
                return Err(ScoutError::Startup("the URL file lists no URLs".into()));
            }
            return Ok(None);
        }
        Ok(Some(seeds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("storefront-scout").chain(args.iter().copied()))
    }

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn a_source_is_required() {
        assert!(parse(&["--max-results", "5"]).is_err());
        assert!(parse(&["--country", "USA"]).is_ok());
        assert!(parse(&["--urls", "a.com", "b.com"]).is_ok());
    }

    #[test]
    fn flags_override_configuration() {
        let cli = parse(&[
            "--country",
            "Canada",
            "--site",
            "site:bigcartel.com",
            "--max-results",
            "25",
            "--delay",
            "1.5",
            "--no-headless",
            "--output",
            "out/stores",
            "--format",
            "both",
        ])
        .unwrap();
        let mut cfg = ScoutConfig::default();
        cli.apply(&mut cfg);

        assert_eq!(cfg.search.country.as_deref(), Some("Canada"));
        assert_eq!(cfg.search.platform.site, "bigcartel.com");
        assert_eq!(cfg.search.platform.signatures, vec!["bigcartel.com"]);
        assert_eq!(cfg.max_results, 25);
        assert_eq!(cfg.rate.min_delay_ms, 1500);
        assert!(!cfg.browser.headless);
        assert_eq!(cfg.export.path, PathBuf::from("out/stores"));
        assert_eq!(cfg.export.format, ExportFormat::Both);
    }

    #[test]
    fn negative_delay_is_rejected() {
        assert!(parse(&["--country", "USA", "--delay", "-1"]).is_err());
        assert!(parse(&["--country", "USA", "--delay", "soon"]).is_err());
    }

    #[test]
    fn seeds_merge_flags_and_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# stores\nc.com\n\nd.com").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cli = parse(&["--urls", "a.com", "--url-file", &path]).unwrap();
        assert_eq!(
            cli.seeds().unwrap(),
            Some(vec!["a.com".to_string(), "c.com".into(), "d.com".into()])
        );
        assert_eq!(parse(&["--country", "USA"]).unwrap().seeds().unwrap(), None);
    }

    #[test]
    fn missing_or_empty_url_file_is_a_startup_error() {
        let cli = parse(&["--url-file", "/definitely/not/here.txt"]).unwrap();
        assert!(matches!(cli.seeds(), Err(ScoutError::Startup(_))));

        let file = tempfile::NamedTempFile::new().unwrap();
        let cli = parse(&["--url-file", file.path().to_str().unwrap()]).unwrap();
        assert!(matches!(cli.seeds(), Err(ScoutError::Startup(_))));
    }
}
