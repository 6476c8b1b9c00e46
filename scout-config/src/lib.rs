//! Loader for scout configuration with YAML + environment overlays.
//!
//! Every field has a default, so an empty configuration is valid. Sources are
//! merged in order: defaults, YAML files or snippets, then `SCOUT_`-prefixed
//! environment variables (`SCOUT_RATE__MIN_DELAY_MS=500` sets
//! `rate.min_delay_ms`). String values may reference other environment
//! variables as `${VAR}`; expansion is applied after merging.
use config::{Config, ConfigError, Environment, File};
use scout_common::StealthLevel;
use scout_common::observability::LogFormat;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MAXIMUM_ENV_EXPANSION_DEPTH: usize = 8;

/// Top-level configuration for one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoutConfig {
    /// Cap on the number of store records a run produces.
    pub max_results: usize,
    pub search: SearchConfig,
    pub rate: RateConfig,
    pub browser: BrowserConfig,
    pub extraction: ExtractionConfig,
    pub export: ExportConfig,
    pub logging: LoggingConfig,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            max_results: 10,
            search: SearchConfig::default(),
            rate: RateConfig::default(),
            browser: BrowserConfig::default(),
            extraction: ExtractionConfig::default(),
            export: ExportConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ScoutConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_results == 0 {
            return Err("max_results must be at least 1".into());
        }
        if self.search.page_size == 0 {
            return Err("search.page_size must be at least 1".into());
        }
        if self.search.candidate_factor == 0 {
            return Err("search.candidate_factor must be at least 1".into());
        }
        if self.rate.max_consecutive_failures == 0 {
            return Err("rate.max_consecutive_failures must be at least 1".into());
        }
        if self.rate.backoff_ceiling_ms < self.rate.backoff_base_ms {
            return Err(format!(
                "rate.backoff_ceiling_ms ({}) is below rate.backoff_base_ms ({})",
                self.rate.backoff_ceiling_ms, self.rate.backoff_base_ms
            ));
        }
        if self.extraction.min_phone_digits > self.extraction.max_phone_digits {
            return Err("extraction.min_phone_digits exceeds max_phone_digits".into());
        }
        if self.search.platform.site.trim().is_empty() {
            return Err("search.platform.site must not be empty".into());
        }
        Ok(())
    }

    /// Pre-dedup number of candidates discovery should aim for.
    pub fn desired_candidates(&self) -> usize {
        self.max_results.saturating_mul(self.search.candidate_factor)
    }
}

/// The storefront platform being searched for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlatformConfig {
    pub name: String,
    /// Domain used in the `site:` operator.
    pub site: String,
    /// URL substrings a result link must carry to be kept.
    pub signatures: Vec<String>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            name: "shopify".into(),
            site: "myshopify.com".into(),
            signatures: vec!["myshopify.com".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    pub platform: PlatformConfig,
    /// Country or region phrase added to the query.
    pub country: Option<String>,
    /// Raw query; replaces the generated one when set.
    pub query: Option<String>,
    /// Page-title hint for `intitle:`.
    pub title_hint: Option<String>,
    pub engine_url: String,
    pub query_param: String,
    pub offset_param: String,
    pub page_size: u32,
    pub max_pages: u32,
    pub candidate_factor: usize,
    /// Hosts (exact or parent domains) never treated as candidates.
    pub excluded_hosts: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            platform: PlatformConfig::default(),
            country: None,
            query: None,
            title_hint: Some("contact".into()),
            engine_url: "https://www.google.com/search".into(),
            query_param: "q".into(),
            offset_param: "start".into(),
            page_size: 10,
            max_pages: 10,
            candidate_factor: 2,
            excluded_hosts: vec![
                "google.com".into(),
                "googleusercontent.com".into(),
                "gstatic.com".into(),
                "youtube.com".into(),
                "shopify.com".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateConfig {
    /// Minimum gap between two navigations.
    pub min_delay_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_ceiling_ms: u64,
    pub max_consecutive_failures: u32,
    /// Upper bound of the random jitter added to every pause.
    pub jitter_ms: u64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 2000,
            backoff_base_ms: 1000,
            backoff_ceiling_ms: 30_000,
            max_consecutive_failures: 3,
            jitter_ms: 250,
        }
    }
}

impl RateConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_ceiling(&self) -> Duration {
        Duration::from_millis(self.backoff_ceiling_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrowserConfig {
    pub webdriver_url: String,
    pub headless: bool,
    pub stealth: StealthLevel,
    pub page_load_timeout_ms: u64,
    /// CSS selector every navigation waits for.
    pub wait_for: String,
    /// Pause after load so client-side rendering can finish.
    pub settle_ms: u64,
    pub dismiss_popups: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".into(),
            headless: true,
            stealth: StealthLevel::Balanced,
            page_load_timeout_ms: 30_000,
            wait_for: "body".into(),
            settle_ms: 2000,
            dismiss_popups: true,
        }
    }
}

impl BrowserConfig {
    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_millis(self.page_load_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractionConfig {
    pub follow_contact_page: bool,
    /// Words in a link's href or text that mark a contact page.
    pub contact_keywords: Vec<String>,
    /// Substrings that disqualify a free-text email match.
    pub email_denylist: Vec<String>,
    pub min_phone_digits: usize,
    pub max_phone_digits: usize,
    pub extract_address: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            follow_contact_page: true,
            contact_keywords: vec!["contact".into(), "get-in-touch".into(), "reach-us".into()],
            email_denylist: [
                "example.com",
                "domain.com",
                "email.com",
                "test.com",
                "yoursite.com",
                "website.com",
                "yourdomain.com",
                "siteaddress.com",
                "sample.com",
                ".png",
                ".jpg",
                ".jpeg",
                ".gif",
                ".webp",
                ".svg",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            min_phone_digits: 10,
            max_phone_digits: 15,
            extract_address: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
    Both,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportConfig {
    /// Output path without extension.
    pub path: PathBuf,
    pub format: ExportFormat,
    /// Joins multi-valued cells (emails, phones).
    pub delimiter: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("shopify_contacts"),
            format: ExportFormat::Csv,
            delimiter: ", ".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: Option<PathBuf>,
    pub format: LogFormat,
    pub emit_stderr: bool,
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            format: LogFormat::Text,
            emit_stderr: true,
            filter: "info".into(),
        }
    }
}

fn expand_env_in_value(v: &mut Value) {
    match v {
        Value::String(s) => {
            if s.contains('$') {
                let mut cur = std::mem::take(s);
                for _ in 0..MAXIMUM_ENV_EXPANSION_DEPTH {
                    let expanded = match shellexpand::env(&cur) {
                        Ok(cow) => cow.into_owned(),
                        Err(_) => cur.clone(),
                    };
                    if expanded == cur {
                        break;
                    }
                    cur = expanded;
                }
                *s = cur;
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(expand_env_in_value),
        Value::Object(obj) => obj.values_mut().for_each(expand_env_in_value),
        _ => {}
    }
}

/// Builder that hides the `config` crate wiring (YAML + env overrides).
pub struct ScoutConfigLoader {
    files: Vec<(PathBuf, bool)>,
    snippets: Vec<String>,
    env_prefix: Option<String>,
}

impl Default for ScoutConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoutConfigLoader {
    /// Defaults plus `SCOUT_` environment overrides.
    ///
    /// ```
    /// use scout_config::ScoutConfigLoader;
    ///
    /// let cfg = ScoutConfigLoader::new()
    ///     .with_yaml_str("max_results: 25\nsearch:\n  country: Canada")
    ///     .load()
    ///     .expect("valid config");
    ///
    /// assert_eq!(cfg.max_results, 25);
    /// assert_eq!(cfg.search.country.as_deref(), Some("Canada"));
    /// assert_eq!(cfg.rate.max_consecutive_failures, 3);
    /// ```
    pub fn new() -> Self {
        Self {
            files: Vec::new(),
            snippets: Vec::new(),
            env_prefix: Some("SCOUT".into()),
        }
    }

    /// Attach a YAML/TOML/JSON file that must exist; the format is inferred
    /// from the suffix.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.files.push((path.as_ref().to_path_buf(), true));
        self
    }

    /// Attach a file that is skipped when absent.
    pub fn with_optional_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.files.push((path.as_ref().to_path_buf(), false));
        self
    }

    /// Merge an inline YAML snippet (tests, CLI).
    pub fn with_yaml_str(mut self, yaml: &str) -> Self {
        self.snippets.push(yaml.to_string());
        self
    }

    /// Ignore the environment entirely.
    pub fn without_env(mut self) -> Self {
        self.env_prefix = None;
        self
    }

    /// Merge every source and expand `${VAR}` placeholders. Call
    /// [`ScoutConfig::validate`] once every override is applied.
    ///
    /// ```
    /// use scout_config::ScoutConfigLoader;
    ///
    /// unsafe { std::env::set_var("SCOUT_DOC_REGION", "Australia"); }
    ///
    /// let cfg = ScoutConfigLoader::new()
    ///     .with_yaml_str("search:\n  country: \"${SCOUT_DOC_REGION}\"")
    ///     .load()
    ///     .expect("valid configuration");
    /// assert_eq!(cfg.search.country.as_deref(), Some("Australia"));
    ///
    /// unsafe { std::env::remove_var("SCOUT_DOC_REGION"); }
    /// ```
    pub fn load(self) -> Result<ScoutConfig, ConfigError> {
        let mut builder = Config::builder();
        for (path, required) in &self.files {
            builder = builder.add_source(File::from(path.as_path()).required(*required));
        }
        for yaml in &self.snippets {
            builder = builder.add_source(File::from_str(yaml, config::FileFormat::Yaml));
        }
        if let Some(prefix) = &self.env_prefix {
            builder = builder.add_source(
                Environment::with_prefix(prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }
        let mut merged: Value = builder.build()?.try_deserialize()?;
        expand_env_in_value(&mut merged);

        // Back through `config` so scalars coerce to the field type
        // (`SCOUT_SEARCH__COUNTRY=2024` stays a string).
        let expanded = serde_json::to_string(&merged).map_err(|e| ConfigError::Message(e.to_string()))?;
        Config::builder()
            .add_source(File::from_str(&expanded, config::FileFormat::Json))
            .build()?
            .try_deserialize::<ScoutConfig>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expands_simple_string() {
        temp_env::with_var("SCOUT_T_FOO", Some("bar"), || {
            let mut v = json!("prefix-${SCOUT_T_FOO}-suffix");
            expand_env_in_value(&mut v);
            assert_eq!(v, json!("prefix-bar-suffix"));
        });
    }

    #[test]
    fn expands_in_array_and_object() {
        temp_env::with_vars(
            [("SCOUT_T_CITY", Some("Winston")), ("SCOUT_T_STATE", Some("NC"))],
            || {
                let mut v = json!([
                    "hello-$SCOUT_T_CITY",
                    { "loc": "${SCOUT_T_CITY}-${SCOUT_T_STATE}" },
                    42,
                    true,
                    null
                ]);
                expand_env_in_value(&mut v);
                assert_eq!(
                    v,
                    json!(["hello-Winston", { "loc": "Winston-NC" }, 42, true, null])
                );
            },
        );
    }

    #[test]
    fn expands_recursively_across_env_values() {
        temp_env::with_vars(
            [
                ("SCOUT_T_BAZ", Some("qux")),
                ("SCOUT_T_BAR", Some("mid-${SCOUT_T_BAZ}")),
                ("SCOUT_T_TOP", Some("start-${SCOUT_T_BAR}-end")),
            ],
            || {
                let mut v = json!("X=${SCOUT_T_TOP}");
                expand_env_in_value(&mut v);
                assert_eq!(v, json!("X=start-mid-qux-end"));
            },
        );
    }

    #[test]
    fn stops_on_cycles() {
        temp_env::with_vars(
            [("SCOUT_T_A", Some("${SCOUT_T_B}")), ("SCOUT_T_B", Some("${SCOUT_T_A}"))],
            || {
                let mut v = json!("x=${SCOUT_T_A}-y");
                expand_env_in_value(&mut v);
                let s = v.as_str().unwrap();
                assert!(s.starts_with("x=") && s.ends_with("-y"));
                assert!(s.contains("${"));
            },
        );
    }

    #[test]
    fn unknown_vars_are_left_as_is() {
        let mut v = json!("hi-${SCOUT_T_DOES_NOT_EXIST}");
        expand_env_in_value(&mut v);
        assert_eq!(v, json!("hi-${SCOUT_T_DOES_NOT_EXIST}"));
    }

    #[test]
    fn defaults_validate() {
        let cfg = ScoutConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.desired_candidates(), 20);
        assert_eq!(cfg.rate.min_delay(), Duration::from_secs(2));
    }

    #[test]
    fn validation_rejects_zero_cap_and_inverted_backoff() {
        let mut cfg = ScoutConfig::default();
        cfg.max_results = 0;
        assert!(cfg.validate().unwrap_err().contains("max_results"));

        let mut cfg = ScoutConfig::default();
        cfg.rate.backoff_ceiling_ms = 10;
        assert!(cfg.validate().unwrap_err().contains("backoff_ceiling_ms"));
    }

    #[test]
    fn yaml_snippet_overrides_nested_defaults() {
        let cfg = ScoutConfigLoader::new()
            .without_env()
            .with_yaml_str(
                r#"
browser:
  headless: false
  stealth: maximum
export:
  format: both
logging:
  format: json
"#,
            )
            .load()
            .unwrap();
        assert!(!cfg.browser.headless);
        assert_eq!(cfg.browser.stealth, StealthLevel::Maximum);
        assert_eq!(cfg.browser.wait_for, "body");
        assert_eq!(cfg.export.format, ExportFormat::Both);
        assert_eq!(cfg.logging.format, LogFormat::Json);
    }

    #[test]
    fn invalid_values_fail_load() {
        let err = ScoutConfigLoader::new()
            .without_env()
            .with_yaml_str("max_results: 0")
            .load()
            .unwrap_err();
        assert!(err.to_string().contains("max_results"));
    }
}
