//! Process configuration.
//!
//! [`Settings`] mirrors the YAML file operators edit. It is read once at
//! startup and compiled into the immutable pieces the pipeline shares:
//! [`FilterConfig`] for the validator and deduplicator, [`RetentionPolicy`]
//! for the trimmer. Nothing here is mutated after load.

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "configuration.yaml";

// ---------------------------------------------------------------------------
// File layout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub aprs: AprsConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `compact` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
    /// When set, also append to `<directory>/<level>.log`.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
    /// Upper bound on how long one store operation waits for a lock.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// Feed filters. Every list accepts `~` as "empty".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AprsConfig {
    /// Accepted q constructs; empty accepts every feed source.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub allowed_q_construct: Vec<String>,
    /// First route elements that mark a report as re-routed.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub banned_origins: Vec<String>,
    /// Regular expressions; a comment matching any of them is dropped.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub ignore_comment: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub ignore_call_sign: Vec<String>,
    /// q constructs whose feeds replay stale fixes.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub strict_replay_q_construct: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Lowest accepted altitude in meters; `~` disables the floor.
    #[serde(default = "default_min_altitude")]
    pub min_altitude: Option<f64>,
    /// Reject reports that carry no altitude at all.
    #[serde(default = "default_true")]
    pub require_altitude: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_altitude: default_min_altitude(),
            require_altitude: default_true(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Rows kept per station, or `all`.
    #[serde(default)]
    pub keep: RetentionDepth,
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
    /// Per-axis slack, in micro-degrees, when matching rounded positions.
    #[serde(default = "default_dedup_tolerance_e6")]
    pub dedup_tolerance_e6: u32,
    #[serde(default = "default_trim_interval_secs")]
    pub trim_interval_secs: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            keep: RetentionDepth::default(),
            dedup_window_secs: default_dedup_window_secs(),
            dedup_tolerance_e6: default_dedup_tolerance_e6(),
            trim_interval_secs: default_trim_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Number of station-partitioned workers; 1 processes inline.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Bounded queue length per worker.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_depth: default_queue_depth(),
        }
    }
}

// ---------------------------------------------------------------------------
// RetentionDepth
// ---------------------------------------------------------------------------

/// How many rows to keep per station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionDepth {
    Unlimited,
    Keep(NonZeroUsize),
}

impl RetentionDepth {
    pub const DEFAULT_KEEP: usize = 500;

    /// The row ceiling, or `None` when unlimited.
    #[must_use]
    pub const fn limit(self) -> Option<usize> {
        match self {
            Self::Unlimited => None,
            Self::Keep(k) => Some(k.get()),
        }
    }
}

impl Default for RetentionDepth {
    fn default() -> Self {
        NonZeroUsize::new(Self::DEFAULT_KEEP).map_or(Self::Unlimited, Self::Keep)
    }
}

impl Serialize for RetentionDepth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Unlimited => serializer.serialize_str("all"),
            Self::Keep(k) => serializer.serialize_u64(k.get() as u64),
        }
    }
}

impl<'de> Deserialize<'de> for RetentionDepth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Count(u64),
            Word(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Count(n) => usize::try_from(n)
                .ok()
                .and_then(NonZeroUsize::new)
                .map(Self::Keep)
                .ok_or_else(|| de::Error::custom("keep must be at least 1, or \"all\"")),
            Raw::Word(word) => match word.trim().to_ascii_lowercase().as_str() {
                "all" | "unlimited" => Ok(Self::Unlimited),
                other => other
                    .parse::<usize>()
                    .ok()
                    .and_then(NonZeroUsize::new)
                    .map(Self::Keep)
                    .ok_or_else(|| de::Error::custom(format!("invalid keep value {word:?}"))),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Compiled configuration
// ---------------------------------------------------------------------------

/// Banned comment patterns compiled into one alternation.
#[derive(Debug, Clone)]
pub struct CommentMatcher {
    regex: Regex,
}

impl CommentMatcher {
    /// Compile `patterns`; `None` when there is nothing to match.
    ///
    /// # Errors
    ///
    /// Returns an error if any pattern is not a valid regular expression.
    pub fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Option<Self>, regex::Error> {
        let parts: Vec<String> = patterns
            .iter()
            .filter_map(|pattern| {
                let pattern: &str = pattern.as_ref();
                (!pattern.is_empty()).then(|| format!("(?:{pattern})"))
            })
            .collect();
        if parts.is_empty() {
            return Ok(None);
        }
        let regex = Regex::new(&parts.join("|"))?;
        Ok(Some(Self { regex }))
    }

    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

/// Everything the validator and deduplicator read, shared read-only.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub allowed_relay_tags: BTreeSet<String>,
    pub banned_origins: BTreeSet<String>,
    pub banned_comments: Option<CommentMatcher>,
    pub banned_stations: BTreeSet<String>,
    pub strict_replay_tags: BTreeSet<String>,
    pub min_altitude: Option<f64>,
    pub require_altitude: bool,
    pub dedup_window: Duration,
    pub dedup_tolerance_e6: u32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            allowed_relay_tags: BTreeSet::new(),
            banned_origins: BTreeSet::new(),
            banned_comments: None,
            banned_stations: BTreeSet::new(),
            strict_replay_tags: BTreeSet::new(),
            min_altitude: default_min_altitude(),
            require_altitude: true,
            dedup_window: Duration::from_secs(default_dedup_window_secs()),
            dedup_tolerance_e6: default_dedup_tolerance_e6(),
        }
    }
}

impl FilterConfig {
    /// Compile the filter section of `settings`.
    ///
    /// # Errors
    ///
    /// Returns an error if a banned comment pattern does not compile.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let aprs = &settings.aprs;
        let banned_comments = CommentMatcher::compile(&aprs.ignore_comment)
            .context("compile aprs.ignore_comment patterns")?;

        Ok(Self {
            allowed_relay_tags: to_set(&aprs.allowed_q_construct),
            banned_origins: to_set(&aprs.banned_origins),
            banned_comments,
            banned_stations: to_set(&aprs.ignore_call_sign),
            strict_replay_tags: to_set(&aprs.strict_replay_q_construct),
            min_altitude: settings.validation.min_altitude,
            require_altitude: settings.validation.require_altitude,
            dedup_window: Duration::from_secs(settings.history.dedup_window_secs),
            dedup_tolerance_e6: settings.history.dedup_tolerance_e6,
        })
    }
}

/// Retention ceiling and how often the trimmer may touch storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub depth: RetentionDepth,
    pub interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            depth: RetentionDepth::default(),
            interval: Duration::from_secs(default_trim_interval_secs()),
        }
    }
}

impl RetentionPolicy {
    #[must_use]
    pub const fn from_settings(settings: &Settings) -> Self {
        Self {
            depth: settings.history.keep,
            interval: Duration::from_secs(settings.history.trim_interval_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Settings {
    /// Parse settings from YAML text and check them.
    ///
    /// # Errors
    ///
    /// Returns an error on YAML syntax errors or invalid values.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let settings: Self = serde_yaml::from_str(text).context("parse YAML settings")?;
        settings.check()?;
        Ok(settings)
    }

    /// Reject values that cannot run.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn check(&self) -> Result<()> {
        if self.ingest.workers == 0 {
            bail!("ingest.workers must be at least 1");
        }
        if self.ingest.queue_depth == 0 {
            bail!("ingest.queue_depth must be at least 1");
        }
        if self.history.trim_interval_secs == 0 {
            bail!("history.trim_interval_secs must be at least 1");
        }
        if self
            .validation
            .min_altitude
            .is_some_and(|floor| !floor.is_finite())
        {
            bail!("validation.min_altitude must be a finite number");
        }
        FilterConfig::from_settings(self)?;
        Ok(())
    }

    /// Render back to YAML, as the effective configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("serialize settings")
    }
}

/// Load settings from `path`; a missing file yields defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    Settings::from_yaml(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn to_set(values: &[String]) -> BTreeSet<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

const fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("history.sqlite3")
}

const fn default_busy_timeout_ms() -> u64 {
    5_000
}

#[allow(clippy::unnecessary_wraps)]
const fn default_min_altitude() -> Option<f64> {
    Some(0.3)
}

const fn default_dedup_window_secs() -> u64 {
    600
}

const fn default_dedup_tolerance_e6() -> u32 {
    1
}

const fn default_trim_interval_secs() -> u64 {
    60
}

const fn default_workers() -> usize {
    1
}

const fn default_queue_depth() -> usize {
    1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let settings = Settings::from_yaml("{}").expect("parse");
        assert_eq!(settings.logging.level, "INFO");
        assert_eq!(settings.database.busy_timeout_ms, 5_000);
        assert_eq!(settings.history.keep.limit(), Some(500));
        assert_eq!(settings.history.dedup_window_secs, 600);
        assert_eq!(settings.validation.min_altitude, Some(0.3));
        assert!(settings.validation.require_altitude);
        assert_eq!(settings.ingest.workers, 1);

        let filter = FilterConfig::from_settings(&settings).expect("compile");
        assert!(filter.allowed_relay_tags.is_empty());
        assert!(filter.banned_comments.is_none());
        assert_eq!(filter.dedup_window, Duration::from_secs(600));
    }

    #[test]
    fn parses_legacy_style_document() {
        let yaml = r#"
logging:
  level: DEBUG
aprs:
  allowed_q_construct: [qAR, qAO]
  ignore_comment: ["RS41", "radiosonde"]
  ignore_call_sign: ~
history:
  keep: all
validation:
  min_altitude: ~
  require_altitude: false
"#;
        let settings = Settings::from_yaml(yaml).expect("parse");
        assert_eq!(settings.history.keep, RetentionDepth::Unlimited);
        assert!(settings.aprs.ignore_call_sign.is_empty());

        let filter = FilterConfig::from_settings(&settings).expect("compile");
        assert!(filter.allowed_relay_tags.contains("qAR"));
        assert!(filter.allowed_relay_tags.contains("qAO"));
        assert_eq!(filter.min_altitude, None);
        assert!(!filter.require_altitude);

        let matcher = filter.banned_comments.expect("matcher compiled");
        assert!(matcher.is_match("Vaisala RS41 sonde"));
        assert!(matcher.is_match("a radiosonde"));
        assert!(!matcher.is_match("pico balloon"));
    }

    #[test]
    fn keep_accepts_numbers_and_numeric_strings() {
        let settings = Settings::from_yaml("history:\n  keep: 3\n").expect("parse");
        assert_eq!(settings.history.keep.limit(), Some(3));

        let settings = Settings::from_yaml("history:\n  keep: \"25\"\n").expect("parse");
        assert_eq!(settings.history.keep.limit(), Some(25));
    }

    #[test]
    fn keep_zero_is_rejected() {
        let err = Settings::from_yaml("history:\n  keep: 0\n").expect_err("zero keep");
        assert!(format!("{err:#}").contains("keep must be at least 1"));
    }

    #[test]
    fn invalid_comment_pattern_is_a_load_error() {
        let err = Settings::from_yaml("aprs:\n  ignore_comment: [\"(unclosed\"]\n")
            .expect_err("bad regex");
        assert!(format!("{err:#}").contains("ignore_comment"));
    }

    #[test]
    fn zero_workers_is_rejected() {
        assert!(Settings::from_yaml("ingest:\n  workers: 0\n").is_err());
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let settings = load_settings(&dir.path().join("absent.yaml")).expect("load");
        assert_eq!(settings.history.keep, RetentionDepth::default());
    }

    #[test]
    fn settings_round_trip_through_yaml() {
        let settings = Settings::from_yaml("history:\n  keep: all\n").expect("parse");
        let text = settings.to_yaml().expect("render");
        assert!(text.contains("keep: all"));
        let again = Settings::from_yaml(&text).expect("reparse");
        assert_eq!(again.history.keep, RetentionDepth::Unlimited);
    }

    #[test]
    fn comment_matcher_skips_empty_patterns() {
        let none = CommentMatcher::compile(&["", ""]).expect("compile");
        assert!(none.is_none());

        let matcher = CommentMatcher::compile(&["RS41|radiosonde"])
            .expect("compile")
            .expect("present");
        assert!(matcher.is_match("RS41 radiosonde"));
        assert_eq!(matcher.as_str(), "(?:RS41|radiosonde)");
    }
}
