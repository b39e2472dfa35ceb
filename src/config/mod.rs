//! Settings for the `run` command.
//!
//! Values come from three places, highest priority first: command-line
//! flags (with `MONGO_TAIL_*` environment fallbacks for connection
//! settings), an optional TOML file given with `--config`, and built-in
//! defaults.

pub mod duration;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use checkpoint::CheckpointConfig;
use clap::{Args, ValueEnum};
use mongodb_tail_source::{SourceOpts, TailConfig, TailError};
use serde::Deserialize;
use tail_core::{TransformMode, TransformOptions};

pub use duration::parse_duration;

/// Default bound of the queue between the tail loop and the writer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Document transform mode as accepted on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ParseMethod {
    Flatten,
    Dig,
    #[value(alias = "simple")]
    Raw,
}

impl From<ParseMethod> for TransformMode {
    fn from(method: ParseMethod) -> Self {
        match method {
            ParseMethod::Flatten => TransformMode::Flatten,
            ParseMethod::Dig => TransformMode::Dig,
            ParseMethod::Raw => TransformMode::Raw,
        }
    }
}

/// Contents of a `--config` TOML file. Every key is optional.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsFile {
    pub uri: Option<String>,
    pub database: Option<String>,
    pub placeholder_db_dir: Option<PathBuf>,
    pub placeholder_db_name: Option<String>,
    pub placeholder_namespace: Option<String>,
    pub collection: Option<String>,
    pub exclude_collections: Option<Vec<String>>,
    pub batch_size: Option<usize>,
    pub retry_delay: Option<String>,
    pub poll_floor: Option<String>,
    pub poll_ceiling: Option<String>,
    pub parse_method: Option<TransformMode>,
    pub dig_fields: Option<Vec<String>>,
    pub dig_dig_fields: Option<Vec<String>>,
    pub pass_through_fields: Option<Vec<String>>,
    pub unpack_mongo_id: Option<bool>,
    pub add_log_entry: Option<bool>,
    pub reset_backoff_on_data: Option<bool>,
    pub checkpoint_every: Option<usize>,
    pub channel_capacity: Option<usize>,
}

impl SettingsFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid settings file {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}

/// Flags of the `run` command.
#[derive(Args, Clone, Debug, Default)]
pub struct RunArgs {
    /// TOML settings file; flags given on the command line take precedence
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// MongoDB connection URI (the database may be given in its path)
    #[arg(long, env = "MONGO_TAIL_URI")]
    pub uri: Option<String>,

    /// Database to read, overriding the one in the URI
    #[arg(long, env = "MONGO_TAIL_DATABASE")]
    pub database: Option<String>,

    /// Directory of the checkpoint file [default: .]
    #[arg(long, env = "MONGO_TAIL_PLACEHOLDER_DB_DIR")]
    pub placeholder_db_dir: Option<PathBuf>,

    /// File name of the checkpoint file [default: logstash_sqlite.db]
    #[arg(long, env = "MONGO_TAIL_PLACEHOLDER_DB_NAME")]
    pub placeholder_db_name: Option<String>,

    /// Namespace of the stored checkpoints [default: logstash_since]
    #[arg(long, env = "MONGO_TAIL_PLACEHOLDER_NAMESPACE")]
    pub placeholder_namespace: Option<String>,

    /// Regex matched against collection names
    #[arg(long, env = "MONGO_TAIL_COLLECTION")]
    pub collection: Option<String>,

    /// Collections never watched (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub exclude_collections: Vec<String>,

    /// Documents fetched per collection per pass [default: 30]
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Wait after a failed fetch, e.g. "3s" [default: 3s]
    #[arg(long, value_parser = parse_duration)]
    pub retry_delay: Option<Duration>,

    /// First idle sleep [default: 10ms]
    #[arg(long, value_parser = parse_duration)]
    pub poll_floor: Option<Duration>,

    /// Longest idle sleep [default: 5s]
    #[arg(long, value_parser = parse_duration)]
    pub poll_ceiling: Option<Duration>,

    /// Document transform [default: flatten]
    #[arg(long, value_enum)]
    pub parse_method: Option<ParseMethod>,

    /// First-level fields expanded by the dig transform (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub dig_fields: Vec<String>,

    /// Second-level fields expanded by the dig transform (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub dig_dig_fields: Vec<String>,

    /// Fields copied verbatim by the flatten transform [default: tags]
    #[arg(long, value_delimiter = ',')]
    pub pass_through_fields: Vec<String>,

    /// Add the ObjectId components as separate fields
    #[arg(long)]
    pub unpack_mongo_id: bool,

    /// Add the whole source document as `log_entry`
    #[arg(long)]
    pub add_log_entry: bool,

    /// Return to the shortest idle sleep after a pass that found documents
    #[arg(long)]
    pub reset_backoff_on_data: bool,

    /// Also store the checkpoint every N documents within a batch
    #[arg(long)]
    pub checkpoint_every: Option<usize>,

    /// Capacity of the queue in front of the output writer [default: 1000]
    #[arg(long)]
    pub channel_capacity: Option<usize>,
}

/// Fully resolved settings of one engine run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub source: SourceOpts,
    pub checkpoint: CheckpointConfig,
    pub tail: TailConfig,
    pub channel_capacity: usize,
}

fn list_or(flag: &[String], file: Option<Vec<String>>) -> Option<Vec<String>> {
    if flag.is_empty() {
        file
    } else {
        Some(flag.to_vec())
    }
}

fn duration_or(
    flag: Option<Duration>,
    file: Option<&str>,
    name: &str,
) -> anyhow::Result<Option<Duration>> {
    match (flag, file) {
        (Some(d), _) => Ok(Some(d)),
        (None, Some(raw)) => Ok(Some(
            parse_duration(raw).with_context(|| format!("Invalid {name} in settings file"))?,
        )),
        (None, None) => Ok(None),
    }
}

impl RunArgs {
    /// Read the `--config` file, if any, and resolve.
    pub fn resolve(&self) -> anyhow::Result<RunSettings> {
        let file = match &self.config {
            Some(path) => SettingsFile::load(path)?,
            None => SettingsFile::default(),
        };
        self.resolve_with(file)
    }

    /// Merge these flags over `file` and fill in defaults.
    pub fn resolve_with(&self, file: SettingsFile) -> anyhow::Result<RunSettings> {
        let uri = self
            .uri
            .clone()
            .or(file.uri)
            .ok_or_else(|| TailError::config("a MongoDB uri is required (--uri or MONGO_TAIL_URI)"))?;
        let collection = self.collection.clone().or(file.collection).ok_or_else(|| {
            TailError::config("a collection pattern is required (--collection)")
        })?;

        let source = SourceOpts {
            source_uri: uri,
            source_database: self.database.clone().or(file.database),
        };

        let mut checkpoint = CheckpointConfig::default();
        if let Some(dir) = self.placeholder_db_dir.clone().or(file.placeholder_db_dir) {
            checkpoint.dir = dir;
        }
        if let Some(name) = self.placeholder_db_name.clone().or(file.placeholder_db_name) {
            checkpoint.file_name = name;
        }
        if let Some(namespace) = self
            .placeholder_namespace
            .clone()
            .or(file.placeholder_namespace)
        {
            checkpoint.namespace = namespace;
        }

        let mut tail = TailConfig::new(collection);
        if let Some(exclude) = list_or(&self.exclude_collections, file.exclude_collections) {
            tail.exclude_collections = exclude;
        }
        if let Some(batch_size) = self.batch_size.or(file.batch_size) {
            tail.batch_size = batch_size;
        }
        if let Some(d) = duration_or(self.retry_delay, file.retry_delay.as_deref(), "retry_delay")? {
            tail.retry_delay = d;
        }
        if let Some(d) = duration_or(self.poll_floor, file.poll_floor.as_deref(), "poll_floor")? {
            tail.poll_floor = d;
        }
        if let Some(d) =
            duration_or(self.poll_ceiling, file.poll_ceiling.as_deref(), "poll_ceiling")?
        {
            tail.poll_ceiling = d;
        }

        let mut transform = TransformOptions::default();
        if let Some(mode) = self.parse_method.map(TransformMode::from).or(file.parse_method) {
            transform.mode = mode;
        }
        if let Some(fields) = list_or(&self.dig_fields, file.dig_fields) {
            transform.dig_fields = fields;
        }
        if let Some(fields) = list_or(&self.dig_dig_fields, file.dig_dig_fields) {
            transform.dig_dig_fields = fields;
        }
        if let Some(fields) = list_or(&self.pass_through_fields, file.pass_through_fields) {
            transform.pass_through_fields = fields;
        }
        tail.transform = transform;

        tail.unpack_mongo_id = self.unpack_mongo_id || file.unpack_mongo_id.unwrap_or(false);
        tail.add_log_entry = self.add_log_entry || file.add_log_entry.unwrap_or(false);
        tail.reset_backoff_on_data =
            self.reset_backoff_on_data || file.reset_backoff_on_data.unwrap_or(false);
        tail.checkpoint_every = self.checkpoint_every.or(file.checkpoint_every);
        tail.validate()?;

        let channel_capacity = self
            .channel_capacity
            .or(file.channel_capacity)
            .unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        if channel_capacity == 0 {
            return Err(TailError::config("channel_capacity must be at least 1").into());
        }

        Ok(RunSettings {
            source,
            checkpoint,
            tail,
            channel_capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args(uri: &str, collection: &str) -> RunArgs {
        RunArgs {
            uri: Some(uri.to_string()),
            collection: Some(collection.to_string()),
            ..RunArgs::default()
        }
    }

    #[test]
    fn test_defaults() {
        let settings = args("mongodb://localhost:27017/logs", "events")
            .resolve_with(SettingsFile::default())
            .unwrap();

        assert_eq!(settings.source.source_uri, "mongodb://localhost:27017/logs");
        assert!(settings.source.source_database.is_none());
        assert_eq!(settings.checkpoint.path(), PathBuf::from("./logstash_sqlite.db"));
        assert_eq!(settings.checkpoint.namespace, "logstash_since");
        assert_eq!(settings.tail.batch_size, 30);
        assert_eq!(settings.tail.poll_floor, Duration::from_millis(10));
        assert_eq!(settings.tail.poll_ceiling, Duration::from_secs(5));
        assert_eq!(settings.tail.retry_delay, Duration::from_secs(3));
        assert_eq!(settings.tail.transform.mode, TransformMode::Flatten);
        assert_eq!(settings.tail.transform.pass_through_fields, vec!["tags"]);
        assert!(!settings.tail.unpack_mongo_id);
        assert_eq!(settings.channel_capacity, 1000);
    }

    #[test]
    fn test_missing_required_settings() {
        let err = RunArgs::default()
            .resolve_with(SettingsFile::default())
            .unwrap_err();
        assert!(err.to_string().contains("uri is required"));
        assert!(matches!(
            err.downcast_ref::<TailError>(),
            Some(TailError::Config(_))
        ));

        let no_collection = RunArgs {
            uri: Some("mongodb://localhost".to_string()),
            ..RunArgs::default()
        };
        let err = no_collection
            .resolve_with(SettingsFile::default())
            .unwrap_err();
        assert!(err.to_string().contains("collection pattern is required"));
    }

    #[test]
    fn test_settings_file_values() {
        let file = SettingsFile::parse(
            r#"
            uri = "mongodb://db:27017/logs"
            collection = "^events_"
            exclude_collections = ["events_debug"]
            batch_size = 100
            retry_delay = "10s"
            poll_ceiling = "1m"
            parse_method = "dig"
            dig_fields = ["info"]
            dig_dig_fields = ["data"]
            unpack_mongo_id = true
            checkpoint_every = 50
            placeholder_db_dir = "/var/lib/mongo-tail"
            "#,
        )
        .unwrap();

        let settings = RunArgs::default().resolve_with(file).unwrap();

        assert_eq!(settings.tail.collection_pattern, "^events_");
        assert_eq!(settings.tail.exclude_collections, vec!["events_debug"]);
        assert_eq!(settings.tail.batch_size, 100);
        assert_eq!(settings.tail.retry_delay, Duration::from_secs(10));
        assert_eq!(settings.tail.poll_ceiling, Duration::from_secs(60));
        assert_eq!(settings.tail.transform.mode, TransformMode::Dig);
        assert_eq!(settings.tail.transform.dig_fields, vec!["info"]);
        assert_eq!(settings.tail.transform.dig_dig_fields, vec!["data"]);
        assert!(settings.tail.unpack_mongo_id);
        assert_eq!(settings.tail.checkpoint_every, Some(50));
        assert_eq!(
            settings.checkpoint.path(),
            PathBuf::from("/var/lib/mongo-tail/logstash_sqlite.db")
        );
    }

    #[test]
    fn test_flags_override_file() {
        let file = SettingsFile::parse(
            r#"
            uri = "mongodb://file/logs"
            collection = "file_pattern"
            batch_size = 100
            parse_method = "dig"
            pass_through_fields = ["labels"]
            "#,
        )
        .unwrap();
        let flags = RunArgs {
            collection: Some("events".to_string()),
            batch_size: Some(5),
            parse_method: Some(ParseMethod::Raw),
            ..RunArgs::default()
        };

        let settings = flags.resolve_with(file).unwrap();

        assert_eq!(settings.source.source_uri, "mongodb://file/logs");
        assert_eq!(settings.tail.collection_pattern, "events");
        assert_eq!(settings.tail.batch_size, 5);
        assert_eq!(settings.tail.transform.mode, TransformMode::Raw);
        assert_eq!(settings.tail.transform.pass_through_fields, vec!["labels"]);
    }

    #[test]
    fn test_settings_file_rejects_unknown_keys_and_bad_values() {
        assert!(SettingsFile::parse("colection = \"events\"").is_err());
        assert!(SettingsFile::parse("parse_method = \"deep\"").is_err());

        let file = SettingsFile::parse("retry_delay = \"soon\"").unwrap();
        let err = args("mongodb://localhost", "events")
            .resolve_with(file)
            .unwrap_err();
        assert!(format!("{err:#}").contains("retry_delay"));
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let flags = RunArgs {
            batch_size: Some(0),
            ..args("mongodb://localhost", "events")
        };
        let err = flags.resolve_with(SettingsFile::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TailError>(),
            Some(TailError::Config(_))
        ));

        let flags = RunArgs {
            channel_capacity: Some(0),
            ..args("mongodb://localhost", "events")
        };
        assert!(flags.resolve_with(SettingsFile::default()).is_err());
    }

    #[test]
    fn test_load_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "uri = \"mongodb://localhost/logs\"").unwrap();
        writeln!(file, "collection = \"events\"").unwrap();

        let flags = RunArgs {
            config: Some(file.path().to_path_buf()),
            ..RunArgs::default()
        };
        let settings = flags.resolve().unwrap();
        assert_eq!(settings.tail.collection_pattern, "events");

        let missing = RunArgs {
            config: Some(PathBuf::from("/nonexistent/mongo-tail.toml")),
            ..RunArgs::default()
        };
        assert!(missing.resolve().is_err());
    }
}
