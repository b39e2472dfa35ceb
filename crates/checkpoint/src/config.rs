//! Checkpoint store location configuration.

use std::path::PathBuf;

/// Default checkpoint file directory.
pub const DEFAULT_DIR: &str = ".";
/// Default checkpoint file name.
pub const DEFAULT_FILE_NAME: &str = "logstash_sqlite.db";
/// Default checkpoint namespace.
pub const DEFAULT_NAMESPACE: &str = "logstash_since";

/// Where checkpoints are stored and under which namespace.
///
/// Two engines tailing different databases may share one file as long as
/// their namespaces differ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointConfig {
    /// Directory holding the checkpoint file.
    pub dir: PathBuf,

    /// Checkpoint file name inside `dir`.
    pub file_name: String,

    /// Prefix of every checkpoint key.
    pub namespace: String,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_DIR),
            file_name: DEFAULT_FILE_NAME.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl CheckpointConfig {
    pub fn new(dir: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            file_name: file_name.into(),
            ..Self::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Full path of the checkpoint file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}
