//! Failure classification for the tail loop.

use tail_core::TransformError;

/// An error raised by one phase of the tail loop.
///
/// Only [`TailError::Fetch`] is retried by the loop; a transform error skips
/// one document and is never returned from a pass. Every other variant stops
/// the engine.
#[derive(Debug, thiserror::Error)]
pub enum TailError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("collection discovery failed: {cause:#}")]
    Discovery { cause: anyhow::Error },

    #[error("failed to fetch from collection '{collection}': {cause:#}")]
    Fetch {
        collection: String,
        cause: anyhow::Error,
    },

    #[error("checkpoint store failed for collection '{collection}': {cause:#}")]
    Checkpoint {
        collection: String,
        cause: anyhow::Error,
    },

    #[error("failed to transform document {id} in collection '{collection}': {cause}")]
    Transform {
        collection: String,
        id: String,
        cause: TransformError,
    },

    #[error("failed to emit event from collection '{collection}': {cause:#}")]
    Emit {
        collection: String,
        cause: anyhow::Error,
    },
}

impl TailError {
    pub fn config(message: impl Into<String>) -> Self {
        TailError::Config(message.into())
    }

    /// Whether the loop continues after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TailError::Fetch { .. } | TailError::Transform { .. })
    }

    /// The collection involved, when the error concerns one.
    pub fn collection(&self) -> Option<&str> {
        match self {
            TailError::Fetch { collection, .. }
            | TailError::Checkpoint { collection, .. }
            | TailError::Transform { collection, .. }
            | TailError::Emit { collection, .. } => Some(collection),
            TailError::Config(_) | TailError::Discovery { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_recoverable_classification() {
        let fetch = TailError::Fetch {
            collection: "events".to_string(),
            cause: anyhow::anyhow!("connection reset"),
        };
        assert!(fetch.is_recoverable());

        let checkpoint = TailError::Checkpoint {
            collection: "events".to_string(),
            cause: anyhow::anyhow!("disk full"),
        };
        assert!(!checkpoint.is_recoverable());
        assert!(!TailError::config("missing uri").is_recoverable());
        assert!(!TailError::Discovery {
            cause: anyhow::anyhow!("unreachable")
        }
        .is_recoverable());
    }

    #[test]
    fn test_display_includes_context_chain() {
        let cause = Err::<(), _>(anyhow::anyhow!("disk full"))
            .context("Failed to store checkpoint logstash_since_events")
            .unwrap_err();
        let err = TailError::Checkpoint {
            collection: "events".to_string(),
            cause,
        };

        let msg = err.to_string();
        assert!(msg.contains("'events'"));
        assert!(msg.contains("Failed to store checkpoint"));
        assert!(msg.contains("disk full"));
        assert_eq!(err.collection(), Some("events"));
    }
}
