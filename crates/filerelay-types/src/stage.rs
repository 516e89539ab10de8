//! Stage identity.

use serde::{Deserialize, Serialize};

/// Identity of one configured stage: the owning producer plus the stage name.
///
/// Used as the checkpoint key and in every log line about the stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StageId {
    producer: String,
    stage: String,
}

impl StageId {
    /// Create a new stage identity.
    #[must_use]
    pub fn new(producer: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            producer: producer.into(),
            stage: stage.into(),
        }
    }

    /// Name of the producer that owns this stage.
    #[must_use]
    pub fn producer(&self) -> &str {
        &self.producer
    }

    /// Name of the stage within its producer.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.producer, self.stage)
    }
}
