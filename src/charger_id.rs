use serde::{Deserialize, Serialize};

/// Identifies one physical charging station, e.g. `0434335121105646`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChargerId(String);

impl ChargerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChargerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChargerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ChargerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
