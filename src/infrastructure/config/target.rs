//! Upstream target definitions.

use serde::{Deserialize, Serialize};

use crate::domain::TargetId;

/// One protected upstream host.
///
/// Credentials are not part of the snapshot; the upstream client reads them
/// from its own environment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

const fn default_port() -> u16 {
    443
}

const fn default_enabled() -> bool {
    true
}

impl TargetConfig {
    #[must_use]
    pub fn target_id(&self) -> TargetId {
        TargetId::new(self.id.clone())
    }

    /// Display name, falling back to the id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}
