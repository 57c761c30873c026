//! Process-wide registry of target gateways.
//!
//! Built once at the composition root from the configuration snapshot and
//! passed by handle to every consumer. There is no global instance.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use super::{TargetGateway, TargetStatus};
use crate::domain::TargetId;
use crate::error::{ConfigError, Result};
use crate::infrastructure::config::{Config, TargetConfig};
use crate::infrastructure::relay::{RelayManager, RelayStats};
use crate::port::UpstreamConnector;

/// Nested status snapshot for health and metrics endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub generated_at: DateTime<Utc>,
    pub targets: Vec<TargetStatus>,
    pub relay: Option<RelayStats>,
}

/// One [`TargetGateway`] per enabled target, plus the console relay.
pub struct GatewayRegistry<C: UpstreamConnector> {
    gateways: BTreeMap<TargetId, Arc<TargetGateway<C>>>,
    relay: Option<RelayManager>,
}

impl<C: UpstreamConnector> GatewayRegistry<C> {
    /// Build gateways for every enabled target.
    ///
    /// `connector` is called once per target to create its upstream connector.
    ///
    /// # Errors
    ///
    /// Returns an error if a target's pool settings are invalid.
    pub fn from_config<F>(config: &Config, mut connector: F) -> Result<Self>
    where
        F: FnMut(&TargetConfig) -> C,
    {
        let mut gateways = BTreeMap::new();
        for target in config.enabled_targets() {
            let id = target.target_id();
            let gateway = TargetGateway::new(id.clone(), connector(target), config)?;
            gateways.insert(id, Arc::new(gateway));
        }
        info!(targets = gateways.len(), "Gateway registry built");

        Ok(Self {
            gateways,
            relay: None,
        })
    }

    /// Include the relay's counters in [`status`](Self::status).
    #[must_use]
    pub fn with_relay(mut self, relay: RelayManager) -> Self {
        self.relay = Some(relay);
        self
    }

    /// Gateway for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownTarget`] for ids that are not configured
    /// or disabled.
    pub fn get(&self, target: &str) -> Result<Arc<TargetGateway<C>>> {
        self.gateways
            .get(&TargetId::new(target))
            .cloned()
            .ok_or_else(|| ConfigError::UnknownTarget(target.to_string()).into())
    }

    pub fn targets(&self) -> impl Iterator<Item = &TargetId> {
        self.gateways.keys()
    }

    pub fn relay(&self) -> Option<&RelayManager> {
        self.relay.as_ref()
    }

    pub fn status(&self) -> GatewayStatus {
        GatewayStatus {
            generated_at: Utc::now(),
            targets: self.gateways.values().map(|g| g.status()).collect(),
            relay: self.relay.as_ref().map(RelayManager::stats),
        }
    }

    /// Close every pool and cancel all console sessions.
    pub async fn shutdown(&self) {
        if let Some(relay) = &self.relay {
            relay.shutdown();
        }
        for gateway in self.gateways.values() {
            gateway.close().await;
        }
    }
}
