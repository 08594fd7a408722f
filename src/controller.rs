use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    ble::Transport,
    discovery::{self, ReconcileReport},
    error::{HubError, Result},
    registry::HubRegistry,
    types::{HubConfig, HubDiagnostics, HubIdentity, HubStatus},
};

/// Owner of the registry and the transport
///
/// Every control operation lives here as an `async` method. A controller is
/// meant to be owned by exactly one task; [`crate::bridge::ExecutionContext`]
/// provides that task and lets other threads call in.
pub struct HubController {
    transport: Arc<dyn Transport>,
    registry: HubRegistry,
    config: HubConfig,
}

impl HubController {
    /// Create a controller with an empty registry
    pub fn new(transport: Arc<dyn Transport>, config: HubConfig) -> Self {
        Self {
            transport,
            registry: HubRegistry::new(&config),
            config,
        }
    }

    /// The hub registry
    #[must_use]
    pub const fn registry(&self) -> &HubRegistry {
        &self.registry
    }

    /// The hub registry, mutably
    pub fn registry_mut(&mut self) -> &mut HubRegistry {
        &mut self.registry
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Scan once and connect every hub candidate that is not connected
    ///
    /// # Errors
    ///
    /// Returns [`HubError::DiscoveryFailed`] if the scan fails. Per-hub
    /// connection failures are in the report instead.
    pub async fn discover(&mut self) -> Result<ReconcileReport> {
        let candidates =
            discovery::scan(self.transport.as_ref(), self.config.scan_timeout()).await?;

        Ok(discovery::reconcile_and_connect(
            &mut self.registry,
            self.transport.as_ref(),
            &candidates,
            self.config.connect_timeout(),
        )
        .await)
    }

    /// Scan and connect, returning how many hubs are connected in total
    ///
    /// # Errors
    ///
    /// Returns [`HubError::DiscoveryFailed`] if the scan fails.
    pub async fn connect_all(&mut self) -> Result<usize> {
        self.discover().await?;
        let connected = self.registry.connected_count();
        info!("{} hub(s) connected", connected);
        Ok(connected)
    }

    /// Scan and connect, returning how many hubs were newly connected
    ///
    /// # Errors
    ///
    /// Returns [`HubError::DiscoveryFailed`] if the scan fails.
    pub async fn scan_new(&mut self) -> Result<usize> {
        let report = self.discover().await?;
        Ok(report.newly_connected_count())
    }

    /// Rename a hub
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] or [`HubError::InvalidName`].
    pub fn rename(&mut self, identity: &HubIdentity, name: &str) -> Result<()> {
        self.registry.rename(identity, name)
    }

    /// Command one hub, reconnecting it first if its link is down
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] for an unknown hub,
    /// [`HubError::ConnectionFailed`] if the reconnect fails, or
    /// [`HubError::CommandFailed`] if the write fails.
    pub async fn set_speed(&mut self, identity: &HubIdentity, speed: i32) -> Result<()> {
        let session = self
            .registry
            .get_mut(identity)
            .ok_or_else(|| HubError::NotFound(identity.to_string()))?;

        if !session.refresh_link().await {
            info!("{} is not connected, reconnecting", session.display_name());
            session
                .connect(self.transport.as_ref(), self.config.connect_timeout())
                .await?;
        }

        session.set_speed(speed).await
    }

    /// Stop one hub
    ///
    /// # Errors
    ///
    /// Same as [`set_speed`](Self::set_speed).
    pub async fn stop(&mut self, identity: &HubIdentity) -> Result<()> {
        self.set_speed(identity, 0).await
    }

    /// Command every connected hub, returning how many accepted the command
    ///
    /// Every hub whose link is still up is attempted even if an earlier one
    /// fails. Hubs found disconnected are skipped.
    ///
    /// # Errors
    ///
    /// Returns the first failure after all hubs were attempted.
    pub async fn set_speed_all(&mut self, speed: i32) -> Result<usize> {
        let mut commanded = 0;
        let mut first_error = None;

        for session in self.registry.all_mut() {
            if !session.refresh_link().await {
                continue;
            }
            match session.set_speed(speed).await {
                Ok(()) => commanded += 1,
                Err(e) => {
                    warn!("Failed to command {}: {}", session.display_name(), e);
                    first_error.get_or_insert(e);
                }
            }
        }

        first_error.map_or(Ok(commanded), Err)
    }

    /// Stop every connected hub
    ///
    /// # Errors
    ///
    /// Same as [`set_speed_all`](Self::set_speed_all).
    pub async fn stop_all(&mut self) -> Result<usize> {
        self.set_speed_all(0).await
    }

    /// Status of every registered hub, after checking which links are still up
    pub async fn status(&mut self) -> Vec<HubStatus> {
        let mut rows = Vec::with_capacity(self.registry.len());
        for session in self.registry.all_mut() {
            session.refresh_link().await;
            rows.push(session.status());
        }
        rows
    }

    /// Diagnostics for one hub, including a fresh battery reading if connected
    ///
    /// A failed or unanswered battery request leaves the last known value.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] for an unknown hub.
    pub async fn debug(&mut self, identity: &HubIdentity) -> Result<HubDiagnostics> {
        let session = self
            .registry
            .get_mut(identity)
            .ok_or_else(|| HubError::NotFound(identity.to_string()))?;

        if session.refresh_link().await {
            if let Err(e) = session.request_battery(self.config.battery_settle()).await {
                warn!(
                    "Battery request to {} failed: {}",
                    session.display_name(),
                    e
                );
            }
        }

        Ok(session.diagnostics())
    }
}
