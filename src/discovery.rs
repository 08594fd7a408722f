use futures::future::join_all;
use std::time::Duration;
use tracing::{info, warn};

use crate::{
    ble::Transport,
    error::{HubError, Result},
    registry::HubRegistry,
    types::{DiscoveredDevice, HubIdentity},
};

/// Advertised-name fragments that mark a device as a Powered Up hub
///
/// Matching is case-insensitive. Hubs with unusual names are missed.
pub const HUB_NAME_KEYWORDS: [&str; 5] = ["TRAIN", "HUB", "MOVE", "CITY", "LEGO"];

/// Whether an advertised name looks like a hub
#[must_use]
pub fn is_hub_name(name: &str) -> bool {
    let upper = name.to_uppercase();
    HUB_NAME_KEYWORDS.iter().any(|keyword| upper.contains(keyword))
}

/// Keep devices with a hub-like name, first sighting per address
#[must_use]
pub fn filter_candidates(devices: Vec<DiscoveredDevice>) -> Vec<DiscoveredDevice> {
    let mut candidates: Vec<DiscoveredDevice> = Vec::new();

    for device in devices {
        let looks_like_hub = device.advertised_name.as_deref().is_some_and(is_hub_name);
        if looks_like_hub && !candidates.iter().any(|c| c.identity == device.identity) {
            candidates.push(device);
        }
    }

    candidates
}

/// Scan for `timeout` and return the hub candidates
///
/// # Errors
///
/// Returns [`HubError::DiscoveryFailed`] if the scan itself fails.
pub async fn scan(transport: &dyn Transport, timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
    let devices = transport.discover(timeout).await.map_err(|e| match e {
        HubError::DiscoveryFailed(_) => e,
        other => HubError::DiscoveryFailed(other.to_string()),
    })?;

    let seen = devices.len();
    let candidates = filter_candidates(devices);
    info!("Found {} hub candidate(s) among {} device(s)", candidates.len(), seen);

    Ok(candidates)
}

/// Outcome of one reconciliation pass
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Hubs that went from not connected to connected in this pass
    pub newly_connected: Vec<HubIdentity>,
    /// Candidates that were already connected
    pub already_connected: usize,
    /// Candidates whose connection attempt failed
    pub failures: Vec<(HubIdentity, HubError)>,
}

impl ReconcileReport {
    /// Number of hubs connected by this pass
    #[must_use]
    pub fn newly_connected_count(&self) -> usize {
        self.newly_connected.len()
    }
}

/// Register every candidate and connect the ones without a live link
///
/// Connection attempts run side by side on the calling task. A failure for one
/// hub is recorded in the report and does not stop the others.
pub async fn reconcile_and_connect(
    registry: &mut HubRegistry,
    transport: &dyn Transport,
    candidates: &[DiscoveredDevice],
    connect_timeout: Duration,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    let mut pending: Vec<HubIdentity> = Vec::new();

    for candidate in candidates {
        let session =
            registry.ensure_session(&candidate.identity, candidate.advertised_name.as_deref());

        if session.refresh_link().await {
            report.already_connected += 1;
        } else if !pending.contains(&candidate.identity) {
            pending.push(candidate.identity.clone());
        }
    }

    let attempts = registry
        .all_mut()
        .filter(|session| pending.contains(session.identity()))
        .map(|session| async move {
            let result = session.connect(transport, connect_timeout).await;
            (session.identity().clone(), result)
        });

    for (identity, result) in join_all(attempts).await {
        match result {
            Ok(()) => report.newly_connected.push(identity),
            Err(e) => {
                warn!("Skipping {}: {}", identity, e);
                report.failures.push((identity, e));
            }
        }
    }

    info!(
        "Reconciled {} candidate(s): {} new, {} already connected, {} failed",
        candidates.len(),
        report.newly_connected.len(),
        report.already_connected,
        report.failures.len()
    );

    report
}
