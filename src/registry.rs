use tracing::info;

use crate::{
    error::{HubError, Result},
    session::HubSession,
    types::{HubConfig, HubIdentity},
};

/// Every hub seen since startup, in discovery order
///
/// Identities are unique; names are not. A hub keeps the name it got when it
/// was first registered until it is explicitly renamed.
#[derive(Debug)]
pub struct HubRegistry {
    sessions: Vec<HubSession>,
    registered: usize,
    name_prefix: String,
    use_advertised_names: bool,
    motor_port: u8,
}

impl HubRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new(config: &HubConfig) -> Self {
        Self {
            sessions: Vec::new(),
            registered: 0,
            name_prefix: config.name_prefix.clone(),
            use_advertised_names: config.use_advertised_names,
            motor_port: config.motor_port,
        }
    }

    /// Return the session for `identity`, registering it if unseen
    ///
    /// New hubs are named `"<prefix> N"` by default, so the first two hubs
    /// found are `Hub 1` and `Hub 2` whatever they advertise. With
    /// [`HubConfig::use_advertised_names`] set, a non-blank `observed_name` is
    /// used instead. An existing session is returned untouched, whatever name
    /// was observed this time.
    pub fn ensure_session(
        &mut self,
        identity: &HubIdentity,
        observed_name: Option<&str>,
    ) -> &mut HubSession {
        if let Some(index) = self.position(identity) {
            return &mut self.sessions[index];
        }

        self.registered += 1;
        let name = match observed_name.map(str::trim) {
            Some(observed) if self.use_advertised_names && !observed.is_empty() => {
                observed.to_string()
            }
            _ => format!("{} {}", self.name_prefix, self.registered),
        };

        info!("Registered {} as {}", identity, name);
        self.sessions
            .push(HubSession::new(identity.clone(), name, self.motor_port));

        let index = self.sessions.len() - 1;
        &mut self.sessions[index]
    }

    /// Rename a hub
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] for an unknown identity and
    /// [`HubError::InvalidName`] if `new_name` is blank.
    pub fn rename(&mut self, identity: &HubIdentity, new_name: &str) -> Result<()> {
        let session = self
            .get_mut(identity)
            .ok_or_else(|| HubError::NotFound(identity.to_string()))?;

        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(HubError::InvalidName);
        }

        info!("Renamed {} to {}", session.display_name(), new_name);
        session.set_display_name(new_name.to_string());
        Ok(())
    }

    /// Look up a session
    #[must_use]
    pub fn get(&self, identity: &HubIdentity) -> Option<&HubSession> {
        self.sessions.iter().find(|s| s.identity() == identity)
    }

    /// Look up a session for mutation
    pub fn get_mut(&mut self, identity: &HubIdentity) -> Option<&mut HubSession> {
        self.sessions.iter_mut().find(|s| s.identity() == identity)
    }

    /// Whether `identity` is registered
    #[must_use]
    pub fn contains(&self, identity: &HubIdentity) -> bool {
        self.position(identity).is_some()
    }

    /// All sessions in registration order
    pub fn all(&self) -> impl Iterator<Item = &HubSession> {
        self.sessions.iter()
    }

    /// All sessions in registration order, mutably
    pub fn all_mut(&mut self) -> impl Iterator<Item = &mut HubSession> {
        self.sessions.iter_mut()
    }

    /// Number of sessions with a live link
    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.sessions.iter().filter(|s| s.is_connected()).count()
    }

    /// Number of registered hubs
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no hub was registered yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn position(&self, identity: &HubIdentity) -> Option<usize> {
        self.sessions.iter().position(|s| s.identity() == identity)
    }
}
