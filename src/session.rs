use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    ble::{HubLink, NotificationSink, Transport},
    error::{HubError, Result},
    protocol::{clamp_speed, decode_battery_notification, to_hex, HubCommand},
    types::{HubDiagnostics, HubIdentity, HubStatus, SessionState},
};

/// Connection and last-known state of one physical hub
///
/// A session outlives its link: after a disconnect the identity, name, speed
/// and battery level stay, and [`connect`](Self::connect) brings the same
/// session back online.
///
/// Notifications pushed by the hub land in a per-session mailbox. They are
/// only applied when the session drains it, so nothing outside the owning
/// task ever mutates the session. Every write and link check drains it, and
/// each new link gets a fresh mailbox so senders left over from an old link
/// are closed.
pub struct HubSession {
    identity: HubIdentity,
    display_name: String,
    port: u8,
    state: SessionState,
    link: Option<Box<dyn HubLink>>,
    current_speed: i8,
    last_command: Option<Bytes>,
    battery_percent: Option<u8>,
    last_notification: Option<Vec<u8>>,
    notifications_armed: bool,
    mailbox_tx: NotificationSink,
    mailbox_rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl HubSession {
    /// Create an unconnected session driving motor `port`
    pub fn new(identity: HubIdentity, display_name: impl Into<String>, port: u8) -> Self {
        let (mailbox_tx, mailbox_rx) = mpsc::unbounded_channel();

        Self {
            identity,
            display_name: display_name.into(),
            port,
            state: SessionState::Unconnected,
            link: None,
            current_speed: 0,
            last_command: None,
            battery_percent: None,
            last_notification: None,
            notifications_armed: false,
            mailbox_tx,
            mailbox_rx,
        }
    }

    /// Hub address
    #[must_use]
    pub const fn identity(&self) -> &HubIdentity {
        &self.identity
    }

    /// Human-readable name
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub(crate) fn set_display_name(&mut self, name: String) {
        self.display_name = name;
    }

    /// Lifecycle state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session holds a live link
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self.state, SessionState::Connected)
    }

    /// Last successfully commanded speed
    #[must_use]
    pub const fn current_speed(&self) -> i8 {
        self.current_speed
    }

    /// Last motor frame successfully written
    #[must_use]
    pub fn last_command(&self) -> Option<&[u8]> {
        self.last_command.as_deref()
    }

    /// Last reported battery level
    #[must_use]
    pub const fn battery_percent(&self) -> Option<u8> {
        self.battery_percent
    }

    /// Whether the notification subscription is running
    #[must_use]
    pub const fn notifications_armed(&self) -> bool {
        self.notifications_armed
    }

    /// Open a link to the hub
    ///
    /// Does nothing if already connected. On failure the session keeps its
    /// previous state.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::ConnectionFailed`] if the transport cannot connect
    /// within `timeout`.
    pub async fn connect(&mut self, transport: &dyn Transport, timeout: Duration) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let previous = self.state;
        self.state = SessionState::Connecting;
        info!("Connecting to {} ({})", self.display_name, self.identity);

        let outcome = match tokio::time::timeout(timeout, transport.connect(&self.identity)).await {
            Ok(Ok(link)) => Ok(link),
            Ok(Err(e @ HubError::ConnectionFailed(_))) => Err(e),
            Ok(Err(e)) => Err(HubError::ConnectionFailed(format!("{}: {e}", self.identity))),
            Err(_) => Err(HubError::ConnectionFailed(format!(
                "{}: timed out after {} ms",
                self.identity,
                timeout.as_millis()
            ))),
        };

        match outcome {
            Ok(link) => {
                let (mailbox_tx, mailbox_rx) = mpsc::unbounded_channel();
                self.mailbox_tx = mailbox_tx;
                self.mailbox_rx = mailbox_rx;
                self.link = Some(link);
                self.notifications_armed = false;
                self.state = SessionState::Connected;
                info!("{} connected", self.display_name);
                Ok(())
            }
            Err(e) => {
                self.state = previous;
                warn!("Could not connect to {}: {}", self.display_name, e);
                Err(e)
            }
        }
    }

    /// Drop the link, keeping last-known state
    ///
    /// # Errors
    ///
    /// Returns the transport error if the disconnect itself fails; the session
    /// is marked disconnected either way.
    pub async fn disconnect(&mut self) -> Result<()> {
        let Some(link) = self.link.take() else {
            return Ok(());
        };

        info!("Disconnecting from {}", self.display_name);
        self.mark_link_lost();
        link.disconnect().await
    }

    /// Command the motor
    ///
    /// `speed` is clamped to -100..=100. Speed and last command are only
    /// updated after the write succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Disconnected`] if the session has no link, and
    /// [`HubError::CommandFailed`] if the write fails. A write that finds the
    /// link gone also moves the session to [`SessionState::Disconnected`].
    pub async fn set_speed(&mut self, speed: i32) -> Result<()> {
        let speed = clamp_speed(speed);
        let frame = HubCommand::MotorSpeed {
            port: self.port,
            speed: i32::from(speed),
        }
        .to_bytes();

        self.write(&frame).await?;

        info!("{} speed set to {}", self.display_name, speed);
        self.current_speed = speed;
        self.last_command = Some(frame);
        Ok(())
    }

    /// Stop the motor
    ///
    /// # Errors
    ///
    /// Same as [`set_speed`](Self::set_speed).
    pub async fn stop(&mut self) -> Result<()> {
        self.set_speed(0).await
    }

    /// Subscribe to hub notifications, once per link
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Disconnected`] without a link, or the transport's
    /// subscription error. An "already subscribed" answer counts as success.
    pub async fn arm_notifications(&mut self) -> Result<()> {
        if self.notifications_armed {
            return Ok(());
        }

        let link = self.link.as_ref().ok_or(HubError::Disconnected)?;
        match link.subscribe_notifications(self.mailbox_tx.clone()).await {
            Ok(()) | Err(HubError::AlreadySubscribed) => {
                debug!("Notifications armed for {}", self.display_name);
                self.notifications_armed = true;
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Failed to arm notifications for {}: {}",
                    self.display_name, e
                );
                Err(e)
            }
        }
    }

    /// Ask the hub for its battery level and wait `settle` for the answer
    ///
    /// The reply arrives as a notification. If nothing arrives in time the
    /// previous value (possibly `None`) is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns subscription or write errors; a missing reply is not an error.
    pub async fn request_battery(&mut self, settle: Duration) -> Result<Option<u8>> {
        self.arm_notifications().await?;

        let frame = HubCommand::BatteryRequest.to_bytes();
        self.write(&frame).await?;

        tokio::time::sleep(settle).await;
        self.drain_notifications();

        if self.battery_percent.is_none() {
            debug!("{} did not report a battery level", self.display_name);
        }
        Ok(self.battery_percent)
    }

    /// Apply every queued notification, returning how many were queued
    pub fn drain_notifications(&mut self) -> usize {
        let mut drained = 0;
        while let Ok(payload) = self.mailbox_rx.try_recv() {
            self.handle_notification(&payload);
            drained += 1;
        }
        drained
    }

    /// Apply one notification payload, returning whether it was a battery frame
    pub fn handle_notification(&mut self, payload: &[u8]) -> bool {
        let Some(pct) = decode_battery_notification(payload) else {
            debug!("Ignoring notification {:02X?}", payload);
            return false;
        };

        debug!("{} battery at {}%", self.display_name, pct);
        self.battery_percent = Some(pct.min(100));
        self.last_notification = Some(payload.to_vec());
        true
    }

    /// Poll the link and mark the session disconnected if it is gone
    pub async fn refresh_link(&mut self) -> bool {
        self.drain_notifications();
        if let Some(link) = &self.link {
            if !link.is_connected().await {
                warn!("Lost link to {}", self.display_name);
                self.link = None;
                self.mark_link_lost();
            }
        }
        self.is_connected()
    }

    /// Status row for this hub
    #[must_use]
    pub fn status(&self) -> HubStatus {
        HubStatus {
            identity: self.identity.clone(),
            name: self.display_name.clone(),
            connected: self.is_connected(),
            speed: self.current_speed,
        }
    }

    /// Diagnostic snapshot for this hub
    #[must_use]
    pub fn diagnostics(&self) -> HubDiagnostics {
        HubDiagnostics {
            name: self.display_name.clone(),
            speed: self.current_speed,
            connected: self.is_connected(),
            address: self.identity.clone(),
            last_command_hex: self.last_command.as_deref().map(to_hex),
            battery_percent: self.battery_percent,
            last_notification_hex: self.last_notification.as_deref().map(to_hex),
        }
    }

    async fn write(&mut self, frame: &[u8]) -> Result<()> {
        self.drain_notifications();
        let link = self.link.as_ref().ok_or(HubError::Disconnected)?;
        debug!("{} <- {}", self.display_name, to_hex(frame));

        let outcome = link.write_command(frame).await;
        self.drain_notifications();

        match outcome {
            Ok(()) => Ok(()),
            Err(e) => {
                if e.is_link_lost() {
                    warn!("Link to {} lost during write", self.display_name);
                    self.link = None;
                    self.mark_link_lost();
                }
                Err(match e {
                    HubError::CommandFailed(_) => e,
                    other => HubError::CommandFailed(format!("{}: {other}", self.identity)),
                })
            }
        }
    }

    fn mark_link_lost(&mut self) {
        self.state = SessionState::Disconnected;
        self.notifications_armed = false;
    }
}

impl std::fmt::Debug for HubSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubSession")
            .field("identity", &self.identity)
            .field("display_name", &self.display_name)
            .field("state", &self.state)
            .field("current_speed", &self.current_speed)
            .field("battery_percent", &self.battery_percent)
            .finish_non_exhaustive()
    }
}
