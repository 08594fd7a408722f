//! In-memory transport for unit tests.

use async_trait::async_trait;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use crate::{
    ble::{HubLink, NotificationSink, Transport},
    error::{HubError, Result},
    protocol::{encode_battery_request, MOTOR_FRAME_LEN},
    types::{DiscoveredDevice, HubIdentity},
};

/// Scripted behaviour and recorded traffic of a [`MockTransport`]
#[derive(Default)]
pub(crate) struct MockState {
    pub devices: Vec<DiscoveredDevice>,
    pub fail_discovery: bool,
    pub refuse_connect: HashSet<HubIdentity>,
    pub connects: Vec<HubIdentity>,
    pub writes: Vec<(HubIdentity, Vec<u8>)>,
    pub fail_writes: bool,
    pub lose_link_on_write: bool,
    pub fail_subscribe: bool,
    pub already_subscribed: bool,
    pub subscribe_calls: usize,
    pub feedback_on_write: bool,
    pub write_delay: Option<Duration>,
    pub battery: HashMap<HubIdentity, u8>,
    pub links_down: HashSet<HubIdentity>,
}

#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn with_devices(devices: &[(&str, Option<&str>)]) -> Self {
        let transport = Self::default();
        transport.state().devices = devices
            .iter()
            .map(|(address, name)| DiscoveredDevice::new(*address, name.map(str::to_string)))
            .collect();
        transport
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn writes_to(&self, identity: &str) -> Vec<Vec<u8>> {
        self.state()
            .writes
            .iter()
            .filter(|(id, _)| id.as_str() == identity)
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    pub fn connect_count(&self, identity: &str) -> usize {
        self.state()
            .connects
            .iter()
            .filter(|id| id.as_str() == identity)
            .count()
    }

    pub fn drop_link(&self, identity: &str) {
        self.state().links_down.insert(HubIdentity::from(identity));
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn discover(&self, _timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
        let state = self.state();
        if state.fail_discovery {
            return Err(HubError::DiscoveryFailed("adapter powered off".to_string()));
        }
        Ok(state.devices.clone())
    }

    async fn connect(&self, identity: &HubIdentity) -> Result<Box<dyn HubLink>> {
        let mut state = self.state();
        state.connects.push(identity.clone());
        if state.refuse_connect.contains(identity) {
            return Err(HubError::ConnectionFailed(format!("{identity} out of range")));
        }
        state.links_down.remove(identity);

        Ok(Box::new(MockLink {
            identity: identity.clone(),
            state: Arc::clone(&self.state),
            sink: Mutex::new(None),
        }))
    }
}

struct MockLink {
    identity: HubIdentity,
    state: Arc<Mutex<MockState>>,
    sink: Mutex<Option<NotificationSink>>,
}

impl MockLink {
    fn write_delay(&self) -> Option<Duration> {
        self.state.lock().unwrap().write_delay
    }

    fn record_write(&self, frame: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.links_down.contains(&self.identity) {
            return Err(HubError::Disconnected);
        }
        if state.lose_link_on_write {
            state.links_down.insert(self.identity.clone());
            return Err(HubError::Disconnected);
        }
        if state.fail_writes {
            return Err(HubError::CommandFailed("GATT write rejected".to_string()));
        }
        state.writes.push((self.identity.clone(), frame.to_vec()));

        if state.feedback_on_write && frame.len() == MOTOR_FRAME_LEN {
            if let Some(sink) = self.sink.lock().unwrap().as_ref() {
                let _ = sink.send(vec![0x05, 0x00, 0x82, frame[3], 0x0a]);
            }
        }

        if frame == encode_battery_request().as_ref() {
            if let (Some(pct), Some(sink)) = (
                state.battery.get(&self.identity).copied(),
                self.sink.lock().unwrap().as_ref(),
            ) {
                // port feedback first, which must be ignored
                let _ = sink.send(vec![0x05, 0x00, 0x82, 0x00, 0x0a]);
                let _ = sink.send(vec![0x06, 0x00, 0x01, 0x06, 0x06, pct]);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl HubLink for MockLink {
    async fn write_command(&self, frame: &[u8]) -> Result<()> {
        if let Some(delay) = self.write_delay() {
            tokio::time::sleep(delay).await;
        }
        self.record_write(frame)
    }

    async fn subscribe_notifications(&self, sink: NotificationSink) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_subscribe {
            return Err(HubError::SubscriptionFailed("CCCD write failed".to_string()));
        }
        state.subscribe_calls += 1;

        let mut current = self.sink.lock().unwrap();
        let already = current.is_some() || state.already_subscribed;
        // a link that was already subscribed keeps delivering
        current.get_or_insert(sink);
        if already {
            return Err(HubError::AlreadySubscribed);
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        !self.state.lock().unwrap().links_down.contains(&self.identity)
    }

    async fn disconnect(&self) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .links_down
            .insert(self.identity.clone());
        Ok(())
    }
}
