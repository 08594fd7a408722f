use futures::future::{FutureExt, LocalBoxFuture};
use std::{
    future::Future,
    sync::{mpsc as std_mpsc, Arc},
    thread,
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::{
    ble::{BleTransport, Transport},
    controller::HubController,
    error::{HubError, Result},
    types::{HubConfig, HubDiagnostics, HubIdentity, HubStatus},
};

type Job = Box<dyn for<'a> FnOnce(&'a mut HubController) -> LocalBoxFuture<'a, ()> + Send>;

fn boxed_job<F>(f: F) -> Job
where
    F: for<'a> FnOnce(&'a mut HubController) -> LocalBoxFuture<'a, ()> + Send + 'static,
{
    Box::new(f)
}

/// Handle to the thread that owns every hub
///
/// The context runs a single-threaded tokio runtime on a dedicated thread and
/// holds the [`HubController`]. Operations submitted from any thread run there
/// one at a time, in submission order, so each one sees the result of the
/// previous one in full.
///
/// The thread lives as long as any clone of the handle.
#[derive(Clone)]
pub struct ExecutionContext {
    jobs: mpsc::UnboundedSender<Job>,
    timeout: Duration,
}

impl ExecutionContext {
    /// Start a context around an existing transport
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Io`] if the thread or runtime cannot be created.
    pub fn start(transport: Arc<dyn Transport>, config: HubConfig) -> Result<Self> {
        Self::start_with(config, move || async move { Ok(transport) })
    }

    /// Start a context whose transport is built on the context thread
    ///
    /// Use this for transports that need a running runtime to be created,
    /// such as [`BleTransport`].
    ///
    /// # Errors
    ///
    /// Returns whatever `init` fails with, or [`HubError::Io`] if the thread
    /// or runtime cannot be created.
    pub fn start_with<F, Fut>(config: HubConfig, init: F) -> Result<Self>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Arc<dyn Transport>>>,
    {
        let timeout = config.bridge_timeout();
        let (jobs_tx, mut jobs_rx) = mpsc::unbounded_channel::<Job>();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<()>>(1);

        thread::Builder::new()
            .name("hub-io".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.into()));
                        return;
                    }
                };

                runtime.block_on(async move {
                    let transport = match init().await {
                        Ok(transport) => transport,
                        Err(e) => {
                            error!("Failed to initialise hub transport: {}", e);
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };

                    let mut controller = HubController::new(transport, config);
                    let _ = ready_tx.send(Ok(()));
                    info!("Hub execution context running");

                    while let Some(job) = jobs_rx.recv().await {
                        job(&mut controller).await;
                    }

                    debug!("Hub execution context stopped");
                });
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                jobs: jobs_tx,
                timeout,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(HubError::ContextClosed),
        }
    }

    /// Default wait applied by [`run_sync`](Self::run_sync)
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Queue an operation without waiting for it
    ///
    /// The operation runs even if the returned [`PendingCall`] is dropped or
    /// times out.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::ContextClosed`] if the context thread has exited.
    pub fn submit<T, F>(&self, operation: F) -> Result<PendingCall<T>>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut HubController) -> LocalBoxFuture<'a, Result<T>> + Send + 'static,
    {
        let (reply_tx, reply_rx) = std_mpsc::sync_channel(1);

        let job = boxed_job(move |controller| {
            async move {
                let result = operation(controller).await;
                // the caller may have given up waiting
                let _ = reply_tx.send(result);
            }
            .boxed_local()
        });

        self.jobs.send(job).map_err(|_| HubError::ContextClosed)?;

        Ok(PendingCall {
            reply: reply_rx,
            timeout: self.timeout,
        })
    }

    /// Run an operation on the context and block until it finishes
    ///
    /// Must not be called from the context thread itself.
    ///
    /// # Errors
    ///
    /// Returns the operation's own error, [`HubError::Timeout`] after the
    /// configured bridge timeout, or [`HubError::ContextClosed`].
    pub fn run_sync<T, F>(&self, operation: F) -> Result<T>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut HubController) -> LocalBoxFuture<'a, Result<T>> + Send + 'static,
    {
        self.submit(operation)?.wait()
    }

    /// [`run_sync`](Self::run_sync) with an explicit timeout
    ///
    /// # Errors
    ///
    /// Same as [`run_sync`](Self::run_sync).
    pub fn run_sync_with_timeout<T, F>(&self, timeout: Duration, operation: F) -> Result<T>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut HubController) -> LocalBoxFuture<'a, Result<T>> + Send + 'static,
    {
        self.submit(operation)?.wait_timeout(timeout)
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("timeout", &self.timeout)
            .field("closed", &self.jobs.is_closed())
            .finish()
    }
}

/// Result of a submitted operation, not yet received
#[derive(Debug)]
pub struct PendingCall<T> {
    reply: std_mpsc::Receiver<Result<T>>,
    timeout: Duration,
}

impl<T> PendingCall<T> {
    /// Block for the result, up to the context's bridge timeout
    ///
    /// # Errors
    ///
    /// Returns the operation's error, [`HubError::Timeout`], or
    /// [`HubError::ContextClosed`] if the context dropped the operation.
    pub fn wait(self) -> Result<T> {
        let timeout = self.timeout;
        self.wait_timeout(timeout)
    }

    /// Block for the result, up to `timeout`
    ///
    /// # Errors
    ///
    /// Same as [`wait`](Self::wait).
    pub fn wait_timeout(self, timeout: Duration) -> Result<T> {
        match self.reply.recv_timeout(timeout) {
            Ok(result) => result,
            Err(std_mpsc::RecvTimeoutError::Timeout) => Err(HubError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            Err(std_mpsc::RecvTimeoutError::Disconnected) => Err(HubError::ContextClosed),
        }
    }
}

/// Blocking control surface for front ends
///
/// Every call is funnelled through one [`ExecutionContext`] and waits at most
/// the configured bridge timeout. Clones share the same hubs.
#[derive(Debug, Clone)]
pub struct HubControl {
    context: ExecutionContext,
}

impl HubControl {
    /// Start with the system's first Bluetooth adapter
    ///
    /// # Errors
    ///
    /// Returns [`HubError::DiscoveryFailed`] if no adapter is available.
    pub fn start(config: HubConfig) -> Result<Self> {
        let context = ExecutionContext::start_with(config, || async {
            BleTransport::new()
                .await
                .map(|transport| Arc::new(transport) as Arc<dyn Transport>)
        })?;
        Ok(Self { context })
    }

    /// Start with a caller-supplied transport
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Io`] if the context thread cannot be started.
    pub fn with_transport(transport: Arc<dyn Transport>, config: HubConfig) -> Result<Self> {
        Ok(Self {
            context: ExecutionContext::start(transport, config)?,
        })
    }

    /// The underlying execution context
    #[must_use]
    pub const fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Scan and connect, returning the number of connected hubs
    ///
    /// # Errors
    ///
    /// Returns [`HubError::DiscoveryFailed`] or a bridge error.
    pub fn connect(&self) -> Result<usize> {
        self.context
            .run_sync(|hubs| async move { hubs.connect_all().await }.boxed_local())
    }

    /// Scan and connect, returning the number of newly connected hubs
    ///
    /// # Errors
    ///
    /// Returns [`HubError::DiscoveryFailed`] or a bridge error.
    pub fn scan(&self) -> Result<usize> {
        self.context
            .run_sync(|hubs| async move { hubs.scan_new().await }.boxed_local())
    }

    /// Rename a hub
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`], [`HubError::InvalidName`] or a bridge
    /// error.
    pub fn rename(&self, identity: &HubIdentity, name: &str) -> Result<()> {
        let identity = identity.clone();
        let name = name.to_string();
        self.context
            .run_sync(move |hubs| async move { hubs.rename(&identity, &name) }.boxed_local())
    }

    /// Set one hub's motor speed, reconnecting it if needed
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`], a connection or command error, or a
    /// bridge error.
    pub fn set_speed(&self, identity: &HubIdentity, speed: i32) -> Result<()> {
        let identity = identity.clone();
        self.context.run_sync(move |hubs| {
            async move { hubs.set_speed(&identity, speed).await }.boxed_local()
        })
    }

    /// Set every connected hub's motor speed
    ///
    /// # Errors
    ///
    /// Returns the first per-hub failure or a bridge error.
    pub fn set_speed_all(&self, speed: i32) -> Result<usize> {
        self.context
            .run_sync(move |hubs| async move { hubs.set_speed_all(speed).await }.boxed_local())
    }

    /// Stop one hub
    ///
    /// # Errors
    ///
    /// Same as [`set_speed`](Self::set_speed).
    pub fn stop(&self, identity: &HubIdentity) -> Result<()> {
        self.set_speed(identity, 0)
    }

    /// Stop every connected hub
    ///
    /// # Errors
    ///
    /// Same as [`set_speed_all`](Self::set_speed_all).
    pub fn stop_all(&self) -> Result<usize> {
        self.set_speed_all(0)
    }

    /// Status of every registered hub
    ///
    /// # Errors
    ///
    /// Returns a bridge error.
    pub fn status(&self) -> Result<Vec<HubStatus>> {
        self.context
            .run_sync(|hubs| async move { Ok(hubs.status().await) }.boxed_local())
    }

    /// Diagnostics for one hub
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] or a bridge error.
    pub fn debug(&self, identity: &HubIdentity) -> Result<HubDiagnostics> {
        let identity = identity.clone();
        self.context
            .run_sync(move |hubs| async move { hubs.debug(&identity).await }.boxed_local())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{protocol::encode_motor_command, protocol::to_hex, testing::MockTransport};
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    fn config() -> HubConfig {
        HubConfig {
            scan_timeout_ms: 10,
            connect_timeout_ms: 200,
            bridge_timeout_ms: 2_000,
            battery_settle_ms: 10,
            ..HubConfig::default()
        }
    }

    fn control(transport: &MockTransport) -> HubControl {
        assert_ok!(HubControl::with_transport(
            Arc::new(transport.clone()),
            config()
        ))
    }

    fn two_hubs() -> MockTransport {
        MockTransport::with_devices(&[
            ("AA:AA", Some("LEGO Hub A")),
            ("BB:BB", Some("City Set")),
            ("CC:CC", Some("Speaker")),
        ])
    }

    #[test]
    fn test_connect_and_status() {
        let transport = two_hubs();
        let hubs = control(&transport);

        assert_eq!(assert_ok!(hubs.connect()), 2);
        assert_eq!(assert_ok!(hubs.scan()), 0);

        let status = assert_ok!(hubs.status());
        let rows: Vec<_> = status
            .iter()
            .map(|s| (s.identity.as_str(), s.name.as_str(), s.connected, s.speed))
            .collect();
        assert_eq!(
            rows,
            [("AA:AA", "Hub 1", true, 0), ("BB:BB", "Hub 2", true, 0)]
        );
    }

    #[test]
    fn test_facade_round_trip() {
        let transport = two_hubs();
        transport
            .state()
            .battery
            .insert(HubIdentity::from("BB:BB"), 77);
        let hubs = control(&transport);
        assert_ok!(hubs.connect());
        let id = HubIdentity::from("BB:BB");

        assert_ok!(hubs.rename(&id, "Freight"));
        assert!(matches!(
            assert_err!(hubs.rename(&id, "  ")),
            HubError::InvalidName
        ));
        assert_ok!(hubs.set_speed(&id, -50));

        let info = assert_ok!(hubs.debug(&id));
        assert_eq!(info.name, "Freight");
        assert_eq!(info.speed, -50);
        assert_eq!(info.battery_label(), "77%");
        assert_eq!(
            info.last_command_hex,
            Some(to_hex(&encode_motor_command(0, -50)))
        );

        assert_eq!(assert_ok!(hubs.stop_all()), 2);
        assert!(assert_ok!(hubs.status()).iter().all(|s| s.speed == 0));
    }

    #[test]
    fn test_unknown_hub_is_not_found() {
        let hubs = control(&two_hubs());

        let err = assert_err!(hubs.set_speed(&"ZZ:ZZ".into(), 10));
        assert!(matches!(err, HubError::NotFound(_)));
        let err = assert_err!(hubs.debug(&"ZZ:ZZ".into()));
        assert!(matches!(err, HubError::NotFound(_)));
    }

    #[test]
    fn test_operations_run_in_submission_order() {
        let hubs = control(&two_hubs());
        let log = Arc::new(Mutex::new(Vec::new()));

        let calls: Vec<_> = [30_u64, 0, 10]
            .into_iter()
            .enumerate()
            .map(|(n, delay)| {
                let log = Arc::clone(&log);
                assert_ok!(hubs.context().submit(move |_| {
                    async move {
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        log.lock().unwrap().push(n);
                        Ok(n)
                    }
                    .boxed_local()
                }))
            })
            .collect();

        let results: Vec<_> = calls.into_iter().map(|call| assert_ok!(call.wait())).collect();
        assert_eq!(results, [0, 1, 2]);
        assert_eq!(*log.lock().unwrap(), [0, 1, 2]);
    }

    #[test]
    fn test_concurrent_reader_never_sees_partial_update() {
        let transport = two_hubs();
        let hubs = control(&transport);
        assert_ok!(hubs.connect());
        transport.state().write_delay = Some(Duration::from_millis(20));
        let id = HubIdentity::from("AA:AA");
        let full_frame = to_hex(&encode_motor_command(0, 50));

        let writer = {
            let hubs = hubs.clone();
            let id = id.clone();
            thread::spawn(move || hubs.set_speed(&id, 50))
        };

        for _ in 0..10 {
            let id = id.clone();
            let snapshot = assert_ok!(hubs.context().run_sync(move |hubs| {
                async move {
                    hubs.registry()
                        .get(&id)
                        .map(|s| (s.current_speed(), s.last_command().map(to_hex)))
                        .ok_or_else(|| HubError::NotFound(id.to_string()))
                }
                .boxed_local()
            }));

            match snapshot {
                (0, None) => {}
                (50, Some(hex)) => assert_eq!(hex, full_frame),
                other => panic!("partial update observed: {other:?}"),
            }
        }

        assert_ok!(assert_ok!(writer.join()));
    }

    #[test]
    fn test_timeout_does_not_cancel_operation() {
        let transport = two_hubs();
        let hubs = control(&transport);
        assert_ok!(hubs.connect());
        transport.state().write_delay = Some(Duration::from_millis(100));
        let id = HubIdentity::from("AA:AA");

        let slow = {
            let id = id.clone();
            hubs.context()
                .run_sync_with_timeout(Duration::from_millis(10), move |hubs| {
                    async move { hubs.set_speed(&id, 60).await }.boxed_local()
                })
        };
        assert!(matches!(
            assert_err!(slow),
            HubError::Timeout { timeout_ms: 10 }
        ));

        // the next operation queues behind the slow one and sees its effect
        let status = assert_ok!(hubs.status());
        assert_eq!(status[0].speed, 60);
    }

    #[test]
    fn test_init_failure_is_reported() {
        let result = ExecutionContext::start_with(config(), || async {
            Err(HubError::DiscoveryFailed("no adapter".to_string()))
        });

        let err = assert_err!(result);
        assert!(matches!(err, HubError::DiscoveryFailed(msg) if msg == "no adapter"));
    }

    #[test]
    fn test_operation_error_is_returned_to_caller() {
        let transport = two_hubs();
        let hubs = control(&transport);
        assert_ok!(hubs.connect());

        transport.state().fail_writes = true;
        let err = assert_err!(hubs.set_speed_all(40));
        assert!(matches!(err, HubError::CommandFailed(_)));

        transport.state().fail_writes = false;
        assert_eq!(assert_ok!(hubs.set_speed_all(40)), 2);
    }
}
