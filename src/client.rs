//! Reactive PLC client.
//!
//! [`PlcClient`] ties the pieces together: it owns the session and the
//! tag table, runs the polling loop on a background task, and exposes
//! registration, observation, cached reads, fire-and-forget writes, and
//! the clock/cycle-time pass-throughs.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDateTime;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{FinsError, Result};
use crate::model::PlcType;
use crate::poll::{spawn_poll_loop, PlcError, TagEvent, TagTable, DEFAULT_EVENT_CAPACITY};
use crate::response::{ClockReading, CycleTime};
use crate::session::PlcSession;
use crate::transport::{Channel, ChannelConfig, Transport, DEFAULT_FINS_PORT};
use crate::value::{PlcTagValue, TagValue};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default number of additional attempts after an I/O failure.
pub const DEFAULT_RETRIES: u32 = 1;

/// Default sleep between poll cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Connection options, immutable once the client is built.
#[derive(Debug, Clone)]
pub struct PlcOptions {
    /// PLC hostname or IP address.
    pub host: String,
    /// Destination port (default 9600 for both transports).
    pub port: u16,
    /// Transport carrying the FINS messages.
    pub transport: Transport,
    /// This client's FINS node address (1-254). Over TCP the handshake
    /// result overrides it.
    pub local_node_id: u8,
    /// The PLC's FINS node address (1-254, distinct from the local one).
    pub remote_node_id: u8,
    /// Per-request deadline.
    pub timeout: Duration,
    /// Additional attempts beyond the first on I/O failure.
    pub retries: u32,
    /// Sleep between poll cycles.
    pub poll_interval: Duration,
    /// Broadcast stream capacity; slow subscribers lose the oldest events
    /// beyond this depth.
    pub event_capacity: usize,
}

impl PlcOptions {
    /// Creates options with the documented defaults: port 9600, 2 s
    /// timeout, 1 retry, 100 ms poll interval.
    pub fn new(
        host: impl Into<String>,
        transport: Transport,
        local_node_id: u8,
        remote_node_id: u8,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_FINS_PORT,
            transport,
            local_node_id,
            remote_node_id,
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            poll_interval: DEFAULT_POLL_INTERVAL,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Sets a custom port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets a custom per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry count.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the broadcast stream capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    fn validate(&self) -> Result<()> {
        for (label, node) in [
            ("local node id", self.local_node_id),
            ("remote node id", self.remote_node_id),
        ] {
            if node == 0 || node == 255 {
                return Err(FinsError::config_invalid(format!(
                    "{} must be 1-254, got {}",
                    label, node
                )));
            }
        }
        if self.local_node_id == self.remote_node_id {
            return Err(FinsError::config_invalid(
                "local and remote node ids must differ",
            ));
        }
        if self.event_capacity == 0 {
            return Err(FinsError::config_invalid(
                "event capacity must be at least 1",
            ));
        }
        Ok(())
    }
}

/// A subscription to one tag's value stream.
///
/// The first `recv` yields the cached value retained at subscription
/// time (or `None` when the tag has not been read yet); afterwards each
/// `recv` yields a change event.
#[derive(Debug)]
pub struct TagSubscription<T> {
    initial: Option<Option<TagValue>>,
    rx: broadcast::Receiver<TagValue>,
    _marker: PhantomData<T>,
}

impl<T: PlcTagValue> TagSubscription<T> {
    /// Receives the next value. Returns `None` once the stream closes.
    /// A subscriber that lags past the stream capacity silently skips
    /// the lost (oldest) events.
    pub async fn recv(&mut self) -> Option<Option<T>> {
        if let Some(initial) = self.initial.take() {
            return Some(initial.as_ref().and_then(T::from_tag_value));
        }
        loop {
            match self.rx.recv().await {
                Ok(value) => return Some(T::from_tag_value(&value)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "tag subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Reactive FINS client with a polled tag table.
///
/// # Example
///
/// ```no_run
/// use omron_tagio::{PlcClient, PlcOptions, Transport};
///
/// # async fn run() -> omron_tagio::Result<()> {
/// let client = PlcClient::new(PlcOptions::new("192.168.1.250", Transport::Udp, 1, 10))?;
/// client.register_tag::<i32>("D100", "counter")?;
///
/// let mut counter = client.observe::<i32>("counter")?;
/// while let Some(value) = counter.recv().await {
///     println!("counter = {:?}", value);
/// }
/// client.dispose().await;
/// # Ok(())
/// # }
/// ```
pub struct PlcClient {
    session: Arc<PlcSession>,
    table: Arc<TagTable>,
    cancel: CancellationToken,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl PlcClient {
    /// Validates the options and starts the polling loop.
    ///
    /// Must be called from within a tokio runtime. The session
    /// initializes lazily: the first poll tick opens the channel and
    /// identifies the controller, retrying every tick until it succeeds.
    pub fn new(options: PlcOptions) -> Result<Self> {
        options.validate()?;

        let channel = Channel::new(ChannelConfig {
            transport: options.transport,
            host: options.host.clone(),
            port: options.port,
            timeout: options.timeout,
            retries: options.retries,
            local_node: options.local_node_id,
            remote_node: options.remote_node_id,
        });
        let session = Arc::new(PlcSession::new(channel));
        let table = Arc::new(TagTable::new(options.event_capacity));
        let cancel = CancellationToken::new();

        let poll_task = spawn_poll_loop(
            session.clone(),
            table.clone(),
            options.poll_interval,
            cancel.clone(),
        );

        Ok(Self {
            session,
            table,
            cancel,
            poll_task: Mutex::new(Some(poll_task)),
        })
    }

    /// Initializes the session now instead of waiting for the next poll
    /// tick. Idempotent.
    pub async fn initialize(&self) -> Result<()> {
        self.session.initialize().await
    }

    /// Registers a tag, or replaces it when the name is reused with a
    /// different type or address. Names compare case-insensitively.
    pub fn register_tag<T: PlcTagValue>(&self, address: &str, name: &str) -> Result<()> {
        self.table.register(name, address, T::KIND)
    }

    /// Observes a tag's value stream. The subscription re-emits the
    /// latest cached value first.
    ///
    /// # Errors
    ///
    /// `AddressInvalid` when the name is unknown, `TypeMismatch` when
    /// `T` differs from the registered kind.
    pub fn observe<T: PlcTagValue>(&self, name: &str) -> Result<TagSubscription<T>> {
        let kind = self
            .table
            .kind(name)
            .ok_or_else(|| FinsError::address_invalid(name, "tag is not registered"))?;
        if kind != T::KIND {
            return Err(FinsError::TypeMismatch {
                tag: name.to_string(),
            });
        }
        let (initial, rx) = self
            .table
            .subscribe(name)
            .ok_or_else(|| FinsError::address_invalid(name, "tag is not registered"))?;
        Ok(TagSubscription {
            initial: Some(initial),
            rx,
            _marker: PhantomData,
        })
    }

    /// Observes every tag change as (name, value) events.
    pub fn observe_all(&self) -> broadcast::Receiver<TagEvent> {
        self.table.subscribe_all()
    }

    /// Observes the error stream fed by the poll loop and by
    /// fire-and-forget writes.
    pub fn errors(&self) -> broadcast::Receiver<PlcError> {
        self.table.subscribe_errors()
    }

    /// Synchronously reads the cached value of a tag. `None` when the
    /// tag is unknown, unpolled, or `T` mismatches the registered kind.
    pub fn value<T: PlcTagValue>(&self, name: &str) -> Option<T> {
        self.table
            .cached(name)
            .as_ref()
            .and_then(T::from_tag_value)
    }

    /// Fire-and-forget write of a tag. Failures surface through
    /// [`errors`](Self::errors).
    pub fn write<T: PlcTagValue>(&self, name: &str, value: T) {
        let session = self.session.clone();
        let table = self.table.clone();
        let name = name.to_string();
        let value = value.into_tag_value();
        tokio::spawn(async move {
            if let Err(error) = table.write_tag(&session, &name, value).await {
                table.publish_error(Some(name), error);
            }
        });
    }

    /// Reads the PLC clock.
    pub async fn read_clock(&self) -> Result<ClockReading> {
        self.session.read_clock().await
    }

    /// Sets the PLC clock; omitting `day_of_week` derives it from the
    /// date (0 = Sunday).
    pub async fn write_clock(
        &self,
        datetime: NaiveDateTime,
        day_of_week: Option<u8>,
    ) -> Result<()> {
        self.session.write_clock(datetime, day_of_week).await
    }

    /// Reads the PLC scan cycle times.
    pub async fn read_cycle_time(&self) -> Result<CycleTime> {
        self.session.read_cycle_time().await
    }

    /// Detected controller family, `Unknown` until initialization.
    pub fn plc_type(&self) -> PlcType {
        self.session.plc_type()
    }

    /// Controller model string, `None` until initialization.
    pub fn controller_model(&self) -> Option<String> {
        self.session.controller_model()
    }

    /// Controller version string, `None` until initialization.
    pub fn controller_version(&self) -> Option<String> {
        self.session.controller_version()
    }

    /// Stops the poll loop, waits up to two seconds for it to finish,
    /// closes the per-tag streams and the channel.
    ///
    /// Dropping the client without calling `dispose` aborts the poll
    /// task instead of joining it; relying on that is a last resort,
    /// not a shutdown strategy.
    pub async fn dispose(&self) {
        self.cancel.cancel();
        let handle = self
            .poll_task
            .lock()
            .expect("poll task lock poisoned")
            .take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .is_err()
            {
                warn!("poll loop did not stop within 2s");
            }
        }
        self.table.clear();
        self.session.close().await;
    }
}

impl Drop for PlcClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Ok(mut guard) = self.poll_task.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

impl std::fmt::Debug for PlcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlcClient")
            .field("plc_type", &self.session.plc_type())
            .field("initialized", &self.session.is_initialized())
            .finish()
    }
}
