//! Tag registry, polling loop, and change broadcast.
//!
//! Registered tags live in a case-insensitive table. One long-running
//! task walks the table every poll interval, issues the typed read for
//! each tag through the session, and publishes a change event to the
//! tag's own broadcast channel and the aggregate channel whenever the
//! fresh value differs from the cache. Every error is published to the
//! error stream and the loop keeps going; only cancellation stops it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{FinsError, Result};
use crate::memory::TagAddress;
use crate::session::PlcSession;
use crate::value::{TagValue, ValueKind};

/// Default capacity of each broadcast stream. Slow subscribers lose the
/// oldest events once they fall this far behind.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// A change event carried by the aggregate stream.
#[derive(Debug, Clone)]
pub struct TagEvent {
    /// Tag name as registered.
    pub name: String,
    /// The new value.
    pub value: TagValue,
}

/// An error surfaced through the error stream.
#[derive(Debug, Clone)]
pub struct PlcError {
    /// Tag the error belongs to, when it arose polling or writing one.
    pub tag: Option<String>,
    /// The underlying error.
    pub error: FinsError,
}

impl std::fmt::Display for PlcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "tag '{}': {}", tag, self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

/// What the poll loop needs to know to read or write one tag.
#[derive(Debug, Clone)]
struct TagSpec {
    address: TagAddress,
    kind: ValueKind,
}

struct TagEntry {
    /// Name as the caller registered it, for events.
    name: String,
    /// Raw address string, kept for replacement comparisons.
    raw_address: String,
    spec: TagSpec,
    last: Option<TagValue>,
    tx: broadcast::Sender<TagValue>,
}

/// Case-insensitive registry of tags plus the shared streams.
pub(crate) struct TagTable {
    entries: RwLock<HashMap<String, TagEntry>>,
    all_tx: broadcast::Sender<TagEvent>,
    err_tx: broadcast::Sender<PlcError>,
    capacity: usize,
}

impl TagTable {
    pub fn new(capacity: usize) -> Self {
        let (all_tx, _) = broadcast::channel(capacity);
        let (err_tx, _) = broadcast::channel(capacity);
        Self {
            entries: RwLock::new(HashMap::new()),
            all_tx,
            err_tx,
            capacity,
        }
    }

    /// Registers or replaces a tag. Re-registering the same name with the
    /// same kind and address is a no-op; anything else replaces the entry
    /// and resets its cache and stream.
    pub fn register(&self, name: &str, address: &str, kind: ValueKind) -> Result<()> {
        let parsed = TagAddress::parse(address)?;
        if parsed.bit.is_some() && kind != ValueKind::Bool {
            return Err(FinsError::address_invalid(
                address,
                "a bit index requires a bool tag",
            ));
        }
        if parsed.length.is_some() && kind != ValueKind::Text {
            return Err(FinsError::address_invalid(
                address,
                "a length bracket requires a string tag",
            ));
        }

        let key = name.to_lowercase();
        let mut entries = self.entries.write().expect("tag table lock poisoned");
        if let Some(existing) = entries.get(&key) {
            if existing.spec.kind == kind && existing.raw_address == address {
                return Ok(());
            }
        }
        let (tx, _) = broadcast::channel(self.capacity);
        entries.insert(
            key,
            TagEntry {
                name: name.to_string(),
                raw_address: address.to_string(),
                spec: TagSpec {
                    address: parsed,
                    kind,
                },
                last: None,
                tx,
            },
        );
        Ok(())
    }

    /// The cached value of a tag, if any.
    pub fn cached(&self, name: &str) -> Option<TagValue> {
        self.entries
            .read()
            .expect("tag table lock poisoned")
            .get(&name.to_lowercase())
            .and_then(|entry| entry.last.clone())
    }

    /// The registered kind of a tag.
    pub fn kind(&self, name: &str) -> Option<ValueKind> {
        self.entries
            .read()
            .expect("tag table lock poisoned")
            .get(&name.to_lowercase())
            .map(|entry| entry.spec.kind)
    }

    /// Subscribes to a tag's stream, returning the retained latest value
    /// alongside the receiver.
    pub fn subscribe(&self, name: &str) -> Option<(Option<TagValue>, broadcast::Receiver<TagValue>)> {
        self.entries
            .read()
            .expect("tag table lock poisoned")
            .get(&name.to_lowercase())
            .map(|entry| (entry.last.clone(), entry.tx.subscribe()))
    }

    /// Subscribes to the aggregate change stream.
    pub fn subscribe_all(&self) -> broadcast::Receiver<TagEvent> {
        self.all_tx.subscribe()
    }

    /// Subscribes to the error stream.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<PlcError> {
        self.err_tx.subscribe()
    }

    /// Publishes an error; subscribers may or may not exist.
    pub fn publish_error(&self, tag: Option<String>, error: FinsError) {
        warn!(tag = tag.as_deref().unwrap_or("-"), %error, "plc error");
        let _ = self.err_tx.send(PlcError { tag, error });
    }

    /// Writes a registered tag's value through the session.
    pub async fn write_tag(&self, session: &PlcSession, name: &str, value: TagValue) -> Result<()> {
        let spec = {
            let entries = self.entries.read().expect("tag table lock poisoned");
            let entry = entries
                .get(&name.to_lowercase())
                .ok_or_else(|| FinsError::address_invalid(name, "tag is not registered"))?;
            if entry.spec.kind != value.kind() {
                return Err(FinsError::TypeMismatch {
                    tag: entry.name.clone(),
                });
            }
            entry.spec.clone()
        };
        write_value(session, &spec, &value).await
    }

    /// Runs one poll pass over a snapshot of the registered tags.
    pub async fn poll_once(&self, session: &PlcSession, cancel: &CancellationToken) {
        let keys: Vec<String> = {
            let entries = self.entries.read().expect("tag table lock poisoned");
            entries.keys().cloned().collect()
        };

        for key in keys {
            if cancel.is_cancelled() {
                return;
            }
            let (name, spec) = {
                let entries = self.entries.read().expect("tag table lock poisoned");
                match entries.get(&key) {
                    Some(entry) => (entry.name.clone(), entry.spec.clone()),
                    // unregistered mid-pass
                    None => continue,
                }
            };

            match read_value(session, &spec).await {
                Ok(value) => self.publish_if_changed(&key, &name, value),
                Err(error) => self.publish_error(Some(name), error),
            }
        }
    }

    /// Updates the cache and publishes only when the value changed.
    fn publish_if_changed(&self, key: &str, name: &str, value: TagValue) {
        let mut entries = self.entries.write().expect("tag table lock poisoned");
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        if entry.last.as_ref() == Some(&value) {
            return;
        }
        entry.last = Some(value.clone());
        let _ = entry.tx.send(value.clone());
        let _ = self.all_tx.send(TagEvent {
            name: name.to_string(),
            value,
        });
    }

    /// Drops every tag entry, closing the per-tag streams.
    pub fn clear(&self) {
        self.entries
            .write()
            .expect("tag table lock poisoned")
            .clear();
    }
}

/// Issues the typed read for one tag.
async fn read_value(session: &PlcSession, spec: &TagSpec) -> Result<TagValue> {
    let addr = &spec.address;
    if let Some(bit) = addr.bit {
        let bits = session.read_bits(addr.area, addr.word, bit, 1).await?;
        return Ok(TagValue::Bool(bits.first().copied().unwrap_or(false)));
    }
    let count = spec.kind.word_count(addr.length);
    let words = session.read_words(addr.area, addr.word, count).await?;
    let unsigned: Vec<u16> = words.iter().map(|w| *w as u16).collect();
    TagValue::decode_words(spec.kind, &unsigned, addr.length)
}

/// Issues the typed write for one tag.
async fn write_value(session: &PlcSession, spec: &TagSpec, value: &TagValue) -> Result<()> {
    let addr = &spec.address;
    if let Some(bit) = addr.bit {
        let TagValue::Bool(v) = value else {
            return Err(FinsError::TypeMismatch {
                tag: addr.to_string(),
            });
        };
        return session.write_bits(addr.area, addr.word, bit, &[*v]).await;
    }
    let words = value.encode_words(addr.length);
    session.write_words(addr.area, addr.word, &words).await
}

/// Spawns the polling loop.
///
/// The loop initializes the session lazily, retrying once per tick until
/// it succeeds, then polls every registered tag each interval. It
/// observes cancellation between tags and during the inter-cycle sleep.
pub(crate) fn spawn_poll_loop(
    session: Arc<PlcSession>,
    table: Arc<TagTable>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(interval_ms = interval.as_millis() as u64, "poll loop started");
        loop {
            if cancel.is_cancelled() {
                break;
            }

            if !session.is_initialized() {
                if let Err(error) = session.initialize().await {
                    table.publish_error(None, error);
                    if sleep_or_cancel(interval, &cancel).await {
                        break;
                    }
                    continue;
                }
            }

            table.poll_once(&session, &cancel).await;

            if sleep_or_cancel(interval, &cancel).await {
                break;
            }
        }
        debug!("poll loop stopped");
    })
}

/// Sleeps for the interval; returns `true` when cancellation fired.
async fn sleep_or_cancel(interval: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(interval) => false,
    }
}
