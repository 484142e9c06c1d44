use crate::store::TelemetryStore;
use crate::telemetry::FlowSample;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use uuid::Uuid;

/// A decoded sample held in the retention window.
#[derive(Debug, Clone)]
pub struct BufferedEntry {
    pub id: Uuid,
    pub sample: FlowSample,
    pub expires_at: DateTime<Utc>,
    remote_id: Option<String>,
}

/// Optional remote mirror: appended samples are also pushed to the store's
/// buffer path and removed again when the entry expires. The in-memory
/// buffer stays authoritative; mirror failures are logged, never fatal.
#[derive(Clone)]
pub struct BufferMirror {
    pub store: Arc<dyn TelemetryStore>,
    pub path: String,
}

struct Slot {
    entry: BufferedEntry,
    expiry: AbortHandle,
}

#[derive(Default)]
struct Inner {
    entries: VecDeque<Slot>,
}

impl Inner {
    fn take(&mut self, id: Uuid) -> Option<Slot> {
        let idx = self.entries.iter().position(|slot| slot.entry.id == id)?;
        self.entries.remove(idx)
    }
}

/// Append-only, self-expiring buffer of decoded samples.
///
/// Each append schedules a deferred removal after the retention duration.
/// The expiry task holds only a weak reference, so dropping the buffer
/// orphans (effectively cancels) all pending removals, and an explicit
/// `remove` aborts the entry's timer. All mutation goes through one lock,
/// so a snapshot can never observe a half-removed entry.
#[derive(Clone)]
pub struct SampleBuffer {
    inner: Arc<Mutex<Inner>>,
    retention: Duration,
    reject_idle: bool,
    mirror: Option<BufferMirror>,
}

impl SampleBuffer {
    pub fn new(retention: Duration, reject_idle: bool, mirror: Option<BufferMirror>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            retention,
            reject_idle,
            mirror,
        }
    }

    /// Store a sample and schedule its expiry. Returns `None` when the
    /// idle-sample filter rejects it (both flow channels non-positive);
    /// that is a policy outcome, not an error.
    pub async fn append(&self, sample: FlowSample) -> Option<Uuid> {
        if self.reject_idle && !sample.has_flow() {
            tracing::warn!(
                flow_primary = sample.flow_primary,
                flow_secondary = sample.flow_secondary,
                "rejecting idle sample"
            );
            return None;
        }

        let remote_id = match &self.mirror {
            Some(mirror) => match mirror.store.append(&mirror.path, mirror_record(&sample)).await {
                Ok(id) => Some(id),
                Err(err) => {
                    tracing::warn!(error = %err, path = %mirror.path, "buffer mirror push failed");
                    None
                }
            },
            None => None,
        };

        let id = Uuid::new_v4();
        let expires_at = Utc::now()
            + chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::zero());
        let expiry = self.spawn_expiry(id);

        let entry = BufferedEntry {
            id,
            sample,
            expires_at,
            remote_id,
        };
        let mut inner = self.inner.lock().expect("buffer lock poisoned");
        inner.entries.push_back(Slot { entry, expiry });
        tracing::debug!(%id, buffered = inner.entries.len(), "buffered sample");
        Some(id)
    }

    fn spawn_expiry(&self, id: Uuid) -> AbortHandle {
        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        let retention = self.retention;
        let mirror = self.mirror.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            let removed = weak.upgrade().and_then(|inner| {
                let mut inner = inner.lock().expect("buffer lock poisoned");
                inner.take(id)
            });
            let Some(slot) = removed else {
                return;
            };
            tracing::debug!(%id, "expired buffered sample");
            if let (Some(mirror), Some(remote_id)) = (mirror, slot.entry.remote_id) {
                if let Err(err) = mirror.store.delete(&mirror.path, &remote_id).await {
                    tracing::warn!(error = %err, remote_id, "buffer mirror delete failed");
                }
            }
        });
        handle.abort_handle()
    }

    /// All entries not yet expired, in insertion order.
    pub fn snapshot(&self) -> Vec<BufferedEntry> {
        let now = Utc::now();
        let inner = self.inner.lock().expect("buffer lock poisoned");
        inner
            .entries
            .iter()
            .filter(|slot| slot.entry.expires_at > now)
            .map(|slot| slot.entry.clone())
            .collect()
    }

    /// Last inserted, non-expired entry.
    pub fn latest(&self) -> Option<BufferedEntry> {
        self.snapshot().into_iter().next_back()
    }

    /// Explicitly remove an entry, cancelling its expiry timer and
    /// cleaning up the remote mirror record if one exists.
    pub async fn remove(&self, id: Uuid) -> bool {
        let removed = {
            let mut inner = self.inner.lock().expect("buffer lock poisoned");
            inner.take(id)
        };
        let Some(slot) = removed else {
            return false;
        };
        slot.expiry.abort();
        if let (Some(mirror), Some(remote_id)) = (&self.mirror, slot.entry.remote_id) {
            if let Err(err) = mirror.store.delete(&mirror.path, &remote_id).await {
                tracing::warn!(error = %err, remote_id, "buffer mirror delete failed");
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("buffer lock poisoned")
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn mirror_record(sample: &FlowSample) -> serde_json::Value {
    serde_json::json!({
        "values": {
            crate::telemetry::REG_TOTAL: sample.reading_total,
            crate::telemetry::REG_FLOW_PRIMARY: sample.flow_primary,
            crate::telemetry::REG_FLOW_SECONDARY: sample.flow_secondary,
            crate::telemetry::REG_DECIMALS: sample.decimal_places,
            crate::telemetry::REG_UNIT: sample.unit_code,
        },
        "ts": sample.sampled_at.timestamp_millis(),
    })
}
