use crate::aggregate::{aggregate, FlowAggregate, WindowPolicy};
use crate::buffer::SampleBuffer;
use crate::config::Config;
use crate::dispatch::{DispatchSink, RenderedMessage};
use crate::error::CycleError;
use crate::format;
use crate::store::TelemetryStore;
use crate::telemetry::decode_reading;
use chrono::{FixedOffset, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Orchestrates the two scheduled cycle kinds.
///
/// A sampling cycle fetches the live reading, decodes it and appends it to
/// the windowed buffer; a reporting cycle reduces the buffer to one
/// aggregate, renders the message and dispatches it. Cycles share no state
/// beyond the buffer, and each trigger kind carries its own reentrancy
/// guard so an overlapping fire skips instead of piling up.
pub struct CycleController {
    store: Arc<dyn TelemetryStore>,
    buffer: SampleBuffer,
    sink: DispatchSink,
    window_policy: WindowPolicy,
    recipients: Vec<String>,
    reading_path: String,
    site_label: String,
    display_offset: FixedOffset,
    sample_guard: Mutex<()>,
    report_guard: Mutex<()>,
}

impl CycleController {
    pub fn new(
        config: &Config,
        store: Arc<dyn TelemetryStore>,
        buffer: SampleBuffer,
        sink: DispatchSink,
    ) -> Self {
        Self {
            store,
            buffer,
            sink,
            window_policy: config.window_policy(),
            recipients: config.recipients.clone(),
            reading_path: config.reading_path.clone(),
            site_label: config.site_label.clone(),
            display_offset: config.display_offset(),
            sample_guard: Mutex::new(()),
            report_guard: Mutex::new(()),
        }
    }

    /// Sampling cycle: live reading -> decode -> buffer.
    pub async fn on_sample_tick(&self) -> Result<(), CycleError> {
        let Ok(_guard) = self.sample_guard.try_lock() else {
            tracing::warn!("previous sampling cycle still running; skipping");
            return Ok(());
        };

        let Some(payload) = self.store.read_feed(&self.reading_path).await? else {
            tracing::info!(path = %self.reading_path, "no data at feed path; skipping sample");
            return Ok(());
        };
        let readings = payload.normalize();
        let Some(latest) = readings.last() else {
            tracing::info!(path = %self.reading_path, "no records in feed; skipping sample");
            return Ok(());
        };
        let Some(sample) = decode_reading(latest) else {
            tracing::info!("latest reading is empty; skipping sample");
            return Ok(());
        };

        if let Some(id) = self.buffer.append(sample).await {
            tracing::debug!(%id, buffered = self.buffer.len(), "sample buffered");
        }
        Ok(())
    }

    /// Reporting cycle: buffer snapshot -> aggregate -> render -> dispatch.
    pub async fn on_report_tick(&self, label: &str) -> Result<(), CycleError> {
        let Ok(_guard) = self.report_guard.try_lock() else {
            tracing::warn!(label, "previous reporting cycle still running; skipping");
            return Ok(());
        };
        tracing::info!(label, "running reporting cycle");

        let snapshot = self.buffer.snapshot();
        let Some(agg) = aggregate(&snapshot, self.window_policy, Utc::now()) else {
            tracing::info!(label, buffered = snapshot.len(), "no valid data in window");
            return Err(CycleError::Validation);
        };

        // The cumulative total from the freshest sample goes into the log
        // line alongside the windowed flow, mirroring the operator view.
        if let Some(latest) = self.buffer.latest() {
            tracing::info!(
                label,
                total = %format::format_quantity(latest.sample.reading_total, latest.sample.decimal_places),
                flow_primary_avg = agg.flow_primary_avg,
                flow_secondary_avg = agg.flow_secondary_avg,
                unit = format::unit_label(agg.unit_code),
                "windowed aggregate"
            );
        }

        let message = self.render(label, &agg);
        tracing::info!(label, text = %message.text, "dispatching report");
        let summary = self
            .sink
            .dispatch_all(&message, &self.recipients)
            .await;
        tracing::info!(label, sent = summary.sent, failed = summary.failed, "reporting cycle done");
        Ok(())
    }

    fn render(&self, label: &str, agg: &FlowAggregate) -> RenderedMessage {
        let formatted_value = format::format_scaled(agg.combined_flow(), agg.decimal_places);
        let unit_label = format::unit_label(agg.unit_code);
        let timestamp = format::render_timestamp(agg.representative_at, self.display_offset);
        let text = format!(
            "{label} {site} {timestamp} TOTALFLOW={formatted_value}{unit_label}",
            site = self.site_label,
        );
        RenderedMessage {
            text,
            unit_label,
            formatted_value,
            timestamp,
            cycle_label: label.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::testing::config;
    use crate::dispatch::testing::RecordingChannel;
    use crate::dispatch::AuditPolicy;
    use crate::store::testing::MemoryStore;
    use chrono::TimeZone;
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        controller: CycleController,
        store: Arc<MemoryStore>,
        channel: Arc<RecordingChannel>,
    }

    fn harness(store: MemoryStore, channel: RecordingChannel) -> Harness {
        let config = config();
        let store = Arc::new(store);
        let channel = Arc::new(channel);
        let buffer = SampleBuffer::new(config.retention(), config.reject_idle_samples, None);
        let sink = DispatchSink::new(
            channel.clone(),
            store.clone(),
            config.audit_path.clone(),
            AuditPolicy::Always,
        );
        let controller = CycleController::new(&config, store.clone(), buffer, sink);
        Harness {
            controller,
            store,
            channel,
        }
    }

    // 08:30 IST on 2026-08-30.
    fn feed_ts() -> i64 {
        Utc.with_ymd_and_hms(2026, 8, 30, 3, 0, 0)
            .unwrap()
            .timestamp_millis()
    }

    fn one_entry_feed() -> serde_json::Value {
        json!({
            "-Na1": {
                "values": {"0165": 1000, "0166": 10, "0167": 5, "0168": 2, "0169": 1},
                "ts": feed_ts(),
            }
        })
    }

    #[tokio::test]
    async fn end_to_end_report_renders_and_dispatches() {
        let h = harness(
            MemoryStore::with_feed(one_entry_feed()),
            RecordingChannel::default(),
        );

        h.controller.on_sample_tick().await.unwrap();
        h.controller.on_report_tick("8:30 AM").await.unwrap();

        let sent = h.channel.sent.lock().unwrap().clone();
        assert_eq!(sent, vec!["919000000001", "919000000002"]);

        let records = h.store.appended_at("sms/logs");
        assert_eq!(records.len(), 2);
        for record in &records {
            assert_eq!(record["success"], true);
            assert_eq!(record["label"], "8:30 AM");
            let text = record["message"].as_str().unwrap();
            assert!(text.contains("TOTALFLOW=15.00LPM"), "{text}");
            assert!(text.contains("KOYAMBEDU MARKET"), "{text}");
            assert!(text.contains("30/08/2026, 08:30:00 am"), "{text}");
        }
    }

    #[tokio::test]
    async fn dispatch_failure_still_reaches_remaining_recipients() {
        let h = harness(
            MemoryStore::with_feed(one_entry_feed()),
            RecordingChannel::failing_for(&["919000000001"]),
        );

        h.controller.on_sample_tick().await.unwrap();
        h.controller.on_report_tick("8:30 AM").await.unwrap();

        assert_eq!(h.channel.sent.lock().unwrap().len(), 2);
        let records = h.store.appended_at("sms/logs");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["success"], false);
        assert_eq!(records[1]["success"], true);
    }

    #[tokio::test]
    async fn empty_feed_skips_the_sampling_cycle() {
        let h = harness(MemoryStore::default(), RecordingChannel::default());

        h.controller.on_sample_tick().await.unwrap();
        assert!(h.controller.buffer.is_empty());
    }

    #[tokio::test]
    async fn empty_reading_skips_the_sampling_cycle() {
        let h = harness(
            MemoryStore::with_feed(json!({"-Na1": {"values": {}, "ts": 0}})),
            RecordingChannel::default(),
        );

        h.controller.on_sample_tick().await.unwrap();
        assert!(h.controller.buffer.is_empty());
    }

    #[tokio::test]
    async fn sampling_uses_the_newest_reading() {
        let h = harness(
            MemoryStore::with_feed(json!([
                {"values": {"0166": 1}, "ts": feed_ts() - 60_000},
                {"values": {"0166": 9}, "ts": feed_ts()},
            ])),
            RecordingChannel::default(),
        );

        h.controller.on_sample_tick().await.unwrap();
        assert_eq!(h.controller.buffer.latest().unwrap().sample.flow_primary, 9);
    }

    #[tokio::test]
    async fn report_with_no_valid_data_sends_nothing() {
        let h = harness(
            MemoryStore::with_feed(json!({
                "-Na1": {"values": {"0166": 0, "0167": 0}, "ts": feed_ts()}
            })),
            RecordingChannel::default(),
        );

        h.controller.on_sample_tick().await.unwrap();
        let err = h.controller.on_report_tick("5:30 PM").await.unwrap_err();
        assert!(matches!(err, CycleError::Validation));

        assert!(h.channel.sent.lock().unwrap().is_empty());
        assert!(h.store.appended_at("sms/logs").is_empty());
    }

    #[tokio::test]
    async fn overlapping_report_fires_skip() {
        let h = harness(
            MemoryStore::with_feed(one_entry_feed()),
            RecordingChannel::default(),
        );
        h.controller.on_sample_tick().await.unwrap();

        let _held = h.controller.report_guard.lock().await;
        h.controller.on_report_tick("8:30 AM").await.unwrap();
        assert!(h.channel.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetch_error_surfaces_as_cycle_error() {
        let store = MemoryStore::with_feed(json!("not a reading payload"));
        let h = harness(store, RecordingChannel::default());

        let err = h.controller.on_sample_tick().await.unwrap_err();
        assert!(matches!(err, CycleError::Fetch(_)));
    }

    #[tokio::test]
    async fn aggregate_of_multiple_samples_averages_flows() {
        let h = harness(
            MemoryStore::with_feed(one_entry_feed()),
            RecordingChannel::default(),
        );

        // Two sampling cycles over different feed contents.
        h.controller.on_sample_tick().await.unwrap();
        *h.store.feed.lock().unwrap() = Some(json!({
            "-Na2": {
                "values": {"0165": 1010, "0166": 4, "0167": 1, "0168": 2, "0169": 1},
                "ts": feed_ts() + 60_000,
            }
        }));
        h.controller.on_sample_tick().await.unwrap();
        h.controller.on_report_tick("5:30 PM").await.unwrap();

        // Means: B=(10+4)/2=7, C=(5+1)/2=3, combined 10.00.
        let records = h.store.appended_at("sms/logs");
        assert!(records[0]["message"]
            .as_str()
            .unwrap()
            .contains("TOTALFLOW=10.00LPM"));
    }

    #[test]
    fn window_policy_recency_is_honored_at_render_time() {
        // Covered in aggregate tests; here we only pin the policy plumb.
        let mut cfg = config();
        cfg.recency_window_seconds = Some(60);
        assert_eq!(
            cfg.window_policy(),
            WindowPolicy::Recency(Duration::from_secs(60))
        );
    }
}
