use crate::buffer::BufferedEntry;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

/// Which buffered entries a reporting cycle considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowPolicy {
    /// Everything still inside the buffer's retention window.
    #[default]
    Retention,
    /// Only entries sampled within the given duration before the report
    /// fires, on top of retention (the strict 60-second deployment).
    Recency(Duration),
}

/// One representative reading reduced from the current window.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowAggregate {
    pub flow_primary_avg: f64,
    pub flow_secondary_avg: f64,
    /// Rounded mean of the decimal-place register across the window.
    pub decimal_places: u32,
    /// Rounded mean of the unit register across the window.
    pub unit_code: i64,
    /// Sampled-at of the last valid entry, not a mean.
    pub representative_at: DateTime<Utc>,
}

impl FlowAggregate {
    pub fn combined_flow(&self) -> f64 {
        self.flow_primary_avg + self.flow_secondary_avg
    }
}

/// Reduce a buffer snapshot to one aggregate, or `None` when no valid
/// entry (at least one positive flow channel) is in the window.
///
/// The decimal-place and unit registers are config-like fields; they are
/// nevertheless averaged across the window like the flows, rounded half
/// away from zero. Callers that want a different policy should reduce the
/// snapshot themselves.
pub fn aggregate(
    entries: &[BufferedEntry],
    policy: WindowPolicy,
    now: DateTime<Utc>,
) -> Option<FlowAggregate> {
    let cutoff = match policy {
        WindowPolicy::Retention => None,
        WindowPolicy::Recency(window) => {
            Some(now - ChronoDuration::from_std(window).unwrap_or(ChronoDuration::zero()))
        }
    };

    let valid: Vec<&BufferedEntry> = entries
        .iter()
        .filter(|entry| entry.sample.has_flow())
        .filter(|entry| cutoff.map_or(true, |cutoff| entry.sample.sampled_at >= cutoff))
        .collect();

    let count = valid.len() as f64;
    let last = valid.last()?;

    let mut flow_primary = 0.0;
    let mut flow_secondary = 0.0;
    let mut decimals = 0.0;
    let mut units = 0.0;
    for entry in &valid {
        flow_primary += entry.sample.flow_primary as f64;
        flow_secondary += entry.sample.flow_secondary as f64;
        decimals += entry.sample.decimal_places as f64;
        units += entry.sample.unit_code as f64;
    }

    Some(FlowAggregate {
        flow_primary_avg: flow_primary / count,
        flow_secondary_avg: flow_secondary / count,
        decimal_places: (decimals / count).round() as u32,
        unit_code: (units / count).round() as i64,
        representative_at: last.sample.sampled_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SampleBuffer;
    use crate::telemetry::FlowSample;

    async fn snapshot_of(samples: Vec<FlowSample>) -> Vec<BufferedEntry> {
        let buffer = SampleBuffer::new(Duration::from_secs(900), false, None);
        for sample in samples {
            buffer.append(sample).await;
        }
        buffer.snapshot()
    }

    fn sample(flow_primary: i64, flow_secondary: i64, age_secs: i64) -> FlowSample {
        FlowSample {
            reading_total: 0,
            flow_primary,
            flow_secondary,
            decimal_places: 2,
            unit_code: 1,
            sampled_at: Utc::now() - ChronoDuration::seconds(age_secs),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn empty_window_yields_none() {
        let entries = snapshot_of(vec![]).await;
        assert!(aggregate(&entries, WindowPolicy::Retention, Utc::now()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn all_idle_entries_yield_none() {
        let entries = snapshot_of(vec![sample(0, 0, 10), sample(0, 0, 5)]).await;
        assert!(aggregate(&entries, WindowPolicy::Retention, Utc::now()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn averages_valid_entries() {
        let entries = snapshot_of(vec![sample(4, 6, 20), sample(2, 2, 10)]).await;
        let agg = aggregate(&entries, WindowPolicy::Retention, Utc::now()).unwrap();
        assert_eq!(agg.flow_primary_avg, 3.0);
        assert_eq!(agg.flow_secondary_avg, 4.0);
        assert_eq!(agg.combined_flow(), 7.0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_entries_are_excluded_from_the_mean() {
        let entries = snapshot_of(vec![sample(0, 0, 30), sample(6, 0, 10)]).await;
        let agg = aggregate(&entries, WindowPolicy::Retention, Utc::now()).unwrap();
        assert_eq!(agg.flow_primary_avg, 6.0);
    }

    #[tokio::test(start_paused = true)]
    async fn representative_timestamp_is_the_last_valid_entry() {
        let newest = sample(2, 0, 1);
        let expected = newest.sampled_at;
        let entries = snapshot_of(vec![sample(4, 0, 60), newest]).await;
        let agg = aggregate(&entries, WindowPolicy::Retention, Utc::now()).unwrap();
        assert_eq!(agg.representative_at, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn register_means_round_half_away_from_zero() {
        let mut a = sample(1, 0, 20);
        a.decimal_places = 1;
        a.unit_code = 1;
        let mut b = sample(1, 0, 10);
        b.decimal_places = 2;
        b.unit_code = 2;
        // Means are 1.5 and 1.5; both round up.
        let entries = snapshot_of(vec![a, b]).await;
        let agg = aggregate(&entries, WindowPolicy::Retention, Utc::now()).unwrap();
        assert_eq!(agg.decimal_places, 2);
        assert_eq!(agg.unit_code, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn recency_policy_drops_stale_entries() {
        let entries = snapshot_of(vec![sample(100, 0, 120), sample(10, 0, 30)]).await;
        let now = Utc::now();

        let recent = aggregate(&entries, WindowPolicy::Recency(Duration::from_secs(60)), now)
            .unwrap();
        assert_eq!(recent.flow_primary_avg, 10.0);

        let all = aggregate(&entries, WindowPolicy::Retention, now).unwrap();
        assert_eq!(all.flow_primary_avg, 55.0);
    }

    #[tokio::test(start_paused = true)]
    async fn recency_policy_with_no_recent_entries_yields_none() {
        let entries = snapshot_of(vec![sample(5, 0, 300)]).await;
        let result = aggregate(
            &entries,
            WindowPolicy::Recency(Duration::from_secs(60)),
            Utc::now(),
        );
        assert!(result.is_none());
    }
}
