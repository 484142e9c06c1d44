use crate::cycle::CycleController;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// A configured daily report trigger, stated in the deployment's fixed
/// local offset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportTime {
    pub hour: u32,
    pub minute: u32,
    /// Human label carried into the message and the audit trail,
    /// e.g. "8:30 AM".
    pub label: String,
}

impl ReportTime {
    pub fn parse(value: &str) -> Result<Self> {
        let (hour, minute) = value
            .split_once(':')
            .with_context(|| format!("report time '{value}' is not HH:MM"))?;
        let hour: u32 = hour
            .trim()
            .parse()
            .with_context(|| format!("bad hour in report time '{value}'"))?;
        let minute: u32 = minute
            .trim()
            .parse()
            .with_context(|| format!("bad minute in report time '{value}'"))?;
        if hour > 23 || minute > 59 {
            bail!("report time '{value}' is out of range");
        }
        Ok(Self {
            hour,
            minute,
            label: twelve_hour_label(hour, minute),
        })
    }
}

fn twelve_hour_label(hour: u32, minute: u32) -> String {
    let (display_hour, suffix) = match hour {
        0 => (12, "AM"),
        1..=11 => (hour, "AM"),
        12 => (12, "PM"),
        _ => (hour - 12, "PM"),
    };
    format!("{display_hour}:{minute:02} {suffix}")
}

/// Earliest configured fire strictly after `now`, rolling to the next day
/// when every time today has passed.
pub fn next_fire(
    now: DateTime<Utc>,
    times: &[ReportTime],
    offset: FixedOffset,
) -> Option<(DateTime<Utc>, ReportTime)> {
    let local_now = now.with_timezone(&offset);
    let today = local_now.date_naive();

    let mut best: Option<(DateTime<Utc>, &ReportTime)> = None;
    for time in times {
        for day in [today, today.succ_opt()?] {
            let naive = day.and_hms_opt(time.hour, time.minute, 0)?;
            // A fixed offset has exactly one mapping for any wall time.
            let candidate = offset
                .from_local_datetime(&naive)
                .single()?
                .with_timezone(&Utc);
            if candidate <= now {
                continue;
            }
            if best.map_or(true, |(at, _)| candidate < at) {
                best = Some((candidate, time));
            }
            break;
        }
    }
    best.map(|(at, time)| (at, time.clone()))
}

/// Sampling trigger: fires the sampling cycle at a fixed interval.
pub async fn run_sampler(controller: Arc<CycleController>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if let Err(err) = controller.on_sample_tick().await {
            tracing::warn!(error = %err, "sampling cycle failed");
        }
    }
}

/// Reporting trigger: fires the reporting cycle at each configured local
/// time, once per day per entry.
pub async fn run_reporter(
    controller: Arc<CycleController>,
    times: Vec<ReportTime>,
    offset: FixedOffset,
) {
    loop {
        let now = Utc::now();
        let Some((fire_at, time)) = next_fire(now, &times, offset) else {
            tracing::error!("no report times configured; reporter exiting");
            return;
        };
        let wait = (fire_at - now).to_std().unwrap_or(Duration::ZERO);
        tracing::debug!(label = %time.label, wait_secs = wait.as_secs(), "next report scheduled");
        tokio::time::sleep(wait).await;

        if let Err(err) = controller.on_report_tick(&time.label).await {
            tracing::warn!(error = %err, label = %time.label, "reporting cycle failed");
        }
    }
}
