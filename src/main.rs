mod aggregate;
mod buffer;
mod config;
mod cycle;
mod dispatch;
mod error;
mod format;
mod http;
mod schedule;
mod store;
mod telemetry;

use crate::buffer::{BufferMirror, SampleBuffer};
use crate::config::Config;
use crate::cycle::CycleController;
use crate::dispatch::{DispatchSink, NotificationChannel, SmsGateway};
use crate::store::{RestStore, TelemetryStore};
use anyhow::Result;
use std::sync::Arc;

fn init_tracing() -> Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,flow_reporter=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing()?;

    let store: Arc<dyn TelemetryStore> = Arc::new(RestStore::new(
        &config.store_base_url,
        config.request_timeout(),
    )?);
    let mirror = config.buffer_path.as_ref().map(|path| BufferMirror {
        store: store.clone(),
        path: path.clone(),
    });
    let buffer = SampleBuffer::new(config.retention(), config.reject_idle_samples, mirror);

    let channel: Arc<dyn NotificationChannel> = Arc::new(SmsGateway::new(
        &config.sms_gateway_url,
        config.sms_api_key.clone(),
        config.sms_sender_id.clone(),
        config.sms_template_id.clone(),
        config.sms_mode,
        config.request_timeout(),
    )?);
    let sink = DispatchSink::new(
        channel,
        store.clone(),
        config.audit_path.clone(),
        config.audit_policy,
    );

    let controller = Arc::new(CycleController::new(&config, store, buffer, sink));

    tracing::info!(
        retention_minutes = config.retention_minutes,
        sample_interval_seconds = config.sample_interval_seconds,
        recipients = config.recipients.len(),
        report_times = ?config
            .report_times
            .iter()
            .map(|t| t.label.as_str())
            .collect::<Vec<_>>(),
        "flow reporter starting"
    );

    let http_handle = tokio::spawn(http::run(config.http_port));
    let sampler_handle = tokio::spawn(schedule::run_sampler(
        controller.clone(),
        config.sample_interval(),
    ));
    let reporter_handle = tokio::spawn(schedule::run_reporter(
        controller.clone(),
        config.report_times.clone(),
        config.display_offset(),
    ));

    tokio::select! {
        res = http_handle => {
            match res {
                Ok(Err(err)) => tracing::error!(error = %err, "health endpoint failed"),
                Err(err) => tracing::error!(error = %err, "health task failed"),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    sampler_handle.abort();
    reporter_handle.abort();

    Ok(())
}
