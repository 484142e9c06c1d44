use crate::aggregate::WindowPolicy;
use crate::dispatch::{AuditPolicy, SmsMode, DEFAULT_GATEWAY_URL};
use crate::schedule::ReportTime;
use anyhow::{bail, Context, Result};
use chrono::FixedOffset;
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub store_base_url: String,
    pub reading_path: String,
    /// When set, buffered samples are mirrored to this store path and
    /// deleted again on expiry.
    pub buffer_path: Option<String>,
    pub audit_path: String,
    pub sms_gateway_url: String,
    pub sms_api_key: String,
    pub sms_sender_id: String,
    pub sms_template_id: Option<String>,
    pub sms_mode: SmsMode,
    pub recipients: Vec<String>,
    pub retention_minutes: u64,
    pub sample_interval_seconds: u64,
    pub report_times: Vec<ReportTime>,
    pub recency_window_seconds: Option<u64>,
    pub audit_policy: AuditPolicy,
    pub reject_idle_samples: bool,
    pub site_label: String,
    pub utc_offset_minutes: i32,
    pub http_port: u16,
    pub request_timeout_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let store_base_url = env::var("FLOW_STORE_BASE_URL")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .context("FLOW_STORE_BASE_URL is required")?;
        let reading_path =
            env::var("FLOW_STORE_READING_PATH").unwrap_or_else(|_| "flow/readings".to_string());
        let buffer_path = env::var("FLOW_STORE_BUFFER_PATH")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let audit_path =
            env::var("FLOW_STORE_AUDIT_PATH").unwrap_or_else(|_| "sms/logs".to_string());

        let sms_gateway_url =
            env::var("FLOW_SMS_GATEWAY_URL").unwrap_or_else(|_| DEFAULT_GATEWAY_URL.to_string());
        let sms_api_key = env::var("FLOW_SMS_API_KEY")
            .or_else(|_| env::var("FAST2SMS_API_KEY"))
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .context("FLOW_SMS_API_KEY (or FAST2SMS_API_KEY) is required")?;
        let sms_sender_id = env::var("FLOW_SMS_SENDER_ID")
            .or_else(|_| env::var("FAST2SMS_SENDER_ID"))
            .unwrap_or_default()
            .trim()
            .to_string();
        let sms_template_id = env::var("FLOW_SMS_TEMPLATE_ID")
            .or_else(|_| env::var("FAST2SMS_MESSAGE"))
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let sms_mode = match env::var("FLOW_SMS_MODE").as_deref() {
            Ok("free") | Ok("free_text") | Ok("q") => SmsMode::FreeText,
            Ok("template") | Ok("dlt") | Err(_) => SmsMode::Template,
            Ok(other) => bail!("FLOW_SMS_MODE must be 'template' or 'free', got '{other}'"),
        };
        if sms_mode == SmsMode::Template {
            if sms_sender_id.is_empty() {
                bail!("FLOW_SMS_SENDER_ID is required in template mode");
            }
            if sms_template_id.is_none() {
                bail!("FLOW_SMS_TEMPLATE_ID is required in template mode");
            }
        }

        let recipients: Vec<String> = env::var("FLOW_SMS_RECIPIENTS")
            .unwrap_or_default()
            .split(',')
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        if recipients.is_empty() {
            bail!("FLOW_SMS_RECIPIENTS must list at least one recipient");
        }

        let retention_minutes = env::var("FLOW_RETENTION_MINUTES")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(15);
        let sample_interval_seconds = env::var("FLOW_SAMPLE_INTERVAL_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(60);

        let report_times = env::var("FLOW_REPORT_TIMES")
            .unwrap_or_else(|_| "08:30,17:30".to_string())
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(ReportTime::parse)
            .collect::<Result<Vec<_>>>()?;
        if report_times.is_empty() {
            bail!("FLOW_REPORT_TIMES must list at least one HH:MM entry");
        }

        let recency_window_seconds = env::var("FLOW_RECENCY_WINDOW_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v != 0);

        let audit_policy = match env::var("FLOW_AUDIT_POLICY").as_deref() {
            Ok("on-success") | Ok("on_success") => AuditPolicy::OnSuccess,
            Ok("always") | Err(_) => AuditPolicy::Always,
            Ok(other) => bail!("FLOW_AUDIT_POLICY must be 'always' or 'on-success', got '{other}'"),
        };

        let reject_idle_samples = env::var("FLOW_REJECT_IDLE_SAMPLES")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let site_label =
            env::var("FLOW_SITE_LABEL").unwrap_or_else(|_| "KOYAMBEDU MARKET".to_string());

        // IST by default; the display zone is a fixed offset on purpose,
        // the deployments this serves do not observe DST.
        let utc_offset_minutes = env::var("FLOW_UTC_OFFSET_MINUTES")
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(330);
        if FixedOffset::east_opt(utc_offset_minutes * 60).is_none() {
            bail!("FLOW_UTC_OFFSET_MINUTES is out of range");
        }

        let http_port = env::var("FLOW_HTTP_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(4000);
        let request_timeout_seconds = env::var("FLOW_REQUEST_TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10);

        Ok(Self {
            store_base_url,
            reading_path,
            buffer_path,
            audit_path,
            sms_gateway_url,
            sms_api_key,
            sms_sender_id,
            sms_template_id,
            sms_mode,
            recipients,
            retention_minutes,
            sample_interval_seconds,
            report_times,
            recency_window_seconds,
            audit_policy,
            reject_idle_samples,
            site_label,
            utc_offset_minutes,
            http_port,
            request_timeout_seconds,
        })
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_minutes * 60)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn display_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset"))
    }

    pub fn window_policy(&self) -> WindowPolicy {
        match self.recency_window_seconds {
            Some(secs) => WindowPolicy::Recency(Duration::from_secs(secs)),
            None => WindowPolicy::Retention,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Baseline config for controller tests; fields overridden per case.
    pub fn config() -> Config {
        Config {
            store_base_url: "http://store.local".to_string(),
            reading_path: "flow/readings".to_string(),
            buffer_path: None,
            audit_path: "sms/logs".to_string(),
            sms_gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            sms_api_key: "key".to_string(),
            sms_sender_id: "FLWRPT".to_string(),
            sms_template_id: Some("123456".to_string()),
            sms_mode: SmsMode::Template,
            recipients: vec!["919000000001".to_string(), "919000000002".to_string()],
            retention_minutes: 15,
            sample_interval_seconds: 60,
            report_times: vec![
                ReportTime::parse("08:30").unwrap(),
                ReportTime::parse("17:30").unwrap(),
            ],
            recency_window_seconds: None,
            audit_policy: AuditPolicy::Always,
            reject_idle_samples: false,
            site_label: "KOYAMBEDU MARKET".to_string(),
            utc_offset_minutes: 330,
            http_port: 4000,
            request_timeout_seconds: 10,
        }
    }
}
