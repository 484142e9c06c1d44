use crate::error::CycleError;
use crate::store::TelemetryStore;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_GATEWAY_URL: &str = "https://www.fast2sms.com/dev/bulkV2";

/// A report message rendered once per reporting cycle and never reused.
#[derive(Debug, Clone)]
pub struct RenderedMessage {
    pub text: String,
    pub unit_label: &'static str,
    pub formatted_value: String,
    /// Display-rendered representative timestamp.
    pub timestamp: String,
    pub cycle_label: String,
}

/// One-way notification channel. The message must arrive fully rendered;
/// implementations do no templating of their own.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, recipient: &str, message: &RenderedMessage) -> Result<(), CycleError>;
}

/// Which request form the SMS gateway call uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmsMode {
    /// DLT-registered template with two positional variables
    /// (timestamp, formatted flow string).
    Template,
    /// Single free-text message on the quick route.
    FreeText,
}

/// Fast2SMS bulk API client.
pub struct SmsGateway {
    client: Client,
    gateway_url: String,
    api_key: String,
    sender_id: String,
    template_id: Option<String>,
    mode: SmsMode,
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    #[serde(rename = "return")]
    accepted: bool,
    #[serde(default)]
    message: Option<serde_json::Value>,
}

impl SmsGateway {
    pub fn new(
        gateway_url: &str,
        api_key: String,
        sender_id: String,
        template_id: Option<String>,
        mode: SmsMode,
        timeout: Duration,
    ) -> Result<Self, anyhow::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            gateway_url: gateway_url.to_string(),
            api_key,
            sender_id,
            template_id,
            mode,
        })
    }

    fn query(&self, recipient: &str, message: &RenderedMessage) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("authorization", self.api_key.clone()),
            ("numbers", recipient.to_string()),
            ("flash", "0".to_string()),
        ];
        match self.mode {
            SmsMode::Template => {
                params.push(("route", "dlt".to_string()));
                params.push(("sender_id", self.sender_id.clone()));
                params.push((
                    "message",
                    self.template_id.clone().unwrap_or_default(),
                ));
                params.push((
                    "variables_values",
                    format!(
                        "{}|{}{}",
                        message.timestamp, message.formatted_value, message.unit_label
                    ),
                ));
            }
            SmsMode::FreeText => {
                params.push(("route", "q".to_string()));
                params.push(("message", message.text.clone()));
            }
        }
        params
    }
}

#[async_trait]
impl NotificationChannel for SmsGateway {
    async fn send(&self, recipient: &str, message: &RenderedMessage) -> Result<(), CycleError> {
        let dispatch_err = |detail: String| CycleError::Dispatch {
            recipient: recipient.to_string(),
            message: detail,
        };

        let response = self
            .client
            .get(&self.gateway_url)
            .query(&self.query(recipient, message))
            .send()
            .await
            .map_err(|err| dispatch_err(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(dispatch_err(format!("gateway returned {status}")));
        }

        let body: GatewayResponse = response
            .json()
            .await
            .map_err(|err| dispatch_err(err.to_string()))?;
        if !body.accepted {
            let detail = body
                .message
                .map(|m| m.to_string())
                .unwrap_or_else(|| "rejected by gateway".to_string());
            return Err(dispatch_err(detail));
        }
        Ok(())
    }
}

/// When to persist a dispatch audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuditPolicy {
    /// Record every attempt, success or failure.
    #[default]
    Always,
    /// Record only successful sends.
    OnSuccess,
}

/// Append-only audit entry, one per recipient per reporting cycle.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchRecord {
    pub to: String,
    pub message: String,
    pub label: String,
    /// Unix milliseconds, for range queries.
    pub timestamp: i64,
    /// Display-rendered time, matching the message body.
    pub ist_time: String,
    pub success: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: usize,
}

/// Sends a rendered message to every configured recipient and persists the
/// audit trail. A single recipient's failure never aborts the batch, and a
/// failed audit write never undoes a send; both are logged and the next
/// scheduled cycle is the recovery path.
pub struct DispatchSink {
    channel: Arc<dyn NotificationChannel>,
    store: Arc<dyn TelemetryStore>,
    audit_path: String,
    policy: AuditPolicy,
}

impl DispatchSink {
    pub fn new(
        channel: Arc<dyn NotificationChannel>,
        store: Arc<dyn TelemetryStore>,
        audit_path: String,
        policy: AuditPolicy,
    ) -> Self {
        Self {
            channel,
            store,
            audit_path,
            policy,
        }
    }

    pub async fn dispatch_all(
        &self,
        message: &RenderedMessage,
        recipients: &[String],
    ) -> DispatchSummary {
        let mut summary = DispatchSummary::default();

        for recipient in recipients {
            let success = match self.channel.send(recipient, message).await {
                Ok(()) => {
                    tracing::info!(recipient = %recipient, label = %message.cycle_label, "sms sent");
                    summary.sent += 1;
                    true
                }
                Err(err) => {
                    tracing::error!(error = %err, "sms send failed");
                    summary.failed += 1;
                    false
                }
            };

            if self.policy == AuditPolicy::OnSuccess && !success {
                continue;
            }
            let record = DispatchRecord {
                to: recipient.clone(),
                message: message.text.clone(),
                label: message.cycle_label.clone(),
                timestamp: Utc::now().timestamp_millis(),
                ist_time: message.timestamp.clone(),
                success,
            };
            match serde_json::to_value(&record) {
                Ok(value) => {
                    if let Err(err) = self.store.append(&self.audit_path, value).await {
                        let err = CycleError::Audit(err.to_string());
                        tracing::error!(error = %err, recipient = %recipient, "audit write failed");
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "audit record serialization failed");
                }
            }
        }

        summary
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Channel double that records sends and fails for chosen recipients.
    #[derive(Default)]
    pub struct RecordingChannel {
        pub sent: Mutex<Vec<String>>,
        pub fail_for: Vec<String>,
    }

    impl RecordingChannel {
        pub fn failing_for(recipients: &[&str]) -> Self {
            Self {
                fail_for: recipients.iter().map(|r| r.to_string()).collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        async fn send(
            &self,
            recipient: &str,
            _message: &RenderedMessage,
        ) -> Result<(), CycleError> {
            self.sent.lock().unwrap().push(recipient.to_string());
            if self.fail_for.iter().any(|r| r == recipient) {
                return Err(CycleError::Dispatch {
                    recipient: recipient.to_string(),
                    message: "simulated gateway failure".to_string(),
                });
            }
            Ok(())
        }
    }
}
