//! Run notifications: POSTs every run outcome to the notification hub.
//! Best effort: failures are logged and dropped, never retried.

use std::time::Duration;

use async_trait::async_trait;
use checkin_core::config::NotifyConfig;
use checkin_core::traits::RunNotifier;
use checkin_core::types::Task;

/// Notification hub webhook (`X-Project-Key` authenticated).
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    key: String,
    project_name: String,
    timeout: Duration,
}

impl WebhookNotifier {
    /// `None` unless both the hub URL and the project key are set.
    pub fn from_config(config: &NotifyConfig) -> Option<Self> {
        if !config.is_configured() {
            tracing::info!("🔕 Notification hub not configured, run notifications disabled");
            return None;
        }
        Some(Self {
            client: reqwest::Client::new(),
            url: config.url.trim().to_string(),
            key: config.key.trim().to_string(),
            project_name: config.project_name.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Hub payload for one run.
    pub fn payload(&self, task: &Task, success: bool, output: &str) -> serde_json::Value {
        let (level, status_text) = if success {
            ("success", "Success")
        } else {
            ("error", "Failed")
        };
        serde_json::json!({
            "project_name": self.project_name,
            "title": format!("Task '{}' {}", task.name, status_text),
            "content": format!("Task: {}\nResult: {}\nOutput: {}", task.name, status_text, output),
            "level": level,
        })
    }

    async fn send(&self, payload: &serde_json::Value) -> Result<(), String> {
        let resp = self
            .client
            .post(&self.url)
            .header("X-Project-Key", &self.key)
            .json(payload)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| format!("Notification send failed: {e}"))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(format!("Notification hub error {status}: {body}"))
        }
    }
}

#[async_trait]
impl RunNotifier for WebhookNotifier {
    async fn notify(&self, task: &Task, success: bool, output: &str) {
        let payload = self.payload(task, success, output);
        tracing::debug!(
            "📨 Sending notification for '{}' ({} chars)",
            task.name,
            payload["content"].as_str().map_or(0, str::len)
        );
        match self.send(&payload).await {
            Ok(()) => tracing::info!("✅ Notification sent: {}", payload["title"]),
            Err(e) => tracing::warn!("⚠️ {e}"),
        }
    }
}
