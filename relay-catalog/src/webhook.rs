//! Webhook notifier: POSTs `{job, status}` JSON to a URL.

use std::time::Duration;

use serde_json::json;

use relay_core::{Job, JobStatus};
use relay_sync::registry::NotifyHandler;
use relay_sync::TaskError;

const TIMEOUT: Duration = Duration::from_secs(30);

pub struct WebhookNotifier {
    url: String,
    agent: ureq::Agent,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        WebhookNotifier {
            url: url.into(),
            agent: ureq::AgentBuilder::new().timeout(TIMEOUT).build(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl NotifyHandler for WebhookNotifier {
    fn notify(&self, job: &Job, status: &JobStatus) -> Result<(), TaskError> {
        let payload = json!({ "job": job.to_value(), "status": status });
        self.agent
            .post(&self.url)
            .send_json(payload)
            .map_err(|e| format!("webhook {} failed: {e}", self.url))?;
        tracing::debug!("Sent notify for {} to {}", job.file(), self.url);
        Ok(())
    }
}
