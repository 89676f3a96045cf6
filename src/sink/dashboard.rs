use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::Client;
use tracing::debug;

use crate::sink::{truncate_body, Delivery, ReadingSink, SinkError};

/// Forwards each reading to a dashboard API with an HTTP POST.
pub struct DashboardSink {
    client: Client,
    url: String,
}

impl DashboardSink {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, SinkError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(DashboardSink {
            client,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, delivery: &Delivery) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .body(delivery.payload.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status {
                status: status.as_u16(),
                body: truncate_body(response.text().await.unwrap_or_default()),
            });
        }
        debug!(
            url = %self.url,
            timestamp = %delivery.reading.formatted_timestamp(),
            high_alert = delivery.reading.high_alert,
            "Dashboard accepted reading"
        );
        Ok(())
    }
}

impl ReadingSink for DashboardSink {
    fn name(&self) -> &str {
        "dashboard"
    }

    fn deliver<'a>(&'a self, delivery: &'a Delivery) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(self.post(delivery))
    }
}
