use anyhow::Context;
use async_trait::async_trait;

use super::InstructionSink;
use crate::models::InstructionRecord;

/// Posts each instruction as JSON to an external instruction service.
pub struct HttpInstructionSink {
    url: String,
    client: reqwest::Client,
}

impl HttpInstructionSink {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl InstructionSink for HttpInstructionSink {
    async fn submit(&self, record: &InstructionRecord) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(record)
            .send()
            .await
            .context("failed to reach instruction service")?
            .error_for_status()
            .context("instruction service returned error")?;

        Ok(())
    }
}
