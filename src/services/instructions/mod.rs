pub mod http;
pub mod store;

use async_trait::async_trait;

use crate::models::InstructionRecord;

pub use http::HttpInstructionSink;
pub use store::DbInstructionSink;

/// Receiver of delegation instructions. Submission happens after the
/// delegation itself is committed.
#[async_trait]
pub trait InstructionSink: Send + Sync {
    async fn submit(&self, record: &InstructionRecord) -> anyhow::Result<()>;
}
