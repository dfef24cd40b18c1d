use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::Connection;

use super::InstructionSink;
use crate::db::queries;
use crate::models::InstructionRecord;

/// Keeps instructions in the local `instructions` table.
pub struct DbInstructionSink {
    db: Arc<Mutex<Connection>>,
}

impl DbInstructionSink {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl InstructionSink for DbInstructionSink {
    async fn submit(&self, record: &InstructionRecord) -> anyhow::Result<()> {
        let conn = self
            .db
            .lock()
            .map_err(|_| anyhow::anyhow!("database lock poisoned"))?;
        let id = queries::insert_instruction(&conn, record)?;
        tracing::debug!(instruction_id = id, target = %record.target, "instruction stored");
        Ok(())
    }
}
