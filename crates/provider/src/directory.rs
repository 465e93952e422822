//! Recipient lookup by document code.

use std::{collections::HashMap, sync::Mutex};

use {
    anyhow::Result,
    async_trait::async_trait,
    tracing::{debug, warn},
};

use crate::types::RecipientRecord;

/// Resolves document codes to recipients. Codes with no active recipient
/// are omitted from the result, never errors.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn lookup(&self, codes: &[String]) -> Result<Vec<RecipientRecord>>;
}

/// In-memory directory for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryDirectory {
    entries: Mutex<HashMap<String, RecipientRecord>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, code: impl Into<String>, recipient: impl Into<String>, name: &str) {
        let code = code.into();
        self.entries.lock().unwrap().insert(
            code.clone(),
            RecipientRecord {
                code,
                recipient: recipient.into(),
                display_name: name.to_string(),
            },
        );
    }
}

#[async_trait]
impl RecipientDirectory for MemoryDirectory {
    async fn lookup(&self, codes: &[String]) -> Result<Vec<RecipientRecord>> {
        let entries = self.entries.lock().unwrap();
        let mut found = Vec::new();
        for code in codes {
            match entries.get(code) {
                Some(record) => found.push(record.clone()),
                None => warn!(code, "no recipient for code"),
            }
        }
        debug!(found = found.len(), requested = codes.len(), "directory lookup");
        Ok(found)
    }
}
