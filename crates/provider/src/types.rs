//! Shared data types for provider collaborators.

use serde::{Deserialize, Serialize};

/// A document payload attached to a dispatch item.
///
/// Bytes are carried in memory; the orchestrator stores them through a
/// [`crate::FileStore`] before the send so the provider can reference the
/// stored file by name.
#[derive(Clone, PartialEq, Eq)]
pub struct FilePayload {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl FilePayload {
    pub fn new(
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Payload with the default document mime type.
    pub fn document(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::new(filename, "application/pdf", bytes)
    }
}

impl std::fmt::Debug for FilePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePayload")
            .field("filename", &self.filename)
            .field("mime_type", &self.mime_type)
            .field("bytes", &format_args!("{} bytes", self.bytes.len()))
            .finish()
    }
}

/// A recipient resolved from a document code by the directory collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientRecord {
    /// Document code the recipient was looked up by.
    pub code: String,
    /// Provider-facing phone identifier.
    pub recipient: String,
    /// Display name, `"N/A"` when the directory has none.
    pub display_name: String,
}
