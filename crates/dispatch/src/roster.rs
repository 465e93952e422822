//! Run preparation: resolve document codes to recipients and pair each
//! with its payload.

use {
    anyhow::Result,
    tracing::{info, warn},
};

use despacho_provider::{FilePayload, RecipientDirectory};

use crate::types::DispatchItem;

/// A locally processed document payload, keyed by its code.
#[derive(Debug, Clone, PartialEq)]
pub struct CodedFile {
    pub code: String,
    pub payload: FilePayload,
}

impl CodedFile {
    pub fn new(code: impl Into<String>, payload: FilePayload) -> Self {
        Self {
            code: code.into(),
            payload,
        }
    }
}

/// Build the ordered item list for a run. Codes with no recipient in the
/// directory are omitted; the result keeps the directory's (input) order.
pub async fn prepare_items(
    directory: &dyn RecipientDirectory,
    files: &[CodedFile],
) -> Result<Vec<DispatchItem>> {
    let codes: Vec<String> = files.iter().map(|f| f.code.clone()).collect();
    let records = directory.lookup(&codes).await?;

    let mut items = Vec::with_capacity(records.len());
    for record in records {
        let Some(file) = files.iter().find(|f| f.code == record.code) else {
            warn!(code = %record.code, "directory returned a code with no file");
            continue;
        };
        items.push(DispatchItem {
            recipient: record.recipient,
            display_name: record.display_name,
            code: record.code,
            file: Some(file.payload.clone()),
        });
    }

    info!(
        items = items.len(),
        requested = files.len(),
        "prepared dispatch items"
    );
    Ok(items)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use despacho_provider::MemoryDirectory;

    use super::*;

    fn coded(code: &str) -> CodedFile {
        CodedFile::new(code, FilePayload::document(format!("{code}.pdf"), vec![1]))
    }

    #[tokio::test]
    async fn pairs_recipients_with_files_in_order() {
        let dir = MemoryDirectory::new();
        dir.insert("A1", "5511999990001", "Ana");
        dir.insert("C3", "5511999990003", "Caio");

        let files = vec![coded("A1"), coded("B2"), coded("C3")];
        let items = prepare_items(&dir, &files).await.unwrap();

        // B2 has no recipient and is omitted.
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].code, "A1");
        assert_eq!(items[0].recipient, "5511999990001");
        assert_eq!(
            items[0].file.as_ref().map(|f| f.filename.as_str()),
            Some("A1.pdf")
        );
        assert_eq!(items[1].code, "C3");
    }
}
