use std::path::Path;

use async_trait::async_trait;
use lopdf::Document;
use tracing::info;

use crate::ports::document_converter::{DocumentConverter, DocumentConverterError};

const PAGE_SEPARATOR: &str = "\n\n";

/// Converter for PDF files
///
/// Only extracts the text content that is not "drawn", one block per page.
/// Parsing is CPU bound, it runs on the blocking thread pool.
#[derive(Debug, Default, Clone)]
pub struct PdfDocumentConverter;

impl PdfDocumentConverter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentConverter for PdfDocumentConverter {
    #[tracing::instrument(name = "Converting PDF document", skip(self))]
    async fn convert(&self, local_file_path: &Path) -> Result<String, DocumentConverterError> {
        let local_file_path = local_file_path.to_path_buf();

        tokio::task::spawn_blocking(move || extract_text(&local_file_path))
            .await
            .map_err(|error| {
                DocumentConverterError::new(format!("The conversion was interrupted: {}", error))
            })?
    }
}

fn extract_text(local_file_path: &Path) -> Result<String, DocumentConverterError> {
    let document = Document::load(local_file_path).map_err(|error| {
        DocumentConverterError::new(format!("Failed to read the PDF document: {}", error))
    })?;

    let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    info!("PDF document with {} pages", page_numbers.len());

    let mut pages = Vec::with_capacity(page_numbers.len());
    for page_number in page_numbers {
        let text = document.extract_text(&[page_number]).map_err(|error| {
            DocumentConverterError::new(format!(
                "Failed to extract the text of page {}: {}",
                page_number, error
            ))
        })?;

        let text = text.trim();
        if !text.is_empty() {
            pages.push(text.to_string());
        }
    }

    Ok(pages.join(PAGE_SEPARATOR))
}
