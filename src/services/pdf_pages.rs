//! PDF page access: rasterising pages for the vision model, plain text
//! extraction for the fallback path, and page counting.
//!
//! pdfium, pdf-extract and lopdf are blocking, so every entry point hops onto
//! the blocking thread pool.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::ImageFormat;
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::parsing::PageText;
use crate::error::ApiError;

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("PDF rendering library unavailable: {0}")]
    LibraryUnavailable(String),

    #[error("Failed to load PDF: {0}")]
    Load(String),

    #[error("Failed to render page {page}: {reason}")]
    Render { page: u32, reason: String },

    #[error("Failed to encode page image: {0}")]
    Encode(String),

    #[error("Text extraction failed: {0}")]
    Text(String),

    #[error("PDF worker failed: {0}")]
    Worker(String),
}

impl From<PdfError> for ApiError {
    fn from(err: PdfError) -> Self {
        match err {
            PdfError::Load(msg) => ApiError::unprocessable(format!("Unreadable PDF: {}", msg)),
            other => ApiError::Internal(anyhow::Error::new(other)),
        }
    }
}

/// Pages rendered as base64 PNG
#[derive(Debug, Clone)]
pub struct RenderedPages {
    pub page_count: u32,
    pub images: Vec<String>,
}

#[derive(Clone)]
pub struct PdfRasterizer {
    library_dir: Option<PathBuf>,
    target_width: i32,
}

impl PdfRasterizer {
    pub fn new(library_dir: Option<PathBuf>, target_width: i32) -> Self {
        Self {
            library_dir,
            target_width: target_width.max(256),
        }
    }

    fn bind(&self) -> Result<Pdfium, PdfError> {
        let configured = match &self.library_dir {
            Some(dir) => {
                let dir = dir.to_string_lossy();
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&*dir))
            }
            None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./")),
        };

        let bindings = configured
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|e| PdfError::LibraryUnavailable(e.to_string()))?;

        Ok(Pdfium::new(bindings))
    }

    /// Whether libpdfium can be loaded on this host.
    pub async fn is_available(&self) -> bool {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.bind().is_ok())
            .await
            .unwrap_or(false)
    }

    /// Render up to `max_pages` leading pages as grayscale PNG, base64 encoded.
    pub async fn render_pages(
        &self,
        pdf: Arc<Vec<u8>>,
        max_pages: u32,
    ) -> Result<RenderedPages, PdfError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.render_blocking(&pdf, max_pages))
            .await
            .map_err(|e| PdfError::Worker(e.to_string()))?
    }

    fn render_blocking(&self, pdf: &[u8], max_pages: u32) -> Result<RenderedPages, PdfError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf, None)
            .map_err(|e| PdfError::Load(e.to_string()))?;

        let page_count = document.pages().len() as u32;
        let config = PdfRenderConfig::new()
            .set_target_width(self.target_width)
            .set_maximum_height(self.target_width * 2);

        let mut images = Vec::new();
        for (index, page) in document.pages().iter().take(max_pages as usize).enumerate() {
            let page_number = index as u32 + 1;
            let bitmap = page
                .render_with_config(&config)
                .map_err(|e| PdfError::Render {
                    page: page_number,
                    reason: e.to_string(),
                })?;

            let mut png = Vec::new();
            bitmap
                .as_image()
                .grayscale()
                .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
                .map_err(|e| PdfError::Encode(e.to_string()))?;

            tracing::debug!(page = page_number, bytes = png.len(), "Rendered plan page");
            images.push(STANDARD.encode(&png));
        }

        Ok(RenderedPages { page_count, images })
    }
}

fn count_pages(pdf: &[u8]) -> Result<u32, PdfError> {
    let document = lopdf::Document::load_mem(pdf).map_err(|e| PdfError::Load(e.to_string()))?;
    Ok(document.get_pages().len() as u32)
}

/// Number of pages according to the PDF object tree.
pub async fn page_count(pdf: Arc<Vec<u8>>) -> Result<u32, PdfError> {
    tokio::task::spawn_blocking(move || count_pages(&pdf))
        .await
        .map_err(|e| PdfError::Worker(e.to_string()))?
}

/// Split extracted text into pages on form feeds, keeping the non-blank ones
/// among the first `max_pages`.
pub fn split_pages(text: &str, max_pages: u32) -> Vec<PageText> {
    text.split('\u{c}')
        .take(max_pages as usize)
        .enumerate()
        .map(|(idx, page)| PageText {
            page: idx as u32 + 1,
            text: page.trim().to_string(),
        })
        .filter(|p| !p.text.is_empty())
        .collect()
}

/// Plain text of the leading pages, for documents the vision model cannot read.
pub async fn extract_text(pdf: Arc<Vec<u8>>, max_pages: u32) -> Result<Vec<PageText>, PdfError> {
    tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text_from_mem(&pdf)
            .map(|text| split_pages(&text, max_pages))
            .map_err(|e| PdfError::Text(e.to_string()))
    })
    .await
    .map_err(|e| PdfError::Worker(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_pages_on_form_feed() {
        let pages = split_pages("Sheet A1\n\u{c}  \u{c}Sheet S1\u{c}Sheet S2", 3);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page, 1);
        assert_eq!(pages[0].text, "Sheet A1");
        assert_eq!(pages[1].page, 3);
        assert_eq!(pages[1].text, "Sheet S1");
    }

    #[test]
    fn page_limit_applies_before_blank_pages_are_dropped() {
        let pages = split_pages("Sheet A1\u{c}\u{c}Sheet S1\u{c}Sheet S2", 2);
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page, 1);
    }

    #[tokio::test]
    async fn counts_pages_of_generated_pdf() {
        let pdf = crate::services::quote_pdf::tests::sample_pdf();
        assert_eq!(page_count(Arc::new(pdf)).await.unwrap(), 1);
    }

    #[test]
    fn garbage_is_not_a_pdf() {
        assert!(matches!(count_pages(b"not a pdf"), Err(PdfError::Load(_))));
    }
}
