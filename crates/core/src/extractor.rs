use crate::chunking::Chunker;
use crate::error::IngestError;
use crate::models::Chunk;
use lopdf::Document;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Pdf,
    PlainText,
    Unsupported,
}

impl ContentKind {
    pub fn from_path(path: &str) -> Self {
        let extension = Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("pdf") => Self::Pdf,
            Some("txt" | "text" | "md" | "markdown" | "csv" | "log") => Self::PlainText,
            _ => Self::Unsupported,
        }
    }
}

/// Text pulled out of a stored object, already chunked.
#[derive(Debug, Clone, Default)]
pub struct ExtractedContent {
    pub text: String,
    pub chunks: Vec<Chunk>,
}

pub trait PdfExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load_mem(bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(PageText {
                    number: page_no,
                    text,
                });
            }
        }

        Ok(pages)
    }
}

/// Converts stored bytes into chunks according to the content kind.
///
/// Unsupported kinds produce empty content rather than an error.
pub fn extract_content(
    kind: ContentKind,
    bytes: &[u8],
    chunker: &Chunker,
    pdf: &dyn PdfExtractor,
) -> Result<ExtractedContent, IngestError> {
    match kind {
        ContentKind::Pdf => {
            let pages = pdf.extract_pages(bytes)?;
            let text = pages
                .iter()
                .map(|page| page.text.trim())
                .collect::<Vec<_>>()
                .join("\n\n");
            Ok(ExtractedContent {
                chunks: chunker.chunk_pages(&pages),
                text,
            })
        }
        ContentKind::PlainText => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            Ok(ExtractedContent {
                chunks: chunker.chunk_text(&text, None),
                text,
            })
        }
        ContentKind::Unsupported => Ok(ExtractedContent::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkingConfig;

    struct FakePdf(Vec<PageText>);

    impl PdfExtractor for FakePdf {
        fn extract_pages(&self, _bytes: &[u8]) -> Result<Vec<PageText>, IngestError> {
            Ok(self.0.clone())
        }
    }

    fn chunker() -> Chunker {
        Chunker::new(ChunkingConfig { max_chars: 200 }).expect("valid config")
    }

    #[test]
    fn content_kind_uses_extension_case_insensitively() {
        assert_eq!(ContentKind::from_path("user/a/Report.PDF"), ContentKind::Pdf);
        assert_eq!(ContentKind::from_path("notes.md"), ContentKind::PlainText);
        assert_eq!(ContentKind::from_path("image.png"), ContentKind::Unsupported);
        assert_eq!(ContentKind::from_path("no_extension"), ContentKind::Unsupported);
    }

    #[test]
    fn plain_text_is_chunked_without_page_numbers() -> Result<(), Box<dyn std::error::Error>> {
        let content = extract_content(
            ContentKind::PlainText,
            b"Hello there. General Kenobi.",
            &chunker(),
            &LopdfExtractor,
        )?;
        assert_eq!(content.chunks.len(), 1);
        assert_eq!(content.chunks[0].page_number, None);
        assert_eq!(content.text, "Hello there. General Kenobi.");
        Ok(())
    }

    #[test]
    fn pdf_pages_keep_their_numbers() -> Result<(), Box<dyn std::error::Error>> {
        let pdf = FakePdf(vec![
            PageText {
                number: 1,
                text: "Cover page.".to_string(),
            },
            PageText {
                number: 4,
                text: "Appendix text.".to_string(),
            },
        ]);
        let content = extract_content(ContentKind::Pdf, b"%PDF", &chunker(), &pdf)?;
        assert_eq!(content.chunks.len(), 2);
        assert_eq!(content.chunks[1].page_number, Some(4));
        assert_eq!(content.chunks[1].chunk_index, 1);
        assert_eq!(content.text, "Cover page.\n\nAppendix text.");
        Ok(())
    }

    #[test]
    fn unsupported_content_is_empty_not_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let content =
            extract_content(ContentKind::Unsupported, b"\x89PNG", &chunker(), &LopdfExtractor)?;
        assert!(content.chunks.is_empty());
        assert!(content.text.is_empty());
        Ok(())
    }

    #[test]
    fn broken_pdf_is_a_parse_error() {
        let result = LopdfExtractor.extract_pages(b"%PDF-1.4\n%broken");
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
    }
}
