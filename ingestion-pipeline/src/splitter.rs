use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use common::error::AppError;
use dom_smoothie::{Readability, TextMode};
use text_splitter::{Characters, ChunkConfig, MarkdownSplitter, TextSplitter};

/// Splits one document into ordered chunks under a character budget.
pub trait ChunkSplitter: Send + Sync {
    fn split(
        &self,
        content: &str,
        max_chars: usize,
        overlap_chars: usize,
    ) -> Result<Vec<String>, AppError>;
}

/// Plain-text splitting along semantic boundaries.
pub struct PlainTextSplitter;

impl ChunkSplitter for PlainTextSplitter {
    fn split(
        &self,
        content: &str,
        max_chars: usize,
        overlap_chars: usize,
    ) -> Result<Vec<String>, AppError> {
        let config = chunk_config(max_chars, overlap_chars)?;
        let splitter = TextSplitter::new(config);
        Ok(splitter.chunks(content).map(str::to_owned).collect())
    }
}

/// Markdown-aware splitting that keeps headings and blocks together.
pub struct MarkdownChunkSplitter;

impl ChunkSplitter for MarkdownChunkSplitter {
    fn split(
        &self,
        content: &str,
        max_chars: usize,
        overlap_chars: usize,
    ) -> Result<Vec<String>, AppError> {
        let config = chunk_config(max_chars, overlap_chars)?;
        let splitter = MarkdownSplitter::new(config);
        Ok(splitter.chunks(content).map(str::to_owned).collect())
    }
}

/// HTML documents are reduced to their readable content (as Markdown)
/// before splitting.
pub struct HtmlChunkSplitter;

impl ChunkSplitter for HtmlChunkSplitter {
    fn split(
        &self,
        content: &str,
        max_chars: usize,
        overlap_chars: usize,
    ) -> Result<Vec<String>, AppError> {
        let config = dom_smoothie::Config {
            text_mode: TextMode::Markdown,
            ..Default::default()
        };
        let mut readability = Readability::new(content, None, Some(config))
            .map_err(|e| AppError::Validation(format!("unreadable html document: {e}")))?;
        let article = readability
            .parse()
            .map_err(|e| AppError::Validation(format!("unreadable html document: {e}")))?;

        MarkdownChunkSplitter.split(&article.text_content, max_chars, overlap_chars)
    }
}

fn chunk_config(
    max_chars: usize,
    overlap_chars: usize,
) -> Result<ChunkConfig<Characters>, AppError> {
    ChunkConfig::new(max_chars)
        .with_overlap(overlap_chars)
        .map_err(|e| AppError::Validation(format!("invalid chunk overlap: {e}")))
}

/// Extension-keyed splitter lookup. The default mappings mirror the file
/// types the ingestion path accepts; callers may register further types or
/// replace an existing mapping.
pub struct SplitterRegistry {
    by_extension: HashMap<String, Arc<dyn ChunkSplitter>>,
}

impl Default for SplitterRegistry {
    fn default() -> Self {
        let mut registry = Self {
            by_extension: HashMap::new(),
        };
        let plain: Arc<dyn ChunkSplitter> = Arc::new(PlainTextSplitter);
        let markdown: Arc<dyn ChunkSplitter> = Arc::new(MarkdownChunkSplitter);
        let html: Arc<dyn ChunkSplitter> = Arc::new(HtmlChunkSplitter);
        registry.register("txt", Arc::clone(&plain));
        registry.register("md", Arc::clone(&markdown));
        registry.register("markdown", markdown);
        registry.register("html", Arc::clone(&html));
        registry.register("htm", html);
        registry
    }
}

impl SplitterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, extension: &str, splitter: Arc<dyn ChunkSplitter>) {
        self.by_extension
            .insert(extension.to_lowercase(), splitter);
    }

    /// Look up the splitter for a file name by its extension; an
    /// unrecognized extension fails the ingestion before any side effect on
    /// the index.
    pub fn resolve(&self, file_name: &str) -> Result<Arc<dyn ChunkSplitter>, AppError> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .ok_or_else(|| {
                AppError::Validation(format!("file {file_name:?} has no usable extension"))
            })?;

        self.by_extension
            .get(&extension)
            .map(Arc::clone)
            .ok_or_else(|| AppError::Validation(format!("unsupported file type {extension:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_by_extension() {
        let registry = SplitterRegistry::new();
        assert!(registry.resolve("notes.txt").is_ok());
        assert!(registry.resolve("README.md").is_ok());
        assert!(registry.resolve("page.HTML").is_ok());

        let unknown = registry.resolve("slides.pdf");
        assert!(matches!(unknown, Err(AppError::Validation(_))));
        let missing = registry.resolve("no_extension");
        assert!(matches!(missing, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_registered_override_wins() {
        struct LineSplitter;
        impl ChunkSplitter for LineSplitter {
            fn split(
                &self,
                content: &str,
                _max_chars: usize,
                _overlap_chars: usize,
            ) -> Result<Vec<String>, AppError> {
                Ok(content.lines().map(str::to_owned).collect())
            }
        }

        let mut registry = SplitterRegistry::new();
        registry.register("txt", Arc::new(LineSplitter));
        let splitter = registry.resolve("notes.txt").expect("resolve");
        let chunks = splitter.split("line1\nline2", 3200, 1600).expect("split");
        assert_eq!(chunks, vec!["line1".to_string(), "line2".to_string()]);
    }

    #[test]
    fn test_plain_text_respects_budget() {
        let content = "alpha beta gamma delta epsilon zeta";
        let chunks = PlainTextSplitter.split(content, 12, 0).expect("split");
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= 12));
        // Order is preserved.
        assert!(chunks[0].starts_with("alpha"));
    }

    #[test]
    fn test_overlap_larger_than_budget_is_rejected() {
        let result = PlainTextSplitter.split("text", 10, 20);
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_html_is_reduced_to_text() {
        let paragraph = "Readable sentence with enough words to satisfy the \
                         extraction heuristics of the readability pass. "
            .repeat(4);
        let html = format!(
            "<html><body><article><h1>Title</h1><p>{paragraph}</p><p>{paragraph}</p></article></body></html>"
        );
        let chunks = HtmlChunkSplitter.split(&html, 4000, 0).expect("split");
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| !c.contains('<')));
    }
}
