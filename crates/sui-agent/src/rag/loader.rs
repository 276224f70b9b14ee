use std::path::Path;
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Path of the file the text came from
    pub source: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DocumentKind {
    Markdown,
    Pdf,
}

impl DocumentKind {
    fn extension(self) -> &'static str {
        match self {
            DocumentKind::Markdown => "md",
            DocumentKind::Pdf => "pdf",
        }
    }
}

/// Load every markdown file, then every PDF, found under `dir`.
///
/// Files that cannot be read are skipped with a warning, a missing directory
/// yields no documents.
pub fn load_documents(dir: &Path) -> Vec<Document> {
    if !dir.is_dir() {
        tracing::warn!("[RAG] Documents directory '{}' does not exist", dir.display());
        return Vec::new();
    }

    let mut documents = Vec::new();
    for kind in [DocumentKind::Markdown, DocumentKind::Pdf] {
        for path in find_files(dir, kind) {
            match read_document(&path, kind) {
                Ok(text) if text.trim().is_empty() => {
                    tracing::debug!("[RAG] Skipping empty document {}", path.display());
                }
                Ok(text) => documents.push(Document {
                    source: path.display().to_string(),
                    text,
                }),
                Err(e) => tracing::warn!("[RAG] Failed to load {}: {}", path.display(), e),
            }
        }
    }
    documents
}

fn find_files(dir: &Path, kind: DocumentKind) -> Vec<std::path::PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(kind.extension()))
        })
        .map(|entry| entry.into_path())
        .collect()
}

fn read_document(path: &Path, kind: DocumentKind) -> Result<String, String> {
    match kind {
        DocumentKind::Markdown => std::fs::read_to_string(path).map_err(|e| e.to_string()),
        DocumentKind::Pdf => extract_pdf(path),
    }
}

/// pdf-extract can panic on malformed fonts, so extraction runs under catch_unwind
fn extract_pdf(path: &Path) -> Result<String, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("Failed to read PDF file: {}", e))?;

    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem(&bytes)
    })) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(format!("PDF extraction failed: {}", e)),
        Err(_) => Err("PDF extraction panicked - likely contains malformed fonts".to_string()),
    }
}
