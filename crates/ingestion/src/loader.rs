//! Document content loading
//!
//! Resolves a document's origin to raw text. Local files are read here;
//! URL origins need an external crawler and are rejected by the local
//! loader.

use crate::errors::IngestionError;
use crate::pdf::extract_text_from_pdf;
use async_trait::async_trait;
use normrag_common::config::IngestionConfig;
use normrag_common::db::models::Document;
use normrag_common::errors::AppError;
use std::path::Path;
use tracing::{debug, instrument};

/// Loads the text content behind a document
#[async_trait]
pub trait ContentLoader: Send + Sync {
    /// Whether `load_file` accepts this path's extension
    fn supports(&self, path: &Path) -> bool;

    async fn load_file(&self, path: &Path) -> Result<String, IngestionError>;

    /// Reload a stored document from its origin
    async fn load(&self, document: &Document) -> Result<String, IngestionError> {
        match (&document.file_path, &document.url) {
            (Some(path), _) => self.load_file(Path::new(path)).await,
            (None, Some(url)) => Err(AppError::invalid_input(format!(
                "document {} comes from {} and needs an external crawler to reload",
                document.id, url
            ))
            .into()),
            (None, None) => Err(AppError::invalid_input(format!(
                "document {} has no content origin",
                document.id
            ))
            .into()),
        }
    }
}

/// Reads PDF and plain-text files from the local filesystem
#[derive(Debug, Clone)]
pub struct LocalContentLoader {
    allowed_extensions: Vec<String>,
    max_file_size: u64,
}

impl LocalContentLoader {
    pub fn new(config: &IngestionConfig) -> Self {
        Self {
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| normalize_extension(e))
                .collect(),
            max_file_size: config.max_file_size,
        }
    }

    /// Lowercase extension with a leading dot, if the file has one
    pub fn extension_of(path: &Path) -> Option<String> {
        path.extension()
            .map(|e| normalize_extension(&e.to_string_lossy()))
    }
}

#[async_trait]
impl ContentLoader for LocalContentLoader {
    fn supports(&self, path: &Path) -> bool {
        Self::extension_of(path).is_some_and(|ext| self.allowed_extensions.contains(&ext))
    }

    /// Check the allow-list and size limit, then extract text
    #[instrument(skip(self), fields(path = %path.display()))]
    async fn load_file(&self, path: &Path) -> Result<String, IngestionError> {
        let extension = Self::extension_of(path).unwrap_or_default();
        if !self.allowed_extensions.contains(&extension) {
            return Err(IngestionError::UnsupportedFileType(extension));
        }

        let metadata = tokio::fs::metadata(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => IngestionError::FileNotFound(path.display().to_string()),
            _ => IngestionError::IoError(e),
        })?;

        if metadata.len() > self.max_file_size {
            return Err(IngestionError::FileTooLarge {
                size: metadata.len(),
                limit: self.max_file_size,
            });
        }

        let bytes = tokio::fs::read(path).await?;
        let origin = path.display().to_string();

        let text = match extension.as_str() {
            ".pdf" => tokio::task::spawn_blocking(move || extract_text_from_pdf(&bytes, &origin))
                .await
                .map_err(|e| AppError::Internal {
                    message: format!("PDF extraction task failed: {}", e),
                })??,
            _ => String::from_utf8(bytes).map_err(|_| IngestionError::InvalidEncoding(origin))?,
        };

        debug!(chars = text.chars().count(), "File loaded");
        Ok(text)
    }
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use normrag_common::db::models::DocumentStatus;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn loader(max_file_size: u64) -> LocalContentLoader {
        LocalContentLoader::new(&IngestionConfig {
            max_file_size,
            ..IngestionConfig::default()
        })
    }

    fn temp_file(name: &str, contents: &[u8]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("normrag-loader-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn document(file_path: Option<String>, url: Option<String>) -> Document {
        let now = chrono::Utc::now().into();
        Document {
            id: Uuid::new_v4(),
            title: "Положення".to_string(),
            document_number: None,
            url,
            file_path,
            status: DocumentStatus::Processing.into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_loads_utf8_text() {
        let path = temp_file("polozhennia.TXT", "Стаття 1. Загальні положення.".as_bytes());
        let text = loader(1024).load_file(&path).await.unwrap();
        assert_eq!(text, "Стаття 1. Загальні положення.");
    }

    #[tokio::test]
    async fn test_rejects_unknown_extension() {
        let path = temp_file("notes.docx", b"hello");
        let err = loader(1024).load_file(&path).await.unwrap_err();
        assert!(matches!(err, IngestionError::UnsupportedFileType(ext) if ext == ".docx"));
    }

    #[tokio::test]
    async fn test_rejects_oversized_file() {
        let path = temp_file("big.txt", &[b'a'; 64]);
        let err = loader(10).load_file(&path).await.unwrap_err();
        assert!(matches!(err, IngestionError::FileTooLarge { size: 64, limit: 10 }));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = loader(1024)
            .load_file(Path::new("/nonexistent/normrag/file.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestionError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_url_documents_not_reloadable() {
        let doc = document(None, Some("https://sumdu.edu.ua/doc".to_string()));
        let err = loader(1024).load(&doc).await.unwrap_err();
        assert!(matches!(err, IngestionError::Core(AppError::InvalidInput { .. })));
    }

    #[test]
    fn test_extension_normalization() {
        assert_eq!(
            LocalContentLoader::extension_of(Path::new("a/B.PDF")).as_deref(),
            Some(".pdf")
        );
        assert!(loader(1).supports(Path::new("x.txt")));
        assert!(!loader(1).supports(Path::new("x")));
    }
}
