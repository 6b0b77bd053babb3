use std::fs;
use std::io::{Cursor, Read};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::{Captures, Regex};
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::Config;
use crate::document::Document;

pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["txt", "pdf", "docx"];

/// Why a single file contributed no documents.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{} is not valid UTF-8", path.display())]
    Encoding { path: PathBuf },

    #[error("{} is {size} bytes, over the {limit} byte limit", path.display())]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("failed to extract PDF text from {}: {message}", path.display())]
    Pdf { path: PathBuf, message: String },

    #[error("failed to read Word document {}: {message}", path.display())]
    Docx { path: PathBuf, message: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FileKind {
    Text,
    Pdf,
    Word,
}

impl FileKind {
    fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" => Some(FileKind::Text),
            "pdf" => Some(FileKind::Pdf),
            "docx" => Some(FileKind::Word),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct LoadFailure {
    pub path: PathBuf,
    pub error: LoadError,
}

/// Everything a load produced: the documents plus the files that failed.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub documents: Vec<Document>,
    pub failures: Vec<LoadFailure>,
    /// Supported files that were attempted
    pub files_seen: usize,
}

#[derive(Clone, Debug)]
pub struct DocumentLoader {
    max_file_bytes: u64,
}

impl DocumentLoader {
    pub fn new(max_file_bytes: u64) -> Self {
        Self { max_file_bytes }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.max_file_bytes)
    }

    /// Loads a single file or every supported file under a directory.
    /// Per-file failures are logged and collected, never fatal.
    pub fn load(&self, path: &Path) -> LoadOutcome {
        let files = if path.is_dir() {
            discover_files(path)
        } else if FileKind::from_path(path).is_some() {
            vec![path.to_path_buf()]
        } else {
            tracing::warn!("Unsupported file type: {}", path.display());
            vec![]
        };

        let mut outcome = LoadOutcome {
            files_seen: files.len(),
            ..LoadOutcome::default()
        };
        for file in files {
            match self.load_file(&file) {
                Ok(docs) => {
                    tracing::info!("Loaded {} documents from {}", docs.len(), file.display());
                    outcome.documents.extend(docs);
                }
                Err(error) => {
                    tracing::error!("Skipping {}: {}", file.display(), error);
                    outcome.failures.push(LoadFailure { path: file, error });
                }
            }
        }
        outcome
    }

    /// Unsupported extensions load as zero documents rather than an error.
    pub fn load_file(&self, path: &Path) -> Result<Vec<Document>, LoadError> {
        let Some(kind) = FileKind::from_path(path) else {
            tracing::warn!("Unsupported file type: {}", path.display());
            return Ok(vec![]);
        };

        let bytes = self.read_bounded(path)?;
        let source = path.to_string_lossy().to_string();
        let documents = match kind {
            FileKind::Text => {
                let text = String::from_utf8(bytes).map_err(|_| LoadError::Encoding {
                    path: path.to_path_buf(),
                })?;
                vec![Document::new(text, source, None)]
            }
            FileKind::Pdf => read_pdf_pages(path, &bytes)?
                .into_iter()
                .enumerate()
                .map(|(i, text)| Document::new(text, source.clone(), Some(i as u32 + 1)))
                .collect(),
            FileKind::Word => vec![Document::new(read_docx(path, bytes)?, source, None)],
        };

        Ok(documents
            .into_iter()
            .filter(|doc| !doc.text.trim().is_empty())
            .collect())
    }

    fn read_bounded(&self, path: &Path) -> Result<Vec<u8>, LoadError> {
        let io_err = |source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        };
        let size = fs::metadata(path).map_err(io_err)?.len();
        if size > self.max_file_bytes {
            return Err(LoadError::TooLarge {
                path: path.to_path_buf(),
                size,
                limit: self.max_file_bytes,
            });
        }
        fs::read(path).map_err(io_err)
    }
}

fn discover_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!("Cannot walk {}: {}", dir.display(), err);
                continue;
            }
        };
        if entry.file_type().is_file() && FileKind::from_path(entry.path()).is_some() {
            files.push(entry.into_path());
        }
    }
    files
}

fn read_pdf_pages(path: &Path, bytes: &[u8]) -> Result<Vec<String>, LoadError> {
    let pdf_err = |message: String| LoadError::Pdf {
        path: path.to_path_buf(),
        message,
    };
    // pdf-extract panics on some malformed inputs instead of returning an error.
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }));
    match result {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(err)) => Err(pdf_err(err.to_string())),
        Err(_) => Err(pdf_err("parser panicked on malformed input".to_string())),
    }
}

fn read_docx(path: &Path, bytes: Vec<u8>) -> Result<String, LoadError> {
    let docx_err = |message: String| LoadError::Docx {
        path: path.to_path_buf(),
        message,
    };
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| docx_err(e.to_string()))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| docx_err(e.to_string()))?
        .read_to_string(&mut xml)
        .map_err(|e| docx_err(e.to_string()))?;
    Ok(docx_xml_to_text(&xml))
}

/// Flattens WordprocessingML body text: runs are concatenated, paragraphs
/// and breaks become newlines, tabs stay tabs.
pub fn docx_xml_to_text(xml: &str) -> String {
    static TOKENS: OnceLock<Regex> = OnceLock::new();
    let tokens = TOKENS.get_or_init(|| {
        Regex::new(concat!(
            r"(?s)<w:t(?:\s[^>]*)?>(.*?)</w:t>",
            r"|<w:tab\s*/>|<w:(?:br|cr)(?:\s[^>]*)?/>|</w:p>"
        ))
        .expect("docx token pattern is valid")
    });

    let mut text = String::new();
    for caps in tokens.captures_iter(xml) {
        if let Some(run) = caps.get(1) {
            text.push_str(&decode_entities(run.as_str()));
            continue;
        }
        let token = &caps[0];
        if token.starts_with("<w:tab") {
            text.push('\t');
        } else {
            text.push('\n');
        }
    }
    text.trim_end().to_string()
}

fn decode_entities(raw: &str) -> String {
    static ENTITY: OnceLock<Regex> = OnceLock::new();
    let entity = ENTITY.get_or_init(|| {
        Regex::new(r"&(amp|lt|gt|quot|apos|#[0-9]+|#x[0-9a-fA-F]+);")
            .expect("entity pattern is valid")
    });
    entity
        .replace_all(raw, |caps: &Captures| {
            let name = &caps[1];
            let decoded = match name {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ if name.starts_with("#x") => u32::from_str_radix(&name[2..], 16)
                    .ok()
                    .and_then(char::from_u32),
                _ => name[1..].parse::<u32>().ok().and_then(char::from_u32),
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}
