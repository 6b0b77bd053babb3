use crate::config::Config;
use crate::document::{Chunk, Document, Span};

/// Cut preferences, strongest first. Raw slicing is the implicit last resort.
const SEPARATORS: [&[char]; 3] = [&['\n', '\n'], &['\n'], &[' ']];

/// Splits documents into overlapping chunks of at most `size` characters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(size: usize, overlap: usize) -> Self {
        let overlap = if size > 0 && overlap >= size {
            size / 4
        } else {
            overlap
        };
        Self { size, overlap }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.chunk_size, cfg.chunk_overlap)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn split_documents(&self, documents: &[Document]) -> Vec<Chunk> {
        documents
            .iter()
            .flat_map(|doc| {
                self.chunk_text(&doc.text)
                    .into_iter()
                    .enumerate()
                    .map(|(index, (span, text))| Chunk {
                        text,
                        metadata: doc.metadata.clone(),
                        index,
                        span,
                    })
            })
            .collect()
    }

    /// Each returned piece after the first starts with the last `overlap`
    /// characters of the piece before it.
    pub fn chunk_text(&self, text: &str) -> Vec<(Span, String)> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        let len_chars = chars.len();
        if self.size == 0 || len_chars <= self.size {
            return vec![(
                Span {
                    start: 0,
                    end: len_chars,
                },
                text.to_string(),
            )];
        }

        let mut chunks = Vec::new();
        let mut start = 0usize;
        loop {
            let limit = (start + self.size).min(len_chars);
            if limit == len_chars {
                chunks.push(piece(&chars, start, len_chars));
                break;
            }
            // The cut has to land past the overlap or the next chunk would not advance.
            let floor = start + self.overlap + 1;
            let end = find_cut(&chars, floor, limit).unwrap_or(limit);
            chunks.push(piece(&chars, start, end));
            start = end - self.overlap;
        }

        chunks
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(1000, 200)
    }
}

fn piece(chars: &[char], start: usize, end: usize) -> (Span, String) {
    (Span { start, end }, chars[start..end].iter().collect())
}

/// Latest position in `floor..=limit` right after the strongest separator found there.
fn find_cut(chars: &[char], floor: usize, limit: usize) -> Option<usize> {
    SEPARATORS.iter().find_map(|sep| {
        (floor..=limit)
            .rev()
            .find(|&cut| cut >= sep.len() && chars[cut - sep.len()..cut] == **sep)
    })
}
