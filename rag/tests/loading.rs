use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use rag::{Chunker, DocumentLoader, LoadError};
use tempfile::tempdir;
use zip::write::FileOptions;

const DOCX_BODY: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>
<w:p><w:r><w:t>Offer letter</w:t></w:r></w:p>
<w:p><w:r><w:t xml:space="preserve">Salary: </w:t></w:r><w:r><w:t>90k &amp; equity</w:t></w:r></w:p>
</w:body></w:document>"#;

fn write_docx(path: &Path, body: &str) {
    let file = File::create(path).expect("create docx");
    let mut zip = zip::ZipWriter::new(file);
    zip.start_file("word/document.xml", FileOptions::default())
        .expect("start entry");
    zip.write_all(body.as_bytes()).expect("write entry");
    zip.finish().expect("finish docx");
}

#[test]
fn loads_supported_files_and_reports_corrupt_ones() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("good.txt"), "Jane Doe\nRust, Go").expect("write");
    fs::write(dir.path().join("bad.txt"), [0xc3, 0x28, 0xff]).expect("write");
    fs::write(dir.path().join("broken.docx"), b"not a zip archive").expect("write");
    fs::write(dir.path().join("notes.md"), "# ignored").expect("write");
    fs::create_dir(dir.path().join("nested")).expect("mkdir");
    write_docx(&dir.path().join("nested").join("offer.docx"), DOCX_BODY);

    let outcome = DocumentLoader::new(1024 * 1024).load(dir.path());

    assert_eq!(outcome.files_seen, 4);
    assert_eq!(outcome.documents.len(), 2);
    assert_eq!(outcome.failures.len(), 2);

    let texts: Vec<&str> = outcome.documents.iter().map(|d| d.text.as_str()).collect();
    assert!(texts.contains(&"Jane Doe\nRust, Go"));
    assert!(texts.contains(&"Offer letter\nSalary: 90k & equity"));

    assert!(outcome
        .failures
        .iter()
        .any(|f| matches!(f.error, LoadError::Encoding { .. })));
    assert!(outcome
        .failures
        .iter()
        .any(|f| matches!(f.error, LoadError::Docx { .. })));
}

#[test]
fn document_source_is_the_file_path() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("cv.txt");
    fs::write(&path, "Product manager").expect("write");

    let docs = DocumentLoader::new(1024).load_file(&path).expect("load");
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].metadata.source, path.to_string_lossy());
    assert_eq!(docs[0].metadata.page, None);
}

#[test]
fn unsupported_single_file_yields_nothing() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("legacy.doc");
    fs::write(&path, "binary-ish").expect("write");

    let outcome = DocumentLoader::new(1024).load(&path);
    assert_eq!(outcome.files_seen, 0);
    assert!(outcome.documents.is_empty());
    assert!(outcome.failures.is_empty());
}

#[test]
fn blank_files_produce_no_documents() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("empty.txt");
    fs::write(&path, "  \n\t\n").expect("write");

    assert!(DocumentLoader::new(1024).load_file(&path).expect("load").is_empty());
}

#[test]
fn oversized_files_are_rejected() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("huge.txt");
    fs::write(&path, "x".repeat(64)).expect("write");

    match DocumentLoader::new(16).load_file(&path) {
        Err(LoadError::TooLarge { size, limit, .. }) => {
            assert_eq!(size, 64);
            assert_eq!(limit, 16);
        }
        other => panic!("expected TooLarge, got {other:?}"),
    }
}

#[test]
fn garbage_pdf_is_a_recoverable_failure() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("scan.pdf"), b"%PDF-1.4\nthis is not really a pdf").expect("write");
    fs::write(dir.path().join("cv.txt"), "Accountant").expect("write");

    let outcome = DocumentLoader::new(1024).load(dir.path());
    assert_eq!(outcome.documents.len(), 1);
    assert_eq!(outcome.failures.len(), 1);
    assert!(matches!(outcome.failures[0].error, LoadError::Pdf { .. }));
}

#[test]
fn chunking_is_deterministic_with_exact_overlap() {
    let text = "abcd ".repeat(480);
    let chunker = Chunker::new(1000, 200);

    let first = chunker.chunk_text(&text);
    assert_eq!(first, chunker.chunk_text(&text));
    assert_eq!(first.len(), 3);

    for (span, piece) in &first {
        assert!(piece.chars().count() <= 1000);
        assert_eq!(piece.chars().count(), span.end - span.start);
    }
    for pair in first.windows(2) {
        let (prev_span, prev) = &pair[0];
        let (next_span, next) = &pair[1];
        assert_eq!(prev_span.end - next_span.start, 200);
        let tail: String = prev.chars().skip(prev.chars().count() - 200).collect();
        assert!(next.starts_with(&tail));
    }
    assert_eq!(first.last().map(|(span, _)| span.end), Some(2400));
}

#[test]
fn loaded_documents_split_within_bounds() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("handbook.txt");
    let handbook = (1..=40)
        .map(|i| format!("Section {i}. Employees accrue leave monthly and may carry it over."))
        .collect::<Vec<_>>()
        .join("\n\n");
    fs::write(&path, &handbook).expect("write");

    let docs = DocumentLoader::new(1024 * 1024).load_file(&path).expect("load");
    let chunks = Chunker::new(300, 50).split_documents(&docs);

    assert!(chunks.len() > 1);
    for (i, chunk) in chunks.iter().enumerate() {
        assert!(chunk.char_len() <= 300);
        assert_eq!(chunk.index, i);
        assert_eq!(chunk.metadata, docs[0].metadata);
    }
    assert!(chunks[0].text.ends_with("\n\n"));
}
