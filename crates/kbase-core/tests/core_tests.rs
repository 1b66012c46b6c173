use std::fs;
use std::io::Write;
use std::path::PathBuf;

use tempfile::TempDir;

use kbase_core::config::Config;
use kbase_core::{Chunker, DocumentFormat, DocumentLoader, Error};

fn loader() -> DocumentLoader { DocumentLoader::new("gb18030").expect("loader") }

fn fixture(name: &str) -> PathBuf { PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name) }

#[test]
fn chunk_count_follows_window_formula() {
    for size in 2..12usize {
        for overlap in 0..size {
            let chunker = Chunker::new(size, overlap).unwrap();
            for len in 1..60usize {
                let text: String = (0..len).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
                let chunks = chunker.split(&text);
                if len <= size {
                    assert_eq!(chunks, vec![text.clone()], "len={len} size={size}");
                    continue;
                }
                let expected = (len - overlap).div_ceil(size - overlap);
                assert_eq!(chunks.len(), expected, "len={len} size={size} overlap={overlap}");
                for pair in chunks.windows(2) {
                    let tail: String = pair[0].chars().skip(size - overlap).collect();
                    let head: String = pair[1].chars().take(overlap).collect();
                    assert_eq!(tail, head, "overlap region len={len} size={size} overlap={overlap}");
                    assert_eq!(pair[0].chars().count(), size);
                }
            }
        }
    }
}

#[test]
fn chunking_is_deterministic_and_blank_input_is_empty() {
    let chunker = Chunker::new(50, 10).unwrap().with_separator("\n\n");
    let text = "first paragraph about storage\n\nsecond paragraph about search ".repeat(20);
    assert_eq!(chunker.split(&text), chunker.split(&text));
    assert!(chunker.split("").is_empty());
    assert!(chunker.split("  \n\n \t").is_empty());
}

#[test]
fn separator_mode_keeps_window_formula_without_separators() {
    let chunker = Chunker::new(100, 20).unwrap().with_separator("\n\n");
    let text = "x".repeat(1000);
    assert_eq!(chunker.split(&text).len(), (1000 - 20usize).div_ceil(80));
}

#[test]
fn packs_paragraphs_with_overlap() {
    let paragraphs: Vec<String> = (0..6).map(|i| format!("para{i} xxxxxxxx")).collect();
    let chunker = Chunker::new(40, 15).unwrap().with_separator("\n\n");
    let chunks = chunker.split(&paragraphs.join("\n\n"));
    let expected: Vec<String> = paragraphs.windows(2).map(|pair| pair.join("\n\n")).collect();
    assert_eq!(chunks, expected);
    for pair in chunks.windows(2) {
        let shared = pair[0].rsplit("\n\n").next().unwrap();
        assert!(pair[1].starts_with(shared), "{:?} does not continue {:?}", pair[1], pair[0]);
    }
}

#[test]
fn loads_utf8_text_with_bom() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("notes.txt");
    fs::write(&path, b"\xEF\xBB\xBFline one\r\nline two").unwrap();
    let doc = loader().load(&path).expect("load");
    assert_eq!(doc.format, DocumentFormat::PlainText);
    assert_eq!(doc.segments.len(), 1);
    assert_eq!(doc.segments[0].text, "line one\nline two");
    assert_eq!(doc.segments[0].page, None);
}

#[test]
fn falls_back_to_regional_encoding() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("gbk.txt");
    // "中文" in GBK
    fs::write(&path, [0xD6u8, 0xD0, 0xCE, 0xC4]).unwrap();
    let doc = loader().load(&path).expect("load");
    assert_eq!(doc.full_text(), "中文");
}

#[test]
fn undecodable_text_is_a_load_error() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("binary.txt");
    fs::write(&path, [0xFFu8, 0xFF, 0xFF]).unwrap();
    assert!(matches!(loader().load(&path), Err(Error::Load { .. })));
}

#[test]
fn missing_file_is_a_load_error() {
    let tmp = TempDir::new().unwrap();
    let err = loader().load(&tmp.path().join("absent.md")).unwrap_err();
    assert!(matches!(err, Error::Load { .. }), "{err}");
}

#[test]
fn unsupported_extension_is_rejected_before_io() {
    // The file does not exist; the extension alone decides.
    let err = loader().load(std::path::Path::new("/nonexistent/dir/data.xlsx")).unwrap_err();
    assert!(matches!(err, Error::UnsupportedFormat(ref ext) if ext == "xlsx"), "{err}");
}

#[test]
fn loads_docx_paragraphs() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("memo.docx");
    let xml = r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p w:rsidR="1"><w:pPr><w:jc w:val="left"/></w:pPr><w:r><w:t>Quarterly</w:t></w:r><w:r><w:t xml:space="preserve"> report &amp; notes</w:t></w:r></w:p><w:p><w:r><w:t>Second</w:t><w:tab/><w:t>paragraph</w:t></w:r></w:p><w:p/></w:body></w:document>"#;
    let file = fs::File::create(&path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default()).unwrap();
    zip.write_all(xml.as_bytes()).unwrap();
    zip.finish().unwrap();

    let doc = loader().load(&path).expect("load docx");
    assert_eq!(doc.format, DocumentFormat::Docx);
    assert_eq!(doc.full_text(), "Quarterly report & notes\n\nSecond\tparagraph");
}

#[test]
fn corrupt_docx_is_a_load_error() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("broken.docx");
    fs::write(&path, b"not a zip archive").unwrap();
    assert!(matches!(loader().load(&path), Err(Error::Load { .. })));
}

#[test]
fn loads_markdown_as_plain_text() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("readme.md");
    fs::write(&path, "# Setup\n\nRun the **indexer** first.\n").unwrap();
    let doc = loader().load(&path).expect("load md");
    assert_eq!(doc.format, DocumentFormat::Markdown);
    assert_eq!(doc.full_text(), "Setup\n\nRun the indexer first.");
}

#[test]
fn loads_pdf_one_segment_per_page() {
    let doc = loader().load(&fixture("two_pages.pdf")).expect("load pdf");
    assert_eq!(doc.format, DocumentFormat::Pdf);
    assert_eq!(doc.segments.len(), 2);
    assert_eq!(doc.segments[0].page, Some(1));
    assert_eq!(doc.segments[1].page, Some(2));
    assert!(doc.segments[0].text.contains("similar"), "page 1: {:?}", doc.segments[0].text);
    assert!(doc.segments[1].text.contains("page"), "page 2: {:?}", doc.segments[1].text);
}

#[test]
fn corrupt_pdf_is_a_load_error() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("scan.pdf");
    fs::write(&path, b"%PDF-1.4 truncated").unwrap();
    assert!(matches!(loader().load(&path), Err(Error::Load { .. })));
}

#[test]
fn config_file_overrides_defaults_and_resolves_paths() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("config.toml"),
        "storage_root = \"store\"\ndefault_collection = \"papers\"\n\n[chunking]\nchunk_size = 500\nchunk_overlap = 50\n",
    )
    .unwrap();
    let settings = Config::load_from(tmp.path()).unwrap().settings().unwrap();
    assert_eq!(settings.storage_root, tmp.path().join("store"));
    assert_eq!(settings.default_collection, "papers");
    assert_eq!(settings.chunking.chunk_size, 500);
    assert_eq!(settings.chunking.chunk_overlap, 50);
    assert_eq!(settings.chunking.separator, "\n\n");
    assert_eq!(settings.top_k, 3);
}

#[test]
fn invalid_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("config.toml"), "[chunking]\nchunk_size = 100\nchunk_overlap = 100\n").unwrap();
    let err = Config::load_from(tmp.path()).unwrap().settings().unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)), "{err}");
}
