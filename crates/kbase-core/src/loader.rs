//! Turns files on disk into text segments.
//!
//! The format is decided by extension alone, before any I/O, so unsupported
//! files are rejected without touching them.

use std::fs;
use std::io::Read;
use std::path::Path;

use encoding_rs::Encoding;
use regex::Regex;
use tracing::debug;

use crate::config::LoaderSettings;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    PlainText,
    Docx,
    Markdown,
}

impl DocumentFormat {
    pub const EXTENSIONS: &'static [&'static str] = &["pdf", "txt", "docx", "md", "markdown"];

    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(Self::Pdf),
            "txt" => Ok(Self::PlainText),
            "docx" => Ok(Self::Docx),
            "md" | "markdown" => Ok(Self::Markdown),
            _ => Err(Error::UnsupportedFormat(ext)),
        }
    }

    pub fn is_supported(path: &Path) -> bool { Self::from_path(path).is_ok() }

    pub fn is_paginated(self) -> bool { matches!(self, Self::Pdf) }
}

/// A run of document text with its position in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSegment {
    pub text: String,
    /// 1-based page number for paginated formats.
    pub page: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedDocument {
    pub format: DocumentFormat,
    pub segments: Vec<TextSegment>,
}

impl LoadedDocument {
    pub fn full_text(&self) -> String {
        self.segments.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join("\n\n")
    }

    pub fn is_blank(&self) -> bool { self.segments.iter().all(|s| s.text.trim().is_empty()) }
}

struct MarkupPatterns {
    docx_token: Regex,
    md_fence: Regex,
    md_image: Regex,
    md_link: Regex,
    md_rule: Regex,
    md_heading: Regex,
    md_quote: Regex,
    md_list: Regex,
    md_emphasis: Regex,
    md_code: Regex,
    md_underscore: Regex,
    html_tag: Regex,
    blank_runs: Regex,
}

impl MarkupPatterns {
    fn compile() -> Result<Self> {
        let re = |p: &str| Regex::new(p).map_err(|e| Error::InvalidConfig(format!("bad loader pattern {p}: {e}")));
        Ok(Self {
            docx_token: re(r"<w:p[ >]|</w:p>|<w:tab/>|<w:br/>|<w:t(?:\s[^>]*)?>([^<]*)</w:t>")?,
            md_fence: re(r"(?m)^[ \t]*(?:```|~~~).*$")?,
            md_image: re(r"!\[([^\]]*)\]\([^)]*\)")?,
            md_link: re(r"\[([^\]]+)\]\([^)]*\)")?,
            md_rule: re(r"(?m)^[ \t]*(?:[-*_][ \t]*){3,}$")?,
            md_heading: re(r"(?m)^[ \t]{0,3}#{1,6}[ \t]*")?,
            md_quote: re(r"(?m)^[ \t]*>[ \t]?")?,
            md_list: re(r"(?m)^[ \t]*(?:[-*+]|\d+[.)])[ \t]+")?,
            md_emphasis: re(r"\*{1,3}([^*\s](?:[^*\n]*[^*\s])?)\*{1,3}")?,
            md_code: re(r"`+")?,
            md_underscore: re(r"__([^_\n]+)__")?,
            html_tag: re(r"</?[A-Za-z][^>\n]*>")?,
            blank_runs: re(r"\n[ \t]*\n(?:[ \t]*\n)+")?,
        })
    }
}

pub struct DocumentLoader {
    fallback: &'static Encoding,
    patterns: MarkupPatterns,
}

impl DocumentLoader {
    /// `fallback_encoding` is a WHATWG label such as `gb18030`, `gbk` or `windows-1252`.
    pub fn new(fallback_encoding: &str) -> Result<Self> {
        let fallback = Encoding::for_label(fallback_encoding.trim().as_bytes())
            .ok_or_else(|| Error::InvalidConfig(format!("unknown text encoding '{fallback_encoding}'")))?;
        Ok(Self { fallback, patterns: MarkupPatterns::compile()? })
    }

    pub fn from_settings(settings: &LoaderSettings) -> Result<Self> { Self::new(&settings.fallback_encoding) }

    /// Loads the whole document or fails; no partial result is returned.
    pub fn load(&self, path: &Path) -> Result<LoadedDocument> {
        let format = DocumentFormat::from_path(path)?;
        let bytes = fs::read(path).map_err(|e| Error::load(path, e))?;
        debug!(path = %path.display(), ?format, bytes = bytes.len(), "loading document");
        let segments = match format {
            DocumentFormat::Pdf => load_pdf(path, &bytes)?,
            DocumentFormat::PlainText => vec![TextSegment { text: self.decode_text(path, &bytes)?, page: None }],
            DocumentFormat::Docx => vec![TextSegment { text: self.docx_text(path, &bytes)?, page: None }],
            DocumentFormat::Markdown => {
                let raw = self.decode_text(path, &bytes)?;
                vec![TextSegment { text: self.strip_markdown(&raw), page: None }]
            }
        };
        Ok(LoadedDocument { format, segments })
    }

    fn decode_text(&self, path: &Path, bytes: &[u8]) -> Result<String> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        let text = if let Ok(s) = std::str::from_utf8(bytes) {
            s.to_string()
        } else {
            let (decoded, had_errors) = self.fallback.decode_without_bom_handling(bytes);
            if had_errors {
                return Err(Error::load(path, format!("neither UTF-8 nor {}", self.fallback.name())));
            }
            debug!(path = %path.display(), encoding = self.fallback.name(), "decoded with fallback encoding");
            decoded.into_owned()
        };
        Ok(text.replace("\r\n", "\n"))
    }

    fn docx_text(&self, path: &Path, bytes: &[u8]) -> Result<String> {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
            .map_err(|e| Error::load(path, format!("not a DOCX archive: {e}")))?;
        let mut xml = String::new();
        archive
            .by_name("word/document.xml")
            .map_err(|_| Error::load(path, "no word/document.xml in archive"))?
            .read_to_string(&mut xml)
            .map_err(|e| Error::load(path, e))?;

        let mut text = String::new();
        for token in self.patterns.docx_token.captures_iter(&xml) {
            match token.get(1) {
                Some(run) => text.push_str(&unescape_xml(run.as_str())),
                None => match &token[0] {
                    "</w:p>" => text.push_str("\n\n"),
                    "<w:tab/>" => text.push('\t'),
                    "<w:br/>" => text.push('\n'),
                    _ => {}
                },
            }
        }
        Ok(tidy_paragraphs(&text))
    }

    fn strip_markdown(&self, raw: &str) -> String {
        let p = &self.patterns;
        let text = p.md_fence.replace_all(raw, "");
        let text = p.md_image.replace_all(&text, "$1");
        let text = p.md_link.replace_all(&text, "$1");
        let text = p.md_rule.replace_all(&text, "");
        let text = p.md_heading.replace_all(&text, "");
        let text = p.md_quote.replace_all(&text, "");
        let text = p.md_list.replace_all(&text, "");
        let text = p.md_emphasis.replace_all(&text, "$1");
        let text = p.md_code.replace_all(&text, "");
        let text = p.md_underscore.replace_all(&text, "$1");
        let text = p.html_tag.replace_all(&text, "");
        let text = p.blank_runs.replace_all(&text, "\n\n");
        text.trim().to_string()
    }
}

fn load_pdf(path: &Path, bytes: &[u8]) -> Result<Vec<TextSegment>> {
    // pdf-extract panics on some malformed inputs.
    let pages = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|_| Error::load(path, "PDF parser crashed on malformed input"))?
        .map_err(|e| Error::load(path, e))?;
    Ok(pages
        .into_iter()
        .zip(1u32..)
        .map(|(text, page)| TextSegment { text: text.trim().to_string(), page: Some(page) })
        .collect())
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn tidy_paragraphs(text: &str) -> String {
    text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()).collect::<Vec<_>>().join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_by_extension_is_case_insensitive() {
        assert_eq!(DocumentFormat::from_path(Path::new("a/B.PDF")).unwrap(), DocumentFormat::Pdf);
        assert_eq!(DocumentFormat::from_path(Path::new("notes.Markdown")).unwrap(), DocumentFormat::Markdown);
        assert!(matches!(
            DocumentFormat::from_path(Path::new("sheet.xlsx")),
            Err(Error::UnsupportedFormat(ext)) if ext == "xlsx"
        ));
        assert!(matches!(DocumentFormat::from_path(Path::new("README")), Err(Error::UnsupportedFormat(ext)) if ext.is_empty()));
    }

    #[test]
    fn markdown_is_reduced_to_text() {
        let loader = DocumentLoader::new("gb18030").unwrap();
        let md = "# Title\n\nSome **bold** and `code` with a [link](http://x.y).\n\n- item one\n- item two\n\n```rust\nlet x = 1;\n```\n\n---\n\n> quoted __text__ <br/>\n";
        let text = loader.strip_markdown(md);
        assert_eq!(
            text,
            "Title\n\nSome bold and code with a link.\n\nitem one\nitem two\n\nlet x = 1;\n\nquoted text"
        );
    }

    #[test]
    fn lone_asterisks_survive_markdown_stripping() {
        let loader = DocumentLoader::new("gb18030").unwrap();
        assert_eq!(loader.strip_markdown("2*3 = 6 and *stress* on a * b"), "2*3 = 6 and stress on a * b");
        assert_eq!(loader.strip_markdown("***all three*** then 5 * 4"), "all three then 5 * 4");
    }

    #[test]
    fn xml_entities_are_decoded_once() {
        assert_eq!(unescape_xml("a &amp;lt; b &lt; c"), "a &lt; b < c");
    }
}
