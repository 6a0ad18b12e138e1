//! Supplementary document models.
//!
//! A [`DocumentReference`] is what the locator finds on the source site; an
//! [`AcquiredDocument`] is what the acquisition engine turns it into.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::CandidateId;

/// Accepted document file types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    #[default]
    Pdf,
    Doc,
    Docx,
    Unknown,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Doc => "doc",
            Self::Docx => "docx",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Self::Pdf,
            "doc" => Self::Doc,
            "docx" => Self::Docx,
            _ => Self::Unknown,
        }
    }

    /// Whether a Content-Type header value denotes this file type.
    ///
    /// `Unknown` accepts any of the known document MIME types.
    pub fn matches_content_type(&self, content_type: &str) -> bool {
        let ct = content_type.to_ascii_lowercase();
        let pdf = ct.contains("application/pdf");
        let doc = ct.contains("application/msword");
        let docx = ct.contains("wordprocessingml");
        match self {
            Self::Pdf => pdf,
            Self::Doc => doc,
            Self::Docx => docx,
            Self::Unknown => pdf || doc || docx,
        }
    }

    /// Canonical MIME type.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Doc => "application/msword",
            Self::Docx => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            Self::Unknown => "application/octet-stream",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A located supplementary document (typically a rulebook).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentReference {
    /// Catalog item the document belongs to.
    pub item_id: CandidateId,
    /// Landing page or direct URL of the document.
    pub source_url: String,
    pub title: String,
    /// Source-side file id, used to guess direct download URLs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id_hint: Option<String>,
    /// Language asserted by the source index or inferred from the title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default)]
    pub file_type: FileType,
}

impl DocumentReference {
    pub fn new(item_id: CandidateId, source_url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            item_id,
            source_url: source_url.into(),
            title: title.into(),
            file_id_hint: None,
            language: None,
            file_type: FileType::Pdf,
        }
    }

    pub fn with_file_id(mut self, file_id: impl Into<String>) -> Self {
        self.file_id_hint = Some(file_id.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_file_type(mut self, file_type: FileType) -> Self {
        self.file_type = file_type;
        self
    }
}

/// Acquisition strategies, in their default order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    BrowserCapture,
    PatternGuess,
    EmbeddedLink,
    AuthenticatedReplay,
    NavigationCapture,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BrowserCapture => "browser_capture",
            Self::PatternGuess => "pattern_guess",
            Self::EmbeddedLink => "embedded_link",
            Self::AuthenticatedReplay => "authenticated_replay",
            Self::NavigationCapture => "navigation_capture",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw document bytes plus the strategy that produced them.
///
/// Not persisted by the crawler; the caller decides where the bytes go.
#[derive(Debug, Clone)]
pub struct AcquiredDocument {
    pub bytes: Vec<u8>,
    pub strategy: StrategyKind,
    /// MIME type sniffed from the payload, if recognisable.
    pub content_type: Option<String>,
}

impl AcquiredDocument {
    pub fn new(bytes: Vec<u8>, strategy: StrategyKind) -> Self {
        let content_type = infer::get(&bytes).map(|t| t.mime_type().to_string());
        Self {
            bytes,
            strategy,
            content_type,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
