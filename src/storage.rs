//! Storage helpers for acquired document content on disk.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::{AcquiredDocument, DocumentReference, FileType};

/// SHA-256 of the content, hex encoded.
pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Make a title safe to use as a filename component.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => '_',
            c if c.is_control() || c.is_whitespace() => '_',
            c => c,
        })
        .collect();

    let trimmed = sanitized.trim_matches('_');
    if trimmed.is_empty() {
        "document".to_string()
    } else {
        trimmed.chars().take(100).collect()
    }
}

/// Construct the storage path with a full filename (including basename).
///
/// Uses a two-level directory structure based on hash prefix:
/// `{documents_dir}/{hash[0..2]}/{sanitized_basename}-{hash[0..8]}.{extension}`
pub fn content_storage_path_with_name(
    documents_dir: &Path,
    content_hash: &str,
    basename: &str,
    extension: &str,
) -> PathBuf {
    let filename = format!(
        "{}-{}.{}",
        sanitize_filename(basename),
        &content_hash[..8],
        extension
    );
    documents_dir.join(&content_hash[..2]).join(filename)
}

/// Map MIME type to file extension.
pub fn mime_to_extension(mime: &str) -> Option<&'static str> {
    match mime {
        "application/pdf" => Some("pdf"),
        "application/msword" => Some("doc"),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => Some("docx"),
        "application/zip" => Some("zip"),
        _ => None,
    }
}

fn extension_for(document: &AcquiredDocument, file_type: FileType) -> &'static str {
    document
        .content_type
        .as_deref()
        .and_then(mime_to_extension)
        .unwrap_or(match file_type {
            FileType::Unknown => "bin",
            other => other.as_str(),
        })
}

/// Write an acquired document under its content-addressed path.
///
/// Returns the path written. Identical content for the same title maps to
/// the same path, so re-acquiring is harmless.
pub fn save_document(
    documents_dir: &Path,
    reference: &DocumentReference,
    document: &AcquiredDocument,
) -> std::io::Result<PathBuf> {
    let hash = compute_hash(&document.bytes);
    let extension = extension_for(document, reference.file_type);
    let path = content_storage_path_with_name(documents_dir, &hash, &reference.title, extension);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, &document.bytes)?;
    Ok(path)
}
