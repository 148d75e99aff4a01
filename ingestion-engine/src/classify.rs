use std::path::Path;

use common::{error::AppError, storage::types::ingestion_record::FileKind};

use crate::types::{ClassifiedFile, IngestionRequest};

/// Tabular sources routed to schema profiling instead of vectorization.
const STRUCTURED_EXTENSIONS: &[&str] = &["csv", "xlsx", "xls", "json", "xml"];

const UNSTRUCTURED_EXTENSIONS: &[&str] = &[
    "pdf", "txt", "md", "markdown", "html", "htm", "docx", "doc", "pptx", "ppt", "py", "srt",
    "vtt",
];

/// Map a display name to a file kind. Pure; the only failure mode is an
/// unsupported extension, which the caller must reject.
pub fn classify(request: &IngestionRequest) -> Result<ClassifiedFile, AppError> {
    let extension = Path::new(&request.display_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    if STRUCTURED_EXTENSIONS.contains(&extension.as_str()) {
        return Ok(ClassifiedFile {
            kind: FileKind::Structured,
            extension,
        });
    }

    if UNSTRUCTURED_EXTENSIONS.contains(&extension.as_str()) {
        return Ok(ClassifiedFile {
            kind: FileKind::Unstructured,
            extension,
        });
    }

    // Unknown extension with a textual MIME guess is still ingestible as
    // plain text.
    let guessed = mime_guess::from_path(&request.display_name).first();
    if guessed.is_some_and(|guess| guess.type_() == mime::TEXT) {
        return Ok(ClassifiedFile {
            kind: FileKind::Unstructured,
            extension,
        });
    }

    if extension.is_empty() {
        return Err(AppError::UnsupportedFileType(format!(
            "'{}' has no file extension",
            request.display_name
        )));
    }

    Err(AppError::UnsupportedFileType(format!(".{extension}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(display_name: &str) -> IngestionRequest {
        IngestionRequest {
            tenant_id: "t1".to_string(),
            source_pointer: format!("raw/{display_name}"),
            display_name: display_name.to_string(),
        }
    }

    #[test]
    fn tabular_extensions_are_structured() {
        for name in ["sales.csv", "sheet.xlsx", "legacy.XLS", "feed.json", "cfg.xml"] {
            let classified = classify(&request(name)).expect("classification");
            assert_eq!(classified.kind, FileKind::Structured, "{name}");
        }
    }

    #[test]
    fn document_extensions_are_unstructured() {
        for name in ["report.pdf", "notes.md", "page.html", "slides.pptx", "talk.vtt"] {
            let classified = classify(&request(name)).expect("classification");
            assert_eq!(classified.kind, FileKind::Unstructured, "{name}");
        }
    }

    #[test]
    fn extension_is_lowercased() {
        let classified = classify(&request("REPORT.PDF")).expect("classification");
        assert_eq!(classified.extension, "pdf");
    }

    #[test]
    fn textual_mime_guess_rescues_unknown_extensions() {
        // .rs is in neither extension set but guesses as text/x-rust.
        let classified = classify(&request("main.rs")).expect("classification");
        assert_eq!(classified.kind, FileKind::Unstructured);
    }

    #[test]
    fn binary_extensions_are_rejected_with_the_extension_named() {
        let err = classify(&request("archive.zst")).expect_err("must reject");
        match err {
            AppError::UnsupportedFileType(message) => assert!(message.contains(".zst")),
            other => panic!("expected UnsupportedFileType, got {other}"),
        }
    }

    #[test]
    fn missing_extension_is_rejected() {
        assert!(classify(&request("README")).is_err());
    }
}
