use bytes::Bytes;
use common::error::AppError;
use dom_smoothie::{Article, Readability, TextMode};

/// Extract plain text from raw document bytes, locally. Serves the
/// local-extraction fallback strategy and summarizer excerpts; the managed
/// vector service does its own extraction for staged and direct uploads.
pub async fn extract_text(bytes: Bytes, extension: &str) -> Result<String, AppError> {
    match extension {
        "txt" | "md" | "markdown" | "py" | "srt" | "vtt" => {
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        "html" | "htm" => extract_html_text(&bytes),
        "pdf" => extract_pdf_text(bytes).await,
        other => Err(AppError::Processing(format!(
            "no local text extraction for '.{other}' content"
        ))),
    }
}

fn extract_html_text(bytes: &Bytes) -> Result<String, AppError> {
    let raw_content = String::from_utf8_lossy(bytes).into_owned();
    let config = dom_smoothie::Config {
        text_mode: TextMode::Markdown,
        ..Default::default()
    };
    let mut readability = Readability::new(raw_content, None, Some(config))
        .map_err(|err| AppError::Processing(format!("Failed to parse HTML: {err}")))?;
    let article: Article = readability
        .parse()
        .map_err(|err| AppError::Processing(format!("Failed to extract readable text: {err}")))?;

    Ok(article.text_content.into())
}

/// Runs `pdf-extract` off the async executor; a missing or empty text layer
/// is an extraction failure (OCR is out of scope).
async fn extract_pdf_text(bytes: Bytes) -> Result<String, AppError> {
    let extraction = tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text_from_mem(&bytes).map(|s| s.trim().to_string())
    })
    .await?
    .map_err(|err| AppError::Processing(format!("Failed to extract text from PDF: {err}")))?;

    if extraction.is_empty() {
        return Err(AppError::Processing(
            "PDF appears to contain no text layer".into(),
        ));
    }

    Ok(extraction)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_text_extensions_decode_lossily() {
        let text = extract_text(Bytes::from_static(b"plain notes"), "txt")
            .await
            .expect("extraction");
        assert_eq!(text, "plain notes");

        let with_invalid = extract_text(Bytes::from(vec![0x68, 0x69, 0xFF]), "md")
            .await
            .expect("extraction");
        assert!(with_invalid.starts_with("hi"));
    }

    #[tokio::test]
    async fn html_extraction_strips_markup() {
        let paragraph = "Rotating crops improves soil health across seasons and \
            reduces pest pressure in most fields. Cover crops add organic matter \
            and protect against erosion during the winter months. Soil sampling \
            before planting guides fertilizer rates and avoids over-application. "
            .repeat(4);
        let html = format!(
            "<html><head><title>Field Notes</title></head><body><article>\
             <h1>Field Notes</h1><p>{paragraph}</p><p>{paragraph}</p>\
             </article></body></html>"
        );
        let text = extract_text(Bytes::from(html), "html")
            .await
            .expect("extraction");
        assert!(text.contains("Rotating crops"));
        assert!(!text.contains("<p>"));
    }

    #[tokio::test]
    async fn unknown_extension_is_an_extraction_failure() {
        let result = extract_text(Bytes::from_static(b"\x00\x01"), "docx").await;
        assert!(result.is_err());
    }
}
