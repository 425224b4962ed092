//! Prompt construction and structured-response parsing.

use crate::analysis::types::PageAnalysis;
use crate::capture::StructuredText;

/// Character budget for the page text sample included in the prompt.
const TEXT_SAMPLE_CHARS: usize = 2_000;
const MAX_HEADINGS: usize = 10;

/// Appended when the model fails to return valid structured output.
const JSON_CORRECTION: &str =
    "Your previous reply was not valid JSON. Respond with a single valid JSON object only, \
     with exactly the keys described above. No prose, no markdown, no code fences.";

pub fn build_prompt(url: &str, text: &StructuredText, categories: &[String]) -> String {
    let mut prompt = String::with_capacity(TEXT_SAMPLE_CHARS + 1024);

    prompt.push_str(
        "You are analyzing a web page a user visited. You are given a screenshot of the page \
         and its extracted text. Respond with a single JSON object with these keys:\n\
         - \"description\": 2-3 sentences describing what the page is about\n\
         - \"visual_description\": 1-2 sentences describing the screenshot\n\
         - \"category\": one high-level content category\n\
         - \"subcategory\": a more specific category, or null\n\
         - \"brand\": the site or product brand, or null\n\
         - \"languages\": ISO 639-1 codes of languages detected on the page\n\
         - \"primary_language\": the dominant language code\n\n",
    );

    if !categories.is_empty() {
        prompt.push_str("Prefer one of these known categories when it fits: ");
        prompt.push_str(&categories.join(", "));
        prompt.push_str(".\n\n");
    }

    prompt.push_str(&format!("URL: {url}\n"));
    prompt.push_str(&format!("Title: {}\n", text.title));
    if let Some(meta) = &text.meta_description {
        prompt.push_str(&format!("Meta description: {meta}\n"));
    }

    if !text.headings.is_empty() {
        prompt.push_str("Headings: ");
        prompt.push_str(
            &text
                .headings
                .iter()
                .take(MAX_HEADINGS)
                .cloned()
                .collect::<Vec<_>>()
                .join(" | "),
        );
        prompt.push('\n');
    }

    prompt.push_str("Page text:\n");
    prompt.push_str(&truncate(&text.full_text, TEXT_SAMPLE_CHARS));
    prompt.push('\n');

    prompt
}

/// The retry prompt after malformed output: same instructions, same image,
/// plus an explicit valid-JSON-only correction.
pub fn corrective_prompt(base_prompt: &str) -> String {
    format!("{base_prompt}\n{JSON_CORRECTION}")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("no JSON object found in response")]
    NoJson,

    #[error("malformed analysis JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("analysis JSON missing required field: {0}")]
    MissingField(&'static str),
}

/// Parse the model's reply into a [`PageAnalysis`].
///
/// Models wrap JSON in fences or prose often enough that we cut out the
/// outermost object before deserializing.
pub fn parse_analysis(raw: &str) -> Result<PageAnalysis, ParseError> {
    let start = raw.find('{').ok_or(ParseError::NoJson)?;
    let end = raw.rfind('}').ok_or(ParseError::NoJson)?;
    if end < start {
        return Err(ParseError::NoJson);
    }

    let analysis: PageAnalysis = serde_json::from_str(&raw[start..=end])?;

    if analysis.description.trim().is_empty() {
        return Err(ParseError::MissingField("description"));
    }
    if analysis.category.trim().is_empty() {
        return Err(ParseError::MissingField("category"));
    }

    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_text() -> StructuredText {
        StructuredText {
            title: "Example Domain".to_string(),
            meta_description: Some("An example page".to_string()),
            headings: vec!["Example Domain".to_string()],
            paragraphs: vec![],
            links: vec![],
            full_text: "This domain is for use in illustrative examples.".to_string(),
            text_length: 48,
        }
    }

    const VALID: &str = r#"{
        "description": "An example page used in documentation.",
        "visual_description": "Plain white page with a heading.",
        "category": "reference",
        "subcategory": null,
        "brand": null,
        "languages": ["en"],
        "primary_language": "en"
    }"#;

    #[test]
    fn test_parse_plain_json() {
        let analysis = parse_analysis(VALID).unwrap();
        assert_eq!(analysis.category, "reference");
        assert_eq!(analysis.primary_language, "en");
    }

    #[test]
    fn test_parse_fenced_json() {
        let fenced = format!("```json\n{VALID}\n```");
        let analysis = parse_analysis(&fenced).unwrap();
        assert_eq!(analysis.category, "reference");
    }

    #[test]
    fn test_parse_json_with_prose_around_it() {
        let chatty = format!("Sure! Here is the analysis:\n{VALID}\nHope this helps.");
        assert!(parse_analysis(&chatty).is_ok());
    }

    #[test]
    fn test_parse_rejects_prose_only() {
        assert!(matches!(
            parse_analysis("I cannot analyze this page."),
            Err(ParseError::NoJson)
        ));
    }

    #[test]
    fn test_parse_rejects_missing_category() {
        let raw = r#"{"description": "something", "category": ""}"#;
        assert!(matches!(
            parse_analysis(raw),
            Err(ParseError::MissingField("category"))
        ));
    }

    #[test]
    fn test_parse_rejects_truncated_json() {
        let raw = r#"{"description": "something", "cat"#;
        assert!(parse_analysis(raw).is_err());
    }

    #[test]
    fn test_prompt_includes_categories_and_text() {
        let prompt = build_prompt(
            "https://example.com",
            &sample_text(),
            &["news".to_string(), "reference".to_string()],
        );
        assert!(prompt.contains("news, reference"));
        assert!(prompt.contains("Example Domain"));
        assert!(prompt.contains("https://example.com"));
    }

    #[test]
    fn test_corrective_prompt_keeps_instructions() {
        let base = build_prompt("https://example.com", &sample_text(), &[]);
        let corrected = corrective_prompt(&base);
        assert!(corrected.starts_with(&base));
        assert!(corrected.contains("valid JSON"));
    }

    #[test]
    fn test_prompt_truncates_long_text() {
        let mut text = sample_text();
        text.full_text = "word ".repeat(2_000);
        let prompt = build_prompt("https://example.com", &text, &[]);
        assert!(prompt.len() < text.full_text.len());
    }
}
