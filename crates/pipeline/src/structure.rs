//! Structuring adapter: turns raw OCR text into a typed field record, either
//! through a language-model endpoint or through regex salvage.

use std::time::Duration;

use async_trait::async_trait;
use docuflow_core::{DocumentType, RecordSchema, StageError, StructuredRecord, StructuringConfig};
use serde::{Deserialize, Serialize};

use crate::extract::{ensure_success, transport_error};

/// Abstraction over the text-to-record stage.
#[async_trait]
pub trait Structurer: Send + Sync {
    async fn structure(
        &self,
        text: &str,
        document_type: DocumentType,
    ) -> Result<StructuredRecord, StageError>;
}

#[async_trait]
impl<T: Structurer + ?Sized> Structurer for Box<T> {
    async fn structure(
        &self,
        text: &str,
        document_type: DocumentType,
    ) -> Result<StructuredRecord, StageError> {
        (**self).structure(text, document_type).await
    }
}

// ── Regex salvage ────────────────────────────────────────────────────────────

/// Pattern-based field extraction. Used directly by the mock backend and as a
/// fallback when the language-model stage fails after retries, so a document
/// with readable text never comes out of the pipeline completely empty.
pub mod salvage {
    use docuflow_core::{DocumentType, RecordSchema, StructuredRecord};
    use regex::Regex;
    use std::sync::OnceLock;

    macro_rules! re {
        ($name:ident, $pattern:literal) => {
            fn $name() -> &'static Regex {
                static RE: OnceLock<Regex> = OnceLock::new();
                RE.get_or_init(|| Regex::new($pattern).expect("hardcoded pattern"))
            }
        };
    }

    re!(passport_number_re, r"\b([A-Z]\d{7,8})\b");
    re!(eid_formatted_re, r"\b(784-\d{4}-\d{7}-\d)\b");
    re!(eid_digits_re, r"\b(784\d{12})\b");
    re!(date_re, r"\b(\d{1,2}[/.-]\d{1,2}[/.-]\d{4}|\d{4}-\d{2}-\d{2})\b");

    /// Value after a `Label: value` or `Label value` line, matched
    /// case-insensitively on the label.
    fn labeled_value(text: &str, label: &str) -> Option<String> {
        let label_lower = label.to_lowercase();
        for line in text.lines() {
            let lower = line.to_lowercase();
            let Some(pos) = lower.find(&label_lower) else {
                continue;
            };
            let Some(rest) = line.get(pos + label.len()..) else {
                continue;
            };
            let rest = rest.trim_start_matches([':', ' ', '\t']);
            let value = rest.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
        None
    }

    fn first_match(text: &str, re: &Regex) -> Option<String> {
        re.captures(text).map(|c| c[1].to_string())
    }

    /// Fill whatever schema fields the patterns can recover from `text`.
    pub fn extract(text: &str, document_type: DocumentType) -> StructuredRecord {
        let schema = RecordSchema::for_type(document_type);
        let mut record = StructuredRecord::new(document_type);

        if schema.is_generic() {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                record.insert("text", trimmed);
            }
            return record;
        }

        if schema.contains("passport_number") {
            if let Some(number) = first_match(text, passport_number_re()) {
                record.insert("passport_number", number);
            }
        }
        if schema.contains("eid_number") {
            let eid = first_match(text, eid_formatted_re()).or_else(|| {
                // Unformatted 15-digit form, rewritten to the canonical
                // 784-XXXX-XXXXXXX-X grouping.
                first_match(text, eid_digits_re()).map(|d| {
                    format!("{}-{}-{}-{}", &d[..3], &d[3..7], &d[7..14], &d[14..])
                })
            });
            if let Some(number) = eid {
                record.insert("eid_number", number);
            }
        }

        for (field, label) in [
            ("full_name", "name"),
            ("holder_name", "name"),
            ("nationality", "nationality"),
            ("occupation", "occupation"),
            ("employer", "employer"),
            ("position", "position"),
            ("institution", "institution"),
            ("qualification", "qualification"),
            ("issuing_authority", "authority"),
            ("attestation_number", "attestation no"),
            ("place_of_issue", "place of issue"),
            ("sex", "sex"),
        ] {
            if schema.contains(field) && record.get(field).is_none() {
                if let Some(value) = labeled_value(text, label) {
                    record.insert(field, value);
                }
            }
        }

        for (field, label) in [
            ("date_of_birth", "birth"),
            ("date_of_expiry", "expiry"),
            ("date_of_issue", "issue"),
            ("start_date", "start"),
        ] {
            if !schema.contains(field) {
                continue;
            }
            let dated_line = text
                .lines()
                .find(|line| line.to_lowercase().contains(label))
                .and_then(|line| first_match(line, date_re()));
            if let Some(date) = dated_line {
                record.insert(field, date);
            }
        }

        record
    }
}

// ── Mock backend ─────────────────────────────────────────────────────────────

/// Structuring without a language model: runs salvage directly.
pub struct MockStructurer;

#[async_trait]
impl Structurer for MockStructurer {
    async fn structure(
        &self,
        text: &str,
        document_type: DocumentType,
    ) -> Result<StructuredRecord, StageError> {
        Ok(salvage::extract(text, document_type))
    }
}

// ── HTTP backend ─────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Client for an OpenAI-compatible chat-completions endpoint. The model is
/// prompted to answer with a flat JSON object holding the schema's fields.
pub struct HttpStructuringClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl HttpStructuringClient {
    pub fn new(config: &StructuringConfig) -> Result<Self, StageError> {
        let endpoint = config.endpoint.clone().ok_or_else(|| {
            StageError::ModelUnavailable("no structuring endpoint configured".into())
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StageError::ModelUnavailable(format!("http client: {e}")))?;
        Ok(Self {
            http,
            endpoint,
            api_key: config.api_key.clone(),
            model: config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }
}

fn build_prompt(schema: &RecordSchema) -> String {
    format!(
        "Extract the following fields from the OCR text of a {} document: {}. \
         Answer with a single flat JSON object using exactly those keys. \
         Use an empty string for any field not present in the text. \
         Do not invent values.",
        schema.document_type,
        schema.fields.join(", ")
    )
}

/// Parse the model's reply into a field map. Tolerates a fenced code block
/// around the JSON and non-string scalar values.
fn parse_field_object(content: &str) -> Result<Vec<(String, String)>, StageError> {
    let trimmed = content.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_start())
        .unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("```").map(str::trim_end).unwrap_or(trimmed);

    let value: serde_json::Value = serde_json::from_str(trimmed)
        .map_err(|e| StageError::InvalidInput(format!("model reply is not JSON: {e}")))?;
    let serde_json::Value::Object(map) = value else {
        return Err(StageError::InvalidInput(
            "model reply is not a JSON object".into(),
        ));
    };

    Ok(map
        .into_iter()
        .filter_map(|(key, value)| match value {
            serde_json::Value::String(s) => Some((key, s)),
            serde_json::Value::Number(n) => Some((key, n.to_string())),
            serde_json::Value::Bool(b) => Some((key, b.to_string())),
            _ => None,
        })
        .collect())
}

#[async_trait]
impl Structurer for HttpStructuringClient {
    async fn structure(
        &self,
        text: &str,
        document_type: DocumentType,
    ) -> Result<StructuredRecord, StageError> {
        let schema = RecordSchema::for_type(document_type);
        let prompt = build_prompt(&schema);
        let payload = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage { role: "system", content: &prompt },
                ChatMessage { role: "user", content: text },
            ],
            temperature: 0.0,
        };

        let mut request = self.http.post(&self.endpoint).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(transport_error)?;
        let response = ensure_success(response).await?;
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| StageError::InvalidInput(format!("malformed completion: {e}")))?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| StageError::InvalidInput("completion has no choices".into()))?;

        let fields = parse_field_object(content)?;
        Ok(StructuredRecord::from_map(&schema, fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSPORT_TEXT: &str = "\
REPUBLIC OF INDIA
Passport No: Z5547821
Name: AMIT KUMAR
Nationality: INDIAN
Date of Birth: 14/03/1988
Date of Issue: 02/01/2019
Date of Expiry: 01/01/2029";

    #[test]
    fn salvage_recovers_passport_fields() {
        let record = salvage::extract(PASSPORT_TEXT, DocumentType::Passport);
        assert_eq!(record.get("passport_number"), Some("Z5547821"));
        assert_eq!(record.get("date_of_birth"), Some("14/03/1988"));
        assert_eq!(record.get("date_of_expiry"), Some("01/01/2029"));
        assert_eq!(record.get("nationality"), Some("INDIAN"));
    }

    #[test]
    fn salvage_normalizes_unformatted_eid() {
        let record = salvage::extract(
            "ID Number 784199169031715\nName: SARA AHMED",
            DocumentType::EmiratesId,
        );
        assert_eq!(record.get("eid_number"), Some("784-1991-6903171-5"));
    }

    #[test]
    fn salvage_prefers_formatted_eid() {
        let record = salvage::extract("784-1991-6903171-5", DocumentType::EmiratesId);
        assert_eq!(record.get("eid_number"), Some("784-1991-6903171-5"));
    }

    #[test]
    fn salvage_unknown_type_keeps_full_text() {
        let record = salvage::extract("  some scanned text  ", DocumentType::Unknown);
        assert_eq!(record.get("text"), Some("some scanned text"));
        assert_eq!(record.fields.len(), 1);
    }

    #[test]
    fn salvage_empty_text_yields_empty_record() {
        assert!(salvage::extract("   ", DocumentType::Unknown).is_empty());
        assert!(salvage::extract("", DocumentType::Passport).is_empty());
    }

    #[tokio::test]
    async fn mock_structurer_delegates_to_salvage() {
        let record = MockStructurer
            .structure(PASSPORT_TEXT, DocumentType::Passport)
            .await
            .unwrap();
        assert_eq!(record.get("passport_number"), Some("Z5547821"));
    }

    #[test]
    fn prompt_names_every_schema_field() {
        let schema = RecordSchema::for_type(DocumentType::EmiratesId);
        let prompt = build_prompt(&schema);
        for field in schema.fields {
            assert!(prompt.contains(field), "missing {field}");
        }
        assert!(prompt.contains("emirates_id"));
    }

    #[test]
    fn parse_accepts_plain_object() {
        let fields = parse_field_object(r#"{"full_name": "AMIT KUMAR", "sex": "M"}"#).unwrap();
        assert!(fields.contains(&("full_name".into(), "AMIT KUMAR".into())));
    }

    #[test]
    fn parse_strips_code_fence() {
        let fields =
            parse_field_object("```json\n{\"passport_number\": \"Z5547821\"}\n```").unwrap();
        assert_eq!(fields, vec![("passport_number".into(), "Z5547821".into())]);
    }

    #[test]
    fn parse_rejects_non_object_reply() {
        assert!(matches!(
            parse_field_object("I could not find any fields."),
            Err(StageError::InvalidInput(_))
        ));
        assert!(matches!(
            parse_field_object("[1, 2, 3]"),
            Err(StageError::InvalidInput(_))
        ));
    }

    #[test]
    fn client_requires_endpoint() {
        assert!(matches!(
            HttpStructuringClient::new(&StructuringConfig::default()),
            Err(StageError::ModelUnavailable(_))
        ));
    }
}
