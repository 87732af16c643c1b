use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::document::DocumentType;

/// Field list the structuring stage should fill for one document type.
#[derive(Debug, Clone, Copy)]
pub struct RecordSchema {
    pub document_type: DocumentType,
    pub fields: &'static [&'static str],
}

const PASSPORT_FIELDS: &[&str] = &[
    "full_name",
    "passport_number",
    "nationality",
    "date_of_birth",
    "sex",
    "date_of_issue",
    "date_of_expiry",
    "place_of_issue",
];

const EMIRATES_ID_FIELDS: &[&str] = &[
    "full_name",
    "eid_number",
    "nationality",
    "date_of_birth",
    "date_of_expiry",
    "occupation",
];

const CERTIFICATE_FIELDS: &[&str] = &[
    "holder_name",
    "institution",
    "qualification",
    "date_of_issue",
];

const ATTESTATION_FIELDS: &[&str] = &[
    "attestation_number",
    "issuing_authority",
    "date_of_issue",
];

const EMPLOYEE_INFO_FIELDS: &[&str] = &[
    "full_name",
    "employer",
    "position",
    "salary",
    "start_date",
];

/// Free-text fallback used when the document type is unknown (or carries no
/// structured fields of its own).
const GENERIC_FIELDS: &[&str] = &["text"];

impl RecordSchema {
    /// Schema for a document type; unknown types get the generic schema.
    pub fn for_type(document_type: DocumentType) -> RecordSchema {
        let fields = match document_type {
            DocumentType::Passport => PASSPORT_FIELDS,
            DocumentType::EmiratesId => EMIRATES_ID_FIELDS,
            DocumentType::Certificate => CERTIFICATE_FIELDS,
            DocumentType::Attestation => ATTESTATION_FIELDS,
            DocumentType::EmployeeInfo => EMPLOYEE_INFO_FIELDS,
            DocumentType::Photo | DocumentType::Unknown => GENERIC_FIELDS,
        };
        RecordSchema { document_type, fields }
    }

    pub fn generic() -> RecordSchema {
        RecordSchema { document_type: DocumentType::Unknown, fields: GENERIC_FIELDS }
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains(&field)
    }

    pub fn is_generic(&self) -> bool {
        self.fields == GENERIC_FIELDS
    }
}

/// Field map extracted from a document's raw text, typed per schema.
/// A `BTreeMap` keeps serialization order deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredRecord {
    pub document_type: DocumentType,
    pub fields: BTreeMap<String, String>,
}

impl StructuredRecord {
    pub fn new(document_type: DocumentType) -> Self {
        Self { document_type, fields: BTreeMap::new() }
    }

    /// Build a record from arbitrary key/value output, keeping only fields
    /// the schema names and dropping empty values. The generic schema keeps
    /// everything under its single "text" field untouched.
    pub fn from_map(
        schema: &RecordSchema,
        raw: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        let mut record = Self::new(schema.document_type);
        for (key, value) in raw {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            if schema.contains(key.as_str()) {
                record.fields.insert(key, value.to_string());
            }
        }
        record
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_type_falls_back_to_generic() {
        let schema = RecordSchema::for_type(DocumentType::Unknown);
        assert!(schema.is_generic());
        assert_eq!(schema.fields, &["text"]);
    }

    #[test]
    fn passport_schema_names_expected_fields() {
        let schema = RecordSchema::for_type(DocumentType::Passport);
        assert!(schema.contains("passport_number"));
        assert!(schema.contains("date_of_expiry"));
        assert!(!schema.contains("eid_number"));
    }

    #[test]
    fn from_map_filters_to_schema() {
        let schema = RecordSchema::for_type(DocumentType::Passport);
        let record = StructuredRecord::from_map(
            &schema,
            vec![
                ("passport_number".to_string(), "Z5547821".to_string()),
                ("favorite_color".to_string(), "blue".to_string()),
                ("full_name".to_string(), "  ".to_string()),
            ],
        );
        assert_eq!(record.get("passport_number"), Some("Z5547821"));
        assert!(record.get("favorite_color").is_none());
        assert!(record.get("full_name").is_none());
        assert_eq!(record.document_type, DocumentType::Passport);
    }

    #[test]
    fn from_map_trims_values() {
        let schema = RecordSchema::for_type(DocumentType::EmiratesId);
        let record = StructuredRecord::from_map(
            &schema,
            vec![("eid_number".to_string(), " 784199169031715 ".to_string())],
        );
        assert_eq!(record.get("eid_number"), Some("784199169031715"));
    }

    #[test]
    fn record_serializes_fields_in_stable_order() {
        let mut record = StructuredRecord::new(DocumentType::Passport);
        record.insert("nationality", "IND");
        record.insert("full_name", "AMIT KUMAR");
        let json = serde_json::to_string(&record).unwrap();
        let name_pos = json.find("full_name").unwrap();
        let nat_pos = json.find("nationality").unwrap();
        assert!(name_pos < nat_pos);
    }
}
