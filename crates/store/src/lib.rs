pub mod store;

pub use store::{ResultStore, StoreError, OUTCOME_FILE, OCR_TEXT_FILE, REGION_IMAGE_FILE, SUMMARY_FILE};
