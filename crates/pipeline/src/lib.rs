pub mod classifier;
pub mod detector;
pub mod extract;
pub mod orchestrator;
pub mod preprocess;
pub mod retry;
pub mod structure;
pub mod watch;

pub use classifier::{DocumentClassifier, MockClassifier};
pub use detector::{MockDetector, RegionDetector};
pub use extract::{HttpOcrClient, MockTextExtractor, TextExtractor};
pub use orchestrator::{CancelToken, DocumentPipeline, PipelineError, ProgressEvent};
pub use preprocess::PreprocessError;
pub use retry::RetryPolicy;
pub use structure::{HttpStructuringClient, MockStructurer, Structurer};
pub use watch::{is_image_path, spawn_intake_watcher};
