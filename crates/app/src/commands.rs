//! Subcommand implementations: adapter wiring, batch runs and the watch loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use docuflow_core::{DocumentType, PipelineConfig, SourceDocument, StageError};
use docuflow_pipeline::{
    is_image_path, spawn_intake_watcher, CancelToken, DocumentClassifier, DocumentPipeline,
    HttpOcrClient, HttpStructuringClient, MockClassifier, MockDetector, MockStructurer,
    MockTextExtractor, ProgressEvent, RegionDetector, Structurer, TextExtractor,
};
use docuflow_store::ResultStore;
use tokio::sync::mpsc;

type BoxedPipeline = DocumentPipeline<
    Box<dyn RegionDetector>,
    Box<dyn DocumentClassifier>,
    Box<dyn TextExtractor>,
    Box<dyn Structurer>,
>;

#[cfg(feature = "onnx")]
fn label_set() -> Vec<String> {
    DocumentType::ALL
        .iter()
        .map(|t| t.dir_name().to_string())
        .collect()
}

fn build_detector(config: &PipelineConfig) -> Result<Box<dyn RegionDetector>, StageError> {
    #[cfg(feature = "onnx")]
    if let Some(path) = &config.detection.model_path {
        let detector =
            docuflow_pipeline::detector::onnx_backend::OnnxDetector::load(path, label_set())?;
        return Ok(Box::new(detector));
    }
    if config.detection.model_path.is_some() && !cfg!(feature = "onnx") {
        tracing::warn!("detection model configured but this build lacks onnx support");
    }
    tracing::warn!("no detection model available; treating each scan as one full-page document");
    Ok(Box::new(MockDetector::full_page()))
}

fn build_classifier(config: &PipelineConfig) -> Result<Box<dyn DocumentClassifier>, StageError> {
    #[cfg(feature = "onnx")]
    if let Some(path) = &config.classifier.model_path {
        let classifier =
            docuflow_pipeline::classifier::onnx_backend::OnnxClassifier::load(path, label_set())?;
        return Ok(Box::new(classifier));
    }
    if config.classifier.model_path.is_some() && !cfg!(feature = "onnx") {
        tracing::warn!("classification model configured but this build lacks onnx support");
    }
    tracing::warn!("no classification model available; documents will be filed as unknown");
    Ok(Box::new(MockClassifier::unknown()))
}

fn build_extractor(config: &PipelineConfig) -> Result<Box<dyn TextExtractor>, StageError> {
    if config.ocr.endpoint.is_some() {
        Ok(Box::new(HttpOcrClient::new(&config.ocr)?))
    } else {
        tracing::warn!("no OCR endpoint configured; text extraction will return nothing");
        Ok(Box::new(MockTextExtractor::new("")))
    }
}

fn build_structurer(config: &PipelineConfig) -> Result<Box<dyn Structurer>, StageError> {
    if config.structuring.endpoint.is_some() {
        Ok(Box::new(HttpStructuringClient::new(&config.structuring)?))
    } else {
        tracing::warn!("no structuring endpoint configured; falling back to pattern salvage");
        Ok(Box::new(MockStructurer))
    }
}

fn build_pipeline(config: &PipelineConfig) -> anyhow::Result<Arc<BoxedPipeline>> {
    let store = ResultStore::open(&config.output.root)
        .with_context(|| format!("cannot open result store at {}", config.output.root.display()))?;
    Ok(Arc::new(DocumentPipeline::new(
        build_detector(config)?,
        build_classifier(config)?,
        build_extractor(config)?,
        build_structurer(config)?,
        store,
        config,
    )))
}

/// Images in `dir`, sorted by name for a stable processing order.
fn discover_images(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("cannot read input directory {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() && is_image_path(&path) {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

pub async fn run_directory(config: &PipelineConfig, input: &Path) -> anyhow::Result<()> {
    let images = discover_images(input)?;
    if images.is_empty() {
        println!("no images found in {}", input.display());
        return Ok(());
    }
    let documents = images.into_iter().map(SourceDocument::new).collect();
    run_batch(config, documents).await
}

pub async fn process_files(
    config: &PipelineConfig,
    files: Vec<PathBuf>,
    hint: Option<DocumentType>,
) -> anyhow::Result<()> {
    if files.is_empty() {
        anyhow::bail!("no input files given");
    }
    let documents = files
        .into_iter()
        .map(|path| match hint {
            Some(hint) => SourceDocument::with_hint(path, hint),
            None => SourceDocument::new(path),
        })
        .collect();
    run_batch(config, documents).await
}

async fn run_batch(
    config: &PipelineConfig,
    documents: Vec<SourceDocument>,
) -> anyhow::Result<()> {
    let pipeline = build_pipeline(config)?;

    let cancel = CancelToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("cancellation requested; finishing in-flight documents");
            signal_cancel.cancel();
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::Started { source_path } => {
                    println!("processing {}", source_path.display());
                }
                ProgressEvent::Finished { document_id, status } => {
                    println!("  {document_id} -> {status}");
                }
            }
        }
    });

    let summary = pipeline.run_batch(documents, cancel, Some(tx)).await?;
    let _ = printer.await;
    println!("{summary}");
    println!("results written to {}", config.output.root.display());
    Ok(())
}

pub async fn watch_directory(config: &PipelineConfig, input: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(input)
        .with_context(|| format!("cannot create watch directory {}", input.display()))?;
    let pipeline = build_pipeline(config)?;

    let (tx, mut rx) = mpsc::channel(64);
    let _watcher = spawn_intake_watcher(input, tx)
        .with_context(|| format!("cannot watch {}", input.display()))?;
    let cancel = CancelToken::new();
    println!("watching {} (ctrl-c to stop)", input.display());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                break;
            }
            maybe_path = rx.recv() => {
                let Some(path) = maybe_path else { break };
                let outcome = pipeline
                    .process_document(&SourceDocument::new(&path), &cancel)
                    .await?;
                println!(
                    "{} -> {} ({})",
                    path.display(),
                    outcome.status,
                    outcome.document_type()
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_images_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.png"), b"x").unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("skip.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub.png")).unwrap();

        let images = discover_images(dir.path()).unwrap();
        let names: Vec<_> = images
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, ["a.jpg", "b.png"]);
    }

    #[test]
    fn default_config_builds_mock_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.output.root = dir.path().join("out");
        assert!(build_pipeline(&config).is_ok());
    }
}
