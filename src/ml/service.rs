use crate::config::Config;
use crate::error::{AppError, Result};
use crate::ml::models::{PipelineConfig, Prediction};
use crate::ml::pipeline::{InferencePipeline, PipelineHandle, Trainer, TrainingReport};
use crate::models::{ComplaintRecord, InferenceRequest, Priority};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};
use uuid::Uuid;

/// Priority prediction service
pub struct PriorityService {
    /// Training configuration
    config: Arc<RwLock<PipelineConfig>>,

    /// Where trained bundles are persisted and loaded from
    bundle_dir: Option<PathBuf>,

    /// Currently published pipeline
    handle: PipelineHandle,

    /// Report of the most recent training run
    last_report: Arc<RwLock<Option<TrainingReport>>>,

    /// Predictions answered since start
    predictions_served: Arc<AtomicU64>,
}

impl PriorityService {
    /// Create a service with no pipeline loaded
    pub fn new(config: PipelineConfig, bundle_dir: Option<PathBuf>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            bundle_dir,
            handle: PipelineHandle::new(),
            last_report: Arc::new(RwLock::new(None)),
            predictions_served: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Service persisting to the configured bundle directory
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.pipeline.clone(),
            Some(config.artifacts.bundle_dir.clone()),
        )
    }

    pub fn is_ready(&self) -> bool {
        self.handle.is_loaded()
    }

    /// Train on a blocking worker, persist the bundle, then publish it.
    ///
    /// The running pipeline keeps serving until the new one is ready; a
    /// failed run leaves it in place.
    pub async fn train(&self, records: Vec<ComplaintRecord>) -> Result<TrainingReport> {
        let config = self.config.read().await.clone();
        let bundle_dir = self.bundle_dir.clone();

        info!(records = records.len(), "Training priority model");

        let (pipeline, report) = tokio::task::spawn_blocking(move || {
            let (mut bundle, report) = Trainer::new(config)?.train(&records)?;
            if let Some(dir) = bundle_dir {
                bundle.save(&dir)?;
            }
            let pipeline = InferencePipeline::from_bundle(bundle)?;
            Ok::<_, AppError>((pipeline, report))
        })
        .await
        .map_err(|e| AppError::Internal(format!("training task failed: {}", e)))?
        .map_err(|e| {
            error!(error = %e, code = e.error_code(), "Training failed");
            e
        })?;

        self.handle.publish(pipeline);
        *self.last_report.write().await = Some(report.clone());

        info!(bundle_id = %report.bundle_id, "Training complete");
        Ok(report)
    }

    /// Load the bundle from the configured directory and publish it
    pub async fn load(&self) -> Result<Uuid> {
        let dir = self.bundle_dir.clone().ok_or_else(|| {
            AppError::Configuration("no bundle directory configured".to_string())
        })?;
        let handle = self.handle.clone();

        tokio::task::spawn_blocking(move || handle.reload_from(&dir))
            .await
            .map_err(|e| AppError::Internal(format!("bundle load task failed: {}", e)))?
    }

    pub fn predict(&self, request: &InferenceRequest) -> Result<Priority> {
        let pipeline = self.handle.current()?;
        let label = pipeline.predict_request(request)?;
        self.predictions_served.fetch_add(1, Ordering::Relaxed);
        Ok(label)
    }

    pub fn predict_detailed(&self, request: &InferenceRequest) -> Result<Prediction<Priority>> {
        let pipeline = self.handle.current()?;
        let record = ComplaintRecord::try_from(request)?;
        let prediction = pipeline.predict_detailed(&record);
        self.predictions_served.fetch_add(1, Ordering::Relaxed);
        Ok(prediction)
    }

    pub async fn last_report(&self) -> Option<TrainingReport> {
        self.last_report.read().await.clone()
    }

    /// Update the configuration used by the next training run
    pub async fn update_config(&self, new_config: PipelineConfig) -> Result<()> {
        validator::Validate::validate(&new_config)?;
        *self.config.write().await = new_config;
        info!("Pipeline configuration updated");
        Ok(())
    }

    /// Get service statistics
    pub fn get_stats(&self) -> PriorityServiceStats {
        let pipeline = self.handle.current().ok();
        PriorityServiceStats {
            is_ready: pipeline.is_some(),
            bundle_id: pipeline.as_ref().map(|p| p.bundle_id()),
            n_features: pipeline.as_ref().map(|p| p.layout().total_width()).unwrap_or(0),
            block_widths: pipeline
                .as_ref()
                .map(|p| p.layout().blocks.iter().map(|b| b.width).collect())
                .unwrap_or_default(),
            predictions_served: self.predictions_served.load(Ordering::Relaxed),
        }
    }
}

/// Service statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityServiceStats {
    pub is_ready: bool,
    pub bundle_id: Option<Uuid>,
    pub n_features: usize,
    /// Widths of the categorical, text and numeric blocks
    pub block_widths: Vec<usize>,
    pub predictions_served: u64,
}
