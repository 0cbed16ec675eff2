//! Versioned on-disk artifact bundle
//!
//! A bundle is a directory holding four independently serialized JSON pieces
//! and a `manifest.json` that records the format version, the fused column
//! layout and a SHA-256 digest of every piece. Loading checks the format
//! version and that every piece is present, then parses the pieces and checks
//! that their block widths agree, and only then compares digests. A piece
//! copied in from another bundle therefore reports `DimensionMismatch` when
//! its width differs, and a digest mismatch otherwise.

use crate::error::{AppError, Result};
use crate::ml::classifier::{Classifier, RandomForest};
use crate::ml::encoders::{CategoricalEncoder, NumericScaler};
use crate::ml::features::{FeatureExtractor, FeatureLayout};
use crate::ml::models::ModelMetadata;
use crate::ml::text::TextVectorizer;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use strum::{Display, EnumIter, IntoEnumIterator};
use tracing::{debug, info};
use uuid::Uuid;

/// Bumped whenever a piece's schema changes
pub const FORMAT_VERSION: u32 = 1;

pub const MANIFEST_FILE: &str = "manifest.json";

/// The four serialized pieces of a bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum BundlePiece {
    Encoder,
    Vectorizer,
    Scaler,
    Model,
}

impl BundlePiece {
    pub fn file_name(self) -> &'static str {
        match self {
            BundlePiece::Encoder => "encoder.json",
            BundlePiece::Vectorizer => "vectorizer.json",
            BundlePiece::Scaler => "scaler.json",
            BundlePiece::Model => "model.json",
        }
    }
}

/// Fitted forest together with the layout it was trained against
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub forest: RandomForest,
    pub layout: FeatureLayout,
    pub metadata: ModelMetadata,
}

impl ModelArtifact {
    /// Forest input width must equal the layout it claims
    pub fn validate(&self) -> Result<()> {
        self.layout.validate()?;
        self.forest.validate()?;
        if self.forest.n_features() != self.layout.total_width() {
            return Err(AppError::dimension_mismatch(
                "model input",
                self.layout.total_width(),
                self.forest.n_features(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub format_version: u32,
    pub bundle_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub layout: FeatureLayout,
    /// File name -> hex SHA-256
    pub digests: BTreeMap<String, String>,
}

/// Lowercase hex SHA-256 of a byte slice
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Matched encoder, vectorizer, scaler and model
#[derive(Debug, Clone)]
pub struct ArtifactBundle {
    pub manifest: BundleManifest,
    pub encoder: CategoricalEncoder,
    pub vectorizer: TextVectorizer,
    pub scaler: NumericScaler,
    pub model: ModelArtifact,
}

impl ArtifactBundle {
    /// Package a freshly trained extractor and model under a new bundle id
    pub fn new(extractor: &FeatureExtractor, model: ModelArtifact) -> Result<Self> {
        extractor.layout().ensure_matches(&model.layout, "model layout")?;

        let bundle = Self {
            manifest: BundleManifest {
                format_version: FORMAT_VERSION,
                bundle_id: Uuid::new_v4(),
                created_at: Utc::now(),
                layout: extractor.layout().clone(),
                digests: BTreeMap::new(),
            },
            encoder: extractor.encoder().clone(),
            vectorizer: extractor.vectorizer().clone(),
            scaler: extractor.scaler().clone(),
            model,
        };
        bundle.validate()?;
        Ok(bundle)
    }

    pub fn bundle_id(&self) -> Uuid {
        self.manifest.bundle_id
    }

    /// Rebuild the feature extractor from the stored pieces
    pub fn extractor(&self) -> Result<FeatureExtractor> {
        FeatureExtractor::from_parts(
            self.encoder.clone(),
            self.vectorizer.clone(),
            self.scaler.clone(),
        )
    }

    /// Width consistency across every piece
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        let extractor = self.extractor()?;
        let actual = extractor.layout();

        self.manifest.layout.ensure_matches(actual, "bundle pieces")?;
        self.model.layout.ensure_matches(actual, "model input")?;
        Ok(())
    }

    fn piece_bytes(&self, piece: BundlePiece) -> Result<Vec<u8>> {
        let bytes = match piece {
            BundlePiece::Encoder => serde_json::to_vec(&self.encoder)?,
            BundlePiece::Vectorizer => serde_json::to_vec(&self.vectorizer)?,
            BundlePiece::Scaler => serde_json::to_vec(&self.scaler)?,
            BundlePiece::Model => serde_json::to_vec(&self.model)?,
        };
        Ok(bytes)
    }

    /// Write every piece, then the manifest
    pub fn save(&mut self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;

        let mut digests = BTreeMap::new();
        for piece in BundlePiece::iter() {
            let bytes = self.piece_bytes(piece)?;
            digests.insert(piece.file_name().to_string(), sha256_hex(&bytes));
            fs::write(dir.join(piece.file_name()), &bytes)?;
        }
        self.manifest.digests = digests;

        let manifest = serde_json::to_vec_pretty(&self.manifest)?;
        fs::write(dir.join(MANIFEST_FILE), manifest)?;

        info!(
            bundle_id = %self.manifest.bundle_id,
            path = %dir.display(),
            "Saved artifact bundle"
        );
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(AppError::Artifact(format!(
                "no manifest at {}",
                manifest_path.display()
            )));
        }
        let manifest: BundleManifest = serde_json::from_slice(&fs::read(&manifest_path)?)?;

        if manifest.format_version != FORMAT_VERSION {
            return Err(AppError::Artifact(format!(
                "unsupported bundle format version {} (expected {})",
                manifest.format_version, FORMAT_VERSION
            )));
        }

        let mut raw: BTreeMap<&'static str, Vec<u8>> = BTreeMap::new();
        for piece in BundlePiece::iter() {
            let path = dir.join(piece.file_name());
            if !path.exists() || !manifest.digests.contains_key(piece.file_name()) {
                return Err(AppError::Artifact(format!(
                    "bundle is missing the {} piece",
                    piece
                )));
            }
            raw.insert(piece.file_name(), fs::read(path)?);
        }

        let tampered = raw
            .iter()
            .find(|(name, bytes)| sha256_hex(bytes) != manifest.digests[**name])
            .map(|(name, _)| *name);
        let digest_mismatch =
            |name: &str| AppError::Artifact(format!("digest mismatch for {}", name));

        let parsed = (|| -> Result<Self> {
            Ok(Self {
                encoder: parse_piece(&raw, BundlePiece::Encoder)?,
                vectorizer: parse_piece(&raw, BundlePiece::Vectorizer)?,
                scaler: parse_piece(&raw, BundlePiece::Scaler)?,
                model: parse_piece(&raw, BundlePiece::Model)?,
                manifest,
            })
        })();

        let bundle = match parsed {
            Ok(bundle) => bundle,
            Err(e) => return Err(tampered.map_or(e, digest_mismatch)),
        };

        match (bundle.validate(), tampered) {
            (Err(e @ AppError::DimensionMismatch { .. }), _) => return Err(e),
            (_, Some(name)) => return Err(digest_mismatch(name)),
            (Err(e), None) => return Err(e),
            (Ok(()), None) => {}
        }

        info!(
            bundle_id = %bundle.manifest.bundle_id,
            n_features = bundle.manifest.layout.total_width(),
            "Loaded artifact bundle"
        );
        Ok(bundle)
    }
}

fn parse_piece<T: DeserializeOwned>(
    raw: &BTreeMap<&'static str, Vec<u8>>,
    piece: BundlePiece,
) -> Result<T> {
    let bytes = raw
        .get(piece.file_name())
        .ok_or_else(|| AppError::Artifact(format!("bundle is missing the {} piece", piece)))?;
    debug!(piece = %piece, bytes = bytes.len(), "Parsing bundle piece");
    serde_json::from_slice(bytes).map_err(|e| {
        AppError::Serialization(format!("{}: {}", piece.file_name(), e))
    })
}
