//! Point feature extraction and ensemble yield prediction.
//!
//! A query point is resolved to the predictor raster stack and the zone that
//! contain it, sampled into a complete versioned feature map, and fed to a
//! statistical regressor and a mechanistic stress model whose outputs are
//! blended by the vegetation-index regime.

pub mod cache;
pub mod config;
pub mod ensemble;
pub mod extractor;
pub mod mechanistic;
pub mod model;
pub mod schema;
pub mod service;

pub use cache::{ModelCache, ModelStatus};
pub use config::{BlendWeights, CropConstants, EnsembleConfig, PredictionConfig};
pub use ensemble::{blend, BlendMode, EnsemblePrediction, PredictionEnsemble};
pub use extractor::{Extraction, FeatureExtractor, SeriesPoint, ZoneRef};
pub use mechanistic::{LimitingFactor, MechanisticModel, MechanisticOutcome};
pub use model::{ModelKind, RegressionTree, StatisticalModel, TabularRegressor, TreeNode};
pub use schema::{Feature, FeatureMap, FeatureMapBuilder, FeatureSchema, FeatureSource};
pub use service::{PointPrediction, PointQueryService, Provenance};
