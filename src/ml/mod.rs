pub mod features;
pub mod gbt;
pub mod model;
pub mod scaler;

pub use features::{FeatureBuilder, FeatureRow, FeatureSet};
pub use gbt::{GbtParams, GradientBoostedTrees, ModelError};
pub use model::{ModelArtifact, ModelTrainer, TrainerConfig, TrainingReport};
pub use scaler::MinMaxScaler;
