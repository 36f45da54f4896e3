mod builder;
mod cv;
mod metrics;
mod model_trainer;

pub use builder::{ForecastTrainer, TrainerBuilder};
pub use cv::{Fold, FoldReport, TimeSeriesSplit, cross_validate};
pub use metrics::{Metrics, mae, rmse};
pub use model_trainer::{EarlyStopping, EpochRecord, ModelTrainer};
