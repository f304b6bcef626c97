pub mod config;
pub mod console;
pub mod error;
pub mod measurement;
pub mod pipeline;
pub mod reading;
pub mod risk;
pub mod signal;
pub mod source;
pub mod store;

pub use config::Config;
pub use error::{DecodeError, PipelineError, SourceError, StoreError};
pub use pipeline::{AcquisitionPipeline, PipelineEvent, PipelineSettings, Snapshot};
pub use reading::{NewReading, Reading, Status};
pub use risk::{FeatureVector, ModelVariant, RiskModel, RiskResult};
pub use signal::Command;
pub use source::{BleSource, HeartRateSource, SimulatedSource};
pub use store::{MemoryStore, ReadingStore, SqliteStore};
