//! DocSage Core: error taxonomy, engine configuration, tracing bootstrap.

pub mod config;
pub mod error;
pub mod telemetry;

pub use config::{
    AnalysisConfig, ChunkingConfig, ContextConfig, DataPaths, EngineConfig, ExtractionConfig,
    GenerationConfig, IndexConfig, Metric, RetrievalConfig, RetryPolicy,
};
pub use error::{Error, Result};
