//! Ingestion orchestration: poll cycles, conversion, retry and enrichment.

pub mod convert;
pub mod enrichment;
pub mod pipeline;
pub mod processor;

pub use convert::{summarize, truncate_content, MAX_CONTENT_CHARS};
pub use enrichment::{
    service_from_config, EnrichmentDispatcher, EnrichmentError, EnrichmentService,
    NoopEnrichment, WebhookEnrichment,
};
pub use pipeline::{
    CandidateOutcome, ConversionOutcome, CycleReport, Pipeline, PipelineSettings, SweepReport,
};
pub use processor::IngestionProcessor;
