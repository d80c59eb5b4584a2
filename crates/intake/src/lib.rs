pub mod config;
pub mod db;
pub mod email;
pub mod error;
pub mod ingest;
pub mod model;
pub mod repository;
pub mod sanitize;
pub mod secrets;
pub mod shutdown;
pub mod telemetry;

pub use config::{load_config, load_config_from_str, Config};
pub use db::Database;
pub use email::{EmailError, SearchMode};
pub use error::{ConfigError, IntakeError, Result};
pub use ingest::{CycleReport, IngestionProcessor, Pipeline};
pub use model::{Attachment, ContentRecord, ErrorCode, InboundMessage, MessageStats, MessageStatus};
pub use repository::{ContentRepository, MessageRepository};
pub use secrets::SecretError;
