//! Lumin daemon library.
//!
//! GitHub push ingestion for static-site projects: a verified push webhook
//! becomes a fresh file tree for the linked project, with progress reported
//! back to GitHub as a check run.

pub mod archive;
pub mod config;
pub mod events;
pub mod github;
pub mod history;
pub mod http_api;
pub mod materialize;
pub mod metrics;
pub mod pipeline;
pub mod reporter;
pub mod signature;
pub mod store;

#[cfg(test)]
mod testing;

pub use pipeline::{
    DeliveryOutcome, IgnoreReason, IngestionPipeline, PipelineError, PipelineParts,
    WebhookDelivery,
};
