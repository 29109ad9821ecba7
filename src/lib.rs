pub mod batcher;
pub mod config;
pub mod extractor;
pub mod fetcher;
pub mod orchestrator;
pub mod store;
pub mod telemetry;
pub mod uploader;
