pub mod backend;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod progress;
pub mod reduction;
pub mod remote;
pub mod sequence;
