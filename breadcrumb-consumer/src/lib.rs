pub mod config;
pub mod error;
pub mod kafka;
pub mod metrics;
pub mod pipeline;
pub mod signals;
pub mod source;
pub mod stats;
pub mod summary;
pub mod supervisor;
