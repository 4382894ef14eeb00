pub mod alerts;
pub mod clock;
pub mod config;
pub mod notify;
pub mod pipeline;
pub mod scoring;
pub mod storage;
