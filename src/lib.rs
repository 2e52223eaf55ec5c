pub mod config;
pub mod engine;
pub mod errors;
pub mod hash;
pub mod queue;
pub mod storage;
pub mod subtitle;
pub mod transcode;
