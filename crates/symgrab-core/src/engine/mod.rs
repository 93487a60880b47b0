//! Download Engine - The heart of Symgrab
//!
//! This module implements the sequential symbol retrieval engine:
//! - Three-tier store probing (direct, compressed variant, file pointer)
//! - Chunked streaming with progress and speed telemetry
//! - Clean pause/resume/cancel with partial-failure cleanup

mod downloader;
mod probe;
mod session;
mod transfer;

pub use downloader::*;
