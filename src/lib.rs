//! FlowEdit - Prompt-Driven Video Editing Job Service
//!
//! Accepts a video and a text prompt, runs an external inversion + editing
//! pipeline for it in the background, and lets clients poll for the outcome
//! and download the edited video.

pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod intake;
pub mod job;
pub mod media;
pub mod pipeline;
pub mod server;
