//! Interview practice: coach-led mock interviews with spoken questions.
//!
//! Each interview keeps its transcript and scores in memory and owns one
//! speech conversation, so stopping or skipping playback in one interview never
//! touches another.

pub mod coach;
pub mod handlers;
pub mod models;
pub mod prompts;
pub mod scoring;
pub mod store;
