//! # tutorflow-tutorial
//!
//! Generates a beginner tutorial for a local codebase on top of
//! `tutorflow-core`: fetch the sources, ask a reasoning service for the core
//! abstractions, how they relate and in which order to teach them, write one
//! chapter per abstraction and emit the result as Markdown.
//!
//! Every external effect goes through a trait in [`collab`], so the flow
//! built by [`pipeline::create_tutorial_flow`] runs unchanged against test
//! doubles.

pub mod collab;
pub mod config;
pub mod error;
pub mod logging;
pub mod nodes;
pub mod pipeline;

pub use config::TutorialConfig;
pub use error::{Result, TutorialError};
pub use pipeline::{Collaborators, create_tutorial_flow};
