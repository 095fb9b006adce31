//! Core engine for dylink: builds a shared library from generated sources by
//! running an external toolchain in parallel shell sessions.
//!
//! This crate provides:
//! - Recipes describing the toolchain commands and sources
//! - Persistent worker shells with per-command exit status capture
//! - Round-robin partitioning of sources across workers
//! - The parallel compile stage and the link stage
//!
//! # Architecture
//!
//! ```text
//! Recipe ──► partition ──► WorkerTask 0 ──► ShellSession 0 ─┐
//!                    │                                      │
//!                    └───► WorkerTask N ──► ShellSession N ─┼──► check ──► link ──► <target><ext>
//!                                                           │
//!                               retcode_cpu<N>.txt ◄────────┘
//! ```

pub mod artifacts;
pub mod builder;
pub mod compile;
pub mod config;
pub mod error;
pub mod link;
pub mod partition;
pub mod platform;
pub mod recipe;
pub mod session;

pub use builder::{SharedLibraryBuilder, create_shared};
pub use compile::compile_objects;
pub use config::BuildConfig;
pub use error::{Error, Result, Stage};
pub use link::link_library;
pub use partition::{WorkerTask, partition};
pub use platform::{Shell, ShellFlavor};
pub use recipe::{Recipe, SourceFile, TemplateRecipe};
pub use session::{SessionResult, SessionSpec, ShellSession};
