//! # dualprompt
//!
//! Co-evolve a system prompt and the critique prompt that grades it.
//!
//! ## Usage
//!
//! ```bash
//! dualprompt run [--task task.txt] [--target 95] [--max-iterations 15]
//! dualprompt check [--ping]
//! dualprompt simulate [--scores 45,72,91] [--meta-scores 78,85]
//! ```
//!
//! ## Modules
//!
//! - `config` - TOML configuration with defaults, validation and CLI overrides
//! - `error` - Error kinds shared across the crate
//! - `optimizer` - The dual optimization loop, its state and its report
//! - `providers` - Collaborator traits, the Anthropic client and a scripted stand-in
//! - `setup` - Readiness checks before a real run
//! - `storage` - Input files and run artifacts on disk
//! - `testing` - Fixtures shared by unit and integration tests
pub mod config;
pub mod error;
pub mod optimizer;
pub mod providers;
pub mod setup;
pub mod storage;

pub mod testing;

pub use error::{Error, Result};
