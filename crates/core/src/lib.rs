//! zen-core: Core types for the zen build engine.
//!
//! This crate provides the fundamental types used throughout zen:
//! - `Fqn`: fully qualified target names (`//project/package:name:script`)
//! - `Target` / `ScriptSpec`: declared units of work and their lifecycles
//! - `Environment`: named deployment environments
//! - hashing, globbing and `{KEY}` interpolation utilities
//!
//! The types are frontend-agnostic. The `zen-engine` crate handles package
//! files, caching and graph execution on top of them.

pub mod environments;
pub mod fqn;
pub mod fs;
pub mod hash;
pub mod interpolate;
pub mod target;

pub use environments::Environment;
pub use fqn::{Fqn, FqnError};
pub use interpolate::InterpolateError;
pub use target::{RuntimeContext, ScriptSpec, StepError, Target};

/// Script every target implicitly revolves around. Non-`build` scripts derive
/// their working directory and sources from the build step's outputs.
pub const BUILD_SCRIPT: &str = "build";

/// Wildcard target name meaning "every target in this package".
pub const ALL_TARGETS: &str = "all";
