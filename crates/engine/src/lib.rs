//! zen-engine: the core of the zen build engine.
//!
//! This crate wires the three tightly-coupled subsystems of the engine:
//! - target resolution and graph construction (`parser`, `engine::dag`)
//! - the content-addressed cache (`cache`)
//! - the bounded-parallel graph executor and step runner (`engine`)
//!
//! Package-file surface syntax is pluggable: anything that can turn a file
//! into a [`parser::frontend::BlockTable`] can feed the engine. Target block
//! types are open-ended through the [`parser::registry::TargetFactory`]
//! registry; the built-in `exec` factory is the reference implementation.

pub mod cache;
pub mod config;
pub mod engine;
pub mod parser;
pub mod targets;

#[cfg(test)]
pub(crate) mod testutil;

pub use cache::{CacheError, CacheManager, CacheRoots};
pub use config::{CliConfig, ConfigError, ProjectConfig};
pub use engine::{Engine, EngineContext, EngineError, GraphError, Project, RunFnMap, RunOptions};
pub use parser::frontend::{BlockTable, Frontend, JsonFrontend};
pub use parser::registry::{TargetConfigContext, TargetFactory, TargetFactoryMap};
pub use parser::resolver::{ResolutionError, Resolver};
pub use parser::{PackageLoader, ParseError};
