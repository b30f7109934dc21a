//! Shared session state for AI-assisted coding: a document model, pure
//! mutators, a deterministic merge, LLM-backed compression with a heuristic
//! fallback, and a single-writer live update loop.

pub mod compress;
pub mod config;
pub mod git;
pub mod live;
pub mod llm;
pub mod merge;
pub mod mutate;
pub mod prompt;
pub mod server;
pub mod session;
pub mod store;
pub mod validate;
pub mod watch;

pub use compress::{compress, Compressor};
pub use config::Config;
pub use live::{ContextEvent, LiveContextManager, LiveHandle, SessionPatch, SessionSink};
pub use merge::{merge, MergeError};
pub use session::{create_empty_session, SessionDocument};
pub use validate::{validate, validate_value, ValidationError, ValidationReport};
