//! ScriptDeck - Core Library
//!
//! Discovers scripts under a set of allowed roots and runs them as
//! supervised, cancellable sessions with bounded output.

pub mod config;
pub mod error;
pub mod interpreter;
pub mod manager;
pub mod metadata;
pub mod policy;
pub mod registry;
pub mod scanner;
pub mod session;
pub mod store;
pub mod tree;
pub mod types;
pub mod validator;

pub use config::*;
pub use error::*;
pub use manager::SessionManager;
pub use metadata::{CommentExtractor, MetadataExtractor, ScriptMetadata};
pub use policy::SecurityPolicy;
pub use registry::{filter_scripts, ScanReport, ScriptRegistry, SkippedRoot};
pub use scanner::DirectoryScanner;
pub use session::{
    ExecutionSession, OutputLine, OutputStream, SessionId, SessionSnapshot, SessionStatus,
    SessionSummary,
};
pub use store::SessionStore;
pub use tree::{DirectoryNode, NodeId, ScriptTree};
pub use types::*;
pub use validator::{PathKind, PathValidator};
