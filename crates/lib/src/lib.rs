//! kiln-lib: incremental, content-addressed asset build engine.
//!
//! The crate turns asset descriptions into compiled, platform-specific content and
//! only recompiles what changed:
//! - `Command`: a deterministic unit of compilation work
//! - `BuildGraph`: the dependency DAG of commands for one request
//! - `CacheLayer`: fingerprints commands and decides reuse
//! - `ContentStore`: fingerprint-keyed persistent storage of compiled blobs
//! - `execute`: the scheduler walking the DAG with bounded parallelism
//! - `Engine`: ties compilers, store, cache and scheduler together

pub mod asset;
pub mod cache;
pub mod command;
pub mod compiler;
pub mod consts;
pub mod engine;
pub mod execute;
pub mod gc;
pub mod graph;
pub mod platform;
pub mod result;
pub mod store;
pub mod store_lock;
pub mod util;

pub use engine::{BuildRequest, Engine, EngineConfig, EngineError};
pub use result::{BuildResult, BuildStatus};
