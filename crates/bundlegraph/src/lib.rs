//! Asset pipeline graph engine.
//!
//! A graph of typed nodes (load, filter, import settings, modify, group,
//! build prefabs, configure bundles, build bundles, export) is validated,
//! ordered, set up and then run once per build target group.

pub mod asset;
pub mod cache;
pub mod diagnostics;
pub mod errors;
pub mod events;
pub mod executor;
pub mod filesystem;
pub mod graph;
pub mod layout;
pub mod lint;
pub mod operations;
pub mod parse;
pub mod runtime;
pub mod scripts;
pub mod target;
pub mod testing;

pub use asset::*;
pub use cache::*;
pub use diagnostics::*;
pub use errors::*;
pub use events::*;
pub use executor::*;
pub use filesystem::*;
pub use graph::*;
pub use layout::*;
pub use lint::*;
pub use operations::{
    AssetFailure, AssetImporter, CacheHints, NodeOperation, NodeOutput, NoopImporter,
    OperationEnv, OperationRegistry, OperationRequest, SharedAssetImporter, SharedNodeOperation,
    core_registry,
};
pub use parse::*;
pub use runtime::*;
pub use scripts::*;
pub use target::*;

pub use bundlegraph_cache::{CacheStore, FsCacheStore, MemoryCacheStore};
