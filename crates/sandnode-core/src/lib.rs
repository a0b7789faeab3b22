#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Package resolution and CommonJS module execution over a virtual
//! filesystem, fetching missing package files from a CDN.

pub mod builtins;
pub mod config;
pub mod convert;
pub mod error;
pub mod eval;
pub mod fetch;
pub mod imports;
pub mod loader;
pub mod pkg;
pub mod registry;
pub mod resolver;
pub mod runtime;
pub mod version;
pub mod vfs;

pub use config::{Config, RuntimeConfig};
pub use convert::{ModuleKind, ModuleReference};
pub use error::{Error, Result};
pub use eval::{Binding, EvalError, Evaluator, JsEngine, ModuleCode, ModuleJob};
pub use fetch::{FetchError, Fetcher, HttpFetcher, OfflineFetcher};
pub use loader::TranspilerHook;
pub use pkg::{Manifest, NodeId, PackageGraph, PackageNode};
pub use resolver::{PathResolver, ResolveOptions};
pub use runtime::{ModuleExports, Runtime, RuntimeBuilder};
pub use version::VERSION;
pub use vfs::{DiskFs, FileMap, MemoryFs, VirtualFs};
