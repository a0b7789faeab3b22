//! Module path resolution against a virtual filesystem.
//!
//! The resolver knows nothing about the package graph; it only answers
//! "which file does this specifier name, seen from this file".

mod node;

pub use node::{node_modules_paths, PathResolver, ResolveOptions};
