//! Package metadata: manifests, lockfiles and the installed package graph.

pub mod graph;
pub mod lockfile;
pub mod manifest;

pub use graph::{NodeId, PackageGraph, PackageNode};
pub use lockfile::{LockEntry, Lockfile};
pub use manifest::{Manifest, ManifestCache, Substitution};
