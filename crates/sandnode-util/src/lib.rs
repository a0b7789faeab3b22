#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Shared utilities for sandnode.
//!
//! Pure helpers with no logging dependencies: `vpath` for virtual
//! filesystem paths and `fs` for host filesystem access.

pub mod fs;
pub mod vpath;
