//! Dependency discovery for CommonJS sources.

mod scan;

pub use scan::{scan_requires, MINIFIED_LINE_LENGTH};
