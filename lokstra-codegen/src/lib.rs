//! # lokstra-codegen - annotation processor
//!
//! The build-time half of lokstra. Scans a Rust source tree for in-comment
//! annotations (`@Service`, `@EndpointService`, `@Inject`, `@Route`) and
//! emits, per folder, one registration file plus a top-level barrel that ties
//! every generated module together.
//!
//! Work is content-addressed: each folder keeps a JSON cache of file
//! checksums, so a rebuild over an unchanged tree is a no-op and produces
//! bit-identical output.
//!
//! ## Pipeline
//!
//! 1. [`annotation`] lexes comment annotations and attaches them to the
//!    declaration that follows.
//! 2. [`source`] harvests the small slice of type information generation
//!    needs: struct fields, `use` aliases, method signatures.
//! 3. [`scanner`] walks the tree, diffs folders against their caches, and
//!    drives a bounded worker pool.
//! 4. [`generate`] emits the per-folder file; [`barrel`] the root barrel.
//!
//! ```no_run
//! use lokstra_codegen::scanner::{run, ScanOptions};
//!
//! let report = run(&ScanOptions::new("src")).unwrap();
//! assert!(report.ok());
//! ```

pub mod annotation;
pub mod barrel;
pub mod cache;
mod error;
pub mod generate;
pub mod model;
pub mod scanner;
pub mod source;

pub use error::{GenError, Result};

/// Per-folder generated registration file.
pub const GENERATED_FILE_NAME: &str = "zz_generated.lokstra.rs";
/// Per-folder scan cache.
pub const CACHE_FILE_NAME: &str = "zz_cache.lokstra.json";
/// Root barrel file importing every generated module.
pub const BARREL_FILE_NAME: &str = "zz_registrations.lokstra.rs";
