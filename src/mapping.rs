//! Mapping subsystem: schema model, spec lifecycle, deterministic compiler, previewer.
//!
//! `schema` describes external schemas, `spec` the mapping specifications and
//! their draft → validated → published lifecycle, `compiler` the pure
//! validation/compilation pass with its deterministic hash, and `preview` the
//! sample-record previewer layered on the compiler.

pub mod compiler;
pub mod preview;
pub mod schema;
pub mod spec;

pub use compiler::*;
pub use preview::*;
pub use schema::*;
pub use spec::*;
