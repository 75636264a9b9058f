//! Printf breakpoint debugging for OpenCL kernels.
//!
//! Given a kernel source file, a 1-based breakpoint line, and a set of
//! global thread ids, [`DebugSession`] rewrites the kernel so each
//! requested thread prints every variable in scope at that line, runs
//! the host application, and decodes the captured text back into typed
//! [`Variable`]s. The kernel file is restored afterwards.

pub mod codegen;
pub mod decl;
pub mod diagnostic;
pub mod error;
pub mod scope;
pub mod session;
pub mod syntax;
pub mod types;
pub mod value;

pub use codegen::{instrument, Instrumented, SYNC_MARKER};
pub use decl::{AddressSpace, FieldDecl, Shape, StructDecl, VarDecl};
pub use error::DebugError;
pub use scope::ScopeResolver;
pub use session::DebugSession;
pub use types::{ScalarType, TypeCatalog, VectorType};
pub use value::{Value, Variable};
