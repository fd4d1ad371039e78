//! Bytecode-level faking engine for JVM class files.
//!
//! The crate parses class files into a structured event stream, rewrites method bodies so that
//! calls are redirected to registered substitute implementations, regenerates verifier-clean
//! bytecode (stack limits, jump encodings, and stack map frames are recomputed from scratch),
//! and routes the redirected calls at runtime through a loader-agnostic dispatch bridge with
//! invocation counting and "proceed into the original" support.
//!
//! The main layers, bottom up:
//!
//!   * [`classfile`]: the binary format model, with an event-based [`reader`] and [`writer`]
//!     connected by the [`ClassStage`] pipeline interface
//!   * [`flow`]: the basic-block [`CodeBuilder`] behind every rewritten method body
//!   * [`rewrite`]: substitute matching and the redirect-emitting [`FakeClassModifier`]
//!   * [`runtime`]: the state registry, dispatch bridge, and redefinition engine, owned
//!     together by an [`InstrumentationContext`]
//!
//! [`reader`]: classfile::reader::ClassReader
//! [`writer`]: classfile::writer::ClassWriter
//! [`ClassStage`]: classfile::reader::ClassStage
//! [`CodeBuilder`]: flow::CodeBuilder
//! [`FakeClassModifier`]: rewrite::FakeClassModifier
//! [`InstrumentationContext`]: runtime::InstrumentationContext

pub mod classfile;
pub mod classpath;
pub mod descriptor;
pub mod errors;
pub mod flow;
pub mod rewrite;
pub mod runtime;
pub mod util;

pub use errors::Error;
