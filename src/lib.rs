//! Vellum - a pure Rust PDF object store
//!
//! This library is the storage and serialization core of a PDF-style
//! document: an indirect object table with number+generation identity,
//! cross-reference sections in both the plain text and compressed
//! stream encodings, object streams that pack small objects into
//! compressed containers, and a save protocol with full (Standard) and
//! append-only (Incremental) modes.
//!
//! # Modules
//!
//! - `object` - primitive object model (`Object`, `Name`, `ObjRef`)
//! - `document` - the aggregate root owning the object table
//! - `xref` / `xref_stream` - the two cross-reference encodings
//! - `objstm` - object-stream packing
//! - `writer` - save orchestration
//! - `reader` - loading files back into a document
//! - `config` - cross-reference mode and version gating
//!
//! # Example
//!
//! ```rust,ignore
//! use vellum::{Document, Object, SaveMode};
//!
//! let mut doc = Document::new();
//! let root = doc.add_object(Object::Dict(Default::default()));
//! doc.set_root(root);
//! doc.save("out.pdf", SaveMode::Standard)?;
//! ```
//!
//! A save runs to completion or fails; there is no partial-write
//! recovery. Callers wanting atomic replacement should save to a
//! scratch path and rename over the destination on success.
//!
//! The core performs no internal locking. A save takes `&mut Document`
//! (it clears dirty flags and sets original flags as a side effect), so
//! within one thread the borrow checker already serializes saves against
//! reads and mutations; callers sharing a document across threads must
//! hold their own write lock around a save.

pub mod config;
pub mod document;
pub mod error;
pub mod filter;
pub mod lexer;
pub mod object;
pub mod objstm;
pub mod reader;
pub mod writer;
pub mod xref;
pub mod xref_stream;

pub use config::{DocumentConfiguration, PdfVersion, XrefMode};
pub use document::Document;
pub use error::{Error, Result};
pub use object::{Array, Dict, Name, ObjRef, Object, PdfString};
pub use objstm::{MAX_MEMBERS, ObjectStream};
pub use reader::Reader;
pub use writer::SaveMode;
pub use xref::{XrefEntry, XrefKind, XrefSection};
pub use xref_stream::{XrefStreamDecoder, XrefStreamEncoder};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
