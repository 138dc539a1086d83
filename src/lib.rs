//! # mantra-core
//!
//! A Rust library that compiles trees of markdown quiz documents into structured question
//! records, and keeps an index of what has been compiled, what is stale and what has lost its
//! source.
//!
//! ## Overview
//!
//! A quiz tree is two parallel directories. The **source tree** holds one subdirectory per
//! category, each with markdown documents; every `##` style header in a document opens a
//! question whose choices are the first ordered list under it and whose answer, tags, section
//! and explanation come from attribute paragraphs:
//!
//! ```markdown
//! ## Which protocol floods link state advertisements?
//!
//! (A) BGP
//! (B) OSPF
//! (C) RIP
//!
//! answer: b
//! tags: routing igp
//! ```
//!
//! The **destination tree** holds one directory per compiled document, named by its stable
//! [test id](index::TestId), with a `qNNN.json` record per question, the copied images and a
//! marker naming the source it was compiled from.
//!
//! ### Key Features
//!
//! - **Stable identifiers**: test ids hash only the category and file name, so relocating the
//!   whole tree keeps every id
//! - **Content-hash staleness**: a sync classifies every test as Creatable, Updatable, Playable
//!   or Orphaned, including images that changed since they were copied
//! - **Background compiles**: at most one compile per test id, with a per-job log a UI can poll
//! - **Error isolation**: one unreadable or unconvertible document never stops the others
//!
//! ## Architecture
//!
//! - **[`codec`]**: markdown parsing, question extraction, tag inheritance, the compiler
//! - **[`assets`]**: image copying and the per-test image manifest
//! - **[`index`]**: tree scans, test ids, the merged index and its persistence
//! - **[`jobs`]**: the compile job controller
//! - **[`service`]**: the [`Mantra`](service::Mantra) facade a UI or the CLI talks to
//! - **[`config`]**: `mantra.toml` settings
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mantra_core::{config::MantraConfig, service::Mantra};
//! use std::time::Duration;
//!
//! let mantra = Mantra::new(MantraConfig::with_dirs("./docs", "./out"))?;
//! for request in mantra.compile_stale()? {
//!     mantra.wait(request.test_id(), Duration::from_secs(60));
//! }
//! for entry in mantra.sync()?.iter() {
//!     println!("{} {:?} {:?}", entry.test_id, entry.status(), entry.src_file);
//! }
//! # Ok::<(), mantra_core::MantraError>(())
//! ```
//!
//! ## Logging
//!
//! The library reports through [`tracing`] and never installs a subscriber. Compile jobs also
//! write their progress to `mtr.log` inside the test's output directory.
pub mod assets;
pub mod codec;
pub mod config;
pub mod error;
pub mod index;
pub mod jobs;
pub mod service;
#[cfg(test)]
mod tests;

pub use error::*;
