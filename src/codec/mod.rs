//! Document parsing and question extraction.
//!
//! This module turns one markdown source document into the records a quiz is played from.
//!
//! ## Key Components
//!
//! - [`md::DocumentAst`] - block tree of a document, with YAML front matter split off and fancy
//!   list markers (`(A)`, `ii.`, `@`) normalized so the markdown parser sees ordered lists
//! - [`extract`] - walks header bounded sections and builds one [`Question`] per section
//! - [`inherit`] - propagates tags and sections through the header hierarchy and prunes sections
//!   that never became questions
//! - [`DocumentCompiler`] - the compile job's unit of work: parse, then write every output file
//! - [`CompileContext`] - the test being compiled and the job log every step reports to
//!
//! ## Parse Flow
//!
//! ```text
//! source bytes ─▶ normalize_list_markers ─▶ pulldown-cmark ─▶ DocumentAst
//!                                                               │ header_split
//!                                                               ▼
//!                            prune ◀─ inherit ◀─ extract_question (per section)
//!                              │
//!                              ▼
//!                       ParsedDocument ─▶ qNNN.json, quiz.json, lead.md, img/
//! ```
//!
//! Parsing a single file without touching any output directory:
//!
//! ```rust,no_run
//! use mantra_core::codec::{extract::parse_source, CompileContext};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), mantra_core::MantraError> {
//! let ctx = CompileContext::detached(Path::new("docs/net/ospf.md"), Path::new("out"));
//! let doc = parse_source(&ctx)?;
//! for question in &doc.questions {
//!     println!("{} {:?}", question.title, question.answer);
//! }
//! # Ok(())
//! # }
//! ```
pub mod compiler;
pub mod context;
pub mod extract;
pub mod inherit;
pub mod list_style;
pub mod md;
pub mod question;

pub use compiler::{DocumentCompiler, QuizInfo};
pub use context::{CompileContext, JobLog};
pub use extract::ParsedDocument;
pub use md::DocumentAst;
pub use question::{Question, QuestionKind};
