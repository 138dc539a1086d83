use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fs::{create_dir_all, read, read_dir, read_to_string, remove_file},
    path::Path,
};

use crate::{
    assets::{materialize, write_manifest},
    codec::{
        context::CompileContext,
        extract::{extract_document, ParsedDocument},
        md::{DocumentAst, DocumentMeta},
    },
    error::MantraError,
    index::{
        entry::{LEAD_NAME, QUIZ_NAME, STATS_NAME},
        scan::{content_hash, read_score},
        store::write_atomic,
        IndexFlag, TestIndexEntry, ERR_NAME, LOG_NAME,
    },
    jobs::CompileWorker,
};

/// Quiz level data written next to the question records as `quiz.json`.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuizInfo {
    pub meta: DocumentMeta,
    pub tags: BTreeSet<String>,
    pub numq: usize,
}

impl QuizInfo {
    pub fn read(dst_dir: &Path) -> Result<QuizInfo, MantraError> {
        Ok(serde_json::from_str(&read_to_string(dst_dir.join(QUIZ_NAME))?)?)
    }
}

/// Compiles one source document into its test output directory.
///
/// ## Output
///
/// A compile replaces everything it produced the last time. For a document compiled into
/// `<dst>/<test id>/` the result is:
///
/// ```text
/// <test id>/
///   ├── mtr.idx      the marker: the index entry this compile produced
///   ├── img.idx      manifest of the images below
///   ├── quiz.json    document metadata, document tags and question count
///   ├── lead.md      text before the first header, when there is any
///   ├── q000.json    one record per retained question, in document order
///   ├── q001.json
///   └── img/...      images referenced by the document
/// ```
///
/// ## Steps
///
/// 1. **Read and hash** the source. The hash recorded in the marker is the hash of the exact
///    bytes that were parsed, so an edit made while the compile runs shows up as Updatable on
///    the next sync.
/// 2. **Parse and extract** the questions (see [extract_document]). A document that cannot be
///    converted fails the compile here, before any output is touched.
/// 3. **Clear** the previous top level outputs. The job log, the last failure log and the
///    score history written by the quiz UI survive, as do the copied images, which the
///    materializer refreshes in place.
/// 4. **Write** the question records, `quiz.json` and `lead.md`.
/// 5. **Materialize** the images and record them in the manifest.
/// 6. **Write the marker** last. A compile that fails in between leaves a directory without a
///    marker, which the next sync reports as Creatable.
///
/// Progress goes to the job log carried by the [CompileContext].
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentCompiler;

impl DocumentCompiler {
    pub fn new() -> Self {
        DocumentCompiler
    }

    /// Parse and extract without writing anything.
    pub fn parse(&self, ctx: &CompileContext) -> Result<(String, ParsedDocument), MantraError> {
        ctx.log.info(format!("Parsing {:?}", ctx.src_file));
        let bytes = read(&ctx.src_file)?;
        let src_hash = content_hash(&bytes);
        let ast = DocumentAst::from_bytes(&ctx.src_file, bytes)?;
        Ok((src_hash, extract_document(ast, ctx)?))
    }

    #[tracing::instrument(skip_all, fields(test_id = %ctx.test_id))]
    pub fn compile_document(
        &self,
        ctx: &CompileContext,
        entry: &TestIndexEntry,
    ) -> Result<TestIndexEntry, MantraError> {
        let (src_hash, doc) = self.parse(ctx)?;

        create_dir_all(&ctx.dst_dir)?;
        let cleared = clear_outputs(&ctx.dst_dir)?;
        ctx.log.debug(format!("Removed {cleared} previous outputs"));

        for (nr, question) in doc.questions.iter().enumerate() {
            let path = question.save(&ctx.dst_dir, nr)?;
            ctx.log.debug(format!("Wrote {path:?}"));
        }
        let info = QuizInfo {
            meta: doc.meta.clone(),
            tags: doc.tags.clone(),
            numq: doc.questions.len(),
        };
        write_atomic(
            &ctx.dst_dir.join(QUIZ_NAME),
            serde_json::to_string_pretty(&info)?.as_bytes(),
        )?;
        if !doc.intro.trim().is_empty() {
            write_atomic(&ctx.dst_dir.join(LEAD_NAME), doc.intro.as_bytes())?;
        }

        let report = materialize(&doc.images, &ctx.log);
        write_manifest(&ctx.dst_dir, &report.manifest)?;

        let mut compiled = entry.clone();
        compiled.test_id = ctx.test_id.clone();
        compiled.src_file = ctx.src_file.clone();
        compiled.dst_dir = ctx.dst_dir.clone();
        compiled.src_hash = src_hash;
        compiled.numq = doc.questions.len();
        compiled.grade = doc
            .meta
            .get("grade")
            .and_then(|grade| grade.trim().parse().ok())
            .unwrap_or(0);
        compiled.score = read_score(&ctx.dst_dir);
        compiled.flags = if compiled.numq > 0 {
            IndexFlag::Playable.into()
        } else {
            ctx.log.warn("No questions found");
            IndexFlag::Creatable.into()
        };
        compiled.write_marker()?;
        Ok(compiled)
    }
}

impl CompileWorker for DocumentCompiler {
    fn compile(
        &self,
        ctx: &CompileContext,
        entry: &TestIndexEntry,
    ) -> Result<TestIndexEntry, MantraError> {
        self.compile_document(ctx, entry)
    }
}

/// Remove the top level files of a previous compile. Returns how many were removed.
fn clear_outputs(dst_dir: &Path) -> Result<usize, MantraError> {
    let mut removed = 0;
    for dir_entry in read_dir(dst_dir)? {
        let dir_entry = dir_entry?;
        let name = dir_entry.file_name();
        let keep = [LOG_NAME, ERR_NAME, STATS_NAME]
            .iter()
            .any(|kept| name.as_os_str() == *kept);
        if keep || !dir_entry.file_type()?.is_file() {
            continue;
        }
        remove_file(dir_entry.path())?;
        removed += 1;
    }
    Ok(removed)
}
