//! Turns header bounded sections of a [DocumentAst] into [Question] records.
//!
//! Within a section the first header gives the title and level, the first ordered list gives
//! the choices, and paragraphs opening with one of the attribute keywords (`tags:`, `answer:`,
//! `explanation:`, `section:`) give the question's metadata. Everything else is body text. Local
//! images in body paragraphs are pointed at the test's output directory and queued for the
//! asset materializer.
use pulldown_cmark::{CowStr, Event as MdEvent, LinkType, Tag as MdTag, TagEnd as MdTagEnd};
use serde::Serialize;
use std::{
    collections::BTreeSet,
    path::{Component, Path, PathBuf},
};

use crate::{
    codec::{
        context::CompileContext,
        inherit::{inherit, prune},
        list_style::ListStyle,
        md::{
            plain_text, render, render_events, Block, BlockKind, DocumentAst, DocumentMeta,
            RenderFormat, Section,
        },
        question::{ImageRef, Question},
    },
    error::MantraError,
};

/// Directory of the test output holding every materialized image.
pub const IMG_DIR: &str = "img";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AttributeKey {
    Tags,
    Answer,
    Explanation,
    Section,
}

impl AttributeKey {
    pub fn parse(word: &str) -> Option<AttributeKey> {
        match word.to_lowercase().as_str() {
            "tags:" => Some(AttributeKey::Tags),
            "answer:" => Some(AttributeKey::Answer),
            "explanation:" => Some(AttributeKey::Explanation),
            "section:" => Some(AttributeKey::Section),
            _ => None,
        }
    }
}

/// Values captured from one attribute paragraph. Keywords absent from the paragraph stay None.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Attributes {
    pub tags: Option<BTreeSet<String>>,
    pub answer: Option<BTreeSet<char>>,
    pub explanation: Option<String>,
    pub section: Option<String>,
}

impl Attributes {
    /// Copy every captured value onto `question`, keeping what this paragraph did not mention.
    pub fn apply(self, question: &mut Question) {
        if let Some(tags) = self.tags {
            question.tags = tags;
        }
        if let Some(answer) = self.answer {
            question.answer = answer;
        }
        if let Some(explanation) = self.explanation {
            question.explain = explanation;
        }
        if let Some(section) = self.section {
            question.section = Some(section);
        }
    }
}

/// Lower-cased words of `text`, commas counting as separators.
pub fn keywords(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .replace(',', " ")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn answer_set(text: &str) -> BTreeSet<char> {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

fn first_word(text: &str) -> Option<String> {
    text.to_lowercase()
        .replace(',', " ")
        .split_whitespace()
        .next()
        .map(str::to_string)
}

fn push_words(text: &str, tokens: &mut Vec<MdEvent<'static>>) {
    let mut run = String::new();
    let mut run_is_space = false;
    for c in text.chars() {
        if !run.is_empty() && c.is_whitespace() != run_is_space {
            tokens.push(MdEvent::Text(CowStr::from(std::mem::take(&mut run))));
        }
        run_is_space = c.is_whitespace();
        run.push(c);
    }
    if !run.is_empty() {
        tokens.push(MdEvent::Text(CowStr::from(run)));
    }
}

/// Inline events of a paragraph with every top-level text run split into words and whitespace.
fn word_tokens(block: &Block) -> Vec<MdEvent<'static>> {
    let mut tokens = Vec::new();
    let mut pending = String::new();
    let mut depth = 0usize;
    for event in block.inner_events() {
        if let (MdEvent::Text(text), 0) = (event, depth) {
            pending.push_str(text);
            continue;
        }
        if !pending.is_empty() {
            push_words(&std::mem::take(&mut pending), &mut tokens);
        }
        match event {
            MdEvent::Start(_) => depth += 1,
            MdEvent::End(_) => depth = depth.saturating_sub(1),
            _ => {}
        }
        tokens.push(event.clone());
    }
    if !pending.is_empty() {
        push_words(&pending, &mut tokens);
    }
    tokens
}

fn keyword_of(event: &MdEvent<'_>) -> Option<AttributeKey> {
    match event {
        MdEvent::Text(word) => AttributeKey::parse(word),
        _ => None,
    }
}

/// Read a paragraph as attributes. Returns None when it does not open with a keyword, in which
/// case it is ordinary body text.
pub fn parse_attributes(block: &Block) -> Result<Option<Attributes>, MantraError> {
    if block.kind != BlockKind::Paragraph {
        return Ok(None);
    }
    let tokens = word_tokens(block);
    if tokens.first().and_then(keyword_of).is_none() {
        return Ok(None);
    }

    let mut captured: Vec<(AttributeKey, Vec<MdEvent<'static>>)> = Vec::new();
    let mut depth = 0usize;
    for token in tokens {
        if depth == 0 {
            if let Some(key) = keyword_of(&token) {
                captured.push((key, Vec::new()));
                continue;
            }
        }
        match &token {
            MdEvent::Start(_) => depth += 1,
            MdEvent::End(_) => depth = depth.saturating_sub(1),
            _ => {}
        }
        if let Some((_, events)) = captured.last_mut() {
            events.push(token);
        }
    }

    let mut attrs = Attributes::default();
    for (key, events) in captured {
        let text = plain_text(&events);
        match key {
            AttributeKey::Tags => attrs.tags = Some(keywords(&text)),
            AttributeKey::Answer => attrs.answer = Some(answer_set(&text)),
            AttributeKey::Section => attrs.section = first_word(&text),
            AttributeKey::Explanation => {
                let mut paragraph = Vec::with_capacity(events.len() + 2);
                paragraph.push(MdEvent::Start(MdTag::Paragraph));
                paragraph.extend(events);
                paragraph.push(MdEvent::End(MdTagEnd::Paragraph));
                let rendered = render_events(&paragraph, RenderFormat::Markdown)?;
                attrs.explanation = Some(rendered.trim().to_string());
            }
        }
    }
    Ok(Some(attrs))
}

/// Output relative location of a local image reference, or None for remote images.
///
/// Every image lands under `img/`, clear of the compile's own top level outputs. Relative
/// references are mirrored below it (`img/a.png` stays `img/a.png`, `pics/a.png` becomes
/// `img/pics/a.png`); references escaping the document's directory, or absolute ones, keep only
/// their file name.
pub fn image_relpath(url: &str) -> Option<PathBuf> {
    let url = url.split(['?', '#']).next().unwrap_or_default();
    if url.is_empty() || url.contains("://") || url.starts_with("data:") || url.starts_with("//") {
        return None;
    }
    let path = Path::new(url);
    let escapes = path
        .components()
        .any(|c| matches!(c, Component::ParentDir));
    if path.is_absolute() || escapes {
        return path.file_name().map(|name| Path::new(IMG_DIR).join(name));
    }
    let relative: PathBuf = path
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    if relative.as_os_str().is_empty() {
        None
    } else if relative.starts_with(IMG_DIR) {
        Some(relative)
    } else {
        Some(Path::new(IMG_DIR).join(relative))
    }
}

fn url_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<String>>()
        .join("/")
}

/// Point local images of `block` at the test's output directory. Returns the rewritten block
/// and the images to copy.
pub fn rewrite_images(block: &Block, ctx: &CompileContext) -> (Block, Vec<ImageRef>) {
    let mut images = Vec::new();
    let mut rewritten = block.clone();
    for event in rewritten.events.iter_mut() {
        let MdEvent::Start(MdTag::Image {
            dest_url,
            title,
            id,
            ..
        }) = event
        else {
            continue;
        };
        let Some(relative) = image_relpath(dest_url) else {
            continue;
        };
        let src = ctx
            .src_dir()
            .join(dest_url.split(['?', '#']).next().unwrap_or_default());
        let dst = ctx.dst_dir.join(&relative);
        let url = format!("{}/{}", ctx.test_id, url_path(&relative));
        ctx.log.debug(format!("Image {dest_url} -> {url}"));
        images.push(ImageRef { src, dst });
        let (title, id) = (title.clone(), id.clone());
        *event = MdEvent::Start(MdTag::Image {
            link_type: LinkType::Inline,
            dest_url: CowStr::from(url),
            title,
            id,
        });
    }
    (rewritten, images)
}

/// Items of a choice list, labelled from 1 in the list's style whatever number it starts at.
fn choices(block: &Block, style: ListStyle) -> Result<Vec<(String, String)>, MantraError> {
    let mut items: Vec<Vec<MdEvent<'static>>> = Vec::new();
    let mut current: Option<Vec<MdEvent<'static>>> = None;
    let mut depth = 0usize;
    for event in block.inner_events() {
        match event {
            MdEvent::Start(MdTag::Item) if depth == 0 => {
                current = Some(Vec::new());
                depth = 1;
            }
            MdEvent::End(MdTagEnd::Item) if depth == 1 => {
                depth = 0;
                if let Some(item) = current.take() {
                    items.push(item);
                }
            }
            other => {
                match other {
                    MdEvent::Start(_) => depth += 1,
                    MdEvent::End(_) => depth = depth.saturating_sub(1),
                    _ => {}
                }
                if let Some(item) = current.as_mut() {
                    item.push(other.clone());
                }
            }
        }
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let text = render_events(item, RenderFormat::Markdown)?;
            Ok((style.label(i + 1), text.trim().to_string()))
        })
        .collect()
}

/// Build the question for one header bounded section.
pub fn extract_question(section: Section, ctx: &CompileContext) -> Result<Question, MantraError> {
    let mut question = Question::new(section.level);
    question.markdown = section.markup;
    let mut body: Vec<Block> = Vec::new();
    for block in section.blocks {
        match block.kind {
            BlockKind::Header(level) => {
                question.level = level;
                question.title = render([&block], RenderFormat::Markdown)?.trim().to_string();
            }
            BlockKind::Paragraph => match parse_attributes(&block)? {
                Some(attrs) => attrs.apply(&mut question),
                None => {
                    let (block, images) = rewrite_images(&block, ctx);
                    question.images.extend(images);
                    body.push(block);
                }
            },
            BlockKind::OrderedList(style) if question.choices.is_empty() => {
                question.choices = choices(&block, style)?;
            }
            _ => body.push(block),
        }
    }
    question.text = render(&body, RenderFormat::Markdown)?.trim().to_string();
    Ok(question)
}

/// Everything compiled out of one source document.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ParsedDocument {
    pub meta: DocumentMeta,
    /// Document level tags, from the `tags` metadata key.
    pub tags: BTreeSet<String>,
    /// Body of the text preceding the first header.
    pub intro: String,
    /// Retained questions, in document order.
    pub questions: Vec<Question>,
    /// Images referenced anywhere in the document, retained questions or not.
    pub images: Vec<ImageRef>,
}

/// Extract, inherit and prune the questions of `ast`.
#[tracing::instrument(skip_all, fields(test_id = %ctx.test_id))]
pub fn extract_document(
    ast: DocumentAst,
    ctx: &CompileContext,
) -> Result<ParsedDocument, MantraError> {
    let meta = ast.meta.clone();
    let tags = meta.get("tags").map(|t| keywords(t)).unwrap_or_default();
    let mut intro = String::new();
    let mut questions = Vec::new();
    for section in ast.header_split() {
        let question = extract_question(section, ctx)?;
        if question.level == 0 {
            intro = question.text.clone();
        }
        questions.push(question);
    }
    ctx.log.debug(format!("Found {} header blocks", questions.len()));

    inherit(&mut questions, &tags);
    for question in questions.iter_mut() {
        question.kind = question.classify();
    }
    let images: Vec<ImageRef> = questions
        .iter()
        .flat_map(|q| q.images.iter().cloned())
        .collect();
    let dropped = prune(&mut questions);
    ctx.log.info(format!(
        "Extracted {} questions ({} blocks without choices or answer dropped)",
        questions.len(),
        dropped
    ));
    Ok(ParsedDocument {
        meta,
        tags,
        intro,
        questions,
        images,
    })
}

/// Parse and extract the context's source file.
pub fn parse_source(ctx: &CompileContext) -> Result<ParsedDocument, MantraError> {
    ctx.log.info(format!("Parsing {:?}", ctx.src_file));
    extract_document(DocumentAst::parse_document(&ctx.src_file)?, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{context::JobLog, question::QuestionKind};
    use crate::index::test_id::TestId;

    fn ctx() -> CompileContext {
        let test_id = TestId::derive("ospf.md", "net");
        CompileContext {
            log: JobLog::discard(&test_id),
            src_file: PathBuf::from("/src/net/ospf.md"),
            dst_dir: PathBuf::from("/dst").join(test_id.as_str()),
            test_id,
        }
    }

    fn paragraph(md: &str) -> Block {
        let ast = DocumentAst::parse_str(md).unwrap();
        ast.blocks.into_iter().next().unwrap()
    }

    fn extract(md: &str) -> ParsedDocument {
        extract_document(DocumentAst::parse_str(md).unwrap(), &ctx()).unwrap()
    }

    #[test]
    fn ospf_scenario() {
        let doc = extract("## Q1\n\n(A) x\n(B) y\n\nanswer: b\n");
        assert_eq!(doc.questions.len(), 1);
        let q = &doc.questions[0];
        assert_eq!(q.level, 2);
        assert_eq!(q.title, "## Q1");
        assert_eq!(
            q.choices,
            vec![("A".to_string(), "x".to_string()), ("B".to_string(), "y".to_string())]
        );
        assert_eq!(q.answer, BTreeSet::from(['b']));
        assert_eq!(q.kind, QuestionKind::MChoice);
        assert!(q.markdown.contains("(A) x"));
    }

    #[test]
    fn plain_paragraph_is_not_an_attribute() {
        assert_eq!(parse_attributes(&paragraph("The answer: is b\n")).unwrap(), None);
    }

    #[test]
    fn one_paragraph_many_keywords() {
        let attrs = parse_attributes(&paragraph(
            "Answer: B, c\nTAGS: Routing, ospf routing\nsection: Core stuff\n",
        ))
        .unwrap()
        .unwrap();
        assert_eq!(attrs.answer, Some(BTreeSet::from(['b', 'c'])));
        assert_eq!(
            attrs.tags,
            Some(BTreeSet::from(["ospf".to_string(), "routing".to_string()]))
        );
        assert_eq!(attrs.section, Some("core".to_string()));
        assert_eq!(attrs.explanation, None);
    }

    #[test]
    fn explanation_keeps_markup() {
        let attrs = parse_attributes(&paragraph("explanation: see *RFC 2328*\n"))
            .unwrap()
            .unwrap();
        assert_eq!(attrs.explanation.as_deref(), Some("see *RFC 2328*"));
    }

    #[test]
    fn only_first_ordered_list_gives_choices() {
        let doc = extract("## Q\n\na. one\nb. two\n\ntext\n\n1. later\n2. list\n\nanswer: a\n");
        let q = &doc.questions[0];
        assert_eq!(q.choices[0], ("a".to_string(), "one".to_string()));
        assert_eq!(q.choices[1], ("b".to_string(), "two".to_string()));
        assert!(q.text.contains("later"));
        assert!(q.text.contains("text"));
        assert!(!q.text.contains("answer"));
    }

    #[test]
    fn roman_and_decimal_labels() {
        let doc = extract("# R\n\ni. one\nii. two\n\nanswer: ii\n\n# D\n\n1. one\n2. two\n\nanswer: 2\n");
        assert_eq!(doc.questions[0].choices[1].0, "ii");
        assert_eq!(doc.questions[0].answer, BTreeSet::from(['i']));
        assert_eq!(doc.questions[1].choices[1].0, "2");
    }

    #[test]
    fn decimal_choices_are_labelled_from_one() {
        let doc = extract("# Q\n\nPick:\n\n3. x\n4. y\n\nanswer: 1\n");
        let q = &doc.questions[0];
        assert_eq!(
            q.choices,
            vec![("1".to_string(), "x".to_string()), ("2".to_string(), "y".to_string())]
        );
        assert_eq!(q.answer, BTreeSet::from(['1']));
    }

    #[test]
    fn continued_paragraph_does_not_become_choices() {
        let doc = extract("# Q\n\nThe inventor was\nA. Smith of course.\n\n(A) yes\n(B) no\n\nanswer: a\n");
        let q = &doc.questions[0];
        assert_eq!(
            q.choices,
            vec![("A".to_string(), "yes".to_string()), ("B".to_string(), "no".to_string())]
        );
        assert!(q.text.contains("Smith of course."));
    }

    #[test]
    fn leading_thematic_break_keeps_questions() {
        let doc = extract("---\n\n# Q\n\n(A) yes\n(B) no\n\nanswer: a\n");
        assert_eq!(doc.questions.len(), 1);
        assert_eq!(doc.questions[0].choices.len(), 2);
        assert!(doc.meta.is_empty());
    }

    #[test]
    fn attributes_from_separate_paragraphs_combine() {
        let doc = extract(
            "## Q\n\n(A) x\n(B) y\n\nanswer: b\n\nexplanation: Because *y*.\n\ntags: lsa\n",
        );
        let q = &doc.questions[0];
        assert_eq!(q.answer, BTreeSet::from(['b']));
        assert_eq!(q.explain, "Because *y*.");
        assert!(q.tags.contains("lsa"));
        assert!(!q.text.contains("answer"));
        assert!(!q.text.contains("Because"));
    }

    #[test]
    fn unanswered_blocks_are_pruned() {
        let doc = extract(
            "Lead text.\n\n# Group\n\n## Q1\n\n(A) x\n\nanswer: a\n\n## Q2\n\n(A) y\n",
        );
        assert_eq!(doc.intro, "Lead text.");
        assert_eq!(doc.questions.len(), 1);
        assert!(doc.questions.iter().all(Question::is_complete));
    }

    #[test]
    fn local_images_are_rewritten() {
        let c = ctx();
        let doc = extract("## Q\n\n![net](img/a.png) and ![w](https://x.org/b.png)\n\n(A) x\n\nanswer: a\n");
        let q = &doc.questions[0];
        assert_eq!(q.images.len(), 1);
        assert_eq!(q.images[0].src, PathBuf::from("/src/net/img/a.png"));
        assert_eq!(q.images[0].dst, c.dst_dir.join("img/a.png"));
        assert!(q.text.contains(&format!("({}/img/a.png)", c.test_id)));
        assert!(q.text.contains("https://x.org/b.png"));
        assert_eq!(doc.images, q.images);
    }

    #[test]
    fn image_paths() {
        assert_eq!(image_relpath("img/a.png"), Some(PathBuf::from("img/a.png")));
        assert_eq!(image_relpath("./a.png"), Some(PathBuf::from("img/a.png")));
        assert_eq!(image_relpath("a.png"), Some(PathBuf::from("img/a.png")));
        assert_eq!(image_relpath("pics/a.png"), Some(PathBuf::from("img/pics/a.png")));
        assert_eq!(image_relpath("mtr.idx"), Some(PathBuf::from("img/mtr.idx")));
        assert_eq!(image_relpath("../shared/a.png"), Some(PathBuf::from("img/a.png")));
        assert_eq!(image_relpath("/abs/a.png"), Some(PathBuf::from("img/a.png")));
        assert_eq!(image_relpath("http://x/a.png"), None);
        assert_eq!(image_relpath("data:image/png;base64,AAAA"), None);
    }

    #[test]
    fn document_tags_reach_every_question() {
        let doc = extract("---\ntags: [Net, OSPF]\n---\n\n## Q\n\n(A) x\n\nanswer: a\ntags: lsa\n");
        assert_eq!(
            doc.questions[0].tags,
            BTreeSet::from(["lsa".to_string(), "net".to_string(), "ospf".to_string()])
        );
        assert_eq!(doc.tags.len(), 2);
    }
}
