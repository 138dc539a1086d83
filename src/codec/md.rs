use pulldown_cmark::{
    Event as MdEvent, HeadingLevel, Options, Parser as MdParser, Tag as MdTag, TagEnd as MdTagEnd,
};
use pulldown_cmark_to_cmark::cmark;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::read,
    ops::Range,
    path::Path,
    result::Result,
    str::FromStr,
};

use crate::{
    codec::list_style::{normalize_list_markers, ListStyle},
    error::MantraError,
};

pub use pulldown_cmark;

/// Document level metadata, every value flattened to a string.
pub type DocumentMeta = BTreeMap<String, String>;

/// File extensions the markdown converter accepts.
pub const CONVERTIBLE_EXTENSIONS: [&str; 5] = ["md", "markdown", "mdown", "mkd", "pd"];

pub fn is_convertible(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            CONVERTIBLE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

pub fn mantra_md_options() -> Options {
    let mut md_options = Options::empty();
    // Enabled explicitly rather than through Options::all() so output stays reproducible across
    // pulldown-cmark releases.
    md_options.insert(Options::ENABLE_DEFINITION_LIST);
    md_options.insert(Options::ENABLE_FOOTNOTES);
    md_options.insert(Options::ENABLE_GFM);
    md_options.insert(Options::ENABLE_MATH);
    md_options.insert(Options::ENABLE_STRIKETHROUGH);
    md_options.insert(Options::ENABLE_SUPERSCRIPT);
    md_options.insert(Options::ENABLE_TABLES);
    md_options.insert(Options::ENABLE_TASKLISTS);
    md_options.insert(Options::ENABLE_YAML_STYLE_METADATA_BLOCKS);
    md_options
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderFormat {
    #[default]
    Markdown,
    Html,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Header(u8),
    Paragraph,
    OrderedList(ListStyle),
    Other,
}

/// One top-level block of a document: its opening event, everything nested inside it, and its
/// closing event. Leaf blocks such as rules are a single event.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub kind: BlockKind,
    pub events: Vec<MdEvent<'static>>,
    /// Byte range of the block inside the source text.
    pub range: Range<usize>,
}

impl Block {
    pub fn header_level(&self) -> Option<u8> {
        match self.kind {
            BlockKind::Header(level) => Some(level),
            _ => None,
        }
    }

    /// Events between the block's own start and end tags.
    pub fn inner_events(&self) -> &[MdEvent<'static>] {
        match (self.events.first(), self.events.last()) {
            (Some(MdEvent::Start(_)), Some(MdEvent::End(_))) if self.events.len() >= 2 => {
                &self.events[1..self.events.len() - 1]
            }
            _ => &self.events,
        }
    }

    /// Concatenated text content, with line breaks collapsed to spaces.
    pub fn plain_text(&self) -> String {
        plain_text(&self.events)
    }
}

pub fn plain_text<'a, I>(events: I) -> String
where
    I: IntoIterator<Item = &'a MdEvent<'a>>,
{
    let mut text = String::new();
    for event in events {
        match event {
            MdEvent::Text(t)
            | MdEvent::Code(t)
            | MdEvent::InlineMath(t)
            | MdEvent::DisplayMath(t) => text.push_str(t),
            MdEvent::SoftBreak | MdEvent::HardBreak => text.push(' '),
            _ => {}
        }
    }
    text
}

fn heading_level(level: &HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

fn meta_value_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::Null => String::new(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Sequence(items) => items
            .iter()
            .map(meta_value_to_string)
            .collect::<Vec<String>>()
            .join(", "),
        serde_yaml::Value::Mapping(_) => serde_yaml::to_string(value)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
        serde_yaml::Value::Tagged(tagged) => meta_value_to_string(&tagged.value),
    }
}

fn parse_meta(yaml: &str) -> Result<DocumentMeta, serde_yaml::Error> {
    let mut meta = DocumentMeta::new();
    match serde_yaml::from_str::<serde_yaml::Value>(yaml)? {
        serde_yaml::Value::Mapping(map) => {
            for (key, value) in map.iter() {
                meta.insert(meta_value_to_string(key), meta_value_to_string(value));
            }
        }
        serde_yaml::Value::Null => {}
        other => {
            // A scalar front matter block carries no keys
            tracing::debug!("ignoring non-mapping metadata block: {:?}", other);
        }
    }
    Ok(meta)
}

/// A parsed document: its metadata map plus the flat list of top-level blocks.
#[derive(Debug, Clone, Default)]
pub struct DocumentAst {
    pub meta: DocumentMeta,
    pub blocks: Vec<Block>,
    source: String,
}

impl DocumentAst {
    /// Read and parse a source document. Every failure (unreadable path, non UTF-8 content,
    /// unsupported extension, malformed metadata) is reported as a conversion error.
    pub fn parse_document(path: &Path) -> Result<DocumentAst, MantraError> {
        let bytes = read(path).map_err(|e| MantraError::conversion(path, e))?;
        DocumentAst::from_bytes(path, bytes)
    }

    /// Parse content already read from `path`. The path decides whether the format is supported
    /// and names the document in errors.
    pub fn from_bytes(path: &Path, bytes: Vec<u8>) -> Result<DocumentAst, MantraError> {
        if !is_convertible(path) {
            return Err(MantraError::conversion(path, "unsupported file extension"));
        }
        let content = String::from_utf8(bytes)
            .map_err(|e| MantraError::conversion(path, format!("content is not UTF-8: {e}")))?;
        DocumentAst::parse_str(&content).map_err(|e| match e {
            MantraError::Conversion(msg) => MantraError::conversion(path, msg),
            other => other,
        })
    }

    pub fn parse_str(content: &str) -> Result<DocumentAst, MantraError> {
        let normalized = normalize_list_markers(content);
        let mut meta = DocumentMeta::new();
        let mut blocks = Vec::new();
        let mut current: Option<Block> = None;
        let mut depth = 0usize;
        let mut meta_accum: Option<String> = None;

        for (event, offset) in
            MdParser::new_ext(&normalized.text, mantra_md_options()).into_offset_iter()
        {
            match &event {
                MdEvent::Start(MdTag::MetadataBlock(_)) => {
                    meta_accum = Some(String::new());
                    continue;
                }
                MdEvent::End(MdTagEnd::MetadataBlock(_)) => {
                    let yaml = meta_accum.take().unwrap_or_default();
                    let parsed = parse_meta(&yaml).map_err(|e| {
                        MantraError::Conversion(format!("malformed metadata block: {e}"))
                    })?;
                    meta.extend(parsed);
                    continue;
                }
                MdEvent::Text(text) if meta_accum.is_some() => {
                    if let Some(accum) = meta_accum.as_mut() {
                        accum.push_str(text);
                    }
                    continue;
                }
                _ => {}
            }

            if depth == 0 {
                let kind = match &event {
                    MdEvent::Start(MdTag::Heading { level, .. }) => {
                        BlockKind::Header(heading_level(level))
                    }
                    MdEvent::Start(MdTag::Paragraph) => BlockKind::Paragraph,
                    MdEvent::Start(MdTag::List(Some(_))) => {
                        BlockKind::OrderedList(normalized.style_at(offset.start))
                    }
                    _ => BlockKind::Other,
                };
                current = Some(Block {
                    kind,
                    events: Vec::new(),
                    range: offset.clone(),
                });
            }
            match &event {
                MdEvent::Start(_) => depth += 1,
                MdEvent::End(_) => depth = depth.saturating_sub(1),
                _ => {}
            }
            if let Some(block) = current.as_mut() {
                block.range.end = block.range.end.max(offset.end);
                block.events.push(event.into_static());
            }
            if depth == 0 {
                if let Some(block) = current.take() {
                    blocks.push(block);
                }
            }
        }
        if let Some(block) = current.take() {
            tracing::warn!("unterminated block at end of document: {:?}", block.kind);
            blocks.push(block);
        }

        Ok(DocumentAst {
            meta,
            blocks,
            source: content.to_string(),
        })
    }

    pub fn tokens(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// The whole document, metadata first as a YAML block.
    pub fn render(&self, format: RenderFormat) -> Result<String, MantraError> {
        let body = render(&self.blocks, format)?;
        if self.meta.is_empty() || format == RenderFormat::Html {
            return Ok(body);
        }
        let yaml = serde_yaml::to_string(&self.meta)?;
        Ok(format!("---\n{yaml}---\n\n{body}"))
    }

    /// Split into header bounded sections, consuming the document.
    pub fn header_split(self) -> HeaderSplit {
        HeaderSplit {
            source: self.source,
            blocks: self.blocks.into_iter(),
            pending: None,
            started: false,
            finished: false,
        }
    }
}

impl FromStr for DocumentAst {
    type Err = MantraError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        DocumentAst::parse_str(content)
    }
}

/// A header and every block up to the next header of any level. Level 0 holds the blocks
/// preceding the first header.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub level: u8,
    pub blocks: Vec<Block>,
    /// Source text the section was parsed from.
    pub markup: String,
}

pub struct HeaderSplit {
    source: String,
    blocks: std::vec::IntoIter<Block>,
    pending: Option<Block>,
    started: bool,
    finished: bool,
}

impl HeaderSplit {
    fn section(&self, level: u8, blocks: Vec<Block>) -> Section {
        let markup = match (blocks.first(), blocks.last()) {
            (Some(first), Some(last)) => self
                .source
                .get(first.range.start..last.range.end)
                .unwrap_or_default()
                .trim_end()
                .to_string(),
            _ => String::new(),
        };
        Section {
            level,
            blocks,
            markup,
        }
    }
}

impl Iterator for HeaderSplit {
    type Item = Section;

    fn next(&mut self) -> Option<Section> {
        if self.finished {
            return None;
        }
        let (level, mut blocks) = match self.pending.take() {
            Some(header) => (header.header_level().unwrap_or_default(), vec![header]),
            None if !self.started => (0, Vec::new()),
            None => {
                self.finished = true;
                return None;
            }
        };
        self.started = true;
        for block in self.blocks.by_ref() {
            if block.header_level().is_some() {
                self.pending = Some(block);
                return Some(self.section(level, blocks));
            }
            blocks.push(block);
        }
        self.finished = true;
        Some(self.section(level, blocks))
    }
}

pub fn render_events<'a, I>(events: I, format: RenderFormat) -> Result<String, MantraError>
where
    I: IntoIterator<Item = &'a MdEvent<'static>>,
{
    let mut buf = String::new();
    match format {
        RenderFormat::Markdown => {
            cmark(events.into_iter(), &mut buf)?;
        }
        RenderFormat::Html => {
            pulldown_cmark::html::push_html(&mut buf, events.into_iter().cloned());
        }
    }
    Ok(buf)
}

pub fn render<'a, I>(blocks: I, format: RenderFormat) -> Result<String, MantraError>
where
    I: IntoIterator<Item = &'a Block>,
{
    render_events(blocks.into_iter().flat_map(|b| b.events.iter()), format)
}

pub fn to_html(content: &str, output: &mut String) -> Result<(), MantraError> {
    let normalized = normalize_list_markers(content);
    let parser = MdParser::new_ext(&normalized.text, mantra_md_options());
    pulldown_cmark::html::write_html_fmt(output, parser)?;
    Ok(())
}
