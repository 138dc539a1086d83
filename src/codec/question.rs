use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fs::read_to_string,
    path::{Path, PathBuf},
};

use crate::{error::MantraError, index::store::write_atomic};

/// How a compiled question is meant to be answered.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    /// Level 0 text preceding the first header.
    Intro,
    /// Exactly one correct choice.
    MChoice,
    /// Several correct choices.
    MCorrect,
    #[default]
    #[serde(other)]
    Unknown,
}

/// An image referenced from a question body. `src` is the file inside the source tree, `dst` the
/// copy inside the test's output directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub src: PathBuf,
    pub dst: PathBuf,
}

/// One quiz item, as written to `qNNN.json`.
///
/// Every field carries a default so records written by older or newer compilers still load.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Question {
    pub level: u8,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    pub tags: BTreeSet<String>,
    pub section: Option<String>,
    pub title: String,
    pub text: String,
    pub choices: Vec<(String, String)>,
    pub answer: BTreeSet<char>,
    pub explain: String,
    /// Source markup of the whole header section.
    pub markdown: String,
    pub images: Vec<ImageRef>,
}

/// Output file name of the `nr`th (0-based) retained question.
pub fn question_file_name(nr: usize) -> String {
    format!("q{nr:03}.json")
}

impl Question {
    pub fn new(level: u8) -> Self {
        Question {
            level,
            ..Default::default()
        }
    }

    /// A question survives pruning only with both choices and an answer.
    pub fn is_complete(&self) -> bool {
        !self.choices.is_empty() && !self.answer.is_empty()
    }

    pub fn classify(&self) -> QuestionKind {
        if self.level == 0 {
            QuestionKind::Intro
        } else if !self.is_complete() {
            QuestionKind::Unknown
        } else if self.answer.len() == 1 {
            QuestionKind::MChoice
        } else {
            QuestionKind::MCorrect
        }
    }

    pub fn from_json(json: &str) -> Result<Question, MantraError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, MantraError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn read(path: &Path) -> Result<Question, MantraError> {
        Question::from_json(&read_to_string(path)?)
    }

    /// Writes the record as `dir/qNNN.json` and returns the written path.
    pub fn save(&self, dir: &Path, nr: usize) -> Result<PathBuf, MantraError> {
        let path = dir.join(question_file_name(nr));
        write_atomic(&path, self.to_json()?.as_bytes())?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_zero_padded() {
        assert_eq!(question_file_name(0), "q000.json");
        assert_eq!(question_file_name(42), "q042.json");
    }

    #[test]
    fn missing_and_unknown_fields_default() {
        let q = Question::from_json(r###"{"title": "## Q1", "type": "essay", "future": 1}"###).unwrap();
        assert_eq!(q.title, "## Q1");
        assert_eq!(q.kind, QuestionKind::Unknown);
        assert!(q.choices.is_empty());
        assert_eq!(q.section, None);
    }

    #[test]
    fn kind_follows_answer_count() {
        let mut q = Question::new(2);
        assert_eq!(q.classify(), QuestionKind::Unknown);
        q.choices = vec![("A".into(), "x".into()), ("B".into(), "y".into())];
        q.answer.insert('b');
        assert_eq!(q.classify(), QuestionKind::MChoice);
        q.answer.insert('a');
        assert_eq!(q.classify(), QuestionKind::MCorrect);
        assert_eq!(Question::new(0).classify(), QuestionKind::Intro);
    }

    #[test]
    fn save_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut q = Question::new(2);
        q.kind = QuestionKind::MChoice;
        q.choices = vec![("A".into(), "x".into())];
        q.answer.insert('a');
        q.tags.insert("ospf".into());
        let path = q.save(dir.path(), 3).unwrap();
        assert_eq!(path, dir.path().join("q003.json"));
        let json = std::fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"type\": \"mchoice\""));
        assert_eq!(Question::read(&path).unwrap(), q);
    }
}
