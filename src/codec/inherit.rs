use std::collections::{BTreeMap, BTreeSet};

use crate::codec::question::Question;

/// Propagate tags and sections through `questions`, which must be in document order.
///
/// A question's final tags are its own, plus the tags last declared at every shallower level
/// still open above it, plus `doc_tags`. A section sticks until another question declares one.
pub fn inherit(questions: &mut [Question], doc_tags: &BTreeSet<String>) {
    let mut level_tags: BTreeMap<u8, BTreeSet<String>> = BTreeMap::new();
    let mut section: Option<String> = None;
    for question in questions.iter_mut() {
        level_tags.insert(question.level, std::mem::take(&mut question.tags));
        level_tags.retain(|level, _| *level <= question.level);
        question.tags = level_tags
            .values()
            .flatten()
            .chain(doc_tags.iter())
            .cloned()
            .collect();

        if question.section.as_deref().is_some_and(|s| !s.is_empty()) {
            section = question.section.clone();
        } else {
            question.section = section.clone();
        }
    }
}

/// Drop header blocks that never became questions. Returns how many were dropped.
pub fn prune(questions: &mut Vec<Question>) -> usize {
    let before = questions.len();
    questions.retain(Question::is_complete);
    before - questions.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(level: u8, tags: &[&str], section: Option<&str>) -> Question {
        Question {
            level,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            section: section.map(str::to_string),
            ..Default::default()
        }
    }

    fn tags(q: &Question) -> Vec<&str> {
        q.tags.iter().map(String::as_str).collect()
    }

    #[test]
    fn tags_flow_down_and_are_evicted_on_the_way_up() {
        let mut qs = vec![
            q(1, &["net"], None),
            q(2, &["ospf"], None),
            q(3, &["lsa"], None),
            q(2, &["bgp"], None),
            q(1, &[], None),
        ];
        inherit(&mut qs, &BTreeSet::from(["doc".to_string()]));
        assert_eq!(tags(&qs[0]), vec!["doc", "net"]);
        assert_eq!(tags(&qs[1]), vec!["doc", "net", "ospf"]);
        assert_eq!(tags(&qs[2]), vec!["doc", "lsa", "net", "ospf"]);
        assert_eq!(tags(&qs[3]), vec!["bgp", "doc", "net"]);
        assert_eq!(tags(&qs[4]), vec!["doc"]);
    }

    #[test]
    fn own_and_enclosing_tags_are_kept() {
        let mut qs = vec![q(0, &["front"], None), q(2, &["a"], None), q(4, &["b"], None)];
        let declared: Vec<BTreeSet<String>> = qs.iter().map(|q| q.tags.clone()).collect();
        inherit(&mut qs, &BTreeSet::new());
        for (i, question) in qs.iter().enumerate() {
            for earlier in &declared[..=i] {
                assert!(question.tags.is_superset(earlier));
            }
        }
    }

    #[test]
    fn section_carries_forward_across_levels() {
        let mut qs = vec![
            q(2, &[], None),
            q(2, &[], Some("basics")),
            q(3, &[], None),
            q(1, &[], None),
            q(2, &[], Some("advanced")),
            q(2, &[], Some("")),
        ];
        inherit(&mut qs, &BTreeSet::new());
        let sections: Vec<Option<&str>> = qs.iter().map(|q| q.section.as_deref()).collect();
        assert_eq!(
            sections,
            vec![
                None,
                Some("basics"),
                Some("basics"),
                Some("basics"),
                Some("advanced"),
                Some("advanced"),
            ]
        );
    }

    #[test]
    fn prune_keeps_only_complete_questions() {
        let mut complete = q(2, &[], None);
        complete.choices = vec![("A".into(), "x".into())];
        complete.answer.insert('a');
        let mut no_answer = q(2, &[], None);
        no_answer.choices = vec![("A".into(), "x".into())];
        let mut no_choices = q(2, &[], None);
        no_choices.answer.insert('a');

        let mut qs = vec![q(1, &[], None), no_answer, complete.clone(), no_choices];
        assert_eq!(prune(&mut qs), 3);
        assert_eq!(qs, vec![complete]);
    }
}
