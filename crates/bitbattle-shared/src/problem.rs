use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{Difficulty, Language};

/// One test case: input fed to the submission on stdin, expected stdout.
///
/// Matching is byte-exact on the trimmed stdout of the candidate process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
            explanation: None,
        }
    }
}

/// A full problem record. `hidden_tests` never leave the server, which is
/// why `Problem` itself is not serializable -- clients only ever see a
/// [`PublicProblem`].
#[derive(Debug, Clone)]
pub struct Problem {
    pub id: String,
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    /// Shown to clients alongside the description.
    pub examples: Vec<TestCase>,
    /// Used to judge submissions; server-side only.
    pub hidden_tests: Vec<TestCase>,
    pub starter_code: HashMap<Language, String>,
    pub tags: Vec<String>,
    pub time_limit_minutes: Option<u32>,
}

impl Problem {
    pub fn public(&self) -> PublicProblem {
        PublicProblem {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            difficulty: self.difficulty,
            examples: self.examples.clone(),
            starter_code: self.starter_code.clone(),
            tags: self.tags.clone(),
            time_limit_minutes: self.time_limit_minutes,
        }
    }
}

/// The client-facing view of a problem: everything except the hidden tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicProblem {
    pub id: String,
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub examples: Vec<TestCase>,
    pub starter_code: HashMap<Language, String>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_limit_minutes: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_view_strips_hidden_tests() {
        let problem = Problem {
            id: "sum-two".into(),
            title: "Sum".into(),
            description: "Add two numbers".into(),
            difficulty: Difficulty::Easy,
            examples: vec![TestCase::new("1 2", "3")],
            hidden_tests: vec![TestCase::new("40 2", "42")],
            starter_code: HashMap::new(),
            tags: vec!["math".into()],
            time_limit_minutes: Some(10),
        };

        let json = serde_json::to_value(problem.public()).unwrap();
        assert_eq!(json["id"], "sum-two");
        assert!(json.get("hidden_tests").is_none());
        assert_eq!(json["examples"][0]["input"], "1 2");
    }
}
