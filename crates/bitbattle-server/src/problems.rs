//! The in-memory problem repository.
//!
//! Problems are immutable and seeded at startup; selection is uniform
//! random over the difficulty filter, excluding problems the participants
//! have seen recently. When the exclusion empties the candidate set the
//! repository falls back to the full filter-matching set.

use std::collections::{HashMap, HashSet, VecDeque};

use tokio::sync::Mutex;

use bitbattle_shared::{Difficulty, DifficultyFilter, Language, Problem, TestCase};

/// How many recently seen problem ids are remembered per username.
const RECENT_HISTORY_DEPTH: usize = 10;

pub struct ProblemRepository {
    problems: Vec<Problem>,
    by_id: HashMap<String, usize>,
    recent: Mutex<HashMap<String, VecDeque<String>>>,
}

impl ProblemRepository {
    pub fn new() -> Self {
        Self::with_problems(builtin_problems())
    }

    pub fn with_problems(problems: Vec<Problem>) -> Self {
        let by_id = problems
            .iter()
            .enumerate()
            .map(|(index, p)| (p.id.clone(), index))
            .collect();
        Self {
            problems,
            by_id,
            recent: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Problem> {
        self.by_id.get(id).map(|&index| &self.problems[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Problem> {
        self.problems.iter()
    }

    /// Uniform random choice over problems matching `filter` and not in
    /// `excluding`; falls back to the full filter-matching set when the
    /// exclusion leaves nothing.
    pub fn choose(&self, filter: DifficultyFilter, excluding: &HashSet<String>) -> Option<Problem> {
        fn pick<'a>(set: &[&'a Problem]) -> Option<&'a Problem> {
            if set.is_empty() {
                None
            } else {
                Some(set[fastrand::usize(..set.len())])
            }
        }

        let matching: Vec<&Problem> = self
            .problems
            .iter()
            .filter(|p| filter.matches(p.difficulty))
            .collect();

        let fresh: Vec<&Problem> = matching
            .iter()
            .copied()
            .filter(|p| !excluding.contains(&p.id))
            .collect();

        pick(&fresh).or_else(|| pick(&matching)).cloned()
    }

    /// Union of the recent history of every given username.
    pub async fn recently_seen(&self, usernames: &[String]) -> HashSet<String> {
        let recent = self.recent.lock().await;
        usernames
            .iter()
            .filter_map(|name| recent.get(name))
            .flatten()
            .cloned()
            .collect()
    }

    /// Record that these players were just assigned `problem_id`.
    pub async fn note_seen(&self, usernames: &[String], problem_id: &str) {
        let mut recent = self.recent.lock().await;
        for name in usernames {
            let history = recent.entry(name.clone()).or_default();
            history.push_back(problem_id.to_string());
            while history.len() > RECENT_HISTORY_DEPTH {
                history.pop_front();
            }
        }
    }
}

impl Default for ProblemRepository {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Built-in problem set
// ---------------------------------------------------------------------------

fn starter(entries: &[(Language, &str)]) -> HashMap<Language, String> {
    entries
        .iter()
        .map(|(lang, code)| (*lang, code.trim_start().to_string()))
        .collect()
}

fn builtin_problems() -> Vec<Problem> {
    vec![
        Problem {
            id: "two-sum".to_string(),
            title: "Two Sum".to_string(),
            description: "Given an array of integers and a target, print the indices of the \
two numbers that add up to the target, in ascending order.\n\n\
Input: line 1 holds the space-separated array, line 2 the target.\n\
Output: the two indices separated by a space."
                .to_string(),
            difficulty: Difficulty::Easy,
            examples: vec![
                TestCase {
                    input: "2 7 11 15\n9".to_string(),
                    expected_output: "0 1".to_string(),
                    explanation: Some("2 + 7 == 9, at indices 0 and 1.".to_string()),
                },
                TestCase::new("3 2 4\n6", "1 2"),
            ],
            hidden_tests: vec![
                TestCase::new("2 7 11 15\n9", "0 1"),
                TestCase::new("3 2 4\n6", "1 2"),
                TestCase::new("3 3\n6", "0 1"),
                TestCase::new("-1 0 5 4\n3", "0 3"),
            ],
            starter_code: starter(&[
                (
                    Language::Python,
                    r#"
import sys

def solve(nums, target):
    # Your solution here
    pass

lines = sys.stdin.read().split("\n")
nums = [int(x) for x in lines[0].split()]
target = int(lines[1])
i, j = solve(nums, target)
print(i, j)
"#,
                ),
                (
                    Language::JavaScript,
                    r#"
const lines = require("fs").readFileSync(0, "utf8").split("\n");
const nums = lines[0].split(" ").map(Number);
const target = Number(lines[1]);

function solve(nums, target) {
  // Your solution here
}

const [i, j] = solve(nums, target);
console.log(`${i} ${j}`);
"#,
                ),
            ]),
            tags: vec!["array".to_string(), "hash-table".to_string()],
            time_limit_minutes: Some(15),
        },
        Problem {
            id: "reverse-string".to_string(),
            title: "Reverse String".to_string(),
            description: "Read one line and print it reversed.".to_string(),
            difficulty: Difficulty::Easy,
            examples: vec![TestCase::new("hello", "olleh")],
            hidden_tests: vec![
                TestCase::new("hello", "olleh"),
                TestCase::new("Hannah", "hannaH"),
                TestCase::new("a", "a"),
            ],
            starter_code: starter(&[
                (
                    Language::Python,
                    r#"
import sys

s = sys.stdin.readline().rstrip("\n")
# Your solution here
"#,
                ),
                (
                    Language::JavaScript,
                    r#"
const s = require("fs").readFileSync(0, "utf8").trimEnd();
// Your solution here
"#,
                ),
            ]),
            tags: vec!["string".to_string(), "two-pointers".to_string()],
            time_limit_minutes: Some(10),
        },
        Problem {
            id: "valid-parentheses".to_string(),
            title: "Valid Parentheses".to_string(),
            description: "Given a string of the characters ()[]{} decide whether every \
bracket is closed by the matching bracket in the correct order. Print \"true\" or \
\"false\"."
                .to_string(),
            difficulty: Difficulty::Easy,
            examples: vec![
                TestCase::new("()[]{}", "true"),
                TestCase::new("(]", "false"),
            ],
            hidden_tests: vec![
                TestCase::new("()", "true"),
                TestCase::new("()[()]", "true"),
                TestCase::new("([)]", "false"),
                TestCase::new("(((", "false"),
            ],
            starter_code: starter(&[
                (
                    Language::Python,
                    r#"
import sys

s = sys.stdin.readline().rstrip("\n")

def is_valid(s):
    # Your solution here
    pass

print("true" if is_valid(s) else "false")
"#,
                ),
                (
                    Language::JavaScript,
                    r#"
const s = require("fs").readFileSync(0, "utf8").trimEnd();

function isValid(s) {
  // Your solution here
}

console.log(isValid(s) ? "true" : "false");
"#,
                ),
            ]),
            tags: vec!["stack".to_string(), "string".to_string()],
            time_limit_minutes: Some(15),
        },
        Problem {
            id: "maximum-subarray".to_string(),
            title: "Maximum Subarray".to_string(),
            description: "Given a space-separated array of integers, print the largest sum \
of any contiguous subarray."
                .to_string(),
            difficulty: Difficulty::Medium,
            examples: vec![TestCase {
                input: "-2 1 -3 4 -1 2 1 -5 4".to_string(),
                expected_output: "6".to_string(),
                explanation: Some("The subarray 4 -1 2 1 sums to 6.".to_string()),
            }],
            hidden_tests: vec![
                TestCase::new("-2 1 -3 4 -1 2 1 -5 4", "6"),
                TestCase::new("1", "1"),
                TestCase::new("5 4 -1 7 8", "23"),
                TestCase::new("-3 -1 -2", "-1"),
            ],
            starter_code: starter(&[
                (
                    Language::Python,
                    r#"
import sys

nums = [int(x) for x in sys.stdin.read().split()]
# Your solution here
"#,
                ),
                (
                    Language::Rust,
                    r#"
use std::io::Read;

fn main() {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input).unwrap();
    let nums: Vec<i64> = input
        .split_whitespace()
        .map(|x| x.parse().unwrap())
        .collect();
    // Your solution here
}
"#,
                ),
            ]),
            tags: vec!["array".to_string(), "dynamic-programming".to_string()],
            time_limit_minutes: Some(20),
        },
        Problem {
            id: "longest-substring".to_string(),
            title: "Longest Substring Without Repeating Characters".to_string(),
            description: "Read one line and print the length of its longest substring \
without repeating characters."
                .to_string(),
            difficulty: Difficulty::Medium,
            examples: vec![TestCase {
                input: "abcabcbb".to_string(),
                expected_output: "3".to_string(),
                explanation: Some("\"abc\" has length 3.".to_string()),
            }],
            hidden_tests: vec![
                TestCase::new("abcabcbb", "3"),
                TestCase::new("bbbbb", "1"),
                TestCase::new("pwwkew", "3"),
                TestCase::new("dvdf", "3"),
            ],
            starter_code: starter(&[
                (
                    Language::Python,
                    r#"
import sys

s = sys.stdin.readline().rstrip("\n")
# Your solution here
"#,
                ),
                (
                    Language::JavaScript,
                    r#"
const s = require("fs").readFileSync(0, "utf8").trimEnd();
// Your solution here
"#,
                ),
            ]),
            tags: vec!["string".to_string(), "sliding-window".to_string()],
            time_limit_minutes: Some(20),
        },
        Problem {
            id: "trapping-rain-water".to_string(),
            title: "Trapping Rain Water".to_string(),
            description: "Given a space-separated elevation map, print how much water it \
traps after raining."
                .to_string(),
            difficulty: Difficulty::Hard,
            examples: vec![TestCase::new("0 1 0 2 1 0 1 3 2 1 2 1", "6")],
            hidden_tests: vec![
                TestCase::new("0 1 0 2 1 0 1 3 2 1 2 1", "6"),
                TestCase::new("4 2 0 3 2 5", "9"),
                TestCase::new("1 2 3", "0"),
            ],
            starter_code: starter(&[
                (
                    Language::Python,
                    r#"
import sys

height = [int(x) for x in sys.stdin.read().split()]
# Your solution here
"#,
                ),
                (
                    Language::JavaScript,
                    r#"
const height = require("fs").readFileSync(0, "utf8").trim().split(" ").map(Number);
// Your solution here
"#,
                ),
            ]),
            tags: vec!["array".to_string(), "two-pointers".to_string()],
            time_limit_minutes: Some(30),
        },
        Problem {
            id: "median-two-sorted-arrays".to_string(),
            title: "Median of Two Sorted Arrays".to_string(),
            description: "Given two sorted arrays, one per line, print their combined \
median with one decimal place."
                .to_string(),
            difficulty: Difficulty::Hard,
            examples: vec![
                TestCase::new("1 3\n2", "2.0"),
                TestCase::new("1 2\n3 4", "2.5"),
            ],
            hidden_tests: vec![
                TestCase::new("1 3\n2", "2.0"),
                TestCase::new("1 2\n3 4", "2.5"),
                TestCase::new("0 0\n0 0", "0.0"),
                TestCase::new("2\n", "2.0"),
            ],
            starter_code: starter(&[
                (
                    Language::Python,
                    r#"
import sys

lines = sys.stdin.read().split("\n")
a = [int(x) for x in lines[0].split()]
b = [int(x) for x in lines[1].split()] if len(lines) > 1 else []
# Your solution here; print the median formatted with one decimal place
"#,
                ),
                (
                    Language::JavaScript,
                    r#"
const lines = require("fs").readFileSync(0, "utf8").split("\n");
const a = lines[0].split(" ").filter(Boolean).map(Number);
const b = (lines[1] || "").split(" ").filter(Boolean).map(Number);
// Your solution here; print the median with one decimal place
"#,
                ),
            ]),
            tags: vec!["array".to_string(), "binary-search".to_string()],
            time_limit_minutes: Some(40),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_set_is_well_formed() {
        let repo = ProblemRepository::new();
        assert!(repo.iter().count() >= 5);
        for problem in repo.iter() {
            assert!(!problem.hidden_tests.is_empty(), "{} has no tests", problem.id);
            assert!(!problem.starter_code.is_empty());
            assert_eq!(repo.get(&problem.id).map(|p| &p.id), Some(&problem.id));
        }
        // Every difficulty is represented so an Any room always finds one.
        for difficulty in Difficulty::ALL {
            assert!(repo.iter().any(|p| p.difficulty == difficulty));
        }
    }

    #[test]
    fn choose_respects_filter() {
        let repo = ProblemRepository::new();
        for _ in 0..20 {
            let problem = repo
                .choose(DifficultyFilter::Easy, &HashSet::new())
                .expect("easy problems exist");
            assert_eq!(problem.difficulty, Difficulty::Easy);
        }
    }

    #[test]
    fn choose_excludes_then_falls_back() {
        let repo = ProblemRepository::new();
        let easy_ids: HashSet<String> = repo
            .iter()
            .filter(|p| p.difficulty == Difficulty::Easy)
            .map(|p| p.id.clone())
            .collect();

        // Exclude all but one: the survivor must be picked.
        let mut excluding = easy_ids.clone();
        let keep = excluding.iter().next().cloned().unwrap();
        excluding.remove(&keep);
        let chosen = repo.choose(DifficultyFilter::Easy, &excluding).unwrap();
        assert_eq!(chosen.id, keep);

        // Excluding everything falls back to the full matching set.
        let chosen = repo.choose(DifficultyFilter::Easy, &easy_ids).unwrap();
        assert!(easy_ids.contains(&chosen.id));
    }

    #[tokio::test]
    async fn recent_history_is_bounded_and_per_user() {
        let repo = ProblemRepository::new();
        let players = vec!["alice".to_string()];

        for i in 0..(RECENT_HISTORY_DEPTH + 5) {
            repo.note_seen(&players, &format!("p{i}")).await;
        }
        let seen = repo.recently_seen(&players).await;
        assert_eq!(seen.len(), RECENT_HISTORY_DEPTH);
        assert!(!seen.contains("p0"));

        let others = repo.recently_seen(&["bob".to_string()]).await;
        assert!(others.is_empty());
    }
}
