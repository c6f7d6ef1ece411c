//! The submission pipeline.
//!
//! Runs every hidden test of a problem through the sandbox, sequentially
//! within one submission, and aggregates the full per-test diagnostics --
//! stop-on-first-fail is deliberately not done so clients always see the
//! whole picture. Sandbox failures (timeout, OOM, crashes, an unreachable
//! backend) surface inside the per-test `error`, never as a transport
//! error. Retried submissions are deduplicated within a short window.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::info;

use bitbattle_sandbox::{SandboxOutput, SandboxRequest, SandboxRunner};
use bitbattle_shared::{Language, Problem, SubmissionResult, TestCase, TestResult};

const IDEMPOTENCY_WINDOW: Duration = Duration::from_secs(10);
const STDERR_SNIPPET_LEN: usize = 400;

pub struct Pipeline {
    sandbox: Arc<SandboxRunner>,
    recent: Mutex<HashMap<u64, (Instant, SubmissionResult)>>,
}

impl Pipeline {
    pub fn new(sandbox: Arc<SandboxRunner>) -> Self {
        Self {
            sandbox,
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Judge one submission against every hidden test of `problem`.
    pub async fn submit(
        &self,
        username: &str,
        room_id: Option<&str>,
        problem: &Problem,
        language: Language,
        source: &str,
    ) -> SubmissionResult {
        let key = idempotency_key(username, room_id, &problem.id, language, source);
        if let Some(cached) = self.lookup(key).await {
            info!(username, problem = %problem.id, "duplicate submission, serving cached result");
            return cached;
        }

        let mut test_results = Vec::with_capacity(problem.hidden_tests.len());
        let mut execution_time_ms = 0u64;
        let mut runtime_error = false;

        for test in &problem.hidden_tests {
            let test_result = self.run_test(language, source, test).await;
            execution_time_ms += test_result.time_ms;
            runtime_error |= test_result.error.is_some();
            test_results.push(test_result);
        }

        let total_tests = test_results.len();
        let passed_tests = test_results.iter().filter(|t| t.passed).count();
        let result = SubmissionResult {
            passed: passed_tests == total_tests && !runtime_error,
            passed_tests,
            total_tests,
            test_results,
            execution_time_ms,
        };

        info!(
            username,
            problem = %problem.id,
            language = %language,
            passed = result.passed,
            passed_tests,
            total_tests,
            execution_time_ms,
            "submission judged"
        );

        self.remember(key, result.clone()).await;
        result
    }

    async fn run_test(&self, language: Language, source: &str, test: &TestCase) -> TestResult {
        let request = SandboxRequest {
            language,
            source: source.to_string(),
            stdin: test.input.clone(),
        };
        match self.sandbox.run(request).await {
            Ok(output) => evaluate(test, &output),
            Err(e) => TestResult {
                input: test.input.clone(),
                expected: test.expected_output.clone(),
                actual: String::new(),
                passed: false,
                time_ms: 0,
                error: Some(format!("sandbox unavailable: {e}")),
            },
        }
    }

    async fn lookup(&self, key: u64) -> Option<SubmissionResult> {
        let mut recent = self.recent.lock().await;
        let now = Instant::now();
        recent.retain(|_, (at, _)| now.duration_since(*at) < IDEMPOTENCY_WINDOW);
        recent.get(&key).map(|(_, result)| result.clone())
    }

    async fn remember(&self, key: u64, result: SubmissionResult) {
        self.recent.lock().await.insert(key, (Instant::now(), result));
    }
}

/// Judge one sandbox run against the expected output: trimmed, byte-exact.
fn evaluate(test: &TestCase, output: &SandboxOutput) -> TestResult {
    let actual = output.stdout.trim().to_string();

    let error = if output.timed_out {
        Some(format!("time limit exceeded after {} ms", output.duration_ms))
    } else if output.oom {
        Some("memory limit exceeded".to_string())
    } else if output.exit_code != 0 {
        Some(failure_reason(&output.stderr, output.exit_code))
    } else {
        None
    };

    let passed = error.is_none() && actual == test.expected_output.trim();

    TestResult {
        input: test.input.clone(),
        expected: test.expected_output.clone(),
        actual,
        passed,
        time_ms: output.duration_ms,
        error,
    }
}

fn failure_reason(stderr: &str, exit_code: i64) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        return format!("process exited with status {exit_code}");
    }
    let mut snippet: String = stderr.chars().take(STDERR_SNIPPET_LEN).collect();
    if snippet.len() < stderr.len() {
        snippet.push_str("...");
    }
    snippet
}

fn idempotency_key(
    username: &str,
    room_id: Option<&str>,
    problem_id: &str,
    language: Language,
    source: &str,
) -> u64 {
    let mut hasher = DefaultHasher::new();
    username.hash(&mut hasher);
    room_id.hash(&mut hasher);
    problem_id.hash(&mut hasher);
    language.as_str().hash(&mut hasher);
    source.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox_output(stdout: &str) -> SandboxOutput {
        SandboxOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: 0,
            duration_ms: 10,
            timed_out: false,
            oom: false,
        }
    }

    #[test]
    fn comparison_is_trimmed_byte_exact() {
        let test = TestCase::new("1 2", "3");
        assert!(evaluate(&test, &sandbox_output("3\n")).passed);
        assert!(evaluate(&test, &sandbox_output("  3  ")).passed);
        assert!(!evaluate(&test, &sandbox_output("3.0")).passed);
        assert!(!evaluate(&test, &sandbox_output("")).passed);
    }

    #[test]
    fn timeout_preserves_partial_output() {
        let test = TestCase::new("1 2", "3");
        let output = SandboxOutput {
            stdout: "partial".to_string(),
            stderr: String::new(),
            exit_code: -1,
            duration_ms: 5000,
            timed_out: true,
            oom: false,
        };
        let result = evaluate(&test, &output);
        assert!(!result.passed);
        assert_eq!(result.actual, "partial");
        assert!(result.error.as_deref().unwrap().contains("time limit"));
    }

    #[test]
    fn oom_and_crash_are_reported() {
        let test = TestCase::new("x", "y");
        let oom = SandboxOutput {
            oom: true,
            ..sandbox_output("")
        };
        assert_eq!(
            evaluate(&test, &oom).error.as_deref(),
            Some("memory limit exceeded")
        );

        let crash = SandboxOutput {
            exit_code: 1,
            stderr: "SyntaxError: unexpected token".to_string(),
            ..sandbox_output("")
        };
        let result = evaluate(&test, &crash);
        assert!(result.error.as_deref().unwrap().contains("SyntaxError"));

        let silent_crash = SandboxOutput {
            exit_code: 139,
            ..sandbox_output("y")
        };
        // A correct-looking stdout does not rescue a crashed process.
        let result = evaluate(&test, &silent_crash);
        assert!(!result.passed);
        assert!(result.error.as_deref().unwrap().contains("139"));
    }

    #[test]
    fn long_stderr_is_truncated() {
        let reason = failure_reason(&"e".repeat(2000), 1);
        assert!(reason.len() <= STDERR_SNIPPET_LEN + 3);
        assert!(reason.ends_with("..."));
    }

    #[test]
    fn idempotency_key_tracks_all_inputs() {
        let base = idempotency_key("alice", Some("ROOM-A-1234"), "two-sum", Language::Python, "x");
        assert_eq!(
            base,
            idempotency_key("alice", Some("ROOM-A-1234"), "two-sum", Language::Python, "x")
        );
        assert_ne!(
            base,
            idempotency_key("bob", Some("ROOM-A-1234"), "two-sum", Language::Python, "x")
        );
        assert_ne!(
            base,
            idempotency_key("alice", None, "two-sum", Language::Python, "x")
        );
        assert_ne!(
            base,
            idempotency_key("alice", Some("ROOM-A-1234"), "two-sum", Language::Python, "y")
        );
        assert_ne!(
            base,
            idempotency_key("alice", Some("ROOM-A-1234"), "two-sum", Language::Rust, "x")
        );
    }
}
