// src/harness.rs
//! Splices grading code into a submission and reads it back from the output.
//!
//! Everything the harness prints is prefixed with a control marker built from
//! the job's signing key, so learner output can never forge a result line
//! without knowing the key.

use duckjudge_types::{
    DryExecuteResponse, ExecuteResponse, ExecutionStyle, RunOutput, SubmitExecuteResponse, TestResult,
};
use log::debug;
use uuid::Uuid;

use crate::analyzer::CodeAnalysisResult;
use crate::errors::ExecutorError;
use crate::testcases::TestCase;

pub const GSON_IMPORT: &str = "import com.google.gson.Gson;\n";

const ANSWER_TAG: &str = "answ";
const TIME_TAG: &str = "time";
const TEST_ID_FLAG: &str = "tc_id:";

fn control_marker(signing_key: Uuid, tag: &str) -> String {
    format!("ctr-{signing_key}-{tag}: ")
}

/// Helper identifiers must not start with a digit.
pub fn helper_prefix(seed: Uuid) -> String {
    format!("a{}", seed.simple())
}

/// Builds the source that is actually compiled for a job.
#[derive(Debug, Clone)]
pub struct HarnessBuilder {
    source: String,
    main_begin: usize,
    main_end: usize,
    signing_key: Uuid,
    prefix: String,
}

impl HarnessBuilder {
    /// `prefix_seed` is the exercise id for submissions and the execution id
    /// for dry runs.
    pub fn new(
        source: &str,
        analysis: &CodeAnalysisResult,
        signing_key: Uuid,
        prefix_seed: Uuid,
    ) -> Result<Self, ExecutorError> {
        let main = analysis
            .main_method
            .as_ref()
            .ok_or_else(|| ExecutorError::Validation("no entry point to instrument".to_string()))?;

        let source = match &main.synthesized {
            Some(entry) => entry.apply(source),
            None => source.to_string(),
        };

        Ok(Self {
            source,
            main_begin: main.span.begin,
            main_end: main.span.end,
            signing_key,
            prefix: helper_prefix(prefix_seed),
        })
    }

    fn insert_at_main_start(&mut self, code: &str) {
        self.source.insert_str(self.main_begin + 1, code);
        self.main_end += code.len();
    }

    fn insert_at_main_end(&mut self, code: &str) {
        self.source.insert_str(self.main_end, code);
        self.main_end += code.len();
    }

    fn insert_at_file_start(&mut self, code: &str) {
        self.source.insert_str(0, code);
        self.main_begin += code.len();
        self.main_end += code.len();
    }

    fn signed_print(&self, tag: &str, contents: &str) -> String {
        format!(
            "System.out.println(\"{}\" + {});\n",
            control_marker(self.signing_key, tag),
            contents
        )
    }

    /// Records wall-clock time around the original body of `main`.
    pub fn insert_timing(&mut self) -> &mut Self {
        let start = format!("{}_start", self.prefix);
        let end = format!("{}_end", self.prefix);

        self.insert_at_main_start(&format!("long {start} = System.currentTimeMillis();\n"));
        self.insert_at_main_end(&format!("long {end} = System.currentTimeMillis();\n"));
        let print = self.signed_print(TIME_TAG, &format!("({end} - {start})"));
        self.insert_at_main_end(&print);
        self
    }

    /// Appends a signed comparison line for every test case.
    pub fn insert_test_cases(&mut self, cases: &[TestCase]) -> &mut Self {
        let gson = format!("{}_gson", self.prefix);
        self.insert_at_main_end(&format!("Gson {gson} = new Gson();\n"));

        for case in cases {
            if !case.setup.is_empty() {
                self.insert_at_main_end(&format!("{}\n", case.setup));
            }
            let comparison = format!(
                "\" {TEST_ID_FLAG}{} \" + {gson}.toJson({}).equals({gson}.toJson({}({})))",
                case.id, case.expected, case.func_name, case.call
            );
            let print = self.signed_print(ANSWER_TAG, &comparison);
            self.insert_at_main_end(&print);
        }
        self
    }

    pub fn insert_gson_import(&mut self) -> &mut Self {
        self.insert_at_file_start(GSON_IMPORT);
        self
    }

    /// Current body span of `main`, tracking every insertion so far.
    pub fn main_span(&self) -> (usize, usize) {
        (self.main_begin, self.main_end)
    }

    pub fn build(self) -> String {
        self.source
    }
}

/// Instruments a submission for `style`: timing always, test cases and the
/// Gson import for submissions only.
pub fn instrument(
    source: &str,
    analysis: &CodeAnalysisResult,
    style: ExecutionStyle,
    signing_key: Uuid,
    prefix_seed: Uuid,
    cases: &[TestCase],
) -> Result<String, ExecutorError> {
    let mut builder = HarnessBuilder::new(source, analysis, signing_key, prefix_seed)?;
    builder.insert_timing();
    if style == ExecutionStyle::Submit {
        builder.insert_test_cases(cases).insert_gson_import();
    }
    Ok(builder.build())
}

/// Splits a run's stdout into learner output, test results and timing.
pub fn parse_output(
    run: &RunOutput,
    signing_key: Uuid,
    style: ExecutionStyle,
) -> Result<ExecuteResponse, ExecutorError> {
    let marker_root = format!("ctr-{signing_key}-");
    let mut std_output = Vec::new();
    let mut test_results = Vec::new();
    let mut execution_time_ms = None;

    for line in run.out.lines() {
        let Some(at) = line.find(&marker_root) else {
            std_output.push(line);
            continue;
        };

        let control = &line[at + marker_root.len()..];
        if let Some(rest) = control.strip_prefix(ANSWER_TAG).and_then(|r| r.strip_prefix(": ")) {
            test_results.push(parse_test_result(rest)?);
        } else if let Some(rest) = control.strip_prefix(TIME_TAG).and_then(|r| r.strip_prefix(": ")) {
            let millis = rest
                .trim()
                .parse::<i64>()
                .map_err(|_| ExecutorError::MangledOutput("timing line".to_string()))?;
            execution_time_ms = Some(millis.max(0) as u64);
        } else {
            return Err(ExecutorError::MangledOutput("unknown control tag".to_string()));
        }
    }

    let std_output = std_output.join("\n");
    let execution_time_ms = execution_time_ms.unwrap_or_else(|| run.duration_ms());
    debug!(
        "parsed output: {} test results, {} ms",
        test_results.len(),
        execution_time_ms
    );

    Ok(match style {
        ExecutionStyle::Submit => ExecuteResponse::Submit(SubmitExecuteResponse {
            std_output,
            std_error: run.err.clone(),
            test_results,
            execution_time_ms,
        }),
        ExecutionStyle::Dry => ExecuteResponse::Dry(DryExecuteResponse {
            std_output,
            std_error: run.err.clone(),
            execution_time_ms,
        }),
    })
}

fn parse_test_result(line: &str) -> Result<TestResult, ExecutorError> {
    let mangled = || ExecutorError::MangledOutput("test result line".to_string());
    let start = line.find(TEST_ID_FLAG).ok_or_else(mangled)? + TEST_ID_FLAG.len();
    let rest = line[start..].trim_start();
    let (id, verdict) = rest.split_once(char::is_whitespace).ok_or_else(mangled)?;
    let test_id = Uuid::parse_str(id).map_err(|_| mangled())?;
    Ok(TestResult {
        test_id,
        passed: verdict.trim() == "true",
    })
}

/// Wraps learner code in tags only the job knows, before it is handed to any
/// text-generation step.
pub fn fence_user_code(source: &str, signing_key: Uuid) -> String {
    format!("<user-code-{signing_key}>\n{source}\n</user-code-{signing_key}>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::SourceAnalyzer;

    fn key() -> Uuid {
        Uuid::parse_str("70fcae06-b1ac-453b-b0a0-57812ba86cf4").unwrap()
    }

    fn run_output(out: &str) -> RunOutput {
        RunOutput {
            out: out.to_string(),
            err: String::new(),
            exit_code: 0,
            start_ns: 0,
            end_ns: 7_000_000,
            timed_out: false,
        }
    }

    fn case(expected: &str) -> TestCase {
        TestCase {
            id: Uuid::new_v4(),
            setup: "int[] xs = {1, 2};".to_string(),
            call: "xs".to_string(),
            expected: expected.to_string(),
            func_name: "Main.sum".to_string(),
            display: String::new(),
            display_res: String::new(),
            is_public: true,
        }
    }

    #[test]
    fn test_timing_wraps_main_body() {
        let src = "public class Main { public static void main(String[] a) { go(); } }";
        let analysis = SourceAnalyzer::new().analyze(src, ExecutionStyle::Dry).unwrap();
        let seed = Uuid::new_v4();
        let mut builder = HarnessBuilder::new(src, &analysis, key(), seed).unwrap();
        builder.insert_timing();
        let (begin, end) = builder.main_span();
        let out = builder.build();

        let prefix = helper_prefix(seed);
        let body = &out[begin..=end];
        assert!(body.starts_with(&format!("{{long {prefix}_start = System.currentTimeMillis();\n go();")));
        assert!(body.ends_with(&format!(
            "System.out.println(\"ctr-{}-time: \" + ({prefix}_end - {prefix}_start));\n}}",
            key()
        )));
    }

    #[test]
    fn test_submission_harness() {
        let src = "public class Main {\n    static int sum(int[] xs) { return xs[0] + xs[1]; }\n}\n";
        let analysis = SourceAnalyzer::new().analyze(src, ExecutionStyle::Submit).unwrap();
        let cases = [case("3")];
        let exercise = Uuid::new_v4();
        let out = instrument(src, &analysis, ExecutionStyle::Submit, key(), exercise, &cases).unwrap();

        let gson = format!("{}_gson", helper_prefix(exercise));
        assert!(out.starts_with(GSON_IMPORT));
        assert!(out.contains(&format!("Gson {gson} = new Gson();")));
        assert!(out.contains(&format!(
            "\" tc_id:{} \" + {gson}.toJson(3).equals({gson}.toJson(Main.sum(xs)))",
            cases[0].id
        )));
        assert!(out.contains("int[] xs = {1, 2};"));
        assert!(out.trim_end().ends_with(";\n}}"));
    }

    #[test]
    fn test_parse_output_separates_control_lines() {
        let id = Uuid::new_v4();
        let out = format!(
            "hello\nctr-{k}-answ:  tc_id:{id} true\nworld\nctr-{k}-time: 12\n",
            k = key()
        );
        let response = parse_output(&run_output(&out), key(), ExecutionStyle::Submit).unwrap();
        let ExecuteResponse::Submit(submit) = response else {
            panic!("expected a submit response");
        };
        assert_eq!(submit.std_output, "hello\nworld");
        assert_eq!(submit.execution_time_ms, 12);
        assert_eq!(submit.test_results, vec![TestResult { test_id: id, passed: true }]);
    }

    #[test]
    fn test_forged_markers_with_wrong_key_are_plain_output() {
        let out = format!("ctr-{}-answ:  tc_id:{} true", Uuid::new_v4(), Uuid::new_v4());
        let response = parse_output(&run_output(&out), key(), ExecutionStyle::Dry).unwrap();
        assert_eq!(response.std_output(), Some(out.as_str()));
    }

    #[test]
    fn test_unknown_control_tag_is_mangled() {
        let out = format!("ctr-{}-pwof: now", key());
        let err = parse_output(&run_output(&out), key(), ExecutionStyle::Dry).unwrap_err();
        assert!(matches!(err, ExecutorError::MangledOutput(_)));
    }

    #[test]
    fn test_missing_timing_falls_back_to_guest_clock() {
        let response = parse_output(&run_output("2"), key(), ExecutionStyle::Dry).unwrap();
        let ExecuteResponse::Dry(dry) = response else {
            panic!("expected a dry response");
        };
        assert_eq!(dry.execution_time_ms, 7);
    }

    #[test]
    fn test_fence_user_code() {
        let fenced = fence_user_code("class A {}", key());
        assert!(fenced.starts_with(&format!("<user-code-{}>", key())));
        assert!(fenced.ends_with(&format!("</user-code-{}>", key())));
    }
}
