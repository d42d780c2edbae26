// src/testcases.rs
//! Exercise test cases and the store that serves them.

use async_trait::async_trait;
use log::{debug, info};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::ExecutorError;

/// Placeholder in test-case fragments for the analyzed entry class.
pub const ENTRYPOINT_PLACEHOLDER: &str = "${ENTRYPOINT_CLASS_NAME}";

const TEST_CASES_SUFFIX: &str = ".tc";
const TEMPLATE_SUFFIX: &str = ".template.java";

/// One graded call against the learner's code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub id: Uuid,
    /// Statements run before the call, e.g. building the input.
    pub setup: String,
    /// Argument list passed to `func_name`.
    pub call: String,
    /// Java expression producing the expected value.
    pub expected: String,
    pub func_name: String,
    pub display: String,
    pub display_res: String,
    pub is_public: bool,
}

/// Parses every `<tc>...</tc>` block of a test-case document.
///
/// Parsing stops at the first `<tc>` without a closing tag. Inside a block,
/// every tag except `<id>` is required.
pub fn parse_test_cases(document: &str, entrypoint_class: &str) -> Result<Vec<TestCase>, ExecutorError> {
    let mut cases = Vec::new();
    let mut offset = 0;

    while let Some((body, next)) = tag_contents(document, "tc", offset) {
        offset = next;
        let index = cases.len();
        let field = |tag: &str| -> Result<String, ExecutorError> {
            tag_contents(body, tag, 0)
                .map(|(text, _)| text.replace(ENTRYPOINT_PLACEHOLDER, entrypoint_class))
                .ok_or_else(|| ExecutorError::config_error(format!("test case {index} has no <{tag}>")))
        };

        let id = match tag_contents(body, "id", 0) {
            Some((raw, _)) => Uuid::parse_str(raw)
                .map_err(|e| ExecutorError::config_error(format!("test case {index} id: {e}")))?,
            None => Uuid::new_v4(),
        };

        cases.push(TestCase {
            id,
            setup: field("setup")?,
            call: field("call")?,
            expected: field("expected")?,
            func_name: field("funcName")?,
            display: field("display")?,
            display_res: field("displayRes")?,
            is_public: field("public")?.eq_ignore_ascii_case("true"),
        });
    }

    debug!("parsed {} test cases", cases.len());
    Ok(cases)
}

/// Trimmed text between `<tag>` and `</tag>`, and the offset after the closing tag.
fn tag_contents<'a>(text: &'a str, tag: &str, from: usize) -> Option<(&'a str, usize)> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.get(from..)?.find(&open)? + from + open.len();
    let end = text[start..].find(&close)? + start;
    Some((text[start..end].trim(), end + close.len()))
}

/// Source of test cases and optional code templates, keyed by exercise id.
#[async_trait]
pub trait ExerciseStore: Send + Sync {
    /// Raw test-case document of an exercise.
    async fn test_cases(&self, exercise_id: Uuid) -> Result<String, ExecutorError>;

    /// Starter code the submission has to stay signature-compatible with.
    async fn template(&self, exercise_id: Uuid) -> Result<Option<String>, ExecutorError>;
}

#[derive(Debug, Clone, Default)]
struct Exercise {
    test_cases: String,
    template: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryExerciseStore {
    exercises: Arc<RwLock<HashMap<Uuid, Exercise>>>,
}

impl InMemoryExerciseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, exercise_id: Uuid, test_cases: impl Into<String>, template: Option<String>) {
        self.exercises.write().await.insert(
            exercise_id,
            Exercise {
                test_cases: test_cases.into(),
                template,
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.exercises.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.exercises.read().await.is_empty()
    }

    /// Loads `<exerciseId>.tc` and `<exerciseId>.template.java` files.
    /// Files whose stem is not a UUID are ignored.
    pub async fn load_dir(&self, dir: impl AsRef<Path>) -> Result<usize, ExecutorError> {
        let dir = dir.as_ref();
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut loaded = HashMap::<Uuid, Exercise>::new();

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let (stem, is_template) = if let Some(stem) = file_name.strip_suffix(TEMPLATE_SUFFIX) {
                (stem, true)
            } else if let Some(stem) = file_name.strip_suffix(TEST_CASES_SUFFIX) {
                (stem, false)
            } else {
                continue;
            };
            let Ok(exercise_id) = Uuid::parse_str(stem) else {
                debug!("skipping {}: not an exercise id", file_name);
                continue;
            };

            let contents = tokio::fs::read_to_string(entry.path()).await?;
            let exercise = loaded.entry(exercise_id).or_default();
            if is_template {
                exercise.template = Some(contents);
            } else {
                exercise.test_cases = contents;
            }
        }

        let count = loaded.len();
        self.exercises.write().await.extend(loaded);
        info!("loaded {} exercises from {}", count, dir.display());
        Ok(count)
    }
}

#[async_trait]
impl ExerciseStore for InMemoryExerciseStore {
    async fn test_cases(&self, exercise_id: Uuid) -> Result<String, ExecutorError> {
        self.exercises
            .read()
            .await
            .get(&exercise_id)
            .map(|e| e.test_cases.clone())
            .ok_or_else(|| ExecutorError::invalid_request("unknown exercise"))
    }

    async fn template(&self, exercise_id: Uuid) -> Result<Option<String>, ExecutorError> {
        Ok(self
            .exercises
            .read()
            .await
            .get(&exercise_id)
            .and_then(|e| e.template.clone()))
    }
}
