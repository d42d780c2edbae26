//! Request handling inside the sandbox.
//!
//! Every request runs in its own scratch directory below `work_dir`, which
//! is removed when the request finishes.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use duckjudge_types::{
    CompileReply, CompileRequest, GuestReply, GuestRequest, HealthCheckRequest, HealthReply, RunOutput, RunReply,
    RunRequest,
};
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::TempDir;
use tokio::process::Command;

use crate::error::{GuestError, Result};

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub work_dir: PathBuf,
    /// Libraries both javac and java see.
    pub classpath: Vec<PathBuf>,
    /// Command prefix for javac, e.g. `["javac"]`.
    pub javac: Vec<String>,
    pub java: Vec<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/app/work"),
            classpath: vec![PathBuf::from("/app/lib/gson-2.13.1.jar")],
            javac: vec!["javac".to_string()],
            java: vec!["java".to_string()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct GuestAgent {
    settings: AgentSettings,
}

impl GuestAgent {
    pub fn new(settings: AgentSettings) -> Self {
        Self { settings }
    }

    /// Answers one decoded request. Failures become `err` replies.
    pub async fn handle(&self, request: GuestRequest) -> serde_json::Value {
        let kind = request.kind();
        let reply = match request {
            GuestRequest::Health(health) => to_value(self.health(&health).await),
            GuestRequest::Compile(compile) => to_value(self.compile(&compile).await),
            GuestRequest::Execute(run) => to_value(self.execute(&run).await),
        };
        reply.unwrap_or_else(|e| {
            warn!("failed to encode {} reply: {}", kind, e);
            error_reply(&e.to_string())
        })
    }

    async fn health(&self, request: &HealthCheckRequest) -> Result<HealthReply> {
        let mut hashes = BTreeMap::new();
        for path in &request.files_to_check {
            let contents = tokio::fs::read(path).await?;
            debug!("hashed {} ({} bytes)", path, contents.len());
            hashes.insert(path.clone(), format!("{:x}", Sha256::digest(&contents)));
        }
        Ok(GuestReply::Ok { body: hashes })
    }

    async fn compile(&self, request: &CompileRequest) -> Result<CompileReply> {
        if request.src_files.is_empty() {
            return Err(GuestError::invalid_request("missing source files"));
        }
        let scratch = self.scratch(&request.job_id.to_string())?;
        let src_dir = scratch.path().join("src");
        let out_dir = scratch.path().join("classes");
        tokio::fs::create_dir_all(&src_dir).await?;
        tokio::fs::create_dir_all(&out_dir).await?;

        let mut sources = Vec::with_capacity(request.src_files.len());
        for (stem, b64) in &request.src_files {
            let path = src_dir.join(format!("{}.java", plain_name(stem)?));
            tokio::fs::write(&path, decode(stem, b64)?).await?;
            sources.push(path);
        }

        info!("job {}: compiling {} source file(s)", request.job_id, sources.len());
        let started = epoch_ns();
        let output = command(&self.settings.javac)?
            .arg("-cp")
            .arg(self.classpath(None))
            .arg("-proc:none")
            .arg("-d")
            .arg(&out_dir)
            .args(&sources)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| GuestError::Spawn {
                program: self.settings.javac.join(" "),
                source,
            })?;
        info!(
            "job {}: javac exited with {:?} after {} ms",
            request.job_id,
            output.status.code(),
            epoch_ns().saturating_sub(started) / 1_000_000
        );

        if !output.status.success() {
            return Ok(GuestReply::Err {
                body: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(GuestReply::Ok {
            body: collect_classes(&out_dir)?,
        })
    }

    async fn execute(&self, request: &RunRequest) -> Result<RunReply> {
        let scratch = self.scratch(&request.job_id.to_string())?;
        for (name, b64) in &request.class_files {
            let path = scratch.path().join(relative_class_path(name)?);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, decode(name, b64)?).await?;
        }

        info!("job {}: running {}", request.job_id, request.entrypoint);
        let child = command(&self.settings.java)?
            .arg("-cp")
            .arg(self.classpath(Some(scratch.path())))
            .arg(&request.entrypoint)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| GuestError::Spawn {
                program: self.settings.java.join(" "),
                source,
            })?;

        let start_ns = epoch_ns();
        let limit = Duration::from_millis(request.timeout_ms);
        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(output) => {
                let output = output?;
                RunOutput {
                    out: String::from_utf8_lossy(&output.stdout).into_owned(),
                    err: String::from_utf8_lossy(&output.stderr).into_owned(),
                    exit_code: output.status.code().unwrap_or(-1),
                    start_ns,
                    end_ns: epoch_ns(),
                    timed_out: false,
                }
            }
            Err(_) => {
                warn!("job {}: killed after {:?}", request.job_id, limit);
                RunOutput {
                    out: String::new(),
                    err: String::new(),
                    exit_code: -1,
                    start_ns,
                    end_ns: epoch_ns(),
                    timed_out: true,
                }
            }
        };
        debug!(
            "job {}: exit code {} in {} ms",
            request.job_id,
            output.exit_code,
            output.duration_ms()
        );
        Ok(GuestReply::Ok { body: output })
    }

    fn scratch(&self, prefix: &str) -> Result<TempDir> {
        std::fs::create_dir_all(&self.settings.work_dir)?;
        Ok(tempfile::Builder::new()
            .prefix(&format!("{}-", prefix))
            .tempdir_in(&self.settings.work_dir)?)
    }

    fn classpath(&self, first: Option<&Path>) -> String {
        first
            .into_iter()
            .chain(self.settings.classpath.iter().map(PathBuf::as_path))
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":")
    }
}

fn to_value<T>(reply: Result<GuestReply<T>>) -> serde_json::Result<serde_json::Value>
where
    T: serde::Serialize,
{
    match reply {
        Ok(reply) => serde_json::to_value(reply),
        Err(e) => Ok(error_reply(&e.to_string())),
    }
}

pub fn error_reply(message: &str) -> serde_json::Value {
    serde_json::json!({ "$type": "err", "body": message })
}

fn command(prefix: &[String]) -> Result<Command> {
    let (program, args) = prefix
        .split_first()
        .ok_or_else(|| GuestError::invalid_request("empty command"))?;
    let mut command = Command::new(program);
    command.args(args);
    Ok(command)
}

fn decode(name: &str, b64: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(b64)
        .map_err(|e| GuestError::invalid_request(format!("{} is not valid base64: {}", name, e)))
}

/// A single path component.
fn plain_name(name: &str) -> Result<&str> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(GuestError::invalid_request(format!("bad file name {:?}", name)));
    }
    Ok(name)
}

/// A `/`-separated class file path that stays below its root.
fn relative_class_path(name: &str) -> Result<PathBuf> {
    let mut path = PathBuf::new();
    for part in name.split('/') {
        path.push(plain_name(part)?);
    }
    Ok(path)
}

/// Every `.class` file below `root`, keyed by its `/`-separated relative path.
fn collect_classes(root: &Path) -> Result<BTreeMap<String, String>> {
    let mut classes = BTreeMap::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "class") {
                let name = path
                    .strip_prefix(root)
                    .map_err(|e| GuestError::invalid_request(e.to_string()))?
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                classes.insert(name, STANDARD.encode(std::fs::read(&path)?));
            }
        }
    }
    Ok(classes)
}

fn epoch_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    struct Fixture {
        dir: TempDir,
        agent: GuestAgent,
    }

    /// An agent whose javac and java are shell scripts.
    fn fixture(javac: &str, java: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let javac_path = dir.path().join("javac.sh");
        let java_path = dir.path().join("java.sh");
        std::fs::write(&javac_path, javac).unwrap();
        std::fs::write(&java_path, java).unwrap();
        let agent = GuestAgent::new(AgentSettings {
            work_dir: dir.path().join("work"),
            classpath: vec![PathBuf::from("/opt/lib/gson.jar")],
            javac: vec!["sh".to_string(), javac_path.display().to_string()],
            java: vec!["sh".to_string(), java_path.display().to_string()],
        });
        Fixture { dir, agent }
    }

    /// Copies each source to `<out>/<Stem>.class`, prefixed with the classpath.
    const ECHO_JAVAC: &str = r#"
cp=""; out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -cp) cp="$2"; shift 2 ;;
    -d) out="$2"; shift 2 ;;
    -proc:none) shift ;;
    *) f=$(basename "$1" .java); { echo "$cp"; cat "$1"; } > "$out/$f.class"; shift ;;
  esac
done
"#;

    fn b64(text: &str) -> String {
        STANDARD.encode(text)
    }

    #[tokio::test]
    async fn test_health_hashes_files() {
        let fx = fixture("", "");
        let file = fx.dir.path().join("lib.jar");
        std::fs::write(&file, "abc").unwrap();
        let path = file.display().to_string();

        let reply = fx
            .agent
            .handle(GuestRequest::Health(HealthCheckRequest {
                files_to_check: vec![path.clone()],
            }))
            .await;
        assert_eq!(reply["$type"], "ok");
        assert_eq!(
            reply["body"][&path],
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_health_of_missing_file_is_err() {
        let fx = fixture("", "");
        let reply = fx
            .agent
            .handle(GuestRequest::Health(HealthCheckRequest {
                files_to_check: vec!["/definitely/not/here.jar".to_string()],
            }))
            .await;
        assert_eq!(reply["$type"], "err");
    }

    #[tokio::test]
    async fn test_compile_returns_class_files() {
        let fx = fixture(ECHO_JAVAC, "");
        let reply = fx
            .agent
            .handle(GuestRequest::Compile(CompileRequest {
                job_id: Uuid::new_v4(),
                src_files: BTreeMap::from([("Main".to_string(), b64("class Main {}"))]),
            }))
            .await;

        let reply: CompileReply = serde_json::from_value(reply).unwrap();
        let classes = reply.into_result().unwrap();
        let class = String::from_utf8(STANDARD.decode(&classes["Main.class"]).unwrap()).unwrap();
        assert_eq!(class, "/opt/lib/gson.jar\nclass Main {}");
    }

    #[tokio::test]
    async fn test_compile_errors_are_diagnostics() {
        let fx = fixture("echo \"Main.java:1: error: ';' expected\" >&2; exit 1", "");
        let reply = fx
            .agent
            .handle(GuestRequest::Compile(CompileRequest {
                job_id: Uuid::new_v4(),
                src_files: BTreeMap::from([("Main".to_string(), b64("class Main {"))]),
            }))
            .await;
        assert_eq!(reply, json!({ "$type": "err", "body": "Main.java:1: error: ';' expected\n" }));
    }

    #[tokio::test]
    async fn test_compile_rejects_path_traversal() {
        let fx = fixture(ECHO_JAVAC, "");
        let reply = fx
            .agent
            .handle(GuestRequest::Compile(CompileRequest {
                job_id: Uuid::new_v4(),
                src_files: BTreeMap::from([("../Main".to_string(), b64("class Main {}"))]),
            }))
            .await;
        assert_eq!(reply["$type"], "err");
    }

    #[tokio::test]
    async fn test_execute_captures_output() {
        let fx = fixture("", "echo \"args: $*\"; cat \"${2%%:*}/Main.class\"; echo oops >&2; exit 3");
        let reply = fx
            .agent
            .handle(GuestRequest::Execute(RunRequest {
                job_id: Uuid::new_v4(),
                entrypoint: "Main".to_string(),
                class_files: BTreeMap::from([("Main.class".to_string(), b64("bytecode"))]),
                timeout_ms: 5_000,
            }))
            .await;

        let output = serde_json::from_value::<RunReply>(reply).unwrap().into_result().unwrap();
        let mut lines = output.out.lines();
        let args = lines.next().unwrap();
        assert!(args.starts_with("args: -cp "));
        assert!(args.ends_with(":/opt/lib/gson.jar Main"));
        assert_eq!(lines.next(), Some("bytecode"));
        assert_eq!(output.err, "oops\n");
        assert_eq!(output.exit_code, 3);
        assert!(!output.timed_out);
        assert!(output.end_ns >= output.start_ns);
    }

    #[tokio::test]
    async fn test_execute_kills_hung_programs() {
        let fx = fixture("", "sleep 30");
        let reply = fx
            .agent
            .handle(GuestRequest::Execute(RunRequest {
                job_id: Uuid::new_v4(),
                entrypoint: "Main".to_string(),
                class_files: BTreeMap::new(),
                timeout_ms: 200,
            }))
            .await;

        let output = serde_json::from_value::<RunReply>(reply).unwrap().into_result().unwrap();
        assert!(output.timed_out);
        assert_eq!(output.exit_code, -1);
    }

    #[tokio::test]
    async fn test_scratch_directories_are_removed() {
        let fx = fixture(ECHO_JAVAC, "");
        fx.agent
            .handle(GuestRequest::Compile(CompileRequest {
                job_id: Uuid::new_v4(),
                src_files: BTreeMap::from([("Main".to_string(), b64("class Main {}"))]),
            }))
            .await;
        let leftovers = std::fs::read_dir(fx.dir.path().join("work")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_class_paths_stay_below_root() {
        assert_eq!(relative_class_path("pkg/Main.class").unwrap(), PathBuf::from("pkg/Main.class"));
        assert!(relative_class_path("../Main.class").is_err());
        assert!(relative_class_path("/etc/passwd").is_err());
    }
}
