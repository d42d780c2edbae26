// src/test_utils/sandbox.rs
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use duckjudge_types::{CompileReply, GuestReply, GuestRequest, HealthReply, RunOutput, RunReply, RunRequest};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::errors::ExecutorError;
use crate::executors::{GuestAddress, LaunchSpec, SandboxBackend, SandboxHandle};
use crate::pooler::FilesystemImage;
use crate::resources::{ImageFamily, Resources};

type RunScript = Arc<dyn Fn(&str) -> RunOutput + Send + Sync>;

#[derive(Default)]
struct Script {
    launch_failure: Option<String>,
    launch_delay: Option<Duration>,
    compile_error: Option<String>,
    run_delay: Option<Duration>,
    run: Option<RunScript>,
    launched: Vec<Uuid>,
    terminated: Vec<Uuid>,
}

/// A backend whose "guest" answers in-process.
///
/// Compilation echoes each source file back as its class file, so a run
/// script receives the instrumented source of the entry class and decides
/// what the program prints.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
    next_pid: Arc<AtomicU32>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A launch spec with a throwaway image, for tests that drive the backend directly.
    pub fn launch_spec(family: ImageFamily) -> LaunchSpec {
        let id = Uuid::new_v4();
        LaunchSpec {
            vm_id: Uuid::new_v4(),
            family,
            image: FilesystemImage {
                id,
                family,
                path: format!("/images/{}", id).into(),
                content_hash: None,
                built_at: SystemTime::now(),
            },
            resources: Resources::new(1.0, 256),
        }
    }

    pub fn fail_launches(&self, reason: Option<&str>) {
        self.lock().launch_failure = reason.map(str::to_string);
    }

    /// Makes every launch take `delay` after it has been recorded.
    pub fn delay_launches(&self, delay: Option<Duration>) {
        self.lock().launch_delay = delay;
    }

    pub fn fail_compilation(&self, diagnostics: Option<&str>) {
        self.lock().compile_error = diagnostics.map(str::to_string);
    }

    /// Makes every run hang for `delay` before answering.
    pub fn delay_runs(&self, delay: Duration) {
        self.lock().run_delay = Some(delay);
    }

    pub fn on_run<F>(&self, script: F)
    where
        F: Fn(&str) -> RunOutput + Send + Sync + 'static,
    {
        self.lock().run = Some(Arc::new(script));
    }

    pub fn launched(&self) -> Vec<Uuid> {
        self.lock().launched.clone()
    }

    pub fn terminated(&self) -> Vec<Uuid> {
        self.lock().terminated.clone()
    }

    /// Plain stdout with zeroed timings.
    pub fn output(out: &str) -> RunOutput {
        RunOutput {
            out: out.to_string(),
            err: String::new(),
            exit_code: 0,
            start_ns: 0,
            end_ns: 0,
            timed_out: false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn execute(&self, request: &RunRequest, timeout: Duration) -> Result<RunReply, ExecutorError> {
        let (delay, script) = {
            let script = self.lock();
            (script.run_delay, script.run.clone())
        };
        if let Some(delay) = delay {
            if tokio::time::timeout(timeout, tokio::time::sleep(delay)).await.is_err() {
                return Err(ExecutorError::TimedOut);
            }
        }

        let class_file = format!("{}.class", request.entrypoint);
        let source = request
            .class_files
            .get(&class_file)
            .and_then(|b64| STANDARD.decode(b64).ok())
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .ok_or_else(|| ExecutorError::infrastructure(format!("no class file {}", class_file)))?;

        let output = match script {
            Some(run) => run(&source),
            None => Self::output(""),
        };
        Ok(GuestReply::Ok { body: output })
    }
}

fn to_value<T: serde::Serialize>(reply: T) -> Result<serde_json::Value, ExecutorError> {
    Ok(serde_json::to_value(reply)?)
}

#[async_trait]
impl SandboxBackend for ScriptedBackend {
    async fn launch(&self, spec: &LaunchSpec) -> Result<SandboxHandle, ExecutorError> {
        let delay = {
            let mut script = self.lock();
            if let Some(reason) = &script.launch_failure {
                return Err(ExecutorError::infrastructure(reason.clone()));
            }
            script.launched.push(spec.vm_id);
            script.launch_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst) + 1000;
        Ok(SandboxHandle {
            vm_id: spec.vm_id,
            family: spec.family,
            guest: GuestAddress::Tcp(format!("scripted:{}", pid)),
            port: None,
            container_id: None,
            pid: Some(pid),
        })
    }

    async fn query(
        &self,
        _handle: &SandboxHandle,
        request: &GuestRequest,
        timeout: Duration,
    ) -> Result<serde_json::Value, ExecutorError> {
        match request {
            GuestRequest::Health(health) => {
                let hashes = health
                    .files_to_check
                    .iter()
                    .map(|path| (path.clone(), "0".repeat(64)))
                    .collect::<BTreeMap<_, _>>();
                to_value::<HealthReply>(GuestReply::Ok { body: hashes })
            }
            GuestRequest::Compile(compile) => {
                if let Some(diagnostics) = self.lock().compile_error.clone() {
                    return to_value::<CompileReply>(GuestReply::Err { body: diagnostics });
                }
                let classes = compile
                    .src_files
                    .iter()
                    .map(|(stem, b64)| (format!("{}.class", stem), b64.clone()))
                    .collect::<BTreeMap<_, _>>();
                to_value::<CompileReply>(GuestReply::Ok { body: classes })
            }
            GuestRequest::Execute(run) => to_value(self.execute(run, timeout).await?),
        }
    }

    async fn terminate(&self, handle: &SandboxHandle) -> Result<(), ExecutorError> {
        self.lock().terminated.push(handle.vm_id);
        Ok(())
    }
}
