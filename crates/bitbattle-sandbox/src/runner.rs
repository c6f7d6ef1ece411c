use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::StreamExt;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::language;
use crate::{Result, SandboxError, SandboxLimits, SandboxOutput, SandboxRequest};

/// Runs submissions in throw-away containers.
///
/// The runner holds a Docker handle and a counting semaphore; `run` acquires
/// a permit (FIFO, bounded wait), creates a container with the limits from
/// [`SandboxLimits`], executes the submission, and tears the container down
/// again -- including when the calling task is cancelled mid-run.
pub struct SandboxRunner {
    docker: Docker,
    image: String,
    limits: SandboxLimits,
    permits: Arc<Semaphore>,
    seq: AtomicU64,
}

impl SandboxRunner {
    pub fn new(image: String, concurrency: usize, limits: SandboxLimits) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        debug!(image = %image, concurrency, "sandbox runner ready");
        Ok(Self {
            docker,
            image,
            limits,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            seq: AtomicU64::new(0),
        })
    }

    /// `min(host_cpu, 8)` -- the default sandbox slot count.
    pub fn default_concurrency() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(8)
    }

    /// Execute one submission against one stdin.
    ///
    /// Timeouts and OOM kills are reported in the returned [`SandboxOutput`],
    /// not as errors; `Err` means the sandbox itself failed (no slot in time,
    /// Docker unreachable).
    pub async fn run(&self, request: SandboxRequest) -> Result<SandboxOutput> {
        let _permit = match timeout(self.limits.queue_deadline, self.permits.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(SandboxError::Closed),
            Err(_) => return Err(SandboxError::QueueDeadline(self.limits.queue_deadline)),
        };

        let name = format!(
            "bitbattle-{}-{}",
            std::process::id(),
            self.seq.fetch_add(1, Ordering::Relaxed)
        );
        debug!(container = %name, language = %request.language, "sandbox invocation");

        let config = self.container_config(&request);
        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await?;

        // From here on the container must not outlive this call, even if the
        // owning task is dropped at an await point.
        let mut guard = ContainerGuard::new(self.docker.clone(), name.clone());

        self.docker
            .start_container(&name, None::<StartContainerOptions<String>>)
            .await?;

        let started = Instant::now();
        let mut wait_stream = self.docker.wait_container(
            &name,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );

        let (exit_code, timed_out) = match timeout(self.limits.wall_timeout, wait_stream.next())
            .await
        {
            Ok(Some(Ok(response))) => (response.status_code, false),
            Ok(Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. }))) => {
                (code, false)
            }
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(None) => (-1, false),
            Err(_) => {
                // Budget exhausted: kill the container, then still collect
                // whatever it printed before dying.
                if let Err(e) = self
                    .docker
                    .kill_container(&name, Some(KillContainerOptions { signal: "SIGKILL" }))
                    .await
                {
                    warn!(container = %name, error = %e, "failed to kill timed-out container");
                }
                (-1, true)
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let (stdout, stderr) = self.collect_logs(&name).await;
        let oom = self.was_oom_killed(&name).await;

        guard.disarm();
        if let Err(e) = self
            .docker
            .remove_container(
                &name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            warn!(container = %name, error = %e, "failed to remove sandbox container");
        }

        Ok(SandboxOutput {
            stdout,
            stderr,
            exit_code,
            duration_ms,
            timed_out,
            oom,
        })
    }

    fn container_config(&self, request: &SandboxRequest) -> Config<String> {
        // Source and stdin travel as environment variables; the shell line
        // materializes them under the tmpfs /tmp. Input is normalized to end
        // with exactly one newline so line-reading solutions see EOL.
        let mut stdin = request.stdin.clone();
        if !stdin.is_empty() && !stdin.ends_with('\n') {
            stdin.push('\n');
        }

        let host_config = HostConfig {
            memory: Some(self.limits.memory_bytes),
            memory_swap: Some(self.limits.memory_bytes),
            nano_cpus: Some(self.limits.nano_cpus),
            pids_limit: Some(self.limits.pids_limit),
            network_mode: Some("none".to_string()),
            readonly_rootfs: Some(true),
            tmpfs: Some(HashMap::from([(
                "/tmp".to_string(),
                "rw,exec,size=64m".to_string(),
            )])),
            ..Default::default()
        };

        Config {
            image: Some(self.image.clone()),
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                language::shell_script(request.language),
            ]),
            env: Some(vec![
                format!("SOURCE={}", request.source),
                format!("STDIN={stdin}"),
                "HOME=/tmp".to_string(),
                "GOCACHE=/tmp/.gocache".to_string(),
            ]),
            user: Some("runner".to_string()),
            working_dir: Some("/tmp".to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    async fn collect_logs(&self, name: &str) -> (String, String) {
        let mut stdout = String::new();
        let mut stderr = String::new();

        let mut logs = self.docker.logs::<String>(
            name,
            Some(LogsOptions {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );
        while let Some(entry) = logs.next().await {
            match entry {
                Ok(LogOutput::StdOut { message }) => {
                    stdout.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(LogOutput::StdErr { message }) => {
                    stderr.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(container = %name, error = %e, "failed reading container logs");
                    break;
                }
            }
        }

        (stdout, stderr)
    }

    async fn was_oom_killed(&self, name: &str) -> bool {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(details) => details
                .state
                .and_then(|state| state.oom_killed)
                .unwrap_or(false),
            Err(e) => {
                warn!(container = %name, error = %e, "failed to inspect container state");
                false
            }
        }
    }
}

/// Removes the container on drop unless disarmed. Lets a cancelled `run`
/// still clean up its container.
struct ContainerGuard {
    docker: Docker,
    name: String,
    armed: bool,
}

impl ContainerGuard {
    fn new(docker: Docker, name: String) -> Self {
        Self {
            docker,
            name,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let docker = self.docker.clone();
        let name = self.name.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = docker
                    .remove_container(
                        &name,
                        Some(RemoveContainerOptions {
                            force: true,
                            ..Default::default()
                        }),
                    )
                    .await;
            });
        }
    }
}
