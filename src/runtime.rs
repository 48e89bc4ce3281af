use crate::config::{Registry, Runtime};
use crate::image_reference::ImageReference;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Successful pull, carrying the runtime's stdout for the caller.
#[derive(Debug)]
pub struct PullOutcome {
    pub output: String,
}

#[derive(Debug)]
pub enum PullError {
    /// The runtime binary could not be located or launched. A server
    /// fault, distinct from a failed pull.
    Invocation(String),
    /// The runtime ran and exited non-zero (auth failure, image not
    /// found, network failure). Carries the runtime's diagnostic text.
    Failed { exit_code: i32, message: String },
    /// The invocation exceeded the bounding wall-clock timeout.
    TimedOut { seconds: u64 },
}

impl std::error::Error for PullError {}
impl fmt::Display for PullError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PullError::Invocation(message) => {
                write!(f, "failed to invoke container runtime: {}", message)
            }
            PullError::Failed { exit_code, message } => {
                write!(f, "container runtime exited with code {}: {}", exit_code, message)
            }
            PullError::TimedOut { seconds } => {
                write!(f, "image pull timed out after {}s", seconds)
            }
        }
    }
}

/// Narrow seam around the host-level pull so the webserver can be tested
/// against a stub.
pub trait ImagePuller: Clone + Send + Sync + 'static {
    fn pull(
        &self,
        image: &ImageReference,
    ) -> impl Future<Output = Result<PullOutcome, PullError>> + Send;
}

/// Pulls images through the host's containerd CLI. With a configured host
/// root the invocation is wrapped in `chroot`, so the pull runs against
/// the node's own image store rather than the container sandbox.
#[derive(Clone)]
pub struct CtrRuntime {
    runtime: Runtime,
    registries: Vec<Registry>,
}

struct ResolvedInvocation {
    program: PathBuf,
    prelude_args: Vec<OsString>,
}

impl CtrRuntime {
    pub fn new(runtime: Runtime, registries: Vec<Registry>) -> Self {
        CtrRuntime {
            runtime,
            registries,
        }
    }

    /// Picks the first configured binary that exists, probing under the
    /// host root when one is set (NixOS hosts keep ctr in the system
    /// profile instead of /usr/bin).
    fn resolve_invocation(&self) -> Result<ResolvedInvocation, PullError> {
        match &self.runtime.host_root {
            Some(host_root) => {
                for candidate in &self.runtime.binary_paths {
                    let relative = candidate.strip_prefix("/").unwrap_or(candidate);
                    if host_root.join(relative).exists() {
                        return Ok(ResolvedInvocation {
                            program: PathBuf::from("chroot"),
                            prelude_args: vec![
                                host_root.as_os_str().to_os_string(),
                                candidate.as_os_str().to_os_string(),
                            ],
                        });
                    }
                }
            }
            None => {
                for candidate in &self.runtime.binary_paths {
                    if candidate.exists() {
                        return Ok(ResolvedInvocation {
                            program: candidate.clone(),
                            prelude_args: vec![],
                        });
                    }
                }
            }
        }

        Err(PullError::Invocation(format!(
            "no container runtime binary found, checked {:?}",
            self.runtime.binary_paths
        )))
    }

    fn find_registry_for_hostname(&self, hostname: &str) -> Option<&Registry> {
        self.registries
            .iter()
            .find(|registry| registry.hostname == hostname)
    }

    async fn run_pull(&self, image: &ImageReference) -> Result<PullOutcome, PullError> {
        let invocation = self.resolve_invocation()?;

        let mut command = Command::new(&invocation.program);
        command.args(&invocation.prelude_args);
        if let Some(namespace) = &self.runtime.namespace {
            command.arg("--namespace").arg(namespace);
        }
        command.arg("image").arg("pull");
        if let Some(registry) = self.find_registry_for_hostname(&image.registry) {
            if let Some(username) = &registry.username {
                command
                    .arg("--user")
                    .arg(format!("{}:{}", username, registry.token.expose_secret()));
            }
        }
        // The reference is a single discrete argument; nothing here ever
        // goes through a shell
        command.arg(image.to_string());
        command.stdin(Stdio::null());
        command.kill_on_drop(true);

        info!(
            "Pulling image {} via {}",
            image,
            invocation.program.display()
        );
        let timeout = Duration::from_secs(self.runtime.pull_timeout_seconds);
        let output = match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(PullError::Invocation(format!(
                    "failed to launch {}: {}",
                    invocation.program.display(),
                    e
                )));
            }
            Err(_) => {
                warn!(
                    "Pull of image {} exceeded timeout of {}s, killing it",
                    image, self.runtime.pull_timeout_seconds
                );
                return Err(PullError::TimedOut {
                    seconds: self.runtime.pull_timeout_seconds,
                });
            }
        };

        if output.status.success() {
            debug!("Pull of image {} succeeded", image);
            Ok(PullOutcome {
                output: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            })
        } else {
            let exit_code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                String::from_utf8_lossy(&output.stdout).trim().to_string()
            } else {
                stderr
            };
            Err(PullError::Failed { exit_code, message })
        }
    }
}

impl ImagePuller for CtrRuntime {
    fn pull(
        &self,
        image: &ImageReference,
    ) -> impl Future<Output = Result<PullOutcome, PullError>> + Send {
        self.run_pull(image)
    }
}
