use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use anyhow::anyhow;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Wall-clock deadline for a single sandbox invocation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

const MEMORY_LIMIT: &str = "256m";
const CPU_LIMIT: &str = "0.5";
const CONTAINER_WORKDIR: &str = "/code";

/// Per-stream ceiling on captured output; anything past it is dropped.
const MAX_CAPTURE_BYTES: usize = 1 << 20;

/// Path of `file_name` inside the container, under the job's working
/// directory. Commands must reference staged files through this path: a bare
/// file name would be resolved against `PATH`, not the working directory.
pub fn container_path(job_dir_name: &str, file_name: &str) -> String {
    format!("{CONTAINER_WORKDIR}/{job_dir_name}/{file_name}")
}

/// Captured streams and exit disposition of one container run.
#[derive(Debug)]
pub struct RunOutcome {
    pub stdout: String,
    pub stderr: String,
    /// True iff the container exited with status 0 and was not terminated
    /// by the driver.
    pub exit_ok: bool,
}

#[derive(Debug)]
pub enum DriverError {
    /// The wall-clock deadline elapsed and the container was killed.
    /// Carries whatever stderr the container produced before termination.
    Timeout { limit: Duration, stderr: String },
    /// The runtime refused to start or manage the container.
    Runtime(anyhow::Error),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { limit, .. } => {
                write!(f, "Timeout after {} seconds", limit.as_secs())
            }
            Self::Runtime(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for DriverError {}

/// Runs one-shot, resource-constrained, network-isolated containers over the
/// docker CLI.
pub struct Sandbox {
    /// Mount source for the shared code volume (host directory or named
    /// docker volume)
    volume: String,
    timeout: Duration,
}

impl Sandbox {
    pub fn new(volume: String, timeout: Duration) -> Self {
        Self { volume, timeout }
    }

    /// Spawns a container for `command` inside `image`, with the job's
    /// workspace subdirectory as working directory, and waits for it under
    /// the wall-clock deadline.
    ///
    /// The container is always removed before this returns, whether it
    /// exited, failed, or had to be killed.
    pub async fn run(
        &self,
        image: &str,
        command: &str,
        job_dir_name: &str,
    ) -> Result<RunOutcome, DriverError> {
        let args = self.launch_args(image, command, job_dir_name);
        log::debug!("launching sandbox: docker {}", args.join(" "));

        let launch = Command::new("docker")
            .args(&args)
            .output()
            .await
            .map_err(|e| DriverError::Runtime(anyhow!("failed to spawn docker: {e}")))?;

        if !launch.status.success() {
            return Err(DriverError::Runtime(anyhow!(
                "container failed to start: {}",
                String::from_utf8_lossy(&launch.stderr).trim()
            )));
        }

        let container_id = String::from_utf8_lossy(&launch.stdout)
            .lines()
            .next()
            .unwrap_or("")
            .trim()
            .to_string();
        if container_id.is_empty() {
            return Err(DriverError::Runtime(anyhow!(
                "docker did not report a container id"
            )));
        }

        // `docker wait` blocks until the container exits and prints its exit
        // status; racing it against the deadline enforces the timeout.
        let waited = tokio::time::timeout(
            self.timeout,
            Command::new("docker")
                .args(["wait", container_id.as_str()])
                .output(),
        )
        .await;

        let exit_code = match waited {
            Ok(Ok(output)) => {
                let code: i32 = String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .next()
                    .unwrap_or("")
                    .trim()
                    .parse()
                    .unwrap_or(i32::MAX);
                Some(code)
            }
            Ok(Err(e)) => {
                self.remove_container(&container_id).await;
                return Err(DriverError::Runtime(anyhow!(
                    "failed to wait for container {container_id}: {e}"
                )));
            }
            Err(_) => None, // deadline elapsed
        };

        // Fetch logs even after a timeout so partial stderr reaches the
        // failure reason. `docker logs` keeps the two streams separate.
        let (stdout, stderr) = collect_logs(&container_id).await;

        // Kills the container if it is still running.
        self.remove_container(&container_id).await;

        match exit_code {
            None => Err(DriverError::Timeout {
                limit: self.timeout,
                stderr,
            }),
            Some(code) => Ok(RunOutcome {
                stdout,
                stderr,
                exit_ok: code == 0,
            }),
        }
    }

    async fn remove_container(&self, container_id: &str) {
        let removed = Command::new("docker")
            .args(["rm", "--force", container_id])
            .output()
            .await;
        match removed {
            Ok(output) if output.status.success() => {}
            Ok(output) => log::warn!(
                "failed to remove container {container_id}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) => log::warn!("failed to remove container {container_id}: {e}"),
        }
    }

    fn launch_args(&self, image: &str, command: &str, job_dir_name: &str) -> Vec<String> {
        vec![
            "run".to_string(),
            "--detach".to_string(),
            format!("--memory={MEMORY_LIMIT}"),
            format!("--memory-swap={MEMORY_LIMIT}"),
            format!("--cpus={CPU_LIMIT}"),
            "--network=none".to_string(),
            "-v".to_string(),
            format!("{}:{CONTAINER_WORKDIR}", self.volume),
            "-w".to_string(),
            format!("{CONTAINER_WORKDIR}/{job_dir_name}"),
            image.to_string(),
            "sh".to_string(),
            "-c".to_string(),
            command.to_string(),
        ]
    }
}

/// Streams both log channels of a container into memory, each capped at
/// `MAX_CAPTURE_BYTES`. `docker logs` keeps stdout and stderr separate.
async fn collect_logs(container_id: &str) -> (String, String) {
    let spawned = Command::new("docker")
        .args(["logs", container_id])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            log::warn!("failed to collect logs from container {container_id}: {e}");
            return (String::new(), String::new());
        }
    };

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let (stdout, stderr) = tokio::join!(read_capped(stdout_pipe), read_capped(stderr_pipe));

    // Once both streams hit their cap the child may still be writing; kill
    // it rather than wait for output nobody will read.
    let _ = child.kill().await;
    let _ = child.wait().await;

    (stdout, stderr)
}

/// Reads a stream to its end or to `MAX_CAPTURE_BYTES`, whichever comes
/// first.
async fn read_capped<R>(stream: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(stream) = stream else {
        return String::new();
    };

    let mut buf = Vec::new();
    let mut limited = stream.take(MAX_CAPTURE_BYTES as u64);
    if let Err(e) = limited.read_to_end(&mut buf).await {
        log::warn!("error while reading container logs: {e}");
    }
    if buf.len() == MAX_CAPTURE_BYTES {
        log::warn!("captured stream reached the {MAX_CAPTURE_BYTES} byte cap, truncating");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_args_apply_isolation_and_limits() {
        let sandbox = Sandbox::new("/srv/code".to_string(), DEFAULT_TIMEOUT);
        let args = sandbox.launch_args("gcc:13", "gcc a.c -o a.out && a.out", "job-1");

        assert!(args.contains(&"--network=none".to_string()));
        assert!(args.contains(&"--memory=256m".to_string()));
        assert!(args.contains(&"--cpus=0.5".to_string()));
        assert!(args.contains(&"/srv/code:/code".to_string()));
        assert!(args.contains(&"/code/job-1".to_string()));

        // The command must go through a shell so `&&` works.
        assert_eq!(args[args.len() - 3], "sh");
        assert_eq!(args[args.len() - 2], "-c");
        assert_eq!(args[args.len() - 1], "gcc a.c -o a.out && a.out");
    }

    #[test]
    fn image_precedes_the_shell_invocation() {
        let sandbox = Sandbox::new("codevol".to_string(), DEFAULT_TIMEOUT);
        let args = sandbox.launch_args("python", "python3 x.py", "job-2");
        let image_pos = args.iter().position(|a| a == "python").unwrap();
        assert_eq!(args[image_pos + 1], "sh");
    }

    #[test]
    fn timeout_error_carries_the_limit_in_seconds() {
        let err = DriverError::Timeout {
            limit: Duration::from_secs(15),
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "Timeout after 15 seconds");
    }

    #[test]
    fn container_paths_are_absolute_under_the_mount() {
        let path = container_path("job-3", "prog.out");
        assert_eq!(path, "/code/job-3/prog.out");
    }

    #[tokio::test]
    async fn capped_read_truncates_at_the_ceiling() {
        let oversized = vec![b'a'; MAX_CAPTURE_BYTES + 4096];
        let captured = read_capped(Some(std::io::Cursor::new(oversized))).await;
        assert_eq!(captured.len(), MAX_CAPTURE_BYTES);

        let small = read_capped(Some(std::io::Cursor::new(b"hello".to_vec()))).await;
        assert_eq!(small, "hello");
    }
}
