use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::catalog::{Catalog, CommandBinding, expand_template};
use crate::queue::{JobQueue, JobRecord};
use crate::sandbox::{DriverError, RunOutcome, Sandbox, container_path};
use crate::workspace::Workspace;

/// How long a single queue poll may block before the worker re-checks the
/// shutdown token.
const POLL_BLOCK_SECS: f64 = 1.0;

/// Delay before retrying after a broker error, so a redis outage does not
/// spin the worker loop.
const BROKER_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Terminal disposition of one job.
#[derive(Debug, PartialEq, Eq)]
pub enum Verdict {
    Success { stdout: String },
    Failure { reason: String },
}

pub async fn worker(
    id: u8,
    catalog: Arc<Catalog>,
    workspace: Arc<Workspace>,
    sandbox: Arc<Sandbox>,
    queue: JobQueue,
    token: CancellationToken,
) {
    log::info!("worker {id} initialized");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                log::info!("worker {id} received shutdown signal, stopping");
                break;
            }

            delivery = queue.next(POLL_BLOCK_SECS) => {
                let job = match delivery {
                    Ok(Some(job)) => job,
                    Ok(None) => continue,
                    Err(e) => {
                        log::error!("worker {id} failed to poll the queue: {e}");
                        tokio::time::sleep(BROKER_RETRY_DELAY).await;
                        continue;
                    }
                };

                let job_id = job.id;
                log::info!("worker {id} got job {job_id} from queue");

                let verdict = process(&job, &catalog, &workspace, &sandbox).await;

                let published = match &verdict {
                    Verdict::Success { stdout } => queue.complete(&job_id, stdout).await,
                    Verdict::Failure { reason } => queue.fail(&job_id, reason).await,
                };
                if let Err(e) = published {
                    log::error!("failed to publish result for job {job_id}: {e}");
                }

                log::info!("job {job_id} finished on worker {id}");
            }
        };
    }

    log::info!("worker {id} has shut down gracefully");
}

/// Runs one job through its full lifecycle: stage source, assemble the
/// sandbox command, execute, classify. Artifacts are removed only when the
/// job succeeds; a failed job's directory is retained for post-mortem.
async fn process(
    job: &JobRecord,
    catalog: &Catalog,
    workspace: &Workspace,
    sandbox: &Sandbox,
) -> Verdict {
    // The API validated the language at submit time, so a miss here means
    // the catalog changed under a queued job.
    let Some(language) = catalog.resolve(&job.payload.language) else {
        return Verdict::Failure {
            reason: format!("Unknown language: {}", job.payload.language),
        };
    };

    let artifacts = match workspace.prepare(language, &job.payload.code, &job.id) {
        Ok(artifacts) => artifacts,
        Err(e) => {
            return Verdict::Failure {
                reason: format!("Failed to stage source code: {e:#}"),
            };
        }
    };

    // `{file}` and `{output}` must expand to container-absolute paths: the
    // compiled binary is executed by the shell, and a bare name would be
    // looked up on `PATH` instead of in the working directory.
    let source_path = container_path(&artifacts.dir_name, &artifacts.source_name);
    let output_path = container_path(&artifacts.dir_name, &artifacts.output_name);
    let command = expand_template(
        language.command_template,
        &CommandBinding {
            file: &source_path,
            output: &output_path,
            classname: &artifacts.classname,
        },
    );

    let outcome = sandbox
        .run(language.image, &command, &artifacts.dir_name)
        .await;
    let verdict = classify(outcome, language.treat_stderr_as_failure);

    match &verdict {
        Verdict::Success { .. } => workspace.cleanup(&artifacts),
        Verdict::Failure { .. } => {
            log::info!(
                "job {} failed, artifacts retained at {}",
                job.id,
                artifacts.dir.display()
            );
        }
    }

    verdict
}

/// Maps a driver result onto success or failure.
///
/// Compiled languages set `treat_stderr_as_failure`: their toolchains write
/// diagnostics to stderr even when the shell pipeline exits 0 (a `&&` chain
/// can mask a partial compile), so any stderr is treated as a failure.
/// Interpreted languages routinely emit benign diagnostics on stderr; for
/// them stderr is logged and dropped.
fn classify(outcome: Result<RunOutcome, DriverError>, treat_stderr_as_failure: bool) -> Verdict {
    match outcome {
        Err(DriverError::Timeout { limit, stderr }) => {
            let mut reason = format!("Timeout after {} seconds", limit.as_secs());
            if !stderr.is_empty() {
                reason.push_str(&format!(". Stderr:\n{stderr}"));
            }
            Verdict::Failure { reason }
        }
        Err(DriverError::Runtime(e)) => Verdict::Failure {
            reason: format!("Sandbox failed to run the submission: {e:#}"),
        },
        Ok(outcome) => {
            if !outcome.exit_ok {
                let mut reason = String::from("Execution failed with a non-zero exit status.");
                if !outcome.stderr.is_empty() {
                    reason.push_str(&format!(" Stderr:\n{}", outcome.stderr));
                }
                Verdict::Failure { reason }
            } else if treat_stderr_as_failure && !outcome.stderr.is_empty() {
                Verdict::Failure {
                    reason: format!("Execution potentially failed. Stderr:\n{}", outcome.stderr),
                }
            } else {
                if !outcome.stderr.is_empty() {
                    log::debug!("dropping stderr from successful run: {}", outcome.stderr);
                }
                Verdict::Success {
                    stdout: outcome.stdout,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn outcome(exit_ok: bool, stdout: &str, stderr: &str) -> Result<RunOutcome, DriverError> {
        Ok(RunOutcome {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_ok,
        })
    }

    #[test]
    fn clean_exit_is_success() {
        let verdict = classify(outcome(true, "hi\n", ""), true);
        assert_eq!(
            verdict,
            Verdict::Success {
                stdout: "hi\n".to_string()
            }
        );
    }

    #[test]
    fn stderr_is_dropped_for_interpreted_languages() {
        let verdict = classify(outcome(true, "hi\n", "DeprecationWarning: soon"), false);
        assert_eq!(
            verdict,
            Verdict::Success {
                stdout: "hi\n".to_string()
            }
        );
    }

    #[test]
    fn stderr_fails_compiled_languages_even_on_exit_zero() {
        let verdict = classify(outcome(true, "", "warning: unused variable"), true);
        let Verdict::Failure { reason } = verdict else {
            panic!("expected failure");
        };
        assert!(reason.starts_with("Execution potentially failed. Stderr:\n"));
        assert!(reason.contains("unused variable"));
    }

    #[test]
    fn nonzero_exit_fails_regardless_of_policy() {
        for policy in [true, false] {
            let verdict = classify(outcome(false, "", "error: `x` undeclared"), policy);
            let Verdict::Failure { reason } = verdict else {
                panic!("expected failure");
            };
            assert!(reason.contains("`x` undeclared"));
        }
    }

    #[test]
    fn timeout_reason_carries_the_marker_prefix() {
        let verdict = classify(
            Err(DriverError::Timeout {
                limit: Duration::from_secs(15),
                stderr: String::new(),
            }),
            false,
        );
        let Verdict::Failure { reason } = verdict else {
            panic!("expected failure");
        };
        assert!(reason.starts_with("Timeout after 15 seconds"));
    }

    #[test]
    fn timeout_appends_partial_stderr_when_present() {
        let verdict = classify(
            Err(DriverError::Timeout {
                limit: Duration::from_secs(15),
                stderr: "still compiling".to_string(),
            }),
            true,
        );
        let Verdict::Failure { reason } = verdict else {
            panic!("expected failure");
        };
        assert!(reason.starts_with("Timeout after 15 seconds"));
        assert!(reason.contains("still compiling"));
    }

    #[test]
    fn runtime_errors_become_failures() {
        let verdict = classify(Err(DriverError::Runtime(anyhow!("image not found"))), false);
        let Verdict::Failure { reason } = verdict else {
            panic!("expected failure");
        };
        assert!(reason.contains("image not found"));
    }
}
