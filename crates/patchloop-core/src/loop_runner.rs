use patchloop_db::TaskStore;
use patchloop_generator::{
    ChangeGenerator, DiagnosisRequest, GeneratorError, GeneratorReply, ProposalRequest,
};
use patchloop_git::{DiffSummary, RepoSummary, WorkspaceProvider};
use patchloop_logging::{ArtifactKind, ArtifactStore, EventSink, IterationRecord, LoopEvent};
use patchloop_patch::{ApplyOutcome, ChangeSet, ChangeSetApplier};
use patchloop_verify::{RunOutput, VerificationResult, VerificationRunner, VerifyError};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::outcome::{IterationSummary, RunReport};
use crate::{Cancellation, LoopConfig, LoopError, LoopOutcome, Task, TaskStatus};

/// The external capabilities one loop drives
pub struct LoopServices {
    pub generator: Arc<dyn ChangeGenerator>,
    pub verifier: Arc<dyn VerificationRunner>,
    pub workspaces: Arc<dyn WorkspaceProvider>,
    pub store: Arc<dyn TaskStore>,
    pub sink: Arc<dyn EventSink>,
    pub artifacts: Arc<dyn ArtifactStore>,
}

/// The previous attempt. Nothing older reaches the generator.
struct LastAttempt {
    changes: ChangeSet,
    outcome: ApplyOutcome,
    verification: VerificationResult,
}

/// Drives tasks through generate, apply, verify and diagnose.
///
/// One `IterationLoop` can run many tasks concurrently; each task's run is
/// strictly sequential and is the only writer of that task's status and
/// event trail.
pub struct IterationLoop {
    services: LoopServices,
    applier: ChangeSetApplier,
    config: LoopConfig,
}

impl IterationLoop {
    pub fn new(services: LoopServices, config: LoopConfig) -> Self {
        Self {
            services,
            applier: ChangeSetApplier::default(),
            config,
        }
    }

    pub fn with_applier(mut self, applier: ChangeSetApplier) -> Self {
        self.applier = applier;
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Snapshot `source` into a fresh workspace and record a pending task
    pub fn submit(&self, description: &str, source: &Path) -> Result<Task, LoopError> {
        let id = uuid::Uuid::new_v4().to_string();
        let workspace = self.services.workspaces.snapshot(source, &id)?;

        let task = Task::new(
            id,
            description,
            source.to_path_buf(),
            workspace,
            self.config.max_iterations,
        );
        self.services.store.create(&task.to_record())?;

        self.emit(
            &task,
            LoopEvent::Created {
                description: task.description.clone(),
                source: task.source.clone(),
                workspace: task.workspace.clone(),
                max_iterations: task.max_iterations,
            },
        );

        info!(
            task_id = %task.id,
            workspace = %task.workspace.display(),
            "Task submitted"
        );
        Ok(task)
    }

    /// Run a pending task until it completes, fails or is cancelled.
    ///
    /// Verification failures, timeouts, unusable replies and apply failures
    /// are normal transitions. A hard generator or verifier fault ends the run
    /// as [`LoopOutcome::Failed`]. `Err` is only returned when the task state
    /// itself could not be recorded.
    pub async fn run(
        &self,
        mut task: Task,
        cancel: &Cancellation,
    ) -> Result<LoopOutcome, LoopError> {
        if task.status() != TaskStatus::Pending {
            return Err(LoopError::NotPending(task.id.clone()));
        }

        let started = Instant::now();
        let mut history = Vec::new();
        let base = match self.services.workspaces.head(&task.workspace) {
            Ok(head) => Some(head),
            Err(e) => {
                self.emit_error(&task, format!("Failed to read workspace HEAD: {}", e));
                None
            }
        };

        info!(
            task_id = %task.id,
            max_iterations = task.max_iterations,
            "Starting iteration loop"
        );

        match self.drive(&mut task, cancel, started, &mut history).await {
            Ok(outcome) => {
                self.finish(&mut task, &outcome, &history, base.as_deref())?;
                Ok(outcome)
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Iteration loop aborted");
                let outcome =
                    LoopOutcome::failed(task.current_iteration, e.to_string(), started.elapsed());
                if !task.status().is_terminal() {
                    if let Err(finish_err) =
                        self.finish(&mut task, &outcome, &history, base.as_deref())
                    {
                        warn!(error = %finish_err, "Failed to record aborted task");
                    }
                }
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        task: &mut Task,
        cancel: &Cancellation,
        started: Instant,
        history: &mut Vec<IterationSummary>,
    ) -> Result<LoopOutcome, LoopError> {
        self.set_status(task, TaskStatus::Planning)?;
        self.emit(
            task,
            LoopEvent::Status {
                status: task.status().to_string(),
            },
        );

        let mut last: Option<LastAttempt> = None;

        for iteration in 1..=task.max_iterations {
            if cancel.is_cancelled() {
                info!(task_id = %task.id, "Loop cancelled between iterations");
                return Ok(LoopOutcome::cancelled(
                    task.current_iteration,
                    started.elapsed(),
                ));
            }

            task.start_iteration(iteration);
            self.persist(task)?;
            self.emit(
                task,
                LoopEvent::Iteration {
                    iteration,
                    max_iterations: task.max_iterations,
                },
            );

            // Ask for changes
            let reply = match last.as_ref() {
                None => self.propose(task, cancel).await,
                Some(prev) => self.diagnose(task, prev, iteration, cancel).await,
            };
            let reply = match reply {
                None => return Ok(LoopOutcome::cancelled(iteration, started.elapsed())),
                Some(Err(e)) => {
                    warn!(task_id = %task.id, iteration, error = %e, "Generator failed");
                    self.emit(
                        task,
                        LoopEvent::Error {
                            message: e.to_string(),
                            fatal: true,
                        },
                    );
                    return Ok(LoopOutcome::failed(
                        iteration,
                        e.to_string(),
                        started.elapsed(),
                    ));
                }
                Some(Ok(reply)) => reply,
            };

            if let Some(err) = reply.parse_error() {
                warn!(task_id = %task.id, iteration, error = %err, "Unusable generator reply");
                self.emit(
                    task,
                    LoopEvent::Error {
                        message: format!("Unusable generator reply: {}", err),
                        fatal: false,
                    },
                );
            }

            let reasoning = if last.is_none() {
                let plan = reply.plan();
                let summary = plan.as_ref().map(|p| p.summary.clone());
                self.emit(
                    task,
                    LoopEvent::Plan {
                        summary: summary.clone(),
                        steps: plan.map(|p| p.steps).unwrap_or_default(),
                    },
                );
                self.set_status(task, TaskStatus::Generating)?;
                summary
            } else {
                let diagnosis = reply.diagnosis();
                let summary = diagnosis.as_ref().map(|d| d.summary.clone());
                self.emit(
                    task,
                    LoopEvent::Analysis {
                        summary: summary.clone(),
                        root_cause: diagnosis.as_ref().and_then(|d| d.root_cause.clone()),
                        confidence: diagnosis.as_ref().and_then(|d| d.confidence),
                    },
                );
                self.set_status(task, TaskStatus::Fixing)?;
                summary
            };

            // Apply, then commit so the iteration can be inspected on its own
            let changes = reply.change_set();
            let outcome = self.applier.apply(&task.workspace, &changes);
            if outcome.has_failures() {
                warn!(
                    task_id = %task.id,
                    iteration,
                    failed = outcome.failed_files.len(),
                    "Some changes could not be applied"
                );
            }

            let (diff_summary, diff_artifact) = self.capture_diff(task, iteration);
            let commit = match self.services.workspaces.commit(
                &task.workspace,
                &format!("patchloop: iteration {}", iteration),
            ) {
                Ok(id) => Some(id),
                Err(e) => {
                    self.emit_error(
                        task,
                        format!("Failed to commit iteration {}: {}", iteration, e),
                    );
                    None
                }
            };

            let applied: Vec<PathBuf> = outcome.applied_files.iter().cloned().collect();
            self.emit(
                task,
                LoopEvent::Patches {
                    proposed: changes.paths().into_iter().map(Path::to_path_buf).collect(),
                    applied: applied.clone(),
                    failed: outcome.failed_files.clone(),
                    commit: commit.clone(),
                    files_changed: diff_summary.files_changed,
                    insertions: diff_summary.insertions,
                    deletions: diff_summary.deletions,
                    diff_artifact,
                },
            );
            self.set_status(task, TaskStatus::Testing)?;

            // Verify
            let run = match self.verify(&task.workspace, cancel).await {
                None => {
                    info!(task_id = %task.id, iteration, "Verification abandoned on cancel");
                    return Ok(LoopOutcome::cancelled(iteration, started.elapsed()));
                }
                Some(Err(e)) => {
                    warn!(task_id = %task.id, iteration, error = %e, "Verification failed to run");
                    self.emit(
                        task,
                        LoopEvent::Error {
                            message: e.to_string(),
                            fatal: true,
                        },
                    );
                    return Ok(LoopOutcome::failed(
                        iteration,
                        e.to_string(),
                        started.elapsed(),
                    ));
                }
                Some(Ok(run)) => run,
            };

            let verification = VerificationResult::from_run(&run);
            let log_artifact = self.save_artifact(
                task,
                ArtifactKind::Log,
                &format!("iteration-{}.log", iteration),
                verification.raw_output.as_bytes(),
            );

            info!(
                task_id = %task.id,
                iteration,
                result = %verification.short_description(),
                "Verification finished"
            );
            self.emit(
                task,
                LoopEvent::TestResult {
                    passed: verification.passed,
                    total_cases: verification.total_cases,
                    passed_cases: verification.passed_cases,
                    failed_cases: verification.failed_cases,
                    duration_ms: verification.duration_ms,
                    timed_out: verification.timed_out,
                    excerpts: verification.excerpts.clone(),
                    log_artifact,
                },
            );

            history.push(IterationSummary {
                iteration,
                reasoning,
                applied,
                failed: outcome.failed_files.clone(),
                commit,
                passed: verification.passed,
                passed_cases: verification.passed_cases,
                failed_cases: verification.failed_cases,
                total_cases: verification.total_cases,
                timed_out: verification.timed_out,
            });

            if verification.passed {
                return Ok(LoopOutcome::completed(iteration, started.elapsed()));
            }
            if iteration == task.max_iterations {
                break;
            }

            self.set_status(task, TaskStatus::Analyzing)?;
            last = Some(LastAttempt {
                changes,
                outcome,
                verification,
            });
        }

        Ok(LoopOutcome::budget_exhausted(
            task.current_iteration,
            started.elapsed(),
        ))
    }

    async fn propose(
        &self,
        task: &Task,
        cancel: &Cancellation,
    ) -> Option<Result<GeneratorReply, GeneratorError>> {
        let summary = RepoSummary::scan(&task.workspace).render();
        let request = ProposalRequest {
            task_description: &task.description,
            repo_summary: &summary,
            workspace: &task.workspace,
        };
        debug!(task_id = %task.id, summary_len = summary.len(), "Requesting proposal");
        self.call_generator(cancel, self.services.generator.propose(request))
            .await
    }

    async fn diagnose(
        &self,
        task: &Task,
        prev: &LastAttempt,
        iteration: u32,
        cancel: &Cancellation,
    ) -> Option<Result<GeneratorReply, GeneratorError>> {
        let apply_failures = prev.outcome.failure_summary();
        let request = DiagnosisRequest {
            task_description: &task.description,
            last_transcript: &prev.verification.raw_output,
            last_changes: &prev.changes,
            failure_excerpts: &prev.verification.excerpts,
            apply_failures: apply_failures.as_deref(),
            iteration,
            workspace: &task.workspace,
        };
        debug!(task_id = %task.id, iteration, "Requesting diagnosis");
        self.call_generator(cancel, self.services.generator.diagnose_and_fix(request))
            .await
    }

    /// One logical generator call under the configured limit; `None` on cancel
    async fn call_generator<F>(
        &self,
        cancel: &Cancellation,
        call: F,
    ) -> Option<Result<GeneratorReply, GeneratorError>>
    where
        F: Future<Output = Result<GeneratorReply, GeneratorError>>,
    {
        let limit = self.config.generator_timeout;
        cancellable(cancel, async move {
            tokio::time::timeout(limit, call)
                .await
                .unwrap_or_else(|_| Err(GeneratorError::Timeout(limit)))
        })
        .await
    }

    /// One verification run; a timeout is a failed run, `None` on cancel
    async fn verify(
        &self,
        workspace: &Path,
        cancel: &Cancellation,
    ) -> Option<Result<RunOutput, VerifyError>> {
        let limit = self.config.verification_timeout;
        debug!(runner = %self.services.verifier.describe(), "Running verification");
        cancellable(cancel, async move {
            match tokio::time::timeout(limit, self.services.verifier.run(workspace)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(timeout_secs = limit.as_secs(), "Verification timed out");
                    Ok(RunOutput::timed_out(limit))
                }
            }
        })
        .await
    }

    fn capture_diff(&self, task: &Task, iteration: u32) -> (DiffSummary, Option<PathBuf>) {
        match self.services.workspaces.working_diff(&task.workspace) {
            Ok((diff, summary)) => {
                let artifact = self.save_artifact(
                    task,
                    ArtifactKind::Diff,
                    &format!("iteration-{}.diff", iteration),
                    diff.as_bytes(),
                );
                (summary, artifact)
            }
            Err(e) => {
                self.emit_error(task, format!("Failed to capture diff: {}", e));
                (DiffSummary::default(), None)
            }
        }
    }

    fn save_artifact(
        &self,
        task: &Task,
        kind: ArtifactKind,
        name: &str,
        content: &[u8],
    ) -> Option<PathBuf> {
        match self.services.artifacts.save(&task.id, kind, name, content) {
            Ok(saved) => Some(saved.path),
            Err(e) => {
                self.emit_error(
                    task,
                    format!("Failed to save {} artifact {}: {}", kind, name, e),
                );
                None
            }
        }
    }

    /// Record the terminal status, the terminal events and the run report
    fn finish(
        &self,
        task: &mut Task,
        outcome: &LoopOutcome,
        history: &[IterationSummary],
        base: Option<&str>,
    ) -> Result<(), LoopError> {
        if outcome.is_success() {
            self.set_status(task, TaskStatus::Completed)?;
            self.emit(
                task,
                LoopEvent::Success {
                    iterations: outcome.iterations(),
                },
            );
        } else {
            let reason = outcome.failure_reason().unwrap_or_default();
            task.reason = Some(reason.clone());
            self.set_status(task, TaskStatus::Failed)?;
            self.emit(
                task,
                LoopEvent::Failure {
                    reason,
                    iterations: outcome.iterations(),
                },
            );
        }

        // Everything the run changed, from the snapshot to the last commit
        let total_diff = base.and_then(|base| {
            match self.services.workspaces.diff(&task.workspace, base, "HEAD") {
                Ok(diff) => {
                    self.save_artifact(task, ArtifactKind::Diff, "total.diff", diff.as_bytes())
                }
                Err(e) => {
                    self.emit_error(task, format!("Failed to capture total diff: {}", e));
                    None
                }
            }
        });

        let report = RunReport {
            task_id: &task.id,
            description: &task.description,
            workspace: &task.workspace,
            base_commit: base,
            total_diff: total_diff.as_deref(),
            outcome,
            iterations: history,
        };
        let report_artifact = match serde_json::to_vec_pretty(&report) {
            Ok(bytes) => self.save_artifact(task, ArtifactKind::Report, "report.json", &bytes),
            Err(e) => {
                self.emit_error(task, format!("Failed to serialize run report: {}", e));
                None
            }
        };

        self.emit(
            task,
            LoopEvent::Complete {
                status: task.status().to_string(),
                iterations: outcome.iterations(),
                duration_secs: outcome.total_duration_secs(),
                report_artifact,
            },
        );

        info!(
            task_id = %task.id,
            status = %task.status(),
            iterations = outcome.iterations(),
            "Task finished"
        );
        Ok(())
    }

    fn set_status(&self, task: &mut Task, next: TaskStatus) -> Result<(), LoopError> {
        let previous = task.status();
        task.transition(next)?;
        self.persist(task)?;
        debug!(task_id = %task.id, from = %previous, to = %next, "Status changed");
        Ok(())
    }

    fn persist(&self, task: &Task) -> Result<(), LoopError> {
        self.services.store.update(&task.to_record())?;
        Ok(())
    }

    fn emit(&self, task: &Task, event: LoopEvent) {
        let record = IterationRecord::new(task.id.clone(), task.current_iteration, &event);
        self.services.sink.append(&record);
    }

    fn emit_error(&self, task: &Task, message: String) {
        warn!(task_id = %task.id, error = %message, "Non-fatal loop error");
        self.emit(
            task,
            LoopEvent::Error {
                message,
                fatal: false,
            },
        );
    }
}

async fn cancellable<F: Future>(cancel: &Cancellation, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}
