use async_trait::async_trait;
use patchloop_core::{
    Cancellation, IterationLoop, LoopConfig, LoopOutcome, LoopServices, TaskStatus,
};
use patchloop_db::{Database, TaskStore};
use patchloop_generator::{
    ChangeGenerator, DiagnosisRequest, GeneratorError, GeneratorMessage, GeneratorReply,
    ProposalRequest,
};
use patchloop_git::GitWorkspace;
use patchloop_logging::{EventBus, EventFanout, EventSink, FsArtifactStore, LoopEvent};
use patchloop_patch::FileChange;
use patchloop_verify::{RunOutput, VerificationRunner, VerifyError};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct SeenDiagnosis {
    iteration: u32,
    last_transcript: String,
    changed_paths: Vec<PathBuf>,
    apply_failures: Option<String>,
}

/// Replies from a script; once empty, proposes a fresh edit of `src/lib.rs`
#[derive(Default)]
struct ScriptedGenerator {
    replies: Mutex<VecDeque<Result<GeneratorReply, GeneratorError>>>,
    proposals: Mutex<u32>,
    diagnoses: Mutex<Vec<SeenDiagnosis>>,
    delay: Option<Duration>,
    hang_on_diagnosis: bool,
    diagnosing: Notify,
}

impl ScriptedGenerator {
    fn new() -> Self {
        Self::default()
    }

    fn with_replies(replies: Vec<Result<GeneratorReply, GeneratorError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    fn hanging_on_diagnosis() -> Self {
        Self {
            hang_on_diagnosis: true,
            ..Self::default()
        }
    }

    fn next_reply(&self, n: u32) -> Result<GeneratorReply, GeneratorError> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(edit_reply(n)))
    }

    fn diagnoses(&self) -> Vec<SeenDiagnosis> {
        self.diagnoses.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChangeGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn propose(
        &self,
        request: ProposalRequest<'_>,
    ) -> Result<GeneratorReply, GeneratorError> {
        assert!(request.repo_summary.contains("src/lib.rs"));
        *self.proposals.lock().unwrap() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.next_reply(1)
    }

    async fn diagnose_and_fix(
        &self,
        request: DiagnosisRequest<'_>,
    ) -> Result<GeneratorReply, GeneratorError> {
        self.diagnoses.lock().unwrap().push(SeenDiagnosis {
            iteration: request.iteration,
            last_transcript: request.last_transcript.to_string(),
            changed_paths: request
                .last_changes
                .paths()
                .into_iter()
                .map(Path::to_path_buf)
                .collect(),
            apply_failures: request.apply_failures.map(str::to_string),
        });
        if self.hang_on_diagnosis {
            self.diagnosing.notify_one();
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.next_reply(request.iteration)
    }
}

/// Passes on the listed attempts (1-based) and fails otherwise
struct ScriptedVerifier {
    pass_on: Vec<u32>,
    runs: Mutex<u32>,
}

impl ScriptedVerifier {
    fn failing() -> Self {
        Self::passing_on(&[])
    }

    fn passing_on(attempts: &[u32]) -> Self {
        Self {
            pass_on: attempts.to_vec(),
            runs: Mutex::new(0),
        }
    }

    fn runs(&self) -> u32 {
        *self.runs.lock().unwrap()
    }
}

#[async_trait]
impl VerificationRunner for ScriptedVerifier {
    fn describe(&self) -> String {
        "scripted".to_string()
    }

    async fn run(&self, _workspace: &Path) -> Result<RunOutput, VerifyError> {
        let run = {
            let mut runs = self.runs.lock().unwrap();
            *runs += 1;
            *runs
        };
        if self.pass_on.contains(&run) {
            Ok(RunOutput::new(
                true,
                "test result: ok. 2 passed; 0 failed",
                Duration::from_millis(5),
            ))
        } else {
            Ok(RunOutput::new(
                false,
                format!(
                    "test tests::it_works ... FAILED\nrun {} failed\ntest result: FAILED. 1 passed; 1 failed",
                    run
                ),
                Duration::from_millis(5),
            ))
        }
    }
}

/// Never finishes; signals once it has started
#[derive(Default)]
struct HangingVerifier {
    started: Notify,
}

#[async_trait]
impl VerificationRunner for HangingVerifier {
    fn describe(&self) -> String {
        "hanging".to_string()
    }

    async fn run(&self, _workspace: &Path) -> Result<RunOutput, VerifyError> {
        self.started.notify_one();
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(RunOutput::new(true, "", Duration::ZERO))
    }
}

/// Fails its run and cancels the loop before reporting
struct CancellingVerifier {
    cancel: Cancellation,
    runs: Mutex<u32>,
}

#[async_trait]
impl VerificationRunner for CancellingVerifier {
    fn describe(&self) -> String {
        "cancelling".to_string()
    }

    async fn run(&self, _workspace: &Path) -> Result<RunOutput, VerifyError> {
        *self.runs.lock().unwrap() += 1;
        self.cancel.cancel();
        Ok(RunOutput::new(
            false,
            "test result: FAILED. 0 passed; 1 failed",
            Duration::from_millis(5),
        ))
    }
}

fn edit_reply(n: u32) -> GeneratorReply {
    let mut messages = Vec::new();
    if n == 1 {
        messages.push(GeneratorMessage::Plan {
            summary: "Implement the function".to_string(),
            steps: vec!["edit src/lib.rs".to_string()],
        });
    } else {
        messages.push(GeneratorMessage::Diagnosis {
            summary: format!("Attempt {} returned the wrong value", n - 1),
            root_cause: Some("off by one".to_string()),
            confidence: Some(0.7),
        });
    }
    messages.push(GeneratorMessage::Patches {
        patches: vec![FileChange::new(
            "src/lib.rs",
            format!("pub fn answer() -> u32 {{\n    {}\n}}\n", n),
        )],
    });
    GeneratorReply::from_messages(messages)
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    dir: TempDir,
    source: PathBuf,
    bus: Arc<EventBus>,
    db: Arc<Database>,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("project");
        fs::create_dir_all(source.join("src")).unwrap();
        fs::write(source.join("Cargo.toml"), "[package]\nname = \"demo\"\n").unwrap();
        fs::write(
            source.join("src/lib.rs"),
            "pub fn answer() -> u32 {\n    0\n}\n",
        )
        .unwrap();

        Self {
            dir,
            source,
            bus: Arc::new(EventBus::new()),
            db: Arc::new(Database::open_in_memory().unwrap()),
        }
    }

    fn artifacts_root(&self) -> PathBuf {
        self.dir.path().join("artifacts")
    }

    fn build(
        &self,
        generator: Arc<dyn ChangeGenerator>,
        verifier: Arc<dyn VerificationRunner>,
        config: LoopConfig,
    ) -> IterationLoop {
        let sink: Arc<dyn EventSink> = Arc::new(
            EventFanout::new()
                .with(self.bus.clone())
                .with(self.db.clone()),
        );
        IterationLoop::new(
            LoopServices {
                generator,
                verifier,
                workspaces: Arc::new(GitWorkspace::new(self.dir.path().join("workspaces"))),
                store: self.db.clone(),
                sink,
                artifacts: Arc::new(FsArtifactStore::new(self.artifacts_root())),
            },
            config,
        )
    }

    fn names(&self, task_id: &str) -> Vec<String> {
        self.bus
            .history(task_id)
            .into_iter()
            .map(|r| r.name)
            .collect()
    }

    fn events(&self, task_id: &str) -> Vec<LoopEvent> {
        self.bus
            .history(task_id)
            .iter()
            .filter_map(|r| r.event())
            .collect()
    }
}

fn config(max_iterations: u32) -> LoopConfig {
    LoopConfig::default().with_max_iterations(max_iterations)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_always_failing_exhausts_budget() {
    let h = Harness::new();
    let generator = Arc::new(ScriptedGenerator::new());
    let verifier = Arc::new(ScriptedVerifier::failing());
    let lp = h.build(generator.clone(), verifier.clone(), config(3));

    let task = lp.submit("make answer return 42", &h.source).unwrap();
    let id = task.id.clone();
    let outcome = lp.run(task, &Cancellation::new()).await.unwrap();

    assert!(matches!(outcome, LoopOutcome::BudgetExhausted { iterations: 3, .. }));
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(verifier.runs(), 3);
    assert_eq!(*generator.proposals.lock().unwrap(), 1);
    assert_eq!(generator.diagnoses().len(), 2);

    let record = h.db.get(&id).unwrap().unwrap();
    assert_eq!(record.status, "failed");
    assert_eq!(record.current_iteration, 3);
    assert!(record.reason.unwrap().contains("budget exhausted"));

    let names = h.names(&id);
    assert_eq!(names.iter().filter(|n| *n == "test-result").count(), 3);
    assert_eq!(&names[names.len() - 2..], ["failure", "complete"]);
}

#[tokio::test]
async fn test_stops_at_first_passing_iteration() {
    let h = Harness::new();
    let generator = Arc::new(ScriptedGenerator::new());
    let verifier = Arc::new(ScriptedVerifier::passing_on(&[2]));
    let lp = h.build(generator.clone(), verifier.clone(), config(5));

    let task = lp.submit("make answer return 42", &h.source).unwrap();
    let id = task.id.clone();
    let workspace = task.workspace.clone();
    let outcome = lp.run(task, &Cancellation::new()).await.unwrap();

    assert!(matches!(outcome, LoopOutcome::Completed { iterations: 2, .. }));
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(verifier.runs(), 2);

    let content = fs::read_to_string(workspace.join("src/lib.rs")).unwrap();
    assert!(content.contains("    2"));
    assert_eq!(
        fs::read_to_string(h.source.join("src/lib.rs")).unwrap(),
        "pub fn answer() -> u32 {\n    0\n}\n",
        "source must be left untouched"
    );

    let record = h.db.get(&id).unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Completed.as_str());
    assert_eq!(record.current_iteration, 2);
    assert!(record.reason.is_none());
}

#[tokio::test]
async fn test_event_sequence_for_pass_on_third_iteration() {
    let h = Harness::new();
    let generator = Arc::new(ScriptedGenerator::new());
    let verifier = Arc::new(ScriptedVerifier::passing_on(&[3]));
    let lp = h.build(generator, verifier, config(3));

    let task = lp.submit("make answer return 42", &h.source).unwrap();
    let id = task.id.clone();
    lp.run(task, &Cancellation::new()).await.unwrap();

    assert_eq!(
        h.names(&id),
        [
            "created",
            "status",
            "iteration",
            "plan",
            "patches",
            "test-result",
            "iteration",
            "analysis",
            "patches",
            "test-result",
            "iteration",
            "analysis",
            "patches",
            "test-result",
            "success",
            "complete",
        ]
    );

    let iterations: Vec<u32> = h.bus.history(&id).iter().map(|r| r.iteration).collect();
    assert_eq!(iterations[0], 0);
    assert_eq!(iterations[5], 1);
    assert_eq!(iterations[9], 2);
    assert_eq!(iterations[13], 3);

    // The store received the same trail as the bus
    let stored: Vec<String> = h
        .db
        .events()
        .list(&id)
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(stored, h.names(&id));

    let record = h.db.get(&id).unwrap().unwrap();
    assert_eq!(record.status, "completed");
    assert_eq!(record.current_iteration, 3);

    match h.events(&id).last() {
        Some(LoopEvent::Complete {
            status,
            iterations,
            report_artifact,
            ..
        }) => {
            assert_eq!(status, "completed");
            assert_eq!(*iterations, 3);
            let report_path = report_artifact.as_ref().unwrap();
            let report = fs::read_to_string(report_path).unwrap();
            let value: serde_json::Value = serde_json::from_str(&report).unwrap();
            assert_eq!(value["outcome"]["status"], "completed");
            assert_eq!(value["iterations"].as_array().unwrap().len(), 3);
            assert!(value["base_commit"].is_string());
            let total = fs::read_to_string(value["total_diff"].as_str().unwrap()).unwrap();
            assert!(total.contains("-    0"));
            assert!(total.contains("+    3"));
        }
        other => panic!("unexpected last event: {:?}", other),
    }
}

#[tokio::test]
async fn test_each_iteration_is_committed_with_artifacts() {
    let h = Harness::new();
    let lp = h.build(
        Arc::new(ScriptedGenerator::new()),
        Arc::new(ScriptedVerifier::passing_on(&[2])),
        config(2),
    );

    let task = lp.submit("make answer return 42", &h.source).unwrap();
    let id = task.id.clone();
    lp.run(task, &Cancellation::new()).await.unwrap();

    let mut commits = Vec::new();
    for event in h.events(&id) {
        match event {
            LoopEvent::Patches {
                applied,
                failed,
                commit,
                files_changed,
                diff_artifact,
                ..
            } => {
                assert_eq!(applied, vec![PathBuf::from("src/lib.rs")]);
                assert!(failed.is_empty());
                assert_eq!(files_changed, 1);
                let diff = fs::read_to_string(diff_artifact.unwrap()).unwrap();
                assert!(diff.contains("+    "));
                commits.push(commit.unwrap());
            }
            LoopEvent::TestResult { log_artifact, .. } => {
                assert!(log_artifact.unwrap().exists());
            }
            _ => {}
        }
    }
    assert_eq!(commits.len(), 2);
    assert_ne!(commits[0], commits[1]);
}

#[tokio::test]
async fn test_diagnosis_sees_only_the_previous_attempt() {
    let h = Harness::new();
    let generator = Arc::new(ScriptedGenerator::new());
    let lp = h.build(
        generator.clone(),
        Arc::new(ScriptedVerifier::failing()),
        config(3),
    );

    let task = lp.submit("make answer return 42", &h.source).unwrap();
    lp.run(task, &Cancellation::new()).await.unwrap();

    let seen = generator.diagnoses();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].iteration, 2);
    assert!(seen[0].last_transcript.contains("run 1 failed"));
    assert_eq!(seen[1].iteration, 3);
    assert!(seen[1].last_transcript.contains("run 2 failed"));
    assert!(!seen[1].last_transcript.contains("run 1 failed"));
    assert_eq!(seen[1].changed_paths, vec![PathBuf::from("src/lib.rs")]);
    assert!(seen[1].apply_failures.is_none());
}

#[tokio::test]
async fn test_apply_failures_reach_the_next_diagnosis() {
    let h = Harness::new();
    let escaping = GeneratorReply::from_messages(vec![GeneratorMessage::Patches {
        patches: vec![
            FileChange::new("../outside.txt", "nope\n"),
            FileChange::new("src/lib.rs", "pub fn answer() -> u32 {\n    1\n}\n"),
        ],
    }]);
    let generator = Arc::new(ScriptedGenerator::with_replies(vec![Ok(escaping)]));
    let lp = h.build(
        generator.clone(),
        Arc::new(ScriptedVerifier::passing_on(&[2])),
        config(2),
    );

    let task = lp.submit("make answer return 42", &h.source).unwrap();
    let id = task.id.clone();
    let outcome = lp.run(task, &Cancellation::new()).await.unwrap();
    assert!(outcome.is_success());

    let first_patches = h
        .events(&id)
        .into_iter()
        .find_map(|e| match e {
            LoopEvent::Patches { applied, failed, .. } => Some((applied, failed)),
            _ => None,
        })
        .unwrap();
    assert_eq!(first_patches.0, vec![PathBuf::from("src/lib.rs")]);
    assert!(first_patches.1.contains_key(Path::new("../outside.txt")));
    assert!(!h.dir.path().join("outside.txt").exists());

    let seen = generator.diagnoses();
    assert!(seen[0].apply_failures.as_deref().unwrap().contains("outside.txt"));
}

#[tokio::test]
async fn test_malformed_reply_is_recorded_and_loop_continues() {
    let h = Harness::new();
    let generator = Arc::new(ScriptedGenerator::with_replies(vec![Ok(
        GeneratorReply::parse("Sorry, I am not sure what to change."),
    )]));
    let verifier = Arc::new(ScriptedVerifier::passing_on(&[2]));
    let lp = h.build(generator, verifier, config(3));

    let task = lp.submit("make answer return 42", &h.source).unwrap();
    let id = task.id.clone();
    let outcome = lp.run(task, &Cancellation::new()).await.unwrap();

    assert!(matches!(outcome, LoopOutcome::Completed { iterations: 2, .. }));

    let names = h.names(&id);
    assert_eq!(
        &names[..7],
        ["created", "status", "iteration", "error", "plan", "patches", "test-result"]
    );
    match &h.events(&id)[3] {
        LoopEvent::Error { fatal, message } => {
            assert!(!fatal);
            assert!(message.contains("Unusable generator reply"));
        }
        other => panic!("expected error event, got {:?}", other),
    }
    match &h.events(&id)[5] {
        LoopEvent::Patches { proposed, applied, .. } => {
            assert!(proposed.is_empty());
            assert!(applied.is_empty());
        }
        other => panic!("expected patches event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_generator_unavailable_fails_the_task() {
    let h = Harness::new();
    let generator = Arc::new(ScriptedGenerator::with_replies(vec![Err(
        GeneratorError::Unavailable("agent binary missing".to_string()),
    )]));
    let verifier = Arc::new(ScriptedVerifier::failing());
    let lp = h.build(generator, verifier.clone(), config(3));

    let task = lp.submit("make answer return 42", &h.source).unwrap();
    let id = task.id.clone();
    let outcome = lp.run(task, &Cancellation::new()).await.unwrap();

    assert!(matches!(outcome, LoopOutcome::Failed { iterations: 1, .. }));
    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(verifier.runs(), 0);

    assert_eq!(
        h.names(&id),
        ["created", "status", "iteration", "error", "failure", "complete"]
    );
    let record = h.db.get(&id).unwrap().unwrap();
    assert_eq!(record.status, "failed");
    assert!(record.reason.unwrap().contains("agent binary missing"));
}

#[tokio::test]
async fn test_generator_timeout_fails_the_task() {
    let h = Harness::new();
    let generator = Arc::new(ScriptedGenerator::slow(Duration::from_secs(30)));
    let lp = h.build(
        generator,
        Arc::new(ScriptedVerifier::failing()),
        config(3).with_generator_timeout(Duration::from_millis(50)),
    );

    let task = lp.submit("make answer return 42", &h.source).unwrap();
    let outcome = lp.run(task, &Cancellation::new()).await.unwrap();

    match outcome {
        LoopOutcome::Failed { error, .. } => assert!(error.contains("timed out")),
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_verification_timeout_is_a_failed_run() {
    let h = Harness::new();
    let lp = h.build(
        Arc::new(ScriptedGenerator::new()),
        Arc::new(HangingVerifier::default()),
        config(1).with_verification_timeout(Duration::from_millis(50)),
    );

    let task = lp.submit("make answer return 42", &h.source).unwrap();
    let id = task.id.clone();
    let outcome = lp.run(task, &Cancellation::new()).await.unwrap();

    assert!(matches!(outcome, LoopOutcome::BudgetExhausted { iterations: 1, .. }));
    let timed_out = h.events(&id).into_iter().any(|e| {
        matches!(
            e,
            LoopEvent::TestResult {
                passed: false,
                timed_out: true,
                ..
            }
        )
    });
    assert!(timed_out);
}

#[tokio::test]
async fn test_cancel_during_verification() {
    let h = Harness::new();
    let verifier = Arc::new(HangingVerifier::default());
    let lp = h.build(
        Arc::new(ScriptedGenerator::new()),
        verifier.clone(),
        config(3),
    );

    let task = lp.submit("make answer return 42", &h.source).unwrap();
    let id = task.id.clone();
    let cancel = Cancellation::new();

    let (outcome, _) = tokio::join!(lp.run(task, &cancel), async {
        verifier.started.notified().await;
        cancel.cancel();
    });
    let outcome = outcome.unwrap();

    assert!(matches!(outcome, LoopOutcome::Cancelled { iterations: 1, .. }));
    assert_eq!(outcome.exit_code(), 130);

    let names = h.names(&id);
    assert!(!names.contains(&"test-result".to_string()));
    assert_eq!(&names[names.len() - 2..], ["failure", "complete"]);

    let record = h.db.get(&id).unwrap().unwrap();
    assert_eq!(record.status, "failed");
    assert_eq!(record.reason.as_deref(), Some("cancelled"));
}

#[tokio::test]
async fn test_cancel_between_iterations() {
    let h = Harness::new();
    let generator = Arc::new(ScriptedGenerator::new());
    let cancel = Cancellation::new();
    let verifier = Arc::new(CancellingVerifier {
        cancel: cancel.clone(),
        runs: Mutex::new(0),
    });
    let lp = h.build(generator.clone(), verifier.clone(), config(3));

    let task = lp.submit("make answer return 42", &h.source).unwrap();
    let id = task.id.clone();
    let outcome = lp.run(task, &cancel).await.unwrap();

    assert!(matches!(outcome, LoopOutcome::Cancelled { iterations: 1, .. }));
    assert_eq!(*verifier.runs.lock().unwrap(), 1);
    assert!(generator.diagnoses().is_empty());

    let names = h.names(&id);
    assert_eq!(names.iter().filter(|n| *n == "iteration").count(), 1);
    assert_eq!(names.iter().filter(|n| *n == "test-result").count(), 1);
    assert_eq!(&names[names.len() - 2..], ["failure", "complete"]);

    let record = h.db.get(&id).unwrap().unwrap();
    assert_eq!(record.current_iteration, 1);
    assert_eq!(record.reason.as_deref(), Some("cancelled"));
}

#[tokio::test]
async fn test_cancel_while_diagnosing() {
    let h = Harness::new();
    let generator = Arc::new(ScriptedGenerator::hanging_on_diagnosis());
    let verifier = Arc::new(ScriptedVerifier::failing());
    let lp = h.build(generator.clone(), verifier.clone(), config(3));

    let task = lp.submit("make answer return 42", &h.source).unwrap();
    let id = task.id.clone();
    let cancel = Cancellation::new();

    let (outcome, _) = tokio::join!(lp.run(task, &cancel), async {
        generator.diagnosing.notified().await;
        cancel.cancel();
    });
    let outcome = outcome.unwrap();

    assert!(matches!(outcome, LoopOutcome::Cancelled { iterations: 2, .. }));
    assert_eq!(verifier.runs(), 1);
    assert_eq!(generator.diagnoses().len(), 1);

    let names = h.names(&id);
    assert_eq!(names.iter().filter(|n| *n == "iteration").count(), 2);
    assert!(!names.contains(&"analysis".to_string()));
    assert_eq!(&names[names.len() - 2..], ["failure", "complete"]);

    let record = h.db.get(&id).unwrap().unwrap();
    assert_eq!(record.status, "failed");
    assert_eq!(record.reason.as_deref(), Some("cancelled"));
}

#[tokio::test]
async fn test_cancel_before_first_iteration() {
    let h = Harness::new();
    let generator = Arc::new(ScriptedGenerator::new());
    let lp = h.build(
        generator.clone(),
        Arc::new(ScriptedVerifier::failing()),
        config(3),
    );

    let task = lp.submit("make answer return 42", &h.source).unwrap();
    let id = task.id.clone();
    let cancel = Cancellation::new();
    cancel.cancel();

    let outcome = lp.run(task, &cancel).await.unwrap();
    assert!(matches!(outcome, LoopOutcome::Cancelled { iterations: 0, .. }));
    assert_eq!(*generator.proposals.lock().unwrap(), 0);
    assert_eq!(h.names(&id), ["created", "status", "failure", "complete"]);
}

#[tokio::test]
async fn test_run_rejects_non_pending_task() {
    let h = Harness::new();
    let lp = h.build(
        Arc::new(ScriptedGenerator::new()),
        Arc::new(ScriptedVerifier::passing_on(&[1])),
        config(1),
    );

    let task = lp.submit("make answer return 42", &h.source).unwrap();
    let mut copy = task.clone();
    lp.run(task, &Cancellation::new()).await.unwrap();

    copy.transition(TaskStatus::Planning).unwrap();
    let err = lp.run(copy, &Cancellation::new()).await.unwrap_err();
    assert!(err.to_string().contains("not pending"));
}

#[tokio::test]
async fn test_concurrent_tasks_keep_their_own_order() {
    let h = Harness::new();
    let lp = h.build(
        Arc::new(ScriptedGenerator::new()),
        Arc::new(ScriptedVerifier::failing()),
        config(2),
    );

    let first = lp.submit("first task", &h.source).unwrap();
    let second = lp.submit("second task", &h.source).unwrap();
    assert_ne!(first.workspace, second.workspace);
    let (first_id, second_id) = (first.id.clone(), second.id.clone());

    let cancel = Cancellation::new();
    let (a, b) = tokio::join!(lp.run(first, &cancel), lp.run(second, &cancel));
    a.unwrap();
    b.unwrap();

    let expected = [
        "created",
        "status",
        "iteration",
        "plan",
        "patches",
        "test-result",
        "iteration",
        "analysis",
        "patches",
        "test-result",
        "failure",
        "complete",
    ];
    assert_eq!(h.names(&first_id), expected);
    assert_eq!(h.names(&second_id), expected);
    assert!(h
        .bus
        .history(&first_id)
        .iter()
        .all(|r| r.task_id == first_id));

    // Finished tasks can be dropped from the bus; the store keeps its trail
    assert!(h.bus.forget(&first_id));
    assert!(h.bus.history(&first_id).is_empty());
    assert_eq!(h.names(&second_id), expected);
    assert_eq!(h.db.events().list(&first_id).unwrap().len(), expected.len());
}
