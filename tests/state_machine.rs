//! # State Machine Tests
//!
//! Drives the configuration-version/run state machine against a fake
//! Terraform Cloud backend and verifies the core guarantees:
//!
//! - A configuration version is published iff the fingerprint changed
//! - Publishing clears run bookkeeping
//! - A run is only created when none is outstanding and the version uploaded
//! - Terminal failures and plan-only finishes never extract outputs
//! - An applied run is extracted once; later passes see it as processed
//! - Deletion requests exactly one destroy run

use std::sync::Mutex;

use async_trait::async_trait;

use tfc_cluster_controller::crd::TerraformStatus;
use tfc_cluster_controller::reconciler::{
    drive_run, ensure_configuration_version, reconcile_terraform, trigger_destroy, ConfigStep,
    TerraformPhase,
};
use tfc_cluster_controller::run::{FailureReason, RunPhase};
use tfc_cluster_controller::tfc::{
    ConfigurationStatus, ConfigurationVersion, Run, RunCreateOptions, StateVersionOutput, TfcApi,
    TfcError, Workspace,
};

/// Recording fake backend. Returned statuses are configurable per test;
/// every mutating call is recorded for assertion.
struct FakeTfc {
    calls: Mutex<Vec<String>>,
    run_creates: Mutex<Vec<RunCreateOptions>>,
    configuration_status: Mutex<ConfigurationStatus>,
    run_phase: Mutex<RunPhase>,
    counter: Mutex<u32>,
}

impl FakeTfc {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            run_creates: Mutex::new(Vec::new()),
            configuration_status: Mutex::new(ConfigurationStatus::Uploaded),
            run_phase: Mutex::new(RunPhase::Pending),
            counter: Mutex::new(0),
        }
    }

    fn with_configuration_status(self, status: ConfigurationStatus) -> Self {
        *self.configuration_status.lock().unwrap() = status;
        self
    }

    fn with_run_phase(self, phase: RunPhase) -> Self {
        *self.run_phase.lock().unwrap() = phase;
        self
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn next_id(&self) -> u32 {
        let mut counter = self.counter.lock().unwrap();
        *counter += 1;
        *counter
    }
}

#[async_trait]
impl TfcApi for FakeTfc {
    async fn workspace_read(
        &self,
        organization: &str,
        workspace: &str,
    ) -> Result<Workspace, TfcError> {
        self.record(format!("workspace_read {organization}/{workspace}"));
        Ok(Workspace {
            id: "ws-1".to_string(),
            current_state_version_id: Some("sv-1".to_string()),
        })
    }

    async fn configuration_version_create(
        &self,
        workspace_id: &str,
    ) -> Result<ConfigurationVersion, TfcError> {
        let id = format!("cv-{}", self.next_id());
        self.record(format!("configuration_version_create {workspace_id}"));
        Ok(ConfigurationVersion {
            id: id.clone(),
            status: ConfigurationStatus::Pending,
            upload_url: Some(format!("https://archivist.test/upload/{id}")),
        })
    }

    async fn configuration_version_upload(
        &self,
        upload_url: &str,
        _artifact: &[u8],
    ) -> Result<(), TfcError> {
        self.record(format!("configuration_version_upload {upload_url}"));
        Ok(())
    }

    async fn configuration_version_read(
        &self,
        id: &str,
    ) -> Result<ConfigurationVersion, TfcError> {
        self.record(format!("configuration_version_read {id}"));
        Ok(ConfigurationVersion {
            id: id.to_string(),
            status: *self.configuration_status.lock().unwrap(),
            upload_url: None,
        })
    }

    async fn run_create(&self, options: RunCreateOptions) -> Result<Run, TfcError> {
        let id = format!("run-{}", self.next_id());
        self.record(format!("run_create {}", options.workspace_id));
        self.run_creates.lock().unwrap().push(options);
        Ok(Run {
            id,
            status: RunPhase::Pending,
        })
    }

    async fn run_read(&self, id: &str) -> Result<Run, TfcError> {
        self.record(format!("run_read {id}"));
        Ok(Run {
            id: id.to_string(),
            status: *self.run_phase.lock().unwrap(),
        })
    }

    async fn state_outputs_list(
        &self,
        state_version_id: &str,
    ) -> Result<Vec<StateVersionOutput>, TfcError> {
        self.record(format!("state_outputs_list {state_version_id}"));
        Ok(Vec::new())
    }
}

fn workspace() -> Workspace {
    Workspace {
        id: "ws-1".to_string(),
        current_state_version_id: Some("sv-1".to_string()),
    }
}

const DIGEST: &str = "abc123";

fn status_with_uploaded_version() -> TerraformStatus {
    TerraformStatus {
        configuration_version_id: Some("cv-1".to_string()),
        configuration_hash: Some(DIGEST.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn first_pass_publishes_configuration_version() {
    let tfc = FakeTfc::new();
    let mut status = TerraformStatus::default();

    let step = ensure_configuration_version(&tfc, "ws-1", &mut status, b"module {}", DIGEST)
        .await
        .unwrap();

    assert_eq!(step, ConfigStep::Published);
    assert_eq!(status.configuration_version_id.as_deref(), Some("cv-1"));
    assert_eq!(status.configuration_hash.as_deref(), Some(DIGEST));
    assert_eq!(
        tfc.calls(),
        vec![
            "configuration_version_create ws-1",
            "configuration_version_upload https://archivist.test/upload/cv-1",
        ]
    );
}

#[tokio::test]
async fn digest_change_republishes_and_clears_run_bookkeeping() {
    let tfc = FakeTfc::new();
    let mut status = TerraformStatus {
        configuration_version_id: Some("cv-old".to_string()),
        configuration_hash: Some("old-digest".to_string()),
        run_id: Some("run-old".to_string()),
        run_status: Some("applied".to_string()),
        run_started_at: Some("2026-08-25T00:00:00Z".to_string()),
        run_finished_at: Some("2026-08-25T00:10:00Z".to_string()),
    };

    let step = ensure_configuration_version(&tfc, "ws-1", &mut status, b"module {}", DIGEST)
        .await
        .unwrap();

    assert_eq!(step, ConfigStep::Published);
    assert_eq!(status.configuration_version_id.as_deref(), Some("cv-1"));
    assert_eq!(status.run_id, None);
    assert_eq!(status.run_status, None);
    assert_eq!(status.run_started_at, None);
    assert_eq!(status.run_finished_at, None);
}

#[tokio::test]
async fn unchanged_digest_does_not_republish() {
    let tfc = FakeTfc::new();
    let mut status = status_with_uploaded_version();

    let step = ensure_configuration_version(&tfc, "ws-1", &mut status, b"module {}", DIGEST)
        .await
        .unwrap();

    assert_eq!(step, ConfigStep::Ready("cv-1".to_string()));
    assert_eq!(tfc.calls(), vec!["configuration_version_read cv-1"]);
}

#[tokio::test]
async fn pending_version_defers_without_starting_a_run() {
    let tfc = FakeTfc::new().with_configuration_status(ConfigurationStatus::Pending);
    let mut status = status_with_uploaded_version();

    let phase = reconcile_terraform(
        &tfc,
        &workspace(),
        &mut status,
        b"module {}",
        DIGEST,
        "test".to_string(),
        true,
    )
    .await
    .unwrap();

    assert_eq!(phase, TerraformPhase::ConfigProcessing);
    assert!(tfc.run_creates.lock().unwrap().is_empty());
}

#[tokio::test]
async fn errored_version_is_republished_on_the_next_pass() {
    let tfc = FakeTfc::new().with_configuration_status(ConfigurationStatus::Errored);
    let mut status = status_with_uploaded_version();

    let step = ensure_configuration_version(&tfc, "ws-1", &mut status, b"module {}", DIGEST)
        .await
        .unwrap();
    assert_eq!(step, ConfigStep::Processing);
    assert_eq!(status.configuration_version_id, None);

    let step = ensure_configuration_version(&tfc, "ws-1", &mut status, b"module {}", DIGEST)
        .await
        .unwrap();
    assert_eq!(step, ConfigStep::Published);
}

#[tokio::test]
async fn run_is_created_only_when_none_outstanding() {
    let tfc = FakeTfc::new();
    let mut status = status_with_uploaded_version();

    let phase = drive_run(&tfc, "ws-1", "cv-1", "test".to_string(), true, &mut status)
        .await
        .unwrap();

    assert_eq!(phase, TerraformPhase::RunStarted);
    assert_eq!(status.run_id.as_deref(), Some("run-1"));
    assert!(status.run_started_at.is_some());

    let creates = tfc.run_creates.lock().unwrap();
    assert_eq!(creates.len(), 1);
    assert!(creates[0].auto_apply);
    assert!(!creates[0].is_destroy);
    assert_eq!(
        creates[0].configuration_version_id.as_deref(),
        Some("cv-1")
    );
}

#[tokio::test]
async fn outstanding_run_is_polled_not_duplicated() {
    let tfc = FakeTfc::new().with_run_phase(RunPhase::Applying);
    let mut status = status_with_uploaded_version();
    status.run_id = Some("run-1".to_string());

    let phase = drive_run(&tfc, "ws-1", "cv-1", "test".to_string(), true, &mut status)
        .await
        .unwrap();

    assert_eq!(phase, TerraformPhase::RunInProgress);
    assert_eq!(status.run_status.as_deref(), Some("applying"));
    assert!(tfc.run_creates.lock().unwrap().is_empty());
}

#[tokio::test]
async fn terminal_failures_report_their_reason() {
    for (run_phase, reason) in [
        (RunPhase::Discarded, FailureReason::Discarded),
        (RunPhase::Canceled, FailureReason::Canceled),
        (RunPhase::ForceCanceled, FailureReason::Canceled),
        (RunPhase::Errored, FailureReason::Errored),
    ] {
        let tfc = FakeTfc::new().with_run_phase(run_phase);
        let mut status = status_with_uploaded_version();
        status.run_id = Some("run-1".to_string());

        let phase = drive_run(&tfc, "ws-1", "cv-1", "test".to_string(), true, &mut status)
            .await
            .unwrap();

        assert_eq!(phase, TerraformPhase::RunFailed(reason));
        assert!(status.run_finished_at.is_none());
        assert!(tfc.run_creates.lock().unwrap().is_empty());
    }
}

#[tokio::test]
async fn planned_and_finished_is_a_clean_noop() {
    let tfc = FakeTfc::new().with_run_phase(RunPhase::PlannedAndFinished);
    let mut status = status_with_uploaded_version();
    status.run_id = Some("run-1".to_string());

    let phase = drive_run(&tfc, "ws-1", "cv-1", "test".to_string(), false, &mut status)
        .await
        .unwrap();

    assert_eq!(phase, TerraformPhase::PlannedAndFinished);
    assert!(status.run_finished_at.is_none());
}

#[tokio::test]
async fn applied_run_reports_applied_until_processed() {
    let tfc = FakeTfc::new().with_run_phase(RunPhase::Applied);
    let mut status = status_with_uploaded_version();
    status.run_id = Some("run-1".to_string());

    let phase = drive_run(&tfc, "ws-1", "cv-1", "test".to_string(), true, &mut status)
        .await
        .unwrap();
    assert_eq!(phase, TerraformPhase::Applied);
    assert_eq!(status.run_status.as_deref(), Some("applied"));

    // A pass interrupted before the orchestrator records the finish time
    // sees Applied again and re-extracts.
    let phase = drive_run(&tfc, "ws-1", "cv-1", "test".to_string(), true, &mut status)
        .await
        .unwrap();
    assert_eq!(phase, TerraformPhase::Applied);
}

#[tokio::test]
async fn processed_run_is_not_extracted_twice() {
    let tfc = FakeTfc::new().with_run_phase(RunPhase::Applied);
    let mut status = status_with_uploaded_version();
    status.run_id = Some("run-1".to_string());
    // The finish timestamp is written after extraction succeeded.
    status.run_finished_at = Some("2026-08-26T00:00:00Z".to_string());

    let phase = drive_run(&tfc, "ws-1", "cv-1", "test".to_string(), true, &mut status)
        .await
        .unwrap();

    assert_eq!(phase, TerraformPhase::AlreadyApplied);
    assert!(tfc.run_creates.lock().unwrap().is_empty());
}

#[tokio::test]
async fn full_convergence_from_empty_status() {
    // Pass 1: publish. Pass 2: version uploaded, run started.
    // Pass 3: run applied.
    let tfc = FakeTfc::new();
    let mut status = TerraformStatus::default();

    let phase = reconcile_terraform(
        &tfc,
        &workspace(),
        &mut status,
        b"module {}",
        DIGEST,
        "test".to_string(),
        true,
    )
    .await
    .unwrap();
    assert_eq!(phase, TerraformPhase::ConfigPublished);

    let phase = reconcile_terraform(
        &tfc,
        &workspace(),
        &mut status,
        b"module {}",
        DIGEST,
        "test".to_string(),
        true,
    )
    .await
    .unwrap();
    assert_eq!(phase, TerraformPhase::RunStarted);

    *tfc.run_phase.lock().unwrap() = RunPhase::Applied;
    let phase = reconcile_terraform(
        &tfc,
        &workspace(),
        &mut status,
        b"module {}",
        DIGEST,
        "test".to_string(),
        true,
    )
    .await
    .unwrap();
    assert_eq!(phase, TerraformPhase::Applied);

    // Exactly one version published and one run created across all passes.
    let calls = tfc.calls();
    assert_eq!(
        calls
            .iter()
            .filter(|call| call.starts_with("configuration_version_create"))
            .count(),
        1
    );
    assert_eq!(tfc.run_creates.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn content_change_after_apply_extracts_the_new_runs_outputs() {
    // Status left behind by a fully processed apply.
    let tfc = FakeTfc::new();
    let mut status = TerraformStatus {
        configuration_version_id: Some("cv-old".to_string()),
        configuration_hash: Some("old-digest".to_string()),
        run_id: Some("run-old".to_string()),
        run_status: Some("applied".to_string()),
        run_started_at: Some("2026-08-25T00:00:00Z".to_string()),
        run_finished_at: Some("2026-08-25T00:10:00Z".to_string()),
    };

    // Content changed: publish, then start a fresh run.
    let phase = reconcile_terraform(
        &tfc,
        &workspace(),
        &mut status,
        b"module { changed }",
        DIGEST,
        "test".to_string(),
        true,
    )
    .await
    .unwrap();
    assert_eq!(phase, TerraformPhase::ConfigPublished);

    let phase = reconcile_terraform(
        &tfc,
        &workspace(),
        &mut status,
        b"module { changed }",
        DIGEST,
        "test".to_string(),
        true,
    )
    .await
    .unwrap();
    assert_eq!(phase, TerraformPhase::RunStarted);
    assert_eq!(status.run_finished_at, None);

    // The new run applies; its outputs must be extracted, not skipped as
    // already processed.
    *tfc.run_phase.lock().unwrap() = RunPhase::Applied;
    let phase = reconcile_terraform(
        &tfc,
        &workspace(),
        &mut status,
        b"module { changed }",
        DIGEST,
        "test".to_string(),
        true,
    )
    .await
    .unwrap();
    assert_eq!(phase, TerraformPhase::Applied);
}

#[tokio::test]
async fn destroy_requests_exactly_one_destroy_run() {
    let tfc = FakeTfc::new();

    trigger_destroy(&tfc, "ws-1", "test destroy".to_string())
        .await
        .unwrap();

    let creates = tfc.run_creates.lock().unwrap();
    assert_eq!(creates.len(), 1);
    assert!(creates[0].is_destroy);
    assert!(creates[0].auto_apply);
    assert_eq!(creates[0].configuration_version_id, None);
}
