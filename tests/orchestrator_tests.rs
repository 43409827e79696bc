//! Orchestrator tests against a scripted in-memory backend
//!
//! Run with: cargo test --test orchestrator_tests

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::Notify;
use tokio_test::{assert_err, assert_ok};

use agenda_sync::backend::SyncBackend;
use agenda_sync::error::{AgendaSyncError, ErrorKind, Result};
use agenda_sync::sync::{
    override_key, ActionKind, AnalyzeOutcome, Conflict, ConflictOption, OverrideAction,
    SyncOrchestrator, SyncStep, MAX_SYNC_EVENTS,
};
use agenda_sync::types::*;

/// Backend answering from queues and recording what it was sent
#[derive(Default)]
struct ScriptedBackend {
    analyses: Mutex<VecDeque<Result<AnalyzeResponse>>>,
    syncs: Mutex<VecDeque<Result<SyncResponse>>>,
    patients: Mutex<Vec<Patient>>,
    sent: Mutex<Vec<SyncRequest>>,
    created: Mutex<Vec<NewPatient>>,
    /// When set, `analyze` waits for a notification before answering
    analyze_gate: Option<Arc<Notify>>,
    /// Same for `sync`, after the request is recorded
    sync_gate: Option<Arc<Notify>>,
    /// Same for `list_patients`
    patients_gate: Option<Arc<Notify>>,
    patients_unavailable: bool,
}

impl ScriptedBackend {
    fn with_analysis(self, response: Result<AnalyzeResponse>) -> Self {
        self.analyses.lock().push_back(response);
        self
    }

    fn with_sync(self, response: Result<SyncResponse>) -> Self {
        self.syncs.lock().push_back(response);
        self
    }

    fn with_patients(self, patients: Vec<Patient>) -> Self {
        *self.patients.lock() = patients;
        self
    }
}

#[async_trait]
impl SyncBackend for ScriptedBackend {
    async fn analyze(&self, _ambulatorio: &str, _year: i32) -> Result<AnalyzeResponse> {
        if let Some(gate) = &self.analyze_gate {
            gate.notified().await;
        }
        self.analyses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(AgendaSyncError::Connection("no scripted analysis".into())))
    }

    async fn sync(&self, request: &SyncRequest) -> Result<SyncResponse> {
        self.sent.lock().push(request.clone());
        if let Some(gate) = &self.sync_gate {
            gate.notified().await;
        }
        self.syncs
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(AgendaSyncError::Connection("no scripted sync".into())))
    }

    async fn create_patient(&self, patient: &NewPatient) -> Result<Patient> {
        let mut created = self.created.lock();
        created.push(patient.clone());
        Ok(Patient {
            id: format!("new{}", created.len()),
            cognome: patient.cognome.clone(),
            nome: patient.nome.clone(),
            tipo: patient.tipo,
        })
    }

    async fn list_patients(&self, _ambulatorio: &str) -> Result<Vec<Patient>> {
        if let Some(gate) = &self.patients_gate {
            gate.notified().await;
        }
        if self.patients_unavailable {
            return Err(AgendaSyncError::Rejected {
                status: 503,
                detail: "Service unavailable".into(),
            });
        }
        Ok(self.patients.lock().clone())
    }

    async fn backup_info(&self, _ambulatorio: &str) -> Result<BackupInfo> {
        Ok(BackupInfo {
            has_backup: true,
            created_at: None,
            patients_count: 12,
            appointments_count: 80,
        })
    }

    async fn rollback(&self, _ambulatorio: &str) -> Result<RollbackResult> {
        Ok(RollbackResult {
            restored_patients: 12,
            restored_appointments: 80,
        })
    }

    async fn list_choices(&self, _ambulatorio: &str) -> Result<Vec<SavedChoice>> {
        Ok(vec![])
    }

    async fn delete_choice(&self, _choice_id: &str) -> Result<()> {
        Ok(())
    }

    async fn clear_choices(&self, _ambulatorio: &str) -> Result<ClearChoicesResult> {
        Ok(ClearChoicesResult { deleted_choices: 3 })
    }
}

fn mario_conflicts() -> AnalyzeResponse {
    AnalyzeResponse {
        success: true,
        has_conflicts: true,
        conflicts: vec![Conflict::new(
            "c1",
            "Nomi simili",
            vec![
                ConflictOption::new("Mario Rosi").with_dates(["2025-03-04"]),
                ConflictOption::new("Mario Rossi")
                    .existing("p1")
                    .with_dates(["2025-03-11"]),
            ],
        )],
    }
}

fn ok_sync() -> Result<SyncResponse> {
    Ok(SyncResponse {
        success: true,
        created_patients: 0,
        created_appointments: 2,
    })
}

fn orchestrator(backend: ScriptedBackend) -> (SyncOrchestrator<ScriptedBackend>, Arc<ScriptedBackend>) {
    let backend = Arc::new(backend);
    (
        SyncOrchestrator::new(Arc::clone(&backend), "pta_centro", 2025),
        backend,
    )
}

#[tokio::test]
async fn test_full_flow_with_auto_association() {
    let (orch, backend) = orchestrator(
        ScriptedBackend::default()
            .with_analysis(Ok(mario_conflicts()))
            .with_sync(ok_sync()),
    );

    assert_eq!(orch.analyze().await.unwrap(), AnalyzeOutcome::Conflicts(1));
    assert_eq!(orch.step(), SyncStep::Conflicts);

    let outcome = orch.confirm().await.unwrap();
    assert_eq!(outcome.created_appointments, 2);
    assert!(outcome.refresh_required);
    assert_eq!(orch.step(), SyncStep::Closed);

    let sent = backend.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].ambulatorio, "pta_centro");
    assert_eq!(sent[0].year, 2025);
    let rosi = &sent[0].conflict_actions["Mario Rosi"];
    assert_eq!(rosi.action, ActionKind::Replace);
    assert_eq!(rosi.replace_with.as_deref(), Some("Mario Rossi"));
    assert_eq!(rosi.replace_with_id.as_deref(), Some("p1"));
    assert!(rosi.auto_associated);
    assert_eq!(
        sent[0].conflict_actions["Mario Rossi"].action,
        ActionKind::Selected
    );
}

#[tokio::test]
async fn test_no_conflicts_syncs_immediately() {
    let (orch, backend) = orchestrator(
        ScriptedBackend::default()
            .with_analysis(Ok(AnalyzeResponse {
                success: true,
                has_conflicts: false,
                conflicts: vec![],
            }))
            .with_sync(ok_sync()),
    );

    match orch.analyze().await.unwrap() {
        AnalyzeOutcome::Synced(outcome) => assert_eq!(outcome.created_appointments, 2),
        other => panic!("expected a direct sync, got {:?}", other),
    }
    assert_eq!(orch.step(), SyncStep::Closed);
    assert!(backend.sent.lock()[0].conflict_actions.is_empty());
}

#[tokio::test]
async fn test_patient_list_failure_does_not_block_analysis() {
    let backend = ScriptedBackend {
        patients_unavailable: true,
        ..Default::default()
    }
    .with_analysis(Ok(mario_conflicts()));
    let (orch, _) = orchestrator(backend);

    assert_eq!(orch.analyze().await.unwrap(), AnalyzeOutcome::Conflicts(1));
    assert!(orch.search_patients("").is_empty());
}

#[tokio::test]
async fn test_analysis_failure_returns_to_initial() {
    let (orch, _) = orchestrator(ScriptedBackend::default().with_analysis(Err(
        AgendaSyncError::Rejected {
            status: 500,
            detail: "Foglio non accessibile".into(),
        },
    )));

    let err = orch.analyze().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServerRejected);
    assert_eq!(orch.step(), SyncStep::Initial);
    assert_eq!(
        orch.with_session(|s| s.last_error().map(str::to_string)),
        Some("Foglio non accessibile".to_string())
    );
    assert!(!orch.events()[0].success);
}

#[tokio::test]
async fn test_sync_failure_keeps_choices_and_overrides() {
    let (orch, backend) = orchestrator(
        ScriptedBackend::default()
            .with_analysis(Ok(mario_conflicts()))
            .with_sync(Err(AgendaSyncError::Connection("reset by peer".into())))
            .with_sync(ok_sync()),
    );

    orch.analyze().await.unwrap();
    orch.toggle("c1", "Mario Rosi").unwrap();
    orch.open_override("c1", "Mario Rossi").unwrap();

    let err = orch.confirm().await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(orch.step(), SyncStep::Conflicts);
    assert_eq!(orch.with_session(|s| s.choices().selected("c1").len()), 2);
    assert_eq!(orch.with_session(|s| s.overrides().len()), 1);

    // Retry is manual and submits the same decisions
    orch.confirm().await.unwrap();
    let sent = backend.sent.lock();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].conflict_actions, sent[1].conflict_actions);
}

#[tokio::test]
async fn test_rejected_sync_payload_is_not_fatal() {
    let (orch, _) = orchestrator(
        ScriptedBackend::default()
            .with_analysis(Ok(mario_conflicts()))
            .with_sync(Ok(SyncResponse::default())),
    );
    orch.analyze().await.unwrap();
    let err = orch.confirm().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServerRejected);
    assert_eq!(orch.step(), SyncStep::Conflicts);
}

#[tokio::test]
async fn test_override_replace_with_loaded_patient() {
    let (orch, backend) = orchestrator(
        ScriptedBackend::default()
            .with_patients(vec![Patient {
                id: "p9".into(),
                cognome: "Rossi".into(),
                nome: "Maria".into(),
                tipo: PatientTipo::Picc,
            }])
            .with_analysis(Ok(mario_conflicts()))
            .with_sync(ok_sync()),
    );

    orch.analyze().await.unwrap();
    let key = override_key("c1", "Mario Rossi");
    orch.open_override("c1", "Mario Rossi").unwrap();
    orch.set_override_action(&key, OverrideAction::Replace).unwrap();
    orch.update(|s| s.set_replace_target(&key, "p9")).unwrap();
    orch.confirm().await.unwrap();

    let sent = backend.sent.lock();
    let rossi = &sent[0].conflict_actions["Mario Rossi"];
    assert_eq!(rossi.action, ActionKind::Replace);
    assert_eq!(rossi.replace_with.as_deref(), Some("Rossi Maria"));
    assert_eq!(rossi.replace_with_id.as_deref(), Some("p9"));
    assert!(!rossi.auto_associated);
}

#[tokio::test]
async fn test_create_patient_and_attach() {
    let (orch, backend) = orchestrator(
        ScriptedBackend::default()
            .with_analysis(Ok(mario_conflicts()))
            .with_sync(ok_sync()),
    );
    orch.analyze().await.unwrap();

    let draft = PatientDraft {
        cognome: " Rosi ".into(),
        nome: "Mario".into(),
        tipo: PatientTipo::Med,
    };
    let patient = orch
        .create_patient_and_attach("c1", "Mario Rosi", &draft)
        .await
        .unwrap();
    assert_eq!(patient.id, "new1");
    assert_eq!(backend.created.lock()[0].cognome, "Rosi");
    assert_eq!(backend.created.lock()[0].ambulatorio, "pta_centro");
    assert_eq!(orch.search_patients("rosi").len(), 1);

    orch.confirm().await.unwrap();
    let sent = backend.sent.lock();
    let rosi = &sent[0].conflict_actions["Mario Rosi"];
    assert_eq!(rosi.replace_with_id.as_deref(), Some("new1"));
    assert_eq!(rosi.replace_with.as_deref(), Some("Rosi Mario"));

    // Session state, temp patients included, is gone after success
    assert_eq!(orch.with_session(|s| s.patients().created().len()), 0);
}

#[tokio::test]
async fn test_create_patient_requires_cognome() {
    let (orch, backend) = orchestrator(ScriptedBackend::default().with_analysis(Ok(mario_conflicts())));
    orch.analyze().await.unwrap();

    let err = orch
        .create_patient_and_attach("c1", "Mario Rosi", &PatientDraft::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(backend.created.lock().is_empty());
}

#[tokio::test]
async fn test_confirm_before_analyze_is_rejected() {
    let (orch, _) = orchestrator(ScriptedBackend::default());
    assert!(matches!(
        orch.confirm().await,
        Err(AgendaSyncError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn test_cancel_during_analysis_drops_late_response() {
    let gate = Arc::new(Notify::new());
    let backend = ScriptedBackend {
        analyze_gate: Some(Arc::clone(&gate)),
        ..Default::default()
    }
    .with_analysis(Ok(mario_conflicts()));
    let (orch, _) = orchestrator(backend);

    let pending = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.analyze().await })
    };
    tokio::task::yield_now().await;
    while orch.step() != SyncStep::Analyzing {
        tokio::task::yield_now().await;
    }

    // A second analyze while the first is in flight is refused
    assert!(matches!(orch.analyze().await, Err(AgendaSyncError::Busy)));

    orch.cancel();
    assert_eq!(orch.step(), SyncStep::Initial);
    gate.notify_one();

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(AgendaSyncError::StaleResponse)));
    assert_eq!(orch.step(), SyncStep::Initial);
    assert!(orch.with_session(|s| s.conflicts().is_empty()));
}

#[tokio::test]
async fn test_no_conflicts_sync_failure_returns_to_initial() {
    let (orch, backend) = orchestrator(
        ScriptedBackend::default()
            .with_analysis(Ok(AnalyzeResponse {
                success: true,
                has_conflicts: false,
                conflicts: vec![],
            }))
            .with_sync(Err(AgendaSyncError::Connection("reset by peer".into()))),
    );

    let err = orch.analyze().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(orch.step(), SyncStep::Initial);
    assert_eq!(
        orch.with_session(|s| s.last_error().map(str::to_string)),
        Some("Connection error".to_string())
    );
    assert_eq!(backend.sent.lock().len(), 1);

    // Analysis succeeded, the direct sync did not
    let events = orch.events();
    assert_eq!(events.len(), 2);
    assert!(events[0].success);
    assert!(!events[1].success);
}

#[tokio::test]
async fn test_cancel_during_sync_leaves_new_session_untouched() {
    let gate = Arc::new(Notify::new());
    let backend = ScriptedBackend {
        sync_gate: Some(Arc::clone(&gate)),
        ..Default::default()
    }
    .with_analysis(Ok(mario_conflicts()))
    .with_analysis(Ok(mario_conflicts()))
    .with_sync(ok_sync());
    let (orch, backend) = orchestrator(backend);

    orch.analyze().await.unwrap();
    let pending = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.confirm().await })
    };
    while backend.sent.lock().is_empty() {
        tokio::task::yield_now().await;
    }
    assert_eq!(orch.step(), SyncStep::Syncing);

    orch.cancel();
    assert_eq!(orch.analyze().await.unwrap(), AnalyzeOutcome::Conflicts(1));
    orch.toggle("c1", "Mario Rosi").unwrap();

    // The first sync answers only now, into the second session
    gate.notify_one();
    let result = pending.await.unwrap();
    assert!(matches!(result, Err(AgendaSyncError::StaleResponse)));

    assert_eq!(orch.step(), SyncStep::Conflicts);
    assert_eq!(orch.with_session(|s| s.last_error().map(str::to_string)), None);
    assert_eq!(orch.with_session(|s| s.conflicts().len()), 1);
    assert_eq!(orch.with_session(|s| s.choices().selected("c1").len()), 2);
}

#[tokio::test]
async fn test_cancel_while_loading_patients_skips_analysis() {
    let gate = Arc::new(Notify::new());
    let backend = ScriptedBackend {
        patients_gate: Some(Arc::clone(&gate)),
        ..Default::default()
    }
    .with_analysis(Ok(mario_conflicts()));
    let (orch, backend) = orchestrator(backend);

    let pending = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.analyze().await })
    };
    while orch.step() != SyncStep::Analyzing {
        tokio::task::yield_now().await;
    }

    orch.cancel();
    gate.notify_one();

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(AgendaSyncError::StaleResponse)));
    assert_eq!(orch.step(), SyncStep::Initial);
    assert_eq!(backend.analyses.lock().len(), 1);
    assert!(!orch.events()[0].success);
}

#[tokio::test]
async fn test_event_log_is_capped() {
    // Nothing scripted: every analysis fails with a connection error
    let (orch, _) = orchestrator(ScriptedBackend::default());

    for _ in 0..MAX_SYNC_EVENTS + 8 {
        assert_err!(orch.analyze().await);
        assert_eq!(orch.step(), SyncStep::Initial);
    }

    let events = orch.events();
    assert_eq!(events.len(), MAX_SYNC_EVENTS);
    assert!(events.iter().all(|e| !e.success));
}

#[tokio::test]
async fn test_rollback_and_choices() {
    let (orch, _) = orchestrator(ScriptedBackend::default().with_analysis(Ok(mario_conflicts())));

    assert!(orch.backup_info().await.unwrap().has_backup);
    assert_eq!(orch.clear_choices().await.unwrap().deleted_choices, 3);
    assert_ok!(orch.restore_choice("choice-1").await);

    orch.analyze().await.unwrap();
    assert_err!(orch.rollback().await);

    orch.cancel();
    let restored = assert_ok!(orch.rollback().await);
    assert_eq!(restored.restored_appointments, 80);
}
