mod common;

use std::sync::Arc;
use std::thread;

use rstest::rstest;

use common::{batch_spec, engine_with, engine_with_tracker, FakeInfraClient};
use stratus::infra::OperationStatus;
use stratus::lifecycle::ClusterState;
use stratus::{StratusError, TrackerConfig};

#[test]
fn test_create_runs_to_completion() {
    let client = FakeInfraClient::new();
    let engine = engine_with(Arc::clone(&client));

    let pending = engine.orchestrator.submit_create(batch_spec("hpc1")).unwrap();
    let state = engine.orchestrator.wait(pending).unwrap();

    assert_eq!(state, ClusterState::CreateComplete);
    let cluster = engine.orchestrator.store().get("hpc1").unwrap();
    assert_eq!(cluster.state, ClusterState::CreateComplete);
    assert!(cluster.spec.is_some());
    assert_eq!(client.stack_status("hpc1").as_deref(), Some("CREATE_COMPLETE"));
    assert!(!engine.orchestrator.registry().is_active("hpc1"));
}

#[test]
fn test_create_refuses_existing_stack_name() {
    let client = FakeInfraClient::new();
    client.seed_stack("hpc1", "CREATE_COMPLETE", Default::default());
    let engine = engine_with(Arc::clone(&client));

    let err = engine
        .orchestrator
        .submit_create(batch_spec("hpc1"))
        .unwrap_err();
    assert!(matches!(err, StratusError::Conflict { .. }));
    // Refused before anything reached the backend.
    assert_eq!(client.submit_count(), 0);
    assert!(engine.orchestrator.store().get("hpc1").is_none());
}

#[test]
fn test_create_rollback_resolves_to_create_failed() {
    let client = FakeInfraClient::new();
    client.enqueue_outcome(OperationStatus::RolledBack("insufficient capacity".into()));
    let engine = engine_with(Arc::clone(&client));

    let pending = engine.orchestrator.submit_create(batch_spec("hpc1")).unwrap();
    let state = engine.orchestrator.wait(pending).unwrap();

    assert_eq!(state, ClusterState::CreateFailed);
    // The record is kept so the failure can be inspected and cleaned up.
    let cluster = engine.orchestrator.store().get("hpc1").unwrap();
    assert_eq!(cluster.state, ClusterState::CreateFailed);
    assert!(engine.orchestrator.submit_delete("hpc1").is_ok());
}

#[test]
fn test_concurrent_creates_have_one_winner() {
    let client = FakeInfraClient::new();
    let engine = engine_with(Arc::clone(&client));
    let orchestrator = Arc::clone(&engine.orchestrator);

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let orchestrator = Arc::clone(&orchestrator);
            thread::spawn(move || orchestrator.submit_create(batch_spec("hpc1")))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert_eq!(client.submit_count(), 1);
    for result in results {
        if let Err(err) = result {
            assert!(matches!(
                err,
                StratusError::OperationInProgress { .. } | StratusError::Conflict { .. }
            ));
        }
    }
}

#[rstest]
#[case::update("update")]
#[case::delete("delete")]
fn test_commands_blocked_while_operation_in_flight(#[case] command: &str) {
    let client = FakeInfraClient::new();
    let engine = engine_with(Arc::clone(&client));

    let pending = engine.orchestrator.submit_create(batch_spec("hpc1")).unwrap();

    let err = match command {
        "update" => {
            let mut target = batch_spec("hpc1");
            target.fleets[0].max_count = 20;
            engine.orchestrator.submit_update(target).unwrap_err()
        }
        "delete" => engine.orchestrator.submit_delete("hpc1").unwrap_err(),
        other => panic!("unknown command {}", other),
    };
    assert!(matches!(err, StratusError::OperationInProgress { .. }));

    // The in-flight create still resolves normally.
    assert_eq!(
        engine.orchestrator.wait(pending).unwrap(),
        ClusterState::CreateComplete
    );
}

#[test]
fn test_delete_removes_cluster_record() {
    let client = FakeInfraClient::new();
    let engine = engine_with(Arc::clone(&client));

    let pending = engine.orchestrator.submit_create(batch_spec("hpc1")).unwrap();
    engine.orchestrator.wait(pending).unwrap();

    let pending = engine.orchestrator.submit_delete("hpc1").unwrap();
    let state = engine.orchestrator.wait(pending).unwrap();

    assert_eq!(state, ClusterState::Deleted);
    assert!(engine.orchestrator.store().get("hpc1").is_none());
    assert!(client.stack_status("hpc1").is_none());
    // The name is free for reuse.
    assert!(matches!(
        engine.orchestrator.submit_delete("hpc1").unwrap_err(),
        StratusError::UnknownCluster { .. }
    ));
}

#[test]
fn test_failed_delete_stays_deletable() {
    let client = FakeInfraClient::new();
    client.enqueue_outcome(OperationStatus::Succeeded); // create
    client.enqueue_outcome(OperationStatus::Failed("dependent resource".into()));
    let engine = engine_with(Arc::clone(&client));

    let pending = engine.orchestrator.submit_create(batch_spec("hpc1")).unwrap();
    engine.orchestrator.wait(pending).unwrap();

    let pending = engine.orchestrator.submit_delete("hpc1").unwrap();
    let state = engine.orchestrator.wait(pending).unwrap();
    assert_eq!(state, ClusterState::DeleteInProgress);

    // A second delete attempt is accepted once the token is free.
    let pending = engine.orchestrator.submit_delete("hpc1").unwrap();
    assert_eq!(
        engine.orchestrator.wait(pending).unwrap(),
        ClusterState::Deleted
    );
}

#[test]
fn test_update_success_promotes_target_spec() {
    let client = FakeInfraClient::new();
    let engine = engine_with(Arc::clone(&client));

    let pending = engine.orchestrator.submit_create(batch_spec("hpc1")).unwrap();
    engine.orchestrator.wait(pending).unwrap();

    let mut target = batch_spec("hpc1");
    target.fleets[0].max_count = 20;
    let pending = engine.orchestrator.submit_update(target).unwrap();
    let state = engine.orchestrator.wait(pending).unwrap();

    assert_eq!(state, ClusterState::UpdateComplete);
    let cluster = engine.orchestrator.store().get("hpc1").unwrap();
    assert_eq!(cluster.spec.unwrap().spec().fleets[0].max_count, 20);
    assert!(cluster.pending_spec.is_none());
}

#[test]
fn test_update_rollback_keeps_previous_spec_effective() {
    let client = FakeInfraClient::new();
    client.enqueue_outcome(OperationStatus::Succeeded); // create
    client.enqueue_outcome(OperationStatus::RolledBack("quota exceeded".into()));
    let engine = engine_with(Arc::clone(&client));

    let pending = engine.orchestrator.submit_create(batch_spec("hpc1")).unwrap();
    engine.orchestrator.wait(pending).unwrap();

    let mut target = batch_spec("hpc1");
    target.fleets[0].max_count = 20;
    let pending = engine.orchestrator.submit_update(target).unwrap();
    let state = engine.orchestrator.wait(pending).unwrap();

    assert_eq!(state, ClusterState::UpdateFailed);
    let cluster = engine.orchestrator.store().get("hpc1").unwrap();
    // The pre-update configuration is what is running.
    assert_eq!(cluster.spec.unwrap().spec().fleets[0].max_count, 10);
    assert!(cluster.pending_spec.is_none());

    // A corrected update is accepted from UPDATE_FAILED.
    let mut retry = batch_spec("hpc1");
    retry.fleets[0].max_count = 15;
    assert!(engine.orchestrator.submit_update(retry).is_ok());
}

#[test]
fn test_denied_update_is_never_submitted() {
    let client = FakeInfraClient::new();
    let engine = engine_with(Arc::clone(&client));

    let pending = engine.orchestrator.submit_create(batch_spec("hpc1")).unwrap();
    engine.orchestrator.wait(pending).unwrap();
    let submits_after_create = client.submit_count();

    let mut target = batch_spec("hpc1");
    target.network.subnet_ids = vec!["subnet-9zzz".to_string()];
    let err = engine.orchestrator.submit_update(target).unwrap_err();

    match err {
        StratusError::ImmutableField { changes } => {
            assert_eq!(changes.len(), 1);
            assert_eq!(changes[0].field, "subnet_ids");
        }
        other => panic!("expected ImmutableField, got {:?}", other),
    }
    assert_eq!(client.submit_count(), submits_after_create);
    assert!(!engine.orchestrator.registry().is_active("hpc1"));
}

#[test]
fn test_denied_update_from_update_failed_diffs_against_pre_update_spec() {
    let client = FakeInfraClient::new();
    client.enqueue_outcome(OperationStatus::Succeeded); // create
    client.enqueue_outcome(OperationStatus::RolledBack("quota exceeded".into()));
    let engine = engine_with(Arc::clone(&client));

    let pending = engine.orchestrator.submit_create(batch_spec("hpc1")).unwrap();
    engine.orchestrator.wait(pending).unwrap();

    let mut target = batch_spec("hpc1");
    target.fleets[0].max_count = 20;
    let pending = engine.orchestrator.submit_update(target).unwrap();
    assert_eq!(
        engine.orchestrator.wait(pending).unwrap(),
        ClusterState::UpdateFailed
    );
    let submits_after_rollback = client.submit_count();

    // A network change from UPDATE_FAILED is refused without a submission.
    let mut denied = batch_spec("hpc1");
    denied.network.subnet_ids = vec!["subnet-9zzz".to_string()];
    let err = engine.orchestrator.submit_update(denied).unwrap_err();
    assert!(matches!(err, StratusError::ImmutableField { .. }));
    assert_eq!(client.submit_count(), submits_after_rollback);

    // The diff base is the pre-update spec, not the rolled-back target:
    // resubmitting that same target is a real change and is accepted.
    let mut retry = batch_spec("hpc1");
    retry.fleets[0].max_count = 20;
    assert!(engine.orchestrator.submit_update(retry).is_ok());
    assert_eq!(client.submit_count(), submits_after_rollback + 1);
}

#[test]
fn test_unchanged_spec_is_reported_as_no_changes() {
    let client = FakeInfraClient::new();
    let engine = engine_with(Arc::clone(&client));

    let pending = engine.orchestrator.submit_create(batch_spec("hpc1")).unwrap();
    engine.orchestrator.wait(pending).unwrap();
    let submits_after_create = client.submit_count();

    let err = engine.orchestrator.submit_update(batch_spec("hpc1")).unwrap_err();
    assert!(matches!(err, StratusError::NoChanges { .. }));
    assert_eq!(client.submit_count(), submits_after_create);
    assert!(!engine.orchestrator.registry().is_active("hpc1"));
}

#[test]
fn test_update_requires_stable_state() {
    let client = FakeInfraClient::new();
    let engine = engine_with(Arc::clone(&client));

    // Fire and forget: dropping the pending operation releases the token but
    // leaves the cluster CREATE_IN_PROGRESS.
    let pending = engine.orchestrator.submit_create(batch_spec("hpc1")).unwrap();
    drop(pending);

    let mut target = batch_spec("hpc1");
    target.fleets[0].max_count = 20;
    let err = engine.orchestrator.submit_update(target).unwrap_err();
    assert!(matches!(err, StratusError::InvalidState { .. }));
}

#[test]
fn test_watch_resolves_on_background_thread() {
    let client = FakeInfraClient::new();
    let engine = engine_with(Arc::clone(&client));

    let pending = engine.orchestrator.submit_create(batch_spec("hpc1")).unwrap();
    let waiter = engine.orchestrator.watch(pending);

    assert_eq!(waiter.join().unwrap(), ClusterState::CreateComplete);
    assert!(!engine.orchestrator.registry().is_active("hpc1"));
}

#[test]
fn test_exhausted_polling_is_inconclusive() {
    let client = FakeInfraClient::new();
    client.set_pending_polls(100);
    let engine = engine_with_tracker(
        Arc::clone(&client),
        TrackerConfig {
            initial_interval_secs: 1,
            backoff_multiplier: 1.0,
            max_interval_secs: 1,
            max_total_wait_secs: 0,
        },
    );

    let pending = engine.orchestrator.submit_create(batch_spec("hpc1")).unwrap();
    let err = engine.orchestrator.wait(pending).unwrap_err();

    assert!(matches!(err, StratusError::Inconclusive { .. }));
    // The operation may still be running; nothing was torn down and the
    // token is released for the operator's next move.
    let cluster = engine.orchestrator.store().get("hpc1").unwrap();
    assert_eq!(cluster.state, ClusterState::CreateInProgress);
    assert!(!engine.orchestrator.registry().is_active("hpc1"));
    assert_eq!(client.stack_status("hpc1").as_deref(), Some("CREATE_IN_PROGRESS"));
}
