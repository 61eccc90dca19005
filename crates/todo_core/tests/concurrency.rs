use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use todo_core::db::open_db;
use todo_core::{
    ActionCall, ActionDispatcher, ContentionPolicy, DispatchError, EngineConfig, Principal,
    ReplayGuard, SqliteTodoRepository,
};

const WRITERS: usize = 8;

fn principal(name: &str) -> Principal {
    Principal::parse(name).unwrap()
}

/// Every writer proposes the same base version; returns per-writer results.
fn race_same_base_version(policy: ContentionPolicy) -> Vec<Result<u64, DispatchError>> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("race.db");
    let guard = Arc::new(ReplayGuard::new(policy));

    {
        let conn = open_db(&path).unwrap();
        let repo = SqliteTodoRepository::try_new(&conn).unwrap();
        let dispatcher = ActionDispatcher::new(repo, Arc::clone(&guard), EngineConfig::default());
        dispatcher
            .dispatch(&ActionCall::add(1, "shared", principal("alice")))
            .unwrap();
    }

    let barrier = Arc::new(Barrier::new(WRITERS));
    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let path = path.clone();
            let guard = Arc::clone(&guard);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let conn = open_db(&path).unwrap();
                let repo = SqliteTodoRepository::try_new(&conn).unwrap();
                let dispatcher = ActionDispatcher::new(repo, guard, EngineConfig::default());
                let call = ActionCall::edit(1, format!("writer {writer}"), principal("alice"))
                    .with_expected_version(1);
                barrier.wait();
                dispatcher
                    .dispatch(&call)
                    .map(|outcome| outcome.record().version)
            })
        })
        .collect();

    let results = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();
    drop(dir);
    results
}

fn assert_exactly_one_commit(results: &[Result<u64, DispatchError>]) {
    let committed: Vec<u64> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
    assert_eq!(committed, vec![2], "exactly one writer commits on base version 1");

    for result in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            matches!(
                result,
                DispatchError::Busy(1) | DispatchError::VersionConflict { id: 1, .. }
            ),
            "unexpected failure: {result}"
        );
    }
}

#[test]
fn concurrent_writers_on_same_base_version_commit_exactly_once_when_rejecting() {
    let results = race_same_base_version(ContentionPolicy::Reject);
    assert_eq!(results.len(), WRITERS);
    assert_exactly_one_commit(&results);
}

#[test]
fn concurrent_writers_on_same_base_version_commit_exactly_once_when_queueing() {
    let results = race_same_base_version(ContentionPolicy::Wait {
        timeout: Duration::from_secs(10),
    });
    assert_exactly_one_commit(&results);
    // Queued writers all get their turn and observe the committed version.
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(DispatchError::VersionConflict { actual: 2, .. })))
        .count();
    assert_eq!(conflicts, WRITERS - 1);
}

#[test]
fn queued_toggles_without_base_version_linearize() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("linear.db");
    let guard = Arc::new(ReplayGuard::new(ContentionPolicy::Wait {
        timeout: Duration::from_secs(10),
    }));

    let conn = open_db(&path).unwrap();
    let repo = SqliteTodoRepository::try_new(&conn).unwrap();
    let dispatcher = ActionDispatcher::new(repo, Arc::clone(&guard), EngineConfig::default());
    dispatcher
        .dispatch(&ActionCall::add(1, "flip", principal("alice")))
        .unwrap();
    dispatcher
        .dispatch(&ActionCall::add(2, "other", principal("bob")))
        .unwrap();

    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let path = path.clone();
            let guard = Arc::clone(&guard);
            thread::spawn(move || {
                let conn = open_db(&path).unwrap();
                let repo = SqliteTodoRepository::try_new(&conn).unwrap();
                let dispatcher = ActionDispatcher::new(repo, guard, EngineConfig::default());
                let (id, owner) = if writer % 2 == 0 { (1, "alice") } else { (2, "bob") };
                dispatcher
                    .dispatch(&ActionCall::toggle(id, principal(owner)))
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // No lost updates: every toggle committed on its own base version.
    for id in [1, 2] {
        let record = dispatcher.get(id).unwrap();
        assert_eq!(record.version, 1 + (WRITERS as u64) / 2);
        assert!(!record.done, "an even number of toggles leaves the record open");
        let versions: Vec<u64> = dispatcher
            .history(id)
            .unwrap()
            .iter()
            .map(|entry| entry.version)
            .collect();
        let expected: Vec<u64> = (1..=record.version).collect();
        assert_eq!(versions, expected);
    }
}
