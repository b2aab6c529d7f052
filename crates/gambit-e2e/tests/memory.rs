use std::{
    io,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use gambit::{
    common::{
        assignment::TaskAssignment,
        payload::{Progress, ProgressStatus, SprtProgress, TuningResults},
        task::{
            EloInterval, MatchTask, Pentanomial, SprtTask, Task, TaskDetails, TaskStatus, TuneTask,
        },
        AssignmentId, MatchGameId, TaskId, UnixNanos,
    },
    store::{Completion, MatchGameResult, NewGameRecord, TrackerStore},
    Code, MemoryStore, MemoryStoreOptions, Reaper, ReaperOptions, Tracker, TrackerOptions,
};
use gambit_e2e::{
    heartbeat, init_tracing, new_sprt, seed_run, services, test_cancellation,
    test_concurrent_reporters, test_match_completion, test_match_slots_are_capped,
    test_ownership, test_sprt_acceptance, test_stale_assignments, test_supersession,
    test_tokens, test_tune_accumulation, test_version_gate, training_game, Client,
};
use tokio::test;

const CONCURRENT_REPORTERS: u32 = 48;

fn memory_store() -> MemoryStore {
    init_tracing();
    MemoryStore::new_with_options(MemoryStoreOptions {
        game_record_capacity: 16,
    })
}

#[test]
async fn match_completion() {
    test_match_completion(&memory_store()).await;
}

#[test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_reporters() {
    test_concurrent_reporters(&memory_store(), CONCURRENT_REPORTERS).await;
}

#[test]
async fn match_slots_are_capped() {
    test_match_slots_are_capped(&memory_store()).await;
}

#[test]
async fn stale_assignments() {
    test_stale_assignments(&memory_store()).await;
}

#[test]
async fn sprt_acceptance() {
    test_sprt_acceptance(&memory_store()).await;
}

#[test]
async fn tune_accumulation() {
    test_tune_accumulation(&memory_store()).await;
}

#[test]
async fn cancellation() {
    test_cancellation(&memory_store()).await;
}

#[test]
async fn supersession() {
    test_supersession(&memory_store()).await;
}

#[test]
async fn version_gate() {
    test_version_gate(&memory_store()).await;
}

#[test]
async fn ownership() {
    test_ownership(&memory_store()).await;
}

#[test]
async fn tokens() {
    test_tokens(&memory_store()).await;
}

#[test]
async fn only_silent_clients_are_reaped() {
    let store = memory_store();
    let fixture = seed_run(&store).await;
    let (tasks, auth) = services(&store, TrackerOptions::default());

    let silent = Client::anonymous(&tasks, &auth, "0.31.0").await;
    let busy = Client::anonymous(&tasks, &auth, "0.31.0").await;
    let silent_task = silent.next_task().await.unwrap();
    let busy_task = busy.next_task().await.unwrap();

    let timeout = Duration::from_secs(600);
    store
        .set_last_heartbeat(
            &silent_task.task_id,
            UnixNanos::now().saturating_sub(timeout * 2),
        )
        .unwrap();

    let reaper = Reaper::new(
        store.clone(),
        ReaperOptions {
            heartbeat_timeout: timeout,
            ..Default::default()
        },
    );
    let reaped = reaper.sweep().await.unwrap();
    assert_eq!(reaped.len(), 1);
    assert_eq!(reaped[0].external_id, silent_task.task_id);

    // The busy client still works on the task.
    assert_eq!(
        store.get_task(fixture.training_task_id).unwrap().status,
        TaskStatus::Active
    );
    assert_eq!(
        busy.report(&busy_task.task_id, heartbeat()).await.unwrap(),
        ProgressStatus::Active
    );
    assert_eq!(
        silent
            .report(&silent_task.task_id, heartbeat())
            .await
            .unwrap(),
        ProgressStatus::Cancelled
    );
}

#[test]
async fn training_uploads_are_recorded() {
    let store = memory_store();
    let fixture = seed_run(&store).await;
    let (tasks, auth) = services(&store, TrackerOptions::default());
    let client = Client::anonymous(&tasks, &auth, "0.31.0").await;

    let response = client.next_task().await.unwrap();
    for _ in 0..20 {
        let status = client
            .report(
                &response.task_id,
                training_game(fixture.best_network_id, "0.31.0"),
            )
            .await
            .unwrap();
        assert_eq!(status, ProgressStatus::Active);
    }

    let network = store.get_network(fixture.best_network_id).unwrap();
    assert_eq!(network.games_played, 20);

    // Only the most recent records are kept.
    let records = store.game_records();
    assert_eq!(records.len(), 16);
    assert!(records
        .iter()
        .all(|record| record.task_id == fixture.training_task_id));
    assert!(records.windows(2).all(|w| w[0].created_at <= w[1].created_at));
}

#[test]
async fn client_details_are_kept_on_the_token() {
    let store = memory_store();
    seed_run(&store).await;
    let (tasks, auth) = services(&store, TrackerOptions::default());
    let client = Client::anonymous(&tasks, &auth, "0.31.1").await;

    let token = store.get_token(client.token()).unwrap();
    assert!(token.last_used_at.is_none());
    assert!(token.client_version.is_none());

    client.next_task().await.unwrap();

    let token = store.get_token(client.token()).unwrap();
    assert!(token.last_used_at.is_some());
    assert_eq!(token.client_version.as_deref(), Some("0.31.1"));
    assert_eq!(token.client_host.as_deref(), Some("volunteer-01"));
    assert_eq!(token.gpu_id, Some(0));
}

/// Fails the given number of game record saves, then delegates.
struct FailingRecords {
    store: MemoryStore,
    failures: AtomicU32,
}

fn io_error(error: impl std::error::Error + Send + Sync + 'static) -> io::Error {
    io::Error::new(io::ErrorKind::Other, error)
}

#[async_trait]
impl TrackerStore for FailingRecords {
    type Error = io::Error;

    async fn assignment(&self, external_id: &str) -> Result<Option<TaskAssignment>, io::Error> {
        self.store.assignment(external_id).await.map_err(io_error)
    }

    async fn touch_assignment(&self, id: AssignmentId, now: UnixNanos) -> Result<(), io::Error> {
        self.store.touch_assignment(id, now).await.map_err(io_error)
    }

    async fn task(&self, id: TaskId) -> Result<Option<Task>, io::Error> {
        TrackerStore::task(&self.store, id).await.map_err(io_error)
    }

    async fn record_match_game(
        &self,
        match_game_id: MatchGameId,
        result: MatchGameResult,
    ) -> Result<Option<MatchTask>, io::Error> {
        self.store
            .record_match_game(match_game_id, result)
            .await
            .map_err(io_error)
    }

    async fn add_sprt_results(
        &self,
        task_id: TaskId,
        delta: &Pentanomial,
        now: UnixNanos,
    ) -> Result<Option<SprtTask>, io::Error> {
        self.store
            .add_sprt_results(task_id, delta, now)
            .await
            .map_err(io_error)
    }

    async fn update_sprt_estimate(
        &self,
        task_id: TaskId,
        llr: f64,
        elo: EloInterval,
    ) -> Result<(), io::Error> {
        self.store
            .update_sprt_estimate(task_id, llr, elo)
            .await
            .map_err(io_error)
    }

    async fn record_tune_results(
        &self,
        task_id: TaskId,
        results: TuningResults,
        now: UnixNanos,
    ) -> Result<Option<TuneTask>, io::Error> {
        self.store
            .record_tune_results(task_id, results, now)
            .await
            .map_err(io_error)
    }

    async fn save_game_record(&self, record: NewGameRecord) -> Result<(), io::Error> {
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.store.save_game_record(record).await.map_err(io_error)
    }

    async fn network_exists(&self, sha: &str) -> Result<bool, io::Error> {
        self.store.network_exists(sha).await.map_err(io_error)
    }

    async fn increment_network_games(&self, sha: &str) -> Result<bool, io::Error> {
        self.store.increment_network_games(sha).await.map_err(io_error)
    }

    async fn complete_task(
        &self,
        task_id: TaskId,
        completion: Completion,
        now: UnixNanos,
    ) -> Result<bool, io::Error> {
        self.store
            .complete_task(task_id, completion, now)
            .await
            .map_err(io_error)
    }

    async fn complete_assignment(&self, id: AssignmentId, now: UnixNanos) -> Result<(), io::Error> {
        self.store.complete_assignment(id, now).await.map_err(io_error)
    }

    async fn cancel_task(&self, task_id: TaskId, now: UnixNanos) -> Result<bool, io::Error> {
        TrackerStore::cancel_task(&self.store, task_id, now)
            .await
            .map_err(io_error)
    }

    async fn reap_stale_assignments(
        &self,
        cutoff: UnixNanos,
        now: UnixNanos,
    ) -> Result<Vec<TaskAssignment>, io::Error> {
        self.store
            .reap_stale_assignments(cutoff, now)
            .await
            .map_err(io_error)
    }
}

#[test]
async fn results_of_failed_uploads_are_not_counted() {
    let store = memory_store();
    let fixture = seed_run(&store).await;
    let sprt_id = store.add_task("candidate 2 SPRT", TaskDetails::Sprt(new_sprt(&fixture)));
    let (tasks, auth) = services(&store, TrackerOptions::default());
    let client = Client::anonymous(&tasks, &auth, "0.31.0").await;
    let response = client.next_task().await.unwrap();

    let tracker = Tracker::new(
        FailingRecords {
            store: store.clone(),
            failures: AtomicU32::new(1),
        },
        TrackerOptions::default(),
    );
    let identity = store.get_token(client.token()).unwrap();
    let progress = Progress::Sprt(SprtProgress {
        results: Pentanomial::from([1, 2, 3, 2, 1]),
        engine_version: Some(String::from("0.31.0")),
        pgn: Some(String::from("1. e4 e5 *")),
    });

    let error = tracker
        .report_progress(&identity, &response.task_id, &progress)
        .await
        .unwrap_err();
    assert_eq!(error.code(), Code::Internal);
    let pairs = |task: Task| match task.details {
        TaskDetails::Sprt(sprt) => sprt.results.pairs(),
        details => panic!("expected an SPRT, got {details:?}"),
    };
    assert_eq!(pairs(store.get_task(sprt_id).unwrap()), 0);
    assert!(store.game_records().is_empty());

    let status = tracker
        .report_progress(&identity, &response.task_id, &progress)
        .await
        .unwrap();
    assert_eq!(status, ProgressStatus::Active);
    assert_eq!(pairs(store.get_task(sprt_id).unwrap()), 9);
    assert_eq!(store.game_records().len(), 1);
}

#[test]
async fn failed_training_uploads_are_not_counted() {
    let store = memory_store();
    let fixture = seed_run(&store).await;
    let (tasks, auth) = services(&store, TrackerOptions::default());
    let client = Client::anonymous(&tasks, &auth, "0.31.0").await;
    let response = client.next_task().await.unwrap();

    let tracker = Tracker::new(
        FailingRecords {
            store: store.clone(),
            failures: AtomicU32::new(1),
        },
        TrackerOptions::default(),
    );
    let identity = store.get_token(client.token()).unwrap();
    let progress = training_game(fixture.best_network_id, "0.31.0");

    assert!(tracker
        .report_progress(&identity, &response.task_id, &progress)
        .await
        .is_err());
    assert_eq!(
        store
            .get_network(fixture.best_network_id)
            .unwrap()
            .games_played,
        0
    );

    tracker
        .report_progress(&identity, &response.task_id, &progress)
        .await
        .unwrap();
    assert_eq!(
        store
            .get_network(fixture.best_network_id)
            .unwrap()
            .games_played,
        1
    );
}
