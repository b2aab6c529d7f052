//! Gambit E2E test suite.
//!
//! Every scenario drives [`TaskService`] and [`AuthService`] the way
//! volunteer clients do, against any store that implements [`Seed`].

use std::{
    collections::{BTreeMap, HashSet},
    time::Duration,
};

use async_trait::async_trait;
use gambit::{
    common::{
        artifact::{Book, Network, TrainingRun},
        identity::{ClientInfo, LegacyUser},
        payload::{
            AnonymousTokenRequest, MatchGameUpload, MatchProgress, MigrateCredentialsRequest,
            Progress, ProgressReport, ProgressStatus, SprtProgress, TaskPayload, TaskRequest,
            TaskResponse, TrainingGameUpload, TrainingProgress, TuningProgress, TuningResults,
        },
        task::{
            BuildSpec, EngineSpec, GameOutcome, MatchTask, Pentanomial, SprtTask, Task,
            TaskDetails, TaskKind, TaskStatus, TimeControl, TrainingTask, TuneParamSet, TuneTask,
        },
        NetworkId, TaskId, TrainingRunId, UserId,
    },
    store::Completion,
    AuthService, Code, DbStore, GambitStore, MemoryStore, Reaper, ReaperOptions,
    SchedulerOptions, Status, TaskService, TrackerEvent, TrackerOptions,
};
use sqlx::Postgres;
use tracing_subscriber::EnvFilter;

/// Opening book of self-play games.
pub const TRAIN_BOOK: &str = "5c1b4d7b0f3bd4c8e2a5ef0d9b0b7f62a1e3c4d5b6a7980112233445566778899";

/// Opening book of match and SPRT games.
pub const MATCH_BOOK: &str = "9e8d7c6b5a4f3e2d1c0b9a8f7e6d5c4b3a2f1e0d9c8b7a6f5e4d3c2b1a0f9e8d";

const NETWORK_LOCATION: &str = "https://storage.example.org/networks";

/// Records owned by the training pipeline, written directly into a store.
#[async_trait]
pub trait Seed: GambitStore + Send + Sync {
    /// Add or replace a training run.
    async fn seed_training_run(&self, run: TrainingRun) -> eyre::Result<()>;
    /// Promote a network to the best network of its run.
    async fn seed_best_network(
        &self,
        run_id: TrainingRunId,
        network_id: NetworkId,
    ) -> eyre::Result<()>;
    /// Add or replace a network.
    async fn seed_network(&self, network: Network) -> eyre::Result<()>;
    /// Add or replace an opening book.
    async fn seed_book(&self, book: Book) -> eyre::Result<()>;
    /// Add a user of the legacy credential store.
    async fn seed_legacy_user(&self, user: LegacyUser) -> eyre::Result<()>;
    /// Add a pending task.
    async fn seed_task(&self, description: &str, details: TaskDetails) -> eyre::Result<TaskId>;
    /// Read back a task.
    async fn read_task(&self, id: TaskId) -> eyre::Result<Task>;
}

#[async_trait]
impl Seed for MemoryStore {
    async fn seed_training_run(&self, run: TrainingRun) -> eyre::Result<()> {
        self.add_training_run(run);
        Ok(())
    }

    async fn seed_best_network(
        &self,
        run_id: TrainingRunId,
        network_id: NetworkId,
    ) -> eyre::Result<()> {
        Ok(self.set_best_network(run_id, network_id)?)
    }

    async fn seed_network(&self, network: Network) -> eyre::Result<()> {
        self.add_network(network);
        Ok(())
    }

    async fn seed_book(&self, book: Book) -> eyre::Result<()> {
        self.add_book(book);
        Ok(())
    }

    async fn seed_legacy_user(&self, user: LegacyUser) -> eyre::Result<()> {
        self.add_legacy_user(user);
        Ok(())
    }

    async fn seed_task(&self, description: &str, details: TaskDetails) -> eyre::Result<TaskId> {
        Ok(self.add_task(description, details))
    }

    async fn read_task(&self, id: TaskId) -> eyre::Result<Task> {
        self.get_task(id)
            .ok_or_else(|| eyre::eyre!("task {id} does not exist"))
    }
}

#[async_trait]
impl Seed for DbStore<Postgres> {
    async fn seed_training_run(&self, run: TrainingRun) -> eyre::Result<()> {
        Ok(self.add_training_run(&run).await?)
    }

    async fn seed_best_network(
        &self,
        run_id: TrainingRunId,
        network_id: NetworkId,
    ) -> eyre::Result<()> {
        Ok(self.set_best_network(run_id, network_id).await?)
    }

    async fn seed_network(&self, network: Network) -> eyre::Result<()> {
        Ok(self.add_network(&network).await?)
    }

    async fn seed_book(&self, book: Book) -> eyre::Result<()> {
        Ok(self.add_book(&book).await?)
    }

    async fn seed_legacy_user(&self, user: LegacyUser) -> eyre::Result<()> {
        Ok(self.add_legacy_user(&user).await?)
    }

    async fn seed_task(&self, description: &str, details: TaskDetails) -> eyre::Result<TaskId> {
        Ok(self.add_task(description, &details).await?)
    }

    async fn read_task(&self, id: TaskId) -> eyre::Result<Task> {
        self.get_task(id)
            .await?
            .ok_or_else(|| eyre::eyre!("task {id} does not exist"))
    }
}

/// The records created by [`seed_run`].
#[derive(Debug, Clone, Copy)]
pub struct Fixture {
    /// The only training run, active.
    pub run_id: TrainingRunId,
    /// Best network of the run.
    pub best_network_id: NetworkId,
    /// A newer network of the run.
    pub candidate_network_id: NetworkId,
    /// Self-play task of the run.
    pub training_task_id: TaskId,
}

/// Seed an active training run with two networks, both books
/// and a self-play task.
pub async fn seed_run<S: Seed>(store: &S) -> Fixture {
    let run_id = TrainingRunId(1);
    let best_network_id = NetworkId(1);
    let candidate_network_id = NetworkId(2);

    store
        .seed_training_run(TrainingRun {
            id: run_id,
            description: String::from("main run"),
            active: true,
            best_network_id,
        })
        .await
        .unwrap();

    for (id, number) in [(best_network_id, 1), (candidate_network_id, 2)] {
        store
            .seed_network(Network {
                id,
                training_run_id: run_id,
                network_number: number,
                sha: network_sha(id),
                path: format!("networks/{}", network_sha(id)),
                size_bytes: 48_000_000,
                layers: 20,
                filters: 256,
                games_played: 0,
                elo: 0.0,
                anchor: false,
                elo_set: false,
            })
            .await
            .unwrap();
    }

    for sha256 in [TRAIN_BOOK, MATCH_BOOK] {
        store
            .seed_book(Book {
                sha256: sha256.to_string(),
                url: format!("https://storage.example.org/books/{sha256}.pgn.zip"),
                size_bytes: 4096,
                format: String::from("pgn"),
            })
            .await
            .unwrap();
    }

    let training_task_id = store
        .seed_task(
            "self-play for the main run",
            TaskDetails::Training(TrainingTask {
                training_run_id: run_id,
                train_book: TRAIN_BOOK.to_string(),
                match_book: MATCH_BOOK.to_string(),
                train_parameters: String::from("--visits=800 --cpuct=1.32"),
                match_parameters: String::from("--visits=800"),
                nodes_per_move: None,
            }),
        )
        .await
        .unwrap();

    Fixture {
        run_id,
        best_network_id,
        candidate_network_id,
        training_task_id,
    }
}

/// Content hash of a seeded network.
#[must_use]
pub fn network_sha(id: NetworkId) -> String {
    format!("{:064x}", id.0)
}

/// A candidate-versus-best match open to every slice.
#[must_use]
pub fn new_match(fixture: &Fixture, game_cap: u32) -> MatchTask {
    MatchTask {
        training_task_id: fixture.training_task_id,
        candidate_network_id: fixture.candidate_network_id,
        best_network_id: fixture.best_network_id,
        games_created: 0,
        wins: 0,
        losses: 0,
        draws: 0,
        game_cap,
        done: false,
        passed: false,
        test_only: false,
        special_params: false,
        target_slice: 0,
        elo: None,
    }
}

/// An SPRT of the candidate network against the best network.
#[must_use]
pub fn new_sprt(fixture: &Fixture) -> SprtTask {
    let engine = |network_id| EngineSpec {
        build: None,
        network_id,
        args: vec![String::from("--threads=1")],
        uci_options: Default::default(),
    };

    SprtTask {
        baseline: engine(fixture.best_network_id),
        candidate: engine(fixture.candidate_network_id),
        book: MATCH_BOOK.to_string(),
        time_control: TimeControl::Nodes {
            nodes_per_move: 1000,
        },
        elo0: 0.0,
        elo1: 5.0,
        alpha: None,
        beta: None,
        results: Pentanomial::default(),
        llr: None,
        elo: None,
        passed: None,
    }
}

/// Tuning of the best network's engine with three parameter sets.
///
/// The first set already played its games, the third one played one.
#[must_use]
pub fn new_tune(fixture: &Fixture) -> TuneTask {
    let set = |id: u32, cpuct: &str, (wins, losses, draws)| TuneParamSet {
        id,
        parameters: BTreeMap::from([(String::from("CPuct"), cpuct.to_string())]),
        wins,
        losses,
        draws,
    };

    TuneTask {
        build: BuildSpec {
            repo_url: String::from("https://github.com/LeelaChessZero/lc0"),
            commit: String::from("4f3e2d1c0b9a8f7e6d5c4b3a2f1e0d9c8b7a6f5e"),
        },
        network_id: fixture.best_network_id,
        book: MATCH_BOOK.to_string(),
        games_per_param_set: 4,
        param_sets: vec![
            set(1, "1.5", (2, 1, 1)),
            set(2, "1.9", (0, 0, 0)),
            set(3, "2.3", (0, 0, 1)),
        ],
    }
}

/// Tuning results for one parameter set.
#[must_use]
pub fn tuning_results(param_set_id: u32, (wins, losses, draws): (u32, u32, u32)) -> Progress {
    Progress::Tuning(TuningProgress {
        results: Some(TuningResults {
            param_set_id,
            wins,
            losses,
            draws,
        }),
        engine_version: Some(String::from("0.31.0")),
        pgn: Some(String::from("1. Nf3 d5 2. g3 *")),
    })
}

/// Services sharing the given store.
pub fn services<S: GambitStore>(
    store: &S,
    tracker: TrackerOptions,
) -> (TaskService<S>, AuthService<S>) {
    let scheduler = SchedulerOptions {
        network_location: NETWORK_LOCATION.to_string(),
        ..Default::default()
    };

    (
        TaskService::new(store.clone(), scheduler, tracker),
        AuthService::new(store.clone()),
    )
}

/// A volunteer client with its own token.
#[derive(Debug, Clone)]
pub struct Client<S> {
    tasks: TaskService<S>,
    token: String,
    info: ClientInfo,
}

impl<S> Client<S>
where
    S: GambitStore,
{
    /// A client with the given token.
    pub fn new(tasks: &TaskService<S>, token: impl Into<String>, version: &str) -> Self {
        Self {
            tasks: tasks.clone(),
            token: token.into(),
            info: ClientInfo {
                hostname: String::from("volunteer-01"),
                version: version.to_string(),
                gpu_type: String::from("RTX 4090"),
                gpu_id: Some(0),
            },
        }
    }

    /// A client with a freshly issued anonymous token.
    pub async fn anonymous(tasks: &TaskService<S>, auth: &AuthService<S>, version: &str) -> Self {
        let token = auth
            .get_anonymous_token(AnonymousTokenRequest::default())
            .await
            .unwrap()
            .token;
        Self::new(tasks, token, version)
    }

    /// The client's token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Ask for work.
    pub async fn next_task(&self) -> Result<TaskResponse, Status> {
        self.tasks
            .get_next_task(TaskRequest {
                token: self.token.clone(),
                client_info: self.info.clone(),
            })
            .await
    }

    /// Report progress on an assignment.
    pub async fn report(&self, task_id: &str, progress: Progress) -> Result<ProgressStatus, Status> {
        self.tasks
            .report_progress(ProgressReport {
                token: self.token.clone(),
                task_id: task_id.to_string(),
                progress,
            })
            .await
            .map(|response| response.status)
    }
}

/// Progress without results.
#[must_use]
pub fn heartbeat() -> Progress {
    Progress::Training(TrainingProgress::default())
}

/// A finished match game.
#[must_use]
pub fn match_game(outcome: GameOutcome) -> Progress {
    Progress::Match(MatchProgress {
        game: Some(MatchGameUpload {
            outcome,
            engine_version: String::from("0.31.0"),
            pgn: Some(String::from("1. d4 Nf6 2. c4 e6 *")),
        }),
    })
}

/// A finished self-play game with the given network.
#[must_use]
pub fn training_game(network_id: NetworkId, engine_version: &str) -> Progress {
    Progress::Training(TrainingProgress {
        game: Some(TrainingGameUpload {
            network_sha: network_sha(network_id),
            engine_version: engine_version.to_string(),
            pgn: Some(String::from("1. e4 c5 2. Nf3 d6 *")),
            training_data_url: Some(String::from(
                "https://storage.example.org/training/game-000001.gz",
            )),
        }),
    })
}

/// The match details of a task.
///
/// # Panics
///
/// Panics if the task is not a match.
#[must_use]
pub fn match_details(task: &Task) -> &MatchTask {
    match &task.details {
        TaskDetails::Match(m) => m,
        details => panic!("expected a match, got {details:?}"),
    }
}

/// The last game of a match is reported, the match completes.
pub async fn test_match_completion<S: Seed>(store: &S) {
    let fixture = seed_run(store).await;

    let mut m = new_match(&fixture, 10);
    m.games_created = 9;
    m.wins = 5;
    m.losses = 2;
    m.draws = 2;
    let match_id = store
        .seed_task("candidate 2 against best 1", TaskDetails::Match(m))
        .await
        .unwrap();

    let (tasks, auth) = services(store, TrackerOptions::default());
    let client = Client::anonymous(&tasks, &auth, "0.31.0").await;

    let response = client.next_task().await.unwrap();
    let TaskPayload::Match(payload) = &response.task else {
        panic!("expected a match, got {:?}", response.task);
    };
    assert_eq!(
        payload.candidate.network.sha256,
        network_sha(fixture.candidate_network_id)
    );
    assert_eq!(
        payload.baseline.network.sha256,
        network_sha(fixture.best_network_id)
    );
    assert_eq!(
        payload.candidate.network.url,
        format!(
            "{NETWORK_LOCATION}/{}",
            network_sha(fixture.candidate_network_id)
        )
    );
    assert_eq!(payload.opening_book.sha256, MATCH_BOOK);
    assert_eq!(
        store.read_task(match_id).await.unwrap().status,
        TaskStatus::Active
    );

    let status = client
        .report(&response.task_id, match_game(GameOutcome::Win))
        .await
        .unwrap();
    assert_eq!(status, ProgressStatus::Cancelled);

    let task = store.read_task(match_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    let m = match_details(&task);
    assert_eq!(m.games_created, 10);
    assert_eq!((m.wins, m.losses, m.draws), (6, 2, 2));
    assert!(m.done);
    assert!(m.passed);
    assert!(m.elo.is_some_and(|elo| elo.elo > 0.0));

    // The game slot was already recorded.
    let status = client
        .report(&response.task_id, match_game(GameOutcome::Win))
        .await
        .unwrap();
    assert_eq!(status, ProgressStatus::Cancelled);
    assert_eq!(
        match_details(&store.read_task(match_id).await.unwrap()).games_created,
        10
    );
}

/// Many clients play and report the games of one match at once.
pub async fn test_concurrent_reporters<S: Seed>(store: &S, reporters: u32) {
    let fixture = seed_run(store).await;
    let match_id = store
        .seed_task(
            "candidate 2 against best 1",
            TaskDetails::Match(new_match(&fixture, reporters)),
        )
        .await
        .unwrap();

    let (tasks, auth) = services(store, TrackerOptions::default());
    let mut events = tasks.tracker().subscribe();

    let mut handles = Vec::new();
    for idx in 0..reporters {
        let client = Client::anonymous(&tasks, &auth, "0.31.0").await;
        let outcome = match idx % 3 {
            0 => GameOutcome::Win,
            1 => GameOutcome::Draw,
            _ => GameOutcome::Loss,
        };

        handles.push(tokio::spawn(async move {
            let response = client.next_task().await.unwrap();
            let TaskPayload::Match(payload) = &response.task else {
                panic!("expected a match, got {:?}", response.task);
            };
            let game_id = payload.game_id;
            let status = client
                .report(&response.task_id, match_game(outcome))
                .await
                .unwrap();
            (game_id, status)
        }));
    }

    let mut game_ids = HashSet::new();
    let mut stopped = 0;
    for handle in handles {
        let (game_id, status) = handle.await.unwrap();
        assert!(
            game_ids.insert(game_id),
            "game slot {game_id} was handed out twice"
        );
        if status == ProgressStatus::Cancelled {
            stopped += 1;
        }
    }
    assert_eq!(stopped, 1, "only the last game completes the match");

    let task = store.read_task(match_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    let m = match_details(&task);
    assert_eq!(m.games_created, reporters);
    assert_eq!(m.wins + m.losses + m.draws, reporters);

    let mut completed = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, TrackerEvent::TaskCompleted { task_id, .. } if task_id == match_id) {
            completed += 1;
        }
    }
    assert_eq!(completed, 1);
}

/// Game slots of a match are not handed out beyond its game cap
/// while they are being played.
pub async fn test_match_slots_are_capped<S: Seed>(store: &S) {
    let fixture = seed_run(store).await;
    store
        .seed_task(
            "candidate 2 against best 1",
            TaskDetails::Match(new_match(&fixture, 2)),
        )
        .await
        .unwrap();

    let (tasks, auth) = services(store, TrackerOptions::default());
    let first = Client::anonymous(&tasks, &auth, "0.31.0").await;
    let second = Client::anonymous(&tasks, &auth, "0.31.0").await;
    let third = Client::anonymous(&tasks, &auth, "0.31.0").await;

    let played = first.next_task().await.unwrap();
    assert!(matches!(played.task, TaskPayload::Match(_)));
    let abandoned = second.next_task().await.unwrap();
    assert!(matches!(abandoned.task, TaskPayload::Match(_)));
    let response = third.next_task().await.unwrap();
    assert!(matches!(response.task, TaskPayload::Training(_)));

    let status = first
        .report(&played.task_id, match_game(GameOutcome::Draw))
        .await
        .unwrap();
    assert_eq!(status, ProgressStatus::Active);
    let response = third.next_task().await.unwrap();
    assert!(matches!(response.task, TaskPayload::Training(_)));

    tokio::time::sleep(Duration::from_millis(10)).await;
    let reaped = Reaper::new(
        store.clone(),
        ReaperOptions {
            heartbeat_timeout: Duration::ZERO,
            sweep_interval: Duration::from_secs(1),
        },
    )
    .sweep()
    .await
    .unwrap();
    assert!(reaped
        .iter()
        .any(|assignment| assignment.external_id == abandoned.task_id));

    let response = third.next_task().await.unwrap();
    assert!(matches!(response.task, TaskPayload::Match(_)));
}

/// Assignments of silent clients are cancelled and the work
/// is handed out again.
pub async fn test_stale_assignments<S: Seed>(store: &S) {
    let fixture = seed_run(store).await;
    let (tasks, auth) = services(store, TrackerOptions::default());
    let client = Client::anonymous(&tasks, &auth, "0.31.0").await;

    let response = client.next_task().await.unwrap();
    assert!(matches!(response.task, TaskPayload::Training(_)));
    assert_eq!(
        store
            .read_task(fixture.training_task_id)
            .await
            .unwrap()
            .status,
        TaskStatus::Active
    );

    tokio::time::sleep(Duration::from_millis(10)).await;

    let reaper = Reaper::new(
        store.clone(),
        ReaperOptions {
            heartbeat_timeout: Duration::ZERO,
            sweep_interval: Duration::from_secs(1),
        },
    );
    let reaped = reaper.sweep().await.unwrap();
    assert_eq!(reaped.len(), 1);
    assert_eq!(reaped[0].external_id, response.task_id);
    assert_eq!(
        store
            .read_task(fixture.training_task_id)
            .await
            .unwrap()
            .status,
        TaskStatus::Pending
    );
    assert!(reaper.sweep().await.unwrap().is_empty());

    let status = client.report(&response.task_id, heartbeat()).await.unwrap();
    assert_eq!(status, ProgressStatus::Cancelled);

    let response = client.next_task().await.unwrap();
    assert!(matches!(response.task, TaskPayload::Training(_)));
}

/// Lopsided SPRT results accept the alternative hypothesis.
pub async fn test_sprt_acceptance<S: Seed>(store: &S) {
    let fixture = seed_run(store).await;
    let sprt_id = store
        .seed_task("candidate 2 SPRT", TaskDetails::Sprt(new_sprt(&fixture)))
        .await
        .unwrap();

    let (tasks, auth) = services(store, TrackerOptions::default());
    let mut events = tasks.tracker().subscribe();
    let client = Client::anonymous(&tasks, &auth, "0.31.0").await;

    let response = client.next_task().await.unwrap();
    let TaskPayload::Sprt(payload) = &response.task else {
        panic!("expected an SPRT, got {:?}", response.task);
    };
    assert_eq!(
        payload.time_control,
        TimeControl::Nodes {
            nodes_per_move: 1000
        }
    );
    assert_eq!(payload.opening_book.sha256, MATCH_BOOK);
    assert_eq!(payload.candidate.params.args, ["--threads=1"]);

    let status = client
        .report(&response.task_id, Progress::Sprt(SprtProgress::default()))
        .await
        .unwrap();
    assert_eq!(status, ProgressStatus::Active);

    let status = client
        .report(
            &response.task_id,
            Progress::Sprt(SprtProgress {
                results: Pentanomial::from([10, 400, 2000, 1400, 90]),
                engine_version: Some(String::from("0.31.0")),
                pgn: Some(String::from("1. c4 e5 *")),
            }),
        )
        .await
        .unwrap();
    assert_eq!(status, ProgressStatus::Cancelled);

    let task = store.read_task(sprt_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    let TaskDetails::Sprt(sprt) = &task.details else {
        panic!("expected an SPRT, got {:?}", task.details);
    };
    assert_eq!(sprt.results.pairs(), 3900);
    assert_eq!(sprt.passed, Some(true));
    assert!(sprt.llr.is_some_and(|llr| llr > 0.0));
    assert!(sprt.elo.is_some_and(|elo| elo.elo > 5.0));

    assert!(matches!(
        events.try_recv(),
        Ok(TrackerEvent::TaskCompleted { task_id, .. }) if task_id == sprt_id
    ));
}

/// Tuning results accumulate per parameter set until every set
/// played its games.
pub async fn test_tune_accumulation<S: Seed>(store: &S) {
    let fixture = seed_run(store).await;

    let mut exhausted = new_tune(&fixture);
    for set in &mut exhausted.param_sets {
        set.wins = 4;
        set.losses = 0;
        set.draws = 0;
    }
    let exhausted = store
        .seed_task("finished tuning", TaskDetails::Tune(exhausted))
        .await
        .unwrap();
    let tune_id = store
        .seed_task("CPuct tuning", TaskDetails::Tune(new_tune(&fixture)))
        .await
        .unwrap();

    let (tasks, auth) = services(store, TrackerOptions::default());
    let mut events = tasks.tracker().subscribe();
    let first = Client::anonymous(&tasks, &auth, "0.31.0").await;
    let second = Client::anonymous(&tasks, &auth, "0.31.0").await;

    let response = first.next_task().await.unwrap();
    let TaskPayload::Tuning(payload) = &response.task else {
        panic!("expected tuning, got {:?}", response.task);
    };
    let pending: Vec<_> = payload
        .param_sets
        .iter()
        .map(|set| (set.id, set.games_remaining))
        .collect();
    assert_eq!(pending, [(2, 4), (3, 3)]);
    assert_eq!(payload.param_sets[0].parameters["CPuct"], "1.9");
    assert_eq!(
        payload.engine.build.as_ref().map(|build| build.commit.as_str()),
        Some("4f3e2d1c0b9a8f7e6d5c4b3a2f1e0d9c8b7a6f5e")
    );
    assert_eq!(
        payload.engine.network.sha256,
        network_sha(fixture.best_network_id)
    );
    assert_eq!(payload.opening_book.sha256, MATCH_BOOK);
    assert_eq!(
        store.read_task(exhausted).await.unwrap().status,
        TaskStatus::Pending
    );

    let error = first
        .report(&response.task_id, tuning_results(9, (1, 0, 0)))
        .await
        .unwrap_err();
    assert_eq!(error.code, Code::InvalidArgument);

    let status = first
        .report(&response.task_id, tuning_results(2, (2, 1, 1)))
        .await
        .unwrap();
    assert_eq!(status, ProgressStatus::Active);

    let task = store.read_task(tune_id).await.unwrap();
    let TaskDetails::Tune(tune) = &task.details else {
        panic!("expected tuning, got {:?}", task.details);
    };
    let games: Vec<_> = tune
        .param_sets
        .iter()
        .map(|set| (set.wins, set.losses, set.draws))
        .collect();
    assert_eq!(games, [(2, 1, 1), (2, 1, 1), (0, 0, 1)]);

    let response = second.next_task().await.unwrap();
    let TaskPayload::Tuning(payload) = &response.task else {
        panic!("expected tuning, got {:?}", response.task);
    };
    assert_eq!(payload.param_sets.len(), 1);
    assert_eq!(
        (payload.param_sets[0].id, payload.param_sets[0].games_remaining),
        (3, 3)
    );

    let status = second
        .report(&response.task_id, tuning_results(3, (1, 1, 1)))
        .await
        .unwrap();
    assert_eq!(status, ProgressStatus::Cancelled);
    assert_eq!(
        store.read_task(tune_id).await.unwrap().status,
        TaskStatus::Done
    );
    assert!(matches!(
        events.try_recv(),
        Ok(TrackerEvent::TaskCompleted {
            task_id,
            kind: TaskKind::Tune,
            completion: Completion::Tune,
        }) if task_id == tune_id
    ));

    let response = first.next_task().await.unwrap();
    assert!(matches!(response.task, TaskPayload::Training(_)));
}

/// Cancelled tasks stop their clients on the next report.
pub async fn test_cancellation<S: Seed>(store: &S) {
    let fixture = seed_run(store).await;
    let sprt_id = store
        .seed_task("candidate 2 SPRT", TaskDetails::Sprt(new_sprt(&fixture)))
        .await
        .unwrap();

    let (tasks, auth) = services(store, TrackerOptions::default());
    let mut events = tasks.tracker().subscribe();
    let client = Client::anonymous(&tasks, &auth, "0.31.0").await;

    let response = client.next_task().await.unwrap();
    assert!(matches!(response.task, TaskPayload::Sprt(_)));

    assert!(tasks.tracker().cancel_task(sprt_id).await.unwrap());
    assert_eq!(
        events.try_recv().unwrap(),
        TrackerEvent::TaskCancelled(sprt_id)
    );
    assert!(!tasks.tracker().cancel_task(sprt_id).await.unwrap());

    let status = client
        .report(&response.task_id, Progress::Sprt(SprtProgress::default()))
        .await
        .unwrap();
    assert_eq!(status, ProgressStatus::Cancelled);
    assert_eq!(
        store.read_task(sprt_id).await.unwrap().status,
        TaskStatus::Cancelled
    );

    let response = client.next_task().await.unwrap();
    assert!(matches!(response.task, TaskPayload::Training(_)));

    let error = tasks.tracker().cancel_task(TaskId(9999)).await.unwrap_err();
    assert_eq!(error.code(), Code::NotFound);
}

/// Matches against a replaced best network are cancelled,
/// test matches are still played.
pub async fn test_supersession<S: Seed>(store: &S) {
    let fixture = seed_run(store).await;
    let outdated = store
        .seed_task(
            "candidate 2 against best 1",
            TaskDetails::Match(new_match(&fixture, 10)),
        )
        .await
        .unwrap();
    let mut test_match = new_match(&fixture, 10);
    test_match.test_only = true;
    let test_match = store
        .seed_task("test match", TaskDetails::Match(test_match))
        .await
        .unwrap();

    store
        .seed_best_network(fixture.run_id, fixture.candidate_network_id)
        .await
        .unwrap();

    let (tasks, auth) = services(store, TrackerOptions::default());
    let client = Client::anonymous(&tasks, &auth, "0.31.0").await;

    let response = client.next_task().await.unwrap();
    let TaskPayload::Match(payload) = &response.task else {
        panic!("expected a match, got {:?}", response.task);
    };
    assert_eq!(
        payload.baseline.network.sha256,
        network_sha(fixture.best_network_id)
    );

    assert_eq!(
        store.read_task(outdated).await.unwrap().status,
        TaskStatus::Cancelled
    );
    assert_eq!(
        store.read_task(test_match).await.unwrap().status,
        TaskStatus::Active
    );
}

/// Uploads from outdated clients and engines are rejected,
/// heartbeats are not.
pub async fn test_version_gate<S: Seed>(store: &S) {
    let fixture = seed_run(store).await;
    let (tasks, auth) = services(
        store,
        TrackerOptions {
            min_client_version: Some("0.30".parse().unwrap()),
            min_engine_version: Some("0.31".parse().unwrap()),
            ..Default::default()
        },
    );

    let outdated = Client::anonymous(&tasks, &auth, "0.29.1").await;
    let response = outdated.next_task().await.unwrap();
    let error = outdated
        .report(
            &response.task_id,
            training_game(fixture.best_network_id, "0.31.0"),
        )
        .await
        .unwrap_err();
    assert_eq!(error.code, Code::InvalidArgument);
    assert_eq!(
        outdated
            .report(&response.task_id, heartbeat())
            .await
            .unwrap(),
        ProgressStatus::Active
    );

    let client = Client::anonymous(&tasks, &auth, "0.30.0").await;
    let response = client.next_task().await.unwrap();
    let error = client
        .report(
            &response.task_id,
            training_game(fixture.best_network_id, "0.30.9"),
        )
        .await
        .unwrap_err();
    assert_eq!(error.code, Code::InvalidArgument);

    let status = client
        .report(
            &response.task_id,
            training_game(fixture.best_network_id, "v0.31.0"),
        )
        .await
        .unwrap();
    assert_eq!(status, ProgressStatus::Active);

    let error = client
        .report(&response.task_id, training_game(NetworkId(404), "0.31.0"))
        .await
        .unwrap_err();
    assert_eq!(error.code, Code::InvalidArgument);
}

/// Assignments are only visible to the token they were handed out to.
pub async fn test_ownership<S: Seed>(store: &S) {
    seed_run(store).await;
    let (tasks, auth) = services(store, TrackerOptions::default());
    let owner = Client::anonymous(&tasks, &auth, "0.31.0").await;
    let other = Client::anonymous(&tasks, &auth, "0.31.0").await;

    let response = owner.next_task().await.unwrap();

    let error = other
        .report(&response.task_id, heartbeat())
        .await
        .unwrap_err();
    assert_eq!(error.code, Code::NotFound);

    let error = owner
        .report("20000101T000000.000000000", heartbeat())
        .await
        .unwrap_err();
    assert_eq!(error.code, Code::NotFound);

    let error = owner
        .report(&response.task_id, match_game(GameOutcome::Win))
        .await
        .unwrap_err();
    assert_eq!(error.code, Code::InvalidArgument);

    assert_eq!(
        owner.report(&response.task_id, heartbeat()).await.unwrap(),
        ProgressStatus::Active
    );
}

/// Legacy credentials are exchanged for tokens, malformed and
/// unknown tokens are rejected.
pub async fn test_tokens<S: Seed>(store: &S) {
    seed_run(store).await;
    store
        .seed_legacy_user(LegacyUser {
            id: UserId(1),
            username: String::from("alice"),
            password: String::from("hunter2"),
        })
        .await
        .unwrap();

    let (tasks, auth) = services(store, TrackerOptions::default());

    let token = auth
        .migrate_credentials(MigrateCredentialsRequest {
            username: String::from("alice"),
            password: String::from("hunter2"),
        })
        .await
        .unwrap()
        .token;
    assert!(token.starts_with("lc0-"));
    Client::new(&tasks, token, "0.31.0")
        .next_task()
        .await
        .unwrap();

    for (username, password, code) in [
        ("alice", "wrong", Code::NotFound),
        ("bob", "hunter2", Code::NotFound),
        ("", "hunter2", Code::InvalidArgument),
        ("alice", "", Code::InvalidArgument),
    ] {
        let error = auth
            .migrate_credentials(MigrateCredentialsRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(error.code, code, "{username}:{password}");
    }

    for (token, code) in [
        ("abc", Code::InvalidArgument),
        ("lc0-", Code::InvalidArgument),
        ("lc0-unknown", Code::Unauthenticated),
    ] {
        let error = Client::new(&tasks, token, "0.31.0")
            .next_task()
            .await
            .unwrap_err();
        assert_eq!(error.code, code, "{token}");
    }
}

/// Log to the test output, honoring `RUST_LOG`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
    tracing::debug!("tracing initialized");
}
