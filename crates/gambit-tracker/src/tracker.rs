use gambit_common::{
    assignment::TaskAssignment,
    identity::AuthToken,
    payload::{
        MatchProgress, Progress, ProgressStatus, SprtProgress, TrainingProgress, TuningProgress,
    },
    status::Code,
    task::{Task, TaskDetails, TaskKind},
    version::Version,
    TaskId, UnixNanos,
};
use gambit_sprt::{SprtBounds, Verdict};
use tokio::sync::broadcast;

use crate::{
    store::{Completion, MatchGameResult, NewGameRecord, TrackerStore},
    store_error, Error, TrackerEvent, TrackerOptions,
};

/// Applies progress reports to tasks.
#[derive(Debug, Clone)]
pub struct Tracker<S> {
    store: S,
    options: TrackerOptions,
    events: broadcast::Sender<TrackerEvent>,
}

impl<S> Tracker<S>
where
    S: TrackerStore,
{
    /// Create a new tracker with the given backing store.
    pub fn new(store: S, options: TrackerOptions) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        Self {
            store,
            options,
            events,
        }
    }

    /// Subscribe to task lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    /// Apply a progress report of an already validated caller.
    ///
    /// The heartbeat is recorded even if the report is rejected
    /// afterwards. The result tells the client whether to keep working.
    ///
    /// # Errors
    ///
    /// Fails if the assignment is unknown or belongs to another caller,
    /// or if the uploaded results are rejected.
    #[tracing::instrument(level = "debug", skip_all, fields(token_id = %identity.id, task_id = external_id))]
    pub async fn report_progress(
        &self,
        identity: &AuthToken,
        external_id: &str,
        progress: &Progress,
    ) -> Result<ProgressStatus, Error> {
        let assignment = self
            .store
            .assignment(external_id)
            .await
            .map_err(store_error)?
            .filter(|assignment| assignment.token_id == identity.id)
            .ok_or(Error::UnknownTask)?;

        let now = UnixNanos::now();
        self.store
            .touch_assignment(assignment.id, now)
            .await
            .map_err(store_error)?;

        if !assignment.is_active() {
            return Ok(ProgressStatus::Cancelled);
        }

        let task = self
            .store
            .task(assignment.task_id)
            .await
            .map_err(store_error)?
            .ok_or(Error::Invariant("assignment references a missing task"))?;

        let got = progress_kind(progress);
        if got != assignment.kind {
            return Err(Error::KindMismatch {
                expected: assignment.kind,
                got,
            });
        }

        if progress.has_upload() {
            self.check_versions(identity, progress)?;
        }

        let finished = match progress {
            Progress::Training(p) => self.training(identity, &assignment, p, now).await?,
            Progress::Match(p) => self.match_game(&assignment, p, now).await?,
            Progress::Sprt(p) => self.sprt(identity, &assignment, &task, p, now).await?,
            Progress::Tuning(p) => self.tuning(identity, &assignment, &task, p, now).await?,
        };

        if finished || task.status.is_finished() {
            Ok(ProgressStatus::Cancelled)
        } else {
            Ok(ProgressStatus::Active)
        }
    }

    /// Cancel a task and all of its active assignments.
    ///
    /// Clients learn about the cancellation on their next report.
    /// Returns `false` if the task was already finished.
    ///
    /// # Errors
    ///
    /// Fails if the task does not exist.
    #[tracing::instrument(level = "debug", skip_all, fields(%task_id))]
    pub async fn cancel_task(&self, task_id: TaskId) -> Result<bool, Error> {
        if self
            .store
            .task(task_id)
            .await
            .map_err(store_error)?
            .is_none()
        {
            return Err(Error::UnknownTask);
        }

        let cancelled = self
            .store
            .cancel_task(task_id, UnixNanos::now())
            .await
            .map_err(store_error)?;

        if cancelled {
            tracing::info!(%task_id, "task cancelled");
            self.events.send(TrackerEvent::TaskCancelled(task_id)).ok();
        }

        Ok(cancelled)
    }

    fn check_versions(&self, identity: &AuthToken, progress: &Progress) -> Result<(), Error> {
        if let Some(minimum) = &self.options.min_client_version {
            let reported = identity.client_version.as_deref().unwrap_or_default();
            let version: Version = reported
                .parse()
                .map_err(|_| Error::InvalidClientVersion(reported.to_string()))?;
            if version < *minimum {
                return Err(Error::ClientVersionTooOld {
                    version,
                    minimum: minimum.clone(),
                });
            }
        }

        if let Some(minimum) = &self.options.min_engine_version {
            let reported = progress.engine_version().unwrap_or_default();
            let version: Version = reported
                .parse()
                .map_err(|_| Error::InvalidEngineVersion(reported.to_string()))?;
            if version < *minimum {
                return Err(Error::EngineVersionTooOld {
                    version,
                    minimum: minimum.clone(),
                });
            }
        }

        Ok(())
    }

    fn require_record(&self, pgn: Option<&str>) -> Result<(), Error> {
        if self.options.require_game_records && pgn.map_or(true, str::is_empty) {
            return Err(Error::MissingGameRecord);
        }
        Ok(())
    }

    async fn training(
        &self,
        identity: &AuthToken,
        assignment: &TaskAssignment,
        progress: &TrainingProgress,
        now: UnixNanos,
    ) -> Result<bool, Error> {
        let Some(game) = &progress.game else {
            return Ok(false);
        };

        if !self
            .store
            .network_exists(&game.network_sha)
            .await
            .map_err(store_error)?
        {
            return Err(Error::UnknownNetwork(game.network_sha.clone()));
        }

        self.store
            .save_game_record(NewGameRecord {
                task_id: assignment.task_id,
                kind: TaskKind::Training,
                assignment_id: assignment.id,
                token_id: identity.id,
                engine_version: Some(game.engine_version.clone()),
                pgn: game.pgn.clone(),
                training_data_url: game.training_data_url.clone(),
                network_sha: Some(game.network_sha.clone()),
                created_at: now,
            })
            .await
            .map_err(store_error)?;

        if !self
            .store
            .increment_network_games(&game.network_sha)
            .await
            .map_err(store_error)?
        {
            return Err(Error::UnknownNetwork(game.network_sha.clone()));
        }

        Ok(false)
    }

    async fn match_game(
        &self,
        assignment: &TaskAssignment,
        progress: &MatchProgress,
        now: UnixNanos,
    ) -> Result<bool, Error> {
        let Some(game) = &progress.game else {
            return Ok(false);
        };

        let match_game_id = assignment
            .match_game_id
            .ok_or(Error::Invariant("match assignment without a game slot"))?;

        let recorded = self
            .store
            .record_match_game(
                match_game_id,
                MatchGameResult {
                    outcome: game.outcome,
                    pgn: game.pgn.clone(),
                    engine_version: game.engine_version.clone(),
                    reported_at: now,
                },
            )
            .await
            .map_err(store_error)?;

        self.store
            .complete_assignment(assignment.id, now)
            .await
            .map_err(store_error)?;

        let Some(m) = recorded else {
            tracing::debug!(%match_game_id, "match game already recorded");
            return Ok(false);
        };

        if !m.is_complete() {
            return Ok(false);
        }

        let elo = gambit_sprt::elo(&m.trinomial());
        let passed = elo.elo >= self.options.pass_threshold_elo;

        self.complete(
            assignment.task_id,
            TaskKind::Match,
            Completion::Match { passed, elo },
            now,
        )
        .await?;

        Ok(true)
    }

    async fn sprt(
        &self,
        identity: &AuthToken,
        assignment: &TaskAssignment,
        task: &Task,
        progress: &SprtProgress,
        now: UnixNanos,
    ) -> Result<bool, Error> {
        if progress.results.pairs() == 0 {
            return Ok(false);
        }
        if task.status.is_finished() {
            return Ok(true);
        }
        self.require_record(progress.pgn.as_deref())?;

        self.save_upload(
            identity,
            assignment,
            progress.engine_version.as_deref(),
            progress.pgn.as_deref(),
            now,
        )
        .await?;

        let Some(sprt) = self
            .store
            .add_sprt_results(assignment.task_id, &progress.results, now)
            .await
            .map_err(store_error)?
        else {
            return Ok(true);
        };

        let evaluation = SprtBounds::new(
            sprt.alpha.unwrap_or(self.options.sprt_alpha),
            sprt.beta.unwrap_or(self.options.sprt_beta),
        )
        .and_then(|bounds| gambit_sprt::evaluate(&sprt.results, sprt.elo0, sprt.elo1, bounds));

        let evaluation = match evaluation {
            Ok(evaluation) => evaluation,
            Err(error) if error.code() == Code::FailedPrecondition => {
                tracing::error!(task_id = %assignment.task_id, %error, "SPRT invariant violated");
                return Err(error.into());
            }
            Err(error) => {
                tracing::warn!(
                    task_id = %assignment.task_id,
                    %error,
                    "SPRT evaluation failed, no verdict for this report"
                );
                return Ok(false);
            }
        };

        self.store
            .update_sprt_estimate(assignment.task_id, evaluation.llr, evaluation.elo)
            .await
            .map_err(store_error)?;

        tracing::debug!(
            task_id = %assignment.task_id,
            llr = evaluation.llr,
            verdict = ?evaluation.verdict,
            "SPRT evaluated"
        );

        if !evaluation.verdict.is_terminal() {
            return Ok(false);
        }

        self.complete(
            assignment.task_id,
            TaskKind::Sprt,
            Completion::Sprt {
                passed: evaluation.verdict == Verdict::AcceptH1,
            },
            now,
        )
        .await?;

        Ok(true)
    }

    async fn tuning(
        &self,
        identity: &AuthToken,
        assignment: &TaskAssignment,
        task: &Task,
        progress: &TuningProgress,
        now: UnixNanos,
    ) -> Result<bool, Error> {
        let Some(results) = progress.results else {
            return Ok(false);
        };

        let TaskDetails::Tune(tune) = &task.details else {
            return Err(Error::Invariant("tuning assignment for a task of another kind"));
        };
        if !tune.param_sets.iter().any(|set| set.id == results.param_set_id) {
            return Err(Error::UnknownParamSet(results.param_set_id));
        }
        if task.status.is_finished() {
            return Ok(true);
        }
        self.require_record(progress.pgn.as_deref())?;

        self.save_upload(
            identity,
            assignment,
            progress.engine_version.as_deref(),
            progress.pgn.as_deref(),
            now,
        )
        .await?;

        let Some(tune) = self
            .store
            .record_tune_results(assignment.task_id, results, now)
            .await
            .map_err(store_error)?
        else {
            return Ok(true);
        };

        if !tune.is_complete() {
            return Ok(false);
        }

        self.complete(assignment.task_id, TaskKind::Tune, Completion::Tune, now)
            .await?;

        Ok(true)
    }

    async fn save_upload(
        &self,
        identity: &AuthToken,
        assignment: &TaskAssignment,
        engine_version: Option<&str>,
        pgn: Option<&str>,
        now: UnixNanos,
    ) -> Result<(), Error> {
        let Some(pgn) = pgn.filter(|pgn| !pgn.is_empty()) else {
            return Ok(());
        };

        self.store
            .save_game_record(NewGameRecord {
                task_id: assignment.task_id,
                kind: assignment.kind,
                assignment_id: assignment.id,
                token_id: identity.id,
                engine_version: engine_version.map(ToString::to_string),
                pgn: Some(pgn.to_string()),
                training_data_url: None,
                network_sha: None,
                created_at: now,
            })
            .await
            .map_err(store_error)
    }

    async fn complete(
        &self,
        task_id: TaskId,
        kind: TaskKind,
        completion: Completion,
        now: UnixNanos,
    ) -> Result<bool, Error> {
        let completed = self
            .store
            .complete_task(task_id, completion, now)
            .await
            .map_err(store_error)?;

        if completed {
            tracing::info!(%task_id, %kind, ?completion, "task completed");
            self.events
                .send(TrackerEvent::TaskCompleted {
                    task_id,
                    kind,
                    completion,
                })
                .ok();
        }

        Ok(completed)
    }
}

fn progress_kind(progress: &Progress) -> TaskKind {
    match progress {
        Progress::Training(_) => TaskKind::Training,
        Progress::Match(_) => TaskKind::Match,
        Progress::Sprt(_) => TaskKind::Sprt,
        Progress::Tuning(_) => TaskKind::Tune,
    }
}
