//! Assignment of work to clients.

use std::collections::BTreeMap;

use gambit_common::{
    artifact::{Book, Network, TrainingRun},
    assignment::{NewAssignment, TaskAssignment},
    identity::AuthToken,
    payload::{
        EngineConfiguration, EngineParams, MatchPayload, ResourceSpec, ResourceType, SprtPayload,
        TaskPayload, TaskResponse, TrainingPayload, TuningParamSet, TuningPayload,
    },
    task::{EngineSpec, MatchTask, Task, TaskDetails, TaskKind, TrainingTask},
    MatchGameId, NetworkId, TaskId, UnixNanos,
};

use crate::{store::SchedulerStore, task_id, Error, SchedulerOptions};

/// Format of network files.
pub const NETWORK_FORMAT: &str = "pb.gz";

/// Return the slice of a caller, in `1..=3`.
///
/// The slice only depends on the bytes of the token.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn slice_for(token: &str) -> u8 {
    let sum: u64 = token.bytes().map(u64::from).sum();
    (sum % 3) as u8 + 1
}

/// Selects the next unit of work for callers.
#[derive(Debug, Clone)]
pub struct Scheduler<S> {
    store: S,
    options: SchedulerOptions,
}

impl<S> Scheduler<S>
where
    S: SchedulerStore,
{
    /// Create a new scheduler with the given backing store.
    pub fn new(store: S, options: SchedulerOptions) -> Self {
        Self { store, options }
    }

    /// Select work for an already validated caller and record
    /// the assignment.
    ///
    /// Matches of the lowest-id active training run come first,
    /// then evaluation tasks, then self-play for the run.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NoActiveRun`] if there is nothing to do,
    /// or if the store fails.
    #[tracing::instrument(level = "debug", skip_all, fields(token_id = %identity.id))]
    pub async fn next_task(&self, identity: &AuthToken) -> Result<TaskResponse, Error> {
        let run = self
            .store
            .active_training_run()
            .await
            .map_err(store_error)?
            .ok_or(Error::NoActiveRun)?;

        let (training_task_id, training) = self
            .store
            .training_task(run.id)
            .await
            .map_err(store_error)?
            .ok_or(Error::NoTrainingTask(run.id))?;

        let slice = slice_for(&identity.token);

        if let Some(response) = self
            .next_match(identity, &run, training_task_id, &training, slice)
            .await?
        {
            return Ok(response);
        }

        if self.options.assign_evaluation_tasks {
            for kind in [TaskKind::Sprt, TaskKind::Tune] {
                if let Some(response) = self.next_evaluation(identity, kind).await? {
                    return Ok(response);
                }
            }
        }

        self.training(identity, &run, training_task_id, &training)
            .await
    }

    async fn next_match(
        &self,
        identity: &AuthToken,
        run: &TrainingRun,
        training_task_id: TaskId,
        training: &TrainingTask,
        slice: u8,
    ) -> Result<Option<TaskResponse>, Error> {
        let mut after = None;

        while let Some((match_id, m)) = self
            .store
            .next_match(training_task_id, slice, after)
            .await
            .map_err(store_error)?
        {
            after = Some(match_id);

            if !m.test_only && m.best_network_id != run.best_network_id {
                if self
                    .store
                    .supersede_match(match_id, UnixNanos::now())
                    .await
                    .map_err(store_error)?
                {
                    tracing::info!(
                        task_id = %match_id,
                        match_best = %m.best_network_id,
                        run_best = %run.best_network_id,
                        "superseded match cancelled"
                    );
                }
                continue;
            }

            let Some(payload) = self.resolve_match(training, &m).await? else {
                tracing::warn!(task_id = %match_id, "match has unresolved resources, skipping");
                continue;
            };

            let Some(game) = self
                .store
                .create_match_game(match_id, identity.user_id)
                .await
                .map_err(store_error)?
            else {
                tracing::debug!(task_id = %match_id, "every remaining game of the match is being played");
                continue;
            };

            let payload = payload.into_payload(game.id, game.flip);
            let response = self
                .assign(identity, match_id, TaskKind::Match, Some(game.id), payload)
                .await?;
            return Ok(Some(response));
        }

        Ok(None)
    }

    async fn resolve_match(
        &self,
        training: &TrainingTask,
        m: &MatchTask,
    ) -> Result<Option<ResolvedMatch>, Error> {
        let Some(candidate) = self.network(m.candidate_network_id).await? else {
            return Ok(None);
        };
        let Some(best) = self.network(m.best_network_id).await? else {
            return Ok(None);
        };
        let Some(book) = self.book(&training.match_book).await? else {
            return Ok(None);
        };

        let params = parameter_args(&training.match_parameters);

        Ok(Some(ResolvedMatch {
            baseline: EngineConfiguration {
                build: None,
                network: self.network_resource(&best),
                params: params.clone(),
            },
            candidate: EngineConfiguration {
                build: None,
                network: self.network_resource(&candidate),
                params,
            },
            opening_book: book_resource(&book),
        }))
    }

    async fn next_evaluation(
        &self,
        identity: &AuthToken,
        kind: TaskKind,
    ) -> Result<Option<TaskResponse>, Error> {
        let mut after = None;

        while let Some(task) = self
            .store
            .next_evaluation_task(kind, after)
            .await
            .map_err(store_error)?
        {
            after = Some(task.id);

            if let TaskDetails::Tune(tune) = &task.details {
                if tune.is_complete() {
                    tracing::debug!(task_id = %task.id, "every parameter set played its games");
                    continue;
                }
            }

            let Some(payload) = self.resolve_evaluation(&task).await? else {
                tracing::warn!(task_id = %task.id, kind = %kind, "task has unresolved resources, skipping");
                continue;
            };

            let response = self
                .assign(identity, task.id, kind, None, payload)
                .await?;
            return Ok(Some(response));
        }

        Ok(None)
    }

    async fn resolve_evaluation(&self, task: &Task) -> Result<Option<TaskPayload>, Error> {
        match &task.details {
            TaskDetails::Sprt(sprt) => {
                let Some(baseline) = self.engine(&sprt.baseline).await? else {
                    return Ok(None);
                };
                let Some(candidate) = self.engine(&sprt.candidate).await? else {
                    return Ok(None);
                };
                let Some(book) = self.book(&sprt.book).await? else {
                    return Ok(None);
                };

                Ok(Some(TaskPayload::Sprt(SprtPayload {
                    baseline,
                    candidate,
                    opening_book: book_resource(&book),
                    time_control: sprt.time_control,
                })))
            }
            TaskDetails::Tune(tune) => {
                let Some(network) = self.network(tune.network_id).await? else {
                    return Ok(None);
                };
                let Some(book) = self.book(&tune.book).await? else {
                    return Ok(None);
                };

                let param_sets: Vec<TuningParamSet> = tune
                    .pending_sets()
                    .map(|set| TuningParamSet {
                        id: set.id,
                        parameters: set.parameters.clone(),
                        games_remaining: tune.games_per_param_set.saturating_sub(set.games()),
                    })
                    .collect();

                Ok(Some(TaskPayload::Tuning(TuningPayload {
                    engine: EngineConfiguration {
                        build: Some(tune.build.clone()),
                        network: self.network_resource(&network),
                        params: EngineParams::default(),
                    },
                    opening_book: book_resource(&book),
                    param_sets,
                })))
            }
            TaskDetails::Training(_) | TaskDetails::Match(_) => Ok(None),
        }
    }

    async fn training(
        &self,
        identity: &AuthToken,
        run: &TrainingRun,
        training_task_id: TaskId,
        training: &TrainingTask,
    ) -> Result<TaskResponse, Error> {
        let network = self
            .network(run.best_network_id)
            .await?
            .ok_or(Error::MissingNetwork(run.best_network_id))?;
        let book = self
            .book(&training.train_book)
            .await?
            .ok_or_else(|| Error::MissingBook(training.train_book.clone()))?;

        let payload = TaskPayload::Training(TrainingPayload {
            engine: EngineConfiguration {
                build: None,
                network: self.network_resource(&network),
                params: parameter_args(&training.train_parameters),
            },
            opening_book: book_resource(&book),
            nodes_per_move: training
                .nodes_per_move
                .unwrap_or(self.options.nodes_per_move),
        });

        self.assign(identity, training_task_id, TaskKind::Training, None, payload)
            .await
    }

    async fn assign(
        &self,
        identity: &AuthToken,
        task_id: TaskId,
        kind: TaskKind,
        match_game_id: Option<MatchGameId>,
        payload: TaskPayload,
    ) -> Result<TaskResponse, Error> {
        let assigned_at = task_id::next_timestamp(UnixNanos::now());
        let external_id = task_id::format_task_id(assigned_at);

        let TaskAssignment { id, .. } = self
            .store
            .insert_assignment(NewAssignment {
                external_id: external_id.clone(),
                task_id,
                kind,
                match_game_id,
                token_id: identity.id,
                assigned_at,
            })
            .await
            .map_err(store_error)?;

        tracing::debug!(
            assignment_id = %id,
            %task_id,
            %kind,
            %external_id,
            "task assigned"
        );

        Ok(TaskResponse {
            task_id: external_id,
            task: payload,
        })
    }

    async fn engine(&self, spec: &EngineSpec) -> Result<Option<EngineConfiguration>, Error> {
        Ok(self
            .network(spec.network_id)
            .await?
            .map(|network| EngineConfiguration {
                build: spec.build.clone(),
                network: self.network_resource(&network),
                params: EngineParams {
                    args: spec.args.clone(),
                    uci_options: spec.uci_options.clone(),
                },
            }))
    }

    async fn network(&self, id: NetworkId) -> Result<Option<Network>, Error> {
        self.store.network(id).await.map_err(store_error)
    }

    async fn book(&self, sha256: &str) -> Result<Option<Book>, Error> {
        self.store.book(sha256).await.map_err(store_error)
    }

    fn network_resource(&self, network: &Network) -> ResourceSpec {
        ResourceSpec {
            sha256: network.sha.clone(),
            url: format!(
                "{}/{}",
                self.options.network_location.trim_end_matches('/'),
                network.sha
            ),
            size_bytes: network.size_bytes,
            resource_type: ResourceType::Network,
            format: NETWORK_FORMAT.to_string(),
        }
    }
}

struct ResolvedMatch {
    baseline: EngineConfiguration,
    candidate: EngineConfiguration,
    opening_book: ResourceSpec,
}

impl ResolvedMatch {
    fn into_payload(self, game_id: MatchGameId, flip: bool) -> TaskPayload {
        TaskPayload::Match(MatchPayload {
            baseline: self.baseline,
            candidate: self.candidate,
            opening_book: self.opening_book,
            flip,
            game_id,
        })
    }
}

fn book_resource(book: &Book) -> ResourceSpec {
    ResourceSpec {
        sha256: book.sha256.clone(),
        url: book.url.clone(),
        size_bytes: book.size_bytes,
        resource_type: ResourceType::Book,
        format: book.format.clone(),
    }
}

fn parameter_args(parameters: &str) -> EngineParams {
    EngineParams {
        args: parameters
            .split_whitespace()
            .map(ToString::to_string)
            .collect(),
        uci_options: BTreeMap::new(),
    }
}

fn store_error<E: std::error::Error + Send + Sync + 'static>(error: E) -> Error {
    Error::Store(Box::new(error))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_range() {
        for token in ["lc0-a", "lc0-b", "lc0-c", "lc0-0123456789abcdef", "x"] {
            let slice = slice_for(token);
            assert!((1..=3).contains(&slice));
            assert_eq!(slice, slice_for(token));
        }
    }

    #[test]
    fn slice_values() {
        assert_eq!(slice_for(""), 1);
        // 'a' = 97, 97 % 3 = 1
        assert_eq!(slice_for("a"), 2);
        // 'b' = 98, 98 % 3 = 2
        assert_eq!(slice_for("b"), 3);
        // 'c' = 99, 99 % 3 = 0
        assert_eq!(slice_for("c"), 1);
    }

    #[test]
    fn parameters_are_split() {
        let params = parameter_args("--minibatch-size=32  --cpuct=1.2");
        assert_eq!(params.args, ["--minibatch-size=32", "--cpuct=1.2"]);
        assert!(parameter_args("").args.is_empty());
    }
}
