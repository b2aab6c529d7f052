use async_trait::async_trait;
use gambit_common::{
    assignment::{AssignmentStatus, TaskAssignment},
    payload::TuningResults,
    task::{
        EloInterval, MatchTask, Pentanomial, SprtTask, Task, TaskDetails, TaskKind, TaskStatus,
        TuneTask,
    },
    AssignmentId, MatchGameId, TaskId, UnixNanos,
};
use gambit_tracker::store::{Completion, MatchGameResult, NewGameRecord, TrackerStore};

use crate::{Error, MemoryStore};

#[async_trait]
impl TrackerStore for MemoryStore {
    type Error = Error;

    async fn assignment(&self, external_id: &str) -> Result<Option<TaskAssignment>, Self::Error> {
        let state = self.inner.state.lock();
        Ok(state
            .assignments_by_external_id
            .get(external_id)
            .and_then(|id| state.assignments.get(id))
            .cloned())
    }

    async fn touch_assignment(&self, id: AssignmentId, now: UnixNanos) -> Result<(), Self::Error> {
        if let Some(assignment) = self.inner.state.lock().assignments.get_mut(&id) {
            assignment.last_heartbeat_at = now;
        }
        Ok(())
    }

    async fn task(&self, id: TaskId) -> Result<Option<Task>, Self::Error> {
        Ok(self.get_task(id))
    }

    async fn record_match_game(
        &self,
        match_game_id: MatchGameId,
        result: MatchGameResult,
    ) -> Result<Option<MatchTask>, Self::Error> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        let game = state
            .match_games
            .get_mut(&match_game_id)
            .ok_or(Error::MatchGameNotFound(match_game_id))?;

        if game.done {
            return Ok(None);
        }

        let task = state
            .tasks
            .get_mut(&game.match_task_id)
            .ok_or(Error::TaskNotFound(game.match_task_id))?;

        let TaskDetails::Match(m) = &mut task.details else {
            return Err(Error::WrongKind(task.id, TaskKind::Match));
        };

        game.done = true;
        game.result = Some(result.outcome);
        game.pgn = result.pgn;
        game.engine_version = Some(result.engine_version);

        m.record(result.outcome);
        let m = m.clone();
        task.updated_at = result.reported_at;

        Ok(Some(m))
    }

    async fn add_sprt_results(
        &self,
        task_id: TaskId,
        delta: &Pentanomial,
        now: UnixNanos,
    ) -> Result<Option<SprtTask>, Self::Error> {
        let mut state = self.inner.state.lock();
        let task = state.task_mut(task_id)?;

        if task.status.is_finished() {
            return Ok(None);
        }

        let TaskDetails::Sprt(sprt) = &mut task.details else {
            return Err(Error::WrongKind(task_id, TaskKind::Sprt));
        };

        sprt.results.add(delta);
        let sprt = sprt.clone();
        task.updated_at = now;

        Ok(Some(sprt))
    }

    async fn update_sprt_estimate(
        &self,
        task_id: TaskId,
        llr: f64,
        elo: EloInterval,
    ) -> Result<(), Self::Error> {
        let mut state = self.inner.state.lock();
        let task = state.task_mut(task_id)?;

        let TaskDetails::Sprt(sprt) = &mut task.details else {
            return Err(Error::WrongKind(task_id, TaskKind::Sprt));
        };

        sprt.llr = Some(llr);
        sprt.elo = Some(elo);

        Ok(())
    }

    async fn record_tune_results(
        &self,
        task_id: TaskId,
        results: TuningResults,
        now: UnixNanos,
    ) -> Result<Option<TuneTask>, Self::Error> {
        let mut state = self.inner.state.lock();
        let task = state.task_mut(task_id)?;

        if task.status.is_finished() {
            return Ok(None);
        }

        let TaskDetails::Tune(tune) = &mut task.details else {
            return Err(Error::WrongKind(task_id, TaskKind::Tune));
        };

        tune.record(
            results.param_set_id,
            results.wins,
            results.losses,
            results.draws,
        )
        .map_err(|error| Error::ParamSetNotFound(task_id, error.0))?;
        let tune = tune.clone();
        task.updated_at = now;

        Ok(Some(tune))
    }

    async fn save_game_record(&self, record: NewGameRecord) -> Result<(), Self::Error> {
        let mut state = self.inner.state.lock();
        state.game_records.push_back(record);
        while state.game_records.len() > self.inner.game_record_capacity {
            state.game_records.pop_front();
        }
        Ok(())
    }

    async fn network_exists(&self, sha: &str) -> Result<bool, Self::Error> {
        Ok(self
            .inner
            .state
            .lock()
            .networks
            .values()
            .any(|network| network.sha == sha))
    }

    async fn increment_network_games(&self, sha: &str) -> Result<bool, Self::Error> {
        let mut state = self.inner.state.lock();
        match state.networks.values_mut().find(|network| network.sha == sha) {
            Some(network) => {
                network.games_played += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn complete_task(
        &self,
        task_id: TaskId,
        completion: Completion,
        now: UnixNanos,
    ) -> Result<bool, Self::Error> {
        let mut state = self.inner.state.lock();
        let task = state.task_mut(task_id)?;

        if !task.transition(TaskStatus::Done, now) {
            return Ok(false);
        }

        match (&mut task.details, completion) {
            (TaskDetails::Match(m), Completion::Match { passed, elo }) => {
                m.done = true;
                m.passed = passed;
                m.elo = Some(elo);
            }
            (TaskDetails::Sprt(sprt), Completion::Sprt { passed }) => {
                sprt.passed = Some(passed);
            }
            _ => {}
        }

        for assignment in state
            .assignments
            .values_mut()
            .filter(|a| a.task_id == task_id && a.is_active())
        {
            assignment.status = AssignmentStatus::Done;
            assignment.completed_at = Some(now);
        }

        Ok(true)
    }

    async fn complete_assignment(
        &self,
        id: AssignmentId,
        now: UnixNanos,
    ) -> Result<(), Self::Error> {
        let mut state = self.inner.state.lock();
        let assignment = state
            .assignments
            .get_mut(&id)
            .ok_or_else(|| Error::AssignmentNotFound(id.to_string()))?;

        if assignment.is_active() {
            assignment.status = AssignmentStatus::Done;
            assignment.completed_at = Some(now);
        }

        Ok(())
    }

    async fn cancel_task(&self, task_id: TaskId, now: UnixNanos) -> Result<bool, Self::Error> {
        self.inner.state.lock().cancel_task(task_id, now)
    }

    async fn reap_stale_assignments(
        &self,
        cutoff: UnixNanos,
        now: UnixNanos,
    ) -> Result<Vec<TaskAssignment>, Self::Error> {
        let mut state = self.inner.state.lock();

        let mut reaped = Vec::new();
        for assignment in state
            .assignments
            .values_mut()
            .filter(|a| a.is_stale(cutoff))
        {
            assignment.status = AssignmentStatus::Cancelled;
            assignment.cancelled_at = Some(now);
            reaped.push(assignment.clone());
        }

        for assignment in &reaped {
            if state.has_active_assignment(assignment.task_id) {
                continue;
            }
            if let Some(task) = state.tasks.get_mut(&assignment.task_id) {
                if task.status == TaskStatus::Active {
                    task.transition(TaskStatus::Pending, now);
                }
            }
        }

        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use gambit_common::{
        assignment::{MatchGame, NewAssignment},
        task::{GameOutcome, TrainingTask},
        NetworkId, TokenId, TrainingRunId,
    };
    use gambit_scheduler::store::SchedulerStore;

    use super::*;

    fn training(store: &MemoryStore) -> TaskId {
        store.add_task(
            "self-play",
            TaskDetails::Training(TrainingTask {
                training_run_id: TrainingRunId(1),
                train_book: String::from("train"),
                match_book: String::from("match"),
                train_parameters: String::new(),
                match_parameters: String::new(),
                nodes_per_move: None,
            }),
        )
    }

    fn match_task(store: &MemoryStore, training_task_id: TaskId, game_cap: u32) -> TaskId {
        store.add_task(
            "match",
            TaskDetails::Match(MatchTask {
                training_task_id,
                candidate_network_id: NetworkId(2),
                best_network_id: NetworkId(1),
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
            }),
        )
    }

    async fn assign(
        store: &MemoryStore,
        task_id: TaskId,
        match_game_id: Option<MatchGameId>,
        at: UnixNanos,
    ) -> Result<TaskAssignment, Error> {
        store
            .insert_assignment(NewAssignment {
                external_id: format!("{task_id}-{}", at.0),
                task_id,
                kind: if match_game_id.is_some() {
                    TaskKind::Match
                } else {
                    TaskKind::Training
                },
                match_game_id,
                token_id: TokenId(1),
                assigned_at: at,
            })
            .await
    }

    fn result(outcome: GameOutcome) -> MatchGameResult {
        MatchGameResult {
            outcome,
            pgn: None,
            engine_version: String::from("0.31.0"),
            reported_at: UnixNanos(100),
        }
    }

    #[tokio::test]
    async fn match_games_are_recorded_once() {
        let store = MemoryStore::new();
        let match_id = match_task(&store, training(&store), 2);
        let game = store
            .create_match_game(match_id, None)
            .await
            .unwrap()
            .unwrap();

        let m = store
            .record_match_game(game.id, result(GameOutcome::Win))
            .await
            .unwrap()
            .unwrap();
        assert_eq!((m.games_created, m.wins), (1, 1));

        assert!(store
            .record_match_game(game.id, result(GameOutcome::Loss))
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.match_games(match_id)[0].result, Some(GameOutcome::Win));
    }

    #[tokio::test]
    async fn game_slots_have_one_active_assignment() {
        let store = MemoryStore::new();
        let match_id = match_task(&store, training(&store), 10);
        let game = store
            .create_match_game(match_id, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(game.flip, MatchGame::flip_for(game.id));

        let first = assign(&store, match_id, Some(game.id), UnixNanos(1))
            .await
            .unwrap();
        assert!(matches!(
            assign(&store, match_id, Some(game.id), UnixNanos(2)).await,
            Err(Error::MatchGameTaken(_))
        ));

        store
            .complete_assignment(first.id, UnixNanos(3))
            .await
            .unwrap();
        assign(&store, match_id, Some(game.id), UnixNanos(4))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn game_slots_are_capped() {
        let store = MemoryStore::new();
        let match_id = match_task(&store, training(&store), 2);
        let first = store
            .create_match_game(match_id, None)
            .await
            .unwrap()
            .unwrap();
        let second = store
            .create_match_game(match_id, None)
            .await
            .unwrap()
            .unwrap();
        assert!(store
            .create_match_game(match_id, None)
            .await
            .unwrap()
            .is_none());

        // A slot whose player went silent no longer counts.
        assign(&store, match_id, Some(first.id), UnixNanos(10))
            .await
            .unwrap();
        store
            .reap_stale_assignments(UnixNanos(20), UnixNanos(30))
            .await
            .unwrap();
        store
            .create_match_game(match_id, None)
            .await
            .unwrap()
            .unwrap();
        assert!(store
            .create_match_game(match_id, None)
            .await
            .unwrap()
            .is_none());

        store
            .record_match_game(second.id, result(GameOutcome::Win))
            .await
            .unwrap()
            .unwrap();
        assert!(store
            .create_match_game(match_id, None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn completion_is_idempotent() {
        let store = MemoryStore::new();
        let match_id = match_task(&store, training(&store), 1);
        let assignment = assign(&store, match_id, None, UnixNanos(1)).await.unwrap();

        let completion = Completion::Match {
            passed: true,
            elo: EloInterval::default(),
        };
        assert!(store
            .complete_task(match_id, completion, UnixNanos(2))
            .await
            .unwrap());
        assert!(!store
            .complete_task(match_id, completion, UnixNanos(3))
            .await
            .unwrap());
        assert!(!store.cancel_task(match_id, UnixNanos(4)).await.unwrap());

        let task = store.get_task(match_id).unwrap();
        assert_eq!(task.status, TaskStatus::Done);
        assert_eq!(task.updated_at, UnixNanos(2));
        assert_eq!(
            store.assignments(match_id)[0].status,
            AssignmentStatus::Done
        );
        assert_eq!(store.assignments(match_id)[0].id, assignment.id);
    }

    #[tokio::test]
    async fn reaping_returns_tasks_to_pending() {
        let store = MemoryStore::new();
        let task_id = training(&store);
        let stale = assign(&store, task_id, None, UnixNanos(10)).await.unwrap();
        let fresh = assign(&store, task_id, None, UnixNanos(20)).await.unwrap();
        assert_eq!(store.get_task(task_id).unwrap().status, TaskStatus::Active);

        let reaped = store
            .reap_stale_assignments(UnixNanos(15), UnixNanos(30))
            .await
            .unwrap();
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].id, stale.id);
        assert_eq!(store.get_task(task_id).unwrap().status, TaskStatus::Active);

        store
            .touch_assignment(fresh.id, UnixNanos(40))
            .await
            .unwrap();
        assert!(store
            .reap_stale_assignments(UnixNanos(35), UnixNanos(50))
            .await
            .unwrap()
            .is_empty());

        let reaped = store
            .reap_stale_assignments(UnixNanos(45), UnixNanos(60))
            .await
            .unwrap();
        assert_eq!(reaped.len(), 1);
        assert_eq!(store.get_task(task_id).unwrap().status, TaskStatus::Pending);
    }
}
