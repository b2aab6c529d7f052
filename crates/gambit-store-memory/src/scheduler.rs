use async_trait::async_trait;
use gambit_common::{
    artifact::{Book, Network, TrainingRun},
    assignment::{AssignmentStatus, MatchGame, NewAssignment, TaskAssignment},
    task::{MatchTask, Task, TaskDetails, TaskKind, TaskStatus, TrainingTask},
    AssignmentId, MatchGameId, NetworkId, TaskId, TrainingRunId, UnixNanos, UserId,
};
use gambit_scheduler::store::SchedulerStore;

use crate::{Error, MemoryStore};

#[async_trait]
impl SchedulerStore for MemoryStore {
    type Error = Error;

    async fn active_training_run(&self) -> Result<Option<TrainingRun>, Self::Error> {
        Ok(self
            .inner
            .state
            .lock()
            .training_runs
            .values()
            .filter(|run| run.active)
            .min_by_key(|run| run.id)
            .cloned())
    }

    async fn training_task(
        &self,
        run_id: TrainingRunId,
    ) -> Result<Option<(TaskId, TrainingTask)>, Self::Error> {
        Ok(self
            .inner
            .state
            .lock()
            .tasks
            .values()
            .filter(|task| !task.status.is_finished())
            .filter_map(|task| match &task.details {
                TaskDetails::Training(training) if training.training_run_id == run_id => {
                    Some((task.id, training.clone()))
                }
                _ => None,
            })
            .min_by_key(|(id, _)| *id))
    }

    async fn next_match(
        &self,
        training_task_id: TaskId,
        slice: u8,
        after: Option<TaskId>,
    ) -> Result<Option<(TaskId, MatchTask)>, Self::Error> {
        Ok(self
            .inner
            .state
            .lock()
            .tasks
            .values()
            .filter(|task| !task.status.is_finished() && Some(task.id) > after)
            .filter_map(|task| match &task.details {
                TaskDetails::Match(m)
                    if m.training_task_id == training_task_id
                        && !m.done
                        && m.accepts_slice(slice) =>
                {
                    Some((task.id, m.clone()))
                }
                _ => None,
            })
            .min_by_key(|(id, _)| *id))
    }

    async fn next_evaluation_task(
        &self,
        kind: TaskKind,
        after: Option<TaskId>,
    ) -> Result<Option<Task>, Self::Error> {
        Ok(self
            .inner
            .state
            .lock()
            .tasks
            .values()
            .filter(|task| {
                task.kind() == kind && !task.status.is_finished() && Some(task.id) > after
            })
            .min_by_key(|task| task.id)
            .cloned())
    }

    async fn network(&self, id: NetworkId) -> Result<Option<Network>, Self::Error> {
        Ok(self.get_network(id))
    }

    async fn book(&self, sha256: &str) -> Result<Option<Book>, Self::Error> {
        Ok(self.inner.state.lock().books.get(sha256).cloned())
    }

    async fn supersede_match(&self, task_id: TaskId, now: UnixNanos) -> Result<bool, Self::Error> {
        self.inner.state.lock().cancel_task(task_id, now)
    }

    async fn create_match_game(
        &self,
        match_task_id: TaskId,
        user_id: Option<UserId>,
    ) -> Result<Option<MatchGame>, Self::Error> {
        let mut state = self.inner.state.lock();

        let TaskDetails::Match(m) = &state.task_mut(match_task_id)?.details else {
            return Err(Error::WrongKind(match_task_id, TaskKind::Match));
        };
        let m = m.clone();

        let in_flight = state
            .match_games
            .values()
            .filter(|game| game.match_task_id == match_task_id && !game.done)
            .filter(|game| {
                !state
                    .assignments
                    .values()
                    .any(|a| a.match_game_id == Some(game.id) && !a.is_active())
            })
            .count();

        if !m.has_room_for(u32::try_from(in_flight).unwrap_or(u32::MAX)) {
            return Ok(None);
        }

        state.last_match_game_id += 1;
        let id = MatchGameId(state.last_match_game_id);

        let game = MatchGame {
            id,
            match_task_id,
            user_id,
            done: false,
            flip: MatchGame::flip_for(id),
            result: None,
            pgn: None,
            engine_version: None,
        };
        state.match_games.insert(id, game.clone());

        Ok(Some(game))
    }

    async fn insert_assignment(
        &self,
        assignment: NewAssignment,
    ) -> Result<TaskAssignment, Self::Error> {
        let mut state = self.inner.state.lock();

        if state
            .assignments_by_external_id
            .contains_key(&assignment.external_id)
        {
            return Err(Error::DuplicateAssignment(assignment.external_id));
        }

        if let Some(match_game_id) = assignment.match_game_id {
            if !state.match_games.contains_key(&match_game_id) {
                return Err(Error::MatchGameNotFound(match_game_id));
            }
            if state
                .assignments
                .values()
                .any(|a| a.match_game_id == Some(match_game_id) && a.is_active())
            {
                return Err(Error::MatchGameTaken(match_game_id));
            }
        }

        let task = state.task_mut(assignment.task_id)?;
        if task.status == TaskStatus::Pending {
            task.transition(TaskStatus::Active, assignment.assigned_at);
        }

        state.last_assignment_id += 1;
        let id = AssignmentId(state.last_assignment_id);

        let assignment = TaskAssignment {
            id,
            external_id: assignment.external_id,
            task_id: assignment.task_id,
            kind: assignment.kind,
            match_game_id: assignment.match_game_id,
            token_id: assignment.token_id,
            assigned_at: assignment.assigned_at,
            last_heartbeat_at: assignment.assigned_at,
            status: AssignmentStatus::Active,
            cancelled_at: None,
            completed_at: None,
        };

        state
            .assignments_by_external_id
            .insert(assignment.external_id.clone(), id);
        state.assignments.insert(id, assignment.clone());

        Ok(assignment)
    }
}
