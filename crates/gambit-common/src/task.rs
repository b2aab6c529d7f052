//! The task catalog.
//!
//! A [`Task`] is a tagged variant: the generic record carries exactly
//! one kind-specific [`TaskDetails`] payload, so a task can never
//! have zero or multiple concrete extensions.

use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{status::UnexpectedValueError, NetworkId, TaskId, TrainingRunId, UnixNanos};

/// All task kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Self-play games for the training pipeline.
    Training,
    /// Candidate network versus current best network.
    Match,
    /// Sequential probability ratio test between two engine configurations.
    Sprt,
    /// Parameter tuning.
    Tune,
}

impl TaskKind {
    /// Return a string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Training => "training",
            TaskKind::Match => "match",
            TaskKind::Sprt => "sprt",
            TaskKind::Tune => "tune",
        }
    }
}

impl Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = UnexpectedValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "training" => TaskKind::Training,
            "match" => TaskKind::Match,
            "sprt" => TaskKind::Sprt,
            "tune" => TaskKind::Tune,
            _ => Err(UnexpectedValueError(s.to_string()))?,
        })
    }
}

/// All valid statuses for tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created by the training pipeline, not handed out yet
    /// (or returned after its assignments went stale).
    Pending,
    /// At least one assignment was created for the task.
    Active,
    /// Cancelled by an operator or superseded.
    Cancelled,
    /// The task reached its stop condition.
    Done,
}

impl TaskStatus {
    /// Return a string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Active => "active",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Done => "done",
        }
    }

    /// Return whether the status is final.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Cancelled)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// Finished statuses never change, and a status never
    /// "transitions" to itself.
    #[must_use]
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Done | TaskStatus::Cancelled, _) => false,
            (TaskStatus::Pending, TaskStatus::Pending) | (TaskStatus::Active, TaskStatus::Active) => {
                false
            }
            _ => true,
        }
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = UnexpectedValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => TaskStatus::Pending,
            "active" => TaskStatus::Active,
            "cancelled" => TaskStatus::Cancelled,
            "done" => TaskStatus::Done,
            _ => Err(UnexpectedValueError(s.to_string()))?,
        })
    }
}

/// A unit of work tracked by the orchestration engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// The task's ID.
    pub id: TaskId,
    /// Creation time.
    pub created_at: UnixNanos,
    /// Last modification time.
    pub updated_at: UnixNanos,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Free-text description.
    pub description: String,
    /// The kind-specific part of the task.
    pub details: TaskDetails,
}

impl Task {
    /// The kind of the task.
    #[must_use]
    pub fn kind(&self) -> TaskKind {
        self.details.kind()
    }

    /// Move the task to the given status if the lifecycle allows it.
    ///
    /// Returns whether the status changed.
    pub fn transition(&mut self, next: TaskStatus, now: UnixNanos) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = now;
        true
    }
}

/// Kind-specific task data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskDetails {
    /// See [`TrainingTask`].
    Training(TrainingTask),
    /// See [`MatchTask`].
    Match(MatchTask),
    /// See [`SprtTask`].
    Sprt(SprtTask),
    /// See [`TuneTask`].
    Tune(TuneTask),
}

impl TaskDetails {
    /// The kind of the details.
    #[must_use]
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskDetails::Training(_) => TaskKind::Training,
            TaskDetails::Match(_) => TaskKind::Match,
            TaskDetails::Sprt(_) => TaskKind::Sprt,
            TaskDetails::Tune(_) => TaskKind::Tune,
        }
    }
}

/// Self-play work for a training run.
///
/// The current best network is not stored here, it is read from
/// the [`TrainingRun`](crate::artifact::TrainingRun) on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingTask {
    /// The owning training run.
    pub training_run_id: TrainingRunId,
    /// Content hash of the opening book used for training games.
    pub train_book: String,
    /// Content hash of the opening book used for match games.
    pub match_book: String,
    /// Engine parameters for training games.
    pub train_parameters: String,
    /// Engine parameters for match games.
    pub match_parameters: String,
    /// Search budget of training games, the configured default is used if unset.
    #[serde(default)]
    pub nodes_per_move: Option<u32>,
}

/// A candidate network playing the current best network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchTask {
    /// The parent training task.
    pub training_task_id: TaskId,
    /// The network under test.
    pub candidate_network_id: NetworkId,
    /// The current best network at the time the match was created.
    pub best_network_id: NetworkId,
    /// Number of reported games.
    #[serde(default)]
    pub games_created: u32,
    /// Candidate wins.
    #[serde(default)]
    pub wins: u32,
    /// Candidate losses.
    #[serde(default)]
    pub losses: u32,
    /// Draws.
    #[serde(default)]
    pub draws: u32,
    /// The number of games after which the match is complete.
    pub game_cap: u32,
    /// The match reached its game cap.
    #[serde(default)]
    pub done: bool,
    /// The candidate passed the match.
    #[serde(default)]
    pub passed: bool,
    /// Not a promotion match.
    #[serde(default)]
    pub test_only: bool,
    /// Unusual parameters, the result should not be used for Elo.
    #[serde(default)]
    pub special_params: bool,
    /// The caller slice this match is restricted to, `0` matches any slice.
    #[serde(default)]
    pub target_slice: u8,
    /// Elo estimate of the candidate, set once the match is complete.
    #[serde(default)]
    pub elo: Option<EloInterval>,
}

impl MatchTask {
    /// Whether a caller in the given slice may play this match.
    #[must_use]
    pub fn accepts_slice(&self, slice: u8) -> bool {
        self.target_slice == 0 || self.target_slice == slice
    }

    /// Account for a single reported game.
    ///
    /// Returns `true` if the game cap was reached by this game.
    pub fn record(&mut self, outcome: GameOutcome) -> bool {
        let was_complete = self.is_complete();
        self.games_created = self.games_created.saturating_add(1);
        match outcome {
            GameOutcome::Win => self.wins += 1,
            GameOutcome::Loss => self.losses += 1,
            GameOutcome::Draw => self.draws += 1,
        }
        !was_complete && self.is_complete()
    }

    /// Whether the match reached its game cap.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.games_created >= self.game_cap
    }

    /// Whether another game slot may be handed out while `in_flight`
    /// slots are still being played.
    #[must_use]
    pub fn has_room_for(&self, in_flight: u32) -> bool {
        self.games_created.saturating_add(in_flight) < self.game_cap
    }

    /// The `[losses, draws, wins]` histogram of the candidate.
    #[must_use]
    pub fn trinomial(&self) -> [u64; 3] {
        [
            u64::from(self.losses),
            u64::from(self.draws),
            u64::from(self.wins),
        ]
    }
}

/// The outcome of a single match game from the candidate's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameOutcome {
    /// The candidate won.
    Win,
    /// Draw.
    Draw,
    /// The candidate lost.
    Loss,
}

impl GameOutcome {
    /// Signed result used for persistence: `1`, `0` or `-1`.
    #[must_use]
    pub fn as_i16(&self) -> i16 {
        match self {
            GameOutcome::Win => 1,
            GameOutcome::Draw => 0,
            GameOutcome::Loss => -1,
        }
    }
}

/// A sequential probability ratio test between two engine configurations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SprtTask {
    /// The reference engine.
    pub baseline: EngineSpec,
    /// The engine under test.
    pub candidate: EngineSpec,
    /// Content hash of the opening book.
    pub book: String,
    /// Time control of every game.
    pub time_control: TimeControl,
    /// Null hypothesis, in Elo.
    pub elo0: f64,
    /// Alternative hypothesis, in Elo.
    pub elo1: f64,
    /// Type I error rate, the configured default is used if unset.
    #[serde(default)]
    pub alpha: Option<f64>,
    /// Type II error rate, the configured default is used if unset.
    #[serde(default)]
    pub beta: Option<f64>,
    /// Accumulated game pair outcomes.
    #[serde(default)]
    pub results: Pentanomial,
    /// The most recent log-likelihood ratio.
    #[serde(default)]
    pub llr: Option<f64>,
    /// The most recent Elo estimate.
    #[serde(default)]
    pub elo: Option<EloInterval>,
    /// Set once the test reached a verdict, `true` if H1 was accepted.
    #[serde(default)]
    pub passed: Option<bool>,
}

/// Time control of SPRT games.
///
/// Wall-clock and fixed-node time controls are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "time_control_type", rename_all = "snake_case")]
pub enum TimeControl {
    /// Base time plus increment per move.
    Clock {
        /// Base time in milliseconds.
        base_ms: u64,
        /// Increment per move in milliseconds.
        increment_ms: u64,
    },
    /// A fixed number of nodes searched per move.
    Nodes {
        /// Nodes per move.
        nodes_per_move: u64,
    },
}

/// Outcome counts over pairs of games.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pentanomial {
    /// Loss-loss.
    pub ll: u64,
    /// Loss-draw.
    pub ld: u64,
    /// Draw-draw or win-loss.
    pub dd: u64,
    /// Draw-win.
    pub dw: u64,
    /// Win-win.
    pub ww: u64,
}

impl Pentanomial {
    /// The buckets in `[LL, LD, DD, DW, WW]` order.
    #[must_use]
    pub fn as_array(&self) -> [u64; 5] {
        [self.ll, self.ld, self.dd, self.dw, self.ww]
    }

    /// Number of game pairs.
    #[must_use]
    pub fn pairs(&self) -> u64 {
        self.as_array().iter().sum()
    }

    /// Add another tally to this one.
    pub fn add(&mut self, other: &Pentanomial) {
        self.ll = self.ll.saturating_add(other.ll);
        self.ld = self.ld.saturating_add(other.ld);
        self.dd = self.dd.saturating_add(other.dd);
        self.dw = self.dw.saturating_add(other.dw);
        self.ww = self.ww.saturating_add(other.ww);
    }
}

impl From<[u64; 5]> for Pentanomial {
    fn from([ll, ld, dd, dw, ww]: [u64; 5]) -> Self {
        Self { ll, ld, dd, dw, ww }
    }
}

/// A lower bound, point estimate and upper bound in Elo.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EloInterval {
    /// Lower bound of the 95% confidence interval.
    pub lower: f64,
    /// Point estimate.
    pub elo: f64,
    /// Upper bound of the 95% confidence interval.
    pub upper: f64,
}

/// A parameter tuning task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuneTask {
    /// The engine build to tune.
    pub build: BuildSpec,
    /// The network used by the engine.
    pub network_id: NetworkId,
    /// Content hash of the opening book.
    pub book: String,
    /// Games to play with every parameter set.
    pub games_per_param_set: u32,
    /// The parameter sets under test.
    pub param_sets: Vec<TuneParamSet>,
}

impl TuneTask {
    /// Add results to a parameter set.
    ///
    /// # Errors
    ///
    /// Fails if the parameter set does not belong to this task.
    pub fn record(
        &mut self,
        param_set_id: u32,
        wins: u32,
        losses: u32,
        draws: u32,
    ) -> Result<(), UnknownParamSet> {
        let set = self
            .param_sets
            .iter_mut()
            .find(|set| set.id == param_set_id)
            .ok_or(UnknownParamSet(param_set_id))?;
        set.wins = set.wins.saturating_add(wins);
        set.losses = set.losses.saturating_add(losses);
        set.draws = set.draws.saturating_add(draws);
        Ok(())
    }

    /// Parameter sets that still need games.
    pub fn pending_sets(&self) -> impl Iterator<Item = &TuneParamSet> + '_ {
        self.param_sets
            .iter()
            .filter(|set| set.games() < self.games_per_param_set)
    }

    /// Whether every parameter set played its games.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.pending_sets().next().is_none()
    }
}

/// A parameter vector under test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuneParamSet {
    /// The ID of the set, unique within its task.
    pub id: u32,
    /// Engine options, passed to the engine as-is.
    pub parameters: BTreeMap<String, String>,
    /// Wins.
    #[serde(default)]
    pub wins: u32,
    /// Losses.
    #[serde(default)]
    pub losses: u32,
    /// Draws.
    #[serde(default)]
    pub draws: u32,
}

impl TuneParamSet {
    /// Games played with this set.
    #[must_use]
    pub fn games(&self) -> u32 {
        self.wins
            .saturating_add(self.losses)
            .saturating_add(self.draws)
    }
}

/// The parameter set is not part of the task.
#[derive(Debug, thiserror::Error)]
#[error("unknown parameter set `{0}`")]
pub struct UnknownParamSet(pub u32);

/// An engine configuration stored on evaluation tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSpec {
    /// Where to build the engine from, the client's own build is used if unset.
    #[serde(default)]
    pub build: Option<BuildSpec>,
    /// The network used by the engine.
    pub network_id: NetworkId,
    /// Command line arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// UCI options.
    #[serde(default)]
    pub uci_options: BTreeMap<String, String>,
}

/// Build provenance of an engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    /// Repository URL.
    pub repo_url: String,
    /// Commit to build.
    pub commit: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn match_task(game_cap: u32, games_created: u32) -> MatchTask {
        MatchTask {
            training_task_id: TaskId(1),
            candidate_network_id: NetworkId(2),
            best_network_id: NetworkId(1),
            games_created,
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

    #[test]
    fn finished_statuses_are_final() {
        for next in [
            TaskStatus::Pending,
            TaskStatus::Active,
            TaskStatus::Cancelled,
            TaskStatus::Done,
        ] {
            assert!(!TaskStatus::Done.can_transition_to(next));
            assert!(!TaskStatus::Cancelled.can_transition_to(next));
        }
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Active));
        assert!(TaskStatus::Active.can_transition_to(TaskStatus::Pending));
        assert!(TaskStatus::Active.can_transition_to(TaskStatus::Done));
        assert!(!TaskStatus::Active.can_transition_to(TaskStatus::Active));
    }

    #[test]
    fn match_cap_fires_once() {
        let mut m = match_task(10, 8);
        assert!(!m.record(GameOutcome::Win));
        assert!(m.record(GameOutcome::Draw));
        assert!(!m.record(GameOutcome::Loss));
        assert_eq!(m.games_created, 11);
        assert_eq!(m.trinomial(), [1, 1, 1]);
    }

    #[test]
    fn slots_in_flight_count_against_the_cap() {
        let m = match_task(10, 7);
        assert!(m.has_room_for(0));
        assert!(m.has_room_for(2));
        assert!(!m.has_room_for(3));
        assert!(!match_task(10, 10).has_room_for(0));
    }

    #[test]
    fn slice_zero_is_a_wildcard() {
        let mut m = match_task(10, 0);
        assert!((1..=3).all(|s| m.accepts_slice(s)));
        m.target_slice = 2;
        assert!(m.accepts_slice(2));
        assert!(!m.accepts_slice(1));
    }

    #[test]
    fn tune_completion() {
        let mut tune = TuneTask {
            build: BuildSpec {
                repo_url: "https://example.com/lc0.git".into(),
                commit: "abc".into(),
            },
            network_id: NetworkId(1),
            book: "book".into(),
            games_per_param_set: 4,
            param_sets: vec![
                TuneParamSet {
                    id: 1,
                    parameters: BTreeMap::new(),
                    wins: 0,
                    losses: 0,
                    draws: 0,
                },
                TuneParamSet {
                    id: 2,
                    parameters: BTreeMap::new(),
                    wins: 0,
                    losses: 0,
                    draws: 0,
                },
            ],
        };
        tune.record(1, 2, 1, 1).unwrap();
        assert!(!tune.is_complete());
        assert_eq!(tune.pending_sets().count(), 1);
        tune.record(2, 0, 0, 4).unwrap();
        assert!(tune.is_complete());
        assert!(tune.record(3, 1, 0, 0).is_err());
    }

    #[test]
    fn details_are_tagged_by_kind() {
        let details = TaskDetails::Match(match_task(10, 0));
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["kind"], "match");
        let back: TaskDetails = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), TaskKind::Match);
    }
}
