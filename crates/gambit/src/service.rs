use gambit_common::payload::{
    AnonymousTokenRequest, AuthResponse, MigrateCredentialsRequest, ProgressReport,
    ProgressResponse, TaskRequest, TaskResponse,
};
use gambit_identity::{store::IdentityStore, IdentityValidator, TokenIssuer};
use gambit_scheduler::{store::SchedulerStore, Scheduler, SchedulerOptions};
use gambit_tracker::{store::TrackerStore, Tracker, TrackerOptions};

use crate::Status;

/// A store that backs every Gambit component.
pub trait GambitStore: IdentityStore + SchedulerStore + TrackerStore + Clone + 'static {}

impl<S> GambitStore for S where S: IdentityStore + SchedulerStore + TrackerStore + Clone + 'static {}

/// Hands out work and accepts progress reports.
#[derive(Debug, Clone)]
pub struct TaskService<S> {
    validator: IdentityValidator<S>,
    scheduler: Scheduler<S>,
    tracker: Tracker<S>,
}

impl<S> TaskService<S>
where
    S: GambitStore,
{
    /// Create a new service, every component shares the given store.
    pub fn new(store: S, scheduler: SchedulerOptions, tracker: TrackerOptions) -> Self {
        Self {
            validator: IdentityValidator::new(store.clone()),
            scheduler: Scheduler::new(store.clone(), scheduler),
            tracker: Tracker::new(store, tracker),
        }
    }

    /// The tracker used for progress reports.
    ///
    /// Use it to cancel tasks or to subscribe to lifecycle events.
    #[must_use]
    pub fn tracker(&self) -> &Tracker<S> {
        &self.tracker
    }

    /// Validate the caller and hand out the next task.
    ///
    /// # Errors
    ///
    /// Fails for invalid tokens, or if no work can be handed out.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn get_next_task(&self, request: TaskRequest) -> Result<TaskResponse, Status> {
        let identity = self
            .validator
            .validate(&request.token, Some(&request.client_info))
            .await?;

        Ok(self.scheduler.next_task(&identity).await?)
    }

    /// Validate the caller and apply a progress report.
    ///
    /// # Errors
    ///
    /// Fails for invalid tokens, unknown tasks and rejected uploads.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn report_progress(
        &self,
        request: ProgressReport,
    ) -> Result<ProgressResponse, Status> {
        let identity = self.validator.validate(&request.token, None).await?;

        let status = self
            .tracker
            .report_progress(&identity, &request.task_id, &request.progress)
            .await?;

        Ok(ProgressResponse { status })
    }
}

/// Issues tokens.
#[derive(Debug, Clone)]
pub struct AuthService<S> {
    issuer: TokenIssuer<S>,
}

impl<S> AuthService<S>
where
    S: IdentityStore,
{
    /// Create a new service with the given backing store.
    pub fn new(store: S) -> Self {
        Self {
            issuer: TokenIssuer::new(store),
        }
    }

    /// Exchange legacy credentials for a token.
    ///
    /// # Errors
    ///
    /// Fails for malformed or unknown credentials.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn migrate_credentials(
        &self,
        request: MigrateCredentialsRequest,
    ) -> Result<AuthResponse, Status> {
        let token = self
            .issuer
            .migrate_credentials(&request.username, &request.password)
            .await?;
        Ok(AuthResponse { token })
    }

    /// Issue a token that is not tied to a user.
    ///
    /// # Errors
    ///
    /// Fails if the store fails.
    #[tracing::instrument(level = "debug", skip_all)]
    #[allow(clippy::needless_pass_by_value)]
    pub async fn get_anonymous_token(
        &self,
        _request: AnonymousTokenRequest,
    ) -> Result<AuthResponse, Status> {
        let token = self.issuer.anonymous_token().await?;
        Ok(AuthResponse { token })
    }
}

#[cfg(all(test, feature = "store-memory"))]
mod tests {
    use gambit_common::{
        identity::ClientInfo,
        payload::{Progress, TrainingProgress},
        status::Code,
    };

    use super::*;
    use crate::MemoryStore;

    fn request(token: &str) -> TaskRequest {
        TaskRequest {
            token: token.to_string(),
            client_info: ClientInfo::default(),
        }
    }

    #[tokio::test]
    async fn tokens_are_checked_before_scheduling() {
        let store = MemoryStore::new();
        let tasks = TaskService::new(
            store.clone(),
            SchedulerOptions::default(),
            TrackerOptions::default(),
        );
        let auth = AuthService::new(store);

        let error = tasks.get_next_task(request("abc")).await.unwrap_err();
        assert_eq!(error.code, Code::InvalidArgument);

        let error = tasks
            .get_next_task(request("lc0-0000"))
            .await
            .unwrap_err();
        assert_eq!(error.code, Code::Unauthenticated);

        let token = auth
            .get_anonymous_token(AnonymousTokenRequest::default())
            .await
            .unwrap()
            .token;
        let error = tasks.get_next_task(request(&token)).await.unwrap_err();
        assert_eq!(error.code, Code::Unavailable);
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn progress_for_unknown_tasks() {
        let store = MemoryStore::new();
        let tasks = TaskService::new(
            store.clone(),
            SchedulerOptions::default(),
            TrackerOptions::default(),
        );
        let token = AuthService::new(store)
            .get_anonymous_token(AnonymousTokenRequest::default())
            .await
            .unwrap()
            .token;

        let error = tasks
            .report_progress(ProgressReport {
                token,
                task_id: String::from("20240101T000000.000000000"),
                progress: Progress::Training(TrainingProgress::default()),
            })
            .await
            .unwrap_err();
        assert_eq!(error.code, Code::NotFound);
    }
}
