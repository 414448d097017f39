// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker registry and job routing.
//!
//! The [`Supervisor`] owns one [`WorkerHandle`] per repository. It starts a
//! worker for every persisted repository, creates workers on
//! `create_repository` and routes every other job by repository id.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::CoreError;
use crate::model::{Job, JobAction, JobRequest, JobResult, RebuildLevel};
use crate::persistence::Persistence;
use crate::worker::{RepositoryWorker, WorkerHandle};

/// Registry of running repository workers.
pub struct Supervisor {
    persistence: Arc<dyn Persistence>,
    config: WorkerConfig,
    workers: DashMap<Uuid, WorkerHandle>,
    tasks: DashMap<Uuid, JoinHandle<()>>,
}

impl Supervisor {
    /// Create an empty registry.
    pub fn new(persistence: Arc<dyn Persistence>, config: WorkerConfig) -> Self {
        Self {
            persistence,
            config,
            workers: DashMap::new(),
            tasks: DashMap::new(),
        }
    }

    /// Start a worker for every persisted repository.
    ///
    /// Returns the number of workers started.
    pub async fn start_all(&self) -> Result<usize, CoreError> {
        let repositories = self.persistence.list_repositories().await?;
        for repo in &repositories {
            if repo.broken {
                warn!(
                    repository = %repo.repository_id,
                    reason = repo.broken_reason.as_deref().unwrap_or("unknown"),
                    "Starting previously broken repository"
                );
            }
            self.start(repo.repository_id);
        }
        info!(count = repositories.len(), "Repository workers started");
        Ok(repositories.len())
    }

    /// Handle of the worker for `repository_id`, starting it if needed.
    pub fn start(&self, repository_id: Uuid) -> WorkerHandle {
        self.workers
            .entry(repository_id)
            .or_insert_with(|| {
                let (handle, task) = RepositoryWorker::spawn(
                    repository_id,
                    self.persistence.clone(),
                    self.config.clone(),
                );
                self.tasks.insert(repository_id, task);
                handle
            })
            .clone()
    }

    /// Handle of a running worker.
    pub fn handle(&self, repository_id: Uuid) -> Result<WorkerHandle, CoreError> {
        self.workers
            .get(&repository_id)
            .map(|h| h.clone())
            .ok_or(CoreError::WorkerUnavailable { repository_id })
    }

    /// Repositories with a registered worker.
    pub fn repositories(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.workers.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    /// Validate a wire request and process it.
    pub async fn submit_request(&self, request: JobRequest) -> Result<JobResult, CoreError> {
        let job = Job::from_request(request)?;
        self.submit(job).await
    }

    /// Route a job to its worker and wait for the result.
    ///
    /// Broken and stopped repositories refuse the job before it is recorded.
    pub async fn submit(&self, job: Job) -> Result<JobResult, CoreError> {
        let handle = match &job.action {
            JobAction::CreateRepository { .. } => self.start(job.repository_id),
            _ => self.handle(job.repository_id)?,
        };
        if handle.is_stopped() {
            return Err(CoreError::WorkerStopped {
                repository_id: job.repository_id,
            });
        }
        if handle.is_broken() {
            return Err(CoreError::RepositoryBroken {
                repository_id: job.repository_id,
            });
        }
        if !job.rebuild {
            self.persistence.insert_job(&job).await?;
        }
        handle.submit(job).await
    }

    /// Whether the repository refuses jobs until rebuilt.
    pub fn is_broken(&self, repository_id: Uuid) -> Result<bool, CoreError> {
        Ok(self.handle(repository_id)?.is_broken())
    }

    /// Rebuild a repository from persisted state.
    pub async fn rebuild(&self, repository_id: Uuid, level: RebuildLevel) -> Result<(), CoreError> {
        self.handle(repository_id)?.rebuild(level).await
    }

    /// Stop one worker and drop it from the registry.
    pub async fn stop(&self, repository_id: Uuid) -> Result<(), CoreError> {
        let (_, handle) = self
            .workers
            .remove(&repository_id)
            .ok_or(CoreError::WorkerUnavailable { repository_id })?;
        handle.stop().await;
        if let Some((_, task)) = self.tasks.remove(&repository_id) {
            if let Err(e) = task.await {
                warn!(repository = %repository_id, error = %e, "Worker task ended abnormally");
            }
        }
        Ok(())
    }

    /// Stop every worker.
    pub async fn shutdown(&self) {
        let ids = self.repositories();
        info!(count = ids.len(), "Stopping repository workers");
        for id in ids {
            let _ = self.stop(id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;

    #[tokio::test]
    async fn test_unknown_repository_is_unavailable() {
        let supervisor = Supervisor::new(
            Arc::new(MemoryPersistence::new()),
            WorkerConfig::default(),
        );
        let err = supervisor.is_broken(Uuid::new_v4()).unwrap_err();
        assert_eq!(err.error_code(), "WORKER_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_create_repository_starts_worker() {
        let persistence = Arc::new(MemoryPersistence::new());
        let supervisor = Supervisor::new(persistence.clone(), WorkerConfig::default());
        let repo = Uuid::new_v4();
        let job = Job {
            job_id: Uuid::new_v4(),
            repository_id: repo,
            user: "ops".into(),
            request_type: "repository".into(),
            action: JobAction::CreateRepository {
                repository_id: repo,
                name: "infra".into(),
                team_id: Uuid::new_v4(),
            },
            queued_at: chrono::Utc::now(),
            rebuild: false,
        };
        let job_id = job.job_id;

        let result = supervisor.submit(job).await.unwrap();
        assert!(result.success, "{:?}", result.error);
        assert_eq!(supervisor.repositories(), vec![repo]);
        assert!(persistence.get_repository(repo).await.unwrap().is_some());
        let record = persistence.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(record.status, crate::model::JobStatus::Success);

        supervisor.shutdown().await;
        assert!(supervisor.repositories().is_empty());
    }
}
