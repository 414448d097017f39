// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Repository workers.
//!
//! One [`RepositoryWorker`] task owns one repository's [`ConfigTree`] and
//! processes its jobs strictly in submission order. Callers talk to it
//! through a cloneable [`WorkerHandle`] over a bounded mailbox.
//!
//! Job pipeline:
//!
//! ```text
//! processing ─► tree.begin ─► dispatch ─► compute_check_instances
//!                                               │
//!                         db.begin ◄────────────┘
//!                            │
//!            errors queued? ─┼─ yes ─► db.rollback, tree.rollback ─► failed
//!                            │ no
//!            apply actions ──┼─ write failed ─► db.rollback, tree.rollback ─► failed
//!                            ▼
//!                db.commit, tree.commit ─► success
//! ```

mod dispatch;
mod load;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::CoreError;
use crate::model::{CheckConfig, Job, JobAction, JobResult, JobStatus, RebuildLevel};
use crate::persistence::{Persistence, PersistenceTransaction};
use crate::tree::ConfigTree;

use self::dispatch::{SideWrites, dispatch};
use self::load::{LoadScope, load_tree};

/// Shared flags observable without going through the mailbox.
#[derive(Debug, Default)]
pub struct WorkerStatus {
    broken: AtomicBool,
    stopped: AtomicBool,
}

impl WorkerStatus {
    /// Whether the worker refuses jobs until rebuilt.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    /// Whether the worker was stopped.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Messages accepted by a worker.
#[derive(Debug)]
pub enum WorkerCommand {
    /// Process a job.
    Submit {
        /// The job.
        job: Job,
        /// Receives the job result.
        reply: oneshot::Sender<JobResult>,
    },
    /// Rebuild the tree from persisted state.
    Rebuild {
        /// Rebuild scope.
        level: RebuildLevel,
        /// Receives the rebuild outcome.
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
    /// Discard queued jobs and exit.
    Stop,
}

/// Cloneable handle to a running worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    repository_id: Uuid,
    sender: mpsc::Sender<WorkerCommand>,
    status: Arc<WorkerStatus>,
}

impl WorkerHandle {
    /// Repository served by the worker.
    pub fn repository_id(&self) -> Uuid {
        self.repository_id
    }

    /// Whether the worker is broken.
    pub fn is_broken(&self) -> bool {
        self.status.is_broken()
    }

    /// Whether the worker is stopped.
    pub fn is_stopped(&self) -> bool {
        self.status.is_stopped()
    }

    /// Queue a job and wait for its result.
    pub async fn submit(&self, job: Job) -> Result<JobResult, CoreError> {
        let stopped = CoreError::WorkerStopped {
            repository_id: self.repository_id,
        };
        if self.is_stopped() {
            return Err(stopped);
        }
        if self.is_broken() {
            return Err(CoreError::RepositoryBroken {
                repository_id: self.repository_id,
            });
        }
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(WorkerCommand::Submit { job, reply })
            .await
            .map_err(|_| stopped.clone())?;
        rx.await.map_err(|_| stopped)
    }

    /// Ask the worker to rebuild its tree and wait for the outcome.
    pub async fn rebuild(&self, level: RebuildLevel) -> Result<(), CoreError> {
        let stopped = CoreError::WorkerStopped {
            repository_id: self.repository_id,
        };
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(WorkerCommand::Rebuild { level, reply })
            .await
            .map_err(|_| stopped.clone())?;
        rx.await.map_err(|_| stopped)?
    }

    /// Stop the worker. Jobs already queued are failed, not processed.
    pub async fn stop(&self) {
        self.status.stopped.store(true, Ordering::SeqCst);
        let _ = self.sender.send(WorkerCommand::Stop).await;
    }
}

/// Actor owning one repository tree.
pub struct RepositoryWorker {
    repository_id: Uuid,
    tree: ConfigTree,
    persistence: Arc<dyn Persistence>,
    config: WorkerConfig,
    status: Arc<WorkerStatus>,
    receiver: mpsc::Receiver<WorkerCommand>,
}

impl RepositoryWorker {
    /// Spawn a worker task for `repository_id`.
    ///
    /// The task restores the tree from `persistence` before it reads its
    /// mailbox; a failed restore leaves the worker broken.
    pub fn spawn(
        repository_id: Uuid,
        persistence: Arc<dyn Persistence>,
        config: WorkerConfig,
    ) -> (WorkerHandle, JoinHandle<()>) {
        let (worker, handle) = Self::new(repository_id, persistence, config);
        let task = tokio::spawn(worker.run());
        (handle, task)
    }

    fn new(
        repository_id: Uuid,
        persistence: Arc<dyn Persistence>,
        config: WorkerConfig,
    ) -> (Self, WorkerHandle) {
        let (sender, receiver) = mpsc::channel(config.mailbox_capacity);
        let status = Arc::new(WorkerStatus::default());
        let worker = RepositoryWorker {
            repository_id,
            tree: ConfigTree::new(repository_id, config.queue_capacity),
            persistence,
            config,
            status: status.clone(),
            receiver,
        };
        let handle = WorkerHandle {
            repository_id,
            sender,
            status,
        };
        (worker, handle)
    }

    async fn run(mut self) {
        match self.startup().await {
            Ok(()) => info!(
                repository = %self.repository_id,
                objects = self.tree.len(),
                "Repository worker started"
            ),
            Err(e) => self.mark_broken(&e).await,
        }

        let mut health = tokio::time::interval(self.config.health_log_interval);
        health.tick().await;

        loop {
            tokio::select! {
                command = self.receiver.recv() => {
                    match command {
                        // Stop is flagged before its command is queued.
                        Some(command) if self.status.is_stopped() => {
                            self.discard(command).await;
                            break;
                        }
                        Some(WorkerCommand::Submit { job, reply }) => {
                            let result = self.handle_submit(job).await;
                            let _ = reply.send(result);
                        }
                        Some(WorkerCommand::Rebuild { level, reply }) => {
                            let result = self.rebuild(level).await;
                            let _ = reply.send(result);
                        }
                        Some(WorkerCommand::Stop) | None => break,
                    }
                }

                _ = health.tick(), if self.status.is_broken() => {
                    error!(
                        repository = %self.repository_id,
                        "Repository is broken, refusing jobs until rebuilt"
                    );
                }
            }
        }

        self.status.stopped.store(true, Ordering::SeqCst);
        self.receiver.close();
        while let Ok(command) = self.receiver.try_recv() {
            self.discard(command).await;
        }
        info!(repository = %self.repository_id, "Repository worker stopped");
    }

    async fn discard(&self, command: WorkerCommand) {
        let err = CoreError::WorkerStopped {
            repository_id: self.repository_id,
        };
        match command {
            WorkerCommand::Submit { job, reply } => {
                if !job.rebuild {
                    if let Err(e) = self
                        .persistence
                        .update_job_status(job.job_id, JobStatus::Failed, Some(&err.to_string()))
                        .await
                    {
                        warn!(job_id = %job.job_id, error = %e, "Failed to record discarded job");
                    }
                }
                let _ = reply.send(JobResult::failure(job.job_id, &err));
            }
            WorkerCommand::Rebuild { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            WorkerCommand::Stop => {}
        }
    }

    /// Restore the tree and check that it is self-consistent.
    async fn startup(&mut self) -> Result<(), CoreError> {
        self.tree = load_tree(
            self.persistence.as_ref(),
            self.repository_id,
            &self.config,
            LoadScope::Full,
        )
        .await?;
        self.tree.reconcile().map_err(|e| CoreError::Integrity {
            reason: e.to_string(),
        })?;
        let (actions, errors) = self.tree.pending();
        if actions > 0 || errors > 0 {
            return Err(CoreError::Integrity {
                reason: format!(
                    "restore left {} actions and {} errors queued",
                    actions, errors
                ),
            });
        }
        Ok(())
    }

    async fn mark_broken(&mut self, err: &CoreError) {
        self.status.broken.store(true, Ordering::SeqCst);
        self.tree.drain_actions();
        self.tree.drain_errors();
        error!(repository = %self.repository_id, error = %err, "Repository marked broken");
        if let Err(e) = self
            .persistence
            .mark_repository_broken(self.repository_id, &err.to_string())
            .await
        {
            // A repository created by its first job has no row yet.
            warn!(repository = %self.repository_id, error = %e, "Failed to persist broken flag");
        }
    }

    async fn handle_submit(&mut self, job: Job) -> JobResult {
        if !self.status.is_broken() {
            // Deployment-side failures flag the row, not the worker.
            match self
                .persistence
                .is_repository_broken(self.repository_id)
                .await
            {
                Ok(true) => {
                    self.status.broken.store(true, Ordering::SeqCst);
                    error!(repository = %self.repository_id, "Repository flagged broken in store");
                }
                Ok(false) => {}
                Err(e) => return JobResult::failure(job.job_id, &e),
            }
        }
        if self.status.is_broken() {
            let err = CoreError::RepositoryBroken {
                repository_id: self.repository_id,
            };
            if !job.rebuild {
                if let Err(e) = self
                    .persistence
                    .update_job_status(job.job_id, JobStatus::Failed, Some(&err.to_string()))
                    .await
                {
                    warn!(job_id = %job.job_id, error = %e, "Failed to record refused job");
                }
            }
            return JobResult::failure(job.job_id, &err);
        }
        self.process(job).await
    }

    /// Run one job through the pipeline.
    async fn process(&mut self, job: Job) -> JobResult {
        let persisted = !job.rebuild;
        if persisted {
            if let Err(e) = self
                .persistence
                .update_job_status(job.job_id, JobStatus::Processing, None)
                .await
            {
                return JobResult::failure(job.job_id, &e);
            }
        }

        debug!(
            repository = %self.repository_id,
            job_id = %job.job_id,
            action = job.action.name(),
            "Processing job"
        );

        match self.apply(&job.action).await {
            Ok(()) => {
                if persisted {
                    if let Err(e) = self
                        .persistence
                        .update_job_status(job.job_id, JobStatus::Success, None)
                        .await
                    {
                        warn!(job_id = %job.job_id, error = %e, "Failed to record job success");
                    }
                }
                info!(
                    repository = %self.repository_id,
                    job_id = %job.job_id,
                    action = job.action.name(),
                    "Job committed"
                );
                JobResult::success(job.job_id)
            }
            Err(e) => {
                warn!(
                    repository = %self.repository_id,
                    job_id = %job.job_id,
                    action = job.action.name(),
                    error = %e,
                    "Job rolled back"
                );
                if persisted {
                    if let Err(db) = self
                        .persistence
                        .update_job_status(job.job_id, JobStatus::Failed, Some(&e.to_string()))
                        .await
                    {
                        warn!(job_id = %job.job_id, error = %db, "Failed to record job failure");
                    }
                }
                if matches!(e, CoreError::Integrity { .. }) {
                    self.mark_broken(&e).await;
                }
                JobResult::failure(job.job_id, &e)
            }
        }
    }

    /// Mutate the tree and persist the outcome, all or nothing.
    async fn apply(&mut self, action: &JobAction) -> Result<(), CoreError> {
        self.tree.begin()?;

        let side = match dispatch(&mut self.tree, action) {
            Ok(side) => side,
            Err(e) => return Err(self.abort(None, e).await),
        };
        if let Err(e) = self.tree.compute_check_instances() {
            return Err(self.abort(None, e.into()).await);
        }
        self.persist(side).await
    }

    /// Persist the queued output of the open tree transaction.
    async fn persist(&mut self, side: SideWrites) -> Result<(), CoreError> {
        let mut tx = match self.persistence.begin().await {
            Ok(tx) => tx,
            Err(e) => return Err(self.abort(None, e).await),
        };

        let errors = self.tree.drain_errors();
        if !errors.is_empty() {
            let detail = errors
                .iter()
                .map(|m| format!("{}: {}", m.action, m.detail))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(self
                .abort(Some(tx), CoreError::Constraint { message: detail })
                .await);
        }

        if let Err(e) = write_all(tx.as_mut(), &mut self.tree, side).await {
            return Err(self.abort(Some(tx), e).await);
        }

        if let Err(e) = tx.commit().await {
            return Err(self.abort(None, e).await);
        }
        self.tree.commit()?;
        Ok(())
    }

    /// Roll back both sides and hand back the error that caused it.
    async fn abort(
        &mut self,
        tx: Option<Box<dyn PersistenceTransaction>>,
        err: CoreError,
    ) -> CoreError {
        if let Some(tx) = tx {
            if let Err(e) = tx.rollback().await {
                warn!(repository = %self.repository_id, error = %e, "Database rollback failed");
            }
        }
        if self.tree.in_transaction() {
            if let Err(e) = self.tree.rollback() {
                return e.into();
            }
        }
        self.tree.drain_actions();
        self.tree.drain_errors();
        err
    }

    /// Rebuild the tree from persisted state.
    ///
    /// `checks` replays every stored check configuration through the job
    /// pipeline; `instances` keeps checks and re-derives every instance.
    async fn rebuild(&mut self, level: RebuildLevel) -> Result<(), CoreError> {
        info!(repository = %self.repository_id, level = level.as_str(), "Rebuilding repository");
        let configs = match level {
            RebuildLevel::Checks => {
                self.persistence
                    .load_check_configs(self.repository_id)
                    .await?
            }
            RebuildLevel::Instances => Vec::new(),
        };
        self.persistence
            .reset_for_rebuild(self.repository_id, level)
            .await?;

        let scope = match level {
            RebuildLevel::Checks => LoadScope::WithoutChecks,
            RebuildLevel::Instances => LoadScope::Full,
        };
        let outcome = self.reload(scope, configs, level).await;
        match &outcome {
            Ok(()) => {
                self.status.broken.store(false, Ordering::SeqCst);
                self.persistence
                    .clear_repository_broken(self.repository_id)
                    .await?;
                info!(repository = %self.repository_id, "Rebuild finished");
            }
            Err(e) => self.mark_broken(e).await,
        }
        outcome
    }

    async fn reload(
        &mut self,
        scope: LoadScope,
        configs: Vec<CheckConfig>,
        level: RebuildLevel,
    ) -> Result<(), CoreError> {
        self.tree = load_tree(
            self.persistence.as_ref(),
            self.repository_id,
            &self.config,
            scope,
        )
        .await?;

        self.tree.begin()?;
        if let Err(e) = self.tree.reconcile() {
            return Err(self.abort(None, e.into()).await);
        }
        self.persist(SideWrites::default()).await?;

        if level == RebuildLevel::Checks {
            for config in configs {
                let job = Job::rebuild(self.repository_id, JobAction::AddCheck(Box::new(config)));
                let result = self.process(job).await;
                if !result.success {
                    return Err(CoreError::Integrity {
                        reason: result
                            .error
                            .unwrap_or_else(|| "check replay failed".to_string()),
                    });
                }
            }
        }
        Ok(())
    }
}

async fn write_all(
    tx: &mut dyn PersistenceTransaction,
    tree: &mut ConfigTree,
    side: SideWrites,
) -> Result<(), CoreError> {
    for config in &side.save_configs {
        tx.save_check_config(config).await?;
    }
    for action in tree.drain_actions() {
        tx.apply(&action).await?;
    }
    for config_id in side.delete_configs {
        tx.delete_check_config(config_id).await?;
    }
    Ok(())
}
