// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Vigil Lifecycle - Deployment Pipeline and Lifecycle Manager
//!
//! This crate turns the check instance configurations repository workers
//! persist into deployments monitoring systems can pick up, and keeps
//! every configuration moving through its lifecycle.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │              vigil-core repository workers (one per repository)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │ awaiting_computation
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          DeploymentWorker                                │
//! │   DeploymentDetailBuilder ──► computed ──► DeploymentOrderer             │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │ awaiting_rollout / blocked
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          LifecycleManager                                │
//! │   cleanup, unblock, deadlocks, deletions, pokes                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │ POST {uuid, path}
//!                                    ▼
//!                          Monitoring systems ──► Feedback
//! ```
//!
//! All coordination with the repository workers goes through committed
//! rows; nothing in this crate shares memory with a worker.
//!
//! # Configuration
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `VIGIL_LIFECYCLE_TICK_SECS` | 30 | lifecycle manager tick |
//! | `VIGIL_DEPLOYMENT_POLL_SECS` | 5 | builder/orderer poll |
//! | `VIGIL_DEPLOYMENT_BATCH_SIZE` | 100 | configurations per poll |
//! | `VIGIL_DEADLOCK_THRESHOLD_SECS` | 3600 | staleness before forced deprovision |
//! | `VIGIL_RETENTION_DAYS` | 7 | retention of finished configurations |
//! | `VIGIL_POKE_BATCH_SIZE` | 64 | pokes per batch |
//! | `VIGIL_POKE_TIMEOUT_MS` | 500 | HTTP timeout per poke |
//! | `VIGIL_POKE_PATH` | `/api/v1/configuration` | callback path in poke bodies |

#![deny(missing_docs)]

/// Assembles deployment documents.
pub mod builder;

/// Configuration loaded from environment variables.
pub mod config;

/// Builder + orderer poll loop.
pub mod deployment_worker;

/// Deployment document and comparison.
pub mod details;

/// Error types.
pub mod error;

/// Monitoring system status reports.
pub mod feedback;

/// Periodic lifecycle manager.
pub mod lifecycle_manager;

/// Notification delivery.
pub mod notifier;

/// Rollout ordering.
pub mod orderer;

/// Embeddable runtime.
pub mod runtime;

pub use error::{Error, Result};
pub use runtime::LifecycleRuntime;
