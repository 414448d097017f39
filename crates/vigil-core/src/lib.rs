// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Vigil Core - Infrastructure Configuration Engine
//!
//! This crate holds the configuration tree of every repository, derives the
//! check instances monitoring systems deploy, and applies mutation jobs
//! transactionally against PostgreSQL.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Routing / HTTP layer                              │
//! │                   (JobRequest → Job::from_request)                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            Supervisor                                    │
//! │              (DashMap<repository, WorkerHandle>, routing)                │
//! └─────────────────────────────────────────────────────────────────────────┘
//!           │ mailbox                                      │ mailbox
//!           ▼                                              ▼
//! ┌───────────────────────┐                    ┌─────────────────────────────┐
//! │  RepositoryWorker A   │                    │    RepositoryWorker B       │
//! │  ConfigTree A         │                    │    ConfigTree B             │
//! └───────────────────────┘                    └─────────────────────────────┘
//!           │ Actions, one transaction per job             │
//!           ▼                                              ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            PostgreSQL                                    │
//! │   objects, properties, checks, check instances, configurations           │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//!                    vigil-lifecycle (builder, orderer, manager)
//! ```
//!
//! # Tree Output Protocol
//!
//! Tree mutations never touch storage. They report through two bounded
//! queues which the worker drains after every job:
//!
//! | Queue | Entry | Meaning |
//! |-------|-------|---------|
//! | Action | [`tree::Action`] | One persisted write each, in emission order |
//! | Error | [`tree::ErrorMessage`] | Any entry aborts the job |
//!
//! # Repository States
//!
//! | State | Jobs | Leaves by |
//! |-------|------|-----------|
//! | healthy | processed in submission order | integrity error, stop |
//! | broken | refused with `REPOSITORY_BROKEN` | rebuild |
//! | stopped | refused with `WORKER_STOPPED` | never |

#![deny(missing_docs)]

/// Configuration loaded from environment variables.
pub mod config;

/// Error taxonomy with stable error codes.
pub mod error;

/// Domain types: objects, properties, checks, jobs, configuration states.
pub mod model;

/// Persistence trait with PostgreSQL and in-memory backends.
pub mod persistence;

/// Worker registry and job routing.
pub mod supervisor;

/// The in-memory configuration tree.
pub mod tree;

/// Repository workers.
pub mod worker;

pub use error::{CoreError, Result};
pub use supervisor::Supervisor;
