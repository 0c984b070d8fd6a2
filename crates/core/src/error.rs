// SPDX-License-Identifier: MIT

//! Shared error taxonomy (spec.md §7). One variant per error kind; callers
//! map these onto whatever transport status codes the (out-of-scope) HTTP
//! edge wants.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not ready: {0}")]
    NotReady(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("worker failed: {0}")]
    WorkerFailed(String),

    #[error("worker timed out")]
    WorkerTimeout,

    #[error("worker output exceeded the capture limit")]
    WorkerOutputOverflow,

    #[error("no previous manual step to rewind to")]
    NoPreviousManualStep,

    #[error("illegal state transition: {0}")]
    IllegalStateTransition(String),
}
