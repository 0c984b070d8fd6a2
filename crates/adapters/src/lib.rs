// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Adapters for external I/O: the artifact filesystem and the worker
//! subprocess lifecycle.

pub mod artifact_store;
pub mod invoker;

pub use artifact_store::{sanitize_filename, ArtifactError, ArtifactStore, STAGE_OUTPUT_EXT};
pub use invoker::{InvokeError, ProcessInvoker, WorkerInvoker, MAX_CAPTURED_BYTES, WORKER_TIMEOUT};

#[cfg(any(test, feature = "test-support"))]
pub use invoker::fake::{FakeInvoker, Recorded, Scripted};
