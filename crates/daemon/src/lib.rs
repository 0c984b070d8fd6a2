// SPDX-License-Identifier: MIT

//! rst-daemon: process wiring, environment-variable configuration, and the
//! `Service` facade the (out-of-scope) HTTP edge would sit behind.

pub mod env;
pub mod service;

pub use service::{
    AutoCropRect, CreateJobRequest, NewUpload, Service, ServiceError, Settings, StatusReport,
};
