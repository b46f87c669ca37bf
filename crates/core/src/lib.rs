//! Domain types shared by every Imagine crate.
//!
//! - [`job`]: job status, the public [`job::JobSnapshot`] shape.
//! - [`job_events`]: push events emitted on job transitions.
//! - [`failure`]: why a job ended in `failed`.
//! - [`sanitize`]: redaction applied to failure reasons before storage.
//! - [`validation`]: submission constraints (prompt, steps).

pub mod error;
pub mod failure;
pub mod job;
pub mod job_events;
pub mod sanitize;
pub mod types;
pub mod validation;
