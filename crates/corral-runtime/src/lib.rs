//! The Corral re-exec pipeline.
//!
//! A container is a chain of processes produced by re-executing the running
//! binary: the [`launcher`] on the host starts the [`init`] stage as PID 1 of
//! fresh namespaces, which starts the [`workload`] stage that finishes
//! isolation and runs the user's command. Each supervising stage owns a
//! [`relay::SignalRelay`] forwarding termination signals one layer down.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod init;
pub mod launcher;
pub mod process;
pub mod relay;
pub mod stage;
pub mod workload;
