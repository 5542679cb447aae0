#![doc = "echoes-backup-core: core pipeline library for echoes-backup."]

//! This crate contains the whole backup pipeline: the per-file, per-stage ledger,
//! the stage handlers (compress, upload, report merge), the orchestrator drivers
//! and the daily scheduler.
//! Network transports (SFTP, Slack, mail) are not included here; they are
//! plugged in through the traits in [`contract`].
//!
//! # Usage
//! Add this as a dependency for all shared pipeline, ledger, archive and config code.

pub mod archiver;
pub mod config;
pub mod contract;
pub mod dates;
pub mod error;
pub mod ledger;
pub mod notify;
pub mod report;
pub mod scheduler;
pub mod stages;
pub mod statistics;
pub mod synchronise;
