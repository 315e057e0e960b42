//! # `relatedness-server`: HTTP boundary and worker for the relatedness store
//!
//! Two binaries share the configuration and logging set up here:
//!
//! - `relatedness-server` exposes the lease queue, the batch and the
//!   distance store over HTTP under `/api/relatedness/{species}/db/...`.
//! - `relatedness-worker` runs one sample, or the whole batch, through the
//!   [`relatedness::Coordinator`] against an external comparator program.
//!
//! Both open the same SQLite file. That file is the only thing they share.
//!
//! ## Usage
//!
//! ```bash
//! DB_PATH=/data/relatedness.db cargo run --bin relatedness-server --release
//! ```
//!
//! ```bash
//! relatedness-worker --species tb --comparator ./fast-snp \
//!     --guid sample-1 --path sample-1.fasta --reference h37rv.fasta
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Store and queue settings shared by both binaries.
//! - [`telemetry`] - `tracing-subscriber` initialization.
//! - [`server`] - axum routes and server configuration.
//! - [`worker`] - Worker configuration and the single-run entry point.

pub mod config;
pub mod server;
pub mod telemetry;
pub mod worker;
