//! Bot runs: admission, execution and record keeping.
//!
//! ## Overview
//!
//! A *job* describes a recurring code-modification task against a project's
//! repository. Spawning a job admits one *run*, which clones the repository
//! into a private workspace, branches, lets a strategy rewrite files with
//! the help of a text generator, then commits and pushes the branch. Every
//! step is logged to SQLite and mirrored as events for live subscribers.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │  / CLI   │ <─────── │    ├─ api.rs  (route handlers, ApiError)         │
//! └──────────┘ WebSocket│    └─ ws.rs   (topic subscriptions)              │
//!                       │         │                                        │
//!                       │         │ Orchestrator::spawn / stop             │
//!                       │         v                                        │
//!                       │  orchestrator.rs  (registry, supervisor)         │
//!                       │         │                                        │
//!                       │         │ pipeline::execute()                    │
//!                       │         v                                        │
//!                       │  pipeline.rs  (stage machine, timeouts)          │
//!                       │    ├─ workspace.rs   (run-<id> directories)      │
//!                       │    ├─ git.rs         (RepositoryClient, git2)    │
//!                       │    └─ strategies/    (Strategy enum)             │
//!                       │            └─ generator.rs (TextGenerator)       │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module     | Responsibility                                           |
//! |------------|----------------------------------------------------------|
//! | `models`   | Shared types: `Job`, `Run`, `LogEntry`, `ErrorKind`      |
//! | `db`       | SQLite access via `DbHandle` (thin `Arc<Mutex<_>>`)      |
//! | `records`  | `RunRecorder`: durable writes mirrored onto the bus      |
//! | `events`   | `EventBus`, topic matching, `Subscription`               |
//!
//! ## Run Lifecycle
//!
//! 1. `POST /api/jobs/{id}/runs` → `Orchestrator::spawn()` checks the
//!    registry (one run per job, global ceiling), creates the run record and
//!    reserves `run-<id>` under the workspace root.
//! 2. A supervisor task spawns `pipeline::execute()`, which walks
//!    `Initializing → Cloning → Branching → Transforming → Committing →
//!    Finalizing`, checking the cancellation token before every stage.
//! 3. Whatever the pipeline returns (or a panic), the supervisor releases the
//!    workspace, writes the terminal status once and frees the slot.
//! 4. `POST /api/jobs/{id}/stop` cancels the token and finalizes the run as
//!    cancelled immediately; the late pipeline result is discarded.

pub mod api;
pub mod db;
pub mod events;
pub mod generator;
pub mod git;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod records;
pub mod server;
pub mod strategies;
pub mod workspace;
pub mod ws;

#[cfg(test)]
pub(crate) mod test_support;
