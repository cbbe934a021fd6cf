//! # Planner Core Library
//!
//! The schedule engine behind the auto-planner: recurring series with rich
//! expansion rules, cross-series dependencies, per-instance exceptions, and
//! a per-day constraint-satisfaction pass that materializes a conflict-aware
//! schedule over any date window.
//!
//! ## Features
//!
//! - **Pattern Expansion**: daily, every-N-days, weekly, monthly, and yearly
//!   rules expanded deterministically over half-open windows
//! - **Condition Trees**: boolean gates over completion statistics and
//!   weekdays, evaluated per date
//! - **Chains**: parent→child links positioned from actual completion end
//!   times when available
//! - **Reflow**: a deterministic best-effort day solver that keeps flexible
//!   items inside waking hours without overlap
//! - **Conflict Detection**: fixed overlaps, ordering, adjacency (with tag
//!   resolution), and chain-bound violations
//! - **Layered Caching**: pattern dates, schedule results gated by a
//!   generation counter, and content-addressed solver results
//! - **Reminders**: per-instance firing times with per-date acknowledgement
//!
//! ## Core Modules
//!
//! - [`time`]: temporal primitives and DST-aware local resolution
//! - [`models`]: entities and transfer objects
//! - [`expansion`]: pattern → date-set expansion
//! - [`condition`]: condition evaluation and the reverse dependency index
//! - [`chain`]: link management and parent end-time resolution
//! - [`store`]: in-memory authoritative state with adapter write-through
//! - [`solver`]: the per-day placement solver
//! - [`engine`]: the schedule build pipeline and its caches
//! - [`reminder`]: pending reminder computation
//! - [`adapter`]: the persistence contract plus memory and SQLite backends
//! - [`planner`]: the public orchestrator
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use planner_core::adapter::memory::MemoryAdapter;
//! use planner_core::models::{NewSeriesData, Pattern, PatternRule};
//! use planner_core::planner::Planner;
//! use planner_core::time::parse_date;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let planner = Planner::new(Arc::new(MemoryAdapter::new()), "America/New_York")?;
//!     planner.hydrate().await?;
//!
//!     let series = planner
//!         .create_series(NewSeriesData {
//!             title: "Morning run".to_string(),
//!             patterns: vec![Pattern::new(PatternRule::Daily)],
//!             ..Default::default()
//!         })
//!         .await?;
//!
//!     let schedule =
//!         planner.get_schedule(parse_date("2025-06-01")?, parse_date("2025-06-08")?)?;
//!     println!("{} instances for {}", schedule.instances.len(), series.title);
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod chain;
pub mod condition;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod expansion;
pub mod models;
pub mod planner;
pub mod reminder;
pub mod solver;
pub mod store;
pub mod time;
