//! # Registry Lookup
//!
//! Bulk registry-status lookups driven through a browser-automated form.
//! The target page sits behind an image/recaptcha challenge, so each lookup
//! navigates a real Chrome session to the form, fills the identifier, routes
//! the challenge through an external solving service, submits, and extracts
//! the registered name and status fields.
//!
//! A fixed pool of persistent browser sessions works through contiguous
//! shards of the de-duplicated input. A global semaphore bounds how many
//! lookups are in flight at once, a retry controller re-runs attempts that
//! failed on the challenge step, and a collector returns one result per
//! input position in input order regardless of which worker produced it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use registry_lookup::{
//!     ChromeSessionFactory, Metrics, RunConfig, Scheduler, SolverClient,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RunConfig::default();
//!     let factory =
//!         ChromeSessionFactory::new(config.browser.clone(), config.resources.clone());
//!     let solver = SolverClient::new(config.solver.clone());
//!     let scheduler = Scheduler::new(config, factory, solver, Arc::new(Metrics::new()))?;
//!
//!     let results = scheduler
//!         .run(vec!["800123456".into()], CancellationToken::new())
//!         .await;
//!     for result in results {
//!         println!("{}: {:?}", result.identifier, result.status);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! registry-lookup run --input identifiers.csv --output results.csv
//! registry-lookup single --identifier 800123456
//! ```

/// Run configuration, task and result types
pub mod config;

/// Error types and retry classification
pub mod error;

/// Browser session trait and Chrome implementation
pub mod session;

/// Challenge solving service client
pub mod solver;

/// Per-task retry controller
pub mod retry;

/// Worker pool, sharding and progress reporting
pub mod scheduler;

/// In-order result collection
pub mod collector;

/// CSV input and output
pub mod io;

/// Command-line interface implementation
pub mod cli;

/// Performance metrics collection
pub mod metrics;

#[cfg(test)]
mod tests;

pub use cli::*;
pub use collector::*;
pub use config::*;
pub use error::*;
pub use metrics::*;
pub use retry::*;
pub use scheduler::*;
pub use session::*;
pub use solver::*;
