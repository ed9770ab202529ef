//! Crate-wide error aggregation for the demo CLI (spec §10 bootstrap),
//! mirroring the teacher's `main.rs`/`engine.rs` `#[from]` composition.

use thiserror::Error;

use crate::journal::JournalError;
use crate::router::RouterError;

/// Any error the CLI binary can surface.
#[derive(Debug, Error)]
pub enum Error {
    /// A journal append or replay failed.
    #[error(transparent)]
    Journal(#[from] JournalError),
    /// Routing a command to its entity failed.
    #[error(transparent)]
    Router(#[from] RouterError),
    /// The engine itself reported an error.
    #[error(transparent)]
    Engine(#[from] crate::engine::Error),
    /// A scenario file could not be read.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A scenario record was malformed CSV.
    #[error(transparent)]
    Csv(#[from] csv::Error),
}
