//! In-memory authoritative state, one store per entity family.
//!
//! Every store follows the same discipline: mutators validate, write through
//! the adapter first, and only then touch in-memory state; readers are cheap
//! handles returning defensive copies; hydration is additive (an entity
//! already in memory is never overwritten by the adapter's copy).

pub mod completions;
pub mod constraints;
pub mod exceptions;
pub mod series;

pub use completions::{CompletionReader, CompletionTracker};
pub use constraints::{ConstraintReader, ConstraintStore};
pub use exceptions::{ExceptionReader, ExceptionStore};
pub use series::{SeriesReader, SeriesStore};
