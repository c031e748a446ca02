//! Event filters
//!
//! Compiles the metadata and dimension maps of an [`crate::events::EventQuery`]
//! into a reusable matcher:
//!
//! - **Matcher**: exact and wildcard metadata patterns, numeric dimension
//!   comparisons
//! - **Pattern**: anchored wildcard translation, shared with select `LIKE`
//!
//! # Examples
//!
//! ```rust,ignore
//! use tierstore::query::EventMatcher;
//!
//! let matcher = EventMatcher::for_query(
//!     &EventQuery::range(0, 1_000).metadata("host", "~web-*").dimension("cpu", ">0.5"),
//! )?;
//! let hot: Vec<_> = events.into_iter().filter(|e| matcher.matches(e)).collect();
//! ```

mod error;
mod matcher;
pub(crate) mod pattern;

pub use error::{QueryError, QueryResult};
pub use matcher::{matches, Comparator, DimensionPredicate, EventMatcher, MetadataPredicate};
