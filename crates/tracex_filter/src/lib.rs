//! Trace tag selection rules.
//!
//! A [`TagFilter`] decides which methods receive trace markers, based on their
//! `"container#method"` tag and two lists of regular expressions.

#![warn(missing_docs)]

pub mod error;
pub mod filter;

pub use error::FilterError;
pub use filter::TagFilter;
