//! Source trait for fetching datasets from an external provider.
//!
//! The provider is opaque: it answers "rows of dataset X between two dates"
//! with a polars [`DataFrame`]. Normalizing that frame against the declared
//! schema is the loader's job, see [`Dataset::from_frame`](crate::Dataset::from_frame).

use async_trait::async_trait;
use chrono::NaiveDate;
use polars::prelude::DataFrame;
use std::fmt::Debug;

use crate::error::Result;

/// An external data provider.
///
/// Errors returned by [`fetch`](DataSource::fetch) should be of the
/// source-failure class (see [`DeskError::is_source_failure`](crate::DeskError::is_source_failure))
/// so the loader can fall back to cached data.
#[async_trait]
pub trait DataSource: Send + Sync + Debug {
    /// Returns the name of this provider.
    fn name(&self) -> &str;

    /// Version tag the provider attaches to its data, if it has one.
    fn source_version(&self) -> Option<String> {
        None
    }

    /// Fetches the rows of `dataset` dated within `[start, end]`.
    ///
    /// Returns a frame with `symbol` and `date` columns followed by value
    /// columns. An empty frame means the provider has no rows in the range.
    async fn fetch(&self, dataset: &str, start: NaiveDate, end: NaiveDate) -> Result<DataFrame>;
}
