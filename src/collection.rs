//! Collection handles that open find and aggregate cursors.

use crate::aggregate_cursor::{AggregateCursor, AggregatePipeline};
use crate::cursor::{Cursor, CursorOptions};
use crate::find_cursor::{FindCursor, FindQuery};
use crate::transport::CommandTransport;
use bson::{Bson, Document};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Options for find operations.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Maximum number of documents to return.
    pub limit: Option<i64>,
    /// Number of documents to skip.
    pub skip: Option<i64>,
    /// Sort order.
    pub sort: Option<Document>,
    /// Projection (fields to include/exclude).
    pub projection: Option<Document>,
    /// Batch size for cursor.
    pub batch_size: Option<u32>,
    /// Server-side time limit in milliseconds.
    pub max_time_ms: Option<i64>,
    /// Comment attached to the command.
    pub comment: Option<String>,
}

impl FindOptions {
    /// Start building find options.
    pub fn builder() -> FindOptionsBuilder {
        FindOptionsBuilder::default()
    }
}

impl From<FindOptions> for CursorOptions {
    fn from(options: FindOptions) -> Self {
        CursorOptions {
            batch_size: options.batch_size,
            limit: options.limit,
            skip: options.skip,
            sort: options.sort.map(Bson::Document),
            projection: options.projection,
            max_time_ms: options.max_time_ms,
            comment: options.comment,
            ..CursorOptions::default()
        }
    }
}

/// Builder for FindOptions.
#[derive(Debug, Clone, Default)]
pub struct FindOptionsBuilder {
    options: FindOptions,
}

impl FindOptionsBuilder {
    /// Set the limit.
    pub fn limit(mut self, limit: i64) -> Self {
        self.options.limit = Some(limit);
        self
    }

    /// Set the skip.
    pub fn skip(mut self, skip: i64) -> Self {
        self.options.skip = Some(skip);
        self
    }

    /// Set the sort order.
    pub fn sort(mut self, sort: Document) -> Self {
        self.options.sort = Some(sort);
        self
    }

    /// Set the projection.
    pub fn projection(mut self, projection: Document) -> Self {
        self.options.projection = Some(projection);
        self
    }

    /// Set the batch size.
    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.options.batch_size = Some(batch_size);
        self
    }

    /// Set the server-side time limit.
    pub fn max_time_ms(mut self, max_time_ms: i64) -> Self {
        self.options.max_time_ms = Some(max_time_ms);
        self
    }

    /// Set the comment.
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.options.comment = Some(comment.into());
        self
    }

    /// Build the options.
    pub fn build(self) -> FindOptions {
        self.options
    }
}

/// Options for aggregate operations.
#[derive(Debug, Clone, Default)]
pub struct AggregateOptions {
    /// Batch size for cursor.
    pub batch_size: Option<u32>,
    /// Allow stages to write temporary files.
    pub allow_disk_use: Option<bool>,
    /// Server-side time limit in milliseconds.
    pub max_time_ms: Option<i64>,
    /// Comment attached to the command.
    pub comment: Option<String>,
}

impl AggregateOptions {
    /// Create a builder.
    pub fn builder() -> AggregateOptionsBuilder {
        AggregateOptionsBuilder::default()
    }
}

impl From<AggregateOptions> for CursorOptions {
    fn from(options: AggregateOptions) -> Self {
        CursorOptions {
            batch_size: options.batch_size,
            allow_disk_use: options.allow_disk_use,
            max_time_ms: options.max_time_ms,
            comment: options.comment,
            ..CursorOptions::default()
        }
    }
}

/// Builder for AggregateOptions.
#[derive(Debug, Clone, Default)]
pub struct AggregateOptionsBuilder {
    options: AggregateOptions,
}

impl AggregateOptionsBuilder {
    /// Set the batch size.
    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.options.batch_size = Some(batch_size);
        self
    }

    /// Allow or forbid temporary files.
    pub fn allow_disk_use(mut self, allow: bool) -> Self {
        self.options.allow_disk_use = Some(allow);
        self
    }

    /// Set the server-side time limit.
    pub fn max_time_ms(mut self, max_time_ms: i64) -> Self {
        self.options.max_time_ms = Some(max_time_ms);
        self
    }

    /// Set the comment.
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.options.comment = Some(comment.into());
        self
    }

    /// Build the options.
    pub fn build(self) -> AggregateOptions {
        self.options
    }
}

/// A handle to a collection behind the proxy.
///
/// # Type Parameters
///
/// * `T` - The type cursors deserialize documents into.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Deserialize)]
/// struct Order {
///     sku: String,
///     total: f64,
/// }
///
/// let orders = client.collection::<Order>("orders");
/// let mut cursor = orders.find(doc! { "status": "shipped" });
/// cursor.limit(10)?;
/// let shipped: Vec<Order> = cursor.to_vec().await?;
/// ```
pub struct Collection<T> {
    /// Collection name.
    pub(crate) name: String,
    /// Command transport.
    pub(crate) transport: Arc<dyn CommandTransport>,
    /// Type marker.
    _marker: PhantomData<fn() -> T>,
}

impl<T> Collection<T> {
    /// Create a new collection handle.
    pub(crate) fn new(name: String, transport: Arc<dyn CommandTransport>) -> Self {
        Self {
            name,
            transport,
            _marker: PhantomData,
        }
    }

    /// Get the collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Clone this collection with a new type parameter.
    pub fn clone_with_type<U>(&self) -> Collection<U> {
        Collection::new(self.name.clone(), self.transport.clone())
    }

    /// Open a cursor over documents matching `filter`.
    ///
    /// No request is made until the cursor is pulled.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut cursor = collection.find(doc! { "status": "active" });
    /// cursor.sort("created", Some(-1))?.limit(20)?;
    /// let docs = cursor.to_vec().await?;
    /// ```
    pub fn find(&self, filter: impl Into<Option<Document>>) -> FindCursor<T> {
        self.find_with_options(filter, None)
    }

    /// Open a find cursor with options.
    pub fn find_with_options(
        &self,
        filter: impl Into<Option<Document>>,
        options: impl Into<Option<FindOptions>>,
    ) -> FindCursor<T> {
        let query = FindQuery::new(filter.into().unwrap_or_default());
        let options = options.into().unwrap_or_default();
        Cursor::new(query, self.name.clone(), self.transport.clone()).with_options(options.into())
    }

    /// Open a cursor over an aggregation pipeline.
    ///
    /// More stages can be appended with the cursor's stage methods before it
    /// is pulled.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut cursor = collection.aggregate(vec![doc! { "$match": { "status": "A" } }]);
    /// cursor.group(doc! { "_id": "$cust_id", "total": { "$sum": "$amount" } })?;
    /// let totals = cursor.to_vec().await?;
    /// ```
    pub fn aggregate(&self, pipeline: impl IntoIterator<Item = Document>) -> AggregateCursor<T> {
        self.aggregate_with_options(pipeline, None)
    }

    /// Open an aggregate cursor with options.
    pub fn aggregate_with_options(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<AggregateOptions>>,
    ) -> AggregateCursor<T> {
        let source = AggregatePipeline::new(pipeline);
        let options = options.into().unwrap_or_default();
        Cursor::new(source, self.name.clone(), self.transport.clone()).with_options(options.into())
    }
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            transport: self.transport.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection").field("name", &self.name).finish_non_exhaustive()
    }
}
