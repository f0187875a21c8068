//! Cursor over the results of a `find` command.

use crate::cursor::{CommandRequest, Cursor, CursorSource};
use crate::error::Result;
use bson::{doc, Bson, Document};

/// A `find` query: the filter document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    /// Document predicate.
    pub filter: Document,
}

impl FindQuery {
    /// Create a query for `filter`.
    pub fn new(filter: Document) -> Self {
        Self { filter }
    }
}

impl CursorSource for FindQuery {
    fn first_request(&self) -> CommandRequest {
        CommandRequest {
            command: "find",
            params: doc! { "filter": self.filter.clone() },
        }
    }
}

/// Cursor returned by [`Collection::find`](crate::collection::Collection::find).
pub type FindCursor<T = Document> = Cursor<FindQuery, T>;

impl<T> Cursor<FindQuery, T> {
    /// Replace the filter.
    pub fn filter(&mut self, filter: Document) -> Result<&mut Self> {
        self.source_mut()?.filter = filter;
        Ok(self)
    }

    /// Set the sort order.
    ///
    /// `sort` and `direction` are forwarded verbatim, so both
    /// `sort("age", Some(-1))` and `sort(doc! { "age": -1 }, None)` work.
    pub fn sort(&mut self, sort: impl Into<Bson>, direction: Option<i32>) -> Result<&mut Self> {
        let options = self.options_mut()?;
        options.sort = Some(sort.into());
        options.direction = direction;
        Ok(self)
    }

    /// Set the projection.
    pub fn project(&mut self, projection: Document) -> Result<&mut Self> {
        self.options_mut()?.projection = Some(projection);
        Ok(self)
    }

    /// Set the maximum number of documents to return.
    pub fn limit(&mut self, limit: i64) -> Result<&mut Self> {
        self.options_mut()?.limit = Some(limit);
        Ok(self)
    }

    /// Set the number of documents to skip.
    pub fn skip(&mut self, skip: i64) -> Result<&mut Self> {
        self.options_mut()?.skip = Some(skip);
        Ok(self)
    }
}
