//! Server-side cursor pagination.
//!
//! A [`Cursor`] starts unstarted and makes no request until it is first
//! pulled. The first pull sends the request described by its
//! [`CursorSource`], buffers the first batch and remembers the cursor id.
//! Later pulls drain the buffer and issue `getMore` commands until the server
//! answers with a zero id.
//!
//! Every pull takes `&mut self`, so a cursor can never have two requests in
//! flight at once.

use crate::error::{MongoError, Result};
use crate::transport::{collection_path, CommandTransport};
use bson::{doc, Bson, Document};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::debug;

const FIRST_BATCH: &str = "firstBatch";
const NEXT_BATCH: &str = "nextBatch";
const GET_MORE: &str = "getMore";

/// Composed document transform installed with [`Cursor::map`].
type Transform = Box<dyn Fn(Document) -> Document + Send + Sync>;

/// Opaque server cursor id.
///
/// The id is kept exactly as the server sent it (usually an int64) and echoed
/// back verbatim in `getMore` commands.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorId(Bson);

impl CursorId {
    /// Wrap a decoded id.
    pub fn new(value: Bson) -> Self {
        CursorId(value)
    }

    /// The id of a cursor with no server-side batches left.
    pub fn zero() -> Self {
        CursorId(Bson::Int64(0))
    }

    /// Whether the server has no more batches for this cursor.
    pub fn is_zero(&self) -> bool {
        match self.0 {
            Bson::Int32(v) => v == 0,
            Bson::Int64(v) => v == 0,
            Bson::Double(v) => v == 0.0,
            Bson::Null => true,
            _ => false,
        }
    }

    /// Get the raw id value.
    pub fn as_bson(&self) -> &Bson {
        &self.0
    }
}

impl fmt::Display for CursorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Options sent with the first request of a cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CursorOptions {
    /// Number of documents per server batch.
    pub batch_size: Option<u32>,
    /// Maximum number of documents to return.
    pub limit: Option<i64>,
    /// Number of documents to skip.
    pub skip: Option<i64>,
    /// Sort specification, sent verbatim.
    pub sort: Option<Bson>,
    /// Sort direction, sent verbatim next to `sort`.
    pub direction: Option<i32>,
    /// Projection (fields to include/exclude).
    pub projection: Option<Document>,
    /// Server-side time limit in milliseconds.
    pub max_time_ms: Option<i64>,
    /// Comment attached to the command.
    pub comment: Option<String>,
    /// Allow aggregation stages to write temporary files.
    pub allow_disk_use: Option<bool>,
    /// Return the query plan instead of results.
    pub explain: bool,
}

impl CursorOptions {
    /// Render the options as the `options` document of a command.
    pub fn to_document(&self) -> Document {
        let mut opts = Document::new();
        if let Some(batch_size) = self.batch_size {
            opts.insert("batchSize", int_bson(i64::from(batch_size)));
        }
        if let Some(limit) = self.limit {
            opts.insert("limit", int_bson(limit));
        }
        if let Some(skip) = self.skip {
            opts.insert("skip", int_bson(skip));
        }
        if let Some(ref sort) = self.sort {
            opts.insert("sort", sort.clone());
        }
        if let Some(direction) = self.direction {
            opts.insert("direction", direction);
        }
        if let Some(ref projection) = self.projection {
            opts.insert("projection", projection.clone());
        }
        if let Some(max_time_ms) = self.max_time_ms {
            opts.insert("maxTimeMS", int_bson(max_time_ms));
        }
        if let Some(ref comment) = self.comment {
            opts.insert("comment", comment.clone());
        }
        if let Some(allow_disk_use) = self.allow_disk_use {
            opts.insert("allowDiskUse", allow_disk_use);
        }
        if self.explain {
            opts.insert("explain", true);
        }
        opts
    }
}

/// Small integers go out as int32 so the proxy sees plain numbers.
fn int_bson(v: i64) -> Bson {
    match i32::try_from(v) {
        Ok(small) => Bson::Int32(small),
        Err(_) => Bson::Int64(v),
    }
}

/// The command that opens a cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    /// Collection command name, e.g. `find`.
    pub command: &'static str,
    /// Command parameters; the cursor adds its `options` document.
    pub params: Document,
}

/// The query a cursor was opened for.
///
/// Implemented by [`FindQuery`](crate::find_cursor::FindQuery) and
/// [`AggregatePipeline`](crate::aggregate_cursor::AggregatePipeline).
pub trait CursorSource: Send + Sync {
    /// Describe the request that opens the cursor on the server.
    fn first_request(&self) -> CommandRequest;
}

/// Internal cursor state.
#[derive(Debug, Default)]
pub(crate) struct CursorState {
    /// Cursor ID from the server, set once by the first request.
    pub id: Option<CursorId>,
    /// Buffered documents not yet delivered.
    pub buffer: VecDeque<Document>,
    /// Whether the first request has completed.
    pub initialized: bool,
    /// Whether the server has no more batches.
    pub closed: bool,
}

/// The `cursor` part of a find/aggregate/getMore reply.
struct CursorReply {
    id: CursorId,
    batch: VecDeque<Document>,
}

impl CursorReply {
    fn parse(data: Bson, batch_field: &str) -> Result<Self> {
        let mut reply = match data {
            Bson::Document(doc) => doc,
            other => {
                return Err(MongoError::protocol(format!(
                    "expected a cursor reply, found {:?}",
                    other.element_type()
                )))
            }
        };
        let mut cursor = match reply.remove("cursor") {
            Some(Bson::Document(cursor)) => cursor,
            _ => return Err(MongoError::protocol("reply has no cursor document")),
        };
        let id = cursor
            .remove("id")
            .map(CursorId::new)
            .ok_or_else(|| MongoError::protocol("cursor reply has no id"))?;
        let batch = match cursor.remove(batch_field) {
            Some(Bson::Array(docs)) => docs
                .into_iter()
                .map(|item| match item {
                    Bson::Document(doc) => Ok(doc),
                    other => Err(MongoError::protocol(format!(
                        "{} holds a non-document {:?}",
                        batch_field,
                        other.element_type()
                    ))),
                })
                .collect::<Result<VecDeque<_>>>()?,
            _ => {
                return Err(MongoError::protocol(format!(
                    "cursor reply has no {} array",
                    batch_field
                )))
            }
        };
        Ok(Self { id, batch })
    }
}

/// A lazily opened server-side cursor.
///
/// `S` describes the query and `T` is the type every delivered document is
/// deserialized into.
///
/// A cursor is meant for a single caller. Pulls borrow it mutably, and
/// [`stream`](Cursor::stream) consumes it.
///
/// # Example
///
/// ```ignore
/// let mut cursor = users.find(doc! { "status": "active" });
/// cursor.sort(doc! { "name": 1 }, None)?.limit(10)?;
/// while let Some(user) = cursor.next().await? {
///     println!("{:?}", user);
/// }
/// ```
pub struct Cursor<S, T = Document> {
    source: S,
    collection: String,
    transport: Arc<dyn CommandTransport>,
    options: CursorOptions,
    state: CursorState,
    transform: Option<Transform>,
    _marker: PhantomData<fn() -> T>,
}

impl<S: CursorSource, T> Cursor<S, T> {
    /// Create an unstarted cursor over `collection`.
    pub fn new(source: S, collection: impl Into<String>, transport: Arc<dyn CommandTransport>) -> Self {
        Self {
            source,
            collection: collection.into(),
            transport,
            options: CursorOptions::default(),
            state: CursorState::default(),
            transform: None,
            _marker: PhantomData,
        }
    }

    /// Replace the options of a cursor that has not been started.
    pub fn with_options(mut self, options: CursorOptions) -> Self {
        self.options = options;
        self
    }

    /// Get the collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Get the query this cursor was created for.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Get the current options.
    pub fn options(&self) -> &CursorOptions {
        &self.options
    }

    /// Get the server cursor id, once the cursor has been opened.
    pub fn id(&self) -> Option<&CursorId> {
        self.state.id.as_ref()
    }

    /// Whether the first request has been made.
    pub fn is_initialized(&self) -> bool {
        self.state.initialized
    }

    /// Whether the server has no more batches. Buffered documents may remain.
    pub fn is_closed(&self) -> bool {
        self.state.closed
    }

    /// Whether every document has been delivered.
    pub fn is_exhausted(&self) -> bool {
        self.state.closed && self.state.buffer.is_empty()
    }

    /// Number of documents buffered and not yet delivered.
    pub fn buffered(&self) -> usize {
        self.state.buffer.len()
    }

    /// Set the number of documents per server batch.
    pub fn batch_size(&mut self, batch_size: u32) -> Result<&mut Self> {
        self.options_mut()?.batch_size = Some(batch_size);
        Ok(self)
    }

    /// Set a server-side time limit.
    pub fn max_time_ms(&mut self, max_time_ms: i64) -> Result<&mut Self> {
        self.options_mut()?.max_time_ms = Some(max_time_ms);
        Ok(self)
    }

    /// Attach a comment to the command.
    pub fn comment(&mut self, comment: impl Into<String>) -> Result<&mut Self> {
        self.options_mut()?.comment = Some(comment.into());
        Ok(self)
    }

    /// Add a transform applied to every document before it is delivered.
    ///
    /// Transforms compose in call order: `map(f)` then `map(g)` delivers
    /// `g(f(doc))`.
    pub fn map<F>(&mut self, f: F) -> Result<&mut Self>
    where
        F: Fn(Document) -> Document + Send + Sync + 'static,
    {
        self.ensure_mutable()?;
        let transform: Transform = match self.transform.take() {
            Some(previous) => Box::new(move |doc| f(previous(doc))),
            None => Box::new(f),
        };
        self.transform = Some(transform);
        Ok(self)
    }

    /// Abandon the cursor locally.
    ///
    /// No command is sent; the server reaps its cursor on timeout.
    pub fn close(&mut self) {
        debug!(collection = %self.collection, "closing cursor");
        self.state.initialized = true;
        self.state.closed = true;
        self.state.buffer.clear();
    }

    pub(crate) fn ensure_mutable(&self) -> Result<()> {
        if self.state.initialized {
            return Err(MongoError::CursorInitialized);
        }
        Ok(())
    }

    pub(crate) fn options_mut(&mut self) -> Result<&mut CursorOptions> {
        self.ensure_mutable()?;
        Ok(&mut self.options)
    }

    pub(crate) fn source_mut(&mut self) -> Result<&mut S> {
        self.ensure_mutable()?;
        Ok(&mut self.source)
    }

    async fn run(&self, request: CommandRequest) -> Result<Bson> {
        let path = collection_path(&self.collection, request.command);
        self.transport
            .send_command(&path, request.params, Some(self.options.to_document()))
            .await
    }

    async fn initialize(&mut self) -> Result<()> {
        let request = self.source.first_request();
        debug!(collection = %self.collection, command = request.command, "opening cursor");

        let data = self.run(request).await?;
        let reply = CursorReply::parse(data, FIRST_BATCH)?;

        self.state.closed = reply.id.is_zero();
        self.state.id = Some(reply.id);
        self.state.buffer = reply.batch;
        self.state.initialized = true;
        Ok(())
    }

    async fn get_more(&mut self) -> Result<()> {
        let id = match self.state.id {
            Some(ref id) => id.as_bson().clone(),
            None => return Err(MongoError::protocol("getMore on a cursor without an id")),
        };
        debug!(collection = %self.collection, cursor_id = %id, "fetching next batch");

        let path = collection_path(&self.collection, GET_MORE);
        let data = self
            .transport
            .send_command(&path, doc! { "cursorId": id }, None)
            .await?;
        let reply = CursorReply::parse(data, NEXT_BATCH)?;

        self.state.closed = reply.id.is_zero();
        self.state.buffer = reply.batch;
        Ok(())
    }
}

impl<S: CursorSource, T: DeserializeOwned> Cursor<S, T> {
    /// Check whether another document is available, fetching if needed.
    pub async fn has_next(&mut self) -> Result<bool> {
        if !self.state.initialized {
            self.initialize().await?;
        }
        while self.state.buffer.is_empty() && !self.state.closed {
            self.get_more().await?;
        }
        Ok(!self.state.buffer.is_empty())
    }

    /// Get the next document, or `None` once the cursor is exhausted.
    pub async fn next(&mut self) -> Result<Option<T>> {
        if !self.has_next().await? {
            return Ok(None);
        }
        match self.state.buffer.pop_front() {
            Some(doc) => self.deliver(doc).map(Some),
            None => Ok(None),
        }
    }

    /// Drain the cursor into a vector.
    ///
    /// On error nothing is returned and the cursor keeps the state it reached.
    pub async fn to_vec(&mut self) -> Result<Vec<T>> {
        let mut results = Vec::with_capacity(self.state.buffer.len());
        while let Some(doc) = self.next().await? {
            results.push(doc);
        }
        Ok(results)
    }

    /// Run the query in explain mode and return the plan.
    ///
    /// The cursor is closed afterwards and yields no documents.
    pub async fn explain(&mut self) -> Result<Bson> {
        let previous = std::mem::replace(&mut self.options.explain, true);
        let request = self.source.first_request();
        debug!(collection = %self.collection, command = request.command, "explaining");

        let plan = match self.run(request).await {
            Ok(plan) => plan,
            Err(err) => {
                self.options.explain = previous;
                return Err(err);
            }
        };

        self.state = CursorState {
            id: Some(CursorId::zero()),
            buffer: VecDeque::new(),
            initialized: true,
            closed: true,
        };
        Ok(plan)
    }

    /// Iterate the remaining documents without consuming the cursor.
    ///
    /// The iteration is single pass: once it has ended, iterating again yields
    /// nothing.
    pub fn iter(&mut self) -> BoxStream<'_, Result<T>>
    where
        T: Send,
    {
        stream::try_unfold(self, |cursor| async move {
            cursor
                .next()
                .await
                .map(|next| next.map(|doc| (doc, cursor)))
        })
        .boxed()
    }

    fn deliver(&self, doc: Document) -> Result<T> {
        let doc = match self.transform {
            Some(ref transform) => transform(doc),
            None => doc,
        };
        bson::from_document(doc).map_err(|e| MongoError::Deserialization(e.to_string()))
    }
}

impl<S, T> Cursor<S, T>
where
    S: CursorSource + 'static,
    T: DeserializeOwned + Send + 'static,
{
    /// Turn the cursor into a [`Stream`] of documents.
    pub fn stream(self) -> CursorStream<T> {
        self.stream_with(Ok)
    }

    /// Turn the cursor into a [`Stream`], passing each document through
    /// `transform`.
    ///
    /// An error from the cursor or from `transform` is yielded once and ends
    /// the stream. Dropping the stream abandons the cursor without further
    /// requests.
    pub fn stream_with<U, F>(self, transform: F) -> CursorStream<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> Result<U> + Send + 'static,
    {
        let inner = stream::unfold(Some((self, transform)), |state| async move {
            let (mut cursor, mut transform) = match state {
                Some(state) => state,
                None => return None,
            };
            let item = match cursor.next().await {
                Ok(Some(doc)) => transform(doc),
                Ok(None) => return None,
                Err(err) => Err(err),
            };
            match item {
                Ok(chunk) => Some((Ok(chunk), Some((cursor, transform)))),
                Err(err) => {
                    debug!(collection = %cursor.collection, error = %err, "cursor stream failed");
                    Some((Err(err), None))
                }
            }
        });
        CursorStream {
            inner: inner.boxed(),
        }
    }
}

impl<S: fmt::Debug, T> fmt::Debug for Cursor<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("collection", &self.collection)
            .field("source", &self.source)
            .field("options", &self.options)
            .field("state", &self.state)
            .field("has_transform", &self.transform.is_some())
            .finish()
    }
}

/// Push-style view over a cursor, created by [`Cursor::stream`].
///
/// Documents are pulled one at a time; the next request is only made when
/// the consumer polls for more.
pub struct CursorStream<U> {
    inner: BoxStream<'static, Result<U>>,
}

impl<U> Stream for CursorStream<U> {
    type Item = Result<U>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl<U> fmt::Debug for CursorStream<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorStream").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use futures::TryStreamExt;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq)]
    struct TestSource;

    impl CursorSource for TestSource {
        fn first_request(&self) -> CommandRequest {
            CommandRequest {
                command: "find",
                params: doc! { "filter": {} },
            }
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        n: i32,
    }

    fn first(id: i64, docs: Vec<Document>) -> Bson {
        Bson::Document(doc! { "cursor": { "id": id, "firstBatch": docs } })
    }

    fn more(id: i64, docs: Vec<Document>) -> Bson {
        Bson::Document(doc! { "cursor": { "id": id, "nextBatch": docs } })
    }

    fn docs(range: std::ops::RangeInclusive<i32>) -> Vec<Document> {
        range.map(|n| doc! { "n": n }).collect()
    }

    fn cursor_over(transport: &Arc<MockTransport>) -> Cursor<TestSource> {
        Cursor::new(TestSource, "items", transport.clone())
    }

    #[tokio::test]
    async fn test_no_request_until_first_pull() {
        let transport = Arc::new(MockTransport::new().reply(first(0, docs(1..=1))));
        let mut cursor = cursor_over(&transport);
        cursor.batch_size(10).unwrap();
        cursor.map(|doc| doc).unwrap();

        assert_eq!(transport.call_count(), 0);
        assert!(!cursor.is_initialized());
        assert!(cursor.id().is_none());

        assert!(cursor.has_next().await.unwrap());
        assert_eq!(transport.call_count(), 1);
        assert!(cursor.is_initialized());
    }

    #[tokio::test]
    async fn test_first_request_shape() {
        let transport = Arc::new(MockTransport::new().reply(first(0, vec![])));
        let mut cursor = cursor_over(&transport);
        cursor.batch_size(2).unwrap().comment("audit").unwrap();
        cursor.has_next().await.unwrap();

        let calls = transport.calls();
        assert_eq!(calls[0].path, "/v1/collection/items/find");
        assert_eq!(
            calls[0].body,
            doc! { "filter": {}, "options": { "batchSize": 2, "comment": "audit" } }
        );
    }

    #[tokio::test]
    async fn test_to_vec_spans_batches() {
        let transport = Arc::new(
            MockTransport::new()
                .reply(first(42, docs(1..=3)))
                .reply(more(0, docs(4..=6))),
        );
        let mut cursor = cursor_over(&transport);

        let all = cursor.to_vec().await.unwrap();
        assert_eq!(all, docs(1..=6));

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].path, "/v1/collection/items/getMore");
        assert_eq!(calls[1].body, doc! { "cursorId": 42_i64 });
        assert!(cursor.is_exhausted());
    }

    #[tokio::test]
    async fn test_zero_id_closes_on_first_batch() {
        let transport = Arc::new(MockTransport::new().reply(first(0, docs(1..=2))));
        let mut cursor = cursor_over(&transport);

        assert!(cursor.has_next().await.unwrap());
        assert!(cursor.is_closed());
        assert!(!cursor.is_exhausted());
        assert_eq!(cursor.buffered(), 2);

        assert_eq!(cursor.next().await.unwrap(), Some(doc! { "n": 1 }));
        assert_eq!(cursor.next().await.unwrap(), Some(doc! { "n": 2 }));
        assert_eq!(cursor.next().await.unwrap(), None);
        assert!(!cursor.has_next().await.unwrap());
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_keeps_fetching() {
        let transport = Arc::new(
            MockTransport::new()
                .reply(first(5, vec![]))
                .reply(more(5, docs(1..=1)))
                .reply(more(0, vec![])),
        );
        let mut cursor = cursor_over(&transport);

        assert_eq!(cursor.to_vec().await.unwrap(), docs(1..=1));
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn test_id_is_assigned_once() {
        let transport = Arc::new(
            MockTransport::new()
                .reply(first(7, docs(1..=1)))
                .reply(more(0, docs(2..=2))),
        );
        let mut cursor = cursor_over(&transport);
        cursor.to_vec().await.unwrap();
        assert_eq!(cursor.id(), Some(&CursorId::new(Bson::Int64(7))));
    }

    #[tokio::test]
    async fn test_large_id_is_echoed_verbatim() {
        let transport = Arc::new(
            MockTransport::new()
                .reply_json(
                    r#"{"cursor": {"id": {"$numberLong": "9007199254740993"}, "firstBatch": []}}"#,
                )
                .reply_json(r#"{"cursor": {"id": {"$numberLong": "0"}, "nextBatch": [{"n": {"$numberInt": "1"}}]}}"#),
        );
        let mut cursor = cursor_over(&transport);

        assert_eq!(cursor.to_vec().await.unwrap(), docs(1..=1));
        assert_eq!(
            transport.calls()[1].body,
            doc! { "cursorId": 9_007_199_254_740_993_i64 }
        );
    }

    #[tokio::test]
    async fn test_builders_fail_after_init() {
        let transport = Arc::new(MockTransport::new().reply(first(0, vec![])));
        let mut cursor = cursor_over(&transport);
        cursor.has_next().await.unwrap();

        assert!(matches!(cursor.batch_size(5), Err(MongoError::CursorInitialized)));
        assert!(matches!(cursor.max_time_ms(5), Err(MongoError::CursorInitialized)));
        assert!(matches!(cursor.comment("x"), Err(MongoError::CursorInitialized)));
        assert!(matches!(cursor.map(|d| d), Err(MongoError::CursorInitialized)));
        assert_eq!(cursor.options(), &CursorOptions::default());
    }

    #[tokio::test]
    async fn test_map_composes_in_call_order() {
        let transport = Arc::new(MockTransport::new().reply(first(0, vec![doc! { "trail": "" }])));
        let mut cursor = cursor_over(&transport);
        let append = |suffix: &'static str| {
            move |mut doc: Document| {
                let trail = format!("{}{}", doc.get_str("trail").unwrap_or_default(), suffix);
                doc.insert("trail", trail);
                doc
            }
        };
        cursor.map(append("f")).unwrap().map(append("g")).unwrap();

        let doc = cursor.next().await.unwrap().unwrap();
        assert_eq!(doc.get_str("trail").unwrap(), "fg");
    }

    #[tokio::test]
    async fn test_explain_closes_cursor() {
        let transport = Arc::new(
            MockTransport::new().reply(Bson::Document(doc! { "queryPlanner": { "winningPlan": "COLLSCAN" } })),
        );
        let mut cursor = cursor_over(&transport);
        cursor.batch_size(3).unwrap();

        let plan = cursor.explain().await.unwrap();
        assert_eq!(
            plan,
            Bson::Document(doc! { "queryPlanner": { "winningPlan": "COLLSCAN" } })
        );
        assert_eq!(
            transport.calls()[0].body,
            doc! { "filter": {}, "options": { "batchSize": 3, "explain": true } }
        );

        assert!(!cursor.has_next().await.unwrap());
        assert_eq!(cursor.next().await.unwrap(), None);
        assert!(cursor.is_exhausted());
        assert!(cursor.id().unwrap().is_zero());
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_explain_failure_restores_flag() {
        let transport = Arc::new(MockTransport::new().fail(MongoError::command(500, "boom")));
        let mut cursor = cursor_over(&transport);

        assert!(cursor.explain().await.is_err());
        assert!(!cursor.options().explain);
        assert!(!cursor.is_initialized());
    }

    #[tokio::test]
    async fn test_first_request_error_propagates() {
        let transport = Arc::new(MockTransport::new().fail(MongoError::command(403, "forbidden")));
        let mut cursor = cursor_over(&transport);

        let err = cursor.has_next().await.unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert!(!cursor.is_initialized());
        // Still configurable after a failed open.
        assert!(cursor.batch_size(1).is_ok());
    }

    #[tokio::test]
    async fn test_to_vec_error_returns_no_partial_result() {
        let transport = Arc::new(
            MockTransport::new()
                .reply(first(9, docs(1..=2)))
                .fail(MongoError::command(500, "cursor killed")),
        );
        let mut cursor = cursor_over(&transport);

        let err = cursor.to_vec().await.unwrap_err();
        assert!(err.is_command_error());
        assert!(cursor.is_initialized());
        assert!(!cursor.is_closed());
    }

    #[tokio::test]
    async fn test_typed_documents() {
        let transport = Arc::new(MockTransport::new().reply(first(0, docs(1..=2))));
        let mut cursor: Cursor<TestSource, Item> = Cursor::new(TestSource, "items", transport.clone());

        let items = cursor.to_vec().await.unwrap();
        assert_eq!(items, vec![Item { n: 1 }, Item { n: 2 }]);
    }

    #[tokio::test]
    async fn test_deserialization_error() {
        let transport = Arc::new(MockTransport::new().reply(first(0, vec![doc! { "other": true }])));
        let mut cursor: Cursor<TestSource, Item> = Cursor::new(TestSource, "items", transport.clone());

        assert!(matches!(
            cursor.next().await,
            Err(MongoError::Deserialization(_))
        ));
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let transport = Arc::new(
            MockTransport::new()
                .reply(Bson::Document(doc! { "ok": 1 }))
                .reply(Bson::Document(doc! { "cursor": { "firstBatch": [] } }))
                .reply(Bson::Document(doc! { "cursor": { "id": 0, "nextBatch": [] } }))
                .reply(Bson::Document(doc! { "cursor": { "id": 0, "firstBatch": [1] } })),
        );
        for _ in 0..4 {
            let mut cursor = cursor_over(&transport);
            assert!(matches!(
                cursor.has_next().await,
                Err(MongoError::Protocol(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_close_abandons_without_request() {
        let transport = Arc::new(MockTransport::new().reply(first(3, docs(1..=2))));
        let mut cursor = cursor_over(&transport);
        cursor.has_next().await.unwrap();

        cursor.close();
        assert!(cursor.is_exhausted());
        assert!(!cursor.has_next().await.unwrap());
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_stream_yields_all_documents() {
        let transport = Arc::new(
            MockTransport::new()
                .reply(first(1, docs(1..=2)))
                .reply(more(0, docs(3..=3))),
        );
        let stream = cursor_over(&transport).stream();

        let all: Vec<Document> = stream.try_collect().await.unwrap();
        assert_eq!(all, docs(1..=3));
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn test_stream_transform_error_is_surfaced() {
        let transport = Arc::new(MockTransport::new().reply(first(0, docs(1..=3))));
        let mut stream = cursor_over(&transport).stream_with(|doc: Document| {
            if doc.get_i32("n").unwrap_or_default() == 2 {
                Err(MongoError::invalid_argument("n == 2"))
            } else {
                Ok(doc)
            }
        });

        assert_eq!(stream.next().await.unwrap().unwrap(), doc! { "n": 1 });
        assert!(matches!(
            stream.next().await,
            Some(Err(MongoError::InvalidArgument(_)))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_transport_error_ends_stream() {
        let transport = Arc::new(
            MockTransport::new()
                .reply(first(8, docs(1..=1)))
                .fail(MongoError::command(500, "gone"))
                .reply(more(0, docs(2..=2))),
        );
        let mut stream = cursor_over(&transport).stream();

        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn test_dropped_stream_makes_no_requests() {
        let transport = Arc::new(MockTransport::new().reply(first(0, docs(1..=1))));
        let stream = cursor_over(&transport).stream();
        drop(stream);
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_dropping_stream_midway_stops_fetching() {
        let transport = Arc::new(
            MockTransport::new()
                .reply(first(11, docs(1..=1)))
                .reply(more(0, docs(2..=2))),
        );
        let mut stream = cursor_over(&transport).stream();

        assert_eq!(stream.next().await.unwrap().unwrap(), doc! { "n": 1 });
        drop(stream);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_iter_is_single_pass() {
        let transport = Arc::new(
            MockTransport::new()
                .reply(first(4, docs(1..=1)))
                .reply(more(0, docs(2..=2))),
        );
        let mut cursor = cursor_over(&transport);

        let seen: Vec<Document> = cursor.iter().try_collect().await.unwrap();
        assert_eq!(seen, docs(1..=2));

        let again: Vec<Document> = cursor.iter().try_collect().await.unwrap();
        assert!(again.is_empty());
        assert_eq!(transport.call_count(), 2);
    }

    #[test]
    fn test_cursor_id_zero() {
        assert!(CursorId::zero().is_zero());
        assert!(CursorId::new(Bson::Int32(0)).is_zero());
        assert!(CursorId::new(Bson::Double(0.0)).is_zero());
        assert!(CursorId::new(Bson::Null).is_zero());
        assert!(!CursorId::new(Bson::Int64(1)).is_zero());
        assert!(!CursorId::new(Bson::String("0".into())).is_zero());
    }

    #[test]
    fn test_options_to_document() {
        let options = CursorOptions {
            batch_size: Some(50),
            limit: Some(10),
            skip: Some(5),
            sort: Some(Bson::String("name".into())),
            direction: Some(-1),
            projection: Some(doc! { "name": 1 }),
            max_time_ms: Some(1_000),
            comment: None,
            allow_disk_use: Some(true),
            explain: false,
        };
        assert_eq!(
            options.to_document(),
            doc! {
                "batchSize": 50,
                "limit": 10,
                "skip": 5,
                "sort": "name",
                "direction": -1,
                "projection": { "name": 1 },
                "maxTimeMS": 1_000,
                "allowDiskUse": true,
            }
        );
        assert_eq!(CursorOptions::default().to_document(), Document::new());
    }

    #[test]
    fn test_options_keep_wide_values() {
        let options = CursorOptions {
            skip: Some(i64::MAX),
            max_time_ms: Some(i64::from(u32::MAX) + 1),
            ..CursorOptions::default()
        };
        assert_eq!(
            options.to_document(),
            doc! { "skip": i64::MAX, "maxTimeMS": 4_294_967_296_i64 }
        );
    }

    #[test]
    fn test_int_bson_widens_large_values() {
        assert_eq!(int_bson(7), Bson::Int32(7));
        assert_eq!(int_bson(i64::from(i32::MAX) + 1), Bson::Int64(2_147_483_648));
    }
}
