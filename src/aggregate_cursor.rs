//! Cursor over the results of an aggregation pipeline.
//!
//! Each stage method appends exactly one stage, so the pipeline sent to the
//! server is the calls in the order they were made.

use crate::cursor::{CommandRequest, Cursor, CursorSource};
use crate::error::Result;
use bson::{doc, Bson, Document};

/// An aggregation pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatePipeline {
    /// Stages in execution order.
    pub pipeline: Vec<Document>,
}

impl AggregatePipeline {
    /// Create a pipeline from existing stages.
    pub fn new(pipeline: impl IntoIterator<Item = Document>) -> Self {
        Self {
            pipeline: pipeline.into_iter().collect(),
        }
    }
}

impl CursorSource for AggregatePipeline {
    fn first_request(&self) -> CommandRequest {
        let stages: Vec<Bson> = self.pipeline.iter().cloned().map(Bson::Document).collect();
        CommandRequest {
            command: "aggregate",
            params: doc! { "pipeline": stages },
        }
    }
}

/// Cursor returned by [`Collection::aggregate`](crate::collection::Collection::aggregate).
pub type AggregateCursor<T = Document> = Cursor<AggregatePipeline, T>;

impl<T> Cursor<AggregatePipeline, T> {
    /// Append a raw stage.
    pub fn add_stage(&mut self, stage: Document) -> Result<&mut Self> {
        self.source_mut()?.pipeline.push(stage);
        Ok(self)
    }

    fn push_stage(&mut self, operator: &str, spec: impl Into<Bson>) -> Result<&mut Self> {
        let mut stage = Document::new();
        stage.insert(operator, spec.into());
        self.add_stage(stage)
    }

    /// Append a `$match` stage.
    pub fn match_(&mut self, filter: Document) -> Result<&mut Self> {
        self.push_stage("$match", filter)
    }

    /// Append a `$group` stage.
    pub fn group(&mut self, group: Document) -> Result<&mut Self> {
        self.push_stage("$group", group)
    }

    /// Append a `$limit` stage.
    pub fn limit(&mut self, limit: i64) -> Result<&mut Self> {
        let limit = match i32::try_from(limit) {
            Ok(small) => Bson::Int32(small),
            Err(_) => Bson::Int64(limit),
        };
        self.push_stage("$limit", limit)
    }

    /// Append a `$skip` stage.
    pub fn skip(&mut self, skip: i64) -> Result<&mut Self> {
        let skip = match i32::try_from(skip) {
            Ok(small) => Bson::Int32(small),
            Err(_) => Bson::Int64(skip),
        };
        self.push_stage("$skip", skip)
    }

    /// Append a `$sort` stage.
    pub fn sort(&mut self, sort: Document) -> Result<&mut Self> {
        self.push_stage("$sort", sort)
    }

    /// Append a `$project` stage.
    pub fn project(&mut self, projection: Document) -> Result<&mut Self> {
        self.push_stage("$project", projection)
    }

    /// Append a `$lookup` stage.
    pub fn lookup(&mut self, lookup: Document) -> Result<&mut Self> {
        self.push_stage("$lookup", lookup)
    }

    /// Append a `$redact` stage.
    pub fn redact(&mut self, expression: Document) -> Result<&mut Self> {
        self.push_stage("$redact", expression)
    }

    /// Append an `$unwind` stage, either a field path or a full spec document.
    pub fn unwind(&mut self, unwind: impl Into<Bson>) -> Result<&mut Self> {
        self.push_stage("$unwind", unwind)
    }

    /// Append a `$geoNear` stage.
    pub fn geo_near(&mut self, geo_near: Document) -> Result<&mut Self> {
        self.push_stage("$geoNear", geo_near)
    }

    /// Append an `$out` stage, a collection name or `{ db, coll }`.
    pub fn out(&mut self, target: impl Into<Bson>) -> Result<&mut Self> {
        self.push_stage("$out", target)
    }

    /// Allow stages to write temporary files on the server.
    pub fn allow_disk_use(&mut self, allow: bool) -> Result<&mut Self> {
        self.options_mut()?.allow_disk_use = Some(allow);
        Ok(self)
    }
}
