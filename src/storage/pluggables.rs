/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Trait for pluggable document persistence, and the small query language used to talk to it.
//!
//! The node never holds its own copy of chain state: everything it knows lives in five
//! [collections](Collection) of JSON documents behind a [`DocumentStore`]. Implementations translate
//! [`Filter`]s, [`GetOptions`] and [`Update`]s into their backend's native queries. Field names are
//! dot-separated paths into a document, where numeric segments index into arrays, e.g. `votes.3` or
//! `block.number`.

use std::{
    cmp::Ordering,
    fmt::{self, Display, Formatter},
};

use serde_json::{Map, Value};
use thiserror::Error;

/// A persistent, shareable store of JSON documents grouped into [collections](Collection).
///
/// Clones must refer to the same underlying store. Every operation is independent: there are no
/// transactions spanning several calls or several collections.
pub trait DocumentStore: Clone + Send + 'static {
    /// Documents in `collection` matching `filter`, sorted and limited by `options`.
    fn get(
        &self,
        collection: Collection,
        filter: &Filter,
        options: &GetOptions,
    ) -> Result<Vec<Value>, StorageError>;

    /// Insert `documents` into `collection` as one batch.
    fn put(&mut self, collection: Collection, documents: Vec<Value>) -> Result<(), StorageError>;

    /// Apply `update` to every document in `collection` matching `filter`, atomically per
    /// document. Returns how many documents matched.
    fn update(
        &mut self,
        collection: Collection,
        filter: &Filter,
        update: &Update,
    ) -> Result<usize, StorageError>;

    /// Like [`update`](Self::update), but when nothing matches, insert a new document built from
    /// the filter's equality conditions with `update` applied to it.
    fn upsert(
        &mut self,
        collection: Collection,
        filter: &Filter,
        update: &Update,
    ) -> Result<(), StorageError>;

    /// Delete every document in `collection` matching `filter`. Returns how many were deleted.
    fn remove(&mut self, collection: Collection, filter: &Filter) -> Result<usize, StorageError>;
}

/// The named collections the node reads and writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    /// Committed blocks, one per height.
    Blockchain,
    /// Proposed blocks that have not yet gathered enough votes.
    BlockCandidates,
    /// Transaction messages and their per-round vote counters.
    MessagesPool,
    /// Consensus messages received (or produced) for any round and height.
    ConsensusPool,
    /// Node parameters such as the validator roster.
    Parameters,
}

impl Collection {
    pub const fn name(&self) -> &'static str {
        match self {
            Collection::Blockchain => "Blockchain",
            Collection::BlockCandidates => "BlockCandidates",
            Collection::MessagesPool => "MessagesPool",
            Collection::ConsensusPool => "ConsensusPool",
            Collection::Parameters => "Parameters",
        }
    }
}

impl Display for Collection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend failed: {0}")]
    Backend(String),
    #[error("malformed storage response: {0}")]
    MalformedResponse(String),
    #[error("failed to encode a document for {collection}: {source}")]
    Encode {
        collection: Collection,
        source: serde_json::Error,
    },
    #[error("failed to decode a document from {collection}: {source}")]
    Decode {
        collection: Collection,
        source: serde_json::Error,
    },
}

/// A condition on the value found at one field path.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gte(Value),
    Lte(Value),
    /// The field is an array that does not contain the value, or is absent.
    NotContains(Value),
    /// The field is absent or null.
    Missing,
}

/// A conjunction of [`Condition`]s. The empty filter matches every document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter(Vec<(String, Condition)>);

impl Filter {
    pub fn all() -> Filter {
        Filter(Vec::new())
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Filter {
        self.with(field, Condition::Eq(value.into()))
    }

    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Filter {
        self.with(field, Condition::Ne(value.into()))
    }

    pub fn gte(self, field: impl Into<String>, value: impl Into<Value>) -> Filter {
        self.with(field, Condition::Gte(value.into()))
    }

    pub fn lte(self, field: impl Into<String>, value: impl Into<Value>) -> Filter {
        self.with(field, Condition::Lte(value.into()))
    }

    pub fn not_contains(self, field: impl Into<String>, value: impl Into<Value>) -> Filter {
        self.with(field, Condition::NotContains(value.into()))
    }

    pub fn missing(self, field: impl Into<String>) -> Filter {
        self.with(field, Condition::Missing)
    }

    pub fn conditions(&self) -> &[(String, Condition)] {
        &self.0
    }

    /// Evaluate the filter against `document`.
    pub fn matches(&self, document: &Value) -> bool {
        self.0.iter().all(|(field, condition)| {
            let found = lookup(document, field);
            match condition {
                Condition::Eq(value) => found == Some(value),
                Condition::Ne(value) => found != Some(value),
                Condition::Gte(value) => found
                    .and_then(|found| compare(found, value))
                    .is_some_and(|ordering| ordering != Ordering::Less),
                Condition::Lte(value) => found
                    .and_then(|found| compare(found, value))
                    .is_some_and(|ordering| ordering != Ordering::Greater),
                Condition::NotContains(value) => match found {
                    Some(Value::Array(items)) => !items.contains(value),
                    Some(Value::Null) | None => true,
                    Some(_) => false,
                },
                Condition::Missing => matches!(found, None | Some(Value::Null)),
            }
        })
    }

    /// The document an upsert starts from when nothing matches: the filter's equality fields.
    pub fn seed_document(&self) -> Value {
        let mut document = Value::Object(Map::new());
        for (field, condition) in &self.0 {
            if let Condition::Eq(value) = condition {
                set_path(&mut document, field, value.clone());
            }
        }
        document
    }

    fn with(mut self, field: impl Into<String>, condition: Condition) -> Filter {
        self.0.push((field.into(), condition));
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Sort and limit options for [`DocumentStore::get`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GetOptions {
    pub sort: Option<(String, SortOrder)>,
    pub limit: Option<usize>,
}

impl GetOptions {
    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> GetOptions {
        self.sort = Some((field.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> GetOptions {
        self.limit = Some(limit);
        self
    }

    /// Sort and truncate `documents` in place according to these options.
    pub fn apply(&self, documents: &mut Vec<Value>) {
        if let Some((field, order)) = &self.sort {
            documents.sort_by(|a, b| {
                let ordering = match (lookup(a, field), lookup(b, field)) {
                    (Some(a), Some(b)) => compare(a, b).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Greater,
                    (None, Some(_)) => Ordering::Less,
                    (None, None) => Ordering::Equal,
                };
                match order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                }
            });
        }
        if let Some(limit) = self.limit {
            documents.truncate(limit);
        }
    }
}

/// A set of field modifications: `set` replaces, `inc` adds to a number, `push` appends to an array.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Update {
    set: Vec<(String, Value)>,
    inc: Vec<(String, i64)>,
    push: Vec<(String, Value)>,
}

impl Update {
    pub fn new() -> Update {
        Update::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Update {
        self.set.push((field.into(), value.into()));
        self
    }

    pub fn inc(mut self, field: impl Into<String>, by: i64) -> Update {
        self.inc.push((field.into(), by));
        self
    }

    pub fn push(mut self, field: impl Into<String>, value: impl Into<Value>) -> Update {
        self.push.push((field.into(), value.into()));
        self
    }

    /// An update that sets every top-level field of `document`.
    pub fn set_all(document: &Value) -> Update {
        let mut update = Update::new();
        if let Value::Object(fields) = document {
            for (field, value) in fields {
                update = update.set(field.clone(), value.clone());
            }
        }
        update
    }

    pub fn sets(&self) -> &[(String, Value)] {
        &self.set
    }

    pub fn incs(&self) -> &[(String, i64)] {
        &self.inc
    }

    pub fn pushes(&self) -> &[(String, Value)] {
        &self.push
    }

    /// Apply the modifications to `document`, creating intermediate objects where needed.
    pub fn apply(&self, document: &mut Value) {
        for (field, value) in &self.set {
            set_path(document, field, value.clone());
        }
        for (field, by) in &self.inc {
            let current = lookup(document, field).and_then(Value::as_i64).unwrap_or(0);
            set_path(document, field, Value::from(current + by));
        }
        for (field, value) in &self.push {
            let mut items = match lookup(document, field) {
                Some(Value::Array(items)) => items.clone(),
                _ => Vec::new(),
            };
            items.push(value.clone());
            set_path(document, field, Value::Array(items));
        }
    }
}

/// Parse a raw storage reply of the form `{"result": [...]}`.
///
/// A two-byte reply (`{}`) means "no documents".
pub fn parse_storage_response(raw: &[u8]) -> Result<Vec<Value>, StorageError> {
    if raw.len() == 2 {
        return Ok(Vec::new());
    }
    let reply: Value = serde_json::from_slice(raw)
        .map_err(|err| StorageError::MalformedResponse(err.to_string()))?;
    match reply.get("result") {
        Some(Value::Array(documents)) => Ok(documents.clone()),
        Some(Value::Null) => Ok(Vec::new()),
        Some(document @ Value::Object(_)) => Ok(vec![document.clone()]),
        Some(other) => Err(StorageError::MalformedResponse(format!(
            "`result` is neither a list nor a document: {other}"
        ))),
        None => Err(StorageError::MalformedResponse(
            "reply has no `result` field".to_string(),
        )),
    }
}

fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(document, |value, segment| match value {
        Value::Object(fields) => fields.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn set_path(document: &mut Value, path: &str, new_value: Value) {
    let mut value = document;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let is_last = segments.peek().is_none();
        if value.is_null() {
            *value = Value::Object(Map::new());
        }
        value = match value {
            Value::Object(fields) => {
                if is_last {
                    fields.insert(segment.to_string(), new_value);
                    return;
                }
                fields.entry(segment.to_string()).or_insert(Value::Null)
            }
            Value::Array(items) => match segment.parse::<usize>() {
                Ok(i) if i < items.len() => {
                    if is_last {
                        items[i] = new_value;
                        return;
                    }
                    &mut items[i]
                }
                _ => return,
            },
            _ => return,
        };
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
