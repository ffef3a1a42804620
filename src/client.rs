use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

/// A record as the harness sees it: field name to field value.
pub type Record = HashMap<String, String>;

/// Outcome of a single operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error,
}

impl Status {
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

#[async_trait]
pub trait Client: Send + Sync + 'static {
    /// Read a single record, copying the requested fields into `result`.
    /// `None` or an empty set means all fields.
    async fn read(
        &self,
        table: &str,
        key: &str,
        fields: Option<&HashSet<String>>,
        result: &mut Record,
    ) -> Status;

    /// Scan `record_count` records starting at `start_key`
    async fn scan(
        &self,
        table: &str,
        start_key: &str,
        record_count: usize,
        fields: Option<&HashSet<String>>,
        result: &mut Vec<Record>,
    ) -> Status;

    /// Replace the fields of an existing record
    async fn update(&self, table: &str, key: &str, values: &Record) -> Status;

    /// Insert a new record
    async fn insert(&self, table: &str, key: &str, values: &Record) -> Status;

    /// Delete a record
    async fn delete(&self, table: &str, key: &str) -> Status;

    /// Release the underlying connection
    async fn cleanup(&self);
}
