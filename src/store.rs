//! Contract for the durable key/value store the depot sits on. The store
//! itself is an external collaborator; the core only assumes a
//! transactional map from `(column, key)` to bytes with ordered iteration.

use crate::error::PtResult;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Column {
    Projects,
    Histories,
    Changes,
    SavePoints,
    Artifacts,
    Versions,
    Workspaces,
    Users,
}

impl Column {
    pub const ALL: [Column; 8] = [
        Column::Projects,
        Column::Histories,
        Column::Changes,
        Column::SavePoints,
        Column::Artifacts,
        Column::Versions,
        Column::Workspaces,
        Column::Users,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Column::Projects => "projects",
            Column::Histories => "histories",
            Column::Changes => "changes",
            Column::SavePoints => "savepoints",
            Column::Artifacts => "artifacts",
            Column::Versions => "versions",
            Column::Workspaces => "workspaces",
            Column::Users => "users",
        }
    }

    /// columns holding immutable objects; existing keys must never be
    /// rebound to different bytes
    pub fn is_immutable(self) -> bool {
        matches!(self, Column::Artifacts | Column::Versions | Column::SavePoints)
    }
}

impl Display for Column {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone)]
pub enum BatchOp {
    Put { column: Column, key: String, value: Vec<u8> },
    Delete { column: Column, key: String },
}

pub trait KvStore: Send + Sync {
    fn get(&self, column: Column, key: &str) -> PtResult<Option<Vec<u8>>>;

    fn put(&self, column: Column, key: &str, value: Vec<u8>) -> PtResult<()>;

    fn delete(&self, column: Column, key: &str) -> PtResult<()>;

    /// applies every op or none of them
    fn write_batch(&self, ops: Vec<BatchOp>) -> PtResult<()>;

    /// yields the column's entries in ascending key order
    fn iterate(&self, column: Column) -> PtResult<Vec<(String, Vec<u8>)>>;
}

/// In-process implementation of the store contract, used by tests and as a
/// stand-in until a durable backend is wired up.
#[derive(Default)]
pub struct MemoryStore {
    columns: RwLock<[BTreeMap<String, Vec<u8>>; 8]>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, column: Column, key: &str) -> PtResult<Option<Vec<u8>>> {
        Ok(self.columns.read()[column as usize].get(key).cloned())
    }

    fn put(&self, column: Column, key: &str, value: Vec<u8>) -> PtResult<()> {
        self.columns.write()[column as usize].insert(key.to_owned(), value);
        Ok(())
    }

    fn delete(&self, column: Column, key: &str) -> PtResult<()> {
        self.columns.write()[column as usize].remove(key);
        Ok(())
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> PtResult<()> {
        // a single write guard makes the batch atomic with respect to readers
        let mut columns = self.columns.write();
        for op in ops {
            match op {
                BatchOp::Put { column, key, value } => {
                    columns[column as usize].insert(key, value);
                }
                BatchOp::Delete { column, key } => {
                    columns[column as usize].remove(&key);
                }
            }
        }
        Ok(())
    }

    fn iterate(&self, column: Column) -> PtResult<Vec<(String, Vec<u8>)>> {
        Ok(self.columns.read()[column as usize]
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
