//! MemoryBackend - in-process document store
//!
//! A small backend that keeps every collection in memory. It backs the
//! `docwire-server` binary and the integration tests; it is not meant to be
//! a storage engine.
//!
//! # Matching
//!
//! Selectors are equality-only: a document matches when every non-`$`
//! top-level field of the selector is present with an equal value. A
//! `$query` wrapper (`{$query: {...}, $orderby: ...}`) is unwrapped first.
//!
//! # Per-connection state
//!
//! Commands run on a connection are counted (reported by `connectionStatus`)
//! and commands in flight are listed by `$cmd.sys.inprog`. Both are dropped
//! by `handle_close`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use serde_json::{json, Value};

use crate::backend::Backend;
use crate::connection::{Connection, ConnectionId};
use crate::document::{doc, join_version, mark_ok, Document};
use crate::error::{Result, ServerError};
use crate::message::{Delete, Insert, Namespace, Query, Update};

/// Version reported by `buildInfo` and `serverStatus`
pub const MEMORY_BACKEND_VERSION: [u32; 3] = [2, 4, 0];

/// Largest document the backend advertises in `isMaster`
pub const MAX_DOCUMENT_SIZE: u64 = 16 * 1024 * 1024;

type Collections = BTreeMap<String, Vec<Document>>;

/// A command currently executing
#[derive(Debug, Clone)]
struct CurrentOperation {
    connection_id: ConnectionId,
    namespace: String,
    command: String,
}

pub struct MemoryBackend {
    databases: RwLock<BTreeMap<String, Collections>>,
    operations: Mutex<BTreeMap<u64, CurrentOperation>>,
    next_op_id: AtomicU64,
    /// Commands executed per open connection
    command_counts: Mutex<HashMap<ConnectionId, u64>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            databases: RwLock::new(BTreeMap::new()),
            operations: Mutex::new(BTreeMap::new()),
            next_op_id: AtomicU64::new(1),
            command_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Number of documents stored in a collection (0 if it does not exist)
    pub fn document_count(&self, namespace: &Namespace) -> usize {
        let databases = self.databases.read().unwrap_or_else(PoisonError::into_inner);
        databases
            .get(&namespace.database)
            .and_then(|db| db.get(&namespace.collection))
            .map_or(0, Vec::len)
    }

    /// Number of connections the backend still holds state for
    pub fn tracked_connections(&self) -> usize {
        self.command_counts.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn begin_operation(&self, connection: &Connection, database: &str, command: &str) -> OperationGuard<'_> {
        let opid = self.next_op_id.fetch_add(1, Ordering::SeqCst);
        let operation = CurrentOperation {
            connection_id: connection.id(),
            namespace: format!("{}.$cmd", database),
            command: command.to_string(),
        };
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(opid, operation);
        *self
            .command_counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(connection.id())
            .or_insert(0) += 1;
        OperationGuard { backend: self, opid }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    fn execute_command(
        &self,
        connection: &Connection,
        database: &str,
        command: &str,
        query: &Document,
    ) -> Result<Document> {
        let mut reply = match command {
            "ping" => Document::new(),
            "isMaster" | "ismaster" => doc([
                ("ismaster", json!(true)),
                ("maxBsonObjectSize", json!(MAX_DOCUMENT_SIZE)),
            ]),
            "buildInfo" | "buildinfo" => doc([
                ("version", json!(join_version(&MEMORY_BACKEND_VERSION))),
                ("versionArray", json!(MEMORY_BACKEND_VERSION)),
            ]),
            "listDatabases" => self.list_databases(),
            "count" => {
                let collection = string_argument(query, command)?;
                let selector = match query.get("query") {
                    Some(Value::Object(selector)) => selector.clone(),
                    _ => Document::new(),
                };
                let databases = self.databases.read().unwrap_or_else(PoisonError::into_inner);
                let n = databases
                    .get(database)
                    .and_then(|db| db.get(collection))
                    .map_or(0, |docs| docs.iter().filter(|d| matches_selector(d, &selector)).count());
                doc([("n", json!(n))])
            }
            "drop" => {
                let collection = string_argument(query, command)?;
                let mut databases = self.databases.write().unwrap_or_else(PoisonError::into_inner);
                let removed = databases.get_mut(database).and_then(|db| db.remove(collection));
                if removed.is_none() {
                    return Err(ServerError::silent("ns not found"));
                }
                doc([
                    ("nIndexesWas", json!(1)),
                    ("ns", json!(Namespace::new(database, collection).full_name())),
                ])
            }
            "dropDatabase" => {
                self.databases
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(database);
                doc([("dropped", json!(database))])
            }
            "connectionStatus" => {
                let counts = self.command_counts.lock().unwrap_or_else(PoisonError::into_inner);
                doc([
                    ("connectionId", json!(connection.id())),
                    ("commands", json!(counts.get(&connection.id()).copied().unwrap_or(0))),
                ])
            }
            "whatsmyuri" => {
                let you = connection.peer().map(|p| p.to_string()).unwrap_or_default();
                doc([("you", json!(you))])
            }
            _ => return Err(ServerError::no_such_command(command)),
        };
        mark_ok(&mut reply);
        Ok(reply)
    }

    fn list_databases(&self) -> Document {
        let databases = self.databases.read().unwrap_or_else(PoisonError::into_inner);
        let list: Vec<Value> = databases
            .iter()
            .map(|(name, collections)| {
                let empty = collections.values().all(Vec::is_empty);
                json!({"name": name, "empty": empty})
            })
            .collect();
        doc([("databases", Value::Array(list))])
    }
}

/// Removes a command from the in-flight list when it finishes
struct OperationGuard<'a> {
    backend: &'a MemoryBackend,
    opid: u64,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.backend
            .operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.opid);
    }
}

impl Backend for MemoryBackend {
    fn handle_query(&self, query: &Query) -> Result<Vec<Document>> {
        let selector = unwrap_query(&query.query);
        let databases = self.databases.read().unwrap_or_else(PoisonError::into_inner);

        let Some(documents) = databases
            .get(query.database_name())
            .and_then(|db| db.get(query.collection_name()))
        else {
            return Ok(Vec::new());
        };

        let limit = match query.number_to_return {
            0 => usize::MAX,
            n => n.unsigned_abs() as usize,
        };

        Ok(documents
            .iter()
            .filter(|d| matches_selector(d, selector))
            .skip(query.number_to_skip as usize)
            .take(limit)
            .map(|d| match &query.field_selector {
                Some(fields) if !fields.is_empty() => project(d, fields),
                _ => d.clone(),
            })
            .collect())
    }

    fn handle_command(
        &self,
        connection: &Connection,
        database: &str,
        command: &str,
        query: &Document,
    ) -> Result<Document> {
        let _operation = self.begin_operation(connection, database, command);
        self.execute_command(connection, database, command, query)
    }

    fn get_current_operations(&self, _query: &Query) -> Result<Vec<Document>> {
        let operations = self.operations.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(operations
            .iter()
            .map(|(opid, op)| {
                doc([
                    ("opid", json!(opid)),
                    ("connectionId", json!(op.connection_id)),
                    ("op", json!("command")),
                    ("ns", json!(op.namespace)),
                    ("command", json!(op.command)),
                ])
            })
            .collect())
    }

    fn handle_insert(&self, insert: &Insert) -> Result<()> {
        let mut databases = self.databases.write().unwrap_or_else(PoisonError::into_inner);
        let collection = databases
            .entry(insert.namespace.database.clone())
            .or_default()
            .entry(insert.namespace.collection.clone())
            .or_default();

        let mut first_error = None;
        for document in &insert.documents {
            if let Some(key) = document.keys().find(|k| k.starts_with('$')) {
                let error = ServerError::classified(
                    2,
                    format!("Document can't have $ prefixed field names: {}", key),
                );
                if !insert.continue_on_error {
                    return Err(error);
                }
                first_error.get_or_insert(error);
                continue;
            }
            collection.push(document.clone());
        }

        first_error.map_or(Ok(()), Err)
    }

    fn handle_update(&self, update: &Update) -> Result<()> {
        let is_operator_update = update.update.keys().next().is_some_and(|k| k.starts_with('$'));
        if is_operator_update {
            validate_modifiers(&update.update)?;
        } else if update.multi {
            return Err(ServerError::classified(10158, "multi update only works with $ operators"));
        }

        let mut databases = self.databases.write().unwrap_or_else(PoisonError::into_inner);
        let collection = databases
            .entry(update.namespace.database.clone())
            .or_default()
            .entry(update.namespace.collection.clone())
            .or_default();

        let mut matched = 0;
        for document in collection.iter_mut().filter(|d| matches_selector(d, &update.selector)) {
            *document = apply_update(document, &update.update, is_operator_update);
            matched += 1;
            if !update.multi {
                break;
            }
        }

        if matched == 0 && update.upsert {
            let seed: Document = update
                .selector
                .iter()
                .filter(|(k, _)| !k.starts_with('$'))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            collection.push(apply_update(&seed, &update.update, is_operator_update));
        }

        Ok(())
    }

    fn handle_delete(&self, delete: &Delete) -> Result<()> {
        let mut databases = self.databases.write().unwrap_or_else(PoisonError::into_inner);
        let Some(collection) = databases
            .get_mut(&delete.namespace.database)
            .and_then(|db| db.get_mut(&delete.namespace.collection))
        else {
            return Ok(());
        };

        if delete.single_remove {
            if let Some(pos) = collection.iter().position(|d| matches_selector(d, &delete.selector)) {
                collection.remove(pos);
            }
        } else {
            collection.retain(|d| !matches_selector(d, &delete.selector));
        }

        Ok(())
    }

    fn handle_close(&self, connection: &Connection) {
        self.command_counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&connection.id());
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, op| op.connection_id != connection.id());
    }

    fn version(&self) -> Vec<u32> {
        MEMORY_BACKEND_VERSION.to_vec()
    }
}

// ============================================================================
// Document helpers
// ============================================================================

/// Unwrap `{$query: {...}}` if present
fn unwrap_query(query: &Document) -> &Document {
    match query.get("$query") {
        Some(Value::Object(inner)) => inner,
        _ => query,
    }
}

/// Equality match on every non-`$` field of the selector
fn matches_selector(document: &Document, selector: &Document) -> bool {
    selector
        .iter()
        .filter(|(k, _)| !k.starts_with('$'))
        .all(|(k, v)| document.get(k) == Some(v))
}

/// Inclusion projection; `_id` is kept unless excluded explicitly
fn project(document: &Document, fields: &Document) -> Document {
    let include_id = !matches!(fields.get("_id"), Some(v) if is_falsy(v));
    document
        .iter()
        .filter(|(k, _)| {
            if k.as_str() == "_id" {
                include_id
            } else {
                fields.get(k.as_str()).is_some_and(|v| !is_falsy(v))
            }
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Null => true,
        _ => false,
    }
}

fn string_argument<'a>(query: &'a Document, command: &str) -> Result<&'a str> {
    query
        .get(command)
        .and_then(Value::as_str)
        .ok_or_else(|| ServerError::classified(2, format!("{} requires a collection name", command)))
}

fn validate_modifiers(update: &Document) -> Result<()> {
    for (key, value) in update {
        match key.as_str() {
            "$set" | "$unset" => {
                if !value.is_object() {
                    return Err(ServerError::classified(
                        9,
                        format!("Modifier {} allowed for objects only", key),
                    ));
                }
            }
            _ => {
                return Err(ServerError::classified(
                    10147,
                    format!("Invalid modifier specified: {}", key),
                ))
            }
        }
    }
    Ok(())
}

/// Apply an operator update, or replace the document keeping its `_id` first
fn apply_update(document: &Document, update: &Document, is_operator_update: bool) -> Document {
    if !is_operator_update {
        let mut replacement = Document::new();
        if let Some(id) = document.get("_id") {
            replacement.insert("_id".to_string(), id.clone());
        }
        for (k, v) in update.iter().filter(|(k, _)| k.as_str() != "_id") {
            replacement.insert(k.clone(), v.clone());
        }
        return replacement;
    }

    let mut updated = document.clone();
    if let Some(Value::Object(set)) = update.get("$set") {
        for (k, v) in set {
            updated.insert(k.clone(), v.clone());
        }
    }
    if let Some(Value::Object(unset)) = update.get("$unset") {
        updated.retain(|k, _| !unset.contains_key(k));
    }
    updated
}
