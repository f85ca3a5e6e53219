//! dirdb: a directory-management object database.
//!
//! A schema-driven object store with transactional editing, recursive
//! query-tree evaluation, permission enforcement, and read-lock
//! coordination across object-type collections. Sessions observe their own
//! uncommitted edits; queries run against either a lock-free point-in-time
//! snapshot or a locked live view, with permission filtering applied to
//! every candidate row.
//!
//! ```
//! use dirdb::{Comparator, DataNode, DirDb, DirDbConfig, QueryEngine, QueryNode, QuerySpec};
//! use dirdb::schema::{FieldDef, ObjectTypeDef};
//! use dirdb::value::ValueKind;
//!
//! let db = DirDb::new(DirDbConfig::default());
//! db.schema().register(
//!     ObjectTypeDef::new(10, "user", 100)
//!         .with_field(FieldDef::new(100, "name", ValueKind::Text)),
//! );
//!
//! let session = db.supergash_session("admin");
//! session.begin_transaction().unwrap();
//! let invid = session.create_object(10, "anna").unwrap();
//! session.update_object(invid, |obj| obj.set_scalar(100, "anna")).unwrap();
//! session.commit_transaction().unwrap();
//!
//! let spec = QuerySpec::matching(
//!     10,
//!     QueryNode::Data(DataNode::new("name", Comparator::Equals, "anna")),
//! );
//! let result = QueryEngine::new(&session).query(&spec).unwrap();
//! assert_eq!(result.len(), 1);
//! ```

pub mod config;
pub mod error;
pub mod invid;
pub mod ip;
pub mod lock;
pub mod namespace;
pub mod object;
pub mod permission;
pub mod query;
pub mod schema;
pub mod session;
pub mod store;
pub mod value;

pub use config::DirDbConfig;
pub use error::{DirDbError, DirDbErrorCode};
pub use invid::{FieldId, Invid, ObjectTypeId};
pub use lock::{LockCoordinator, LockError, LockHandle};
pub use object::{ObjectRecord, ShadowObject, ShadowStatus};
pub use permission::{PermEntry, PermMatrix, PermissionView};
pub use query::{
    Comparator, DataNode, DumpResult, FieldSpec, QueryEngine, QueryError, QueryNode, QueryResult,
    QuerySpec, ResultRow, TypeRef, VectorOp,
};
pub use session::Session;
pub use store::{ObjectResolver, ObjectStore, SessionId};
pub use value::{FieldContent, FieldValue, ValueKind};

use crate::lock::LockCoordinator as Locks;
use crate::schema::SchemaRegistry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct DirDbInner {
    config: DirDbConfig,
    schema: SchemaRegistry,
    store: ObjectStore,
    locks: Locks,
    next_session: AtomicU64,
}

/// Shared handle to one database instance. Cheap to clone; every session
/// carries one.
#[derive(Debug, Clone)]
pub struct DirDb {
    inner: Arc<DirDbInner>,
}

impl DirDb {
    pub fn new(config: DirDbConfig) -> Self {
        Self {
            inner: Arc::new(DirDbInner {
                config,
                schema: SchemaRegistry::new(),
                store: ObjectStore::new(),
                locks: Locks::new(),
                next_session: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &DirDbConfig {
        &self.inner.config
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.inner.schema
    }

    pub fn store(&self) -> &ObjectStore {
        &self.inner.store
    }

    pub fn locks(&self) -> &LockCoordinator {
        &self.inner.locks
    }

    /// Opens a session with the given permission view.
    pub fn login(&self, username: impl Into<String>, perms: PermissionView) -> Arc<Session> {
        let id = self.inner.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        let username = username.into();
        tracing::debug!(session = id, %username, "session opened");
        Arc::new(Session::new(id, username, self.clone(), perms))
    }

    /// A fully privileged session, for administration and server-internal
    /// maintenance work.
    pub fn supergash_session(&self, username: impl Into<String>) -> Arc<Session> {
        self.login(username, PermissionView::supergash())
    }
}
