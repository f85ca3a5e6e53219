//! Schema definitions: object types, field definitions, and the registry
//! consulted by the query engine for field resolution and namespace lookup.

use crate::invid::{FieldId, ObjectTypeId};
use crate::namespace::NamespaceIndex;
use crate::value::ValueKind;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Every object carries its owning owner-group invids in this field.
pub const FIELD_OWNER_LIST: FieldId = 0;
/// On owner-group objects: the member persona invids.
pub const FIELD_OWNER_MEMBERS: FieldId = 1;
/// On admin-persona objects: the owner groups the persona belongs to.
pub const FIELD_PERSONA_GROUPS: FieldId = 2;

/// The built-in owner-group object type.
pub const OWNER_GROUP_TYPE: ObjectTypeId = 0;
/// The built-in admin-persona object type.
pub const PERSONA_TYPE: ObjectTypeId = 1;

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub id: FieldId,
    pub name: String,
    pub kind: ValueKind,
    pub vector: bool,
    /// For invid-valued fields, the object type the references point at,
    /// when the schema constrains it. Used to widen query lock scope.
    pub target_type: Option<ObjectTypeId>,
    /// Uniqueness index, for fields whose values are unique within a scope.
    pub namespace: Option<Arc<NamespaceIndex>>,
}

impl FieldDef {
    pub fn new(id: FieldId, name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            vector: false,
            target_type: None,
            namespace: None,
        }
    }

    pub fn vector(mut self) -> Self {
        self.vector = true;
        self
    }

    pub fn targeting(mut self, target: ObjectTypeId) -> Self {
        self.target_type = Some(target);
        self
    }

    pub fn in_namespace(mut self, namespace: Arc<NamespaceIndex>) -> Self {
        self.namespace = Some(namespace);
        self
    }

    pub fn is_ip(&self) -> bool {
        self.kind == ValueKind::IpAddr
    }

    pub fn is_invid(&self) -> bool {
        self.kind == ValueKind::Invid
    }
}

#[derive(Debug, Clone)]
pub struct ObjectTypeDef {
    pub id: ObjectTypeId,
    pub name: String,
    /// Which field provides the object label.
    pub label_field: FieldId,
    /// Embedded types live inside a parent object and are displayed through it.
    pub embedded: bool,
    pub fields: Vec<FieldDef>,
}

impl ObjectTypeDef {
    pub fn new(id: ObjectTypeId, name: impl Into<String>, label_field: FieldId) -> Self {
        Self {
            id,
            name: name.into(),
            label_field,
            embedded: false,
            fields: Vec::new(),
        }
    }

    pub fn embedded(mut self) -> Self {
        self.embedded = true;
        self
    }

    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn field(&self, id: FieldId) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn label_field_def(&self) -> Option<&FieldDef> {
        self.field(self.label_field)
    }
}

/// Registry of object-type definitions, shared by store, sessions, and the
/// query engine. Threaded through constructors rather than accessed as a
/// global.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    inner: RwLock<SchemaInner>,
}

#[derive(Debug, Default)]
struct SchemaInner {
    types: HashMap<ObjectTypeId, Arc<ObjectTypeDef>>,
    by_name: HashMap<String, ObjectTypeId>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, def: ObjectTypeDef) -> Arc<ObjectTypeDef> {
        let def = Arc::new(def);
        let mut inner = self.inner.write();
        inner.by_name.insert(def.name.clone(), def.id);
        inner.types.insert(def.id, Arc::clone(&def));
        def
    }

    pub fn object_type(&self, id: ObjectTypeId) -> Option<Arc<ObjectTypeDef>> {
        self.inner.read().types.get(&id).cloned()
    }

    pub fn object_type_by_name(&self, name: &str) -> Option<Arc<ObjectTypeDef>> {
        let inner = self.inner.read();
        inner
            .by_name
            .get(name)
            .and_then(|id| inner.types.get(id))
            .cloned()
    }

    pub fn type_ids(&self) -> Vec<ObjectTypeId> {
        self.inner.read().types.keys().copied().collect()
    }
}
