pub mod engine;
pub mod error;
pub mod matcher;
pub mod plan;
pub mod result;

pub use engine::QueryEngine;
pub use error::QueryError;
pub use plan::{Comparator, DataNode, FieldSpec, QueryNode, QuerySpec, TypeRef, VectorOp};
pub use result::{DumpFieldDef, DumpResult, DumpRow, QueryResult, ResultRow};
