pub mod error;
pub mod id;
pub mod index;
pub mod relation;
pub mod schema;
pub mod store;
pub mod update_log;
pub mod validation;
pub mod value;

pub use error::{LinkbaseError, Result};
pub use id::Id;
pub use index::{IndexKind, IndexStore};
pub use relation::{ManyToManySet, ManyToOneSet, RelationSet};
pub use schema::{CompiledSchema, SchemaDefinition};
pub use store::{CollectionRef, Database, ItemRef};
pub use update_log::{ApplyError, Operator, Quintuple, UpdateApplier, UpdateBatch, Version};
pub use value::{IndexKey, PropertyPath, Value};
