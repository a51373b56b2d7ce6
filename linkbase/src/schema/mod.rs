pub mod compiler;
pub mod parser;
pub mod types;

pub use compiler::{
    Accessor, CollectionDescriptor, CompiledSchema, IndexDescriptor, PropertyDescriptor,
};
pub use parser::{parse_schema, parse_schema_str};
pub use types::*;
