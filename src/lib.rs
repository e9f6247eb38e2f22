pub mod api;
pub mod ast;
pub mod builder;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod lexer;
pub mod parser;
pub mod resolver;
pub mod schema;
mod serialization;
pub mod stream;
pub mod types;
pub mod value;
pub mod writer;

pub use api::{parse, Serializer};
pub use config::{PropertyAction, ReferencePolicy, SerializerConfig};
pub use error::GonError;
pub use schema::{ClassDef, CollectionKind, Schema, SchemaRegistry};
pub use serialization::PlainValue;
pub use types::{Type, TypeName};
pub use value::{graphs_equal, Heap, ObjectId, Value};
