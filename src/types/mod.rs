//! Deterministic bit-level encoding ([`serializer`]) and total ordering
//! ([`comparator`]) for every supported SQL [`crate::common::DataType`].

pub mod comparator;
pub mod serializer;

pub use comparator::KeyComparator;
pub use serializer::TypeSerializer;
