//! Value object trait: equality by value, not identity.
//!
//! Value objects are domain objects that have **no identity** - they are defined entirely
//! by their attribute values. Two value objects with the same values are considered equal.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. A stock key
/// (product + warehouse + location) or a document reference (kind + id) is a
/// value object: two keys naming the same slot are the same key.
///
/// ## Value Object vs Identity
///
/// - **Value Object**: `StockKey { product, warehouse, location }`
/// - **Identified record**: `StockMovement { id: MovementId, .. }`
///
/// The trait requires `Clone + PartialEq + Debug`; value objects are copied freely,
/// compared field-by-field, and show up in logs.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
