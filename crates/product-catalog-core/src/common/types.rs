//! # Product entity
//!
//! [`Product`] is the one record this service knows about. The same shape is
//! used on the wire ([`proto::Product`]) and in the document store, so the
//! conversions below are plain field moves in both directions: no validation,
//! no defaulting, nothing dropped.
//!
//! ## Storage shape
//!
//! The entity serializes with `serde` as a flat document whose primary key is
//! `_id`. Every field is `#[serde(default)]`, so a document written by an
//! older client with a field missing decodes to the zero value rather than
//! failing.

use crate::proto;
use serde::{Deserialize, Serialize};

/// A catalog product as stored and as exchanged over gRPC.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Primary key. Empty until the store adapter assigns one.
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: f32,
    /// Free-form tag string.
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub barcode: String,
}

impl Product {
    /// Returns `true` if the store has not assigned an id yet.
    pub fn is_unassigned(&self) -> bool {
        self.id.is_empty()
    }
}

impl From<proto::Product> for Product {
    fn from(value: proto::Product) -> Self {
        Self {
            id: value.id,
            name: value.name,
            price: value.price,
            tags: value.tags,
            barcode: value.barcode,
        }
    }
}

impl From<Product> for proto::Product {
    fn from(value: Product) -> Self {
        Self {
            id: value.id,
            name: value.name,
            price: value.price,
            tags: value.tags,
            barcode: value.barcode,
        }
    }
}
