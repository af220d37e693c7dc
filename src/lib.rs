//! # seshat
//!
//! A knowledge-frame store: persistence and retrieval for typed frame
//! instances with structural subsumption queries.
//!
//! ## Architecture
//!
//! - **Frames** (`frame`): typed nodes with slots holding nested frames,
//!   numbers, text, and cross-instance references
//! - **Store** (`store`): durable profile + body serialization, an
//!   identity↔index registry with free-list reuse, area-based directory
//!   layout, and reference-integrity correction
//! - **Matchers** (`matcher`): pluggable chain with an in-memory
//!   structural subsumption matcher and a SPARQL triple-store matcher
//! - **Expansion** (`expand`): recursive inlining of referenced instances
//!   into matchable networks, with cycle guards
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use seshat::frame::{Frame, NumberSpec, Slot, Value};
//! use seshat::identity::Identity;
//! use seshat::store::InstanceStore;
//! use seshat::types::TypeCatalog;
//!
//! let mut catalog = TypeCatalog::new();
//! catalog.add_root("Patient");
//! let store = InstanceStore::open("data".as_ref(), Arc::new(catalog)).unwrap();
//!
//! let patient = Frame::assertion("Patient")
//!     .with_slot(Slot::new("hasAge").with_value(Value::Number(NumberSpec::exact(42.0))));
//! store.add(&patient, &Identity::new("p1")).unwrap();
//!
//! let query = Frame::query("Patient")
//!     .with_slot(Slot::new("hasAge").with_value(Value::Number(NumberSpec::min(30.0))));
//! assert_eq!(store.query(&query).unwrap(), vec![Identity::new("p1")]);
//! ```

pub mod config;
pub mod error;
pub mod expand;
pub mod frame;
pub mod identity;
pub mod matcher;
pub mod store;
pub mod types;

pub use error::{SeshatError, SeshatResult};
