//! # Tessera Testkit
//!
//! Test utilities for Tessera.
//!
//! This crate provides:
//! - Realm fixtures with deterministic notification delivery
//! - Property-based test generators using proptest
//! - Cross-module integration scenarios checked against an in-memory model
//! - Crash recovery harnesses operating on the commit log
//! - Stress testing utilities for concurrent handles
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tessera_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_realm() {
//!     with_temp_realm(people_schema(), |t| {
//!         let people = t.realm.objects("Person").unwrap();
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
