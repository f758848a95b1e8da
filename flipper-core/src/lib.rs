//! Flipper Core - Entity Types
//!
//! Data structures shared by every Flipper crate: identifiers, tracks,
//! ledger entities, lifecycle policy and the error taxonomy.

mod config;
mod entities;
mod enums;
mod error;
mod identity;
mod schedule;

pub use config::*;
pub use entities::*;
pub use enums::*;
pub use error::*;
pub use identity::*;
pub use schedule::*;
