//! Shared vocabulary for the greenpass holder engine.
//!
//! Holds the time representation, the typed identifiers, the GreenCard
//! entity model and the collaborator traits that the vault, credential and
//! orchestration crates build on.

pub mod crypto;
pub mod error;
pub mod model;
pub mod traits;
pub mod transport;
pub mod types;

pub use crypto::*;
pub use error::*;
pub use model::*;
pub use traits::*;
pub use transport::*;
pub use types::*;
