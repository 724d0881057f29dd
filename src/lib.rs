//! Room staging core: drop a product image onto a photo of a room, have a
//! hosted model composite it in, and keep the results in an undo history.
//!
//! [`Workspace`] is the entry point. The model calls themselves live behind
//! the traits in [`ops::ai`].

pub mod app;
pub mod components;
pub mod config;
pub mod error;
pub mod geometry;
pub mod io;
pub mod logger;
pub mod ops;
pub mod product;
pub mod session;

pub use app::Workspace;
pub use config::StageConfig;
pub use error::{CodecError, CollaboratorError, StageError, StageResult};
pub use io::{ImageArtifact, ObjectUrl, ObjectUrlRegistry, decode_data_url, encode_data_url};
pub use session::{Outcome, PlacementSession};
