//! Vidconvert-Common: Shared types, constants, and utilities.
//!
//! - **Typed IDs**: UUID wrapper identifying conversion requests
//! - **Core Types**: media kind and rotation enums shared by the container
//!   and pipeline crates
//! - **Path Utilities**: container detection and output path derivation
//!
//! # Examples
//!
//! ```
//! use vidconvert_common::{MediaKind, RequestId, Rotation};
//! use vidconvert_common::paths::is_mp4_file;
//! use std::path::Path;
//!
//! let id = RequestId::new();
//! assert_eq!(Rotation::from_degrees(90), Some(Rotation::Deg90));
//! assert!(is_mp4_file(Path::new("clip.mp4")));
//! assert!(MediaKind::Audio.is_audio());
//! # let _ = id;
//! ```

pub mod ids;
pub mod paths;
pub mod types;

pub use ids::*;
pub use types::*;
