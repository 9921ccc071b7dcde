//! Common types, traits, and error definitions for belief_rrt
//!
//! This module provides the foundational building blocks shared by the
//! planning and policy layers.

pub mod error;
pub mod traits;
pub mod types;

pub use error::*;
pub use traits::*;
pub use types::*;
