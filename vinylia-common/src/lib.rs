//! # Vinylia Common Library
//!
//! Shared code for the Vinylia client crates including:
//! - Domain models (stories, vinyls, profiles, story cards)
//! - Event types (SyncEvent enum) and the EventBus
//! - Backend configuration loading
//! - The common error taxonomy

pub mod config;
pub mod error;
pub mod events;
pub mod models;

pub use error::{Error, Result};
pub use models::{Membership, StoryId};
