//! Interaction and messaging core: blocks, swipes and matches,
//! conversations, ephemeral photos and moderation.
//!
//! Commands are free functions taking a [`Core`] capability set and an
//! [`OpContext`]; state lives behind the [`store::Store`] traits.

pub mod adapters;
pub mod blocks;
pub mod config;
pub mod context;
pub mod conversations;
pub mod duration;
pub mod ephemeral;
pub mod events;
pub mod identity;
pub mod idempotency;
pub mod model;
pub mod moderation;
pub mod ports;
pub mod store;
pub mod sweeper;
pub mod swipes;
pub mod testing;

pub use config::CoreConfig;
pub use context::{Core, OpContext};
pub use model::SYSTEM_PRINCIPAL;
