//! # apiary
//!
//! An elastic AMQP message-consumer container built on top of
//! [lapin](https://github.com/amqp-rs/lapin).
//!
//! `apiary` maintains a dynamically sized pool of workers that each hold a
//! `lapin` consumer against one or more queues, hands every delivery to a
//! user-supplied [`listener::MessageListener`], and recovers from broker and
//! listener failures by restarting the affected worker with backoff. It does
//! not provide message ordering across workers, deduplication, or
//! cross-restart persistence; those remain the caller's concern.

// apiary is 100% Safe Rust.
#![forbid(unsafe_code)]
#![warn(
    // Warns on ::path, allows crate::path.
    absolute_paths_not_starting_with_crate,

    // Warns you about missing documentation comments.
    missing_docs,
    clippy::missing_docs_in_private_items,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,

    // Warns you when you have dependencies you're not using.
    unused_crate_dependencies,

    // Warns on converting values using the `as` keyword.
    clippy::as_conversions,
)]

// Re-exporting the underlying lapin version so callers don't need to pin a
// matching version as a separate dependency.
pub use lapin;

pub mod active_counter;
pub mod admin;
pub mod backoff;
pub mod config;
pub mod consumer;
pub mod container;
pub mod error;
pub mod events;
pub mod invoke;
pub mod listener;
pub mod redeclare;
pub mod scaling;
pub mod worker;

// pub-using every name::Name to avoid the name::Name::Name repetition this
// crate's module layout would otherwise force at call sites.
pub use active_counter::ActiveCounter;
pub use admin::Admin;
pub use backoff::{BackOffExecution, BackOffPolicy};
pub use config::{AckMode, ContainerConfig};
pub use container::Container;
pub use error::Error;
pub use events::{ContainerEvent, EventSink};
pub use listener::{
    ChannelAwareListener, ListenerContainerAware, ListenerOutcome, Message, MessageListener,
};

/// Convenience type for a result with `apiary`'s error.
pub type Result<T> = std::result::Result<T, Error>;
