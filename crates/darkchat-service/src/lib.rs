//! Channel service: the request handlers behind every darkchat operation.
//!
//! Handlers never fail outward. Each one replies exactly once through its
//! [`Responder`](responder::Responder) and may push broadcasts to other
//! members afterwards.

pub mod convert;
pub mod directory;
pub mod error;
pub mod responder;
pub mod service;
pub mod store;

pub use directory::PlayerDirectory;
pub use error::ServiceError;
pub use responder::{Outbound, Responder};
pub use service::{ChannelService, ServiceOptions};
pub use store::{ChannelStore, SqliteStore};
