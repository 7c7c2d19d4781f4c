//! Relay side of the tunnel: session store, duplex loop, and viewer bridge

pub(crate) mod auth;
pub(crate) mod duplex;
pub(crate) mod pages;

pub mod http;
pub mod session;
pub mod store;

pub use http::{build_router, RelayServer};
pub use session::{PendingRequest, ResponseHead, Session};
pub use store::{generate_request_id, spawn_sweeper, Admission, SessionStore};
