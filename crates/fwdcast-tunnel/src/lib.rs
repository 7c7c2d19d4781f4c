//! fwdcast tunnel - ephemeral file sharing without uploads
//!
//! fwdcast exposes a local directory to the public internet through a relay,
//! without copying any file off the sharer's machine:
//!
//! - **Origin**: the local agent. Connects outbound to the relay over a
//!   WebSocket, registers a share, and streams files, directory listings,
//!   and ZIP archives back in chunks.
//! - **Relay**: the public server. Bridges viewer HTTP requests onto the
//!   origin's duplex channel, multiplexing concurrent requests by id,
//!   and enforces session expiry, viewer caps, and password auth.
//!
//! Nothing is ever persisted on the relay; a session disappears when it
//! expires or the origin disconnects.
//!
//! # Protocol
//!
//! Frames are JSON records over the WebSocket, tagged by `type`; response
//! bodies travel as base64 `data` frames of at most 64 KiB raw bytes:
//!
//! ```text
//! origin -> relay: {"type":"register","path":"/home/alice/share","expiresAt":1735000000}
//! relay -> origin: {"type":"registered","sessionId":"a1b2c3d4e5f6","url":"https://fwd.example/a1b2c3d4e5f6/"}
//! relay -> origin: {"type":"request","id":"00ff...","method":"GET","path":"/hello.txt"}
//! origin -> relay: {"type":"response","id":"00ff...","status":200,"headers":{...}}
//! origin -> relay: {"type":"data","id":"00ff...","chunk":"SGVsbG8s..."}
//! origin -> relay: {"type":"end","id":"00ff..."}
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use fwdcast_tunnel::{OriginAgent, OriginConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = OriginConfig::new("wss://fwd.example.com/ws", "/home/alice/share")
//!         .with_duration(Duration::from_secs(15 * 60))
//!         .with_password("hunter2");
//!
//!     let agent = OriginAgent::new(config);
//!     if let Err(e) = agent.run().await {
//!         eprintln!("share ended: {e}");
//!     }
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod origin;
pub mod protocol;
pub mod relay;

// Re-export main types at crate root
pub use config::{OriginConfig, RelayConfig, MAX_SESSION_DURATION, MIN_SESSION_DURATION};
pub use error::{Error, Result};
pub use origin::{
    AgentState, DirEntryInfo, NullObserver, OriginAgent, OriginObserver, TransferStats,
};
pub use protocol::{decode_chunk, encode_chunk, Frame, MAX_CHUNK_SIZE, MAX_FRAME_LEN};
pub use relay::{
    build_router, generate_request_id, spawn_sweeper, Admission, PendingRequest, RelayServer,
    ResponseHead, Session, SessionStore,
};
