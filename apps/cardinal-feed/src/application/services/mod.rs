//! Application Services
//!
//! - `listen_key`: acquisition and periodic renewal of listen keys
//! - `session`: the stream session state machine and read loop
//! - `tasks`: accounting for the background tasks a session owns

pub mod listen_key;
pub mod session;
pub mod tasks;

pub use listen_key::{ListenKeyConfig, ListenKeyManager};
pub use session::{SessionConfig, SessionError, StreamSession, rewrite_stream_url};
pub use tasks::TaskCounter;
