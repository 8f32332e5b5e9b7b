//! Domain Layer - Core streaming types.
//!
//! Pure types for market payloads, bus events, session lifecycle and listen
//! keys. Nothing here performs I/O.

/// Bus event envelopes.
pub mod events;

/// Listen key value type.
pub mod listen_key;

/// Exchange-neutral market payloads.
pub mod market;

/// Session state machine and exit reasons.
pub mod session;
