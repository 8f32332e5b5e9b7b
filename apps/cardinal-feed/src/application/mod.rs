//! Application Layer - Ports and session services.
//!
//! The session state machine and listen key lifecycle live here, written
//! against the port traits so they can be driven by any exchange adapter.

/// Port interfaces for transports, listen key sources and frame protocols.
pub mod ports;

/// Stream session and listen key services.
pub mod services;
