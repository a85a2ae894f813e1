//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the series fetch workflow and the port it drives the
//! transport session through.

/// Port interfaces for the transport session.
pub mod ports;

/// Series fetch workflows.
pub mod services;
