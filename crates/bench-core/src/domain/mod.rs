//! Domain entities for the bench instrument bridge.
//!
//! This module contains pure business logic with no infrastructure dependencies.
//!
//! # What is "domain" in Clean Architecture? (for beginners)
//!
//! Clean Architecture organises code into concentric layers.  The innermost
//! layer is called the **domain** (or "entities" layer).  Domain code:
//!
//! - Contains the core business rules of the application.
//! - Has **no** imports from serial port drivers, message brokers, or network
//!   libraries.
//! - Can be compiled and tested on any platform without any external setup.
//!
//! Here the rules are: only one streaming mode may run at a time, switching
//! modes needs a close frame first, a one-shot sensor read must be followed by
//! a re-issue of the interrupted mode, and the telemetry backlog never grows
//! past a fixed bound.

/// Device state tracking, the core domain concept.
///
/// See [`device_state::DeviceStateTracker`] for the main type.
pub mod device_state;

/// Fixed-capacity FIFO that evicts its oldest element on overflow.
pub mod bounded_queue;

/// Persistence seam for device state snapshots.
pub mod store;
