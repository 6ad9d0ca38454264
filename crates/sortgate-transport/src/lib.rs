//! Link transport abstraction for sortgate.
//!
//! The lowest layer of the workspace: a [`Transport`] is a duplex byte link
//! that can bound the duration of a single read and drop pending input.
//! - [`SerialTransport`] wraps a physical serial port
//! - `UnixStream` implements [`Transport`] for local simulation and tests
//!
//! Everything above (line/exact reads, framing, the control loop) is built on
//! the [`Transport`] trait.

pub mod error;
pub mod serial;
pub mod traits;

pub use error::{Result, TransportError};
pub use serial::{available_ports, PortSummary, SerialTransport, DEFAULT_BAUD_RATE};
pub use traits::Transport;
