//! Serial camera capture and confidence-gated sorting control.
//!
//! sortgate talks to a camera peripheral over a serial link, receives
//! length-prefixed image frames, classifies them and drives sorting gates
//! when the classifier is confident enough.
//!
//! # Crate Structure
//!
//! - [`transport`]: serial link with per-operation timeouts
//! - [`frame`]: timed line/exact channel and the capture wire codec
//! - [`control`]: confidence gate, collaborators and the control loop

/// Re-export transport types.
pub mod transport {
    pub use sortgate_transport::*;
}

/// Re-export framing types.
pub mod frame {
    pub use sortgate_frame::*;
}

/// Re-export control loop types.
pub mod control {
    pub use sortgate_control::*;
}
