//! Interpreter sessions.
//!
//! Provides:
//! - `Session` - Host lifecycle, request arbitration and cancellation
//! - `EvaluationHandle` / `InteractionHandle` - The two mutually exclusive request kinds
//! - `SessionManager` - Sessions of one connector keyed by id

pub mod manager;
pub mod request;
pub mod session;

pub use manager::SessionManager;
pub use request::{EvaluationHandle, InteractionHandle};
pub use session::{Session, SessionOptions};
