//! Server stream plumbing: SSE decoding, frame classification and the
//! single live connection.

pub mod classifier;
pub mod connection;
pub mod sse;

pub use classifier::{Classified, ControlEvent, ControlKind, DropReason, classify};
pub use connection::{SessionConnection, SessionHandle, StreamEvent, StreamUpdate, close_slot};
pub use sse::{Signal, SseDecoder, SseMessage};
