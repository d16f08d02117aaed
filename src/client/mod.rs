//! Client side of a session: the mirror, the synchronization controller
//! and the transports it talks through.

mod controller;
mod http;
mod mirror;
mod transport;

pub use controller::{ClientView, DEFAULT_MOVE_TIMEOUT, Pending, SyncController};
pub use http::{HttpTransport, SseDecoder};
pub use mirror::{ClientMirror, Reconciled, reconcile};
pub use transport::{LocalTransport, SessionTransport, TransportError};
pub(crate) use transport::push_stream;
