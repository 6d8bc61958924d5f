//! chat-services — the concurrent, long-lived runtime building blocks
//! shared between the receive loop and the packet handlers: the session
//! table (C2), the deferred-write queue, the retry dispatcher (C9), and
//! the broadcast gate (C11).

pub mod broadcast;
pub mod deferred;
pub mod dispatcher;
pub mod session;

pub use deferred::{DeferredReceiver, DeferredSender, DeferredWrite};
pub use dispatcher::RetryDispatcher;
pub use session::{SessionEntry, SessionTable};
