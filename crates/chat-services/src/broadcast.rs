//! Broadcast gate (C11) — fans a payload out to a set of live sessions by
//! enqueueing one retry task per recipient into the dispatcher (C9).

use serde_json::Value;

use crate::dispatcher::RetryDispatcher;
use crate::session::SessionTable;

/// Enqueues `payload` for every session in `session_ids`, or for every live
/// session if `session_ids` is `None`. Non-live sessions are silently
/// skipped by the dispatcher's own `enqueue`, consistent with the cleanup
/// policy: a session that was just evicted should not resurrect itself by
/// virtue of a broadcast still in flight.
pub fn broadcast(dispatcher: &RetryDispatcher, sessions: &SessionTable, payload: Value, session_ids: Option<&[String]>) {
    match session_ids {
        Some(ids) => {
            for session_id in ids {
                dispatcher.enqueue(session_id, payload.clone());
            }
        }
        None => {
            for session_id in sessions.all_session_ids() {
                dispatcher.enqueue(&session_id, payload.clone());
            }
        }
    }
}
