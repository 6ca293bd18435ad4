//! Response transmission

use crate::response::Response;
use std::io::Write;

/// Write a response body to the client connection
///
/// Returns whether the body was fully written. A failed write is logged
/// and never reported as a processing failure: the response is already
/// memoized and the client will retry.
pub fn transmit(response: &Response, out: &mut dyn Write) -> bool {
    match out.write_all(response.body()).and_then(|()| out.flush()) {
        Ok(()) => {
            tracing::trace!(status = response.status(), bytes = response.body().len(), "Response sent");
            true
        }
        Err(err) => {
            tracing::warn!(status = response.status(), %err, "Client went away before the response was sent");
            false
        }
    }
}
