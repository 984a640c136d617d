//! Live WebSocket redaction.

mod session;
mod socket;

pub use session::{decode_frame_payload, LiveError, LiveSession, SessionStats, LIVE_ENDPOINT};
pub use socket::blur_live;
