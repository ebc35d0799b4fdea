//! Data models for mentorchat

mod ids;
mod message;
mod presence;
mod room;

pub use ids::*;
pub use message::*;
pub use presence::*;
pub use room::*;

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
