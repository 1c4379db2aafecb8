//! Pub/sub primitives: topics, notices, and the broadcast bus.

mod bus;
mod notice;
mod topic;

pub use bus::Bus;
pub use notice::Notice;
pub use topic::Topic;
