//! Stream bridges — translate internal run events into the line-framed
//! SSE records of the two external dialects.
//!
//! Both bridges are pure translators: they never block, never subscribe,
//! and terminate deterministically on any terminal run event. The API
//! layer feeds them events and writes the frames out.

pub mod block;
pub mod chunk;

pub use block::BlockBridge;
pub use chunk::ChunkBridge;

/// One SSE record: an optional `event:` name and the `data:` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    pub event: Option<&'static str>,
    pub data: String,
}

impl SseFrame {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    pub fn named(event: &'static str, data: impl Into<String>) -> Self {
        Self {
            event: Some(event),
            data: data.into(),
        }
    }
}
