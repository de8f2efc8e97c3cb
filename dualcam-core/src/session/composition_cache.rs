use std::sync::Arc;

use crate::models::media::Frame;

/// The most recent front frame, kept to pair with the next back frame.
///
/// Holds zero or one frame. Storing replaces; nothing queues.
#[derive(Debug, Default)]
pub struct CompositionCache {
    front: Option<Arc<Frame>>,
}

impl CompositionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retain `frame`, returning the frame it replaced.
    pub fn store(&mut self, frame: Arc<Frame>) -> Option<Arc<Frame>> {
        self.front.replace(frame)
    }

    /// The cached frame, still retained for later pairings.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.front.clone()
    }

    pub fn clear(&mut self) {
        self.front = None;
    }

    pub fn is_empty(&self) -> bool {
        self.front.is_none()
    }
}
