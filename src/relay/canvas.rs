use serde::Serialize;
use std::collections::VecDeque;

/// The authoritative picture of a room, replayed to late joiners.
///
/// `history` is a bounded append-only log of the most recent full-canvas
/// pushes; the oldest entry is evicted once `limit` is reached.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
    pub image_data: String,
    pub history: VecDeque<String>,
    /// Index of the newest history entry, `-1` while the history is empty.
    pub history_index: i64,
    pub last_updated: i64,
    #[serde(skip)]
    limit: usize,
}

impl Canvas {
    pub const DEFAULT_WIDTH: u32 = 800;
    pub const DEFAULT_HEIGHT: u32 = 600;

    pub fn new(created_at: i64, limit: usize) -> Canvas {
        Canvas {
            width: Self::DEFAULT_WIDTH,
            height: Self::DEFAULT_HEIGHT,
            image_data: String::new(),
            history: VecDeque::with_capacity(limit),
            history_index: -1,
            last_updated: created_at,
            limit: limit.max(1),
        }
    }

    /// Records a full-canvas push.
    pub fn update(&mut self, image_data: String, now: i64) {
        if self.history.len() == self.limit {
            self.history.pop_front();
        }
        self.history.push_back(image_data.clone());
        self.image_data = image_data;
        self.history_index = self.history.len() as i64 - 1;
        self.last_updated = self.last_updated.max(now);
    }
}
