//! Outbound queue for frames produced while the link is down.
//!
//! Strict FIFO across every message kind: no priorities, no dedup.
//! Flushing stops at the first frame the link refuses, and that frame goes
//! back to the head so the original order survives any number of
//! disconnect/reconnect cycles.

use std::collections::VecDeque;

use crate::protocol::Frame;

#[derive(Debug, Default)]
pub struct OutboundQueue {
    queue: VecDeque<Frame>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame.
    pub fn enqueue(&mut self, frame: Frame) {
        self.queue.push_back(frame);
    }

    /// Put frames that were handed to a dead link back at the head,
    /// ahead of anything queued since, keeping their relative order.
    pub fn requeue_front(&mut self, frames: Vec<Frame>) {
        for frame in frames.into_iter().rev() {
            self.queue.push_front(frame);
        }
    }

    /// Drain in order through `send`.
    ///
    /// `send` hands the frame back on failure; it is restored to the head
    /// and flushing stops. Returns the number of frames delivered.
    pub fn flush<F>(&mut self, mut send: F) -> usize
    where
        F: FnMut(Frame) -> Result<(), Frame>,
    {
        let mut sent = 0;
        while let Some(frame) = self.queue.pop_front() {
            if let Err(frame) = send(frame) {
                self.queue.push_front(frame);
                break;
            }
            sent += 1;
        }
        sent
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Total payload bytes queued.
    pub fn total_bytes(&self) -> usize {
        self.queue.iter().map(Frame::len).sum()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
