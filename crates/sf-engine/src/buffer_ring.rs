//! Buffer ring
//!
//! Fixed pool of native buffers cycling between a free list and the
//! backend's play queue. This is the producer/consumer boundary: the
//! fill worker acquires, fills and queues buffers; the backend drains
//! them; finished buffers are reclaimed back onto the free list.
//!
//! Invariant: `queued_len() + free_len() == capacity()` after every
//! operation (a buffer held by the caller between acquire and
//! submit/release is mid-transition).

use std::collections::VecDeque;
use std::sync::Arc;

use sf_audio::{AudioError, AudioResult, BufferId, PlaybackBackend, SourceId};
use sf_core::Sample;

pub struct BufferRing {
    backend: Arc<dyn PlaybackBackend>,
    source: SourceId,
    all: Vec<BufferId>,
    free: Vec<BufferId>,
    queued: VecDeque<BufferId>,
}

impl BufferRing {
    /// Allocate `capacity` native buffers for `source`. The capacity is
    /// fixed for the ring's lifetime.
    pub fn allocate(
        backend: Arc<dyn PlaybackBackend>,
        source: SourceId,
        capacity: usize,
    ) -> AudioResult<Self> {
        let all = backend.create_buffers(capacity)?;
        let free = all.clone();
        Ok(Self {
            backend,
            source,
            all,
            free,
            queued: VecDeque::with_capacity(capacity),
        })
    }

    pub fn capacity(&self) -> usize {
        self.all.len()
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// True when a buffer can be acquired without desync: either the
    /// free list is non-empty or the backend reports a processed buffer.
    pub fn can_acquire(&self) -> AudioResult<bool> {
        if !self.free.is_empty() {
            return Ok(true);
        }
        Ok(self.backend.processed_count(self.source)? > 0)
    }

    /// Take a buffer from the free list, or recycle the oldest processed
    /// buffer off the backend queue. Failing both is a caller bug
    /// (queue accounting desync), asserted in debug builds.
    pub fn acquire_or_recycle(&mut self) -> AudioResult<BufferId> {
        if let Some(id) = self.free.pop() {
            return Ok(id);
        }
        if self.backend.processed_count(self.source)? > 0 {
            if let Some(id) = self.backend.unqueue_buffer(self.source)? {
                debug_assert_eq!(self.queued.front(), Some(&id));
                self.queued.retain(|&q| q != id);
                return Ok(id);
            }
        }
        debug_assert!(false, "buffer accounting desync: no free or processed buffer");
        Err(AudioError::BackendCall(
            "buffer accounting desync: no free or processed buffer".into(),
        ))
    }

    /// Return an acquired but unfilled buffer to the free list.
    pub fn release(&mut self, id: BufferId) {
        self.free.push(id);
    }

    /// Copy PCM into the buffer and queue it on the playback source.
    pub fn submit(
        &mut self,
        id: BufferId,
        pcm: &[Sample],
        channels: u16,
        sample_rate: u32,
    ) -> AudioResult<()> {
        self.backend.write_buffer(id, pcm, channels, sample_rate)?;
        self.backend.queue_buffer(self.source, id)?;
        self.queued.push_back(id);
        Ok(())
    }

    /// Move every buffer the backend has finished playing back to the
    /// free list. Returns how many were reclaimed.
    pub fn reclaim_processed(&mut self) -> AudioResult<usize> {
        let mut count = 0;
        while self.backend.processed_count(self.source)? > 0 {
            match self.backend.unqueue_buffer(self.source)? {
                Some(id) => {
                    debug_assert_eq!(self.queued.front(), Some(&id));
                    self.queued.retain(|&q| q != id);
                    self.free.push(id);
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }

    /// Unqueue everything after the source has been stopped.
    pub fn clear(&mut self) -> AudioResult<()> {
        while let Some(id) = self.backend.unqueue_buffer(self.source)? {
            self.free.push(id);
        }
        self.queued.clear();
        debug_assert_eq!(self.free.len(), self.all.len());
        Ok(())
    }

    /// Release all native buffers. The ring is consumed; callers stop
    /// the source and `clear` first.
    pub fn destroy(self) -> AudioResult<()> {
        self.backend.destroy_buffers(&self.all)
    }
}
