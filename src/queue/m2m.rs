// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! In-memory M2M buffer manager.
//!
//! Keeps the OUTPUT and CAPTURE queues of a session and pairs their buffers into encode jobs.
//! The hardware side picks jobs with [`M2mQueues::next_job`] and reports completion with
//! [`M2mQueues::job_finish`]. When that happens on another thread than the ioctl handlers, share
//! the manager as a [`SharedM2mQueues`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::anyhow;

use crate::format::FormatDirection;
use crate::queue::Buffer;
use crate::queue::BufferPlane;
use crate::queue::BufferState;
use crate::queue::BufferType;
use crate::queue::M2mBufferManager;
use crate::queue::MemoryType;
use crate::queue::QueueError;
use crate::queue::QueueResult;
use crate::queue::RequestBuffers;
use crate::MAX_PLANES;

/// Maximum number of buffers a queue can hold.
pub const VIDEO_MAX_FRAME: u32 = 32;

pub struct BufferQueue {
    type_: BufferType,
    memory: Option<MemoryType>,
    buffers: Vec<Buffer>,
    /// Indices of buffers waiting for a job, oldest first.
    queued: VecDeque<u32>,
    /// Indices of processed buffers waiting to be dequeued, oldest first.
    done: VecDeque<u32>,
    streaming: bool,
    sequence: u32,
}

impl BufferQueue {
    pub fn new(type_: BufferType) -> Self {
        Self {
            type_,
            memory: None,
            buffers: Vec::new(),
            queued: VecDeque::new(),
            done: VecDeque::new(),
            streaming: false,
            sequence: 0,
        }
    }

    pub fn num_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_busy(&self) -> bool {
        !self.buffers.is_empty()
    }

    fn buffer_mut(&mut self, index: u32) -> QueueResult<&mut Buffer> {
        self.buffers
            .get_mut(index as usize)
            .ok_or(QueueError::InvalidIndex(index))
    }

    fn reqbufs(&mut self, memory: MemoryType, count: u32) -> QueueResult<u32> {
        if self.streaming {
            log::debug!("{:?}: reqbufs while streaming", self.type_);
            return Err(QueueError::Busy);
        }
        if self
            .buffers
            .iter()
            .any(|buf| buf.state != BufferState::Dequeued)
        {
            log::debug!("{:?}: reqbufs with buffers in use", self.type_);
            return Err(QueueError::Busy);
        }

        self.buffers.clear();
        self.queued.clear();
        self.done.clear();

        if count == 0 {
            self.memory = None;
            log::debug!("{:?}: buffers freed", self.type_);
            return Ok(0);
        }

        let count = count.min(VIDEO_MAX_FRAME);
        self.memory = Some(memory);
        self.buffers = (0..count)
            .map(|index| Buffer::new(self.type_, memory, index))
            .collect();
        log::debug!(
            "{:?}: {} {:?} buffers allocated",
            self.type_,
            count,
            memory
        );

        Ok(count)
    }

    fn querybuf(&self, index: u32) -> QueueResult<Buffer> {
        self.buffers
            .get(index as usize)
            .cloned()
            .ok_or(QueueError::InvalidIndex(index))
    }

    fn qbuf(&mut self, buffer: Buffer) -> QueueResult<Buffer> {
        if self.memory != Some(buffer.memory) {
            return Err(QueueError::InvalidMemory {
                expected: self.memory,
                got: buffer.memory,
            });
        }
        if buffer.planes.len() > MAX_PLANES {
            return Err(QueueError::TooManyPlanes(buffer.planes.len()));
        }

        let index = buffer.index;
        let slot = self.buffer_mut(index)?;
        if slot.state != BufferState::Dequeued {
            return Err(QueueError::InvalidState(index));
        }

        slot.planes = buffer.planes;
        slot.timestamp = buffer.timestamp;
        slot.state = BufferState::Queued;
        let queued = slot.clone();
        self.queued.push_back(index);

        log::trace!("{:?}: buffer {} queued", self.type_, index);
        Ok(queued)
    }

    fn dqbuf(&mut self, memory: MemoryType) -> QueueResult<Buffer> {
        if self.memory != Some(memory) {
            return Err(QueueError::InvalidMemory {
                expected: self.memory,
                got: memory,
            });
        }
        if !self.streaming {
            return Err(QueueError::NotStreaming);
        }

        let index = self.done.pop_front().ok_or(QueueError::WouldBlock)?;
        let slot = self.buffer_mut(index)?;
        let dequeued = slot.clone();
        slot.state = BufferState::Dequeued;

        log::trace!("{:?}: buffer {} dequeued", self.type_, index);
        Ok(dequeued)
    }

    fn streamon(&mut self) -> QueueResult<()> {
        if self.streaming {
            return Ok(());
        }
        if self.buffers.is_empty() {
            return Err(QueueError::NoBuffers);
        }

        self.streaming = true;
        self.sequence = 0;
        log::debug!("{:?}: stream on", self.type_);
        Ok(())
    }

    fn streamoff(&mut self) {
        self.streaming = false;
        self.queued.clear();
        self.done.clear();
        for buffer in self.buffers.iter_mut() {
            buffer.state = BufferState::Dequeued;
        }
        log::debug!("{:?}: stream off", self.type_);
    }

    /// Takes the oldest queued buffer for processing.
    fn activate_next(&mut self) -> Option<u32> {
        let index = self.queued.pop_front()?;
        if let Some(buffer) = self.buffers.get_mut(index as usize) {
            buffer.state = BufferState::Active;
        }
        Some(index)
    }

    fn complete(&mut self, index: u32, state: BufferState) -> QueueResult<&mut Buffer> {
        let buffer = self
            .buffers
            .get_mut(index as usize)
            .ok_or(QueueError::InvalidIndex(index))?;
        if buffer.state != BufferState::Active {
            return Err(QueueError::InvalidState(index));
        }

        buffer.state = state;
        buffer.sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        self.done.push_back(index);
        Ok(buffer)
    }
}

/// An encode job: one OUTPUT buffer to be compressed into one CAPTURE buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct M2mJob {
    /// Index of the OUTPUT (raw) buffer.
    pub src: u32,
    /// Index of the CAPTURE (JPEG) buffer.
    pub dst: u32,
}

/// Outcome of an encode job reported by the hardware.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JobResult {
    /// The CAPTURE buffer holds an image of the given size.
    Done { bytesused: u32 },
    Error,
}

pub struct M2mQueues {
    output: BufferQueue,
    capture: BufferQueue,
    running: Option<M2mJob>,
}

impl Default for M2mQueues {
    fn default() -> Self {
        Self::new()
    }
}

impl M2mQueues {
    pub fn new() -> Self {
        Self {
            output: BufferQueue::new(BufferType::VideoOutputMplane),
            capture: BufferQueue::new(BufferType::VideoCaptureMplane),
            running: None,
        }
    }

    /// Returns the queue of `type_`, matched by direction the way V4L2 M2M contexts do.
    pub fn get_vq(&self, type_: BufferType) -> Option<&BufferQueue> {
        match type_ {
            BufferType::VideoOutput | BufferType::VideoOutputMplane => Some(&self.output),
            BufferType::VideoCapture | BufferType::VideoCaptureMplane => Some(&self.capture),
            _ => None,
        }
    }

    fn get_vq_mut(&mut self, type_: BufferType) -> QueueResult<&mut BufferQueue> {
        let queue = match type_ {
            BufferType::VideoOutput | BufferType::VideoOutputMplane => &mut self.output,
            BufferType::VideoCapture | BufferType::VideoCaptureMplane => &mut self.capture,
            _ => return Err(QueueError::InvalidBufferType(type_)),
        };
        if queue.type_ != type_ {
            return Err(QueueError::InvalidBufferType(type_));
        }
        Ok(queue)
    }

    pub fn running_job(&self) -> Option<M2mJob> {
        self.running
    }

    /// Starts a new job if none is running, both queues are streaming and each has a queued
    /// buffer.
    pub fn next_job(&mut self) -> Option<M2mJob> {
        if self.running.is_some() {
            return None;
        }
        if !self.output.streaming || !self.capture.streaming {
            return None;
        }
        if self.output.queued.is_empty() || self.capture.queued.is_empty() {
            return None;
        }

        let src = self.output.activate_next()?;
        let dst = self.capture.activate_next()?;
        let job = M2mJob { src, dst };
        log::debug!("job started: {:?}", job);
        self.running = Some(job);
        Some(job)
    }

    /// Completes the running job, making both of its buffers available to dequeue.
    pub fn job_finish(&mut self, result: JobResult) -> QueueResult<M2mJob> {
        let job = self.running.take().ok_or(QueueError::NoJob)?;
        let state = match result {
            JobResult::Done { .. } => BufferState::Done,
            JobResult::Error => BufferState::Error,
        };

        let src = self.output.complete(job.src, state)?;
        let timestamp = src.timestamp;

        let dst = self.capture.complete(job.dst, state)?;
        dst.timestamp = timestamp;
        if let JobResult::Done { bytesused } = result {
            match dst.planes.first_mut() {
                Some(plane) => plane.bytesused = bytesused,
                None => dst.planes.push(BufferPlane {
                    bytesused,
                    ..Default::default()
                }),
            }
        }

        log::debug!("job finished: {:?} ({:?})", job, result);
        Ok(job)
    }
}

impl M2mBufferManager for M2mQueues {
    fn reqbufs(&mut self, reqbufs: RequestBuffers) -> QueueResult<RequestBuffers> {
        let queue = self.get_vq_mut(reqbufs.type_)?;
        let count = queue.reqbufs(reqbufs.memory, reqbufs.count)?;
        Ok(RequestBuffers { count, ..reqbufs })
    }

    fn querybuf(&self, type_: BufferType, index: u32) -> QueueResult<Buffer> {
        match self.get_vq(type_) {
            Some(queue) if queue.type_ == type_ => queue.querybuf(index),
            _ => Err(QueueError::InvalidBufferType(type_)),
        }
    }

    fn qbuf(&mut self, buffer: Buffer) -> QueueResult<Buffer> {
        self.get_vq_mut(buffer.type_)?.qbuf(buffer)
    }

    fn dqbuf(&mut self, type_: BufferType, memory: MemoryType) -> QueueResult<Buffer> {
        self.get_vq_mut(type_)?.dqbuf(memory)
    }

    fn streamon(&mut self, type_: BufferType) -> QueueResult<()> {
        self.get_vq_mut(type_)?.streamon()
    }

    fn streamoff(&mut self, type_: BufferType) -> QueueResult<()> {
        self.get_vq_mut(type_)?.streamoff();
        // The buffers of a running job were just returned to the client.
        if let Some(job) = self.running.take() {
            log::debug!("job {:?} cancelled by stream off", job);
            let (other, index) = match type_.direction() {
                Some(FormatDirection::Output) => (&mut self.capture, job.dst),
                _ => (&mut self.output, job.src),
            };
            if let Some(buffer) = other.buffers.get_mut(index as usize) {
                buffer.state = BufferState::Queued;
                other.queued.push_front(index);
            }
        }
        Ok(())
    }

    fn is_busy(&self, type_: BufferType) -> Option<bool> {
        self.get_vq(type_).map(BufferQueue::is_busy)
    }
}

/// [`M2mQueues`] shared between the ioctl handlers and the hardware completion path.
pub type SharedM2mQueues = Arc<Mutex<M2mQueues>>;

fn lock(queues: &SharedM2mQueues) -> QueueResult<std::sync::MutexGuard<'_, M2mQueues>> {
    queues
        .lock()
        .map_err(|_| QueueError::Other(anyhow!("M2M queues lock poisoned")))
}

impl M2mBufferManager for SharedM2mQueues {
    fn reqbufs(&mut self, reqbufs: RequestBuffers) -> QueueResult<RequestBuffers> {
        lock(self)?.reqbufs(reqbufs)
    }

    fn querybuf(&self, type_: BufferType, index: u32) -> QueueResult<Buffer> {
        lock(self)?.querybuf(type_, index)
    }

    fn qbuf(&mut self, buffer: Buffer) -> QueueResult<Buffer> {
        lock(self)?.qbuf(buffer)
    }

    fn dqbuf(&mut self, type_: BufferType, memory: MemoryType) -> QueueResult<Buffer> {
        lock(self)?.dqbuf(type_, memory)
    }

    fn streamon(&mut self, type_: BufferType) -> QueueResult<()> {
        lock(self)?.streamon(type_)
    }

    fn streamoff(&mut self, type_: BufferType) -> QueueResult<()> {
        lock(self)?.streamoff(type_)
    }

    fn is_busy(&self, type_: BufferType) -> Option<bool> {
        match self.lock() {
            Ok(queues) => queues.is_busy(type_),
            Err(_) => {
                log::error!("M2M queues lock poisoned");
                None
            }
        }
    }
}
