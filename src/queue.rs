// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Buffer queues of an M2M session and the manager the ioctl handlers forward to.

use enumn::N;
use nix::errno::Errno;
use thiserror::Error;

use crate::format::FormatDirection;

pub mod m2m;

/// Type of a buffer queue, with the values of `enum v4l2_buf_type`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, N)]
#[repr(u32)]
pub enum BufferType {
    VideoCapture = 1,
    VideoOutput = 2,
    VideoOverlay = 3,
    VbiCapture = 4,
    VbiOutput = 5,
    SlicedVbiCapture = 6,
    SlicedVbiOutput = 7,
    VideoOutputOverlay = 8,
    VideoCaptureMplane = 9,
    VideoOutputMplane = 10,
    SdrCapture = 11,
    SdrOutput = 12,
    MetaCapture = 13,
    MetaOutput = 14,
}

impl BufferType {
    pub fn is_multiplanar(self) -> bool {
        matches!(
            self,
            BufferType::VideoCaptureMplane | BufferType::VideoOutputMplane
        )
    }

    /// Side of the encoder a video queue feeds, `None` for non-video queues.
    pub fn direction(self) -> Option<FormatDirection> {
        match self {
            BufferType::VideoCapture | BufferType::VideoCaptureMplane => {
                Some(FormatDirection::Capture)
            }
            BufferType::VideoOutput | BufferType::VideoOutputMplane => {
                Some(FormatDirection::Output)
            }
            _ => None,
        }
    }
}

/// Memory backing of buffers, with the values of `enum v4l2_memory`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, N)]
#[repr(u32)]
pub enum MemoryType {
    Mmap = 1,
    UserPtr = 2,
    Overlay = 3,
    DmaBuf = 4,
}

/// Argument and result of `VIDIOC_REQBUFS`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RequestBuffers {
    pub type_: BufferType,
    pub memory: MemoryType,
    pub count: u32,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferPlane {
    pub bytesused: u32,
    pub length: u32,
    pub data_offset: u32,
}

/// Where a buffer currently is in its queue's lifecycle.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum BufferState {
    /// Owned by the client.
    #[default]
    Dequeued,
    /// Queued by the client, waiting for a job.
    Queued,
    /// Being processed by the hardware.
    Active,
    /// Processed, waiting to be dequeued.
    Done,
    /// Processing failed, waiting to be dequeued.
    Error,
}

/// Argument and result of the `VIDIOC_QUERYBUF`, `VIDIOC_QBUF` and `VIDIOC_DQBUF` ioctls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Buffer {
    pub index: u32,
    pub type_: BufferType,
    pub memory: MemoryType,
    pub planes: Vec<BufferPlane>,
    pub state: BufferState,
    pub sequence: u32,
    pub timestamp: u64,
}

impl Buffer {
    pub fn new(type_: BufferType, memory: MemoryType, index: u32) -> Self {
        Self {
            index,
            type_,
            memory,
            planes: Vec::new(),
            state: BufferState::Dequeued,
            sequence: 0,
            timestamp: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("buffer type {0:?} is not handled by this context")]
    InvalidBufferType(BufferType),
    #[error("buffer index {0} out of range")]
    InvalidIndex(u32),
    #[error("memory type {got:?} does not match the allocated {expected:?}")]
    InvalidMemory {
        expected: Option<MemoryType>,
        got: MemoryType,
    },
    #[error("buffer {0} is not owned by the client")]
    InvalidState(u32),
    #[error("too many planes: {0}")]
    TooManyPlanes(usize),
    #[error("no buffers have been allocated")]
    NoBuffers,
    #[error("queue is not streaming")]
    NotStreaming,
    #[error("queue is busy")]
    Busy,
    #[error("no buffer ready to be dequeued")]
    WouldBlock,
    #[error("no job is running")]
    NoJob,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl QueueError {
    pub fn errno(&self) -> Errno {
        match self {
            QueueError::Busy => Errno::EBUSY,
            QueueError::WouldBlock => Errno::EAGAIN,
            QueueError::Other(_) => Errno::EIO,
            _ => Errno::EINVAL,
        }
    }
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Buffer management of an M2M session.
///
/// The ioctl handlers forward the buffer ioctls to this trait without further validation, so an
/// implementation is responsible for all checks on the buffers it is given.
pub trait M2mBufferManager {
    /// Allocates `count` buffers on the queue of `type_`, or frees them all if `count` is 0.
    /// Returns the number of buffers actually allocated.
    fn reqbufs(&mut self, reqbufs: RequestBuffers) -> QueueResult<RequestBuffers>;

    fn querybuf(&self, type_: BufferType, index: u32) -> QueueResult<Buffer>;

    /// Hands `buffer` to the queue. The returned buffer reflects its updated state.
    fn qbuf(&mut self, buffer: Buffer) -> QueueResult<Buffer>;

    /// Returns the oldest processed buffer of the queue of `type_`, or
    /// [`QueueError::WouldBlock`] if there is none.
    fn dqbuf(&mut self, type_: BufferType, memory: MemoryType) -> QueueResult<Buffer>;

    fn streamon(&mut self, type_: BufferType) -> QueueResult<()>;

    fn streamoff(&mut self, type_: BufferType) -> QueueResult<()>;

    /// Whether the queue of `type_` has buffers allocated, `None` if this manager has no such
    /// queue.
    fn is_busy(&self, type_: BufferType) -> Option<bool>;
}
