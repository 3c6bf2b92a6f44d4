// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Conversions between this crate's types and the ones of `v4l2r`, for hosts that receive ioctls
//! as V4L2 structures.

use v4l2r::PixelFormat;
use v4l2r::PlaneLayout;
use v4l2r::QueueType;

use crate::format::PlaneFormat;
use crate::queue::BufferType;
use crate::queue::MemoryType;
use crate::Fourcc;

impl From<Fourcc> for PixelFormat {
    fn from(fourcc: Fourcc) -> Self {
        PixelFormat::from_u32(u32::from(fourcc))
    }
}

impl From<PixelFormat> for Fourcc {
    fn from(format: PixelFormat) -> Self {
        Fourcc::from(u32::from(format))
    }
}

// Both enums carry the values of `enum v4l2_buf_type`.
impl TryFrom<QueueType> for BufferType {
    type Error = u32;

    fn try_from(queue: QueueType) -> Result<Self, Self::Error> {
        BufferType::n(queue as u32).ok_or(queue as u32)
    }
}

impl TryFrom<BufferType> for QueueType {
    type Error = BufferType;

    fn try_from(type_: BufferType) -> Result<Self, Self::Error> {
        QueueType::n(type_ as u32).ok_or(type_)
    }
}

impl TryFrom<v4l2r::memory::MemoryType> for MemoryType {
    type Error = u32;

    fn try_from(memory: v4l2r::memory::MemoryType) -> Result<Self, Self::Error> {
        MemoryType::n(memory as u32).ok_or(memory as u32)
    }
}

impl From<PlaneFormat> for PlaneLayout {
    fn from(plane: PlaneFormat) -> Self {
        PlaneLayout {
            sizeimage: plane.sizeimage,
            bytesperline: plane.bytesperline,
        }
    }
}

impl From<&PlaneLayout> for PlaneFormat {
    fn from(layout: &PlaneLayout) -> Self {
        PlaneFormat {
            sizeimage: layout.sizeimage,
            bytesperline: layout.bytesperline,
        }
    }
}
