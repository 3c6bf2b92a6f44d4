// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Device and per-session state of the encoder.

use std::sync::Arc;

use crate::format::ColorFormat;
use crate::format::JpegFormat;
use crate::format::PlaneFormat;
use crate::ioctl::IoctlError;
use crate::ioctl::IoctlResult;
use crate::queue::BufferType;
use crate::queue::M2mBufferManager;
use crate::Fourcc;
use crate::MAX_PLANES;

/// Static configuration of an encoder device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JpegDevConfig {
    /// Name reported as driver and card by `VIDIOC_QUERYCAP`.
    pub name: String,
    /// Compression quality of a newly opened session.
    pub default_quality: i32,
}

impl Default for JpegDevConfig {
    fn default() -> Self {
        Self {
            name: String::from("jpeg-hx-enc"),
            default_quality: 0,
        }
    }
}

/// The encoder device, shared by all of its sessions.
#[derive(Debug)]
pub struct JpegDev {
    config: JpegDevConfig,
}

impl JpegDev {
    pub fn new(config: JpegDevConfig) -> Self {
        Self { config }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &JpegDevConfig {
        &self.config
    }
}

/// Parameters programmed into the hardware for an encode.
///
/// `in_*` describe the raw frames of the OUTPUT queue, `out_*` the JPEG images of the CAPTURE
/// queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncParam {
    pub in_width: u32,
    pub in_height: u32,
    pub in_plane: usize,
    pub in_depth: [u32; MAX_PLANES],
    pub in_fmt: ColorFormat,

    pub out_width: u32,
    pub out_height: u32,
    pub out_plane: usize,
    pub out_depth: u32,
    pub out_fmt: ColorFormat,

    pub quality: i32,
}

/// Format negotiated on one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub jpeg_fmt: Option<&'static JpegFormat>,
    pub width: u32,
    pub height: u32,
    pub pixelformat: Fourcc,
    /// Plane layout accepted by the last successful S_FMT.
    pub plane_fmt: [PlaneFormat; MAX_PLANES],
}

/// State of one open instance of the encoder.
pub struct JpegCtx {
    dev: Arc<JpegDev>,
    pub(crate) param: EncParam,
    /// Size of each plane of the last format set, on either queue.
    pub(crate) payload: [u32; MAX_PLANES],
    cap_frame: Frame,
    out_frame: Frame,
    pub(crate) m2m_ctx: Box<dyn M2mBufferManager + Send>,
}

impl JpegCtx {
    pub fn new(dev: Arc<JpegDev>, m2m_ctx: Box<dyn M2mBufferManager + Send>) -> Self {
        let param = EncParam {
            quality: dev.config().default_quality,
            ..Default::default()
        };
        log::debug!("{}: new session", dev.name());

        Self {
            dev,
            param,
            payload: [0; MAX_PLANES],
            cap_frame: Default::default(),
            out_frame: Default::default(),
            m2m_ctx,
        }
    }

    pub fn dev(&self) -> &JpegDev {
        &self.dev
    }

    pub fn param(&self) -> &EncParam {
        &self.param
    }

    pub fn payload(&self) -> &[u32; MAX_PLANES] {
        &self.payload
    }

    pub fn m2m_ctx(&self) -> &dyn M2mBufferManager {
        self.m2m_ctx.as_ref()
    }

    /// Returns the frame of the queue of `type_`.
    pub fn frame(&self, type_: BufferType) -> IoctlResult<&Frame> {
        match type_ {
            BufferType::VideoOutput | BufferType::VideoOutputMplane => Ok(&self.out_frame),
            BufferType::VideoCapture | BufferType::VideoCaptureMplane => Ok(&self.cap_frame),
            _ => {
                log::error!("{}: no frame for queue type ({:?})", self.dev.name(), type_);
                Err(IoctlError::NoFrame(type_))
            }
        }
    }

    pub(crate) fn frame_mut(&mut self, type_: BufferType) -> IoctlResult<&mut Frame> {
        match type_ {
            BufferType::VideoOutput | BufferType::VideoOutputMplane => Ok(&mut self.out_frame),
            BufferType::VideoCapture | BufferType::VideoCaptureMplane => Ok(&mut self.cap_frame),
            _ => {
                log::error!("{}: no frame for queue type ({:?})", self.dev.name(), type_);
                Err(IoctlError::NoFrame(type_))
            }
        }
    }
}
