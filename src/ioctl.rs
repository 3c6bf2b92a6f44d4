// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Ioctl handlers of the encoder and the table they are registered through.

use nix::errno::Errno;
use thiserror::Error;

use crate::context::JpegCtx;
use crate::format::find_format;
use crate::format::formats_for;
use crate::format::Field;
use crate::format::Format;
use crate::format::FormatDirection;
use crate::format::JpegFormat;
use crate::format::PixFormatMplane;
use crate::queue::Buffer;
use crate::queue::BufferType;
use crate::queue::MemoryType;
use crate::queue::QueueError;
use crate::queue::RequestBuffers;
use crate::Fourcc;
use crate::Resolution;
use crate::MAX_PLANES;

pub const CAP_VIDEO_CAPTURE: u32 = 0x0000_0001;
pub const CAP_VIDEO_OUTPUT: u32 = 0x0000_0002;
pub const CAP_VIDEO_CAPTURE_MPLANE: u32 = 0x0000_1000;
pub const CAP_VIDEO_OUTPUT_MPLANE: u32 = 0x0000_2000;
pub const CAP_STREAMING: u32 = 0x0400_0000;

pub const FMT_FLAG_COMPRESSED: u32 = 0x0001;

const V4L2_CID_BASE: u32 = 0x0098_0900;
const V4L2_CID_LASTP1: u32 = V4L2_CID_BASE + 43;
/// Vendor control selecting cacheable buffer mappings.
pub const CID_CACHEABLE: u32 = V4L2_CID_LASTP1 + 1;

/// Driver version reported by `VIDIOC_QUERYCAP`, encoded as `KERNEL_VERSION(1, 0, 0)`.
pub const DRIVER_VERSION: u32 = 1 << 16;

/// Sizes of the string fields of `struct v4l2_capability` and `struct v4l2_fmtdesc`.
const CAP_NAME_LEN: usize = 16;
const FMT_DESC_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum IoctlError {
    #[error("wrong buffer/video queue type ({0:?})")]
    InvalidBufferType(BufferType),
    #[error("fourcc format ({0:?}) invalid")]
    UnknownFourcc(Fourcc),
    #[error("field order {0:?} not supported")]
    UnsupportedField(Field),
    #[error("no frame for queue type {0:?}")]
    NoFrame(BufferType),
    #[error("no queue of type {0:?}")]
    NoQueue(BufferType),
    #[error("queue ({0:?}) busy")]
    Busy(BufferType),
    #[error("index {0} out of range")]
    InvalidIndex(u32),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl IoctlError {
    /// The error code returned to the caller of the ioctl.
    pub fn errno(&self) -> Errno {
        match self {
            IoctlError::Busy(_) => Errno::EBUSY,
            IoctlError::Queue(e) => e.errno(),
            _ => Errno::EINVAL,
        }
    }
}

pub type IoctlResult<T> = std::result::Result<T, IoctlError>;

/// Result of `VIDIOC_QUERYCAP`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub driver: String,
    pub card: String,
    pub bus_info: String,
    pub version: u32,
    pub capabilities: u32,
}

/// Result of `VIDIOC_ENUM_FMT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FmtDesc {
    pub index: u32,
    pub type_: BufferType,
    pub flags: u32,
    pub description: String,
    pub pixelformat: Fourcc,
}

/// Argument of `VIDIOC_G_JPEGCOMP` and `VIDIOC_S_JPEGCOMP`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JpegCompression {
    pub quality: i32,
}

/// Argument of `VIDIOC_S_CTRL`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Control {
    pub id: u32,
    pub value: i32,
}

/// Truncates `s` so it fits a NUL-terminated field of `len` bytes.
fn truncate_name(s: &str, len: usize) -> String {
    let mut end = s.len().min(len - 1);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

pub fn querycap(ctx: &JpegCtx) -> IoctlResult<Capability> {
    let name = truncate_name(ctx.dev().name(), CAP_NAME_LEN);

    Ok(Capability {
        driver: name.clone(),
        card: name,
        bus_info: String::new(),
        version: DRIVER_VERSION,
        capabilities: CAP_STREAMING
            | CAP_VIDEO_CAPTURE
            | CAP_VIDEO_OUTPUT
            | CAP_VIDEO_CAPTURE_MPLANE
            | CAP_VIDEO_OUTPUT_MPLANE,
    })
}

/// Logs and returns the error for a queue type the encoder has no handler for.
fn invalid_buffer_type(ctx: &JpegCtx, type_: BufferType) -> IoctlError {
    log::error!(
        "{}: wrong buffer/video queue type ({:?})",
        ctx.dev().name(),
        type_
    );
    IoctlError::InvalidBufferType(type_)
}

/// Returns the `index`th format of the direction of `type_`.
///
/// Only formats native to the queue's direction are listed, while [`try_fmt`] and the set-format
/// handlers accept any format of the table on either queue.
pub fn enum_fmt(ctx: &JpegCtx, type_: BufferType, index: u32) -> IoctlResult<FmtDesc> {
    let direction = type_
        .direction()
        .ok_or_else(|| invalid_buffer_type(ctx, type_))?;
    let fmt = formats_for(direction)
        .nth(index as usize)
        .ok_or(IoctlError::InvalidIndex(index))?;

    Ok(FmtDesc {
        index,
        type_,
        flags: if direction.is_compressed() {
            FMT_FLAG_COMPRESSED
        } else {
            0
        },
        description: truncate_name(fmt.name, FMT_DESC_LEN),
        pixelformat: fmt.fourcc,
    })
}

/// Returns the format last set on the queue of `type_`, with the plane layout stored by it.
pub fn g_fmt(ctx: &JpegCtx, type_: BufferType) -> IoctlResult<Format> {
    let frame = ctx.frame(type_)?;
    let num_planes = match type_.direction() {
        Some(FormatDirection::Output) => ctx.param().in_plane,
        _ => ctx.param().out_plane,
    };

    Ok(Format {
        type_,
        pix_mp: PixFormatMplane {
            width: frame.width,
            height: frame.height,
            pixelformat: frame.pixelformat,
            field: Field::None,
            plane_fmt: frame.plane_fmt,
            num_planes: num_planes.min(MAX_PLANES) as u8,
        },
    })
}

/// Adjusts `format` to a layout the encoder supports.
///
/// Dimensions are clamped to the encoder limits and missing line and image sizes are filled in.
/// Nothing is stored in `ctx`.
pub fn try_fmt(ctx: &JpegCtx, mut format: Format) -> IoctlResult<Format> {
    if !format.type_.is_multiplanar() {
        return Err(invalid_buffer_type(ctx, format.type_));
    }

    let pix = &mut format.pix_mp;
    let fmt = match find_format(pix.pixelformat) {
        Some(fmt) => fmt,
        None => {
            log::error!(
                "{}: Fourcc format ({:?}) invalid.",
                ctx.dev().name(),
                pix.pixelformat
            );
            return Err(IoctlError::UnknownFourcc(pix.pixelformat));
        }
    };

    match pix.field {
        Field::Any => pix.field = Field::None,
        Field::None => (),
        field => {
            log::error!(
                "{}: field order ({:?}) not supported",
                ctx.dev().name(),
                field
            );
            return Err(IoctlError::UnsupportedField(field));
        }
    }

    let res = Resolution::from((pix.width, pix.height)).clamp_to_max();
    pix.width = res.width;
    pix.height = res.height;

    pix.num_planes = fmt.memplanes as u8;
    for (i, plane) in pix.plane_fmt.iter_mut().enumerate() {
        if i >= fmt.memplanes {
            *plane = Default::default();
            continue;
        }

        let depth = fmt.depth[i];
        log::debug!(
            "[{}] bpl: {}, depth: {}, w: {}, h: {}",
            i,
            plane.bytesperline,
            depth,
            pix.width,
            pix.height
        );

        let bpl = plane.bytesperline as u64;
        let bpl = if bpl == 0 || bpl * 8 / depth as u64 > pix.width as u64 {
            pix.width as u64 * depth as u64 / 8
        } else {
            bpl
        };
        // Clamped dimensions keep both values well within u32.
        plane.bytesperline = bpl as u32;

        if plane.sizeimage == 0 {
            plane.sizeimage = (pix.height as u64 * bpl) as u32;
        }

        log::debug!(
            "[{}]: bpl: {}, sizeimage: {}",
            i,
            plane.bytesperline,
            plane.sizeimage
        );
    }

    Ok(format)
}

/// Validates `format` and checks its queue can be reconfigured, returning the validated format.
fn prepare_s_fmt(ctx: &JpegCtx, format: Format) -> IoctlResult<Format> {
    let format = try_fmt(ctx, format)?;

    let busy = ctx
        .m2m_ctx()
        .is_busy(format.type_)
        .ok_or(IoctlError::NoQueue(format.type_))?;
    if busy {
        log::error!("{}: queue ({:?}) busy", ctx.dev().name(), format.type_);
        return Err(IoctlError::Busy(format.type_));
    }

    Ok(format)
}

/// Stores `format` into the frame of its queue and updates the plane payloads.
fn commit_frame(ctx: &mut JpegCtx, format: &Format) -> IoctlResult<&'static JpegFormat> {
    let pix = &format.pix_mp;
    let fmt = match find_format(pix.pixelformat) {
        Some(fmt) => fmt,
        None => {
            log::error!("{}: not supported format values", ctx.dev().name());
            return Err(IoctlError::UnknownFourcc(pix.pixelformat));
        }
    };

    let frame = ctx.frame_mut(format.type_)?;
    frame.jpeg_fmt = Some(fmt);
    frame.width = pix.width;
    frame.height = pix.height;
    frame.pixelformat = pix.pixelformat;
    frame.plane_fmt = pix.plane_fmt;

    for i in 0..fmt.memplanes {
        ctx.payload[i] = pix.plane_fmt[i].bytesperline * pix.height;
    }

    Ok(fmt)
}

/// Sets the format of the CAPTURE queue, i.e. of the produced JPEG images.
pub fn s_fmt_cap(ctx: &mut JpegCtx, format: Format) -> IoctlResult<Format> {
    let format = prepare_s_fmt(ctx, format)?;
    let fmt = commit_frame(ctx, &format)?;

    let pix = &format.pix_mp;
    let param = &mut ctx.param;
    // The hardware parameters take the dimensions swapped on this queue.
    param.out_width = pix.height;
    param.out_height = pix.width;
    param.out_plane = fmt.memplanes;
    param.out_depth = fmt.depth[0];
    param.out_fmt = fmt.color;

    log::debug!(
        "{}: CAPTURE format set to {} {}x{}",
        ctx.dev().name(),
        pix.pixelformat,
        pix.width,
        pix.height
    );
    Ok(format)
}

/// Sets the format of the OUTPUT queue, i.e. of the raw frames to encode.
pub fn s_fmt_out(ctx: &mut JpegCtx, format: Format) -> IoctlResult<Format> {
    let format = prepare_s_fmt(ctx, format)?;
    let fmt = commit_frame(ctx, &format)?;

    let pix = &format.pix_mp;
    let param = &mut ctx.param;
    // TODO: the hardware needs even dimensions, round them here once it is known whether up or
    // down is expected by clients.
    param.in_width = pix.width;
    param.in_height = pix.height;
    param.in_plane = fmt.memplanes;
    param.in_depth[..fmt.memplanes].copy_from_slice(&fmt.depth[..fmt.memplanes]);
    param.in_fmt = fmt.color;

    log::debug!(
        "{}: OUTPUT format set to {} {}x{}",
        ctx.dev().name(),
        pix.pixelformat,
        pix.width,
        pix.height
    );
    Ok(format)
}

pub fn reqbufs(ctx: &mut JpegCtx, reqbufs: RequestBuffers) -> IoctlResult<RequestBuffers> {
    log::trace!("reqbufs {:?}", reqbufs);
    Ok(ctx.m2m_ctx.reqbufs(reqbufs)?)
}

pub fn querybuf(ctx: &mut JpegCtx, type_: BufferType, index: u32) -> IoctlResult<Buffer> {
    log::trace!("querybuf {:?} {}", type_, index);
    Ok(ctx.m2m_ctx.querybuf(type_, index)?)
}

pub fn qbuf(ctx: &mut JpegCtx, buffer: Buffer) -> IoctlResult<Buffer> {
    log::trace!("qbuf {:?} {}", buffer.type_, buffer.index);
    Ok(ctx.m2m_ctx.qbuf(buffer)?)
}

pub fn dqbuf(ctx: &mut JpegCtx, type_: BufferType, memory: MemoryType) -> IoctlResult<Buffer> {
    log::trace!("dqbuf {:?}", type_);
    Ok(ctx.m2m_ctx.dqbuf(type_, memory)?)
}

pub fn streamon(ctx: &mut JpegCtx, type_: BufferType) -> IoctlResult<()> {
    log::trace!("streamon {:?}", type_);
    Ok(ctx.m2m_ctx.streamon(type_)?)
}

pub fn streamoff(ctx: &mut JpegCtx, type_: BufferType) -> IoctlResult<()> {
    log::trace!("streamoff {:?}", type_);
    Ok(ctx.m2m_ctx.streamoff(type_)?)
}

pub fn g_jpegcomp(ctx: &JpegCtx) -> IoctlResult<JpegCompression> {
    Ok(JpegCompression {
        quality: ctx.param.quality,
    })
}

/// Stores the requested quality as is; the hardware interprets out of range values.
pub fn s_jpegcomp(ctx: &mut JpegCtx, jpegcomp: JpegCompression) -> IoctlResult<()> {
    ctx.param.quality = jpegcomp.quality;
    Ok(())
}

/// No control can be set on the encoder. The request is logged and ignored.
pub fn s_ctrl(ctx: &mut JpegCtx, ctrl: Control) -> IoctlResult<()> {
    match ctrl.id {
        CID_CACHEABLE => log::error!(
            "{}: Invalid control : 'cacheable' set is not available",
            ctx.dev().name()
        ),
        id => log::error!("{}: Invalid control 0x{:08x}", ctx.dev().name(), id),
    }

    Ok(())
}

/// Handlers of the ioctls supported by the encoder.
pub struct IoctlOps {
    pub querycap: fn(&JpegCtx) -> IoctlResult<Capability>,

    pub enum_fmt_vid_cap_mplane: fn(&JpegCtx, BufferType, u32) -> IoctlResult<FmtDesc>,
    pub enum_fmt_vid_out_mplane: fn(&JpegCtx, BufferType, u32) -> IoctlResult<FmtDesc>,

    pub g_fmt_vid_cap_mplane: fn(&JpegCtx, BufferType) -> IoctlResult<Format>,
    pub g_fmt_vid_out_mplane: fn(&JpegCtx, BufferType) -> IoctlResult<Format>,

    pub try_fmt_vid_cap_mplane: fn(&JpegCtx, Format) -> IoctlResult<Format>,
    pub try_fmt_vid_out_mplane: fn(&JpegCtx, Format) -> IoctlResult<Format>,
    pub s_fmt_vid_cap_mplane: fn(&mut JpegCtx, Format) -> IoctlResult<Format>,
    pub s_fmt_vid_out_mplane: fn(&mut JpegCtx, Format) -> IoctlResult<Format>,

    pub reqbufs: fn(&mut JpegCtx, RequestBuffers) -> IoctlResult<RequestBuffers>,
    pub querybuf: fn(&mut JpegCtx, BufferType, u32) -> IoctlResult<Buffer>,
    pub qbuf: fn(&mut JpegCtx, Buffer) -> IoctlResult<Buffer>,
    pub dqbuf: fn(&mut JpegCtx, BufferType, MemoryType) -> IoctlResult<Buffer>,
    pub streamon: fn(&mut JpegCtx, BufferType) -> IoctlResult<()>,
    pub streamoff: fn(&mut JpegCtx, BufferType) -> IoctlResult<()>,
    pub g_jpegcomp: fn(&JpegCtx) -> IoctlResult<JpegCompression>,
    pub s_jpegcomp: fn(&mut JpegCtx, JpegCompression) -> IoctlResult<()>,
    pub s_ctrl: fn(&mut JpegCtx, Control) -> IoctlResult<()>,
}

static JPEG_ENC_IOCTL_OPS: IoctlOps = IoctlOps {
    querycap,

    enum_fmt_vid_cap_mplane: enum_fmt,
    enum_fmt_vid_out_mplane: enum_fmt,

    g_fmt_vid_cap_mplane: g_fmt,
    g_fmt_vid_out_mplane: g_fmt,

    try_fmt_vid_cap_mplane: try_fmt,
    try_fmt_vid_out_mplane: try_fmt,
    s_fmt_vid_cap_mplane: s_fmt_cap,
    s_fmt_vid_out_mplane: s_fmt_out,

    reqbufs,
    querybuf,
    qbuf,
    dqbuf,
    streamon,
    streamoff,
    g_jpegcomp,
    s_jpegcomp,
    s_ctrl,
};

/// Returns the ioctl table to register the encoder with.
pub fn jpeg_enc_ioctl_ops() -> &'static IoctlOps {
    &JPEG_ENC_IOCTL_OPS
}

/// A decoded ioctl, with its argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoctlRequest {
    QueryCap,
    EnumFmt { type_: BufferType, index: u32 },
    GFmt(BufferType),
    TryFmt(Format),
    SFmt(Format),
    ReqBufs(RequestBuffers),
    QueryBuf { type_: BufferType, index: u32 },
    QBuf(Buffer),
    DqBuf { type_: BufferType, memory: MemoryType },
    StreamOn(BufferType),
    StreamOff(BufferType),
    GJpegComp,
    SJpegComp(JpegCompression),
    SCtrl(Control),
}

/// Result of a successful ioctl, to be written back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoctlReply {
    Capability(Capability),
    FmtDesc(FmtDesc),
    Format(Format),
    ReqBufs(RequestBuffers),
    Buffer(Buffer),
    JpegComp(JpegCompression),
    Done,
}

impl IoctlOps {
    /// Runs `request` on `ctx` through the matching handler of the table.
    ///
    /// Format ioctls are routed by their queue type; only the multi-planar video queues have
    /// handlers.
    pub fn dispatch(&self, ctx: &mut JpegCtx, request: IoctlRequest) -> IoctlResult<IoctlReply> {
        use BufferType::VideoCaptureMplane as Cap;
        use BufferType::VideoOutputMplane as Out;

        let reply = match request {
            IoctlRequest::QueryCap => IoctlReply::Capability((self.querycap)(ctx)?),
            IoctlRequest::EnumFmt { type_, index } => {
                let handler = match type_ {
                    Cap => self.enum_fmt_vid_cap_mplane,
                    Out => self.enum_fmt_vid_out_mplane,
                    _ => return Err(invalid_buffer_type(ctx, type_)),
                };
                IoctlReply::FmtDesc(handler(ctx, type_, index)?)
            }
            IoctlRequest::GFmt(type_) => {
                let handler = match type_ {
                    Cap => self.g_fmt_vid_cap_mplane,
                    Out => self.g_fmt_vid_out_mplane,
                    _ => return Err(invalid_buffer_type(ctx, type_)),
                };
                IoctlReply::Format(handler(ctx, type_)?)
            }
            IoctlRequest::TryFmt(format) => {
                let handler = match format.type_ {
                    Cap => self.try_fmt_vid_cap_mplane,
                    Out => self.try_fmt_vid_out_mplane,
                    type_ => return Err(invalid_buffer_type(ctx, type_)),
                };
                IoctlReply::Format(handler(ctx, format)?)
            }
            IoctlRequest::SFmt(format) => {
                let handler = match format.type_ {
                    Cap => self.s_fmt_vid_cap_mplane,
                    Out => self.s_fmt_vid_out_mplane,
                    type_ => return Err(invalid_buffer_type(ctx, type_)),
                };
                IoctlReply::Format(handler(ctx, format)?)
            }
            IoctlRequest::ReqBufs(req) => IoctlReply::ReqBufs((self.reqbufs)(ctx, req)?),
            IoctlRequest::QueryBuf { type_, index } => {
                IoctlReply::Buffer((self.querybuf)(ctx, type_, index)?)
            }
            IoctlRequest::QBuf(buffer) => IoctlReply::Buffer((self.qbuf)(ctx, buffer)?),
            IoctlRequest::DqBuf { type_, memory } => {
                IoctlReply::Buffer((self.dqbuf)(ctx, type_, memory)?)
            }
            IoctlRequest::StreamOn(type_) => {
                (self.streamon)(ctx, type_)?;
                IoctlReply::Done
            }
            IoctlRequest::StreamOff(type_) => {
                (self.streamoff)(ctx, type_)?;
                IoctlReply::Done
            }
            IoctlRequest::GJpegComp => IoctlReply::JpegComp((self.g_jpegcomp)(ctx)?),
            IoctlRequest::SJpegComp(jpegcomp) => {
                (self.s_jpegcomp)(ctx, jpegcomp)?;
                IoctlReply::Done
            }
            IoctlRequest::SCtrl(ctrl) => {
                (self.s_ctrl)(ctx, ctrl)?;
                IoctlReply::Done
            }
        };

        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::context::JpegDev;
    use crate::context::JpegDevConfig;
    use crate::format::ColorFormat;
    use crate::format::PlaneFormat;
    use crate::format::PIX_FMT_JPEG_420;
    use crate::format::PIX_FMT_NV12;
    use crate::format::PIX_FMT_YUYV;
    use crate::queue::m2m::M2mQueues;
    use crate::MAX_JPEG_HEIGHT;
    use crate::MAX_JPEG_WIDTH;

    const OUT: BufferType = BufferType::VideoOutputMplane;
    const CAP: BufferType = BufferType::VideoCaptureMplane;

    fn new_ctx() -> JpegCtx {
        let dev = Arc::new(JpegDev::new(JpegDevConfig::default()));
        JpegCtx::new(dev, Box::new(M2mQueues::new()))
    }

    #[test]
    fn querycap_reports_m2m_mplane() {
        let dev = Arc::new(JpegDev::new(JpegDevConfig {
            name: String::from("a-rather-long-device-name"),
            default_quality: 0,
        }));
        let ctx = JpegCtx::new(dev, Box::new(M2mQueues::new()));

        let cap = querycap(&ctx).unwrap();
        assert_eq!(cap.driver, "a-rather-long-d");
        assert_eq!(cap.card, cap.driver);
        assert!(cap.bus_info.is_empty());
        assert_eq!(cap.version, 0x10000);
        assert_ne!(cap.capabilities & CAP_STREAMING, 0);
        assert_ne!(cap.capabilities & CAP_VIDEO_CAPTURE_MPLANE, 0);
        assert_ne!(cap.capabilities & CAP_VIDEO_OUTPUT_MPLANE, 0);
    }

    #[test]
    fn enum_fmt_per_direction() {
        let ctx = new_ctx();

        let desc = enum_fmt(&ctx, CAP, 2).unwrap();
        assert_eq!(desc.pixelformat, PIX_FMT_JPEG_420);
        assert_eq!(desc.flags, FMT_FLAG_COMPRESSED);
        assert_eq!(desc.description, "JPEG compressed format");
        assert!(matches!(
            enum_fmt(&ctx, CAP, 4),
            Err(IoctlError::InvalidIndex(4))
        ));

        let desc = enum_fmt(&ctx, OUT, 5).unwrap();
        assert_eq!(desc.pixelformat, PIX_FMT_NV12);
        assert_eq!(desc.flags, 0);
        assert!(enum_fmt(&ctx, OUT, 7).is_err());

        assert!(matches!(
            enum_fmt(&ctx, BufferType::VbiCapture, 0),
            Err(IoctlError::InvalidBufferType(_))
        ));
    }

    #[test]
    fn try_fmt_fills_defaults() {
        let ctx = new_ctx();

        let format = try_fmt(&ctx, Format::new(OUT, 640, 480, PIX_FMT_YUYV)).unwrap();
        assert_eq!(format.pix_mp.field, Field::None);
        assert_eq!(format.pix_mp.num_planes, 1);
        assert_eq!(
            format.planes(),
            &[PlaneFormat {
                bytesperline: 1280,
                sizeimage: 1280 * 480,
            }]
        );

        let format = try_fmt(&ctx, Format::new(OUT, 640, 480, PIX_FMT_NV12)).unwrap();
        assert_eq!(format.planes()[0].bytesperline, 960);
        assert_eq!(format.planes()[0].sizeimage, 960 * 480);
    }

    #[test]
    fn try_fmt_bytesperline() {
        let ctx = new_ctx();

        // A line larger than the width needs is reset.
        let mut format = Format::new(OUT, 640, 480, PIX_FMT_YUYV);
        format.pix_mp.plane_fmt[0].bytesperline = 4096;
        let format = try_fmt(&ctx, format).unwrap();
        assert_eq!(format.pix_mp.plane_fmt[0].bytesperline, 1280);

        // Smaller ones and caller-provided image sizes are kept.
        let mut format = Format::new(OUT, 640, 480, PIX_FMT_YUYV);
        format.pix_mp.plane_fmt[0].bytesperline = 1024;
        format.pix_mp.plane_fmt[0].sizeimage = 12345;
        let format = try_fmt(&ctx, format).unwrap();
        assert_eq!(format.pix_mp.plane_fmt[0].bytesperline, 1024);
        assert_eq!(format.pix_mp.plane_fmt[0].sizeimage, 12345);
    }

    #[test]
    fn try_fmt_clamps_dimensions() {
        let ctx = new_ctx();

        let format = try_fmt(
            &ctx,
            Format::new(
                CAP,
                MAX_JPEG_WIDTH + 100,
                MAX_JPEG_HEIGHT + 100,
                PIX_FMT_JPEG_420,
            ),
        )
        .unwrap();
        assert_eq!(format.pix_mp.width, MAX_JPEG_WIDTH);
        assert_eq!(format.pix_mp.height, MAX_JPEG_HEIGHT);
        assert_eq!(format.pix_mp.plane_fmt[0].bytesperline, MAX_JPEG_WIDTH);
        assert_eq!(
            format.pix_mp.plane_fmt[0].sizeimage,
            MAX_JPEG_WIDTH * MAX_JPEG_HEIGHT
        );

        // Trying again is a no-op.
        assert_eq!(try_fmt(&ctx, format).unwrap(), format);
    }

    #[test]
    fn try_fmt_rejections() {
        let ctx = new_ctx();

        let err = try_fmt(&ctx, Format::new(BufferType::VideoOutput, 64, 64, PIX_FMT_NV12))
            .unwrap_err();
        assert!(matches!(err, IoctlError::InvalidBufferType(_)));
        assert_eq!(err.errno(), Errno::EINVAL);

        let err = try_fmt(&ctx, Format::new(OUT, 64, 64, Fourcc::from(b"H264"))).unwrap_err();
        assert!(matches!(err, IoctlError::UnknownFourcc(_)));
        assert_eq!(err.errno(), Errno::EINVAL);

        let mut format = Format::new(OUT, 64, 64, PIX_FMT_NV12);
        format.pix_mp.field = Field::Interlaced;
        assert!(matches!(
            try_fmt(&ctx, format),
            Err(IoctlError::UnsupportedField(Field::Interlaced))
        ));

        format.pix_mp.field = Field::None;
        assert!(try_fmt(&ctx, format).is_ok());
    }

    #[test]
    fn s_fmt_out_sets_input_params() {
        let mut ctx = new_ctx();

        s_fmt_out(&mut ctx, Format::new(OUT, 640, 480, PIX_FMT_NV12)).unwrap();
        let param = ctx.param();
        assert_eq!((param.in_width, param.in_height), (640, 480));
        assert_eq!(param.in_plane, 1);
        assert_eq!(param.in_depth[0], 12);
        assert_eq!(param.in_fmt, ColorFormat::YCbCr4202P);
        assert_eq!(ctx.payload()[0], 960 * 480);

        let frame = ctx.frame(OUT).unwrap();
        assert_eq!(frame.jpeg_fmt.unwrap().fourcc, PIX_FMT_NV12);
        assert_eq!((frame.width, frame.height), (640, 480));
    }

    #[test]
    fn s_fmt_cap_swaps_output_dimensions() {
        let mut ctx = new_ctx();

        s_fmt_cap(&mut ctx, Format::new(CAP, 640, 480, PIX_FMT_JPEG_420)).unwrap();
        let param = ctx.param();
        assert_eq!((param.out_width, param.out_height), (480, 640));
        assert_eq!(param.out_plane, 1);
        assert_eq!(param.out_depth, 8);
        assert_eq!(param.out_fmt, ColorFormat::Jpeg420);

        let frame = ctx.frame(CAP).unwrap();
        assert_eq!((frame.width, frame.height), (640, 480));
    }

    #[test]
    fn s_fmt_busy_queue() {
        let mut ctx = new_ctx();
        s_fmt_out(&mut ctx, Format::new(OUT, 320, 240, PIX_FMT_NV12)).unwrap();
        reqbufs(
            &mut ctx,
            RequestBuffers {
                type_: OUT,
                memory: MemoryType::Mmap,
                count: 2,
            },
        )
        .unwrap();

        let err = s_fmt_out(&mut ctx, Format::new(OUT, 640, 480, PIX_FMT_YUYV)).unwrap_err();
        assert!(matches!(err, IoctlError::Busy(OUT)));
        assert_eq!(err.errno(), Errno::EBUSY);
        assert_eq!(ctx.param().in_width, 320);
        assert_eq!(ctx.frame(OUT).unwrap().pixelformat, PIX_FMT_NV12);

        // The other queue is still free.
        s_fmt_cap(&mut ctx, Format::new(CAP, 640, 480, PIX_FMT_JPEG_420)).unwrap();
    }

    #[test]
    fn g_fmt_round_trip() {
        let mut ctx = new_ctx();

        let set = s_fmt_cap(&mut ctx, Format::new(CAP, 800, 600, PIX_FMT_JPEG_420)).unwrap();
        let got = g_fmt(&ctx, CAP).unwrap();
        assert_eq!(got, set);

        let set = s_fmt_out(&mut ctx, Format::new(OUT, 1920, 1080, PIX_FMT_YUYV)).unwrap();
        let got = g_fmt(&ctx, OUT).unwrap();
        assert_eq!(got, set);
    }

    #[test]
    fn g_fmt_returns_stored_layout() {
        let mut ctx = new_ctx();

        let mut format = Format::new(OUT, 640, 480, PIX_FMT_YUYV);
        format.pix_mp.plane_fmt[0].bytesperline = 1024;
        format.pix_mp.plane_fmt[0].sizeimage = 12345;
        s_fmt_out(&mut ctx, format).unwrap();

        let got = g_fmt(&ctx, OUT).unwrap();
        assert_eq!(
            got.planes(),
            &[PlaneFormat {
                bytesperline: 1024,
                sizeimage: 12345,
            }]
        );
    }

    #[test]
    fn enumeration_is_narrower_than_acceptance() {
        let mut ctx = new_ctx();

        let listed: Vec<Fourcc> = (0..)
            .map_while(|index| enum_fmt(&ctx, CAP, index).ok())
            .map(|desc| desc.pixelformat)
            .collect();
        assert_eq!(listed.len(), 4);
        assert!(!listed.contains(&PIX_FMT_NV12));

        let set = s_fmt_cap(&mut ctx, Format::new(CAP, 640, 480, PIX_FMT_NV12)).unwrap();
        assert_eq!(set.pix_mp.pixelformat, PIX_FMT_NV12);
    }

    #[test]
    fn g_fmt_before_s_fmt() {
        let ctx = new_ctx();
        let format = g_fmt(&ctx, OUT).unwrap();
        assert_eq!(format.pix_mp.num_planes, 0);
        assert_eq!(format.pix_mp.width, 0);
        assert!(matches!(
            g_fmt(&ctx, BufferType::SdrCapture),
            Err(IoctlError::NoFrame(_))
        ));
    }

    #[test]
    fn jpegcomp_is_not_validated() {
        let mut ctx = new_ctx();
        for quality in [-5, 0, 100, 1000] {
            s_jpegcomp(&mut ctx, JpegCompression { quality }).unwrap();
            assert_eq!(g_jpegcomp(&ctx).unwrap().quality, quality);
        }
    }

    #[test]
    fn s_ctrl_is_ignored() {
        let mut ctx = new_ctx();
        let before = ctx.param().clone();
        s_ctrl(
            &mut ctx,
            Control {
                id: CID_CACHEABLE,
                value: 1,
            },
        )
        .unwrap();
        s_ctrl(
            &mut ctx,
            Control {
                id: 0x0098_0900,
                value: 1,
            },
        )
        .unwrap();
        assert_eq!(ctx.param(), &before);
    }

    #[test]
    fn forwarding_errors_surface() {
        let mut ctx = new_ctx();
        let err = streamon(&mut ctx, OUT).unwrap_err();
        assert!(matches!(err, IoctlError::Queue(QueueError::NoBuffers)));
        assert_eq!(err.errno(), Errno::EINVAL);

        reqbufs(
            &mut ctx,
            RequestBuffers {
                type_: CAP,
                memory: MemoryType::Mmap,
                count: 1,
            },
        )
        .unwrap();
        streamon(&mut ctx, CAP).unwrap();
        let err = dqbuf(&mut ctx, CAP, MemoryType::Mmap).unwrap_err();
        assert_eq!(err.errno(), Errno::EAGAIN);
    }

    #[test]
    fn dispatch_routes_by_queue() {
        let ops = jpeg_enc_ioctl_ops();
        let mut ctx = new_ctx();

        let reply = ops
            .dispatch(
                &mut ctx,
                IoctlRequest::SFmt(Format::new(CAP, 640, 480, PIX_FMT_JPEG_420)),
            )
            .unwrap();
        assert!(matches!(reply, IoctlReply::Format(_)));
        assert_eq!(ctx.param().out_fmt, ColorFormat::Jpeg420);
        assert_eq!(ctx.param().in_fmt, ColorFormat::Unset);

        ops.dispatch(
            &mut ctx,
            IoctlRequest::SFmt(Format::new(OUT, 640, 480, PIX_FMT_NV12)),
        )
        .unwrap();
        assert_eq!(ctx.param().in_fmt, ColorFormat::YCbCr4202P);

        assert!(matches!(
            ops.dispatch(&mut ctx, IoctlRequest::GFmt(BufferType::VideoCapture)),
            Err(IoctlError::InvalidBufferType(BufferType::VideoCapture))
        ));

        let reply = ops
            .dispatch(&mut ctx, IoctlRequest::SCtrl(Control::default()))
            .unwrap();
        assert_eq!(reply, IoctlReply::Done);
    }
}
