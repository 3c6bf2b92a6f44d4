// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Pixel formats known to the encoder and the multi-planar layout exchanged with clients.

use enumn::N;

use crate::queue::BufferType;
use crate::Fourcc;
use crate::MAX_PLANES;

pub const PIX_FMT_JPEG_444: Fourcc = Fourcc::from_bytes(b"JPG4");
pub const PIX_FMT_JPEG_422: Fourcc = Fourcc::from_bytes(b"JPG2");
pub const PIX_FMT_JPEG_420: Fourcc = Fourcc::from_bytes(b"JPG0");
pub const PIX_FMT_JPEG_GRAY: Fourcc = Fourcc::from_bytes(b"JPGG");
pub const PIX_FMT_RGB565X: Fourcc = Fourcc::from_bytes(b"RGBR");
pub const PIX_FMT_BGR32: Fourcc = Fourcc::from_bytes(b"BGR4");
pub const PIX_FMT_RGB32: Fourcc = Fourcc::from_bytes(b"RGB4");
pub const PIX_FMT_UYVY: Fourcc = Fourcc::from_bytes(b"UYVY");
pub const PIX_FMT_YUYV: Fourcc = Fourcc::from_bytes(b"YUYV");
pub const PIX_FMT_NV12: Fourcc = Fourcc::from_bytes(b"NV12");
pub const PIX_FMT_NV21: Fourcc = Fourcc::from_bytes(b"NV21");

/// Color layout tag programmed into the hardware for a format.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ColorFormat {
    #[default]
    Unset,
    Jpeg444,
    Jpeg422,
    Jpeg420,
    JpegGray,
    Rgb565,
    Argb8888,
    CbYCrY4221P,
    YCbYCr4221P,
    YCbCr4202P,
    YCrCb4202P,
}

/// Queue a format may be negotiated on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FormatDirection {
    /// Encoded JPEG images.
    Capture,
    /// Raw frames to be encoded.
    Output,
}

impl FormatDirection {
    pub fn is_compressed(self) -> bool {
        self == FormatDirection::Capture
    }
}

/// Static description of a supported format.
#[derive(Debug, PartialEq, Eq)]
pub struct JpegFormat {
    pub name: &'static str,
    pub fourcc: Fourcc,
    /// Bits per pixel of each memory plane.
    pub depth: [u32; MAX_PLANES],
    pub color: ColorFormat,
    pub memplanes: usize,
    pub direction: FormatDirection,
}

impl JpegFormat {
    const fn single_plane(
        name: &'static str,
        fourcc: Fourcc,
        depth: u32,
        color: ColorFormat,
        direction: FormatDirection,
    ) -> Self {
        Self {
            name,
            fourcc,
            depth: [depth, 0, 0],
            color,
            memplanes: 1,
            direction,
        }
    }
}

pub static FORMATS: [JpegFormat; 11] = [
    JpegFormat::single_plane(
        "JPEG compressed format",
        PIX_FMT_JPEG_444,
        8,
        ColorFormat::Jpeg444,
        FormatDirection::Capture,
    ),
    JpegFormat::single_plane(
        "JPEG compressed format",
        PIX_FMT_JPEG_422,
        8,
        ColorFormat::Jpeg422,
        FormatDirection::Capture,
    ),
    JpegFormat::single_plane(
        "JPEG compressed format",
        PIX_FMT_JPEG_420,
        8,
        ColorFormat::Jpeg420,
        FormatDirection::Capture,
    ),
    JpegFormat::single_plane(
        "JPEG compressed format",
        PIX_FMT_JPEG_GRAY,
        8,
        ColorFormat::JpegGray,
        FormatDirection::Capture,
    ),
    JpegFormat::single_plane(
        "RGB565",
        PIX_FMT_RGB565X,
        16,
        ColorFormat::Rgb565,
        FormatDirection::Output,
    ),
    JpegFormat::single_plane(
        "ARGB8888",
        PIX_FMT_BGR32,
        32,
        ColorFormat::Argb8888,
        FormatDirection::Output,
    ),
    JpegFormat::single_plane(
        "ARGB8888",
        PIX_FMT_RGB32,
        32,
        ColorFormat::Argb8888,
        FormatDirection::Output,
    ),
    JpegFormat::single_plane(
        "YUV 4:2:2 packed, CbYCrY",
        PIX_FMT_UYVY,
        16,
        ColorFormat::CbYCrY4221P,
        FormatDirection::Output,
    ),
    JpegFormat::single_plane(
        "YUV 4:2:2 packed, YCbYCr",
        PIX_FMT_YUYV,
        16,
        ColorFormat::YCbYCr4221P,
        FormatDirection::Output,
    ),
    JpegFormat::single_plane(
        "YUV 4:2:0 planar, Y/CbCr",
        PIX_FMT_NV12,
        12,
        ColorFormat::YCbCr4202P,
        FormatDirection::Output,
    ),
    JpegFormat::single_plane(
        "YUV 4:2:0 planar, Y/CrCb",
        PIX_FMT_NV21,
        12,
        ColorFormat::YCrCb4202P,
        FormatDirection::Output,
    ),
];

/// Returns the table entry for `fourcc`, if the encoder supports it.
pub fn find_format(fourcc: Fourcc) -> Option<&'static JpegFormat> {
    FORMATS.iter().find(|fmt| fmt.fourcc == fourcc)
}

/// Iterates over the formats that can be set on queues of `direction`, in table order.
pub fn formats_for(direction: FormatDirection) -> impl Iterator<Item = &'static JpegFormat> {
    FORMATS.iter().filter(move |fmt| fmt.direction == direction)
}

/// Field order of a frame, with the values of `enum v4l2_field`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, N)]
#[repr(u32)]
pub enum Field {
    #[default]
    Any = 0,
    None = 1,
    Top = 2,
    Bottom = 3,
    Interlaced = 4,
    SeqTb = 5,
    SeqBt = 6,
    Alternate = 7,
    InterlacedTb = 8,
    InterlacedBt = 9,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaneFormat {
    pub sizeimage: u32,
    pub bytesperline: u32,
}

/// Multi-planar pixel layout, the equivalent of `struct v4l2_pix_format_mplane`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PixFormatMplane {
    pub width: u32,
    pub height: u32,
    pub pixelformat: Fourcc,
    pub field: Field,
    pub plane_fmt: [PlaneFormat; MAX_PLANES],
    pub num_planes: u8,
}

/// Argument of the G_FMT/TRY_FMT/S_FMT ioctls.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Format {
    pub type_: BufferType,
    pub pix_mp: PixFormatMplane,
}

impl Format {
    pub fn new(type_: BufferType, width: u32, height: u32, pixelformat: Fourcc) -> Self {
        Self {
            type_,
            pix_mp: PixFormatMplane {
                width,
                height,
                pixelformat,
                ..Default::default()
            },
        }
    }

    /// The planes of the layout that are in use.
    pub fn planes(&self) -> &[PlaneFormat] {
        let num_planes = (self.pix_mp.num_planes as usize).min(MAX_PLANES);
        &self.pix_mp.plane_fmt[..num_planes]
    }
}
