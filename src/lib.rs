// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! V4L2 ioctl surface of a memory-to-memory JPEG encoder.
//!
//! The OUTPUT queue receives raw frames, the CAPTURE queue returns JPEG images. This crate
//! negotiates the formats of both queues into a per-session [`context::JpegCtx`] and forwards
//! buffer management to a [`queue::M2mBufferManager`].

pub mod context;
pub mod format;
pub mod ioctl;
pub mod queue;
#[cfg(feature = "v4l2")]
pub mod v4l2;

use std::fmt;
use std::str::FromStr;

/// Largest picture width the encoder accepts.
pub const MAX_JPEG_WIDTH: u32 = 3264;
/// Largest picture height the encoder accepts.
pub const MAX_JPEG_HEIGHT: u32 = 2448;
/// Maximum number of memory planes of a format.
pub const MAX_PLANES: usize = 3;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Returns a copy of `self` with each dimension no larger than the encoder maximum.
    pub fn clamp_to_max(self) -> Self {
        Self {
            width: self.width.min(MAX_JPEG_WIDTH),
            height: self.height.min(MAX_JPEG_HEIGHT),
        }
    }
}

impl From<(u32, u32)> for Resolution {
    fn from(value: (u32, u32)) -> Self {
        Self {
            width: value.0,
            height: value.1,
        }
    }
}

/// A V4L2 four-character code, stored the way the kernel does (`a | b << 8 | c << 16 | d << 24`).
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Fourcc(u32);

impl Fourcc {
    pub const fn from_bytes(code: &[u8; 4]) -> Self {
        Self(
            (code[0] as u32)
                | ((code[1] as u32) << 8)
                | ((code[2] as u32) << 16)
                | ((code[3] as u32) << 24),
        )
    }
}

impl From<u32> for Fourcc {
    fn from(fourcc: u32) -> Self {
        Self(fourcc)
    }
}

impl From<Fourcc> for u32 {
    fn from(fourcc: Fourcc) -> Self {
        fourcc.0
    }
}

impl From<&[u8; 4]> for Fourcc {
    fn from(n: &[u8; 4]) -> Self {
        Self::from_bytes(n)
    }
}

impl From<Fourcc> for [u8; 4] {
    fn from(n: Fourcc) -> Self {
        n.0.to_le_bytes()
    }
}

impl fmt::Display for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c: [u8; 4] = (*self).into();
        f.write_fmt(format_args!(
            "{}{}{}{}",
            c[0] as char, c[1] as char, c[2] as char, c[3] as char
        ))
    }
}

impl fmt::Debug for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("0x{:08x} ({})", self.0, self))
    }
}

impl FromStr for Fourcc {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| "a fourcc must be exactly four ASCII characters")?;
        Ok(Self::from_bytes(&code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_matches_kernel_layout() {
        // v4l2_fourcc('N', 'V', '1', '2')
        assert_eq!(u32::from(Fourcc::from(b"NV12")), 0x3231564e);
        assert_eq!(Fourcc::from(0x3231564e_u32).to_string(), "NV12");
    }

    #[test]
    fn fourcc_from_str() {
        assert_eq!("JPG4".parse::<Fourcc>(), Ok(Fourcc::from(b"JPG4")));
        assert!("JPG".parse::<Fourcc>().is_err());
        assert!("JPEG4".parse::<Fourcc>().is_err());
    }

    #[test]
    fn resolution_clamp() {
        let res = Resolution::from((MAX_JPEG_WIDTH + 100, 480)).clamp_to_max();
        assert_eq!(res, Resolution::from((MAX_JPEG_WIDTH, 480)));

        let res = Resolution::from((640, MAX_JPEG_HEIGHT + 1)).clamp_to_max();
        assert_eq!(res, Resolution::from((640, MAX_JPEG_HEIGHT)));
    }
}
