// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Negotiates an encode session with the JPEG encoder and prints the resulting formats.

use std::sync::Arc;

use argh::FromArgs;

use jpeg_m2m::context::JpegCtx;
use jpeg_m2m::context::JpegDev;
use jpeg_m2m::context::JpegDevConfig;
use jpeg_m2m::format::Format;
use jpeg_m2m::ioctl::jpeg_enc_ioctl_ops;
use jpeg_m2m::ioctl::IoctlReply;
use jpeg_m2m::ioctl::IoctlRequest;
use jpeg_m2m::ioctl::JpegCompression;
use jpeg_m2m::queue::m2m::M2mQueues;
use jpeg_m2m::queue::BufferType;
use jpeg_m2m::Fourcc;

/// Format negotiation against the JPEG encoder
#[derive(Debug, FromArgs)]
struct Args {
    /// input frames width
    #[argh(option, default = "640")]
    width: u32,

    /// input frames height
    #[argh(option, default = "480")]
    height: u32,

    /// input fourcc
    #[argh(option, default = "Fourcc::from(b\"NV12\")")]
    input: Fourcc,

    /// output fourcc
    #[argh(option, default = "Fourcc::from(b\"JPG0\")")]
    output: Fourcc,

    /// compression quality
    #[argh(option, default = "0")]
    quality: i32,

    /// list the supported formats and exit
    #[argh(switch)]
    list: bool,
}

fn print_format(reply: IoctlReply) {
    if let IoctlReply::Format(format) = reply {
        let pix = format.pix_mp;
        println!(
            "{:?}: {} {}x{} planes={} {:?}",
            format.type_,
            pix.pixelformat,
            pix.width,
            pix.height,
            pix.num_planes,
            format.planes()
        );
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Args = argh::from_env();
    let ops = jpeg_enc_ioctl_ops();
    let dev = Arc::new(JpegDev::new(JpegDevConfig {
        default_quality: args.quality,
        ..Default::default()
    }));
    let mut ctx = JpegCtx::new(dev, Box::new(M2mQueues::new()));

    if args.list {
        for type_ in [BufferType::VideoOutputMplane, BufferType::VideoCaptureMplane] {
            let mut index = 0;
            while let Ok(IoctlReply::FmtDesc(desc)) =
                ops.dispatch(&mut ctx, IoctlRequest::EnumFmt { type_, index })
            {
                println!("{:?}[{}]: {} ({})", type_, index, desc.pixelformat, desc.description);
                index += 1;
            }
        }
        return Ok(());
    }

    let requests = [
        Format::new(
            BufferType::VideoOutputMplane,
            args.width,
            args.height,
            args.input,
        ),
        Format::new(
            BufferType::VideoCaptureMplane,
            args.width,
            args.height,
            args.output,
        ),
    ];
    for format in requests {
        let reply = ops
            .dispatch(&mut ctx, IoctlRequest::SFmt(format))
            .map_err(|e| {
                anyhow::anyhow!("S_FMT {:?} failed ({}): {}", format.type_, e.errno(), e)
            })?;
        print_format(reply);
    }

    if let IoctlReply::JpegComp(JpegCompression { quality }) =
        ops.dispatch(&mut ctx, IoctlRequest::GJpegComp)?
    {
        println!("quality: {}", quality);
    }
    println!("encode parameters: {:?}", ctx.param());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_needs_no_dimensions() {
        let args = Args::from_args(&["negotiate"], &["--list"]).unwrap();
        assert!(args.list);
        assert_eq!((args.width, args.height), (640, 480));
    }

    #[test]
    fn dimensions_and_fourccs() {
        let args = Args::from_args(
            &["negotiate"],
            &["--width", "1920", "--height", "1080", "--output", "JPG4"],
        )
        .unwrap();
        assert_eq!((args.width, args.height), (1920, 1080));
        assert_eq!(args.input, Fourcc::from(b"NV12"));
        assert_eq!(args.output, Fourcc::from(b"JPG4"));
    }
}
