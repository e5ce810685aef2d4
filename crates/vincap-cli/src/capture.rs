// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use crate::metrics::MetricsCollector;
use crate::utils;
use clap::Args as ClapArgs;
use std::path::PathBuf;
use std::time::Duration;
use vincap::{
    config::{CaptureConfig, Rect, DEFAULT_DEVICE, DEFAULT_DRM_DEVICE, DEFAULT_FB_DEVICE},
    display::{connector_for_selector, DisplayKind},
    fourcc::PixelFormat,
    session::Session,
    Memory,
};

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Capture device
    #[arg(short, long, default_value = DEFAULT_DEVICE)]
    device: PathBuf,

    /// Save raw frames to this file (Bayer frames are dumped next to it)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Buffer I/O method: 0 MMAP, 1 USERPTR, 2 DMABUF, 3 READ
    #[arg(short, long, default_value_t = 0,
          value_parser = clap::value_parser!(u8).range(0..=3))]
    method: u8,

    /// Requested image width
    #[arg(short = 'W', long, default_value_t = 1920)]
    width: u32,

    /// Requested image height
    #[arg(short = 'H', long, default_value_t = 1080)]
    height: u32,

    /// Crop rectangle as LEFT,TOP,RIGHT,BOTTOM
    #[arg(long, value_parser = utils::parse_crop)]
    crop: Option<Rect>,

    /// Frame rate to request, -1 keeps the driver default
    #[arg(short = 'I', long = "interval", default_value_t = 30, allow_negative_numbers = true,
          value_parser = clap::value_parser!(i32).range(-1..))]
    fps: i32,

    /// Capture until interrupted with Ctrl+C
    #[arg(short, long)]
    continuous: bool,

    /// Frames to capture when not continuous
    #[arg(short = 'n', long, default_value_t = 3,
          value_parser = clap::value_parser!(u32).range(1..))]
    frames: u32,

    /// Seconds to wait for a frame before giving up
    #[arg(long, default_value_t = 3)]
    timeout: u64,

    /// Pixel format: 0 RGB565, 1 RGB24, 2 YUV420, 3 YUYV, 4 NV21, 5 NV12,
    /// 6 YVYU, 7 SRGGB12, 8 SGRBG12, 9 SGBRG12, 10 SBGGR12
    #[arg(short, long, default_value_t = 5,
          value_parser = clap::value_parser!(u8).range(0..=10))]
    format: u8,

    /// Display: 0 none, 1 framebuffer, 2 DRM
    #[arg(short = 't', long, default_value_t = 0,
          value_parser = clap::value_parser!(u8).range(0..=2))]
    distype: u8,

    /// DRM connector: 0 INNO HDMI, 1 MIPI/RGB HDMI (default: first connected)
    #[arg(short = 'C', long, value_parser = clap::value_parser!(u8).range(0..=1))]
    connector: Option<u8>,

    /// Framebuffer device
    #[arg(long, default_value = DEFAULT_FB_DEVICE)]
    fb_device: PathBuf,

    /// DRM device
    #[arg(long, default_value = DEFAULT_DRM_DEVICE)]
    drm_device: PathBuf,

    /// Print capture metrics when done
    #[arg(long)]
    metrics: bool,
}

fn capture_config(args: &Args) -> Result<CaptureConfig, CliError> {
    let memory = Memory::try_from(args.method).map_err(|e| CliError::InvalidArgs(e.to_string()))?;
    let display =
        DisplayKind::try_from(args.distype).map_err(|e| CliError::InvalidArgs(e.to_string()))?;
    let frame_rate = u32::try_from(args.fps).ok().filter(|fps| *fps > 0);

    Ok(CaptureConfig::default()
        .with_device(&args.device)
        .with_resolution(args.width, args.height)
        .with_format(PixelFormat::from_selector(args.format))
        .with_memory(memory)
        .with_display(display)
        .with_fb_device(&args.fb_device)
        .with_drm_device(&args.drm_device)
        .with_frame_rate(frame_rate)
        .with_crop(args.crop)
        .with_connector(args.connector.map(connector_for_selector))
        .with_output(args.output.clone())
        .with_continuous(args.continuous)
        .with_iterations(args.frames)
        .with_timeout(Duration::from_secs(args.timeout)))
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Capture parameters: {:?}", args);

    let config = capture_config(&args)?;
    log::info!(
        "Capturing {}x{} {} from {} with {} I/O, display {}",
        config.width,
        config.height,
        config.format,
        config.device.display(),
        config.memory,
        config.display
    );
    if config.continuous {
        log::info!("Continuous capture, press Ctrl+C to stop");
    }

    // Install signal handler for graceful shutdown
    let term = utils::install_signal_handler()?;

    let mut session = Session::open(&config)?.with_stop_flag(term);
    let format = *session.format();
    log::info!(
        "Negotiated {}x{} {} stride {} size {}",
        format.width,
        format.height,
        format.pixel_format,
        format.bytes_per_line,
        format.image_size
    );

    session.start()?;
    let mut poller = session.poller()?;
    let mut metrics = MetricsCollector::new();

    // Tear down even when the loop failed, then report the first error
    let run = session.run(&mut poller, &mut metrics);
    let finish = session.finish();
    let stats = run?;
    finish?;

    log::info!("Captured {} frames", stats.frames);
    if let Some(record) = session.pipeline().record() {
        log::info!(
            "Recorded {} frames ({} bytes) to {}",
            record.frames(),
            record.bytes(),
            record.path().display()
        );
    }

    if json {
        metrics
            .print_json()
            .map_err(|e| CliError::General(format!("Failed to serialize metrics: {}", e)))?;
    } else if args.metrics {
        metrics.print_text();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: Args,
    }

    fn parse(argv: &[&str]) -> Result<Args, clap::Error> {
        TestCli::try_parse_from(std::iter::once("capture").chain(argv.iter().copied()))
            .map(|cli| cli.args)
    }

    #[test]
    fn test_defaults_match_library() {
        let config = capture_config(&parse(&[]).unwrap()).unwrap();
        assert_eq!(config, CaptureConfig::default());
    }

    #[test]
    fn test_selectors() {
        let args = parse(&["-m", "2", "-t", "2", "-f", "3", "-C", "1", "-c"]).unwrap();
        let config = capture_config(&args).unwrap();
        assert_eq!(config.memory, Memory::DmaBuf);
        assert_eq!(config.display, DisplayKind::Drm);
        assert_eq!(config.format, PixelFormat::Yuyv);
        assert_eq!(config.connector, Some(118));
        assert!(config.continuous);
    }

    #[test]
    fn test_interval_skip() {
        let config = capture_config(&parse(&["-I", "-1"]).unwrap()).unwrap();
        assert_eq!(config.frame_rate, None);
        let config = capture_config(&parse(&["--interval", "15"]).unwrap()).unwrap();
        assert_eq!(config.frame_rate, Some(15));
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(parse(&["-m", "4"]).is_err());
        assert!(parse(&["-t", "3"]).is_err());
        assert!(parse(&["-f", "11"]).is_err());
        assert!(parse(&["-C", "2"]).is_err());
        assert!(parse(&["-I", "-2"]).is_err());
        assert!(parse(&["-n", "0"]).is_err());
    }

    #[test]
    fn test_crop() {
        let args = parse(&["--crop", "0,0,1280,720"]).unwrap();
        let config = capture_config(&args).unwrap();
        assert_eq!(config.crop.map(|r| (r.width, r.height)), Some((1280, 720)));
        assert!(parse(&["--crop", "0,0,1280"]).is_err());
    }
}
