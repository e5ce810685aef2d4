// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use clap::Args as ClapArgs;
use serde::Serialize;
use std::path::PathBuf;
use vincap::{
    config::DEFAULT_DEVICE,
    v4l2::subdev::{self, FrameSize},
};

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Device node of the sensor
    #[arg(short, long, default_value = DEFAULT_DEVICE)]
    device: PathBuf,
}

#[derive(Debug, Serialize)]
struct SizeEntry {
    index: u32,
    width: u32,
    height: u32,
}

impl From<&FrameSize> for SizeEntry {
    fn from(size: &FrameSize) -> Self {
        SizeEntry {
            index: size.index,
            width: size.min_width,
            height: size.min_height,
        }
    }
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Sizes parameters: {:?}", args);

    let sizes = subdev::sensor_frame_sizes(&args.device)?;
    let entries: Vec<SizeEntry> = sizes.iter().map(SizeEntry::from).collect();

    if json {
        let json = serde_json::to_string_pretty(&entries)
            .map_err(|e| CliError::General(format!("Failed to serialize sizes: {}", e)))?;
        println!("{}", json);
    } else {
        for entry in &entries {
            println!("{}: {}x{}", entry.index, entry.width, entry.height);
        }
    }
    Ok(())
}
