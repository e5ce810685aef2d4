// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use clap::Args as ClapArgs;
use std::path::PathBuf;
use vincap::{config::DEFAULT_DEVICE, v4l2::subdev};

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Firmware file name as known to the kernel firmware loader
    name: String,

    /// Capture device the ISP is attached to
    #[arg(short, long, default_value = DEFAULT_DEVICE)]
    device: PathBuf,
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Firmware parameters: {:?}", args);

    subdev::load_firmware(&args.device, &args.name)?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "device": args.device.display().to_string(),
                "firmware": args.name,
                "loaded": true,
            })
        );
    } else {
        println!("Loaded firmware {}", args.name);
    }
    Ok(())
}
