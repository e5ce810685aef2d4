// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use signal_hook::consts::SIGINT;
use signal_hook::flag;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use vincap::config::Rect;

/// Parse a crop rectangle given as "LEFT,TOP,RIGHT,BOTTOM"
///
/// Right and bottom are exclusive, so `0,0,640,480` selects a 640x480
/// window at the sensor origin.
pub fn parse_crop(s: &str) -> Result<Rect, CliError> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<i32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| CliError::InvalidArgs(format!("Invalid number in crop: {}", s)))?;

    match values[..] {
        [left, top, right, bottom] => Rect::from_corners(left, top, right, bottom)
            .map_err(|e| CliError::InvalidArgs(e.to_string())),
        _ => Err(CliError::InvalidArgs(format!(
            "Invalid crop format (expected LEFT,TOP,RIGHT,BOTTOM): {}",
            s
        ))),
    }
}

/// Install a SIGINT handler that sets the returned flag
///
/// The capture loop checks the flag once per iteration, so Ctrl+C stops a
/// continuous capture cleanly and the device is torn down as usual.
pub fn install_signal_handler() -> Result<Arc<AtomicBool>, CliError> {
    let term = Arc::new(AtomicBool::new(false));

    flag::register(SIGINT, Arc::clone(&term))
        .map_err(|e| CliError::General(format!("Failed to register signal handler: {}", e)))?;

    log::debug!("Installed SIGINT handler");
    Ok(term)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_crop_valid() {
        let rect = parse_crop("16,8,656,488").unwrap();
        assert_eq!(
            rect,
            Rect {
                left: 16,
                top: 8,
                width: 640,
                height: 480
            }
        );
        assert_eq!(parse_crop(" 0, 0, 2, 2").unwrap().width, 2);
    }

    #[test]
    fn test_parse_crop_invalid() {
        assert!(parse_crop("0,0,640").is_err());
        assert!(parse_crop("0,0,640,480,1").is_err());
        assert!(parse_crop("a,b,c,d").is_err());
        assert!(parse_crop("640,0,0,480").is_err());
        assert!(parse_crop("").is_err());
    }
}
