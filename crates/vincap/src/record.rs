// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::{convert::raw12_to_raw16, fourcc::PixelFormat, Error};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

/// Appends raw frames to one file.
#[derive(Debug)]
pub struct RecordSink {
    path: PathBuf,
    writer: BufWriter<File>,
    frames: u64,
    bytes: u64,
}

impl RecordSink {
    /// Creates or truncates `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<RecordSink, Error> {
        let path = path.as_ref();
        let file = File::create(path)?;
        log::info!("recording to {}", path.display());
        Ok(RecordSink {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            frames: 0,
            bytes: 0,
        })
    }

    pub fn write_frame(&mut self, data: &[u8]) -> Result<(), Error> {
        self.writer.write_all(data)?;
        self.frames += 1;
        self.bytes += data.len() as u64;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Flushes buffered data to disk.
    pub fn finish(&mut self) -> Result<(), Error> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }
}

/// Writes each 12-bit Bayer frame to its own file, together with a 16-bit
/// unpacked copy.
///
/// With an output path `dir/name` the files are `dir/raw-<n>-<PAT>12-name`
/// and `dir/raw-<n>-<PAT>16-name`; without one they are
/// `raw-<n>-<PAT>12.raw` and `raw-<n>-<PAT>16.raw` in the dump directory.
#[derive(Debug)]
pub struct BayerDumper {
    dir: PathBuf,
    name: Option<String>,
    count: u32,
    unpacked: Vec<u8>,
}

impl BayerDumper {
    pub fn new(output: Option<&Path>, dump_dir: impl Into<PathBuf>) -> BayerDumper {
        let (dir, name) = match output {
            Some(path) => (
                path.parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from(".")),
                path.file_name().map(|n| n.to_string_lossy().into_owned()),
            ),
            None => (dump_dir.into(), None),
        };
        BayerDumper {
            dir,
            name,
            count: 0,
            unpacked: Vec::new(),
        }
    }

    /// Frames written so far.
    pub fn count(&self) -> u32 {
        self.count
    }

    fn file_name(&self, pattern: &str, bits: u32) -> PathBuf {
        let file = match &self.name {
            Some(name) => format!("raw-{}-{}{}-{}", self.count, pattern, bits, name),
            None => format!("raw-{}-{}{}.raw", self.count, pattern, bits),
        };
        self.dir.join(file)
    }

    /// Dumps one packed frame. Returns the two paths written.
    pub fn dump(
        &mut self,
        format: PixelFormat,
        width: u32,
        height: u32,
        stride: u32,
        data: &[u8],
    ) -> Result<(PathBuf, PathBuf), Error> {
        let pattern = format.bayer_pattern().ok_or_else(|| {
            Error::Unsupported(format!("{} is not a 12-bit Bayer format", format))
        })?;

        let packed = self.file_name(pattern, 12);
        std::fs::write(&packed, data)?;

        let size = usize::try_from(width)? * usize::try_from(height)? * 2;
        self.unpacked.resize(size, 0);
        raw12_to_raw16(width, height, stride, data, &mut self.unpacked)
            .map_err(|err| Error::Unsupported(err.to_string()))?;
        let unpacked = self.file_name(pattern, 16);
        std::fs::write(&unpacked, &self.unpacked)?;

        log::debug!("dumped {} and {}", packed.display(), unpacked.display());
        self.count += 1;
        Ok((packed, unpacked))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn scratch(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("vincap-record-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_record_sink_appends() -> Result<(), Error> {
        let dir = scratch("sink");
        let path = dir.join("out.yuv");
        let mut sink = RecordSink::create(&path)?;
        sink.write_frame(&[1, 2, 3])?;
        sink.write_frame(&[4, 5])?;
        sink.finish()?;
        assert_eq!(sink.frames(), 2);
        assert_eq!(sink.bytes(), 5);
        assert_eq!(std::fs::read(&path)?, vec![1, 2, 3, 4, 5]);
        std::fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn test_record_sink_truncates() -> Result<(), Error> {
        let dir = scratch("truncate");
        let path = dir.join("out.yuv");
        std::fs::write(&path, [9u8; 16])?;
        let mut sink = RecordSink::create(&path)?;
        sink.write_frame(&[1])?;
        sink.finish()?;
        assert_eq!(std::fs::read(&path)?, vec![1]);
        std::fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn test_bayer_names_with_output() -> Result<(), Error> {
        let dir = scratch("bayer-out");
        let output = dir.join("frame.bin");
        let mut dumper = BayerDumper::new(Some(&output), ".");
        let data = [0xab, 0xde, 0xfc, 0xab, 0xde, 0xfc];
        let (packed, unpacked) = dumper.dump(PixelFormat::Sgrbg12, 2, 2, 3, &data)?;
        assert_eq!(packed, dir.join("raw-0-GRBG12-frame.bin"));
        assert_eq!(unpacked, dir.join("raw-0-GRBG16-frame.bin"));
        assert_eq!(std::fs::read(&packed)?, data.to_vec());
        assert_eq!(std::fs::read(&unpacked)?.len(), 8);

        let (packed, _) = dumper.dump(PixelFormat::Sgrbg12, 2, 2, 3, &data)?;
        assert_eq!(packed, dir.join("raw-1-GRBG12-frame.bin"));
        assert_eq!(dumper.count(), 2);
        std::fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn test_bayer_names_without_output() -> Result<(), Error> {
        let dir = scratch("bayer-dir");
        let mut dumper = BayerDumper::new(None, &dir);
        let (packed, unpacked) = dumper.dump(PixelFormat::Sbggr12, 2, 1, 3, &[1, 2, 3])?;
        assert_eq!(packed, dir.join("raw-0-BGGR12.raw"));
        assert_eq!(unpacked, dir.join("raw-0-BGGR16.raw"));
        std::fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn test_bayer_rejects_other_formats() {
        let mut dumper = BayerDumper::new(None, env::temp_dir());
        assert!(matches!(
            dumper.dump(PixelFormat::Nv12, 2, 2, 2, &[0; 6]),
            Err(Error::Unsupported(_))
        ));
    }
}
