// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::{
    pool::{BufferPool, CaptureBuffer, Owner},
    v4l2::CaptureDevice,
    BufferError, Error, Memory,
};
use std::time::{Duration, Instant};

/// A buffer handed back by the driver, now owned by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturedFrame {
    pub index: u32,
    pub bytes_used: u32,
    pub sequence: u32,
    pub timestamp: Duration,
}

/// Drives the device buffer queue and tracks who owns each buffer.
///
/// All ownership changes go through [`enqueue`](Self::enqueue),
/// [`dequeue`](Self::dequeue) and [`stop`](Self::stop). Streaming is stopped
/// when the queue is dropped.
pub struct CaptureQueue<D: CaptureDevice> {
    // Dropped before the device so mappings go away before the fd closes.
    pool: BufferPool,
    device: D,
    streaming: bool,
    epoch: Instant,
    read_sequence: u32,
}

impl<D: CaptureDevice> CaptureQueue<D> {
    pub fn new(device: D, pool: BufferPool) -> CaptureQueue<D> {
        CaptureQueue {
            pool,
            device,
            streaming: false,
            epoch: Instant::now(),
            read_sequence: 0,
        }
    }

    pub fn memory(&self) -> Memory {
        self.pool.memory()
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Buffers currently owned by the driver.
    pub fn queued(&self) -> usize {
        self.pool.driver_owned()
    }

    pub fn image_size(&self) -> u32 {
        self.pool.image_size()
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn buffer(&self, index: u32) -> Result<&CaptureBuffer, Error> {
        self.pool.get(index)
    }

    pub fn buffer_mut(&mut self, index: u32) -> Result<&mut CaptureBuffer, Error> {
        self.pool.get_mut(index)
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Gives buffer `index` to the driver. read() I/O has no driver queue so
    /// this only validates the index.
    pub fn enqueue(&mut self, index: u32) -> Result<(), Error> {
        let buf = self.pool.get_mut(index)?;
        if buf.owner() == Owner::Driver {
            return Err(BufferError::AlreadyQueued(index).into());
        }
        if let Some(target) = buf.target() {
            self.device.queue(target)?;
            buf.set_owner(Owner::Driver);
            log::trace!("queued buffer {}", index);
        }
        Ok(())
    }

    /// Takes the next completed buffer from the driver.
    ///
    /// `Ok(None)` means no frame is ready yet and is never an error.
    pub fn dequeue(&mut self) -> Result<Option<CapturedFrame>, Error> {
        let memory = self.memory();
        if memory == Memory::Read {
            return self.read();
        }
        if self.pool.driver_owned() == 0 {
            return Err(BufferError::NothingQueued.into());
        }
        let Some(done) = self.device.dequeue(memory)? else {
            return Ok(None);
        };
        let index = self.pool.locate(&done)?;
        let buf = self.pool.get_mut(index)?;
        if buf.owner() != Owner::Driver {
            return Err(BufferError::NotQueued(index).into());
        }
        buf.set_owner(Owner::Application);
        log::trace!(
            "dequeued buffer {} seq {} bytes {}",
            index,
            done.sequence,
            done.bytes_used
        );
        Ok(Some(CapturedFrame {
            index,
            bytes_used: done.bytes_used,
            sequence: done.sequence,
            timestamp: done.timestamp,
        }))
    }

    fn read(&mut self) -> Result<Option<CapturedFrame>, Error> {
        let buf = self.pool.get_mut(0)?;
        let Some(data) = buf.data_mut() else {
            return Ok(None);
        };
        let Some(len) = self.device.read_frame(data)? else {
            return Ok(None);
        };
        let sequence = self.read_sequence;
        self.read_sequence = self.read_sequence.wrapping_add(1);
        Ok(Some(CapturedFrame {
            index: 0,
            bytes_used: u32::try_from(len)?,
            sequence,
            timestamp: self.epoch.elapsed(),
        }))
    }

    /// Queues every application owned buffer and starts streaming.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.streaming || !self.memory().is_streaming() {
            return Ok(());
        }
        let idle: Vec<u32> = self
            .pool
            .buffers()
            .iter()
            .filter(|buf| buf.owner() == Owner::Application)
            .map(CaptureBuffer::index)
            .collect();
        for index in idle {
            self.enqueue(index)?;
        }
        self.device.stream_on()?;
        self.streaming = true;
        log::debug!("streaming on with {} buffers queued", self.queued());
        Ok(())
    }

    /// Stops streaming. The driver releases every queued buffer.
    pub fn stop(&mut self) -> Result<(), Error> {
        if !self.streaming {
            return Ok(());
        }
        self.device.stream_off()?;
        self.streaming = false;
        for index in 0..u32::try_from(self.pool.len())? {
            self.pool.get_mut(index)?.set_owner(Owner::Application);
        }
        log::debug!("streaming off");
        Ok(())
    }

    /// Stops streaming and frees the pool.
    pub fn release(&mut self) -> Result<(), Error> {
        self.stop()?;
        self.pool.release(&mut self.device)
    }
}

impl<D: CaptureDevice> Drop for CaptureQueue<D> {
    fn drop(&mut self) {
        if self.streaming {
            if let Err(err) = self.device.stream_off() {
                log::warn!("stream off during teardown failed: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fourcc::PixelFormat,
        pool::{MmapStrategy, ReadStrategy, UserPtrStrategy},
        v4l2::{Format, SyntheticDevice},
    };
    use std::collections::HashMap;

    fn format() -> Format {
        Format::new(64, 32, PixelFormat::Yuyv)
    }

    fn mmap_queue(count: u32) -> CaptureQueue<SyntheticDevice> {
        let mut dev = SyntheticDevice::new(format()).unwrap();
        let pool = BufferPool::prepare(Box::new(MmapStrategy::new(count)), &mut dev).unwrap();
        CaptureQueue::new(dev, pool)
    }

    #[test]
    fn test_start_queues_everything() -> Result<(), Error> {
        let mut queue = mmap_queue(4);
        assert_eq!(queue.queued(), 0);
        queue.start()?;
        assert!(queue.is_streaming());
        assert_eq!(queue.queued(), 4);
        assert_eq!(queue.device().pending(), vec![0, 1, 2, 3]);
        Ok(())
    }

    #[test]
    fn test_double_enqueue_rejected() -> Result<(), Error> {
        let mut queue = mmap_queue(2);
        queue.enqueue(1)?;
        let err = queue.enqueue(1).unwrap_err();
        assert!(matches!(err, Error::Buffer(BufferError::AlreadyQueued(1))));
        assert_eq!(queue.queued(), 1);
        assert_eq!(queue.device().pending(), vec![1]);
        Ok(())
    }

    #[test]
    fn test_enqueue_out_of_range() {
        let mut queue = mmap_queue(2);
        assert!(matches!(
            queue.enqueue(7),
            Err(Error::Buffer(BufferError::IndexOutOfRange { index: 7, count: 2 }))
        ));
    }

    #[test]
    fn test_dequeue_with_nothing_queued() -> Result<(), Error> {
        let mut queue = mmap_queue(2);
        queue.start()?;
        queue.dequeue()?.unwrap();
        queue.dequeue()?.unwrap();
        assert!(matches!(
            queue.dequeue(),
            Err(Error::Buffer(BufferError::NothingQueued))
        ));
        Ok(())
    }

    #[test]
    fn test_dequeue_empty_is_not_an_error() -> Result<(), Error> {
        let mut queue = mmap_queue(2);
        queue.start()?;
        // Drain the device without the queue noticing, as if no frame had
        // been produced yet.
        queue.device_mut().stream_off()?;
        queue.device_mut().stream_on()?;
        assert_eq!(queue.dequeue()?, None);
        assert_eq!(queue.queued(), 2);
        Ok(())
    }

    #[test]
    fn test_ownership_round_trip() -> Result<(), Error> {
        let mut queue = mmap_queue(4);
        queue.start()?;
        let mut seen: HashMap<u32, usize> = HashMap::new();
        let mut last = Duration::ZERO;
        for _ in 0..(queue.len() * 10) {
            let frame = queue.dequeue()?.expect("frame");
            assert!(frame.timestamp >= last);
            last = frame.timestamp;
            assert_eq!(queue.buffer(frame.index)?.owner(), Owner::Application);
            assert_eq!(queue.queued(), 3);
            *seen.entry(frame.index).or_default() += 1;
            queue.enqueue(frame.index)?;
            assert_eq!(queue.queued(), 4);
        }
        assert_eq!(seen.len(), 4);
        assert!(seen.values().all(|n| *n == 10));
        Ok(())
    }

    #[test]
    fn test_userptr_dequeue_resolves_by_address() -> Result<(), Error> {
        let mut dev = SyntheticDevice::new(format()).unwrap();
        let size = format().image_size;
        let pool = BufferPool::prepare(Box::new(UserPtrStrategy::new(size)), &mut dev)?;
        let mut queue = CaptureQueue::new(dev, pool);
        queue.enqueue(2)?;
        queue.device_mut().stream_on()?;
        let frame = queue.dequeue()?.expect("frame");
        assert_eq!(frame.index, 2);
        Ok(())
    }

    #[test]
    fn test_stop_returns_ownership() -> Result<(), Error> {
        let mut queue = mmap_queue(3);
        queue.start()?;
        queue.stop()?;
        assert!(!queue.is_streaming());
        assert_eq!(queue.queued(), 0);
        assert_eq!(queue.device().stream_off_count(), 1);
        queue.stop()?;
        assert_eq!(queue.device().stream_off_count(), 1);
        Ok(())
    }

    #[test]
    fn test_failed_stop_keeps_streaming() -> Result<(), Error> {
        let mut dev = SyntheticDevice::new(format())?.with_stream_off_failures(1);
        let pool = BufferPool::prepare(Box::new(MmapStrategy::new(2)), &mut dev)?;
        let mut queue = CaptureQueue::new(dev, pool);
        queue.start()?;
        assert!(matches!(
            queue.stop(),
            Err(Error::Device {
                op: "VIDIOC_STREAMOFF",
                ..
            })
        ));
        assert!(queue.is_streaming());
        assert_eq!(queue.queued(), 2);
        queue.stop()?;
        assert!(!queue.is_streaming());
        assert_eq!(queue.device().stream_off_count(), 1);
        Ok(())
    }

    #[test]
    fn test_read_io_has_no_queue() -> Result<(), Error> {
        let mut dev = SyntheticDevice::new(format()).unwrap();
        let size = format().image_size;
        let pool = BufferPool::prepare(Box::new(ReadStrategy::new(size)), &mut dev)?;
        let mut queue = CaptureQueue::new(dev, pool);
        queue.start()?;
        assert!(!queue.is_streaming());
        assert_eq!(queue.device().stream_on_count(), 0);
        queue.enqueue(0)?;

        let first = queue.dequeue()?.expect("frame");
        let second = queue.dequeue()?.expect("frame");
        assert_eq!((first.index, first.bytes_used), (0, size));
        assert_eq!(second.sequence, 1);
        assert_eq!(queue.buffer(0)?.data().unwrap()[0], 1);
        queue.stop()?;
        assert_eq!(queue.device().stream_off_count(), 0);
        Ok(())
    }

    #[test]
    fn test_release_frees_pool() -> Result<(), Error> {
        let mut queue = mmap_queue(2);
        queue.start()?;
        queue.release()?;
        assert!(queue.is_empty());
        assert!(!queue.device().is_streaming());
        Ok(())
    }
}
