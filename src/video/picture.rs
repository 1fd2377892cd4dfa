use std::sync::{Condvar, Mutex};

use derive_more::From;
use static_assertions::const_assert;

use crate::codec::{self, ConvertError, VideoConverter, VideoFrame};
use crate::session::Finished;

/// Keeping the ring tiny trades pipeline depth for latency, the schedulers
/// already absorb decode jitter.
pub const DEFAULT_CAPACITY: usize = 1;

const_assert!(DEFAULT_CAPACITY >= 1);

/// A decoded picture in planar YUV 4:2:0 ready for presentation.
#[derive(Debug, Clone)]
pub struct Picture {
    width: u32,
    height: u32,
    planes: [Vec<u8>; 3],
    pub pts: f64,
}

impl Picture {
    pub fn allocate(width: u32, height: u32) -> Self {
        let luma = width as usize * height as usize;
        let chroma = codec::chroma_len(width, height);

        Picture {
            width,
            height,
            planes: [vec![0; luma], vec![0; chroma], vec![0; chroma]],
            pts: 0.0,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn planes(&self) -> [&[u8]; 3] {
        let [y, u, v] = &self.planes;
        [y, u, v]
    }

    pub fn planes_mut(&mut self) -> [&mut [u8]; 3] {
        let [y, u, v] = &mut self.planes;
        [y.as_mut_slice(), u.as_mut_slice(), v.as_mut_slice()]
    }

    fn fits(&self, frame: &VideoFrame) -> bool {
        self.width == frame.width && self.height == frame.height
    }
}

#[derive(Debug, From)]
pub enum QueuePictureError {
    Finished,
    Convert(ConvertError),
}

/// Fixed capacity ring of pictures between the video decoder and the
/// refresh scheduler.
///
/// Slots are reused in place. Reading does not free a slot, the renderer
/// calls [`PictureRing::advance_read`] once the picture has been presented.
/// There must be a single producer.
pub struct PictureRing {
    capacity: usize,
    locked: Mutex<Ring>,
    cond: Condvar,
    finished: Finished,
}

struct Ring {
    slots: Vec<Option<Picture>>,
    rindex: usize,
    windex: usize,
    size: usize,
}

impl PictureRing {
    pub fn new(capacity: usize, finished: Finished) -> Self {
        let capacity = capacity.max(1);

        PictureRing {
            capacity,
            locked: Mutex::new(Ring {
                slots: (0..capacity).map(|_| None).collect(),
                rindex: 0,
                windex: 0,
                size: 0,
            }),
            cond: Condvar::new(),
            finished,
        }
    }

    /// Converts `frame` into the next free slot, blocking while the ring is
    /// full. Returns early once the session has finished.
    pub fn queue_picture(
        &self,
        frame: &VideoFrame,
        pts: f64,
        converter: &mut dyn VideoConverter,
    ) -> Result<(), QueuePictureError> {
        let (index, slot) = {
            let mut ring = self.locked.lock().unwrap();

            while ring.size >= self.capacity && !self.finished.is_set() {
                ring = self.cond.wait(ring).unwrap();
            }

            if self.finished.is_set() {
                return Err(QueuePictureError::Finished);
            }

            let index = ring.windex;
            (index, ring.slots[index].take())
        };

        // the write slot is invisible to the reader until size is bumped,
        // so conversion happens without holding the lock
        let mut picture = match slot {
            Some(picture) if picture.fits(frame) => picture,
            _ => {
                tracing::debug!(width = frame.width, height = frame.height, "allocating picture");
                Picture::allocate(frame.width, frame.height)
            }
        };

        let converted = converter.convert(frame, &mut picture);
        picture.pts = pts;

        let mut ring = self.locked.lock().unwrap();
        ring.slots[index] = Some(picture);
        converted?;

        ring.windex = (index + 1) % self.capacity;
        ring.size = (ring.size + 1).min(self.capacity);
        self.cond.notify_all();

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.locked.lock().unwrap().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn peek_pts(&self) -> Option<f64> {
        let ring = self.locked.lock().unwrap();
        ring.readable().map(|picture| picture.pts)
    }

    /// Runs `f` on the picture at the read index without releasing it.
    pub fn with_front<R>(&self, f: impl FnOnce(&Picture) -> R) -> Option<R> {
        let ring = self.locked.lock().unwrap();
        ring.readable().map(f)
    }

    /// Releases the picture at the read index back to the producer.
    pub fn advance_read(&self) {
        let mut ring = self.locked.lock().unwrap();

        if ring.size == 0 {
            return;
        }

        ring.rindex = (ring.rindex + 1) % self.capacity;
        ring.size -= 1;
        self.cond.notify_all();
    }

    /// Wakes a blocked producer so it can observe the finished flag.
    pub fn wake(&self) {
        let _ring = self.locked.lock().unwrap();
        self.cond.notify_all();
    }
}

impl Ring {
    fn readable(&self) -> Option<&Picture> {
        if self.size == 0 {
            return None;
        }

        self.slots[self.rindex].as_ref()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::codec::{PixelFormat, Yuv420Converter};

    fn frame(width: u32, height: u32, luma: u8) -> VideoFrame {
        VideoFrame {
            width,
            height,
            format: PixelFormat::Gray8,
            data: vec![luma; (width * height) as usize],
            pts: None,
            dts: None,
            repeat: 0,
        }
    }

    #[test]
    fn single_slot_holds_one_picture_until_advanced() {
        let ring = PictureRing::new(1, Finished::new());
        ring.queue_picture(&frame(4, 4, 1), 0.5, &mut Yuv420Converter).unwrap();

        assert_eq!(ring.len(), 1);
        assert_eq!(ring.peek_pts(), Some(0.5));
        // reading twice still sees the same picture
        assert_eq!(ring.with_front(|p| p.planes()[0][0]), Some(1));
        assert_eq!(ring.peek_pts(), Some(0.5));

        ring.advance_read();
        assert!(ring.is_empty());
        assert_eq!(ring.peek_pts(), None);
    }

    #[test]
    fn second_queue_blocks_until_advance() {
        let ring = Arc::new(PictureRing::new(1, Finished::new()));
        ring.queue_picture(&frame(2, 2, 1), 0.0, &mut Yuv420Converter).unwrap();

        let queued = Arc::new(AtomicBool::new(false));
        let producer = thread::spawn({
            let ring = ring.clone();
            let queued = queued.clone();
            move || {
                ring.queue_picture(&frame(2, 2, 2), 0.04, &mut Yuv420Converter).unwrap();
                queued.store(true, Ordering::SeqCst);
            }
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!queued.load(Ordering::SeqCst));
        assert_eq!(ring.peek_pts(), Some(0.0));

        ring.advance_read();
        producer.join().unwrap();

        assert!(queued.load(Ordering::SeqCst));
        assert_eq!(ring.peek_pts(), Some(0.04));
    }

    #[test]
    fn blocked_producer_returns_on_finish() {
        let finished = Finished::new();
        let ring = Arc::new(PictureRing::new(1, finished.clone()));
        ring.queue_picture(&frame(2, 2, 1), 0.0, &mut Yuv420Converter).unwrap();

        let producer = thread::spawn({
            let ring = ring.clone();
            move || ring.queue_picture(&frame(2, 2, 2), 0.04, &mut Yuv420Converter)
        });

        thread::sleep(Duration::from_millis(20));
        finished.set();
        ring.wake();

        assert!(matches!(producer.join().unwrap(), Err(QueuePictureError::Finished)));
    }

    #[test]
    fn indices_wrap_around() {
        let ring = PictureRing::new(3, Finished::new());
        for round in 0..10 {
            let pts = f64::from(round);
            ring.queue_picture(&frame(2, 2, round as u8), pts, &mut Yuv420Converter).unwrap();
            assert_eq!(ring.peek_pts(), Some(pts));
            ring.advance_read();
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn pictures_are_read_in_write_order() {
        let ring = PictureRing::new(3, Finished::new());
        for pts in [0.1, 0.2, 0.3] {
            ring.queue_picture(&frame(2, 2, 0), pts, &mut Yuv420Converter).unwrap();
        }
        assert_eq!(ring.len(), 3);
        for pts in [0.1, 0.2, 0.3] {
            assert_eq!(ring.peek_pts(), Some(pts));
            ring.advance_read();
        }
    }

    #[test]
    fn slot_is_reallocated_on_dimension_change() {
        let ring = PictureRing::new(1, Finished::new());
        ring.queue_picture(&frame(2, 2, 0), 0.0, &mut Yuv420Converter).unwrap();
        ring.advance_read();
        ring.queue_picture(&frame(8, 6, 0), 0.1, &mut Yuv420Converter).unwrap();

        let dims = ring.with_front(|p| (p.width(), p.height(), p.planes()[0].len(), p.planes()[1].len()));
        assert_eq!(dims, Some((8, 6, 48, 12)));
    }

    #[test]
    fn failed_conversion_does_not_publish() {
        let ring = PictureRing::new(1, Finished::new());
        let mut bad = frame(4, 4, 0);
        bad.data.truncate(3);

        assert!(matches!(
            ring.queue_picture(&bad, 0.0, &mut Yuv420Converter),
            Err(QueuePictureError::Convert(_))
        ));
        assert!(ring.is_empty());
    }

    #[test]
    fn advance_on_empty_is_noop() {
        let ring = PictureRing::new(2, Finished::new());
        ring.advance_read();
        assert!(ring.is_empty());
    }
}
