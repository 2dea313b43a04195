use image::RgbaImage;
use tracing::debug;

/// One captured, decoded video frame with its capture metadata.
///
/// A `FrameBuffer` has exactly one owner at a time. It is deliberately not
/// `Clone`: dispatching it in a [`Request::Predict`](crate::protocol::Request)
/// moves it into the inference task, and the sender can no longer touch it.
///
/// ```compile_fail
/// use live_detect_common::channel;
/// use live_detect_common::frame::FrameBuffer;
/// use live_detect_common::protocol::Request;
///
/// let (mut loop_end, _task_end) = channel::channel();
/// let frame = FrameBuffer::new(image::RgbaImage::new(4, 4), 1, 0);
/// loop_end.post(Request::Predict(frame)).unwrap();
/// let _ = frame.width(); // use after transfer
/// ```
#[derive(Debug)]
pub struct FrameBuffer {
    pixels: RgbaImage,
    pub seq: u64,
    pub captured_at_ms: i64,
}

impl FrameBuffer {
    pub fn new(pixels: RgbaImage, seq: u64, captured_at_ms: i64) -> Self {
        Self {
            pixels,
            seq,
            captured_at_ms,
        }
    }

    /// Stamp a frame with the current wall-clock time.
    pub fn captured_now(pixels: RgbaImage, seq: u64) -> Self {
        Self::new(pixels, seq, chrono::Utc::now().timestamp_millis())
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Size of the pixel storage in bytes.
    pub fn byte_len(&self) -> usize {
        self.pixels.as_raw().len()
    }

    /// Free the pixel storage. Consumes the buffer, so it can only happen once.
    /// Returns the number of bytes released.
    pub fn release(self) -> usize {
        let bytes = self.byte_len();
        debug!(seq = self.seq, bytes, "frame buffer released");
        drop(self.pixels);
        bytes
    }
}
