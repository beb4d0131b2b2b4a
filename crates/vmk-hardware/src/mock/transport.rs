//! Deterministic in-process transport.

use ndarray::Array2;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;
use vmk_core::{Error, Frame, MockIdentity, Result};
use vmk_protocol::TimerValue;

use crate::traits::DeviceTransport;

#[derive(Debug, Default)]
struct Activity {
    exposure_ms: Option<u32>,
    timer_calls: usize,
    frames_read: usize,
    lines_read: usize,
    closed: bool,
}

/// Mock transport producing `pixel + row` ramps.
///
/// Line `row` of every frame holds `[row, row + 1, ..., row + pixel_count - 1]`,
/// so cropping and orientation are easy to assert on. Exposures are
/// validated with the same timer encoding as the real transports.
///
/// # Examples
///
/// ```
/// use vmk_hardware::DeviceTransport;
/// use vmk_hardware::mock::MockTransport;
///
/// #[tokio::main]
/// async fn main() -> vmk_core::Result<()> {
///     let mut transport = MockTransport::new().with_pixel_count(10);
///     let handle = transport.handle();
///
///     transport.set_timer(25).await?;
///     let frame = transport.read_frame(3).await?;
///
///     assert_eq!(frame.samples()[[2, 9]], 11);
///     assert_eq!(handle.exposure(), Some(25));
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MockTransport {
    name: String,
    pixel_count: usize,
    frame_delay: Duration,
    activity: Arc<Mutex<Activity>>,
}

impl MockTransport {
    /// Pixel width of the default mock detector.
    pub const DEFAULT_PIXEL_COUNT: usize = 4096;

    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            pixel_count: Self::DEFAULT_PIXEL_COUNT,
            frame_delay: Duration::ZERO,
            activity: Arc::new(Mutex::new(Activity::default())),
        }
    }

    pub fn from_identity(identity: &MockIdentity) -> Self {
        Self {
            name: identity.name.clone(),
            ..Self::new()
        }
        .with_pixel_count(identity.pixel_count)
    }

    #[must_use]
    pub fn with_pixel_count(mut self, pixel_count: usize) -> Self {
        self.pixel_count = pixel_count;
        self
    }

    /// Simulated readout time per frame.
    #[must_use]
    pub fn with_frame_delay(mut self, frame_delay: Duration) -> Self {
        self.frame_delay = frame_delay;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handle observing this transport after it has been moved elsewhere.
    pub fn handle(&self) -> MockTransportHandle {
        MockTransportHandle {
            activity: Arc::clone(&self.activity),
        }
    }

    fn activity(&self) -> MutexGuard<'_, Activity> {
        lock(&self.activity)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.activity().closed {
            Err(Error::DeviceClosed)
        } else {
            Ok(())
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceTransport for MockTransport {
    fn is_open(&self) -> bool {
        !self.activity().closed
    }

    fn pixel_count(&self) -> usize {
        self.pixel_count
    }

    async fn set_timer(&mut self, millis: u32) -> Result<()> {
        self.ensure_open()?;
        TimerValue::from_millis(millis)?;

        let mut activity = self.activity();
        activity.exposure_ms = Some(millis);
        activity.timer_calls += 1;
        debug!(name = %self.name, millis, "Mock exposure set");
        Ok(())
    }

    async fn read_frame(&mut self, n_times: usize) -> Result<Frame> {
        self.ensure_open()?;
        if n_times == 0 {
            return Err(Error::configuration("Invalid line count 0"));
        }
        if !self.frame_delay.is_zero() {
            tokio::time::sleep(self.frame_delay).await;
        }

        let samples = Array2::from_shape_fn((n_times, self.pixel_count), |(row, pixel)| {
            (pixel + row) as i32
        });

        let mut activity = self.activity();
        activity.frames_read += 1;
        activity.lines_read += n_times;
        Ok(Frame::unclipped(samples))
    }

    async fn close(&mut self) -> Result<()> {
        let mut activity = self.activity();
        if activity.closed {
            return Err(Error::DeviceClosed);
        }
        activity.closed = true;
        debug!(name = %self.name, "Mock transport closed");
        Ok(())
    }
}

/// Observer for a [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockTransportHandle {
    activity: Arc<Mutex<Activity>>,
}

impl MockTransportHandle {
    /// Last exposure programmed, if any.
    pub fn exposure(&self) -> Option<u32> {
        lock(&self.activity).exposure_ms
    }

    pub fn timer_calls(&self) -> usize {
        lock(&self.activity).timer_calls
    }

    /// Number of `read_frame` calls served.
    pub fn frames_read(&self) -> usize {
        lock(&self.activity).frames_read
    }

    /// Total lines delivered across all frames.
    pub fn lines_read(&self) -> usize {
        lock(&self.activity).lines_read
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.activity).closed
    }
}

fn lock(activity: &Mutex<Activity>) -> MutexGuard<'_, Activity> {
    activity.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ramp_frame() {
        let mut transport = MockTransport::new();
        let frame = transport.read_frame(2).await.unwrap();

        assert_eq!(frame.pixel_count(), 4096);
        assert_eq!(frame.samples()[[0, 0]], 0);
        assert_eq!(frame.samples()[[1, 4095]], 4096);
        assert!(frame.clipped().iter().all(|&c| !c));
    }

    #[tokio::test]
    async fn test_from_identity() {
        let transport = MockTransport::from_identity(&MockIdentity::new("bench", 32));
        assert_eq!(transport.name(), "bench");
        assert_eq!(transport.pixel_count(), 32);
    }

    #[tokio::test]
    async fn test_timer_range_checked() {
        let mut transport = MockTransport::new();
        let handle = transport.handle();

        assert!(transport.set_timer(500_000).await.is_err());
        assert_eq!(handle.exposure(), None);

        transport.set_timer(333).await.unwrap();
        assert_eq!(handle.exposure(), Some(333));
        assert_eq!(handle.timer_calls(), 1);
    }

    #[tokio::test]
    async fn test_close() {
        let mut transport = MockTransport::new();
        let handle = transport.handle();

        transport.close().await.unwrap();
        assert!(!transport.is_open());
        assert!(handle.is_closed());
        assert!(matches!(transport.read_frame(1).await, Err(Error::DeviceClosed)));
        assert!(matches!(transport.close().await, Err(Error::DeviceClosed)));
    }
}
