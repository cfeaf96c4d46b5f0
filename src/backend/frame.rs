// Frame Scheduler - N frames in flight
//
// Frame flow (every explicit backend):
// 1. Wait on the slot's fence (back-pressure: at most N frames queued)
// 2. Acquire the next presentable image
// 3. Recreate the swapchain first if it is out of date, suboptimal or resized
// 4. Reset the slot's fence + command buffer, open recording
// 5. Submit (wait acquire semaphore, signal completion semaphore, fence)
// 6. Present (wait completion semaphore)
// 7. index = (index + 1) % N
//
// The native objects live in the backend behind FrameDevice; this module only
// owns the ordering.

use anyhow::{Context, Result};

/// Outcome of acquiring a presentable image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Image(u32),
    /// Usable, but the chain no longer matches the surface. The acquire
    /// semaphore is signaled.
    Suboptimal(u32),
    /// Unusable; nothing was signaled
    OutOfDate,
}

/// Outcome of presenting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Present {
    Done,
    Suboptimal,
    OutOfDate,
}

/// Native side of the scheduler, implemented by each backend
pub trait FrameDevice {
    /// Block until the slot's previous submission has completed
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;

    fn acquire_image(&mut self, slot: usize) -> Result<Acquire>;

    /// Rebuild the swapchain-dependent set. `acquire_signaled` is set when the
    /// slot's acquire semaphore holds a signal that must be consumed first.
    /// Returns false when the surface is zero-sized and nothing was built.
    fn recreate_swapchain(&mut self, slot: usize, acquire_signaled: bool) -> Result<bool>;

    /// Reset the slot's fence and command buffer
    fn reset_slot(&mut self, slot: usize) -> Result<()>;

    fn begin_recording(&mut self, slot: usize, image: u32) -> Result<()>;

    fn submit(&mut self, slot: usize, image: u32) -> Result<()>;

    fn present(&mut self, slot: usize, image: u32) -> Result<Present>;
}

/// The frame being recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameToken {
    pub slot: usize,
    pub image: u32,
}

pub struct FrameScheduler {
    slot_count: usize,
    index: usize,
    current: Option<FrameToken>,
    recreate_pending: bool,
    frames_presented: u64,
}

impl FrameScheduler {
    pub fn new(slot_count: usize) -> Self {
        assert!(slot_count >= 1, "need at least one frame slot");
        Self {
            slot_count,
            index: 0,
            current: None,
            recreate_pending: false,
            frames_presented: 0,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Slot of the frame being recorded, or of the next frame
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> Option<FrameToken> {
        self.current
    }

    pub fn in_frame(&self) -> bool {
        self.current.is_some()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Force a recreation at the next begin_frame
    pub fn request_recreate(&mut self) {
        self.recreate_pending = true;
    }

    pub fn recreate_pending(&self) -> bool {
        self.recreate_pending
    }

    /// Start a frame. None means the frame was skipped (no drawable surface).
    pub fn begin_frame<D: FrameDevice>(
        &mut self,
        device: &mut D,
        resized: bool,
    ) -> Result<Option<FrameToken>> {
        if self.current.is_some() {
            anyhow::bail!("begin_frame called while slot {} is still recording", self.index);
        }

        let slot = self.index;
        device
            .wait_for_slot(slot)
            .with_context(|| format!("Failed to wait for frame slot {}", slot))?;

        let mut recreate = resized || self.recreate_pending;
        let mut acquire_signaled = false;
        let mut image = None;

        if !recreate {
            match device.acquire_image(slot)? {
                Acquire::Image(index) => image = Some(index),
                Acquire::Suboptimal(_) => {
                    recreate = true;
                    acquire_signaled = true;
                }
                Acquire::OutOfDate => recreate = true,
            }
        }

        if recreate {
            log::debug!(
                "Recreating swapchain before frame (slot {}, resized: {}, pending: {})",
                slot,
                resized,
                self.recreate_pending
            );
            if !device.recreate_swapchain(slot, acquire_signaled)? {
                self.recreate_pending = true;
                return Ok(None);
            }
            self.recreate_pending = false;

            image = match device.acquire_image(slot)? {
                // A fresh chain may still report suboptimal (e.g. mid-resize); use it
                Acquire::Image(index) | Acquire::Suboptimal(index) => Some(index),
                Acquire::OutOfDate => {
                    self.recreate_pending = true;
                    return Ok(None);
                }
            };
        }

        let image = image.context("No swapchain image acquired")?;
        device.reset_slot(slot)?;
        device.begin_recording(slot, image)?;

        let token = FrameToken { slot, image };
        self.current = Some(token);
        log::trace!("Frame begun: slot {} image {}", slot, image);
        Ok(Some(token))
    }

    /// Submit and present the frame opened by begin_frame
    pub fn end_frame<D: FrameDevice>(&mut self, device: &mut D) -> Result<()> {
        let token = self
            .current
            .take()
            .context("end_frame called without a matching begin_frame")?;

        device
            .submit(token.slot, token.image)
            .with_context(|| format!("Failed to submit frame slot {}", token.slot))?;

        match device.present(token.slot, token.image)? {
            Present::Done => {}
            Present::Suboptimal | Present::OutOfDate => {
                log::debug!("Present reported a stale swapchain, recreating next frame");
                self.recreate_pending = true;
            }
        }

        self.index = (self.index + 1) % self.slot_count;
        self.frames_presented += 1;
        Ok(())
    }
}

/// Objects released while a frame was recording. They are freed once the
/// slot's fence has been waited on again; a single queue completes in
/// submission order, so that also covers every earlier slot.
pub struct DeferredReleases<T> {
    slots: Vec<Vec<T>>,
}

impl<T> DeferredReleases<T> {
    pub fn new(slot_count: usize) -> Self {
        Self {
            slots: (0..slot_count).map(|_| Vec::new()).collect(),
        }
    }

    pub fn defer(&mut self, slot: usize, item: T) {
        self.slots[slot].push(item);
    }

    /// Items that are safe to free now that `slot` has been waited on
    pub fn collect(&mut self, slot: usize) -> Vec<T> {
        std::mem::take(&mut self.slots[slot])
    }

    pub fn drain_all(&mut self) -> Vec<T> {
        self.slots.iter_mut().flat_map(std::mem::take).collect()
    }

    pub fn pending(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Device whose "GPU" only finishes work when the CPU waits on it
    struct MockDevice {
        fence_signaled: Vec<bool>,
        pending: Vec<bool>,
        waits: Vec<u32>,
        resets: Vec<u32>,
        recreations: u32,
        unsignaled_acquires: u32,
        next_image: u32,
        image_count: u32,
        acquire_script: Vec<Acquire>,
        present_script: Vec<Present>,
        surface_zero: bool,
        recording: Option<usize>,
    }

    impl MockDevice {
        fn new(slots: usize) -> Self {
            Self {
                fence_signaled: vec![true; slots],
                pending: vec![false; slots],
                waits: vec![0; slots],
                resets: vec![0; slots],
                recreations: 0,
                unsignaled_acquires: 0,
                next_image: 0,
                image_count: 3,
                acquire_script: Vec::new(),
                present_script: Vec::new(),
                surface_zero: false,
                recording: None,
            }
        }

        fn in_flight(&self) -> usize {
            self.pending.iter().filter(|p| **p).count()
        }
    }

    impl FrameDevice for MockDevice {
        fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
            if self.pending[slot] {
                self.pending[slot] = false;
                self.fence_signaled[slot] = true;
            }
            assert!(self.fence_signaled[slot], "waited on a fence that can never signal");
            self.waits[slot] += 1;
            Ok(())
        }

        fn acquire_image(&mut self, _slot: usize) -> Result<Acquire> {
            if !self.acquire_script.is_empty() {
                return Ok(self.acquire_script.remove(0));
            }
            let image = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(Acquire::Image(image))
        }

        fn recreate_swapchain(&mut self, _slot: usize, acquire_signaled: bool) -> Result<bool> {
            if self.surface_zero {
                return Ok(false);
            }
            if acquire_signaled {
                self.unsignaled_acquires += 1;
            }
            self.recreations += 1;
            Ok(true)
        }

        fn reset_slot(&mut self, slot: usize) -> Result<()> {
            assert!(self.fence_signaled[slot], "reset a fence that is still in flight");
            assert!(!self.pending[slot]);
            self.fence_signaled[slot] = false;
            self.resets[slot] += 1;
            Ok(())
        }

        fn begin_recording(&mut self, slot: usize, _image: u32) -> Result<()> {
            assert!(self.recording.is_none());
            self.recording = Some(slot);
            Ok(())
        }

        fn submit(&mut self, slot: usize, _image: u32) -> Result<()> {
            assert_eq!(self.recording.take(), Some(slot));
            assert!(!self.pending[slot], "slot {} submitted twice while in flight", slot);
            self.pending[slot] = true;
            Ok(())
        }

        fn present(&mut self, _slot: usize, _image: u32) -> Result<Present> {
            if !self.present_script.is_empty() {
                return Ok(self.present_script.remove(0));
            }
            Ok(Present::Done)
        }
    }

    #[test]
    fn every_slot_is_waited_and_reset_three_times_in_3n_frames() {
        for slots in 2..=5 {
            let mut device = MockDevice::new(slots);
            let mut scheduler = FrameScheduler::new(slots);

            for _ in 0..3 * slots {
                let token = scheduler.begin_frame(&mut device, false).unwrap().unwrap();
                assert!(device.in_flight() < slots, "a slot was reused while in flight");
                assert_eq!(token.slot, scheduler.index());
                scheduler.end_frame(&mut device).unwrap();
                assert!(device.in_flight() <= slots);
            }

            for slot in 0..slots {
                assert!(device.waits[slot] >= 3, "slot {} waited {} times", slot, device.waits[slot]);
                assert!(device.resets[slot] >= 3);
            }
            assert_eq!(scheduler.frames_presented(), 3 * slots as u64);
        }
    }

    #[test]
    fn frame_index_cycles_modulo_slot_count() {
        let mut device = MockDevice::new(3);
        let mut scheduler = FrameScheduler::new(3);
        let mut seen = Vec::new();
        for _ in 0..10 {
            seen.push(scheduler.begin_frame(&mut device, false).unwrap().unwrap().slot);
            scheduler.end_frame(&mut device).unwrap();
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn out_of_date_acquire_recreates_before_recording() {
        let mut device = MockDevice::new(3);
        device.acquire_script = vec![Acquire::OutOfDate, Acquire::Image(1)];
        let mut scheduler = FrameScheduler::new(3);

        let token = scheduler.begin_frame(&mut device, false).unwrap().unwrap();
        assert_eq!(token.image, 1);
        assert_eq!(device.recreations, 1);
        assert_eq!(device.unsignaled_acquires, 0);
    }

    #[test]
    fn suboptimal_acquire_consumes_the_signaled_semaphore() {
        let mut device = MockDevice::new(3);
        device.acquire_script = vec![Acquire::Suboptimal(0), Acquire::Image(2)];
        let mut scheduler = FrameScheduler::new(3);

        let token = scheduler.begin_frame(&mut device, false).unwrap().unwrap();
        assert_eq!(token.image, 2);
        assert_eq!(device.unsignaled_acquires, 1);
    }

    #[test]
    fn resize_recreates_without_acquiring_first() {
        let mut device = MockDevice::new(2);
        let mut scheduler = FrameScheduler::new(2);
        scheduler.begin_frame(&mut device, true).unwrap().unwrap();
        assert_eq!(device.recreations, 1);
        assert_eq!(device.unsignaled_acquires, 0);
    }

    #[test]
    fn stale_present_defers_recreation_to_next_frame() {
        let mut device = MockDevice::new(3);
        device.present_script = vec![Present::OutOfDate];
        let mut scheduler = FrameScheduler::new(3);

        scheduler.begin_frame(&mut device, false).unwrap();
        scheduler.end_frame(&mut device).unwrap();
        assert!(scheduler.recreate_pending());
        assert_eq!(device.recreations, 0);

        scheduler.begin_frame(&mut device, false).unwrap();
        assert_eq!(device.recreations, 1);
        assert!(!scheduler.recreate_pending());
    }

    #[test]
    fn zero_sized_surface_skips_frame_and_keeps_index() {
        let mut device = MockDevice::new(3);
        device.surface_zero = true;
        let mut scheduler = FrameScheduler::new(3);

        assert!(scheduler.begin_frame(&mut device, true).unwrap().is_none());
        assert!(!scheduler.in_frame());
        assert_eq!(scheduler.index(), 0);
        assert!(scheduler.recreate_pending());

        device.surface_zero = false;
        assert!(scheduler.begin_frame(&mut device, false).unwrap().is_some());
    }

    #[test]
    fn end_without_begin_is_an_error() {
        let mut device = MockDevice::new(2);
        let mut scheduler = FrameScheduler::new(2);
        assert!(scheduler.end_frame(&mut device).is_err());
    }

    #[test]
    fn deferred_releases_wait_for_their_slot() {
        let mut releases = DeferredReleases::new(3);
        releases.defer(1, "buffer");
        assert!(releases.collect(0).is_empty());
        assert_eq!(releases.pending(), 1);
        assert_eq!(releases.collect(1), vec!["buffer"]);
        assert_eq!(releases.pending(), 0);
    }
}
