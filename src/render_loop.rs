// =============================================================================
// RENDER LOOP - frame synchronizer and driver
// =============================================================================
//
// FRAME TIMELINE (one iteration):
// ┌──────────────────────────────────────────────────────────────────────────┐
// │  wait slot fence ─> acquire ─> wait image fence ─> submit ─> present     │
// │       │                │                               │                 │
// │  (bounds CPU      (out-of-date:                  (suboptimal/out-of-date │
// │   lead to F)       rebuild now)                   or resize: rebuild)    │
// └──────────────────────────────────────────────────────────────────────────┘
//
// The loop only talks to the window and the GPU through the two traits
// below, so the whole protocol runs the same against a real swapchain and
// against scripted stand-ins.

use crate::backend::{
    AcquireOutcome, ImagesInFlight, PresentOutcome, RendererError, MAX_FRAMES_IN_FLIGHT,
};
use ash::vk;
use std::time::Instant;

type Result<T> = std::result::Result<T, RendererError>;

/// What the driver needs from the window system
pub trait WindowSource {
    /// Process pending events without blocking
    fn poll_events(&mut self);
    /// Block until at least one event has been processed
    fn wait_events(&mut self);
    fn should_close(&self) -> bool;
    fn drawable_extent(&self) -> vk::Extent2D;
    /// Read-and-clear of the resize notification
    fn take_resized(&mut self) -> bool;
}

/// GPU-side primitives of the frame protocol.
///
/// `slot` is always in `0..MAX_FRAMES_IN_FLIGHT`.
pub trait FrameTarget {
    type Fence: Copy;

    fn slot_fence(&self, slot: usize) -> Self::Fence;
    fn wait_for_fence(&mut self, fence: Self::Fence) -> Result<()>;
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome>;
    /// Reset the slot fence, then submit the image's command buffer
    fn submit(&mut self, slot: usize, image_index: u32) -> Result<()>;
    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;
    fn image_count(&self) -> usize;
    fn wait_idle(&mut self) -> Result<()>;
    /// Destroy and rebuild every extent-dependent resource
    fn rebuild(&mut self, window_extent: vk::Extent2D) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented { needs_rebuild: bool },
    /// Acquire reported out-of-date; nothing was submitted
    Skipped,
}

/// Round-robin frame slots plus the image → fence table
pub struct FrameSynchronizer<F> {
    current: usize,
    images_in_flight: ImagesInFlight<F>,
}

impl<F: Copy> FrameSynchronizer<F> {
    pub fn new(image_count: usize) -> Self {
        Self {
            current: 0,
            images_in_flight: ImagesInFlight::new(image_count),
        }
    }

    #[cfg(test)]
    fn current_slot(&self) -> usize {
        self.current
    }

    pub fn draw_frame<T>(&mut self, target: &mut T) -> Result<FrameStatus>
    where
        T: FrameTarget<Fence = F>,
    {
        let slot = self.current;
        let slot_fence = target.slot_fence(slot);

        target.wait_for_fence(slot_fence)?;

        let image_index = match target.acquire_image(slot)? {
            AcquireOutcome::Acquired { image_index, .. } => image_index,
            AcquireOutcome::OutOfDate => return Ok(FrameStatus::Skipped),
        };

        // Another slot may still be rendering into this image when
        // F differs from the swapchain image count.
        if let Some(fence) = self.images_in_flight.pending(image_index) {
            target.wait_for_fence(fence)?;
        }

        target.submit(slot, image_index)?;
        self.images_in_flight.assign(image_index, slot_fence);

        let outcome = target.present(slot, image_index)?;

        self.current = (self.current + 1) % MAX_FRAMES_IN_FLIGHT;

        Ok(FrameStatus::Presented {
            needs_rebuild: outcome.needs_rebuild(),
        })
    }

    /// Called after a rebuild; the device is idle so no fence is pending.
    pub fn reset_images(&mut self, image_count: usize) {
        self.images_in_flight.reset(image_count);
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    pub frames_presented: u64,
    pub recreations: u64,
}

struct FpsCounter {
    frames: u32,
    last_report: Instant,
}

impl FpsCounter {
    fn new() -> Self {
        Self {
            frames: 0,
            last_report: Instant::now(),
        }
    }

    fn tick(&mut self) {
        self.frames += 1;

        let elapsed = self.last_report.elapsed().as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frames as f32 / elapsed;
            log::info!("{:.0} FPS ({:.2}ms)", fps, 1000.0 / fps);
            self.frames = 0;
            self.last_report = Instant::now();
        }
    }
}

/// Top-level cooperative loop: poll → draw → rebuild when needed
pub struct RenderLoop<F> {
    synchronizer: FrameSynchronizer<F>,
    stats: LoopStats,
    fps: Option<FpsCounter>,
}

impl<F: Copy> RenderLoop<F> {
    pub fn new(image_count: usize, show_fps: bool) -> Self {
        Self {
            synchronizer: FrameSynchronizer::new(image_count),
            stats: LoopStats::default(),
            fps: show_fps.then(FpsCounter::new),
        }
    }

    /// Run until the window closes, then drain the GPU.
    pub fn run<W, T>(mut self, window: &mut W, target: &mut T) -> Result<LoopStats>
    where
        W: WindowSource,
        T: FrameTarget<Fence = F>,
    {
        while !window.should_close() {
            window.poll_events();
            self.iterate(window, target)?;
        }

        log::info!("Window closed, waiting for the GPU to finish...");
        target.wait_idle()?;

        log::info!(
            "Presented {} frames, recreated the swapchain {} times",
            self.stats.frames_presented,
            self.stats.recreations
        );

        Ok(self.stats)
    }

    fn iterate<W, T>(&mut self, window: &mut W, target: &mut T) -> Result<()>
    where
        W: WindowSource,
        T: FrameTarget<Fence = F>,
    {
        match self.synchronizer.draw_frame(target)? {
            FrameStatus::Skipped => {
                log::debug!("Swapchain out of date on acquire");
                self.recreate(window, target)
            }
            FrameStatus::Presented { needs_rebuild } => {
                self.stats.frames_presented += 1;
                if let Some(fps) = self.fps.as_mut() {
                    fps.tick();
                }

                // Drain the flag even when the surface already asked for a
                // rebuild, so this resize is not handled twice.
                let resized = window.take_resized();
                if needs_rebuild || resized {
                    self.recreate(window, target)?;
                }
                Ok(())
            }
        }
    }

    fn recreate<W, T>(&mut self, window: &mut W, target: &mut T) -> Result<()>
    where
        W: WindowSource,
        T: FrameTarget<Fence = F>,
    {
        let mut extent = window.drawable_extent();

        // Minimized: a zero-area surface cannot back a swapchain
        while extent.width == 0 || extent.height == 0 {
            if window.should_close() {
                log::debug!("Window closed while minimized, skipping rebuild");
                return Ok(());
            }
            window.wait_events();
            extent = window.drawable_extent();
        }

        // Resizes seen so far are covered by `extent`
        window.take_resized();

        target.wait_idle()?;
        target.rebuild(extent)?;
        self.synchronizer.reset_images(target.image_count());

        self.stats.recreations += 1;
        log::info!("Swapchain recreated at {}x{}", extent.width, extent.height);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, VecDeque};

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Scripted window
    // ─────────────────────────────────────────────────────────────────────

    struct MockWindow {
        extent: vk::Extent2D,
        resized: bool,
        polls: usize,
        close_after_polls: usize,
        closed: bool,
        /// (poll number, new extent) resize events
        resizes: Vec<(usize, vk::Extent2D)>,
        waits: usize,
        /// After this many waits the window is restored to the extent
        restore_after_waits: Option<(usize, vk::Extent2D)>,
        close_after_waits: Option<usize>,
    }

    impl MockWindow {
        fn new(close_after_polls: usize) -> Self {
            Self {
                extent: extent(800, 600),
                resized: false,
                polls: 0,
                close_after_polls,
                closed: false,
                resizes: Vec::new(),
                waits: 0,
                restore_after_waits: None,
                close_after_waits: None,
            }
        }

        fn resize_at(mut self, poll: usize, to: vk::Extent2D) -> Self {
            self.resizes.push((poll, to));
            self
        }
    }

    impl WindowSource for MockWindow {
        fn poll_events(&mut self) {
            self.polls += 1;
            for &(at, to) in &self.resizes {
                if at == self.polls {
                    self.extent = to;
                    self.resized = true;
                }
            }
        }

        fn wait_events(&mut self) {
            self.waits += 1;
            if let Some((after, to)) = self.restore_after_waits {
                if self.waits >= after {
                    self.extent = to;
                    self.resized = true;
                }
            }
            if let Some(after) = self.close_after_waits {
                if self.waits >= after {
                    self.closed = true;
                }
            }
        }

        fn should_close(&self) -> bool {
            self.closed || self.polls >= self.close_after_polls
        }

        fn drawable_extent(&self) -> vk::Extent2D {
            self.extent
        }

        fn take_resized(&mut self) -> bool {
            std::mem::take(&mut self.resized)
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Scripted GPU: fences signal only when waited on
    // ─────────────────────────────────────────────────────────────────────

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        WaitFence(usize),
        Acquire(usize),
        Submit { slot: usize, image: u32, generation: u32 },
        Present { slot: usize, image: u32 },
        WaitIdle,
        Rebuild(u32, u32),
    }

    struct MockTarget {
        image_count: usize,
        next_image: u32,
        scripted_images: VecDeque<u32>,
        acquires: usize,
        out_of_date_acquires: Vec<usize>,
        present_outcomes: VecDeque<PresentOutcome>,
        pending: BTreeSet<usize>,
        max_pending: usize,
        generation: u32,
        extent: vk::Extent2D,
        fail_submit_at: Option<usize>,
        /// Image count reported after the next rebuild
        rebuild_image_count: Option<usize>,
        calls: Vec<Call>,
    }

    impl MockTarget {
        fn new(image_count: usize) -> Self {
            Self {
                image_count,
                next_image: 0,
                scripted_images: VecDeque::new(),
                acquires: 0,
                out_of_date_acquires: Vec::new(),
                present_outcomes: VecDeque::new(),
                pending: BTreeSet::new(),
                max_pending: 0,
                generation: 0,
                extent: extent(800, 600),
                fail_submit_at: None,
                rebuild_image_count: None,
                calls: Vec::new(),
            }
        }

        fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|call| matches(call)).count()
        }

        fn submits(&self) -> usize {
            self.count(|c| matches!(c, Call::Submit { .. }))
        }

        fn presents(&self) -> usize {
            self.count(|c| matches!(c, Call::Present { .. }))
        }

        fn rebuilds(&self) -> Vec<(u32, u32)> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::Rebuild(width, height) => Some((*width, *height)),
                    _ => None,
                })
                .collect()
        }
    }

    impl FrameTarget for MockTarget {
        type Fence = usize;

        fn slot_fence(&self, slot: usize) -> usize {
            slot
        }

        fn wait_for_fence(&mut self, fence: usize) -> Result<()> {
            self.calls.push(Call::WaitFence(fence));
            self.pending.remove(&fence);
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            self.acquires += 1;
            if self.out_of_date_acquires.contains(&self.acquires) {
                return Ok(AcquireOutcome::OutOfDate);
            }

            let image_index = self.scripted_images.pop_front().unwrap_or_else(|| {
                let image = self.next_image;
                self.next_image = (self.next_image + 1) % self.image_count as u32;
                image
            });
            Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal: false,
            })
        }

        fn submit(&mut self, slot: usize, image_index: u32) -> Result<()> {
            assert!(
                !self.pending.contains(&slot),
                "slot {slot} resubmitted before its fence was waited on"
            );
            self.calls.push(Call::Submit {
                slot,
                image: image_index,
                generation: self.generation,
            });
            if self.fail_submit_at == Some(self.submits()) {
                return Err(RendererError::QueueSubmit(vk::Result::ERROR_DEVICE_LOST));
            }
            self.pending.insert(slot);
            self.max_pending = self.max_pending.max(self.pending.len());
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
            self.calls.push(Call::Present {
                slot,
                image: image_index,
            });
            Ok(self
                .present_outcomes
                .pop_front()
                .unwrap_or(PresentOutcome::Presented))
        }

        fn image_count(&self) -> usize {
            self.image_count
        }

        fn wait_idle(&mut self) -> Result<()> {
            self.calls.push(Call::WaitIdle);
            self.pending.clear();
            Ok(())
        }

        fn rebuild(&mut self, window_extent: vk::Extent2D) -> Result<()> {
            assert!(
                window_extent.width > 0 && window_extent.height > 0,
                "rebuild attempted against a zero-area surface"
            );
            assert!(self.pending.is_empty(), "rebuild while work is in flight");
            self.calls.push(Call::Rebuild(window_extent.width, window_extent.height));
            self.generation += 1;
            self.extent = window_extent;
            self.next_image = 0;
            if let Some(count) = self.rebuild_image_count.take() {
                self.image_count = count;
            }
            Ok(())
        }
    }

    fn run(window: &mut MockWindow, target: &mut MockTarget) -> Result<LoopStats> {
        let image_count = target.image_count();
        RenderLoop::new(image_count, false).run(window, target)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Scenarios
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn steady_state_presents_every_iteration() {
        let mut window = MockWindow::new(10);
        let mut target = MockTarget::new(3);

        let stats = run(&mut window, &mut target).unwrap();

        assert_eq!(stats, LoopStats { frames_presented: 10, recreations: 0 });
        assert_eq!(target.submits(), 10);
        assert_eq!(target.presents(), 10);
        assert!(target.rebuilds().is_empty());
        assert_eq!(target.calls.last(), Some(&Call::WaitIdle));
    }

    #[test]
    fn slots_rotate_independently_of_images() {
        let mut window = MockWindow::new(5);
        let mut target = MockTarget::new(3);

        run(&mut window, &mut target).unwrap();

        let submitted: Vec<(usize, u32)> = target
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Submit { slot, image, .. } => Some((*slot, *image)),
                _ => None,
            })
            .collect();
        assert_eq!(submitted, vec![(0, 0), (1, 1), (0, 2), (1, 0), (0, 1)]);
    }

    #[test]
    fn frames_in_flight_never_exceed_slot_count() {
        let mut window = MockWindow::new(50);
        let mut target = MockTarget::new(4);

        run(&mut window, &mut target).unwrap();

        assert_eq!(target.max_pending, MAX_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn waits_on_fence_of_slot_still_using_the_image() {
        let mut window = MockWindow::new(2);
        let mut target = MockTarget::new(3);
        target.scripted_images = VecDeque::from([0, 0]);

        run(&mut window, &mut target).unwrap();

        // Second frame: slot 1 acquires image 0, which slot 0 still owns
        let second_acquire = target
            .calls
            .iter()
            .position(|c| *c == Call::Acquire(1))
            .unwrap();
        assert_eq!(target.calls[second_acquire + 1], Call::WaitFence(0));
        assert_eq!(
            target.calls[second_acquire + 2],
            Call::Submit { slot: 1, image: 0, generation: 0 }
        );
    }

    #[test]
    fn resize_triggers_exactly_one_recreation() {
        let mut window = MockWindow::new(10).resize_at(4, extent(400, 300));
        let mut target = MockTarget::new(3);

        let stats = run(&mut window, &mut target).unwrap();

        assert_eq!(stats.recreations, 1);
        assert_eq!(target.rebuilds(), vec![(400, 300)]);
        assert_eq!((target.extent.width, target.extent.height), (400, 300));
        assert_eq!(target.submits(), 10);

        let generations: Vec<u32> = target
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Submit { generation, .. } => Some(*generation),
                _ => None,
            })
            .collect();
        assert_eq!(generations, vec![0, 0, 0, 0, 1, 1, 1, 1, 1, 1]);
    }

    #[test]
    fn recreation_waits_for_idle_first() {
        let mut window = MockWindow::new(3).resize_at(1, extent(640, 480));
        let mut target = MockTarget::new(3);

        run(&mut window, &mut target).unwrap();

        let rebuild = target
            .calls
            .iter()
            .position(|c| matches!(c, Call::Rebuild(..)))
            .unwrap();
        assert_eq!(target.calls[rebuild - 1], Call::WaitIdle);
    }

    #[test]
    fn suboptimal_present_recreates() {
        let mut window = MockWindow::new(4);
        let mut target = MockTarget::new(3);
        target.present_outcomes =
            VecDeque::from([PresentOutcome::Presented, PresentOutcome::Suboptimal]);

        let stats = run(&mut window, &mut target).unwrap();

        assert_eq!(stats.recreations, 1);
        assert_eq!(target.rebuilds(), vec![(800, 600)]);
    }

    #[test]
    fn out_of_date_present_with_resize_recreates_once() {
        let mut window = MockWindow::new(4).resize_at(2, extent(1024, 768));
        let mut target = MockTarget::new(3);
        target.present_outcomes =
            VecDeque::from([PresentOutcome::Presented, PresentOutcome::OutOfDate]);

        let stats = run(&mut window, &mut target).unwrap();

        assert_eq!(stats.recreations, 1);
        assert_eq!(target.rebuilds(), vec![(1024, 768)]);
    }

    #[test]
    fn out_of_date_acquire_skips_submit_and_keeps_slot() {
        let mut window = MockWindow::new(4);
        let mut target = MockTarget::new(3);
        target.out_of_date_acquires = vec![2];

        let stats = run(&mut window, &mut target).unwrap();

        assert_eq!(stats.recreations, 1);
        assert_eq!(stats.frames_presented, 3);
        assert_eq!(target.submits(), 3);

        let acquires: Vec<usize> = target
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Acquire(slot) => Some(*slot),
                _ => None,
            })
            .collect();
        // The aborted attempt on slot 1 is retried on slot 1
        assert_eq!(acquires, vec![0, 1, 1, 0]);
    }

    #[test]
    fn minimized_window_blocks_until_restored() {
        let mut window = MockWindow::new(6).resize_at(3, extent(0, 0));
        window.restore_after_waits = Some((3, extent(800, 600)));
        let mut target = MockTarget::new(3);

        let stats = run(&mut window, &mut target).unwrap();

        assert_eq!(window.waits, 3);
        assert_eq!(stats.recreations, 1);
        assert_eq!(target.rebuilds(), vec![(800, 600)]);
        assert_eq!(target.submits(), 6);
    }

    #[test]
    fn closing_while_minimized_shuts_down_without_rebuild() {
        let mut window = MockWindow::new(100).resize_at(2, extent(0, 0));
        window.close_after_waits = Some(2);
        let mut target = MockTarget::new(3);

        let stats = run(&mut window, &mut target).unwrap();

        assert_eq!(stats.recreations, 0);
        assert!(target.rebuilds().is_empty());
        assert_eq!(stats.frames_presented, 2);
        assert_eq!(target.calls.last(), Some(&Call::WaitIdle));
    }

    #[test]
    fn repeated_recreation_keeps_image_count_and_extent() {
        let mut window = MockWindow::new(3)
            .resize_at(1, extent(400, 300))
            .resize_at(2, extent(400, 300));
        let mut target = MockTarget::new(3);

        let stats = run(&mut window, &mut target).unwrap();

        assert_eq!(stats.recreations, 2);
        assert_eq!(target.rebuilds(), vec![(400, 300), (400, 300)]);
        assert_eq!(target.image_count(), 3);
    }

    #[test]
    fn submit_failure_is_fatal() {
        let mut window = MockWindow::new(10);
        let mut target = MockTarget::new(3);
        target.fail_submit_at = Some(3);

        let err = run(&mut window, &mut target).unwrap_err();

        assert!(matches!(err, RendererError::QueueSubmit(_)));
        assert_eq!(target.presents(), 2);
    }

    #[test]
    fn synchronizer_advances_slot_only_after_present() {
        let mut target = MockTarget::new(2);
        let mut sync = FrameSynchronizer::new(2);

        assert_eq!(sync.draw_frame(&mut target).unwrap(), FrameStatus::Presented { needs_rebuild: false });
        assert_eq!(sync.current_slot(), 1);

        target.out_of_date_acquires = vec![2];
        assert_eq!(sync.draw_frame(&mut target).unwrap(), FrameStatus::Skipped);
        assert_eq!(sync.current_slot(), 1);
    }

    #[test]
    fn recreation_forgets_fences_of_the_old_swapchain() {
        let mut window = MockWindow::new(100);
        let mut target = MockTarget::new(3);
        let mut render_loop = RenderLoop::new(target.image_count(), false);

        target.scripted_images = VecDeque::from([0]);
        render_loop.synchronizer.draw_frame(&mut target).unwrap();
        assert_eq!(render_loop.synchronizer.images_in_flight.pending(0), Some(0));

        target.rebuild_image_count = Some(4);
        render_loop.recreate(&mut window, &mut target).unwrap();

        assert_eq!(render_loop.synchronizer.images_in_flight.len(), 4);
        assert!((0..4).all(|i| render_loop.synchronizer.images_in_flight.pending(i).is_none()));

        // Image 0 again: slot 0's fence belongs to the old swapchain
        let start = target.calls.len();
        target.scripted_images = VecDeque::from([0]);
        render_loop.synchronizer.draw_frame(&mut target).unwrap();

        assert_eq!(
            target.calls[start..],
            [
                Call::WaitFence(1),
                Call::Acquire(1),
                Call::Submit { slot: 1, image: 0, generation: 1 },
                Call::Present { slot: 1, image: 0 },
            ]
        );
    }
}
