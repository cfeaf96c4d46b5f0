// Swapchain Lifecycle Manager
//
// State machine: Uninitialized -> Live -> Recreating -> Live
//
// Recreation always waits for the device to go idle, tears the whole
// swapchain-dependent set down (framebuffers -> render pass -> depth target ->
// swapchain + views) and builds it again in forward order. The builder owns
// the native calls; this type owns the ordering and the bookkeeping.

use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainState {
    Uninitialized,
    Live,
    Recreating,
}

/// What the lifecycle can observe about a built chain
pub trait ChainInfo {
    fn image_count(&self) -> usize;
    fn format_name(&self) -> String;
    fn extent(&self) -> (u32, u32);
}

/// Native construction and destruction of the swapchain-dependent set
pub trait ChainBuilder {
    type Chain: ChainInfo;

    fn wait_idle(&mut self) -> Result<()>;

    /// Build every member in forward dependency order
    fn build(&mut self, extent: (u32, u32)) -> Result<Self::Chain>;

    /// Destroy every member in reverse dependency order
    fn teardown(&mut self, chain: Self::Chain);
}

pub struct SwapchainLifecycle<B: ChainBuilder> {
    builder: B,
    chain: Option<B::Chain>,
    state: SwapchainState,
    created: u64,
    destroyed: u64,
}

impl<B: ChainBuilder> SwapchainLifecycle<B> {
    pub fn new(builder: B) -> Self {
        Self {
            builder,
            chain: None,
            state: SwapchainState::Uninitialized,
            created: 0,
            destroyed: 0,
        }
    }

    pub fn state(&self) -> SwapchainState {
        self.state
    }

    pub fn chain(&self) -> Option<&B::Chain> {
        self.chain.as_ref()
    }

    pub fn chain_mut(&mut self) -> Option<&mut B::Chain> {
        self.chain.as_mut()
    }

    pub fn builder(&self) -> &B {
        &self.builder
    }

    pub fn builder_mut(&mut self) -> &mut B {
        &mut self.builder
    }

    /// Number of chains built / torn down so far
    pub fn counts(&self) -> (u64, u64) {
        (self.created, self.destroyed)
    }

    /// Uninitialized -> Live. Returns false for a zero-sized surface.
    pub fn create(&mut self, extent: (u32, u32)) -> Result<bool> {
        if self.chain.is_some() {
            return self.recreate(extent);
        }
        if extent.0 == 0 || extent.1 == 0 {
            log::debug!("Not creating swapchain for zero-sized surface");
            return Ok(false);
        }

        let chain = self.builder.build(extent)?;
        log::info!(
            "Swapchain live: {} images, {}, {}x{}",
            chain.image_count(),
            chain.format_name(),
            chain.extent().0,
            chain.extent().1
        );
        self.chain = Some(chain);
        self.created += 1;
        self.state = SwapchainState::Live;
        Ok(true)
    }

    /// Live -> Recreating -> Live. Returns false for a zero-sized surface, in
    /// which case the old chain is kept untouched.
    pub fn recreate(&mut self, extent: (u32, u32)) -> Result<bool> {
        if extent.0 == 0 || extent.1 == 0 {
            log::debug!("Deferring swapchain recreation, surface is zero-sized");
            return Ok(false);
        }

        self.state = SwapchainState::Recreating;
        // Nothing may reference the old set once teardown starts
        self.builder.wait_idle()?;

        if let Some(old) = self.chain.take() {
            self.builder.teardown(old);
            self.destroyed += 1;
        }

        let chain = self.builder.build(extent)?;
        log::debug!(
            "Swapchain recreated: {} images, {}, {}x{}",
            chain.image_count(),
            chain.format_name(),
            chain.extent().0,
            chain.extent().1
        );
        self.chain = Some(chain);
        self.created += 1;
        self.state = SwapchainState::Live;
        Ok(true)
    }

    /// Live -> Uninitialized
    pub fn destroy(&mut self) -> Result<()> {
        if let Some(chain) = self.chain.take() {
            self.builder.wait_idle()?;
            self.builder.teardown(chain);
            self.destroyed += 1;
        }
        self.state = SwapchainState::Uninitialized;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockChain {
        views: Vec<u32>,
        framebuffers: Vec<u32>,
        extent: (u32, u32),
    }

    impl ChainInfo for MockChain {
        fn image_count(&self) -> usize {
            self.views.len()
        }
        fn format_name(&self) -> String {
            "B8G8R8A8_UNORM".to_string()
        }
        fn extent(&self) -> (u32, u32) {
            self.extent
        }
    }

    #[derive(Default)]
    struct MockBuilder {
        next_id: u32,
        views_created: u32,
        views_destroyed: u32,
        framebuffers_created: u32,
        framebuffers_destroyed: u32,
        idle_waits: u32,
        teardown_order: Vec<&'static str>,
    }

    impl ChainBuilder for MockBuilder {
        type Chain = MockChain;

        fn wait_idle(&mut self) -> Result<()> {
            self.idle_waits += 1;
            Ok(())
        }

        fn build(&mut self, extent: (u32, u32)) -> Result<MockChain> {
            let mut ids = || {
                self.next_id += 1;
                self.next_id
            };
            let views: Vec<u32> = (0..3).map(|_| ids()).collect();
            let framebuffers: Vec<u32> = (0..3).map(|_| ids()).collect();
            self.views_created += views.len() as u32;
            self.framebuffers_created += framebuffers.len() as u32;
            Ok(MockChain {
                views,
                framebuffers,
                extent,
            })
        }

        fn teardown(&mut self, chain: MockChain) {
            self.teardown_order.push("framebuffers");
            self.framebuffers_destroyed += chain.framebuffers.len() as u32;
            self.teardown_order.push("views");
            self.views_destroyed += chain.views.len() as u32;
        }
    }

    #[test]
    fn recreating_twice_is_idempotent_and_leak_free() {
        let mut lifecycle = SwapchainLifecycle::new(MockBuilder::default());
        assert_eq!(lifecycle.state(), SwapchainState::Uninitialized);
        assert!(lifecycle.create((800, 600)).unwrap());

        assert!(lifecycle.recreate((1024, 768)).unwrap());
        let first = lifecycle.chain().map(|c| (c.image_count(), c.format_name(), c.extent()));
        assert!(lifecycle.recreate((1024, 768)).unwrap());
        let second = lifecycle.chain().map(|c| (c.image_count(), c.format_name(), c.extent()));
        assert_eq!(first, second);

        let builder = lifecycle.builder();
        let live = lifecycle.chain().map(|c| c.views.len() as u32).unwrap_or(0);
        assert_eq!(builder.views_created - builder.views_destroyed, live);
        assert_eq!(builder.framebuffers_created - builder.framebuffers_destroyed, live);
        assert_eq!(lifecycle.counts(), (3, 2));

        lifecycle.destroy().unwrap();
        let builder = lifecycle.builder();
        assert_eq!(builder.views_created, builder.views_destroyed);
        assert_eq!(builder.framebuffers_created, builder.framebuffers_destroyed);
        assert_eq!(lifecycle.state(), SwapchainState::Uninitialized);
    }

    #[test]
    fn recreation_waits_idle_before_teardown() {
        let mut lifecycle = SwapchainLifecycle::new(MockBuilder::default());
        lifecycle.create((640, 480)).unwrap();
        lifecycle.recreate((640, 480)).unwrap();
        assert_eq!(lifecycle.builder().idle_waits, 1);
        assert_eq!(lifecycle.builder().teardown_order, vec!["framebuffers", "views"]);
    }

    #[test]
    fn zero_extent_keeps_existing_chain() {
        let mut lifecycle = SwapchainLifecycle::new(MockBuilder::default());
        assert!(!lifecycle.create((0, 0)).unwrap());
        assert_eq!(lifecycle.state(), SwapchainState::Uninitialized);

        lifecycle.create((320, 200)).unwrap();
        assert!(!lifecycle.recreate((0, 200)).unwrap());
        assert_eq!(lifecycle.state(), SwapchainState::Live);
        assert_eq!(lifecycle.chain().map(|c| c.extent()), Some((320, 200)));
    }
}
