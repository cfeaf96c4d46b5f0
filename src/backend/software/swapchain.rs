// Software "swapchain": N colour images plus one shared depth buffer

use crate::backend::lifecycle::{ChainBuilder, ChainInfo};
use anyhow::Result;

pub struct SoftwareChain {
    pub images: Vec<Vec<u32>>,
    pub depth: Vec<f32>,
    pub extent: (u32, u32),
    next_image: u32,
}

impl SoftwareChain {
    /// Hand out images round-robin, the way a FIFO presentation engine would
    pub fn acquire(&mut self) -> u32 {
        let image = self.next_image;
        self.next_image = (self.next_image + 1) % self.images.len() as u32;
        image
    }
}

impl ChainInfo for SoftwareChain {
    fn image_count(&self) -> usize {
        self.images.len()
    }

    fn format_name(&self) -> String {
        "A8R8G8B8 (host)".to_string()
    }

    fn extent(&self) -> (u32, u32) {
        self.extent
    }
}

pub struct SoftwareChainBuilder {
    image_count: usize,
    pub images_created: u64,
    pub images_destroyed: u64,
}

impl SoftwareChainBuilder {
    pub fn new(image_count: usize) -> Self {
        Self {
            image_count: image_count.max(1),
            images_created: 0,
            images_destroyed: 0,
        }
    }
}

impl ChainBuilder for SoftwareChainBuilder {
    type Chain = SoftwareChain;

    // Submission executes synchronously, nothing is ever left in flight
    fn wait_idle(&mut self) -> Result<()> {
        Ok(())
    }

    fn build(&mut self, extent: (u32, u32)) -> Result<SoftwareChain> {
        let pixels = extent.0 as usize * extent.1 as usize;
        self.images_created += self.image_count as u64;
        Ok(SoftwareChain {
            images: (0..self.image_count).map(|_| vec![0; pixels]).collect(),
            depth: vec![1.0; pixels],
            extent,
            next_image: 0,
        })
    }

    fn teardown(&mut self, chain: SoftwareChain) {
        self.images_destroyed += chain.images.len() as u64;
    }
}
