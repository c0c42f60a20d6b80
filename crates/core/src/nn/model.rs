use crate::config::ConvConfig;
use crate::error::Result;
use crate::nn::{Conv2d, ReLU};
use crate::profiler::PerformanceProfiler;
use crate::tensor::{Kernel, Tensor};

/// Convolution followed by ReLU.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConvReluNet {
    pub conv: Conv2d,
    pub relu: ReLU,
}

impl ConvReluNet {
    pub fn new(config: ConvConfig) -> Self {
        Self {
            conv: Conv2d::new(config),
            relu: ReLU::new(),
        }
    }

    pub fn forward(&self, x: &Tensor, weights: &Kernel) -> Result<Tensor> {
        let x1 = self.conv.forward(x, weights)?;  // (C_in, H, W) -> (C_out, H', W')
        Ok(self.relu.forward(&x1))
    }

    pub fn forward_profiled(
        &self,
        x: &Tensor,
        weights: &Kernel,
        profiler: &mut PerformanceProfiler,
    ) -> Result<Tensor> {
        let x1 = self.conv.forward_profiled(x, weights, profiler)?;
        Ok(self.relu.forward_profiled(&x1, profiler))
    }
}
