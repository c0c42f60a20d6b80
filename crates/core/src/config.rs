use crate::error::{Error, Result};

/// How the convolution windows are evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConvAlgorithm {
    /// Sliding-window loop straight over the input.
    #[default]
    Direct,
    /// Lower windows to a column matrix, then one GEMM.
    Im2col,
}

/// Multiply-accumulate arithmetic used inside each window.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum MacMode {
    #[default]
    Exact,
    /// Mixed-precision MAC: activations with `|a| <= threshold` are truncated
    /// to integers, larger ones stay in f32 on one of `fp_multipliers` lanes.
    /// Outliers beyond the available lanes saturate to the i32 range.
    OutlierAware {
        threshold: f32,
        fp_multipliers: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvConfig {
    pub padding: (usize, usize),
    pub stride: (usize, usize),
    pub algorithm: ConvAlgorithm,
    pub mac: MacMode,
}

impl Default for ConvConfig {
    fn default() -> Self {
        Self {
            padding: (0, 0),
            stride: (1, 1),
            algorithm: ConvAlgorithm::Direct,
            mac: MacMode::Exact,
        }
    }
}

impl ConvConfig {
    pub fn with_padding(mut self, pad_h: usize, pad_w: usize) -> Self {
        self.padding = (pad_h, pad_w);
        self
    }

    pub fn with_stride(mut self, stride_h: usize, stride_w: usize) -> Self {
        self.stride = (stride_h, stride_w);
        self
    }

    pub fn with_algorithm(mut self, algorithm: ConvAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_mac(mut self, mac: MacMode) -> Self {
        self.mac = mac;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let (stride_h, stride_w) = self.stride;
        if stride_h == 0 || stride_w == 0 {
            return Err(Error::InvalidConfig(format!(
                "stride must be positive, got ({}, {})",
                stride_h, stride_w
            )));
        }

        if let MacMode::OutlierAware { threshold, .. } = self.mac {
            if !threshold.is_finite() || threshold < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "outlier threshold must be finite and non-negative, got {}",
                    threshold
                )));
            }
        }

        Ok(())
    }
}

/// Hardware figures used to turn op counters into time estimates. Defaults
/// model a 1 GHz accelerator with 1.5 TB/s of memory bandwidth that spends
/// two tile iterations per filter pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostModel {
    pub iterations_per_tile: u64,
    pub clock_ghz: f64,
    pub memory_bandwidth_tbps: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            iterations_per_tile: 2,
            clock_ghz: 1.0,
            memory_bandwidth_tbps: 1.5,
        }
    }
}

impl CostModel {
    pub fn with_iterations_per_tile(mut self, iterations: u64) -> Self {
        self.iterations_per_tile = iterations;
        self
    }

    pub fn with_clock_ghz(mut self, clock_ghz: f64) -> Self {
        self.clock_ghz = clock_ghz;
        self
    }

    pub fn with_memory_bandwidth_tbps(mut self, tbps: f64) -> Self {
        self.memory_bandwidth_tbps = tbps;
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("clock", self.clock_ghz), ("memory bandwidth", self.memory_bandwidth_tbps)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{} must be finite and positive, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Nanoseconds spent running `cycles` clock cycles.
    pub fn compute_time_ns(&self, cycles: u64) -> f64 {
        cycles as f64 / self.clock_ghz
    }

    /// Nanoseconds needed to move `bytes` at the configured bandwidth.
    pub fn memory_time_ns(&self, bytes: u64) -> f64 {
        // 1 TB/s moves 1000 bytes per ns
        bytes as f64 / (self.memory_bandwidth_tbps * 1000.0)
    }
}
