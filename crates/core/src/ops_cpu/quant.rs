/// One activation after outlier-aware quantization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Quantized {
    /// Integer-valued, truncated toward zero. Kept in f32 so thresholds past
    /// the i32 range do not clamp.
    Inlier(f32),
    Outlier(f32),
}

/// Outliers seen while evaluating one or more windows.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MacTally {
    pub outliers: u64,
    /// Outliers that found no free fp lane and were clamped to the i32 range.
    pub saturated: u64,
}

impl MacTally {
    pub fn merge(&mut self, other: MacTally) {
        self.outliers += other.outliers;
        self.saturated += other.saturated;
    }
}

/// Mixed-precision multiplier group: integer lanes for small activations and
/// `fp_multipliers` floating-point lanes per window for outliers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierQuantizer {
    pub threshold: f32,
    pub fp_multipliers: usize,
}

impl OutlierQuantizer {
    pub fn new(threshold: f32, fp_multipliers: usize) -> Self {
        Self {
            threshold,
            fp_multipliers,
        }
    }

    pub fn quantize(&self, activation: f32) -> Quantized {
        if activation.abs() > self.threshold {
            Quantized::Outlier(activation)
        } else {
            Quantized::Inlier(activation.trunc())
        }
    }

    /// Dot product of one window. Outliers claim fp lanes in window order.
    pub fn dot(&self, activations: &[f32], weights: &[f32]) -> (f32, MacTally) {
        let mut sum = 0.0f32;
        let mut tally = MacTally::default();

        for (&a, &w) in activations.iter().zip(weights) {
            match self.quantize(a) {
                Quantized::Inlier(q) => sum += q * w,
                Quantized::Outlier(x) => {
                    if (tally.outliers as usize) < self.fp_multipliers {
                        sum += x * w;
                    } else {
                        let clamped = if x > 0.0 { i32::MAX } else { i32::MIN };
                        sum += clamped as f32 * w;
                        tally.saturated += 1;
                    }
                    tally.outliers += 1;
                }
            }
        }

        (sum, tally)
    }
}
