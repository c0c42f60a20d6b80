use std::time::Instant;

use tracing::{debug, trace};

use crate::config::{ConvAlgorithm, ConvConfig, MacMode};
use crate::error::Result;
use crate::ops_cpu::{conv2d_direct, conv2d_im2col, relu_forward, ConvGeometry, OutlierQuantizer};
use crate::profiler::{OpCounts, PerformanceProfiler};
use crate::tensor::{Kernel, KernelShape, Shape, Tensor};

/// 2D convolution over a CHW input. Holds only configuration; weights are
/// supplied per call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Conv2d {
    pub config: ConvConfig,
}

impl Conv2d {
    pub fn new(config: ConvConfig) -> Self {
        Self { config }
    }

    pub fn output_shape(&self, input: Shape, kernel: KernelShape) -> Result<Shape> {
        self.config.validate()?;
        let geom = ConvGeometry::new(input, kernel, self.config.padding, self.config.stride)?;
        Ok(geom.output_shape())
    }

    pub fn forward(&self, x: &Tensor, weights: &Kernel) -> Result<Tensor> {
        self.run(x, weights, None)
    }

    pub fn forward_profiled(
        &self,
        x: &Tensor,
        weights: &Kernel,
        profiler: &mut PerformanceProfiler,
    ) -> Result<Tensor> {
        self.run(x, weights, Some(profiler))
    }

    fn run(
        &self,
        x: &Tensor,
        weights: &Kernel,
        profiler: Option<&mut PerformanceProfiler>,
    ) -> Result<Tensor> {
        self.config.validate()?;
        let geom = ConvGeometry::new(x.shape(), weights.shape(), self.config.padding, self.config.stride)?;
        debug!(
            input = %x.shape(),
            kernel = %weights.shape(),
            output = %geom.output_shape(),
            "conv2d forward"
        );

        let quantizer = match self.config.mac {
            MacMode::Exact => None,
            MacMode::OutlierAware { threshold, fp_multipliers } => {
                Some(OutlierQuantizer::new(threshold, fp_multipliers))
            }
        };

        let mut output = Tensor::zeros(geom.output_shape());
        let start = Instant::now();
        let tally = match self.config.algorithm {
            ConvAlgorithm::Direct => {
                trace!("direct kernel");
                conv2d_direct(x.as_slice(), weights.as_slice(), &geom, quantizer.as_ref(), output.buf_mut())
            }
            ConvAlgorithm::Im2col => {
                trace!("im2col + gemm kernel");
                conv2d_im2col(x.as_slice(), weights.as_slice(), &geom, quantizer.as_ref(), output.buf_mut())
            }
        };

        if tally.saturated > 0 {
            debug!(outliers = tally.outliers, saturated = tally.saturated, "outlier lanes exhausted");
        }
        if let Some(profiler) = profiler {
            profiler.record_kernel_time("conv2d", start.elapsed().as_secs_f64() * 1000.0);
            let tally = quantizer.is_some().then_some(tally);
            let counts = OpCounts::for_conv(&geom, tally, profiler.cost_model().iterations_per_tile);
            profiler.record_ops("conv2d", counts);
        }

        Ok(output)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReLU;

impl ReLU {
    pub fn new() -> Self {
        Self
    }

    pub fn forward(&self, x: &Tensor) -> Tensor {
        let mut output = Tensor::zeros(x.shape());
        relu_forward(x.as_slice(), output.buf_mut());
        output
    }

    pub fn forward_profiled(&self, x: &Tensor, profiler: &mut PerformanceProfiler) -> Tensor {
        let start = Instant::now();
        let output = self.forward(x);
        profiler.record_kernel_time("relu", start.elapsed().as_secs_f64() * 1000.0);
        profiler.record_ops("relu", OpCounts::for_elementwise(x.len()));
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CostModel;
    use crate::error::Error;

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-5, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn conv_1d_scenario() {
        let conv = Conv2d::default();
        let out = conv
            .forward(&Tensor::vector(&[1.0, 2.0, 3.0, 4.0, 5.0]), &Kernel::vector(&[1.0, 0.0, -1.0]))
            .unwrap();
        assert_eq!(out.shape(), Shape::vector(3));
        assert_close(out.as_slice(), &[-2.0, -2.0, -2.0]);
    }

    #[test]
    fn conv_does_not_mutate_arguments() {
        let x = Tensor::vector(&[1.0, -2.0, 3.0]);
        let w = Kernel::vector(&[2.0]);
        let (x_before, w_before) = (x.clone(), w.clone());
        let out = Conv2d::default().forward(&x, &w).unwrap();
        assert_eq!(x, x_before);
        assert_eq!(w, w_before);
        assert_close(out.as_slice(), &[2.0, -4.0, 6.0]);
    }

    #[test]
    fn conv_2d_known_values() {
        // 1x3x3 input, 2x2 box filter
        let x = Tensor::from_host(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0], Shape::plane(3, 3)).unwrap();
        let w = Kernel::plane(2, 2, &[1.0, 1.0, 1.0, 1.0]).unwrap();
        let out = Conv2d::default().forward(&x, &w).unwrap();
        assert_eq!(out.shape(), Shape::plane(2, 2));
        assert_close(out.as_slice(), &[12.0, 16.0, 24.0, 28.0]);
    }

    #[test]
    fn conv_sums_over_input_channels() {
        // two 2x2 channels, one 1x1 filter per channel summing them with weights 1 and 10
        let x = Tensor::from_host(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0], Shape::new(2, 2, 2)).unwrap();
        let w = Kernel::from_host(&[1.0, 10.0, -1.0, 0.0], KernelShape::new(2, 2, 1, 1)).unwrap();
        let out = Conv2d::default().forward(&x, &w).unwrap();
        assert_eq!(out.shape(), Shape::new(2, 2, 2));
        assert_close(out.as_slice(), &[51.0, 62.0, 73.0, 84.0, -1.0, -2.0, -3.0, -4.0]);
    }

    #[test]
    fn conv_with_padding_and_stride() {
        let x = Tensor::from_host(&[1.0, 2.0, 3.0, 4.0], Shape::plane(2, 2)).unwrap();
        let w = Kernel::plane(3, 3, &[1.0; 9]).unwrap();
        let conv = Conv2d::new(ConvConfig::default().with_padding(1, 1));
        let out = conv.forward(&x, &w).unwrap();
        assert_eq!(out.shape(), Shape::plane(2, 2));
        assert_close(out.as_slice(), &[10.0, 10.0, 10.0, 10.0]);

        let x = Tensor::vector(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        let conv = Conv2d::new(ConvConfig::default().with_stride(1, 2));
        let out = conv.forward(&x, &Kernel::vector(&[1.0, 1.0, 1.0])).unwrap();
        assert_close(out.as_slice(), &[6.0, 12.0, 18.0]);
    }

    #[test]
    fn oversized_kernel_is_invalid_shape() {
        let err = Conv2d::default()
            .forward(&Tensor::vector(&[1.0, 2.0]), &Kernel::vector(&[1.0, 2.0, 3.0]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidShape(_)));
    }

    #[test]
    fn zero_stride_is_invalid_config() {
        let conv = Conv2d::new(ConvConfig::default().with_stride(1, 0));
        let err = conv.forward(&Tensor::vector(&[1.0]), &Kernel::vector(&[1.0])).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn outlier_aware_mode_changes_arithmetic() {
        let x = Tensor::vector(&[0.7, 3.0, 5.0, 1.2]);
        let w = Kernel::vector(&[1.0, 1.0, 1.0, 1.0]);
        let conv = Conv2d::new(ConvConfig::default().with_mac(MacMode::OutlierAware {
            threshold: 4.0,
            fp_multipliers: 1,
        }));
        // 0.7 -> 0, 3.0 -> 3, 5.0 outlier on its fp lane, 1.2 -> 1
        let out = conv.forward(&x, &w).unwrap();
        assert_close(out.as_slice(), &[9.0]);
    }

    #[test]
    fn large_inliers_are_not_clamped() {
        let conv = Conv2d::new(ConvConfig::default().with_mac(MacMode::OutlierAware {
            threshold: 1e10,
            fp_multipliers: 1,
        }));
        let out = conv.forward(&Tensor::vector(&[5e9, 1.5]), &Kernel::vector(&[1.0])).unwrap();
        assert_eq!(out.as_slice(), &[5e9, 1.0]);
    }

    #[test]
    fn huge_padding_is_an_error_not_a_panic() {
        let conv = Conv2d::new(ConvConfig::default().with_padding(usize::MAX / 2 + 1, 0));
        let err = conv.forward(&Tensor::vector(&[1.0]), &Kernel::vector(&[1.0])).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let conv = Conv2d::new(ConvConfig::default().with_padding(0, usize::MAX / 8));
        let err = conv.forward(&Tensor::vector(&[1.0]), &Kernel::vector(&[1.0])).unwrap_err();
        assert!(matches!(err, Error::InvalidShape(_)));
        assert!(conv.output_shape(Shape::vector(1), KernelShape::new(1, 1, 1, 1)).is_err());
    }

    #[test]
    fn output_shape_matches_forward() {
        let conv = Conv2d::new(ConvConfig::default().with_padding(1, 0).with_stride(2, 1));
        let shape = conv.output_shape(Shape::new(2, 5, 4), KernelShape::new(3, 2, 3, 2)).unwrap();
        assert_eq!(shape, Shape::new(3, 3, 3));
    }

    #[test]
    fn relu_scenario_keeps_shape() {
        let x = Tensor::from_host(&[-1.0, 0.0, 2.0, -3.0, 4.0, -0.5], Shape::plane(2, 3)).unwrap();
        let y = ReLU::new().forward(&x);
        assert_eq!(y.shape(), Shape::plane(2, 3));
        assert_eq!(y.as_slice(), &[0.0, 0.0, 2.0, 0.0, 4.0, 0.0]);
    }

    #[test]
    fn profiled_forward_records_counters() {
        let mut profiler = PerformanceProfiler::new();
        let x = Tensor::vector(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let y = Conv2d::default()
            .forward_profiled(&x, &Kernel::vector(&[1.0, 0.0, -1.0]), &mut profiler)
            .unwrap();
        let _ = ReLU::new().forward_profiled(&y, &mut profiler);

        let conv = profiler.get_op_counts("conv2d").unwrap();
        assert_eq!(conv.calls, 1);
        assert_eq!(conv.macs, 9);
        assert_eq!(conv.quantization_ops, 0);
        assert_eq!(conv.tile_iterations, 3 * 2);
        assert_eq!(profiler.get_op_counts("relu").unwrap().activation_reads, 3);
        assert_eq!(profiler.get_kernel_stats("conv2d").unwrap().call_count, 1);
    }

    #[test]
    fn quantized_forward_counts_quantizer_work() {
        let cost = CostModel::default().with_iterations_per_tile(4);
        let mut profiler = PerformanceProfiler::with_cost_model(cost);
        let conv = Conv2d::new(ConvConfig::default().with_mac(MacMode::OutlierAware {
            threshold: 2.0,
            fp_multipliers: 0,
        }));
        conv.forward_profiled(&Tensor::vector(&[1.0, 3.0, 0.5, -4.0]), &Kernel::vector(&[1.0, 1.0]), &mut profiler)
            .unwrap();

        let counts = profiler.get_op_counts("conv2d").unwrap();
        assert_eq!(counts.quantization_ops, 3 * 2);
        assert_eq!(counts.outliers, 3);
        assert_eq!(counts.saturated, 3);
        assert_eq!(counts.tile_iterations, 3 * 4);
        assert!(profiler.estimate("conv2d").unwrap().memory_ns > 0.0);
    }
}
