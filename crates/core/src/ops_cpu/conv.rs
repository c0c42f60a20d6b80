use crate::error::{Error, Result};
use crate::ops_cpu::matmul::naive_gemm;
use crate::ops_cpu::quant::{MacTally, OutlierQuantizer};
use crate::tensor::{KernelShape, Shape};

/// Validated sizes of one convolution call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub input: Shape,
    pub kernel: KernelShape,
    pub padding: (usize, usize),
    pub stride: (usize, usize),
    pub output_h: usize,
    pub output_w: usize,
}

impl ConvGeometry {
    pub fn new(
        input: Shape,
        kernel: KernelShape,
        padding: (usize, usize),
        stride: (usize, usize),
    ) -> Result<Self> {
        let (pad_h, pad_w) = padding;
        let (stride_h, stride_w) = stride;

        if stride_h == 0 || stride_w == 0 {
            return Err(Error::InvalidConfig(format!(
                "stride must be positive, got ({}, {})",
                stride_h, stride_w
            )));
        }
        if kernel.out_channels == 0 || kernel.in_channels == 0 || kernel.height == 0 || kernel.width == 0 {
            return Err(Error::InvalidShape(format!("kernel {} has an empty dimension", kernel)));
        }
        if input.channels != kernel.in_channels {
            return Err(Error::ChannelMismatch {
                input: input.channels,
                kernel: kernel.in_channels,
            });
        }

        if input.checked_numel().is_none() || kernel.checked_numel().is_none() {
            return Err(Error::InvalidShape(format!("input {} or kernel {} is too large", input, kernel)));
        }

        let (padded_h, padded_w) = match (padded_len(input.height, pad_h), padded_len(input.width, pad_w)) {
            (Some(h), Some(w)) => (h, w),
            _ => {
                return Err(Error::InvalidConfig(format!(
                    "padding ({}, {}) overflows input {}x{}",
                    pad_h, pad_w, input.height, input.width
                )))
            }
        };
        if padded_h < kernel.height || padded_w < kernel.width {
            return Err(Error::InvalidShape(format!(
                "kernel {}x{} does not fit input {}x{} with padding ({}, {})",
                kernel.height, kernel.width, input.height, input.width, pad_h, pad_w
            )));
        }

        let geom = Self {
            input,
            kernel,
            padding,
            stride,
            output_h: (padded_h - kernel.height) / stride_h + 1,
            output_w: (padded_w - kernel.width) / stride_w + 1,
        };

        // Output and the im2col column matrix must both be allocatable.
        let cols = Shape::new(kernel.window_len(), geom.output_h, geom.output_w);
        if geom.output_shape().checked_numel().is_none() || cols.checked_numel().is_none() {
            return Err(Error::InvalidShape(format!(
                "output {}x{} per channel is too large",
                geom.output_h, geom.output_w
            )));
        }

        Ok(geom)
    }

    pub fn output_shape(&self) -> Shape {
        Shape::new(self.kernel.out_channels, self.output_h, self.output_w)
    }

    pub fn output_positions(&self) -> usize {
        self.output_h * self.output_w
    }

    /// Input element feeding tap `(c, ky, kx)` of the window at `(out_y, out_x)`,
    /// or `None` when it falls in the zero padding.
    fn input_index(&self, c: usize, out_y: usize, out_x: usize, ky: usize, kx: usize) -> Option<usize> {
        let in_y = (out_y * self.stride.0 + ky).checked_sub(self.padding.0)?;
        let in_x = (out_x * self.stride.1 + kx).checked_sub(self.padding.1)?;
        if in_y >= self.input.height || in_x >= self.input.width {
            return None;
        }
        Some(c * self.input.plane_len() + in_y * self.input.width + in_x)
    }

    /// Copies the window at `(out_y, out_x)` into `window` in (c, ky, kx) order.
    fn gather_window(&self, input: &[f32], out_y: usize, out_x: usize, window: &mut [f32]) {
        let KernelShape { in_channels, height: kernel_h, width: kernel_w, .. } = self.kernel;
        let mut i = 0;
        for c in 0..in_channels {
            for ky in 0..kernel_h {
                for kx in 0..kernel_w {
                    window[i] = self
                        .input_index(c, out_y, out_x, ky, kx)
                        .map_or(0.0, |idx| input[idx]);
                    i += 1;
                }
            }
        }
    }
}

/// `len + 2 * pad`, if it fits in `usize`.
fn padded_len(len: usize, pad: usize) -> Option<usize> {
    pad.checked_mul(2)?.checked_add(len)
}

/// Sliding-window convolution (cross-correlation) writing CHW output.
pub fn conv2d_direct(
    input: &[f32],
    weights: &[f32],
    geom: &ConvGeometry,
    quantizer: Option<&OutlierQuantizer>,
    output: &mut [f32],
) -> MacTally {
    let KernelShape { out_channels, in_channels, height: kernel_h, width: kernel_w } = geom.kernel;
    let window_len = geom.kernel.window_len();
    let positions = geom.output_positions();
    let mut tally = MacTally::default();

    match quantizer {
        None => {
            for oc in 0..out_channels {
                let filter = &weights[oc * window_len..(oc + 1) * window_len];
                for out_y in 0..geom.output_h {
                    for out_x in 0..geom.output_w {
                        let mut sum = 0.0f32;
                        for c in 0..in_channels {
                            for ky in 0..kernel_h {
                                for kx in 0..kernel_w {
                                    if let Some(idx) = geom.input_index(c, out_y, out_x, ky, kx) {
                                        sum += input[idx] * filter[(c * kernel_h + ky) * kernel_w + kx];
                                    }
                                }
                            }
                        }
                        output[oc * positions + out_y * geom.output_w + out_x] = sum;
                    }
                }
            }
        }
        Some(q) => {
            let mut window = vec![0.0f32; window_len];
            for out_y in 0..geom.output_h {
                for out_x in 0..geom.output_w {
                    geom.gather_window(input, out_y, out_x, &mut window);
                    for oc in 0..out_channels {
                        let filter = &weights[oc * window_len..(oc + 1) * window_len];
                        let (sum, t) = q.dot(&window, filter);
                        output[oc * positions + out_y * geom.output_w + out_x] = sum;
                        tally.merge(t);
                    }
                }
            }
        }
    }

    tally
}

/// Lowers every window to a column: `cols` is `(C*Kh*Kw) x (out_h*out_w)`.
pub fn im2col(input: &[f32], cols: &mut [f32], geom: &ConvGeometry) {
    let KernelShape { in_channels, height: kernel_h, width: kernel_w, .. } = geom.kernel;
    let col_cols = geom.output_positions();

    for out_y in 0..geom.output_h {
        for out_x in 0..geom.output_w {
            let col_idx = out_y * geom.output_w + out_x;
            for c in 0..in_channels {
                for ky in 0..kernel_h {
                    for kx in 0..kernel_w {
                        let row_idx = c * (kernel_h * kernel_w) + ky * kernel_w + kx;
                        cols[row_idx * col_cols + col_idx] = geom
                            .input_index(c, out_y, out_x, ky, kx)
                            .map_or(0.0, |idx| input[idx]);
                    }
                }
            }
        }
    }
}

/// im2col followed by `W x cols`; the product is already CHW.
pub fn conv2d_im2col(
    input: &[f32],
    weights: &[f32],
    geom: &ConvGeometry,
    quantizer: Option<&OutlierQuantizer>,
    output: &mut [f32],
) -> MacTally {
    let out_channels = geom.kernel.out_channels;
    let col_rows = geom.kernel.window_len();
    let col_cols = geom.output_positions();

    let mut cols = vec![0.0f32; col_rows * col_cols];
    im2col(input, &mut cols, geom);

    let mut tally = MacTally::default();
    match quantizer {
        None => naive_gemm(weights, &cols, output, out_channels, col_cols, col_rows, 1.0, 0.0),
        Some(q) => {
            let mut column = vec![0.0f32; col_rows];
            for j in 0..col_cols {
                for (r, v) in column.iter_mut().enumerate() {
                    *v = cols[r * col_cols + j];
                }
                for oc in 0..out_channels {
                    let filter = &weights[oc * col_rows..(oc + 1) * col_rows];
                    let (sum, t) = q.dot(&column, filter);
                    output[oc * col_cols + j] = sum;
                    tally.merge(t);
                }
            }
        }
    }

    tally
}
