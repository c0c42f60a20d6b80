use std::fmt;

use rand::Rng;

use crate::error::{Error, Result};

/// Largest element count a `Vec<f32>` can hold.
const MAX_ELEMS: usize = isize::MAX as usize / std::mem::size_of::<f32>();

/// Dimensions of a single CHW feature map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl Shape {
    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        Self { channels, height, width }
    }

    pub fn plane(height: usize, width: usize) -> Self {
        Self::new(1, height, width)
    }

    pub fn vector(len: usize) -> Self {
        Self::new(1, 1, len)
    }

    pub fn numel(&self) -> usize {
        self.channels * self.height * self.width
    }

    /// `numel`, or `None` when the product overflows or exceeds what a
    /// buffer can hold.
    pub fn checked_numel(&self) -> Option<usize> {
        checked_product(&[self.channels, self.height, self.width])
    }

    pub fn plane_len(&self) -> usize {
        self.height * self.width
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.channels, self.height, self.width)
    }
}

/// A feature map: row-major CHW values plus the shape that interprets them.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    buf: Vec<f32>,
    shape: Shape,
}

impl Tensor {
    pub fn new(buf: Vec<f32>, shape: Shape) -> Result<Self> {
        check_len(buf.len(), shape.checked_numel(), || shape.to_string())?;
        Ok(Self { buf, shape })
    }

    pub fn zeros(shape: Shape) -> Self {
        Self {
            buf: vec![0.0; shape.numel()],
            shape,
        }
    }

    pub fn from_host(data: &[f32], shape: Shape) -> Result<Self> {
        Self::new(data.to_vec(), shape)
    }

    /// 1D tensor, laid out as a single 1xN row.
    pub fn vector(data: &[f32]) -> Self {
        Self {
            buf: data.to_vec(),
            shape: Shape::vector(data.len()),
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.buf
    }

    pub(crate) fn buf_mut(&mut self) -> &mut [f32] {
        &mut self.buf
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.buf.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", v)?;
        }
        Ok(())
    }
}

/// Dimensions of a convolution kernel, OIHW.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelShape {
    pub out_channels: usize,
    pub in_channels: usize,
    pub height: usize,
    pub width: usize,
}

impl KernelShape {
    pub fn new(out_channels: usize, in_channels: usize, height: usize, width: usize) -> Self {
        Self {
            out_channels,
            in_channels,
            height,
            width,
        }
    }

    /// Number of taps feeding one output value.
    pub fn window_len(&self) -> usize {
        self.in_channels * self.height * self.width
    }

    pub fn numel(&self) -> usize {
        self.out_channels * self.window_len()
    }

    pub fn checked_numel(&self) -> Option<usize> {
        checked_product(&[self.out_channels, self.in_channels, self.height, self.width])
    }
}

impl fmt::Display for KernelShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}x{}x{}",
            self.out_channels, self.in_channels, self.height, self.width
        )
    }
}

/// Convolution weights. Row `oc` of the flattened buffer holds the
/// `in_channels * height * width` taps of output channel `oc`.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    buf: Vec<f32>,
    shape: KernelShape,
}

impl Kernel {
    pub fn new(buf: Vec<f32>, shape: KernelShape) -> Result<Self> {
        check_len(buf.len(), shape.checked_numel(), || shape.to_string())?;
        Ok(Self { buf, shape })
    }

    pub fn from_host(data: &[f32], shape: KernelShape) -> Result<Self> {
        Self::new(data.to_vec(), shape)
    }

    /// 1D kernel for a single-channel 1xN input.
    pub fn vector(data: &[f32]) -> Self {
        Self {
            buf: data.to_vec(),
            shape: KernelShape::new(1, 1, 1, data.len()),
        }
    }

    pub fn plane(height: usize, width: usize, data: &[f32]) -> Result<Self> {
        Self::from_host(data, KernelShape::new(1, 1, height, width))
    }

    /// He-normal initialisation, scaled by the fan-in of one window.
    pub fn he_normal<R: Rng>(shape: KernelShape, rng: &mut R) -> Result<Self> {
        let numel = shape
            .checked_numel()
            .ok_or_else(|| Error::InvalidShape(format!("kernel {} is too large", shape)))?;
        let fan_in = shape.window_len().max(1);
        let std_dev = (2.0 / fan_in as f32).sqrt();

        let buf = (0..numel)
            .map(|_| {
                // Box-Muller
                let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
                let u2: f32 = rng.gen();
                let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos();
                std_dev * z0
            })
            .collect();

        Ok(Self { buf, shape })
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.buf
    }

    pub fn shape(&self) -> KernelShape {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

fn checked_product(dims: &[usize]) -> Option<usize> {
    dims.iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .filter(|&n| n <= MAX_ELEMS)
}

fn check_len(actual: usize, expected: Option<usize>, shape: impl FnOnce() -> String) -> Result<()> {
    let Some(expected) = expected else {
        return Err(Error::InvalidShape(format!("{} has too many elements", shape())));
    };
    if actual != expected {
        return Err(Error::LengthMismatch {
            shape: shape(),
            expected,
            actual,
        });
    }
    Ok(())
}
