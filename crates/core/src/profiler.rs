use std::collections::HashMap;
use std::mem::size_of;
use std::time::Instant;

use tracing::info;

use crate::config::CostModel;
use crate::ops_cpu::{ConvGeometry, MacTally};

/// Per-kernel wall-time samples and operation counters.
pub struct PerformanceProfiler {
    kernel_times: HashMap<String, Vec<f64>>,
    op_counts: HashMap<String, OpCounts>,
    cost_model: CostModel,
}

impl PerformanceProfiler {
    pub fn new() -> Self {
        Self::with_cost_model(CostModel::default())
    }

    pub fn with_cost_model(cost_model: CostModel) -> Self {
        Self {
            kernel_times: HashMap::new(),
            op_counts: HashMap::new(),
            cost_model,
        }
    }

    pub fn cost_model(&self) -> CostModel {
        self.cost_model
    }

    pub fn profile_kernel<F, R, E>(&mut self, name: &str, op: F) -> Result<R, E>
    where F: FnOnce() -> Result<R, E>
    {
        let start = Instant::now();
        let result = op()?;
        let duration = start.elapsed().as_secs_f64() * 1000.0; // Convert to ms

        self.kernel_times.entry(name.to_string()).or_default().push(duration);
        Ok(result)
    }

    pub fn record_kernel_time(&mut self, name: &str, duration_ms: f64) {
        self.kernel_times.entry(name.to_string()).or_default().push(duration_ms);
    }

    pub fn record_ops(&mut self, name: &str, counts: OpCounts) {
        self.op_counts.entry(name.to_string()).or_default().merge(counts);
    }

    pub fn get_op_counts(&self, name: &str) -> Option<OpCounts> {
        self.op_counts.get(name).copied()
    }

    pub fn get_kernel_stats(&self, name: &str) -> Option<KernelStats> {
        self.kernel_times.get(name).filter(|times| !times.is_empty()).map(|times| {
            let sum: f64 = times.iter().sum();
            let count = times.len();
            let mean = sum / count as f64;

            let variance = times.iter()
                .map(|time| (time - mean).powi(2))
                .sum::<f64>() / count as f64;
            let std_dev = variance.sqrt();

            let min = times.iter().copied().fold(f64::INFINITY, f64::min);
            let max = times.iter().copied().fold(f64::NEG_INFINITY, f64::max);

            KernelStats {
                name: name.to_string(),
                call_count: count,
                total_time: sum,
                avg_time: mean,
                min_time: min,
                max_time: max,
                std_dev,
            }
        })
    }

    /// Modelled compute and memory time for everything recorded under `name`.
    pub fn estimate(&self, name: &str) -> Option<CostEstimate> {
        self.op_counts.get(name).map(|ops| CostEstimate {
            compute_ns: self.cost_model.compute_time_ns(ops.tile_iterations),
            memory_ns: self.cost_model.memory_time_ns(ops.bytes_moved),
        })
    }

    pub fn kernel_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.kernel_times.keys()
            .chain(self.op_counts.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// One `info` event per kernel, in name order.
    pub fn log_summary(&self) {
        info!("=== Performance Profile Summary ===");
        for name in self.kernel_names() {
            let stats = self.get_kernel_stats(name);
            let ops = self.get_op_counts(name).unwrap_or_default();
            let cost = self.estimate(name).unwrap_or_default();
            info!(
                kernel = name,
                calls = stats.as_ref().map_or(0, |s| s.call_count),
                avg_ms = stats.as_ref().map_or(0.0, |s| s.avg_time),
                total_ms = stats.as_ref().map_or(0.0, |s| s.total_time),
                macs = ops.macs,
                activation_reads = ops.activation_reads,
                weight_reads = ops.weight_reads,
                quantization_ops = ops.quantization_ops,
                outliers = ops.outliers,
                saturated = ops.saturated,
                tile_iterations = ops.tile_iterations,
                compute_ns = cost.compute_ns,
                memory_ns = cost.memory_ns,
                "kernel profile"
            );
        }
    }
}

impl Default for PerformanceProfiler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct KernelStats {
    pub name: String,
    pub call_count: usize,
    pub total_time: f64,    // milliseconds
    pub avg_time: f64,      // milliseconds
    pub min_time: f64,      // milliseconds
    pub max_time: f64,      // milliseconds
    pub std_dev: f64,       // milliseconds
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct CostEstimate {
    pub compute_ns: f64,
    pub memory_ns: f64,
}

/// Work done by one or more kernel invocations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OpCounts {
    pub calls: u64,
    pub output_positions: u64,
    pub output_channel_iterations: u64,
    pub macs: u64,
    /// One read per input window.
    pub activation_reads: u64,
    /// One read per (window, output channel) filter fetch.
    pub weight_reads: u64,
    /// Activations run through the outlier quantizer; zero for exact MACs.
    pub quantization_ops: u64,
    pub outliers: u64,
    pub saturated: u64,
    /// Filter passes times iterations per tile, one cycle each.
    pub tile_iterations: u64,
    /// Operand reads plus output writes.
    pub bytes_moved: u64,
}

const F32_BYTES: u64 = size_of::<f32>() as u64;

impl OpCounts {
    /// Counters for one convolution call. `tally` is `None` for exact MACs.
    pub fn for_conv(geom: &ConvGeometry, tally: Option<MacTally>, iterations_per_tile: u64) -> Self {
        let positions = geom.output_positions() as u64;
        let out_channels = geom.kernel.out_channels as u64;
        let window = geom.kernel.window_len() as u64;
        let channel_iterations = positions.saturating_mul(out_channels);
        let elems = (geom.input.numel() + geom.kernel.numel() + geom.output_shape().numel()) as u64;

        Self {
            calls: 1,
            output_positions: positions,
            output_channel_iterations: channel_iterations,
            macs: channel_iterations.saturating_mul(window),
            activation_reads: positions,
            weight_reads: channel_iterations,
            quantization_ops: if tally.is_some() { channel_iterations.saturating_mul(window) } else { 0 },
            outliers: tally.map_or(0, |t| t.outliers),
            saturated: tally.map_or(0, |t| t.saturated),
            tile_iterations: channel_iterations.saturating_mul(iterations_per_tile),
            bytes_moved: elems.saturating_mul(F32_BYTES),
        }
    }

    pub fn for_elementwise(len: usize) -> Self {
        Self {
            calls: 1,
            output_positions: len as u64,
            activation_reads: len as u64,
            bytes_moved: 2 * len as u64 * F32_BYTES,
            ..Self::default()
        }
    }

    pub fn merge(&mut self, other: OpCounts) {
        self.calls += other.calls;
        self.output_positions += other.output_positions;
        self.output_channel_iterations += other.output_channel_iterations;
        self.macs += other.macs;
        self.activation_reads += other.activation_reads;
        self.weight_reads += other.weight_reads;
        self.quantization_ops += other.quantization_ops;
        self.outliers += other.outliers;
        self.saturated += other.saturated;
        self.tile_iterations += other.tile_iterations;
        self.bytes_moved += other.bytes_moved;
    }
}
