use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use convnet_core::{
    config::{ConvAlgorithm, ConvConfig, CostModel, MacMode},
    nn::{Conv2d, ConvReluNet},
    profiler::PerformanceProfiler,
    tensor::{Kernel, KernelShape, Shape, Tensor},
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    run: RunArgs,
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Options for the demo run. The defaults give plain valid convolution.
#[derive(clap::Args)]
struct RunArgs {
    #[arg(long, default_value_t = 0)]
    padding: usize,
    #[arg(long, default_value_t = 1)]
    stride: usize,
    #[arg(long, value_enum, default_value_t = Algorithm::Direct)]
    algorithm: Algorithm,
    /// Enable outlier-aware MAC with this quantization threshold
    #[arg(long)]
    outlier_threshold: Option<f32>,
    #[arg(long, default_value_t = 1)]
    fp_multipliers: usize,
    /// Log kernel timings, op counts and cost estimates at info level
    #[arg(long)]
    profile: bool,
    /// Tile iterations per filter pass in the cost model
    #[arg(long, default_value_t = 2)]
    iterations_per_tile: u64,
    #[arg(long, default_value_t = 1.0)]
    clock_ghz: f64,
    #[arg(long, default_value_t = 1.5)]
    bandwidth_tbps: f64,
}

#[derive(Subcommand)]
enum Commands {
    /// Direct vs im2col parity check on seeded random data
    Parity {
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, default_value_t = 3)]
        channels: usize,
        #[arg(long, default_value_t = 16)]
        size: usize,
        #[arg(long, default_value_t = 1e-4)]
        tolerance: f32,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Algorithm {
    Direct,
    Im2col,
}

impl From<Algorithm> for ConvAlgorithm {
    fn from(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Direct => ConvAlgorithm::Direct,
            Algorithm::Im2col => ConvAlgorithm::Im2col,
        }
    }
}

impl RunArgs {
    fn conv_config(&self) -> ConvConfig {
        let mac = match self.outlier_threshold {
            Some(threshold) => MacMode::OutlierAware {
                threshold,
                fp_multipliers: self.fp_multipliers,
            },
            None => MacMode::Exact,
        };

        ConvConfig::default()
            .with_padding(self.padding, self.padding)
            .with_stride(self.stride, self.stride)
            .with_algorithm(self.algorithm.into())
            .with_mac(mac)
    }

    fn cost_model(&self) -> CostModel {
        CostModel::default()
            .with_iterations_per_tile(self.iterations_per_tile)
            .with_clock_ghz(self.clock_ghz)
            .with_memory_bandwidth_tbps(self.bandwidth_tbps)
    }

    /// `--profile` raises the default filter so the summary is visible.
    fn default_log_filter(&self) -> &'static str {
        if self.profile { "info" } else { "warn" }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.run.default_log_filter()))
        )
        .with_writer(std::io::stderr)
        .init();

    let config = args.run.conv_config();
    let profile = args.run.profile.then(|| args.run.cost_model());

    match args.command {
        None => run_demo(config, profile)?,
        Some(Commands::Parity { seed, channels, size, tolerance }) => {
            run_parity(config, seed, channels, size, tolerance)?;
        }
    }

    Ok(())
}

fn demo_data() -> Result<(Tensor, Kernel)> {
    #[rustfmt::skip]
    let input = Tensor::from_host(&[
        1.0,  2.0,  3.0,  2.0, 1.0,
        2.0, -1.0, -4.0, -1.0, 2.0,
        3.0, -4.0,  8.0, -4.0, 3.0,
        2.0, -1.0, -4.0, -1.0, 2.0,
        1.0,  2.0,  3.0,  2.0, 1.0,
    ], Shape::plane(5, 5))?;

    // Laplacian
    #[rustfmt::skip]
    let weights = Kernel::plane(3, 3, &[
        0.0,  1.0, 0.0,
        1.0, -4.0, 1.0,
        0.0,  1.0, 0.0,
    ])?;

    Ok((input, weights))
}

fn run_demo(config: ConvConfig, profile: Option<CostModel>) -> Result<()> {
    let (input, weights) = demo_data()?;
    let net = ConvReluNet::new(config);
    info!(input = %input.shape(), kernel = %weights.shape(), "running conv -> relu");

    let output = if let Some(cost_model) = profile {
        cost_model.validate().context("invalid cost model")?;
        let mut profiler = PerformanceProfiler::with_cost_model(cost_model);
        let output = net
            .forward_profiled(&input, &weights, &mut profiler)
            .context("conv -> relu failed")?;
        profiler.log_summary();
        output
    } else {
        net.forward(&input, &weights).context("conv -> relu failed")?
    };

    println!("{}", output);
    Ok(())
}

fn run_parity(config: ConvConfig, seed: u64, channels: usize, size: usize, tolerance: f32) -> Result<()> {
    println!("Running parity check: seed={}, channels={}, size={}...", seed, channels, size);

    let mut rng = StdRng::seed_from_u64(seed);
    let shape = Shape::new(channels, size, size);
    let len = shape.checked_numel().context("parity input is too large")?;
    let data: Vec<f32> = (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let input = Tensor::new(data, shape)?;
    let out_channels = channels.checked_mul(2).context("too many channels")?;
    let weights = Kernel::he_normal(KernelShape::new(out_channels, channels, 3, 3), &mut rng)?;
    debug!(input = %input.shape(), kernel = %weights.shape(), "parity data ready");

    let mut profiler = PerformanceProfiler::new();
    let direct = profiler
        .profile_kernel("direct", || {
            Conv2d::new(config.with_algorithm(ConvAlgorithm::Direct)).forward(&input, &weights)
        })
        .context("direct convolution failed")?;
    let lowered = profiler
        .profile_kernel("im2col", || {
            Conv2d::new(config.with_algorithm(ConvAlgorithm::Im2col)).forward(&input, &weights)
        })
        .context("im2col convolution failed")?;

    let max_diff = direct
        .as_slice()
        .iter()
        .zip(lowered.as_slice())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0f32, |acc, x| acc.max(x));

    let ok = direct.shape() == lowered.shape() && max_diff <= tolerance;
    let avg_ms = |name: &str| profiler.get_kernel_stats(name).map_or(0.0, |s| s.avg_time);
    println!("conv2d {}: max|direct-im2col|={:.8}", direct.shape(), max_diff);
    println!("  direct {:.3}ms, im2col {:.3}ms", avg_ms("direct"), avg_ms("im2col"));
    println!("Parity: {}", if ok { "PASS" } else { "FAIL" });

    if !ok {
        bail!("parity check failed: max diff {} exceeds tolerance {}", max_diff, tolerance);
    }
    Ok(())
}
