use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use cli::{
    handlers::{TuneOptions, handle_check, handle_tune},
    logger,
};
use flashpipe::DataType;

#[derive(Parser)]
struct Cli {
    /// Log more details to stderr, repeat for more
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Precision {
    F16,
    Bf16,
}

impl From<Precision> for DataType {
    fn from(precision: Precision) -> Self {
        match precision {
            Precision::F16 => DataType::F16,
            Precision::Bf16 => DataType::BF16,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Sweep tile sizes over a product of problem shapes
    Tune {
        #[arg(long, value_delimiter = ',', default_values_t = [1])]
        batch_size: Vec<usize>,
        /// Query and key/value sequence lengths
        #[arg(long, value_delimiter = ',', default_values_t = [1024, 4096])]
        seq_len: Vec<usize>,
        #[arg(long, value_delimiter = ',', default_values_t = [64, 128, 256])]
        head_dim: Vec<usize>,
        #[arg(long, default_value_t = 16)]
        num_q_heads: usize,
        #[arg(long, default_value_t = 16)]
        num_kv_heads: usize,
        #[arg(long, default_value_t = 64)]
        block_q: usize,
        /// Candidates tried in order
        #[arg(long, value_delimiter = ',', default_values_t = [256, 128, 64])]
        block_kv: Vec<usize>,
        #[arg(long, default_value_t = 2)]
        max_concurrent_steps: usize,
        #[arg(long, value_enum, default_value_t = Precision::F16)]
        dtype: Precision,
        /// Use the pipeline-emitter formulation
        #[arg(long)]
        pipeline_emitter: bool,
        /// Compare every run against the reference
        #[arg(long)]
        check: bool,
        /// Try every block_kv candidate instead of stopping at the first that fits
        #[arg(long)]
        exhaustive: bool,
        /// Timed runs per configuration, the fastest is reported
        #[arg(long, default_value_t = 1)]
        runs: usize,
        /// Matmul peak used for the utilization column
        #[arg(long, default_value_t = 1000.0)]
        peak_tflops: f64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// JSON file receiving every measured configuration
        #[arg(long)]
        output: Option<String>,
    },
    /// Run one JSON-described problem with both formulations against the reference
    Check {
        /// JSON file with `problem` and `config`
        #[arg(long = "config")]
        config_path: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logger::init(cli.verbose);

    match cli.command {
        Some(Commands::Tune {
            batch_size,
            seq_len,
            head_dim,
            num_q_heads,
            num_kv_heads,
            block_q,
            block_kv,
            max_concurrent_steps,
            dtype,
            pipeline_emitter,
            check,
            exhaustive,
            runs,
            peak_tflops,
            seed,
            output,
        }) => {
            handle_tune(TuneOptions {
                batch_sizes: batch_size,
                seq_lens: seq_len,
                head_dims: head_dim,
                num_q_heads,
                num_kv_heads,
                block_q,
                block_kvs: block_kv,
                max_concurrent_steps,
                data_type: dtype.into(),
                pipeline_emitter,
                check,
                exhaustive,
                runs,
                peak_tflops,
                seed,
                output_path: output,
            })?;
        },
        Some(Commands::Check {
            config_path,
        }) => {
            handle_check(config_path)?;
        },
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
        },
    }

    Ok(())
}
