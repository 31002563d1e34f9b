use std::{fs, time::Instant};

use comfy_table::{CellAlignment, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use console::Style;
use flashpipe::{
    ATOL, Array, AttentionError, AttentionOutput, DataType, RTOL, TuningConfig, attention::AttentionProblem,
    attention_reference, attention_with_backend, attention_with_pipeline_emitter_and_backend, backends::cpu::Cpu,
    max_violation,
};
use indicatif::ProgressBar;
use log::{debug, info};
use serde::Serialize;

use crate::workload::ProblemShape;

/// Sequences at least this long are not checked against the oracle.
const MAX_CHECKED_SEQ_LEN: usize = 32768;

/// Problem product and tile candidates swept by `tune`.
#[derive(Debug, Clone)]
pub struct TuneOptions {
    pub batch_sizes: Vec<usize>,
    pub seq_lens: Vec<usize>,
    pub head_dims: Vec<usize>,
    pub num_q_heads: usize,
    pub num_kv_heads: usize,
    pub block_q: usize,
    pub block_kvs: Vec<usize>,
    pub max_concurrent_steps: usize,
    pub data_type: DataType,
    pub pipeline_emitter: bool,
    pub check: bool,
    /// Stop at the first configuration that fits unless set.
    pub exhaustive: bool,
    pub runs: usize,
    pub peak_tflops: f64,
    pub seed: u64,
    pub output_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TuneResult {
    pub problem: ProblemShape,
    pub config: TuningConfig,
    pub pipeline_emitter: bool,
    pub runtime_us: f64,
    pub tflops: f64,
    pub utilization_percent: f64,
    pub max_violation: Option<f32>,
}

pub fn handle_tune(options: TuneOptions) -> Result<(), Box<dyn std::error::Error>> {
    // The pipelined formulation is also swept without the schedule barrier.
    let schedule_barrier_options: &[bool] = if options.pipeline_emitter {
        &[true, false]
    } else {
        &[true]
    };

    let mut problems = Vec::new();
    for &batch_size in &options.batch_sizes {
        for &seq_len in &options.seq_lens {
            for &head_dim in &options.head_dims {
                for &use_schedule_barrier in schedule_barrier_options {
                    let problem = ProblemShape {
                        batch_size,
                        q_seq_len: seq_len,
                        kv_seq_len: seq_len,
                        num_q_heads: options.num_q_heads,
                        num_kv_heads: options.num_kv_heads,
                        head_dim,
                        data_type: options.data_type,
                    };
                    problems.push((problem, use_schedule_barrier));
                }
            }
        }
    }

    let backend = Cpu::new();
    let progress_bar = ProgressBar::new(problems.len() as u64);
    progress_bar.set_position(0);

    let mut results = Vec::new();
    let mut best_per_problem = Vec::new();
    for (problem, use_schedule_barrier) in problems {
        let (q, k, v) = problem.random_inputs(options.seed)?;
        let expected = if options.check && problem.q_seq_len < MAX_CHECKED_SEQ_LEN {
            Some(attention_reference(&q, &k, &v, false)?)
        } else {
            None
        };

        let mut best: Option<TuneResult> = None;
        for &block_kv in &options.block_kvs {
            let config = TuningConfig::new(options.block_q, block_kv, options.max_concurrent_steps)?
                .with_schedule_barrier(use_schedule_barrier);
            let (output, runtime_us) =
                match measure(&backend, &q, &k, &v, &config, options.pipeline_emitter, options.runs) {
                    Ok(measured) => measured,
                    Err(error) if error.is_resource_exhausted() => {
                        debug!("Skipping {config:?} for {problem:?}: {error}");
                        continue;
                    },
                    Err(error) => return Err(error.into()),
                };

            let max_violation = match &expected {
                Some(expected) => {
                    let violation = max_violation(&output.out, &expected.out, RTOL);
                    if violation > ATOL {
                        return Err(format!(
                            "{problem:?} with {config:?} differs from the reference by {violation:e} (atol {ATOL:e}, rtol {RTOL:e})"
                        )
                        .into());
                    }
                    Some(violation)
                },
                None => None,
            };

            let matmul_flops = AttentionProblem::new(&q, &k, &v, &config)?.matmul_flops();
            let optimal_us = matmul_flops / (options.peak_tflops * 1e12) * 1e6;
            let result = TuneResult {
                problem,
                config,
                pipeline_emitter: options.pipeline_emitter,
                runtime_us,
                tflops: matmul_flops / (runtime_us * 1e-6) / 1e12,
                utilization_percent: optimal_us / runtime_us * 100.0,
                max_violation,
            };
            progress_bar.println(format!(
                "seq_len={:<6} head_dim={:<4} schedule_barrier={:<5} block_q={:<4} block_kv={:<4}: {:<9.1}us = {:4.1}% utilization",
                problem.q_seq_len,
                problem.head_dim,
                use_schedule_barrier,
                config.block_q(),
                config.block_kv(),
                result.runtime_us,
                result.utilization_percent,
            ));
            info!("{result:?}");

            if best.as_ref().is_none_or(|best| result.runtime_us < best.runtime_us) {
                best = Some(result.clone());
            }
            results.push(result);
            if !options.exhaustive {
                break;
            }
        }

        if let Some(best) = best {
            best_per_problem.push(best);
        }
        progress_bar.inc(1);
    }
    progress_bar.finish();

    if let Some(output_path) = &options.output_path {
        fs::write(output_path, serde_json::to_string_pretty(&results)?)?;
    }

    if best_per_problem.is_empty() {
        let style = Style::new().yellow();
        println!("{}", style.apply_to("No configuration fits in shared memory"));
        return Ok(());
    }
    println!("{}", summary_table(&best_per_problem));

    Ok(())
}

fn measure(
    backend: &Cpu,
    q: &Array,
    k: &Array,
    v: &Array,
    config: &TuningConfig,
    pipeline_emitter: bool,
    runs: usize,
) -> Result<(AttentionOutput, f64), AttentionError> {
    let run = || {
        if pipeline_emitter {
            attention_with_pipeline_emitter_and_backend(backend, q, k, v, config, false)
        } else {
            attention_with_backend(backend, q, k, v, config, false)
        }
    };

    let run_start = Instant::now();
    let output = run()?;
    let mut fastest_us = run_start.elapsed().as_secs_f64() * 1e6;
    for _ in 1..runs {
        let run_start = Instant::now();
        run()?;
        fastest_us = fastest_us.min(run_start.elapsed().as_secs_f64() * 1e6);
    }
    Ok((output, fastest_us))
}

fn summary_table(results: &[TuneResult]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            "Batch",
            "Seq len",
            "Head dim",
            "Schedule barrier",
            "block_q",
            "block_kv",
            "Runtime, us",
            "TFLOP/s",
            "Utilization, %",
        ]);
    for result in results {
        table.add_row(vec![
            result.problem.batch_size.to_string(),
            result.problem.q_seq_len.to_string(),
            result.problem.head_dim.to_string(),
            result.config.use_schedule_barrier().to_string(),
            result.config.block_q().to_string(),
            result.config.block_kv().to_string(),
            format!("{:.1}", result.runtime_us),
            format!("{:.3}", result.tflops),
            format!("{:.2}", result.utilization_percent),
        ]);
    }
    for index in 6..9 {
        let column = table.column_mut(index).expect("Column not found");
        column.set_cell_alignment(CellAlignment::Right);
    }
    table
}
