use std::{fs, time::Instant};

use comfy_table::{CellAlignment, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use console::Style;
use flashpipe::{
    ATOL, Array, AttentionError, AttentionOutput, RTOL, TuningConfig, attention_reference, attention_with_backend,
    attention_with_pipeline_emitter_and_backend, backends::cpu::Cpu, max_violation,
};
use serde::{Deserialize, Serialize};

use crate::workload::ProblemShape;

/// One problem and configuration, as read from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckTask {
    pub problem: ProblemShape,
    pub config: TuningConfig,
    #[serde(default)]
    pub save_residuals: bool,
    #[serde(default)]
    pub seed: u64,
    /// Overrides the default backend capacity, in bytes.
    #[serde(default)]
    pub shared_memory_capacity: Option<usize>,
}

type Launch = fn(&Cpu, &Array, &Array, &Array, &TuningConfig, bool) -> Result<AttentionOutput, AttentionError>;

struct Measurement {
    formulation: &'static str,
    runtime_us: f64,
    out_violation: f32,
    lse_violation: Option<f32>,
}

pub fn handle_check(config_path: String) -> Result<(), Box<dyn std::error::Error>> {
    let task_data = fs::read_to_string(config_path)?;
    let task: CheckTask = serde_json::from_str(&task_data)?;

    let backend = match task.shared_memory_capacity {
        Some(capacity) => Cpu::new().with_shared_memory_capacity(capacity),
        None => Cpu::new(),
    };
    let (q, k, v) = task.problem.random_inputs(task.seed)?;
    let expected = attention_reference(&q, &k, &v, task.save_residuals)?;

    let formulations: [(&'static str, Launch); 2] = [
        ("warp_specialized", attention_with_backend::<Cpu>),
        ("pipeline_emitter", attention_with_pipeline_emitter_and_backend::<Cpu>),
    ];

    let mut measurements = Vec::new();
    for (formulation, launch) in formulations {
        let run_start = Instant::now();
        let output = launch(&backend, &q, &k, &v, &task.config, task.save_residuals)?;
        let runtime_us = run_start.elapsed().as_secs_f64() * 1e6;

        let lse_violation = match (&output.lse, &expected.lse) {
            (Some(lse), Some(expected_lse)) => Some(max_violation(lse, expected_lse, RTOL)),
            _ => None,
        };
        measurements.push(Measurement {
            formulation,
            runtime_us,
            out_violation: max_violation(&output.out, &expected.out, RTOL),
            lse_violation,
        });
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Formulation", "Runtime, us", "Output violation", "LSE violation"]);
    for measurement in &measurements {
        table.add_row(vec![
            measurement.formulation.to_string(),
            format!("{:.1}", measurement.runtime_us),
            format!("{:.3e}", measurement.out_violation),
            measurement.lse_violation.map_or_else(|| "-".to_string(), |violation| format!("{violation:.3e}")),
        ]);
    }
    for index in 1..4 {
        let column = table.column_mut(index).expect("Column not found");
        column.set_cell_alignment(CellAlignment::Right);
    }
    println!("{table}");

    let failed: Vec<&str> = measurements
        .iter()
        .filter(|measurement| {
            measurement.out_violation > ATOL || measurement.lse_violation.is_some_and(|violation| violation > ATOL)
        })
        .map(|measurement| measurement.formulation)
        .collect();
    if !failed.is_empty() {
        return Err(format!("{} exceeded atol {ATOL:e} with rtol {RTOL:e}", failed.join(", ")).into());
    }

    let style = Style::new().green().bold();
    println!("{}", style.apply_to(format!("Both formulations match the reference (atol {ATOL:e}, rtol {RTOL:e})")));

    Ok(())
}
