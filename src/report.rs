use std::time::Duration;

use tracing::info;

use crate::engine::InterpreterState;
use crate::pipeline::RunReport;

pub fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

pub fn log_interpreter_state(state: &InterpreterState) {
    info!(tensors = state.tensors.len(), "tensors size");
    match state.nodes {
        Some(nodes) => info!(nodes, "nodes size"),
        None => info!("nodes size: not reported by engine"),
    }
    info!(inputs = ?state.inputs, outputs = ?state.outputs, "graph io");
    if let Some(producer) = &state.producer {
        info!(%producer, "model producer");
    }

    for (index, tensor) in state.tensors.iter().enumerate() {
        info!(
            index,
            name = %tensor.name,
            bytes = ?tensor.bytes,
            ty = %tensor.element_type,
            scale = ?tensor.scale,
            zero_point = ?tensor.zero_point,
            "tensor"
        );
    }
}

pub fn log_run(report: &RunReport, verbose: bool) {
    if verbose {
        info!(
            input = %report.input_shape,
            output = %report.output_shape,
            "tensor shapes"
        );
    }
    info!(
        runs = report.invocations.len(),
        average_ms = millis(report.average()),
        total_ms = millis(report.total()),
        "invoked"
    );
}
