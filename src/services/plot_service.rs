//! Chart assembly: turns resolved rows into a serialized chart description
//! the frontend can render directly.

use serde_json::{json, Value};

use crate::errors::ServiceError;
use crate::services::query_service::{numeric, RowValues};

/// Named axis presets recovered from the lab's standard plots.
const PRESETS: [(&str, &str, &[&str]); 2] = [
    // Stress path: deviator stress against mean effective stress.
    ("stress_path", "p", &["q"]),
    // Consolidation: void ratio against mean effective stress.
    ("consolidation", "p", &["e"]),
];

pub struct PlotService;

impl PlotService {
    /// Resolve a preset name to (x_axis, y_axes).
    pub fn preset(name: &str) -> Option<(String, Vec<String>)> {
        PRESETS
            .iter()
            .find(|(preset, _, _)| *preset == name)
            .map(|(_, x, ys)| (x.to_string(), ys.iter().map(|y| y.to_string()).collect()))
    }

    /// Build the chart description for one X field and one or more Y fields
    /// over the given per-dataset row sets. Rows whose X or Y cell does not
    /// parse are dropped from that series only.
    pub fn build_chart(
        datasets: &[(String, Vec<RowValues>)],
        x_axis: &str,
        y_axes: &[String],
    ) -> Result<Value, ServiceError> {
        if y_axes.is_empty() {
            return Err(ServiceError::Validation(
                "at least one y_axis field is required".to_string(),
            ));
        }

        let mut series = Vec::new();
        for (dataset_name, rows) in datasets {
            for y_axis in y_axes {
                let mut xs = Vec::new();
                let mut ys = Vec::new();
                for row in rows {
                    let x = row.get(x_axis).map(String::as_str).and_then(numeric);
                    let y = row.get(y_axis).map(String::as_str).and_then(numeric);
                    if let (Some(x), Some(y)) = (x, y) {
                        xs.push(x);
                        ys.push(y);
                    }
                }
                if xs.is_empty() {
                    continue;
                }
                series.push(json!({
                    "dataset": dataset_name,
                    "y_field": y_axis,
                    "x": xs,
                    "y": ys,
                }));
            }
        }

        if series.is_empty() {
            return Err(ServiceError::NotFound(
                "no plottable data for the selected axes".to_string(),
            ));
        }

        Ok(json!({
            "chart_type": "scatter",
            "x_label": axis_label(x_axis),
            "y_label": y_axes.iter().map(|y| axis_label(y)).collect::<Vec<_>>().join(", "),
            "series": series,
        }))
    }
}

/// Display label for an axis field.
fn axis_label(field: &str) -> String {
    match field {
        "p" => "p' (kPa)".to_string(),
        "q" => "q (kPa)".to_string(),
        "e" => "e".to_string(),
        "time_start_of_stage" => "Time start of stage (Sec)".to_string(),
        other => other.replace('_', " "),
    }
}
