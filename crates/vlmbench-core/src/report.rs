use std::fmt;
use std::path::Path;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::metrics::Averages;
use crate::Result;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Rendered benchmark report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    text: String,
}

impl Report {
    /// Renders averaged metrics and run metadata into the fixed report layout.
    pub fn format(
        averages: &Averages,
        model: &str,
        device: &str,
        timestamp: NaiveDateTime,
    ) -> Self {
        let mut lines = vec![
            format!("==== Benchmark Report ({}) ====", model),
            format!("Time: {}", timestamp.format(TIMESTAMP_FORMAT)),
            format!("Model Name: {}", model),
            format!("Device: {}", device),
            "Metrics (Average):".to_string(),
        ];
        lines.extend(
            averages
                .reported()
                .iter()
                .map(|(metric, value)| format!(" - {}: {:.2}", metric.label(), value)),
        );

        let mut text = lines.join("\n");
        text.push('\n');
        Self { text }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Writes the report verbatim, replacing any existing file.
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, &self.text)?;
        info!("Report saved to {}", path.display());
        Ok(())
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
