/// Writes every metric as a structured log event.
///
/// Used when no HTTP collector is configured, and handy for dry runs.
#[derive(Debug)]
pub struct LogEmitter {
    component: String,
}

impl LogEmitter {
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        "log"
    }

    pub fn emit(&self, path: &str, unit: &str, value: f64) {
        tracing::info!(
            target: "aerostat::metrics",
            component = %self.component,
            metric = path,
            unit,
            value,
            "metric",
        );
    }
}
