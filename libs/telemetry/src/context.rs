/// Metric labels shared by the gateway's counters.
#[derive(Debug, Clone, Default)]
pub struct TelemetryLabels {
    pub shape: Option<String>,
    pub outcome: Option<String>,
    pub extra: Vec<(String, String)>,
}

impl TelemetryLabels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shape(mut self, shape: impl Into<String>) -> Self {
        self.shape = Some(shape.into());
        self
    }

    pub fn outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = Some(outcome.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((key.into(), value.into()));
        self
    }

    pub fn tags(&self) -> Vec<(String, String)> {
        let mut tags = Vec::with_capacity(2 + self.extra.len());
        if let Some(shape) = &self.shape {
            tags.push(("shape".into(), shape.clone()));
        }
        if let Some(outcome) = &self.outcome {
            tags.push(("outcome".into(), outcome.clone()));
        }
        for (key, value) in &self.extra {
            tags.push((key.clone(), value.clone()));
        }
        tags
    }
}
