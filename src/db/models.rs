//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::engine::{ComparisonService, EngineError, SampleResult, Target};

/// A candidate endpoint for speed tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub id: i64,
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub label: String,
}

fn default_port() -> u16 {
    443
}

impl Candidate {
    pub fn new(address: &str, port: u16) -> Self {
        Self {
            id: 0,
            address: address.to_string(),
            port,
            label: String::new(),
        }
    }

    pub fn to_target(&self) -> Result<Target, EngineError> {
        let target = Target::new(&self.address, self.port)?;
        Ok(if self.label.is_empty() {
            target
        } else {
            target.named(self.label.as_str())
        })
    }
}

/// Candidates seeded into an empty database.
pub fn default_candidates() -> Vec<Candidate> {
    [
        "103.21.244.78",
        "103.21.244.106",
        "104.25.235.32",
        "188.114.98.205",
        "104.21.52.82",
    ]
    .iter()
    .map(|ip| Candidate::new(ip, 443))
    .collect()
}

/// A stored comparison service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
}

impl ServiceRecord {
    pub fn to_service(&self) -> ComparisonService {
        ComparisonService::new(&self.name, &self.url, &self.description)
    }
}

/// Which kind of run produced a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    Speed,
    Compare,
}

impl SelectionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SelectionMode::Speed => "speed",
            SelectionMode::Compare => "compare",
        }
    }
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "speed" => Ok(SelectionMode::Speed),
            "compare" => Ok(SelectionMode::Compare),
            other => Err(format!("unknown selection mode: {}", other)),
        }
    }
}

/// The best result of a run, as recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    pub id: i64,
    pub mode: SelectionMode,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub latency_ms: f64,
    pub loss_ratio: f64,
    pub selected_at: DateTime<Utc>,
}

impl Selection {
    /// Record a successful result; `None` if it has no latency.
    pub fn from_sample(mode: SelectionMode, sample: &SampleResult) -> Option<Self> {
        let latency_ms = sample.average_latency_ms()?;
        Some(Self {
            id: 0,
            mode,
            name: sample.target().name().to_string(),
            address: sample.target().address().to_string(),
            port: sample.effective_port(),
            latency_ms,
            loss_ratio: sample.loss_ratio(),
            selected_at: Utc::now(),
        })
    }
}
