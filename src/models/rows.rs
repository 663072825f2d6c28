//! Row record shapes for each dataset.
//!
//! Sheet rows arrive as loosely-typed JSON; numeric fields default to zero
//! when a cell is blank so a ragged sheet never fails a whole sync.

use serde::{Deserialize, Serialize};

use super::DataRecord;

// == Score Row ==
/// One company on the score board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRow {
    pub ticker: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub sector: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub price: f64,
}

impl DataRecord for ScoreRow {
    fn record_id(&self) -> &str {
        &self.ticker
    }
}

// == P/E Industry Row ==
/// Price/earnings aggregates for one industry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeIndustryRow {
    pub industry: String,
    #[serde(default)]
    pub average_pe: f64,
    #[serde(default)]
    pub median_pe: f64,
    #[serde(default)]
    pub company_count: u32,
}

impl DataRecord for PeIndustryRow {
    fn record_id(&self) -> &str {
        &self.industry
    }
}

// == SMA Row ==
/// Simple moving averages for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmaRow {
    pub ticker: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub sma_50: f64,
    #[serde(default)]
    pub sma_200: f64,
}

impl DataRecord for SmaRow {
    fn record_id(&self) -> &str {
        &self.ticker
    }
}

// == Graham Row ==
/// Benjamin Graham valuation inputs and result for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrahamRow {
    pub ticker: String,
    #[serde(default)]
    pub eps: f64,
    #[serde(default)]
    pub book_value_per_share: f64,
    #[serde(default)]
    pub graham_number: f64,
    #[serde(default)]
    pub price: f64,
}

impl DataRecord for GrahamRow {
    fn record_id(&self) -> &str {
        &self.ticker
    }
}

// == Industry Threshold Row ==
/// Valuation bounds used to classify companies within an industry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndustryThresholdRow {
    pub industry: String,
    #[serde(default)]
    pub pe_low: f64,
    #[serde(default)]
    pub pe_high: f64,
    #[serde(default)]
    pub pb_low: f64,
    #[serde(default)]
    pub pb_high: f64,
}

impl DataRecord for IndustryThresholdRow {
    fn record_id(&self) -> &str {
        &self.industry
    }
}
