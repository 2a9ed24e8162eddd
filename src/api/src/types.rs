//! Request and response types for the Pitwall API.
//!
//! These shapes are shared by the server and the prediction viewer so both
//! sides of the HTTP boundary agree on field names and types.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A race as returned by `GET /api/races`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Race {
    pub id: i64,
    pub name: String,
    /// Championship year
    pub season: i32,
    /// Event number within the season, chronological
    pub round: i32,
    pub date: NaiveDate,
    pub country: String,
}

/// A per-driver prediction as returned by `GET /api/predict`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRow {
    pub driver_id: String,
    /// Probability of finishing in the points, 0.0..=1.0
    pub prob_points: f64,
    /// Ranking score; scale is defined by the predictor
    pub score: f64,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
