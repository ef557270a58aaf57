//! Input validation module
//!
//! Validates samples pushed over HTTP and query parameters before they
//! reach the engine.

use crate::error::{AppError, AppResult};
use crate::models::SampleInput;
use tracing::{debug, warn};
use validator::Validate;

/// Upper bound on history rows returned in one request
pub const MAX_HISTORY_LIMIT: usize = 1_000;

/// Validate a pushed sample
pub fn validate_sample_input(input: &SampleInput) -> AppResult<()> {
    // NaN slips through range checks, so reject non-finite values first
    let channels = [
        ("soil_moisture", input.soil_moisture),
        ("air_humidity", input.air_humidity),
        ("air_temp", input.air_temp),
        ("water_temp", input.water_temp),
        ("ph_level", input.ph_level),
        ("water_level", input.water_level),
        ("air_quality", input.air_quality),
        ("flow_rate", input.flow_rate),
        ("battery_level", input.battery_level),
    ];
    for (name, value) in channels {
        validate_finite(name, value)?;
    }

    if let Err(validation_errors) = input.validate() {
        let mut error_messages: Vec<String> = validation_errors
            .field_errors()
            .iter()
            .map(|(field, errors)| {
                let msgs: Vec<&str> = errors
                    .iter()
                    .filter_map(|e| e.message.as_ref().map(|c| c.as_ref()))
                    .collect();
                format!("{}: {}", field, msgs.join(", "))
            })
            .collect();
        error_messages.sort();

        warn!(errors = ?error_messages, "Sample input validation failed");
        return Err(AppError::ValidationError(error_messages.join("; ")));
    }

    debug!("Sample input validation passed");
    Ok(())
}

fn validate_finite(name: &str, value: f64) -> AppResult<()> {
    if !value.is_finite() {
        return Err(AppError::ValidationError(format!(
            "{} must be a finite number",
            name
        )));
    }
    Ok(())
}

/// Validate the `limit` query parameter for history reads
pub fn validate_history_limit(limit: Option<usize>, default: usize) -> AppResult<usize> {
    let limit = limit.unwrap_or(default);

    if limit == 0 || limit > MAX_HISTORY_LIMIT {
        return Err(AppError::ValidationError(format!(
            "Limit must be between 1 and {}",
            MAX_HISTORY_LIMIT
        )));
    }

    Ok(limit)
}
