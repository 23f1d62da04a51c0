//! Mass insert load driver
//!
//! Pushes synthetic objects through the full write pipeline, the same way a
//! client command would, so stage timings under load show up in the logs.

use rand::Rng;
use serde::{Deserialize, Serialize};
use spatia_pipeline::coordinator::millis;
use spatia_pipeline::{Command, Pipeline, PipelineError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::error::ApiError;

/// Upper bound on objects per request
pub const MAX_OBJECTS: u64 = 10_000_000;

const SLOW: Duration = Duration::from_millis(5);

const FIELD_VALUES: [f64; 13] = [
    1.0,
    0.0,
    -1.0,
    14.0,
    20.5,
    120.0,
    -120.0,
    20_000.0,
    -20_000.0,
    214_748_300.0,
    -214_748_300.0,
    2_014_748_300.0,
    123.12312301,
];

#[derive(Debug, Clone, Deserialize)]
pub struct MassInsertRequest {
    pub collections: u64,
    pub objects: u64,
    /// `[min_lat, min_lon, max_lat, max_lon]`, whole world when absent
    #[serde(default)]
    pub bounds: Option<[f64; 4]>,
}

impl MassInsertRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let total = self.collections.saturating_mul(self.objects);
        if total == 0 {
            return Err(ApiError::invalid("collections and objects must be positive"));
        }
        if total > MAX_OBJECTS {
            return Err(ApiError::invalid(format!("at most {MAX_OBJECTS} objects per request")));
        }
        if let Some([min_lat, min_lon, max_lat, max_lon]) = self.bounds {
            let valid = (-90.0..=90.0).contains(&min_lat)
                && (-90.0..=90.0).contains(&max_lat)
                && (-180.0..=180.0).contains(&min_lon)
                && (-180.0..=180.0).contains(&max_lon)
                && min_lat <= max_lat
                && min_lon <= max_lon;
            if !valid {
                return Err(ApiError::invalid("invalid bounds"));
            }
        }
        Ok(())
    }

    fn bounds(&self) -> [f64; 4] {
        self.bounds.unwrap_or([-90.0, -180.0, 90.0, 180.0])
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MassInsertReport {
    pub inserted: u64,
    pub slow: u64,
    pub elapsed_ms: f64,
}

/// Build the SET command for object `j` of collection `key`
pub fn object_command(key: &str, j: u64, bounds: [f64; 4], rng: &mut impl Rng) -> Command {
    let mut args = vec!["SET".to_string(), key.to_string(), j.to_string()];
    for (i, value) in FIELD_VALUES.iter().enumerate() {
        args.push("FIELD".to_string());
        args.push(format!("fname:{i}"));
        args.push(value.to_string());
    }

    if j % 8 == 0 {
        args.push("STRING".to_string());
        args.push(format!("str{j}"));
    } else {
        let [min_lat, min_lon, max_lat, max_lon] = bounds;
        args.push("POINT".to_string());
        args.push(rng.gen_range(min_lat..=max_lat).to_string());
        args.push(rng.gen_range(min_lon..=max_lon).to_string());
    }
    Command::new(args)
}

/// Run synchronously; callers on the async runtime should use `spawn_blocking`
pub fn run(pipeline: &Pipeline, request: &MassInsertRequest, rng: &mut impl Rng) -> Result<MassInsertReport, PipelineError> {
    let started = Instant::now();
    let bounds = request.bounds();
    let total = request.collections * request.objects;
    let mut report = MassInsertReport::default();

    for i in 0..request.collections {
        let key = format!("mi:{i}");
        for j in 0..request.objects {
            let command = object_command(&key, j, bounds, rng);
            let invocation = pipeline.execute(&command).map_err(|e| {
                error!(error = %e, key = %key, id = j, inserted = report.inserted, "Mass insert aborted");
                e
            })?;

            let timings = invocation.timings;
            if timings.total > SLOW {
                report.slow += 1;
                info!(
                    args = command.len(),
                    exec_ms = millis(timings.exec),
                    log_ms = millis(timings.log_buffer),
                    notify_ms = millis(timings.notify),
                    fence_ms = millis(timings.geofence),
                    total_ms = millis(timings.total),
                    "Mass insert slow command"
                );
            }

            report.inserted += 1;
            if j % 1000 == 999 {
                debug!(key = %key, progress = report.inserted, total, "Mass insert progress");
            }
        }
    }

    report.elapsed_ms = millis(started.elapsed());
    info!(objects = report.inserted, elapsed_ms = report.elapsed_ms, "Mass insert done");
    Ok(report)
}
