//! Placement metrics, recorded through the `metrics` facade.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

/// Label value for CEL evaluations driven by the scheduler.
pub const SCHEDULING_NAME: &str = "scheduling";

pub fn describe() {
    describe_histogram!("placement_cel_duration_seconds", Unit::Seconds, "CEL predicate evaluation time per cluster");
    describe_histogram!("placement_scheduling_duration_seconds", Unit::Seconds, "Time spent in one scheduling pass");
    describe_counter!("placement_decisions_updated_total", "PlacementDecision writes");
    describe_counter!("placement_misconfigured_total", "Scheduling passes rejected as misconfigured");
}

pub fn observe_cel_duration(d: Duration) { histogram!("placement_cel_duration_seconds", d.as_secs_f64(), "name" => SCHEDULING_NAME); }

pub fn observe_scheduling_duration(d: Duration) { histogram!("placement_scheduling_duration_seconds", d.as_secs_f64()); }

pub fn decisions_updated(n: u64) { counter!("placement_decisions_updated_total", n); }

pub fn misconfigured() { counter!("placement_misconfigured_total", 1u64); }
