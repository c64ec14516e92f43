//! switchyard-gate — alarm evaluation for switchyard deployments.
//!
//! An `AlarmGate` holds a set of `AlarmRule`s and evaluates them against a
//! `MetricSource` on demand. A breach during an active deployment forces the
//! orchestrator into rollback within one tick.
//!
//! Thresholds compare at-or-above: a rule with threshold 1 breaches on the
//! first unhealthy host or 5xx response in a period.

pub mod gate;
pub mod source;

pub use gate::{AlarmGate, Breach, BreachReport, default_rules};
pub use source::{GateError, MetricSource, StoreMetricSource, TimeSeries};
