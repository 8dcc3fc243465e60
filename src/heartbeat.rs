// src/heartbeat.rs

//! Periodic health sampling and adaptive pacing.
//!
//! The heartbeat owns no tasks; it is fed cycle outcomes, task progress and
//! the active deadline, and turns them into [`HealthMetrics`] and a
//! recommended delay before the next cycle.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::HeartbeatConfig;

/// Success rate (percent) under which pacing slows down.
const SLOW_DOWN_SUCCESS_RATE: f64 = 30.0;
/// Cycles needed before the success rate is trusted for slowing down.
const SLOW_DOWN_MIN_CYCLES: u64 = 5;
/// Success rate (percent) at or under which the process is unhealthy.
const HEALTHY_SUCCESS_RATE: f64 = 20.0;
/// Failure streak from which the long failure delay applies.
const REPEATED_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
            Urgency::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthMetrics {
    pub at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub cycles: u64,
    pub successes: u64,
    pub consecutive_failures: u32,
    /// Percent of successful cycles; 100 before the first cycle.
    pub success_rate: f64,
    pub tasks_completed: usize,
    pub tasks_total: usize,
    pub progress_pct: f64,
    pub hours_to_deadline: Option<f64>,
    pub urgency: Urgency,
    pub speed_up: bool,
    pub slow_down: bool,
    pub strategy_change_needed: bool,
    pub healthy: bool,
}

impl HealthMetrics {
    /// Reasons this snapshot should be raised to an operator, if any.
    pub fn alerts(&self) -> Vec<String> {
        let mut alerts = Vec::new();
        if !self.healthy {
            alerts.push(format!(
                "unhealthy: success rate {:.0}%, {} consecutive failures",
                self.success_rate, self.consecutive_failures
            ));
        }
        if self.strategy_change_needed {
            alerts.push(format!(
                "strategy change needed after {} consecutive failures",
                self.consecutive_failures
            ));
        }
        if self.urgency == Urgency::Critical {
            match self.hours_to_deadline {
                Some(h) if h < 0.0 => alerts.push(format!("deadline passed {:.1}h ago", -h)),
                Some(h) => alerts.push(format!("deadline in {h:.1}h")),
                None => alerts.push("critical urgency".to_string()),
            }
        }
        alerts
    }
}

pub type AlertCallback = Box<dyn FnMut(&str, &HealthMetrics) + Send>;

pub struct Heartbeat {
    config: HeartbeatConfig,
    started_at: DateTime<Utc>,
    cycles: u64,
    successes: u64,
    consecutive_failures: u32,
    tasks_completed: usize,
    tasks_total: usize,
    deadline: Option<DateTime<Utc>>,
    last_pulse: Option<HealthMetrics>,
    on_alert: Option<AlertCallback>,
}

impl fmt::Debug for Heartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heartbeat")
            .field("started_at", &self.started_at)
            .field("cycles", &self.cycles)
            .field("successes", &self.successes)
            .field("consecutive_failures", &self.consecutive_failures)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl Heartbeat {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self::started_at(config, Utc::now())
    }

    pub fn started_at(config: HeartbeatConfig, started_at: DateTime<Utc>) -> Self {
        Self {
            config,
            started_at,
            cycles: 0,
            successes: 0,
            consecutive_failures: 0,
            tasks_completed: 0,
            tasks_total: 0,
            deadline: None,
            last_pulse: None,
            on_alert: None,
        }
    }

    pub fn on_alert(&mut self, callback: AlertCallback) {
        self.on_alert = Some(callback);
    }

    pub fn record_cycle(&mut self, success: bool) {
        self.cycles += 1;
        if success {
            self.successes += 1;
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }
    }

    pub fn set_progress(&mut self, completed: usize, total: usize) {
        self.tasks_completed = completed.min(total);
        self.tasks_total = total;
    }

    pub fn set_deadline(&mut self, deadline: Option<DateTime<Utc>>) {
        self.deadline = deadline;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_pulse(&self) -> Option<&HealthMetrics> {
        self.last_pulse.as_ref()
    }

    /// Map hours until the deadline onto an urgency band.
    pub fn urgency_for(&self, hours_to_deadline: Option<f64>) -> Urgency {
        let Some(hours) = hours_to_deadline else {
            return Urgency::Low;
        };
        if hours <= self.config.urgency_critical_hours {
            Urgency::Critical
        } else if hours <= self.config.urgency_high_hours {
            Urgency::High
        } else if hours <= self.config.urgency_medium_hours {
            Urgency::Medium
        } else {
            Urgency::Low
        }
    }

    pub fn metrics(&self) -> HealthMetrics {
        self.metrics_at(Utc::now())
    }

    pub fn metrics_at(&self, now: DateTime<Utc>) -> HealthMetrics {
        let success_rate = if self.cycles == 0 {
            100.0
        } else {
            self.successes as f64 * 100.0 / self.cycles as f64
        };
        let progress_pct = if self.tasks_total == 0 {
            0.0
        } else {
            self.tasks_completed as f64 * 100.0 / self.tasks_total as f64
        };
        let hours_to_deadline = self
            .deadline
            .map(|d| (d - now).num_seconds() as f64 / 3600.0);
        let urgency = self.urgency_for(hours_to_deadline);
        let threshold = self.config.failure_threshold;

        HealthMetrics {
            at: now,
            uptime_secs: (now - self.started_at).num_seconds().max(0) as u64,
            cycles: self.cycles,
            successes: self.successes,
            consecutive_failures: self.consecutive_failures,
            success_rate,
            tasks_completed: self.tasks_completed,
            tasks_total: self.tasks_total,
            progress_pct,
            hours_to_deadline,
            urgency,
            speed_up: matches!(urgency, Urgency::High | Urgency::Critical),
            slow_down: self.cycles > SLOW_DOWN_MIN_CYCLES && success_rate < SLOW_DOWN_SUCCESS_RATE,
            strategy_change_needed: self.consecutive_failures >= threshold,
            healthy: success_rate > HEALTHY_SUCCESS_RATE
                && self.consecutive_failures < threshold.saturating_mul(2),
        }
    }

    pub fn pulse(&mut self) -> HealthMetrics {
        self.pulse_at(Utc::now())
    }

    /// Sample health, remember the snapshot and raise alerts.
    pub fn pulse_at(&mut self, now: DateTime<Utc>) -> HealthMetrics {
        let metrics = self.metrics_at(now);

        debug!(
            cycles = metrics.cycles,
            success_rate = metrics.success_rate,
            progress = metrics.progress_pct,
            urgency = %metrics.urgency,
            healthy = metrics.healthy,
            "heartbeat"
        );

        let alerts = metrics.alerts();
        if !alerts.is_empty() {
            let message = alerts.join("; ");
            warn!(message = %message, "heartbeat alert");
            if let Some(cb) = self.on_alert.as_mut() {
                cb(&message, &metrics);
            }
        }

        self.last_pulse = Some(metrics.clone());
        metrics
    }

    pub fn recommended_delay(&self) -> Duration {
        self.recommended_delay_at(Utc::now())
    }

    /// Pause before the next cycle. Urgency outranks the failure streak.
    pub fn recommended_delay_at(&self, now: DateTime<Utc>) -> Duration {
        let delays = &self.config.delays;
        let urgency = self.metrics_at(now).urgency;

        let secs = if urgency == Urgency::Critical {
            delays.critical_secs
        } else if urgency == Urgency::High {
            delays.high_secs
        } else if self.consecutive_failures >= REPEATED_FAILURES {
            delays.repeated_failure_secs
        } else if self.consecutive_failures >= 1 {
            delays.failure_secs
        } else if urgency == Urgency::Medium {
            delays.medium_secs
        } else {
            delays.default_secs
        };
        Duration::from_secs(secs)
    }
}
