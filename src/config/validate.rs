// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, WardenError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::WardenError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_scheduler(cfg)?;
    validate_heartbeat(cfg)?;
    validate_breaker(cfg)?;
    validate_checkpoint(cfg)?;
    validate_engine(cfg)?;
    Ok(())
}

fn config_error(msg: impl Into<String>) -> WardenError {
    WardenError::ConfigError(msg.into())
}

fn validate_scheduler(cfg: &RawConfigFile) -> Result<()> {
    let s = &cfg.scheduler;
    if s.default_max_retries == 0 {
        return Err(config_error(
            "[scheduler].default_max_retries must be >= 1 (got 0)",
        ));
    }
    if s.min_cycle_spacing_secs > s.max_cycle_spacing_secs {
        return Err(config_error(format!(
            "[scheduler].min_cycle_spacing_secs ({}) must not exceed max_cycle_spacing_secs ({})",
            s.min_cycle_spacing_secs, s.max_cycle_spacing_secs
        )));
    }
    Ok(())
}

fn validate_heartbeat(cfg: &RawConfigFile) -> Result<()> {
    let h = &cfg.heartbeat;
    if h.interval_secs == 0 {
        return Err(config_error("[heartbeat].interval_secs must be >= 1 (got 0)"));
    }
    if h.failure_threshold == 0 {
        return Err(config_error(
            "[heartbeat].failure_threshold must be >= 1 (got 0)",
        ));
    }

    let ordered = h.urgency_critical_hours >= 0.0
        && h.urgency_critical_hours < h.urgency_high_hours
        && h.urgency_high_hours < h.urgency_medium_hours;
    if !ordered {
        return Err(config_error(format!(
            "[heartbeat] urgency thresholds must satisfy 0 <= critical < high < medium \
             (got critical={}, high={}, medium={})",
            h.urgency_critical_hours, h.urgency_high_hours, h.urgency_medium_hours
        )));
    }
    Ok(())
}

fn validate_breaker(cfg: &RawConfigFile) -> Result<()> {
    let b = &cfg.breaker;
    if b.soft_failure_threshold == 0 {
        return Err(config_error(
            "[breaker].soft_failure_threshold must be >= 1 (got 0)",
        ));
    }
    if b.soft_failure_threshold >= b.hard_failure_threshold {
        return Err(config_error(format!(
            "[breaker].soft_failure_threshold ({}) must be lower than hard_failure_threshold ({})",
            b.soft_failure_threshold, b.hard_failure_threshold
        )));
    }
    if b.similarity_threshold_pct == 0 || b.similarity_threshold_pct > 100 {
        return Err(config_error(format!(
            "[breaker].similarity_threshold_pct must be within 1..=100 (got {})",
            b.similarity_threshold_pct
        )));
    }
    if b.same_error_threshold < 2 {
        return Err(config_error(format!(
            "[breaker].same_error_threshold must be >= 2 (got {})",
            b.same_error_threshold
        )));
    }
    if b.max_task_duration_secs == 0 || b.max_tokens_per_task == 0 {
        return Err(config_error(
            "[breaker].max_task_duration_secs and max_tokens_per_task must be >= 1",
        ));
    }
    Ok(())
}

fn validate_checkpoint(cfg: &RawConfigFile) -> Result<()> {
    let c = &cfg.checkpoint;
    if c.interval_secs == 0 {
        return Err(config_error("[checkpoint].interval_secs must be >= 1 (got 0)"));
    }
    if c.max_history == 0 {
        return Err(config_error("[checkpoint].max_history must be >= 1 (got 0)"));
    }
    Ok(())
}

fn validate_engine(cfg: &RawConfigFile) -> Result<()> {
    let e = &cfg.engine;
    if e.command.trim().is_empty() {
        return Err(config_error("[engine].command must not be empty"));
    }
    if e.stall_timeout_secs == 0 || e.max_runtime_secs == 0 {
        return Err(config_error(
            "[engine].stall_timeout_secs and max_runtime_secs must be >= 1",
        ));
    }
    Ok(())
}
