//! Engine configuration

use flow_types::{FlowResult, Tick};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where the logical clock starts.
///
/// Only `Fixed` gives reproducible ledgers; `WallClock` stamps the run
/// with the current Unix time in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StartTime {
    Fixed { tick: Tick },
    WallClock,
}

impl StartTime {
    pub fn resolve(&self) -> Tick {
        match self {
            Self::Fixed { tick } => *tick,
            Self::WallClock => chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn is_deterministic(&self) -> bool {
        matches!(self, Self::Fixed { .. })
    }
}

impl Default for StartTime {
    fn default() -> Self {
        Self::Fixed { tick: 0 }
    }
}

/// Ceilings for one `run` call. Reaching one pauses the run; it is not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunLimits {
    /// Maximum steps processed by this call
    pub max_steps: Option<u64>,
    /// Events scheduled after this tick are left in the queue
    pub max_tick: Option<Tick>,
}

impl RunLimits {
    pub fn unbounded() -> Self {
        Self {
            max_steps: None,
            max_tick: None,
        }
    }

    pub fn with_max_steps(mut self, steps: u64) -> Self {
        self.max_steps = Some(steps);
        self
    }

    pub fn with_max_tick(mut self, tick: Tick) -> Self {
        self.max_tick = Some(tick);
        self
    }
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_steps: Some(10_000),
            max_tick: None,
        }
    }
}

/// Configuration for a [`FlowEngine`](crate::FlowEngine)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Logical start time
    pub start_time: StartTime,
    /// Yield to the async scheduler every this many steps (0 disables)
    pub yield_every: u64,
    /// Wall-clock pause between steps in real-time mode (0 disables)
    pub real_time_delay_ms: u64,
    /// Keep every queue snapshot, or only the latest
    pub snapshot_history: bool,
    /// Limits applied by `run_to_completion`
    pub default_limits: RunLimits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            start_time: StartTime::default(),
            yield_every: 100,
            real_time_delay_ms: 0,
            snapshot_history: true,
            default_limits: RunLimits::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(input: &str) -> FlowResult<Self> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn with_start_time(mut self, start_time: StartTime) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn with_fixed_start(self, tick: Tick) -> Self {
        self.with_start_time(StartTime::Fixed { tick })
    }

    pub fn with_yield_every(mut self, steps: u64) -> Self {
        self.yield_every = steps;
        self
    }

    pub fn with_real_time_delay(mut self, delay: Duration) -> Self {
        self.real_time_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_snapshot_history(mut self, retain: bool) -> Self {
        self.snapshot_history = retain;
        self
    }

    pub fn with_default_limits(mut self, limits: RunLimits) -> Self {
        self.default_limits = limits;
        self
    }

    pub fn real_time_delay(&self) -> Option<Duration> {
        (self.real_time_delay_ms > 0).then(|| Duration::from_millis(self.real_time_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_deterministic() {
        let config = EngineConfig::default();
        assert!(config.start_time.is_deterministic());
        assert_eq!(config.start_time.resolve(), 0);
        assert!(config.real_time_delay().is_none());
        assert_eq!(config.default_limits.max_steps, Some(10_000));
    }

    #[test]
    fn test_from_json_partial() {
        let config = EngineConfig::from_json(
            r#"{"startTime": {"mode": "fixed", "tick": 5}, "realTimeDelayMs": 20}"#,
        )
        .unwrap();
        assert_eq!(config.start_time, StartTime::Fixed { tick: 5 });
        assert_eq!(config.real_time_delay(), Some(Duration::from_millis(20)));
        assert_eq!(config.yield_every, 100);
    }

    #[test]
    fn test_wall_clock_start() {
        let config = EngineConfig::from_json(r#"{"startTime": {"mode": "wall_clock"}}"#).unwrap();
        assert!(!config.start_time.is_deterministic());
        assert!(config.start_time.resolve() > 0);
    }

    #[test]
    fn test_limits_builder() {
        let limits = RunLimits::unbounded().with_max_steps(3).with_max_tick(9);
        assert_eq!(limits.max_steps, Some(3));
        assert_eq!(limits.max_tick, Some(9));
    }
}
