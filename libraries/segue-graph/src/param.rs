//! Schedulable parameter automation
//!
//! `AudioParam` is the automation surface the scheduler and effects program
//! against: set-value, linear/exponential ramps, and sampled value curves,
//! all evaluated sample-accurately against the context clock.

use std::sync::Arc;

/// Floor used to keep exponential ramps away from zero
const EXP_FLOOR: f32 = 1.0e-5;

#[derive(Debug, Clone)]
enum AutomationEvent {
    SetValue {
        time: f64,
        value: f32,
    },
    /// Ramp ending at `time`; starts from the previous anchor (or from
    /// `scheduled_at` when nothing precedes it)
    LinearRamp {
        scheduled_at: f64,
        time: f64,
        value: f32,
    },
    ExponentialRamp {
        scheduled_at: f64,
        time: f64,
        value: f32,
    },
    /// Sampled curve over [start, start + duration], linearly interpolated
    SetCurve {
        start: f64,
        duration: f64,
        values: Arc<Vec<f32>>,
    },
}

impl AutomationEvent {
    /// Ordering key: when the event takes (full) effect
    fn key_time(&self) -> f64 {
        match self {
            AutomationEvent::SetValue { time, .. } => *time,
            AutomationEvent::LinearRamp { time, .. } => *time,
            AutomationEvent::ExponentialRamp { time, .. } => *time,
            AutomationEvent::SetCurve { start, .. } => *start,
        }
    }

    /// Last instant at which the event still influences the value
    fn end_time(&self) -> f64 {
        match self {
            AutomationEvent::SetCurve { start, duration, .. } => start + duration,
            other => other.key_time(),
        }
    }
}

/// One automatable parameter value
#[derive(Debug, Clone)]
pub struct AudioParam {
    base_value: f32,
    events: Vec<AutomationEvent>,
}

impl AudioParam {
    /// Create with an initial (pre-automation) value
    pub fn new(base_value: f32) -> Self {
        Self {
            base_value,
            events: Vec::new(),
        }
    }

    fn push(&mut self, event: AutomationEvent) {
        self.events.push(event);
        self.events.sort_by(|a, b| {
            a.key_time()
                .partial_cmp(&b.key_time())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    /// Schedule an instantaneous value change
    pub fn set_value_at(&mut self, time: f64, value: f32) {
        self.push(AutomationEvent::SetValue { time, value });
    }

    /// Schedule a linear ramp from the previous anchor to `value` at `time`
    pub fn linear_ramp_to(&mut self, scheduled_at: f64, time: f64, value: f32) {
        self.push(AutomationEvent::LinearRamp {
            scheduled_at,
            time,
            value,
        });
    }

    /// Schedule an exponential ramp; endpoints are clamped away from zero
    pub fn exponential_ramp_to(&mut self, scheduled_at: f64, time: f64, value: f32) {
        self.push(AutomationEvent::ExponentialRamp {
            scheduled_at,
            time,
            value,
        });
    }

    /// Schedule a sampled value curve over [start, start + duration]
    pub fn set_value_curve(&mut self, start: f64, duration: f64, values: Vec<f32>) {
        if values.is_empty() || duration <= 0.0 {
            return;
        }
        self.push(AutomationEvent::SetCurve {
            start,
            duration,
            values: Arc::new(values),
        });
    }

    /// Cancel-and-hold: drop every event still in effect at or after `time`
    /// and freeze the parameter at its value there
    pub fn cancel_scheduled(&mut self, time: f64) {
        let held = self.value_at(time);
        self.events.retain(|e| e.end_time() < time);
        self.push(AutomationEvent::SetValue { time, value: held });
    }

    /// Immediately jump to `value` at `time`, discarding future automation
    pub fn set_value(&mut self, time: f64, value: f32) {
        self.events.retain(|e| e.end_time() < time);
        self.push(AutomationEvent::SetValue { time, value });
    }

    /// Evaluate the parameter at an absolute context time
    pub fn value_at(&self, t: f64) -> f32 {
        let mut v = self.base_value;
        let mut anchor_t = f64::NEG_INFINITY;

        for event in &self.events {
            match event {
                AutomationEvent::SetValue { time, value } => {
                    if *time <= t {
                        v = *value;
                        anchor_t = *time;
                    } else {
                        break;
                    }
                }
                AutomationEvent::LinearRamp {
                    scheduled_at,
                    time,
                    value,
                } => {
                    if *time <= t {
                        v = *value;
                        anchor_t = *time;
                    } else {
                        let from_t = if anchor_t.is_finite() {
                            anchor_t.max(*scheduled_at).min(*time)
                        } else {
                            *scheduled_at
                        };
                        if t <= from_t {
                            return v;
                        }
                        let span = *time - from_t;
                        if span <= 0.0 {
                            return *value;
                        }
                        let frac = ((t - from_t) / span) as f32;
                        return v + (*value - v) * frac;
                    }
                }
                AutomationEvent::ExponentialRamp {
                    scheduled_at,
                    time,
                    value,
                } => {
                    if *time <= t {
                        v = *value;
                        anchor_t = *time;
                    } else {
                        let from_t = if anchor_t.is_finite() {
                            anchor_t.max(*scheduled_at).min(*time)
                        } else {
                            *scheduled_at
                        };
                        if t <= from_t {
                            return v;
                        }
                        let span = *time - from_t;
                        if span <= 0.0 {
                            return *value;
                        }
                        let frac = ((t - from_t) / span) as f32;
                        let from = v.max(EXP_FLOOR);
                        let to = value.max(EXP_FLOOR);
                        return from * (to / from).powf(frac);
                    }
                }
                AutomationEvent::SetCurve {
                    start,
                    duration,
                    values,
                } => {
                    let end = start + duration;
                    if end <= t {
                        v = *values.last().unwrap_or(&v);
                        anchor_t = end;
                    } else if *start <= t {
                        if values.len() == 1 {
                            return values[0];
                        }
                        let pos = (t - start) / duration * (values.len() - 1) as f64;
                        let idx = (pos.floor() as usize).min(values.len() - 2);
                        let frac = (pos - idx as f64) as f32;
                        return values[idx] + (values[idx + 1] - values[idx]) * frac;
                    } else {
                        break;
                    }
                }
            }
        }

        v
    }
}
