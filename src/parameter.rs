// src/parameter.rs
//
// Sample-accurate parameter automation.
//
// A parameter holds a base value plus a time-ordered list of automation
// events expressed in absolute audio-clock seconds. The graph evaluates the
// automation once per frame; modulation from connected nodes is added on top
// by the graph, not here.

/// Which parameter of a node is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Gain,
    Frequency,
    Detune,
    Q,
    Pan,
}

/// One scheduled automation event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AutomationEvent {
    /// Jump to `value` at `time`.
    SetValue { value: f32, time: f64 },

    /// Linear approach from the previous event, reaching `value` at `end_time`.
    LinearRamp { value: f32, end_time: f64 },

    /// Exponential approach from the previous event, reaching `value` at `end_time`.
    ExponentialRamp { value: f32, end_time: f64 },

    /// First-order approach towards `target` starting at `start_time`.
    SetTarget {
        target: f32,
        start_time: f64,
        time_constant: f64,
    },
}

impl AutomationEvent {
    /// Time the event is ordered by.
    #[inline]
    pub fn time(&self) -> f64 {
        match *self {
            AutomationEvent::SetValue { time, .. } => time,
            AutomationEvent::LinearRamp { end_time, .. } => end_time,
            AutomationEvent::ExponentialRamp { end_time, .. } => end_time,
            AutomationEvent::SetTarget { start_time, .. } => start_time,
        }
    }

    #[inline]
    fn is_ramp(&self) -> bool {
        matches!(
            self,
            AutomationEvent::LinearRamp { .. } | AutomationEvent::ExponentialRamp { .. }
        )
    }
}

/// A SetTarget is treated as settled after this many time constants.
const SETTLED_TIME_CONSTANTS: f64 = 20.0;

/// Smallest magnitude accepted as an exponential ramp endpoint.
pub const MIN_EXPONENTIAL_VALUE: f32 = 1.0e-6;

/// An automatable parameter.
#[derive(Debug, Clone)]
pub struct AudioParam {
    min: f32,
    max: f32,

    /// Value in effect before the first pending event.
    base_value: f32,
    /// Time at which `base_value` was reached.
    base_time: f64,

    events: Vec<AutomationEvent>,
}

impl AudioParam {
    pub fn new(value: f32, min: f32, max: f32) -> Self {
        Self {
            min,
            max,
            base_value: value,
            base_time: 0.0,
            events: Vec::new(),
        }
    }

    /// Unbounded parameter.
    pub fn unbounded(value: f32) -> Self {
        Self::new(value, f32::MIN, f32::MAX)
    }

    /// Value before any pending automation.
    #[inline]
    pub fn base_value(&self) -> f32 {
        self.base_value
    }

    /// Pending automation events, oldest first.
    #[inline]
    pub fn events(&self) -> &[AutomationEvent] {
        &self.events
    }

    #[inline]
    pub fn has_automation(&self) -> bool {
        !self.events.is_empty()
    }

    // -------------------------------
    // MARK: Scheduling
    // -------------------------------

    /// Drop all automation and jump to `value` immediately.
    pub fn set_value(&mut self, value: f32) {
        self.events.clear();
        self.base_value = value;
    }

    pub fn set_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(AutomationEvent::SetValue { value, time });
    }

    pub fn linear_ramp_to_value_at_time(&mut self, value: f32, end_time: f64) {
        self.insert(AutomationEvent::LinearRamp { value, end_time });
    }

    /// Exponential ramp. Endpoints must be non-zero; values too close to zero
    /// are pushed out to [`MIN_EXPONENTIAL_VALUE`] keeping their sign.
    pub fn exponential_ramp_to_value_at_time(&mut self, value: f32, end_time: f64) {
        let value = if value.abs() < MIN_EXPONENTIAL_VALUE {
            log::warn!("exponential ramp to {value} clamped away from zero");
            MIN_EXPONENTIAL_VALUE.copysign(if value == 0.0 { 1.0 } else { value })
        } else {
            value
        };
        self.insert(AutomationEvent::ExponentialRamp { value, end_time });
    }

    pub fn set_target_at_time(&mut self, target: f32, start_time: f64, time_constant: f64) {
        self.insert(AutomationEvent::SetTarget {
            target,
            start_time,
            time_constant: time_constant.max(0.0),
        });
    }

    /// Remove every event at or after `time`.
    pub fn cancel_scheduled_values(&mut self, time: f64) {
        self.events.retain(|e| e.time() < time);
    }

    /// Freeze the automation at `time`: keep everything before it, truncate
    /// an in-flight ramp so it lands on the held value, and hold from there.
    pub fn cancel_and_hold_at_time(&mut self, time: f64) {
        let held = self.value_at(time);
        let split = self
            .events
            .iter()
            .position(|e| e.time() > time)
            .unwrap_or(self.events.len());
        let interrupted = self.events.get(split).copied();
        self.events.truncate(split);

        match interrupted {
            Some(AutomationEvent::LinearRamp { .. }) => {
                self.events.push(AutomationEvent::LinearRamp {
                    value: held,
                    end_time: time,
                });
            }
            Some(AutomationEvent::ExponentialRamp { .. }) if held != 0.0 => {
                self.events.push(AutomationEvent::ExponentialRamp {
                    value: held,
                    end_time: time,
                });
            }
            _ => {}
        }
        self.events.push(AutomationEvent::SetValue { value: held, time });
    }

    fn insert(&mut self, event: AutomationEvent) {
        let t = event.time();
        if !t.is_finite() {
            log::warn!("ignoring automation event at non-finite time {t}");
            return;
        }
        let idx = self
            .events
            .iter()
            .position(|e| e.time() > t)
            .unwrap_or(self.events.len());
        self.events.insert(idx, event);
    }

    // -------------------------------
    // MARK: Evaluation
    // -------------------------------

    /// Automation value at absolute time `t`, clamped to the nominal range.
    pub fn value_at(&self, t: f64) -> f32 {
        self.raw_value_at(t).clamp(self.min, self.max)
    }

    fn raw_value_at(&self, t: f64) -> f32 {
        let mut prev_value = self.base_value;
        let mut prev_time = self.base_time;

        for (i, event) in self.events.iter().enumerate() {
            match *event {
                AutomationEvent::SetValue { value, time } => {
                    if t < time {
                        return prev_value;
                    }
                    prev_value = value;
                    prev_time = time;
                }

                AutomationEvent::LinearRamp { value, end_time } => {
                    if t < end_time {
                        if t <= prev_time {
                            return prev_value;
                        }
                        let f = ((t - prev_time) / (end_time - prev_time)) as f32;
                        return prev_value + (value - prev_value) * f;
                    }
                    prev_value = value;
                    prev_time = end_time;
                }

                AutomationEvent::ExponentialRamp { value, end_time } => {
                    if t < end_time {
                        // Mixed signs or a zero start cannot ramp exponentially: hold.
                        if t <= prev_time || prev_value * value <= 0.0 {
                            return prev_value;
                        }
                        let f = (t - prev_time) / (end_time - prev_time);
                        let ratio = (value / prev_value) as f64;
                        return (prev_value as f64 * ratio.powf(f)) as f32;
                    }
                    prev_value = value;
                    prev_time = end_time;
                }

                AutomationEvent::SetTarget {
                    target,
                    start_time,
                    time_constant,
                } => {
                    if t < start_time {
                        return prev_value;
                    }
                    // Runs until the next event takes over. A following ramp
                    // starts from this event's start.
                    let until = match self.events.get(i + 1) {
                        Some(next) if next.is_ramp() => start_time,
                        Some(next) => next.time(),
                        None => f64::INFINITY,
                    };
                    let start_value = prev_value;
                    let at = t.min(until);
                    let v = approach(start_value, target, at - start_time, time_constant);
                    if t < until {
                        return v;
                    }
                    prev_value = v;
                    prev_time = until;
                }
            }
        }

        let _ = prev_time;
        prev_value
    }

    /// Fold events that can no longer influence values at or after `now`.
    pub fn prune(&mut self, now: f64) {
        while let Some(first) = self.events.first().copied() {
            match first {
                AutomationEvent::SetValue { value, time } if time <= now => {
                    self.base_value = value;
                    self.base_time = time;
                }
                AutomationEvent::LinearRamp { value, end_time }
                | AutomationEvent::ExponentialRamp { value, end_time }
                    if end_time <= now =>
                {
                    self.base_value = value;
                    self.base_time = end_time;
                }
                AutomationEvent::SetTarget {
                    target,
                    start_time,
                    time_constant,
                } if start_time <= now => match self.events.get(1) {
                    Some(next) if next.is_ramp() => {
                        self.base_time = start_time;
                    }
                    Some(next) if next.time() <= now => {
                        let end = next.time();
                        self.base_value =
                            approach(self.base_value, target, end - start_time, time_constant);
                        self.base_time = end;
                    }
                    None if now - start_time >= SETTLED_TIME_CONSTANTS * time_constant => {
                        self.base_value = target;
                        self.base_time = now;
                    }
                    _ => break,
                },
                _ => break,
            }
            self.events.remove(0);
        }
    }

    /// Fill `out` with per-frame values starting at `start_time`.
    pub fn render(&self, start_time: f64, sample_rate: f64, out: &mut [f32]) {
        if self.events.is_empty() {
            out.fill(self.base_value.clamp(self.min, self.max));
            return;
        }
        let dt = 1.0 / sample_rate;
        for (i, v) in out.iter_mut().enumerate() {
            *v = self.value_at(start_time + i as f64 * dt);
        }
    }

    /// Clamp a modulated value to the nominal range.
    #[inline]
    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }
}

#[inline]
fn approach(from: f32, target: f32, elapsed: f64, time_constant: f64) -> f32 {
    if time_constant <= 0.0 {
        return target;
    }
    let k = (-elapsed.max(0.0) / time_constant).exp() as f32;
    target + (from - target) * k
}
