//! Independent-source excitations: AC phasors and transient waveforms.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Small-signal AC excitation of an independent source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcPhasor {
    pub magnitude: f64,
    /// Phase in degrees
    #[serde(default)]
    pub phase: f64,
}

impl AcPhasor {
    pub fn new(magnitude: f64, phase: f64) -> Self {
        AcPhasor { magnitude, phase }
    }

    /// Polar to rectangular conversion.
    pub fn to_complex(&self) -> Complex64 {
        Complex64::from_polar(self.magnitude, self.phase.to_radians())
    }
}

/// Time-domain waveform of an independent source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Waveform {
    /// Rise from `v1` towards `v2` after `td1` with time constant `tc1`,
    /// then decay back after `td2` with time constant `tc2`.
    Exp {
        v1: f64,
        v2: f64,
        td1: f64,
        tc1: f64,
        td2: f64,
        tc2: f64,
    },
    /// Damped sine. `phase` in degrees.
    Sin {
        vo: f64,
        va: f64,
        freq: f64,
        #[serde(default)]
        td: f64,
        #[serde(default)]
        theta: f64,
        #[serde(default)]
        phase: f64,
    },
    /// Trapezoidal pulse train. A non-positive or infinite `per` means a single pulse.
    Pulse {
        v1: f64,
        v2: f64,
        td: f64,
        tr: f64,
        tf: f64,
        pw: f64,
        per: f64,
    },
    /// Piecewise linear through `(time, value)` breakpoints, sorted by time.
    Pwl(Vec<(f64, f64)>),
}

impl Waveform {
    /// Value of the waveform at time `t`.
    pub fn value_at(&self, t: f64) -> f64 {
        match self {
            Waveform::Exp {
                v1,
                v2,
                td1,
                tc1,
                td2,
                tc2,
            } => {
                if t <= *td1 {
                    *v1
                } else if t <= *td2 {
                    v1 + (v2 - v1) * (1.0 - (-(t - td1) / tc1).exp())
                } else {
                    v1 + (v2 - v1) * (1.0 - (-(t - td1) / tc1).exp())
                        + (v1 - v2) * (1.0 - (-(t - td2) / tc2).exp())
                }
            }
            Waveform::Sin {
                vo,
                va,
                freq,
                td,
                theta,
                phase,
            } => {
                let phi = phase.to_radians();
                if t <= *td {
                    vo + va * phi.sin()
                } else {
                    let dt = t - td;
                    vo + va * (2.0 * PI * freq * dt + phi).sin() * (-dt * theta).exp()
                }
            }
            Waveform::Pulse {
                v1,
                v2,
                td,
                tr,
                tf,
                pw,
                per,
            } => {
                if t <= *td {
                    return *v1;
                }
                let mut local = t - td;
                if per.is_finite() && *per > 0.0 {
                    local %= per;
                }
                if local < *tr {
                    v1 + (v2 - v1) * local / tr
                } else if local <= tr + pw {
                    *v2
                } else if local < tr + pw + tf {
                    v2 + (v1 - v2) * (local - tr - pw) / tf
                } else {
                    *v1
                }
            }
            Waveform::Pwl(points) => pwl_value(points, t),
        }
    }

    /// Reject parameter sets that would produce NaN or divide by zero.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Waveform::Exp { tc1, tc2, td1, td2, .. } => {
                if *tc1 <= 0.0 || *tc2 <= 0.0 {
                    return Err("EXP time constants must be positive".to_string());
                }
                if td2 < td1 {
                    return Err("EXP fall delay must not precede the rise delay".to_string());
                }
            }
            Waveform::Sin { freq, .. } => {
                if !freq.is_finite() || *freq < 0.0 {
                    return Err("SIN frequency must be finite and non-negative".to_string());
                }
            }
            Waveform::Pulse { tr, tf, pw, .. } => {
                if *tr < 0.0 || *tf < 0.0 || *pw < 0.0 {
                    return Err("PULSE rise, fall and width must be non-negative".to_string());
                }
            }
            Waveform::Pwl(points) => {
                if points.is_empty() {
                    return Err("PWL needs at least one breakpoint".to_string());
                }
                if points.windows(2).any(|w| w[1].0 < w[0].0) {
                    return Err("PWL breakpoints must be sorted by time".to_string());
                }
            }
        }
        Ok(())
    }
}

fn pwl_value(points: &[(f64, f64)], t: f64) -> f64 {
    let (first_t, first_v) = points[0];
    if t <= first_t {
        return first_v;
    }
    for pair in points.windows(2) {
        let (t0, v0) = pair[0];
        let (t1, v1) = pair[1];
        if t <= t1 {
            if t1 == t0 {
                return v1;
            }
            return v0 + (v1 - v0) * (t - t0) / (t1 - t0);
        }
    }
    points[points.len() - 1].1
}

/// Excitation attached to an independent source on top of its DC value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    #[serde(default)]
    pub ac: Option<AcPhasor>,
    #[serde(default)]
    pub waveform: Option<Waveform>,
}

impl SourceSpec {
    pub fn with_ac(mut self, magnitude: f64, phase: f64) -> Self {
        self.ac = Some(AcPhasor::new(magnitude, phase));
        self
    }

    pub fn with_waveform(mut self, waveform: Waveform) -> Self {
        self.waveform = Some(waveform);
        self
    }
}
