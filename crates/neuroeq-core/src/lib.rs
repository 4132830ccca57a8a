//! # NeuroEQ Core
//!
//! Shared types for converting Hodgkin-Huxley gating kinetics between the
//! alpha/beta rate form and the steady-state/time-constant form.
//!
//! ## Pipeline
//!
//! | Stage | Crate | Input | Output |
//! |-------|-------|-------|--------|
//! | Normalize + sample | `neuroeq-expr` | expression string | [`SampleSet`] |
//! | Derive inf/tau | `neuroeq-symbolic` | alpha, beta strings | [`KineticsPair`] |
//! | Fit sigmoid | `neuroeq-fit` | sampled inf(v) | fitted vhalf, tau |
//!
//! Every stage is a pure function of its inputs. Nothing here is cached or
//! shared between calls.

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Voltage (mV)
pub type Voltage = f64;

/// Rate (1/ms)
pub type Rate = f64;

/// Name of the free variable in gating expressions
pub const VOLTAGE_VAR: &str = "v";

// =============================================================================
// ERRORS
// =============================================================================

/// Failure while parsing or evaluating an expression
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("Syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("Unknown name: {0}")]
    UnknownName(String),

    #[error("Function {name} expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Domain error: {0}")]
    Domain(String),

    #[error("Indeterminate form 0/0")]
    Indeterminate,

    #[error("Non-finite result")]
    NonFinite,

    #[error("At v = {voltage}: {source}")]
    AtVoltage {
        voltage: Voltage,
        source: Box<ExpressionError>,
    },
}

/// Common errors
#[derive(Debug, Error)]
pub enum NeuroEqError {
    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    #[error("Symbolic parse error in `{expression}`: {reason}")]
    SymbolicParse {
        expression: String,
        reason: ExpressionError,
    },

    #[error("Fit did not converge (negative branch: {negative}; positive branch: {positive})")]
    FitConvergence { negative: String, positive: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, NeuroEqError>;

// =============================================================================
// SAMPLED CURVES
// =============================================================================

/// An expression sampled over a voltage grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSet {
    /// Strictly increasing voltages
    pub voltages: Array1<Voltage>,
    /// Value at each voltage
    pub values: Array1<f64>,
}

impl SampleSet {
    /// Pair voltages with values, checking the invariants
    pub fn new(voltages: Array1<Voltage>, values: Array1<f64>) -> Result<Self> {
        if voltages.len() != values.len() {
            return Err(NeuroEqError::InvalidInput(format!(
                "{} voltages but {} values",
                voltages.len(),
                values.len()
            )));
        }
        if voltages.windows(2).into_iter().any(|w| w[1] <= w[0]) {
            return Err(NeuroEqError::InvalidInput(
                "voltages must be strictly increasing".into(),
            ));
        }
        Ok(Self { voltages, values })
    }

    pub fn len(&self) -> usize {
        self.voltages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voltages.is_empty()
    }

    /// Iterate over (voltage, value) pairs
    pub fn iter(&self) -> impl Iterator<Item = (Voltage, f64)> + '_ {
        self.voltages.iter().copied().zip(self.values.iter().copied())
    }
}

/// All four gating curves over one voltage grid
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KineticsSamples {
    pub voltages: Array1<Voltage>,
    pub alpha: Array1<Rate>,
    pub beta: Array1<Rate>,
    pub inf: Array1<f64>,
    pub tau: Array1<f64>,
}

/// Steady-state and time-constant expressions derived from alpha/beta
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KineticsPair {
    /// alpha / (alpha + beta)
    pub inf: String,
    /// 1 / (alpha + beta)
    pub tau: String,
}

/// `n` evenly spaced voltages on `[v_min, v_max]`, endpoints exact
pub fn voltage_grid(v_min: Voltage, v_max: Voltage, n: usize) -> Result<Array1<Voltage>> {
    if n < 2 {
        return Err(NeuroEqError::InvalidInput(format!(
            "at least 2 samples required, got {}",
            n
        )));
    }
    if !(v_min.is_finite() && v_max.is_finite()) || v_min >= v_max {
        return Err(NeuroEqError::InvalidInput(format!(
            "invalid voltage range [{}, {}]",
            v_min, v_max
        )));
    }

    let step = (v_max - v_min) / (n - 1) as f64;
    Ok(Array1::from_shape_fn(n, |i| {
        if i == n - 1 {
            v_max
        } else {
            v_min + step * i as f64
        }
    }))
}

// =============================================================================
// PARAMETERS
// =============================================================================

/// Voltage sweep used for plotting and fitting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepParams {
    /// Lowest voltage (mV)
    pub v_min: Voltage,
    /// Highest voltage (mV)
    pub v_max: Voltage,
    /// Number of grid points
    pub samples: usize,
    /// Free variable name in the expressions
    pub variable: String,
}

impl Default for SweepParams {
    fn default() -> Self {
        Self {
            v_min: -100.0,
            v_max: 50.0,
            samples: 2000,
            variable: VOLTAGE_VAR.to_string(),
        }
    }
}

impl SweepParams {
    pub fn grid(&self) -> Result<Array1<Voltage>> {
        voltage_grid(self.v_min, self.v_max, self.samples)
    }
}

/// Bounded sigmoid fit controls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitParams {
    /// |vhalf| upper bound
    pub vhalf_bound: f64,
    /// |tau| upper bound
    pub tau_bound: f64,
    /// Smallest allowed |tau|, keeps each branch away from zero
    pub epsilon: f64,
    /// Maximum Levenberg-Marquardt iterations per branch
    pub max_iterations: usize,
    /// Relative cost/step tolerance
    pub tolerance: f64,
    /// Projected gradient tolerance
    pub gradient_tolerance: f64,
    /// Decimal places kept in the reported parameters
    pub decimals: u32,
}

impl Default for FitParams {
    fn default() -> Self {
        Self {
            vhalf_bound: 1000.0,
            tau_bound: 1000.0,
            epsilon: 1e-5,
            max_iterations: 500,
            tolerance: 1e-12,
            gradient_tolerance: 1e-12,
            decimals: 2,
        }
    }
}

// =============================================================================
// RATE FUNCTIONS
// =============================================================================

/// Rate function type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RateFunction {
    /// Standard HH form: A*(V+B)/(exp((V+B)/C)-1)
    HodgkinHuxley { a: f64, b: f64, c: f64 },
    /// Exponential: A*exp((V+B)/C)
    Exponential { a: f64, b: f64, c: f64 },
    /// Sigmoid: A/(1+exp((V+B)/C))
    Sigmoid { a: f64, b: f64, c: f64 },
    /// Linear: A*(V+B)
    Linear { a: f64, b: f64 },
    /// Constant
    Constant(f64),
}

impl RateFunction {
    /// Evaluate rate at given voltage
    pub fn eval(&self, v: Voltage) -> Rate {
        match self {
            Self::HodgkinHuxley { a, b, c } => {
                let x = (v + b) / c;
                if x.abs() < 1e-6 {
                    // L'Hopital's rule for x -> 0
                    a * c
                } else {
                    a * (v + b) / (x.exp() - 1.0)
                }
            }
            Self::Exponential { a, b, c } => a * ((v + b) / c).exp(),
            Self::Sigmoid { a, b, c } => a / (1.0 + ((v + b) / c).exp()),
            Self::Linear { a, b } => a * (v + b),
            Self::Constant(c) => *c,
        }
    }

    /// Render as an expression string over `var`
    pub fn to_expression(&self, var: &str) -> String {
        match self {
            Self::HodgkinHuxley { a, b, c } => format!(
                "{}*({}+{})/(exp(({}+{})/{})-1)",
                literal(*a),
                var,
                literal(*b),
                var,
                literal(*b),
                literal(*c)
            ),
            Self::Exponential { a, b, c } => format!(
                "{}*exp(({}+{})/{})",
                literal(*a),
                var,
                literal(*b),
                literal(*c)
            ),
            Self::Sigmoid { a, b, c } => format!(
                "{}/(1+exp(({}+{})/{}))",
                literal(*a),
                var,
                literal(*b),
                literal(*c)
            ),
            Self::Linear { a, b } => format!("{}*({}+{})", literal(*a), var, literal(*b)),
            Self::Constant(c) => literal(*c),
        }
    }
}

/// Number literal, parenthesized when negative so it nests anywhere
fn literal(x: f64) -> String {
    if x < 0.0 {
        format!("({})", format_decimal(x))
    } else {
        format_decimal(x)
    }
}

/// Decimal text that always carries a fractional part (`-45.0`, `0.25`)
pub fn format_decimal(x: f64) -> String {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e16 {
        format!("{:.1}", x)
    } else {
        format!("{}", x)
    }
}

/// Alpha/beta pair for one gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatePreset {
    /// Gate name (m, h, n)
    pub name: String,
    /// Short description
    pub description: String,
    /// Opening rate
    pub alpha: RateFunction,
    /// Closing rate
    pub beta: RateFunction,
}

impl GatePreset {
    pub fn alpha_expression(&self) -> String {
        self.alpha.to_expression(VOLTAGE_VAR)
    }

    pub fn beta_expression(&self) -> String {
        self.beta.to_expression(VOLTAGE_VAR)
    }

    /// Steady state from the closed-form rates
    pub fn inf(&self, v: Voltage) -> f64 {
        let a = self.alpha.eval(v);
        a / (a + self.beta.eval(v))
    }

    /// Time constant (ms) from the closed-form rates
    pub fn tau(&self, v: Voltage) -> f64 {
        1.0 / (self.alpha.eval(v) + self.beta.eval(v))
    }
}

/// Classic squid-axon gates (rest at -65 mV)
pub mod presets {
    use super::*;

    /// Alpha equation shown when the tool starts
    pub const DEFAULT_ALPHA: &str = "((v+45)/10)/(1-exp(-(v+45)/10))";

    /// Beta equation shown when the tool starts
    pub const DEFAULT_BETA: &str = "4*exp(-(v+70)/18)";

    /// Sodium activation
    pub fn hh_m() -> GatePreset {
        GatePreset {
            name: "m".into(),
            description: "Na+ activation".into(),
            alpha: RateFunction::HodgkinHuxley { a: -0.1, b: 40.0, c: -10.0 },
            beta: RateFunction::Exponential { a: 4.0, b: 65.0, c: -18.0 },
        }
    }

    /// Sodium inactivation
    pub fn hh_h() -> GatePreset {
        GatePreset {
            name: "h".into(),
            description: "Na+ inactivation".into(),
            alpha: RateFunction::Exponential { a: 0.07, b: 65.0, c: -20.0 },
            beta: RateFunction::Sigmoid { a: 1.0, b: 35.0, c: -10.0 },
        }
    }

    /// Potassium activation
    pub fn hh_n() -> GatePreset {
        GatePreset {
            name: "n".into(),
            description: "K+ activation".into(),
            alpha: RateFunction::HodgkinHuxley { a: -0.01, b: 55.0, c: -10.0 },
            beta: RateFunction::Exponential { a: 0.125, b: 65.0, c: -80.0 },
        }
    }

    pub fn all() -> Vec<GatePreset> {
        vec![hh_m(), hh_h(), hh_n()]
    }
}
