//! # NeuroEQ Fit
//!
//! Fits a Boltzmann sigmoid to a sampled steady-state curve:
//!
//! ```text
//! f(v; vhalf, tau) = 1 / (1 + exp((v + vhalf) / tau))
//! ```
//!
//! The sign of `tau` decides whether the curve rises (activation, `tau < 0`)
//! or falls (inactivation, `tau > 0`). Both branches are fitted with a
//! bounded Levenberg-Marquardt solver and the one with the smaller residual
//! wins.

use nalgebra::{Matrix2, Vector2};
use ndarray::ArrayView1;
use neuroeq_core::{
    format_decimal, FitParams, NeuroEqError, Result, SampleSet, SweepParams, Voltage, VOLTAGE_VAR,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single branch
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("No convergence after {0} iterations")]
    MaxIterations(usize),
    #[error("Non-finite residual at vhalf={vhalf}, tau={tau}")]
    NonFinite { vhalf: f64, tau: f64 },
    #[error("Singular normal equations")]
    Singular,
}

// Damping schedule
const LAMBDA_START: f64 = 1e-3;
const LAMBDA_UP: f64 = 10.0;
const LAMBDA_DOWN: f64 = 10.0;
const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e16;
const DIAGONAL_FLOOR: f64 = 1e-12;

// ============================================================================
// MODEL
// ============================================================================

/// Template sigmoid, evaluated without overflow for large |z|
pub fn sigmoid(v: Voltage, vhalf: f64, tau: f64) -> f64 {
    let z = (v + vhalf) / tau;
    if z > 0.0 {
        let e = (-z).exp();
        e / (1.0 + e)
    } else {
        1.0 / (1.0 + z.exp())
    }
}

/// Sign branch of `tau`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    /// Rising curve, `tau` in `[-tau_bound, -epsilon]`
    Negative,
    /// Falling curve, `tau` in `[epsilon, tau_bound]`
    Positive,
}

impl Branch {
    fn bounds(&self, params: &FitParams) -> (Vector2<f64>, Vector2<f64>) {
        let (tau_lo, tau_hi) = match self {
            Self::Negative => (-params.tau_bound, -params.epsilon),
            Self::Positive => (params.epsilon, params.tau_bound),
        };
        (
            Vector2::new(-params.vhalf_bound, tau_lo),
            Vector2::new(params.vhalf_bound, tau_hi),
        )
    }

    fn sign(&self) -> f64 {
        match self {
            Self::Negative => -1.0,
            Self::Positive => 1.0,
        }
    }
}

/// How fitted parameters are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignConvention {
    /// `(vhalf, tau)` of `1/(1+exp((v+vhalf)/tau))`
    #[default]
    Template,
    /// Half-activation voltage `v50 = -vhalf` and slope `k = -1/tau` of
    /// `1/(1+exp(-k*(v-v50)))`
    Slope,
}

/// Unrounded optimum of one branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchFit {
    pub branch: Branch,
    pub vhalf: f64,
    pub tau: f64,
    /// Euclidean norm of the residual vector
    pub residual_norm: f64,
    pub iterations: usize,
}

/// Outcome of a two-branch fit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    /// Rounded to the configured decimals
    pub vhalf: f64,
    /// Rounded to the configured decimals
    pub tau: f64,
    /// Residual norm of the winning branch
    pub residual_norm: f64,
    pub branch: Branch,
    /// Template expression with the rounded parameters
    pub expression: String,
    pub negative: Option<BranchFit>,
    pub positive: Option<BranchFit>,
}

impl FitResult {
    /// Voltage where the curve crosses 0.5
    pub fn half_activation(&self) -> f64 {
        -self.vhalf
    }

    /// Slope factor `k`, positive for activation curves
    pub fn slope_k(&self) -> f64 {
        -1.0 / self.tau
    }

    /// Reported parameter pair
    pub fn parameters(&self, convention: SignConvention) -> (f64, f64) {
        match convention {
            SignConvention::Template => (self.vhalf, self.tau),
            SignConvention::Slope => (self.half_activation(), self.slope_k()),
        }
    }

    /// Expression string in either convention. Both describe the same curve.
    pub fn render(&self, convention: SignConvention) -> String {
        match convention {
            SignConvention::Template => self.expression.clone(),
            SignConvention::Slope => format!(
                "1.0/(1.0+exp(-({})*(v-({}))))",
                format_decimal(self.slope_k()),
                format_decimal(self.half_activation())
            ),
        }
    }
}

/// `1.0/(1.0+(exp((v+VH)/(TAU))))`
pub fn render_template(vhalf: f64, tau: f64, variable: &str) -> String {
    format!(
        "1.0/(1.0+(exp(({}+{})/({}))))",
        variable,
        format_decimal(vhalf),
        format_decimal(tau)
    )
}

/// Round half away from zero
pub fn round_to(x: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    (x * scale).round() / scale
}

// ============================================================================
// LEVENBERG-MARQUARDT
// ============================================================================

struct Curve<'a> {
    voltages: ArrayView1<'a, f64>,
    values: ArrayView1<'a, f64>,
}

impl Curve<'_> {
    /// Sum of squared residuals
    fn cost(&self, p: &Vector2<f64>) -> f64 {
        self.voltages
            .iter()
            .zip(self.values.iter())
            .map(|(&v, &y)| {
                let r = sigmoid(v, p[0], p[1]) - y;
                r * r
            })
            .sum()
    }

    /// `JᵀJ` and `Jᵀr` at `p`
    fn normal_equations(&self, p: &Vector2<f64>) -> (Matrix2<f64>, Vector2<f64>) {
        let (vhalf, tau) = (p[0], p[1]);
        let mut jtj = Matrix2::zeros();
        let mut jtr = Vector2::zeros();

        for (&v, &y) in self.voltages.iter().zip(self.values.iter()) {
            let f = sigmoid(v, vhalf, tau);
            // df/dz with z = (v + vhalf) / tau
            let dfdz = -f * (1.0 - f);
            let row = Vector2::new(dfdz / tau, -dfdz * (v + vhalf) / (tau * tau));
            jtj += row * row.transpose();
            jtr += row * (f - y);
        }

        (jtj, jtr)
    }

    /// Starting point from the 0.5 crossing and the slope there
    fn initial_guess(&self) -> (f64, f64) {
        let n = self.voltages.len();
        let span = self.voltages[n - 1] - self.voltages[0];

        let crossing = (0..n - 1).find(|&i| {
            let (a, b) = (self.values[i] - 0.5, self.values[i + 1] - 0.5);
            a == 0.0 || a * b < 0.0
        });

        match crossing {
            Some(i) => {
                let (v0, v1) = (self.voltages[i], self.voltages[i + 1]);
                let (y0, y1) = (self.values[i], self.values[i + 1]);
                let slope = (y1 - y0) / (v1 - v0);
                let v_half = if y1 == y0 {
                    v0
                } else {
                    v0 + (0.5 - y0) / slope
                };
                // f'(v_half) = -1 / (4 tau)
                let tau = if slope.is_finite() && slope != 0.0 {
                    0.25 / slope.abs()
                } else {
                    span.abs() / 10.0
                };
                (-v_half, tau)
            }
            None => {
                let nearest = (0..n)
                    .min_by(|&a, &b| {
                        let da = (self.values[a] - 0.5).abs();
                        let db = (self.values[b] - 0.5).abs();
                        da.total_cmp(&db)
                    })
                    .unwrap_or(0);
                (-self.voltages[nearest], span.abs() / 10.0)
            }
        }
    }
}

fn clamp(p: Vector2<f64>, lower: &Vector2<f64>, upper: &Vector2<f64>) -> Vector2<f64> {
    Vector2::new(p[0].clamp(lower[0], upper[0]), p[1].clamp(lower[1], upper[1]))
}

/// Gradient with components that push out of the box zeroed
fn projected_gradient(
    gradient: &Vector2<f64>,
    p: &Vector2<f64>,
    lower: &Vector2<f64>,
    upper: &Vector2<f64>,
) -> Vector2<f64> {
    Vector2::from_fn(|i, _| {
        let g = gradient[i];
        if (p[i] <= lower[i] && g > 0.0) || (p[i] >= upper[i] && g < 0.0) {
            0.0
        } else {
            g
        }
    })
}

fn fit_branch(
    curve: &Curve,
    branch: Branch,
    guess: (f64, f64),
    params: &FitParams,
) -> std::result::Result<BranchFit, FitError> {
    let (lower, upper) = branch.bounds(params);
    let mut p = clamp(Vector2::new(guess.0, branch.sign() * guess.1.abs()), &lower, &upper);
    let mut cost = curve.cost(&p);
    if !cost.is_finite() {
        return Err(FitError::NonFinite { vhalf: p[0], tau: p[1] });
    }

    let finish = |p: &Vector2<f64>, cost: f64, iterations: usize| BranchFit {
        branch,
        vhalf: p[0],
        tau: p[1],
        residual_norm: cost.sqrt(),
        iterations,
    };

    let mut lambda = LAMBDA_START;
    for iteration in 1..=params.max_iterations {
        let (jtj, jtr) = curve.normal_equations(&p);
        if cost == 0.0
            || projected_gradient(&jtr, &p, &lower, &upper).amax() <= params.gradient_tolerance
        {
            return Ok(finish(&p, cost, iteration));
        }

        loop {
            let mut damped = jtj;
            for i in 0..2 {
                damped[(i, i)] += lambda * jtj[(i, i)].max(DIAGONAL_FLOOR);
            }

            let step = match damped.lu().solve(&(-jtr)) {
                Some(step) if step.iter().all(|x| x.is_finite()) => step,
                _ => {
                    lambda *= LAMBDA_UP;
                    if lambda > LAMBDA_MAX {
                        return Err(FitError::Singular);
                    }
                    continue;
                }
            };

            let candidate = clamp(p + step, &lower, &upper);
            let candidate_cost = curve.cost(&candidate);
            if candidate_cost.is_finite() && candidate_cost < cost {
                let reduction = cost - candidate_cost;
                let moved = (candidate - p).norm();
                let previous = cost;
                p = candidate;
                cost = candidate_cost;
                lambda = (lambda / LAMBDA_DOWN).max(LAMBDA_MIN);

                if reduction <= params.tolerance * previous
                    || moved <= params.tolerance * (p.norm() + params.tolerance)
                {
                    return Ok(finish(&p, cost, iteration));
                }
                break;
            }

            lambda *= LAMBDA_UP;
            if lambda > LAMBDA_MAX {
                // No downhill step left inside the box
                return Ok(finish(&p, cost, iteration));
            }
        }
    }

    Err(FitError::MaxIterations(params.max_iterations))
}

// ============================================================================
// TWO-BRANCH FIT
// ============================================================================

/// Relative residual gap below which the two branches count as tied
const TIE_TOLERANCE: f64 = 1e-9;

/// Smaller residual wins, ties go to the negative branch.
///
/// Residuals within [`TIE_TOLERANCE`] of each other are a tie, so rounding
/// noise between the two mirrored runs never decides the branch.
pub fn select_branch<'a>(negative: Option<&'a BranchFit>, positive: Option<&'a BranchFit>) -> Option<&'a BranchFit> {
    match (negative, positive) {
        (Some(n), Some(p)) => {
            let scale = n.residual_norm.max(p.residual_norm).max(f64::MIN_POSITIVE);
            let tied = n.residual_norm - p.residual_norm <= TIE_TOLERANCE * scale;
            Some(if tied { n } else { p })
        }
        (Some(n), None) => Some(n),
        (None, Some(p)) => Some(p),
        (None, None) => None,
    }
}

fn validate(voltages: &ArrayView1<f64>, values: &ArrayView1<f64>) -> Result<()> {
    if voltages.len() != values.len() {
        return Err(NeuroEqError::InvalidInput(format!(
            "{} voltages but {} values",
            voltages.len(),
            values.len()
        )));
    }
    if voltages.len() < 2 {
        return Err(NeuroEqError::InvalidInput(
            "at least 2 points are needed to fit".into(),
        ));
    }
    if voltages.iter().chain(values.iter()).any(|x| !x.is_finite()) {
        return Err(NeuroEqError::InvalidInput("non-finite sample".into()));
    }
    Ok(())
}

/// Fit with default [`FitParams`]
pub fn fit_sigmoid<'a>(voltages: ArrayView1<'a, f64>, values: ArrayView1<'a, f64>) -> Result<FitResult> {
    fit_sigmoid_with(voltages, values, &FitParams::default())
}

/// Fit both branches and keep the better one
pub fn fit_sigmoid_with<'a>(
    voltages: ArrayView1<'a, f64>,
    values: ArrayView1<'a, f64>,
    params: &FitParams,
) -> Result<FitResult> {
    validate(&voltages, &values)?;

    let curve = Curve { voltages, values };
    let guess = curve.initial_guess();
    log::debug!("initial guess vhalf={:.3}, |tau|={:.3}", guess.0, guess.1);

    let run = |branch: Branch| match fit_branch(&curve, branch, guess, params) {
        Ok(fit) => {
            log::debug!(
                "{:?} branch: vhalf={:.6}, tau={:.6}, residual={:.3e}, {} iterations",
                branch,
                fit.vhalf,
                fit.tau,
                fit.residual_norm,
                fit.iterations
            );
            Ok(fit)
        }
        Err(e) => {
            log::warn!("{:?} branch failed: {}", branch, e);
            Err(e)
        }
    };
    let negative = run(Branch::Negative);
    let positive = run(Branch::Positive);

    let chosen = match select_branch(negative.as_ref().ok(), positive.as_ref().ok()) {
        Some(fit) => fit.clone(),
        None => {
            let reason = |r: &std::result::Result<BranchFit, FitError>| match r {
                Ok(_) => String::new(),
                Err(e) => e.to_string(),
            };
            return Err(NeuroEqError::FitConvergence {
                negative: reason(&negative),
                positive: reason(&positive),
            });
        }
    };

    let vhalf = round_to(chosen.vhalf, params.decimals);
    let tau = round_to(chosen.tau, params.decimals);
    Ok(FitResult {
        vhalf,
        tau,
        residual_norm: chosen.residual_norm,
        branch: chosen.branch,
        expression: render_template(vhalf, tau, VOLTAGE_VAR),
        negative: negative.ok(),
        positive: positive.ok(),
    })
}

/// Fit an already sampled curve
pub fn fit_samples(samples: &SampleSet, params: &FitParams) -> Result<FitResult> {
    fit_sigmoid_with(samples.voltages.view(), samples.values.view(), params)
}

/// Sample a steady-state expression over `sweep` and fit it
pub fn fit_expression(inf: &str, sweep: &SweepParams, params: &FitParams) -> Result<FitResult> {
    let samples = neuroeq_expr::sample_sweep(inf, sweep)?;
    let mut result = fit_samples(&samples, params)?;
    result.expression = render_template(result.vhalf, result.tau, &sweep.variable);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;
    use neuroeq_core::voltage_grid;
    use neuroeq_expr::{Dialect, Expr};

    fn synthetic(vhalf: f64, tau: f64) -> (Array1<f64>, Array1<f64>) {
        let v = voltage_grid(-100.0, 50.0, 2000).unwrap();
        let y = v.mapv(|x| sigmoid(x, vhalf, tau));
        (v, y)
    }

    #[test]
    fn test_sigmoid_is_stable() {
        assert_eq!(sigmoid(-45.0, 45.0, 5.0), 0.5);
        assert!(sigmoid(1e6, 0.0, 1.0).is_finite());
        assert!(sigmoid(-1e6, 0.0, 1.0) > 0.999);
    }

    #[test]
    fn test_recovers_negative_tau() {
        let (v, y) = synthetic(-45.0, -5.0);
        let fit = fit_sigmoid(v.view(), y.view()).unwrap();
        assert_eq!(fit.branch, Branch::Negative);
        assert!((fit.vhalf + 45.0).abs() < 0.1);
        assert!((fit.tau + 5.0).abs() < 0.1);
        assert!(fit.residual_norm < 1e-6);
        assert_eq!(fit.expression, "1.0/(1.0+(exp((v+-45.0)/(-5.0))))");
    }

    #[test]
    fn test_recovers_positive_tau() {
        let (v, y) = synthetic(-45.0, 5.0);
        let fit = fit_sigmoid(v.view(), y.view()).unwrap();
        assert_eq!(fit.branch, Branch::Positive);
        assert!((fit.vhalf + 45.0).abs() < 0.1);
        assert!((fit.tau - 5.0).abs() < 0.1);
        assert!(fit.residual_norm < 1e-6);
    }

    #[test]
    fn test_recovers_mid_range_activation() {
        let (v, y) = synthetic(40.0, -6.0);
        let fit = fit_sigmoid(v.view(), y.view()).unwrap();
        assert_eq!(fit.branch, Branch::Negative);
        assert_eq!((fit.vhalf, fit.tau), (40.0, -6.0));
    }

    #[test]
    fn test_deterministic() {
        let (v, y) = synthetic(30.0, 8.0);
        let a = fit_sigmoid(v.view(), y.view()).unwrap();
        let b = fit_sigmoid(v.view(), y.view()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_input() {
        let v = Array1::from(vec![0.0, 1.0, 2.0]);
        let short = Array1::from(vec![0.5, 0.4]);
        assert!(matches!(
            fit_sigmoid(v.view(), short.view()),
            Err(NeuroEqError::InvalidInput(_))
        ));

        let one = Array1::from(vec![0.0]);
        assert!(matches!(
            fit_sigmoid(one.view(), one.view()),
            Err(NeuroEqError::InvalidInput(_))
        ));

        let nan = Array1::from(vec![0.9, f64::NAN, 0.1]);
        assert!(matches!(
            fit_sigmoid(v.view(), nan.view()),
            Err(NeuroEqError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_both_branches_failing() {
        let (v, y) = synthetic(-45.0, -5.0);
        let params = FitParams {
            max_iterations: 0,
            ..FitParams::default()
        };
        assert!(matches!(
            fit_sigmoid_with(v.view(), y.view(), &params),
            Err(NeuroEqError::FitConvergence { .. })
        ));
    }

    #[test]
    fn test_tie_goes_to_negative() {
        let fit = |branch| BranchFit {
            branch,
            vhalf: 0.0,
            tau: 1.0,
            residual_norm: 0.25,
            iterations: 1,
        };
        let (n, p) = (fit(Branch::Negative), fit(Branch::Positive));
        assert_eq!(select_branch(Some(&n), Some(&p)).map(|f| f.branch), Some(Branch::Negative));
        assert_eq!(select_branch(None, Some(&p)).map(|f| f.branch), Some(Branch::Positive));
        assert!(select_branch(None, None).is_none());

        // Rounding noise between the branches is still a tie
        let close = BranchFit {
            residual_norm: 0.25 * (1.0 - 4.0 * f64::EPSILON),
            ..fit(Branch::Positive)
        };
        assert_eq!(select_branch(Some(&n), Some(&close)).map(|f| f.branch), Some(Branch::Negative));

        let better = BranchFit {
            residual_norm: 0.2,
            ..fit(Branch::Positive)
        };
        assert_eq!(select_branch(Some(&n), Some(&better)).map(|f| f.branch), Some(Branch::Positive));
    }

    #[test]
    fn test_tied_fit_picks_negative_branch() {
        // Both branches start on an exact fit of the flat half-open curve
        let v = Array1::from(vec![10.0, 10.0]);
        let y = Array1::from(vec![0.5, 0.5]);

        let first = fit_sigmoid(v.view(), y.view()).unwrap();
        let second = fit_sigmoid(v.view(), y.view()).unwrap();
        assert_eq!(first, second);

        assert_eq!(first.branch, Branch::Negative);
        assert_eq!(first.vhalf, -10.0);
        assert_eq!(first.residual_norm, 0.0);
        let negative = first.negative.as_ref().unwrap();
        let positive = first.positive.as_ref().unwrap();
        assert_eq!(negative.residual_norm, positive.residual_norm);
        assert!(first.tau <= 0.0);
    }

    #[test]
    fn test_rounding() {
        assert_eq!(round_to(-5.125, 2), -5.13);
        assert_eq!(round_to(44.994, 2), 44.99);
        assert_eq!(render_template(-45.0, -5.12, "v"), "1.0/(1.0+(exp((v+-45.0)/(-5.12))))");
    }

    #[test]
    fn test_sign_conventions_agree() {
        let (v, y) = synthetic(-45.0, -5.0);
        let fit = fit_sigmoid(v.view(), y.view()).unwrap();
        assert_eq!(fit.parameters(SignConvention::Slope), (45.0, 0.2));

        let template = Expr::parse(&fit.render(SignConvention::Template), Dialect::Symbolic).unwrap();
        let slope = Expr::parse(&fit.render(SignConvention::Slope), Dialect::Symbolic).unwrap();
        for x in [-80.0, 0.0, 45.0, 50.0] {
            let a = template.eval_at("v", x).unwrap();
            let b = slope.eval_at("v", x).unwrap();
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_fit_expression() {
        let fit = fit_expression(
            "1/(1+exp((v+40)/(-6)))",
            &SweepParams::default(),
            &FitParams::default(),
        )
        .unwrap();
        assert_eq!(fit.expression, "1.0/(1.0+(exp((v+40.0)/(-6.0))))");
        assert_eq!(fit.half_activation(), -40.0);
    }
}
