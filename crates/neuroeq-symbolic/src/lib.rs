//! # NeuroEQ Symbolic
//!
//! Converts gating kinetics from the alpha/beta rate form to the
//! steady-state/time-constant form:
//!
//! ```text
//! x_inf = alpha / (alpha + beta)
//! x_tau = 1 / (alpha + beta)
//! ```
//!
//! and optionally simplifies the result.
//!
//! The simplifier works on a canonical tree with n-ary sums and products.
//! Building a node canonicalizes it, so every [`Sym`] value is already in
//! canonical form:
//!
//! - sums: flattened, like terms merged, one trailing constant
//! - products: flattened, one leading coefficient, equal bases merged by
//!   adding exponents, `exp` factors merged
//! - powers: `x^0`, `x^1`, numeric folding, `(x^a)^n`
//!
//! A second candidate puts sums of fractions over a common denominator.
//! Whichever candidate has fewer operations is returned.

use ndarray::Array1;
use neuroeq_core::{KineticsPair, KineticsSamples, NeuroEqError, Result, SweepParams};
use neuroeq_expr::{evaluate_grid, normalize_for_numeric, BinaryOp, Dialect, Expr, Function};
use std::fmt;

// =============================================================================
// CANONICAL TREE
// =============================================================================

/// Expression in canonical form
#[derive(Debug, Clone, PartialEq)]
pub enum Sym {
    Num(f64),
    Pi,
    Var(String),
    /// At least two terms, constant last
    Add(Vec<Sym>),
    /// At least two factors, coefficient first
    Mul(Vec<Sym>),
    Pow(Box<Sym>, Box<Sym>),
    Call(Function, Box<Sym>),
}

impl Sym {
    /// Canonical form of a parsed expression
    pub fn from_expr(expr: &Expr) -> Self {
        match expr {
            Expr::Number(x) => Self::Num(*x),
            Expr::Pi => Self::Pi,
            Expr::Variable(name) => Self::Var(name.clone()),
            Expr::Neg(inner) => mul(vec![Self::Num(-1.0), Self::from_expr(inner)]),
            Expr::Binary { op, left, right } => {
                let l = Self::from_expr(left);
                let r = Self::from_expr(right);
                match op {
                    BinaryOp::Add => add(vec![l, r]),
                    BinaryOp::Sub => add(vec![l, mul(vec![Self::Num(-1.0), r])]),
                    BinaryOp::Mul => mul(vec![l, r]),
                    BinaryOp::Div => mul(vec![l, pow(r, Self::Num(-1.0))]),
                    BinaryOp::Pow => pow(l, r),
                }
            }
            Expr::Call { function, arg } => call(*function, Self::from_expr(arg)),
        }
    }

    fn as_num(&self) -> Option<f64> {
        match self {
            Self::Num(x) => Some(*x),
            _ => None,
        }
    }

    /// Number of operations, the measure used to pick the shortest form
    pub fn count_ops(&self) -> usize {
        match self {
            Self::Num(x) => usize::from(*x < 0.0),
            Self::Pi | Self::Var(_) => 0,
            Self::Add(items) | Self::Mul(items) => {
                items.len().saturating_sub(1) + items.iter().map(Self::count_ops).sum::<usize>()
            }
            Self::Pow(base, exponent) => 1 + base.count_ops() + exponent.count_ops(),
            Self::Call(_, arg) => 1 + arg.count_ops(),
        }
    }
}

fn is_integer(x: f64) -> bool {
    x.is_finite() && x.fract() == 0.0
}

/// Canonical sum
pub fn add(terms: Vec<Sym>) -> Sym {
    let mut constant = 0.0;
    let mut collected: Vec<(Sym, f64)> = Vec::new();
    let mut queue = terms;

    while let Some(term) = queue.pop() {
        match term {
            Sym::Num(x) => constant += x,
            Sym::Add(inner) => queue.extend(inner),
            other => {
                let (coefficient, rest) = split_coefficient(other);
                match collected.iter_mut().find(|(r, _)| *r == rest) {
                    Some((_, total)) => *total += coefficient,
                    None => collected.push((rest, coefficient)),
                }
            }
        }
    }

    let mut out: Vec<Sym> = collected
        .into_iter()
        .filter(|(_, c)| *c != 0.0)
        .map(|(rest, c)| {
            if c == 1.0 {
                rest
            } else {
                mul(vec![Sym::Num(c), rest])
            }
        })
        .collect();
    out.sort_by_cached_key(|t| t.to_string());

    if constant != 0.0 {
        out.push(Sym::Num(constant));
    }
    match out.len() {
        0 => Sym::Num(0.0),
        1 => out.remove(0),
        _ => Sym::Add(out),
    }
}

/// `c·rest` with `c` the numeric coefficient, 1 when there is none
fn split_coefficient(term: Sym) -> (f64, Sym) {
    match term {
        Sym::Mul(mut factors) => {
            if let Some(&Sym::Num(c)) = factors.first() {
                factors.remove(0);
                let rest = if factors.len() == 1 {
                    factors.remove(0)
                } else {
                    Sym::Mul(factors)
                };
                (c, rest)
            } else {
                (1.0, Sym::Mul(factors))
            }
        }
        other => (1.0, other),
    }
}

/// Canonical product
pub fn mul(factors: Vec<Sym>) -> Sym {
    let mut coefficient = 1.0;
    let mut powers: Vec<(Sym, Sym)> = Vec::new();
    let mut exp_args: Vec<Sym> = Vec::new();
    let mut queue = factors;

    while let Some(factor) = queue.pop() {
        match factor {
            Sym::Num(x) => coefficient *= x,
            Sym::Mul(inner) => queue.extend(inner),
            Sym::Call(Function::Exp, arg) => exp_args.push(*arg),
            Sym::Pow(base, exponent) => push_power(&mut powers, *base, *exponent),
            other => push_power(&mut powers, other, Sym::Num(1.0)),
        }
    }
    if coefficient == 0.0 {
        return Sym::Num(0.0);
    }

    let mut out = Vec::new();
    // Factors that came back as products and need another pass
    let mut nested = Vec::new();
    for (base, exponent) in powers {
        match pow(base, exponent) {
            Sym::Num(x) => coefficient *= x,
            Sym::Mul(inner) => nested.extend(inner),
            Sym::Call(Function::Exp, arg) => exp_args.push(*arg),
            other => out.push(other),
        }
    }

    if !exp_args.is_empty() {
        match call(Function::Exp, add(exp_args)) {
            Sym::Num(x) => coefficient *= x,
            merged @ Sym::Call(Function::Exp, _) => out.push(merged),
            // exp(log(x)) collapsed to x
            other => nested.push(other),
        }
    }

    if !nested.is_empty() {
        nested.extend(out);
        nested.push(Sym::Num(coefficient));
        return mul(nested);
    }

    if coefficient == 0.0 {
        return Sym::Num(0.0);
    }
    match out.len() {
        0 => Sym::Num(coefficient),
        1 => {
            let single = out.remove(0);
            if coefficient == 1.0 {
                single
            } else if let Sym::Add(terms) = single {
                add(terms
                    .into_iter()
                    .map(|t| mul(vec![Sym::Num(coefficient), t]))
                    .collect())
            } else {
                Sym::Mul(vec![Sym::Num(coefficient), single])
            }
        }
        _ => {
            out.sort_by_cached_key(|t| t.to_string());
            if coefficient != 1.0 {
                out.insert(0, Sym::Num(coefficient));
            }
            Sym::Mul(out)
        }
    }
}

fn push_power(powers: &mut Vec<(Sym, Sym)>, base: Sym, exponent: Sym) {
    match powers.iter_mut().find(|(b, _)| *b == base) {
        Some((_, total)) => {
            let previous = std::mem::replace(total, Sym::Num(0.0));
            *total = add(vec![previous, exponent]);
        }
        None => powers.push((base, exponent)),
    }
}

/// Numeric power, only when it is defined and finite
fn fold_pow(base: f64, exponent: f64) -> Option<f64> {
    if base == 0.0 && exponent < 0.0 {
        return None;
    }
    if base < 0.0 && !is_integer(exponent) {
        return None;
    }
    Some(base.powf(exponent)).filter(|x| x.is_finite())
}

/// Canonical power
pub fn pow(base: Sym, exponent: Sym) -> Sym {
    if let Some(e) = exponent.as_num() {
        if e == 0.0 {
            return Sym::Num(1.0);
        }
        if e == 1.0 {
            return base;
        }
    }

    match (base, exponent) {
        (Sym::Num(b), Sym::Num(e)) => match fold_pow(b, e) {
            Some(x) => Sym::Num(x),
            None => Sym::Pow(Box::new(Sym::Num(b)), Box::new(Sym::Num(e))),
        },
        (Sym::Num(b), _) if b == 1.0 => Sym::Num(1.0),
        (Sym::Pow(inner, a), Sym::Num(n)) if is_integer(n) => {
            pow(*inner, mul(vec![*a, Sym::Num(n)]))
        }
        (Sym::Mul(factors), Sym::Num(n)) if is_integer(n) => mul(factors
            .into_iter()
            .map(|f| pow(f, Sym::Num(n)))
            .collect()),
        (Sym::Call(Function::Exp, arg), e) => call(Function::Exp, mul(vec![*arg, e])),
        (b, e) => Sym::Pow(Box::new(b), Box::new(e)),
    }
}

/// Canonical function call
pub fn call(function: Function, arg: Sym) -> Sym {
    // Fold only exact results (exp(0), log(1), sqrt(9)) so no digits are lost
    if let Some(x) = arg.as_num() {
        if let Ok(y) = function.apply(x) {
            if is_integer(y) {
                return Sym::Num(y);
            }
        }
    }

    match (function, arg) {
        (Function::Exp, Sym::Call(Function::Log, inner)) => *inner,
        (Function::Log, Sym::Call(Function::Exp, inner)) => *inner,
        (f, a) => Sym::Call(f, Box::new(a)),
    }
}

// =============================================================================
// TOGETHER
// =============================================================================

/// Numerator and denominator of a term
fn split_fraction(sym: &Sym) -> (Sym, Sym) {
    match sym {
        Sym::Pow(base, exponent) => match exponent.as_num() {
            Some(e) if e < 0.0 => (Sym::Num(1.0), pow((**base).clone(), Sym::Num(-e))),
            _ => (sym.clone(), Sym::Num(1.0)),
        },
        Sym::Mul(factors) => {
            let mut numerator = Vec::new();
            let mut denominator = Vec::new();
            for factor in factors {
                match factor {
                    Sym::Pow(base, exponent) if exponent.as_num().is_some_and(|e| e < 0.0) => {
                        let e = exponent.as_num().unwrap_or(-1.0);
                        denominator.push(pow((**base).clone(), Sym::Num(-e)));
                    }
                    other => numerator.push(other.clone()),
                }
            }
            (mul(numerator), mul(denominator))
        }
        other => (other.clone(), Sym::Num(1.0)),
    }
}

/// Rewrite every sum of fractions over a common denominator
pub fn together(sym: &Sym) -> Sym {
    match sym {
        Sym::Add(terms) => {
            let parts: Vec<(Sym, Sym)> = terms
                .iter()
                .map(|t| split_fraction(&together(t)))
                .collect();

            let mut denominators: Vec<Sym> = Vec::new();
            for (_, d) in &parts {
                if *d != Sym::Num(1.0) && !denominators.contains(d) {
                    denominators.push(d.clone());
                }
            }
            if denominators.is_empty() {
                return sym.clone();
            }

            let numerator = add(parts
                .iter()
                .map(|(n, d)| {
                    let mut factors = vec![n.clone()];
                    factors.extend(denominators.iter().filter(|x| *x != d).cloned());
                    mul(factors)
                })
                .collect());
            mul(vec![numerator, pow(mul(denominators), Sym::Num(-1.0))])
        }
        Sym::Mul(factors) => mul(factors.iter().map(together).collect()),
        Sym::Pow(base, exponent) => pow(together(base), (**exponent).clone()),
        Sym::Call(function, arg) => call(*function, together(arg)),
        other => other.clone(),
    }
}

/// Shortest of the canonical and combined forms
pub fn simplify(expr: &Expr) -> Sym {
    let canonical = Sym::from_expr(expr);
    let combined = together(&canonical);

    let (a, b) = (canonical.count_ops(), combined.count_ops());
    log::debug!("simplify: canonical {} ops, combined {} ops", a, b);
    if b < a {
        combined
    } else {
        canonical
    }
}

// =============================================================================
// RENDERING
// =============================================================================

const SUM: u8 = 1;
const PRODUCT: u8 = 2;
const POWER: u8 = 3;
const ATOM: u8 = 4;

/// Snap to 15 significant digits when that is within a few ulps
fn trim_float_noise(x: f64) -> f64 {
    let short: f64 = format!("{:.14e}", x).parse().unwrap_or(x);
    if (short - x).abs() <= 4.0 * f64::EPSILON * x.abs() {
        short
    } else {
        x
    }
}

/// Number text the expression grammar reads back.
///
/// Products of decimal constants print without their last-ulp noise, so
/// `0.28*27` renders as `7.56`.
pub fn format_number(x: f64) -> String {
    let x = trim_float_noise(x);
    let magnitude = x.abs();
    if x.fract() == 0.0 && magnitude < 1e15 {
        format!("{}", x as i64)
    } else if (1e-4..1e15).contains(&magnitude) {
        format!("{}", x)
    } else {
        format!("{:e}", x)
    }
}

fn precedence(sym: &Sym) -> u8 {
    match sym {
        Sym::Add(_) => SUM,
        Sym::Mul(_) => PRODUCT,
        Sym::Num(x) if *x < 0.0 => PRODUCT,
        Sym::Pow(_, e) if e.as_num().is_some_and(|x| x < 0.0) => PRODUCT,
        Sym::Pow(..) => POWER,
        _ => ATOM,
    }
}

fn wrap(sym: &Sym, min: u8) -> String {
    if precedence(sym) < min {
        format!("({})", sym)
    } else {
        sym.to_string()
    }
}

/// Magnitude of a term with a negative coefficient
fn negated(term: &Sym) -> Option<Sym> {
    match term {
        Sym::Num(x) if *x < 0.0 => Some(Sym::Num(-x)),
        Sym::Mul(factors) => match factors.first() {
            Some(&Sym::Num(c)) if c < 0.0 => {
                let mut rest: Vec<Sym> = factors[1..].to_vec();
                if c != -1.0 {
                    rest.insert(0, Sym::Num(-c));
                }
                Some(if rest.len() == 1 {
                    rest.remove(0)
                } else {
                    Sym::Mul(rest)
                })
            }
            _ => None,
        },
        _ => None,
    }
}

fn fmt_sum(terms: &[Sym], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, term) in terms.iter().enumerate() {
        if i == 0 {
            write!(f, "{}", term)?;
            continue;
        }
        match negated(term) {
            Some(magnitude) => write!(f, " - {}", wrap(&magnitude, PRODUCT))?,
            None => write!(f, " + {}", wrap(term, PRODUCT))?,
        }
    }
    Ok(())
}

fn fmt_product(factors: &[Sym], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut coefficient = 1.0;
    let mut numerator = Vec::new();
    let mut denominator = Vec::new();

    for factor in factors {
        match factor {
            Sym::Num(x) => coefficient *= x,
            Sym::Pow(base, exponent) if exponent.as_num().is_some_and(|e| e < 0.0) => {
                let e = -exponent.as_num().unwrap_or(-1.0);
                denominator.push(if e == 1.0 {
                    (**base).clone()
                } else {
                    Sym::Pow(base.clone(), Box::new(Sym::Num(e)))
                });
            }
            other => numerator.push(wrap(other, PRODUCT)),
        }
    }

    if coefficient < 0.0 {
        f.write_str("-")?;
    }
    let magnitude = coefficient.abs();
    let mut parts = Vec::new();
    if magnitude != 1.0 || numerator.is_empty() {
        parts.push(format_number(magnitude));
    }
    parts.extend(numerator);
    f.write_str(&parts.join("*"))?;

    match denominator.len() {
        0 => Ok(()),
        1 => write!(f, "/{}", wrap(&denominator[0], POWER)),
        _ => {
            let inner: Vec<String> = denominator.iter().map(|d| wrap(d, PRODUCT)).collect();
            write!(f, "/({})", inner.join("*"))
        }
    }
}

impl fmt::Display for Sym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(x) => f.write_str(&format_number(*x)),
            Self::Pi => f.write_str(neuroeq_expr::PI_NAME),
            Self::Var(name) => f.write_str(name),
            Self::Call(function, arg) => write!(f, "{}({})", function.name(), arg),
            Self::Add(terms) => fmt_sum(terms, f),
            Self::Mul(factors) => fmt_product(factors, f),
            Self::Pow(base, exponent) => {
                if exponent.as_num().is_some_and(|e| e < 0.0) {
                    fmt_product(std::slice::from_ref(self), f)
                } else {
                    write!(f, "{}**{}", wrap(base, ATOM), wrap(exponent, ATOM))
                }
            }
        }
    }
}

// =============================================================================
// KINETICS TRANSFORMER
// =============================================================================

fn parse_symbolic(input: &str) -> Result<Expr> {
    Expr::parse(input, Dialect::Symbolic).map_err(|reason| NeuroEqError::SymbolicParse {
        expression: input.to_string(),
        reason,
    })
}

fn compose(alpha: &str, beta: &str) -> KineticsPair {
    KineticsPair {
        inf: format!("({a})/(({a}) + ({b}))", a = alpha, b = beta),
        tau: format!("1/(({a}) + ({b}))", a = alpha, b = beta),
    }
}

/// Render a simplified expression, keeping `fallback` if the text would not
/// parse back
fn render_checked(expr: &Expr, fallback: &str) -> String {
    let rendered = simplify(expr).to_string();
    match Expr::parse(&rendered, Dialect::Symbolic) {
        Ok(_) => rendered,
        Err(e) => {
            log::warn!("simplified form `{}` unreadable ({}), keeping composed form", rendered, e);
            fallback.to_string()
        }
    }
}

/// Derive `inf = alpha/(alpha+beta)` and `tau = 1/(alpha+beta)`.
///
/// Without simplification the inputs are only composed as text and never
/// parsed. With simplification both inputs must parse in the symbolic
/// dialect.
pub fn derive_inf_tau(alpha: &str, beta: &str, simplify: bool) -> Result<KineticsPair> {
    let composed = compose(alpha, beta);
    if !simplify {
        return Ok(composed);
    }

    let a = parse_symbolic(alpha)?;
    let b = parse_symbolic(beta)?;
    let sum = Expr::binary(BinaryOp::Add, a.clone(), b);
    let inf = Expr::binary(BinaryOp::Div, a, sum.clone());
    let tau = Expr::binary(BinaryOp::Div, Expr::Number(1.0), sum);

    Ok(KineticsPair {
        inf: render_checked(&inf, &composed.inf),
        tau: render_checked(&tau, &composed.tau),
    })
}

/// Simplify a single symbolic-dialect expression
pub fn simplify_expression(input: &str) -> Result<String> {
    Ok(simplify(&parse_symbolic(input)?).to_string())
}

/// Sample alpha, beta, inf and tau over one sweep
pub fn sample_kinetics(alpha: &str, beta: &str, sweep: &SweepParams) -> Result<KineticsSamples> {
    let grid = sweep.grid()?;
    let pair = compose(alpha, beta);

    let curve = |text: &str| -> Result<Array1<f64>> {
        let parsed = Expr::parse(&normalize_for_numeric(text), Dialect::Numeric)?;
        evaluate_grid(&parsed, &sweep.variable, &grid)
    };
    let alpha_values = curve(alpha)?;
    let beta_values = curve(beta)?;
    let inf = curve(&pair.inf)?;
    let tau = curve(&pair.tau)?;

    Ok(KineticsSamples {
        voltages: grid,
        alpha: alpha_values,
        beta: beta_values,
        inf,
        tau,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use neuroeq_core::presets;

    const VOLTAGES: [f64; 6] = [-80.0, -60.0, -30.0, 0.0, 20.0, 40.0];

    fn eval(expr: &str, v: f64) -> f64 {
        Expr::parse(expr, Dialect::Symbolic)
            .unwrap()
            .eval_at("v", v)
            .unwrap()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
    }

    fn gate_pairs() -> Vec<(String, String)> {
        let mut pairs = vec![(presets::DEFAULT_ALPHA.to_string(), presets::DEFAULT_BETA.to_string())];
        for gate in presets::all() {
            pairs.push((gate.alpha_expression(), gate.beta_expression()));
        }
        pairs
    }

    #[test]
    fn test_identity_round_trip() {
        for (alpha, beta) in gate_pairs() {
            let pair = derive_inf_tau(&alpha, &beta, false).unwrap();
            for v in VOLTAGES {
                let a = eval(&alpha, v);
                let b = eval(&beta, v);
                assert!(close(eval(&pair.inf, v), a / (a + b)));
                assert!(close(eval(&pair.tau, v), 1.0 / (a + b)));
            }
        }
    }

    #[test]
    fn test_simplify_preserves_values() {
        for (alpha, beta) in gate_pairs() {
            let plain = derive_inf_tau(&alpha, &beta, false).unwrap();
            let simple = derive_inf_tau(&alpha, &beta, true).unwrap();
            for v in VOLTAGES {
                assert!(close(eval(&simple.inf, v), eval(&plain.inf, v)), "inf {} at {}", simple.inf, v);
                assert!(close(eval(&simple.tau, v), eval(&plain.tau, v)), "tau {} at {}", simple.tau, v);
            }
        }
    }

    #[test]
    fn test_default_gate_at_singularity() {
        let pair = derive_inf_tau(presets::DEFAULT_ALPHA, presets::DEFAULT_BETA, true).unwrap();
        let inf = eval(&pair.inf, -45.0);
        let tau = eval(&pair.tau, -45.0);
        assert!((inf - 0.5).abs() < 0.01);
        assert!(tau.is_finite() && tau > 0.0);
    }

    #[test]
    fn test_simplifier_rules() {
        assert_eq!(simplify_expression("2*v + 3*v").unwrap(), "5*v");
        assert_eq!(simplify_expression("v - v").unwrap(), "0");
        assert_eq!(simplify_expression("v*v^-1").unwrap(), "1");
        assert_eq!(simplify_expression("2*(v+1)").unwrap(), "2*v + 2");
        assert_eq!(simplify_expression("0.28*(v+27)").unwrap(), "0.28*v + 7.56");
        assert_eq!(simplify_expression("exp(log(v))").unwrap(), "v");
        assert_eq!(simplify_expression("exp(v)*exp(2*v)").unwrap(), "exp(3*v)");
        assert_eq!(simplify_expression("-(v+45)/10").unwrap(), "-0.1*v - 4.5");
        assert_eq!(simplify_expression("1/(v+1) + 1/(v+1)").unwrap(), "2/(v + 1)");
        assert_eq!(simplify_expression("v**2*v").unwrap(), "v**3");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0.28 * 27.0), "7.56");
        assert_eq!(format_number(0.1 * 30.0), "3");
        assert_eq!(format_number(0.1 + 0.2), "0.3");
        assert_eq!(format_number(-4.5), "-4.5");
        assert_eq!(format_number(1.0 / 3.0), "0.3333333333333333");
        assert_eq!(format_number(2.5e-7), "2.5e-7");
    }

    #[test]
    fn test_together_wins_when_shorter() {
        assert_eq!(simplify_expression("1/(v+1) + v/(v+1)").unwrap(), "1");
    }

    #[test]
    fn test_symbolic_parse_error() {
        let err = derive_inf_tau("f64::exp(v)", "1", true).unwrap_err();
        assert!(matches!(
            err,
            NeuroEqError::SymbolicParse { ref expression, .. } if expression == "f64::exp(v)"
        ));

        // Unsimplified conversion never parses
        let pair = derive_inf_tau("f64::exp(v)", "1", false).unwrap();
        assert_eq!(pair.tau, "1/((f64::exp(v)) + (1))");
    }

    #[test]
    fn test_sample_kinetics() {
        let sweep = SweepParams {
            samples: 151,
            ..SweepParams::default()
        };
        let curves = sample_kinetics(presets::DEFAULT_ALPHA, presets::DEFAULT_BETA, &sweep).unwrap();
        assert_eq!(curves.voltages.len(), 151);
        for i in 0..151 {
            let (a, b) = (curves.alpha[i], curves.beta[i]);
            assert!(curves.inf[i] > 0.0 && curves.inf[i] < 1.0);
            assert!(curves.tau[i] > 0.0);
            assert!(close(curves.inf[i], a / (a + b)));
        }
    }
}
