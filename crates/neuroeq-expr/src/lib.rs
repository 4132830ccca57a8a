//! # NeuroEQ Expressions
//!
//! Parsing and evaluation of user-typed gating expressions such as
//! `((v+45)/10)/(1-exp(-(v+45)/10))`.
//!
//! ## Components
//!
//! 1. **Normalizer**: token-level rewrite between the bare spelling used by
//!    the symbolic side (`exp`, `pi`) and the qualified spelling used by the
//!    numeric side (`f64::exp`, `f64::PI`)
//! 2. **Grammar**: pest grammar folded into an [`Expr`] tree by a Pratt parser
//! 3. **Evaluator**: closed operator/function set, explicit error taxonomy,
//!    removable 0/0 singularities resolved by a symmetric limit
//! 4. **Sampler**: evaluates an expression over a voltage grid
//! 5. **Geometry**: distance formulas over three 3-D points
//!
//! Strings are never executed; anything outside the grammar is a
//! [`ExpressionError`].

use ndarray::Array1;
use neuroeq_core::{ExpressionError, Result, SampleSet, SweepParams, Voltage};
use pest::error::InputLocation;
use pest::iterators::{Pair, Pairs};
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use pest_derive::Parser;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

/// Namespace the numeric dialect qualifies functions with
pub const NUMERIC_NAMESPACE: &str = "f64";

/// Bare spelling of pi
pub const PI_NAME: &str = "pi";

/// Qualified spelling of pi
pub const NUMERIC_PI: &str = "f64::PI";

/// Relative half-width of the window used to resolve 0/0
const LIMIT_STEP: f64 = 1e-6;

/// Relative gap allowed between one-sided values of a removable 0/0
const LIMIT_AGREEMENT: f64 = 1e-3;

/// Second, wider step used to tell a finite limit from an even pole
const LIMIT_WIDEN: f64 = 10.0;

// =============================================================================
// FUNCTIONS
// =============================================================================

/// Functions available in expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Function {
    Exp,
    Log,
    Sqrt,
    Sin,
    Cos,
    Tan,
}

impl Function {
    pub fn all() -> &'static [Self] {
        &[
            Self::Exp,
            Self::Log,
            Self::Sqrt,
            Self::Sin,
            Self::Cos,
            Self::Tan,
        ]
    }

    /// Bare name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Exp => "exp",
            Self::Log => "log",
            Self::Sqrt => "sqrt",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|f| f.name() == name)
    }

    /// Evaluate at `x`
    pub fn apply(&self, x: f64) -> std::result::Result<f64, ExpressionError> {
        match self {
            Self::Exp => Ok(x.exp()),
            Self::Log => {
                if x <= 0.0 {
                    Err(ExpressionError::Domain(format!("log of {}", x)))
                } else {
                    Ok(x.ln())
                }
            }
            Self::Sqrt => {
                if x < 0.0 {
                    Err(ExpressionError::Domain(format!("sqrt of {}", x)))
                } else {
                    Ok(x.sqrt())
                }
            }
            Self::Sin => Ok(x.sin()),
            Self::Cos => Ok(x.cos()),
            Self::Tan => Ok(x.tan()),
        }
    }
}

// =============================================================================
// NORMALIZER
// =============================================================================

/// Qualify every function name and `pi` for the numeric dialect.
///
/// Pure token rewrite: operators, literals, parentheses and variables pass
/// through untouched, and nothing is validated. Already qualified names are
/// left alone, so the rewrite is idempotent.
pub fn normalize_for_numeric(expr: &str) -> String {
    rewrite_names(expr, |name| {
        if name == PI_NAME {
            Some(NUMERIC_PI.to_string())
        } else {
            Function::from_name(name).map(|f| format!("{}::{}", NUMERIC_NAMESPACE, f.name()))
        }
    })
}

/// Strip numeric qualification so the symbolic dialect can read the string
pub fn normalize_for_symbolic(expr: &str) -> String {
    rewrite_names(expr, |name| {
        if name == NUMERIC_PI {
            return Some(PI_NAME.to_string());
        }
        name.strip_prefix(NUMERIC_NAMESPACE)
            .and_then(|rest| rest.strip_prefix("::"))
            .and_then(Function::from_name)
            .map(|f| f.name().to_string())
    })
}

fn rewrite_names<F>(expr: &str, rename: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let bytes = expr.as_bytes();
    let mut out = String::with_capacity(expr.len() + 16);
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_alphabetic() || c == b'_' {
            let start = i;
            i = scan_name(bytes, i);
            let token = &expr[start..i];
            match rename(token) {
                Some(renamed) => out.push_str(&renamed),
                None => out.push_str(token),
            }
        } else if c.is_ascii_digit() || c == b'.' {
            // Keeps the `e` of `1e-3` from reading as a name
            let start = i;
            i = scan_number(bytes, i);
            out.push_str(&expr[start..i]);
        } else {
            match expr[i..].chars().next() {
                Some(ch) => {
                    out.push(ch);
                    i += ch.len_utf8();
                }
                None => break,
            }
        }
    }

    out
}

fn is_name_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn scan_ident(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    i
}

/// `ident` or `ident::ident::...`
fn scan_name(bytes: &[u8], start: usize) -> usize {
    let mut end = scan_ident(bytes, start);
    while end + 2 < bytes.len()
        && bytes[end] == b':'
        && bytes[end + 1] == b':'
        && is_name_start(bytes[end + 2])
    {
        end = scan_ident(bytes, end + 2);
    }
    end
}

fn scan_number(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
        i += 1;
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            i = j;
        }
    }
    i
}

// =============================================================================
// GRAMMAR
// =============================================================================

/// Infix arithmetic over one or more variables
#[derive(Parser)]
#[grammar_inline = r#"
WHITESPACE = _{ " " | "\t" | "\r" | "\n" }

number = @{
    (ASCII_DIGIT+ ~ ("." ~ ASCII_DIGIT*)? | "." ~ ASCII_DIGIT+)
    ~ (^"e" ~ ("+" | "-")? ~ ASCII_DIGIT+)?
}
name = @{
    (ASCII_ALPHA | "_") ~ (ASCII_ALPHANUMERIC | "_")*
    ~ ("::" ~ (ASCII_ALPHA | "_") ~ (ASCII_ALPHANUMERIC | "_")*)*
}

// Operators
add = { "+" }
sub = { "-" }
mul = { "*" }
div = { "/" }
pow = { "**" | "^" }
neg = { "-" }
pos = { "+" }

infix = _{ add | sub | pow | mul | div }
prefix = _{ neg | pos }

call = { name ~ "(" ~ expr ~ ("," ~ expr)* ~ ")" }
primary = _{ call | number | name | "(" ~ expr ~ ")" }

expr = { prefix* ~ primary ~ (infix ~ prefix* ~ primary)* }
formula = _{ SOI ~ expr ~ EOI }
"#]
pub struct ExpressionParser;

/// Which spelling of function names a parse accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dialect {
    /// `f64::exp(v)`, `f64::PI`: output of [`normalize_for_numeric`]
    Numeric,
    /// `exp(v)`, `pi`: what users type and the simplifier reads
    Symbolic,
}

impl Dialect {
    fn function(&self, name: &str) -> Option<Function> {
        match self {
            Self::Numeric => name
                .strip_prefix(NUMERIC_NAMESPACE)
                .and_then(|rest| rest.strip_prefix("::"))
                .and_then(Function::from_name),
            Self::Symbolic => Function::from_name(name),
        }
    }

    fn is_pi(&self, name: &str) -> bool {
        match self {
            Self::Numeric => name == NUMERIC_PI,
            Self::Symbolic => name == PI_NAME,
        }
    }
}

/// Names that can never be variables, in either dialect
fn is_reserved(name: &str) -> bool {
    name.contains("::") || name == PI_NAME || Function::from_name(name).is_some()
}

fn pratt() -> &'static PrattParser<Rule> {
    static PRATT: OnceLock<PrattParser<Rule>> = OnceLock::new();
    PRATT.get_or_init(|| {
        PrattParser::new()
            .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
            .op(Op::infix(Rule::mul, Assoc::Left) | Op::infix(Rule::div, Assoc::Left))
            .op(Op::prefix(Rule::neg) | Op::prefix(Rule::pos))
            .op(Op::infix(Rule::pow, Assoc::Right))
    })
}

fn syntax_error(err: pest::error::Error<Rule>) -> ExpressionError {
    let offset = match err.location {
        InputLocation::Pos(p) => p,
        InputLocation::Span((start, _)) => start,
    };
    ExpressionError::Syntax {
        offset,
        message: err.variant.message().into_owned(),
    }
}

// =============================================================================
// AST
// =============================================================================

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    pub fn apply(&self, l: f64, r: f64) -> std::result::Result<f64, ExpressionError> {
        match self {
            Self::Add => Ok(l + r),
            Self::Sub => Ok(l - r),
            Self::Mul => Ok(l * r),
            Self::Div => {
                if r == 0.0 {
                    if l == 0.0 {
                        Err(ExpressionError::Indeterminate)
                    } else {
                        Err(ExpressionError::DivisionByZero)
                    }
                } else {
                    Ok(l / r)
                }
            }
            Self::Pow => {
                if l == 0.0 && r < 0.0 {
                    Err(ExpressionError::DivisionByZero)
                } else if l < 0.0 && r.fract() != 0.0 {
                    Err(ExpressionError::Domain(format!(
                        "{} raised to non-integer power {}",
                        l, r
                    )))
                } else {
                    Ok(l.powf(r))
                }
            }
        }
    }
}

/// Parsed expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Pi,
    Variable(String),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        function: Function,
        arg: Box<Expr>,
    },
}

/// Variable values for one evaluation
#[derive(Debug, Clone, Default)]
pub struct Scope {
    values: HashMap<String, f64>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style binding
    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

impl Expr {
    /// Parse `input` in the given dialect
    pub fn parse(input: &str, dialect: Dialect) -> std::result::Result<Self, ExpressionError> {
        let mut pairs = ExpressionParser::parse(Rule::formula, input).map_err(syntax_error)?;
        match pairs.next() {
            Some(expr) => build(expr.into_inner(), dialect),
            None => Err(ExpressionError::Syntax {
                offset: 0,
                message: "empty expression".into(),
            }),
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Free variables, sorted
    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Variable(name) => {
                out.insert(name.clone());
            }
            Self::Neg(inner) => inner.collect_variables(out),
            Self::Binary { left, right, .. } => {
                left.collect_variables(out);
                right.collect_variables(out);
            }
            Self::Call { arg, .. } => arg.collect_variables(out),
            Self::Number(_) | Self::Pi => {}
        }
    }

    /// Evaluate with the given bindings. A 0/0 anywhere is reported as
    /// [`ExpressionError::Indeterminate`].
    pub fn eval(&self, scope: &Scope) -> std::result::Result<f64, ExpressionError> {
        match self {
            Self::Number(x) => Ok(*x),
            Self::Pi => Ok(std::f64::consts::PI),
            Self::Variable(name) => scope
                .get(name)
                .ok_or_else(|| ExpressionError::UnknownName(name.clone())),
            Self::Neg(inner) => Ok(-inner.eval(scope)?),
            Self::Binary { op, left, right } => op.apply(left.eval(scope)?, right.eval(scope)?),
            Self::Call { function, arg } => function.apply(arg.eval(scope)?),
        }
    }

    /// Evaluate as a function of one variable.
    ///
    /// A removable 0/0 at `value` is replaced by the mean of the two
    /// neighbouring values `value ± h`, `h = 1e-6·max(1, |value|)`.
    /// The two sides must agree, and must still agree with a step ten
    /// times wider, otherwise the point is a pole and `DivisionByZero`.
    /// The result must be finite.
    pub fn eval_at(&self, var: &str, value: f64) -> std::result::Result<f64, ExpressionError> {
        let mut scope = Scope::new().with(var, value);
        let result = match self.eval(&scope) {
            Err(ExpressionError::Indeterminate) => self.limit_at(&mut scope, var, value)?,
            other => other?,
        };

        if result.is_finite() {
            Ok(result)
        } else {
            Err(ExpressionError::NonFinite)
        }
    }

    fn limit_at(
        &self,
        scope: &mut Scope,
        var: &str,
        value: f64,
    ) -> std::result::Result<f64, ExpressionError> {
        let h = LIMIT_STEP * value.abs().max(1.0);
        let near = self.two_sided(scope, var, value, h)?;
        let wide = self.two_sided(scope, var, value, LIMIT_WIDEN * h)?;

        // A pole grows as the step shrinks
        if agree(near, wide) {
            Ok(near)
        } else {
            Err(ExpressionError::DivisionByZero)
        }
    }

    fn two_sided(
        &self,
        scope: &mut Scope,
        var: &str,
        value: f64,
        h: f64,
    ) -> std::result::Result<f64, ExpressionError> {
        scope.set(var, value - h);
        let below = self.eval(scope);
        scope.set(var, value + h);
        let above = self.eval(scope);

        match (below, above) {
            (Ok(a), Ok(b)) if a.is_finite() && b.is_finite() => {
                if agree(a, b) {
                    Ok(0.5 * (a + b))
                } else {
                    Err(ExpressionError::DivisionByZero)
                }
            }
            _ => Err(ExpressionError::Indeterminate),
        }
    }
}

fn agree(a: f64, b: f64) -> bool {
    (a - b).abs() <= LIMIT_AGREEMENT * a.abs().max(b.abs()).max(1.0)
}

fn build(pairs: Pairs<Rule>, dialect: Dialect) -> std::result::Result<Expr, ExpressionError> {
    pratt()
        .map_primary(|primary| build_primary(primary, dialect))
        .map_prefix(|op, rhs| {
            let rhs = rhs?;
            match op.as_rule() {
                Rule::neg => Ok(Expr::Neg(Box::new(rhs))),
                Rule::pos => Ok(rhs),
                rule => unreachable!("unexpected prefix {:?}", rule),
            }
        })
        .map_infix(|lhs, op, rhs| {
            let op = match op.as_rule() {
                Rule::add => BinaryOp::Add,
                Rule::sub => BinaryOp::Sub,
                Rule::mul => BinaryOp::Mul,
                Rule::div => BinaryOp::Div,
                Rule::pow => BinaryOp::Pow,
                rule => unreachable!("unexpected infix {:?}", rule),
            };
            Ok(Expr::binary(op, lhs?, rhs?))
        })
        .parse(pairs)
}

fn build_primary(pair: Pair<Rule>, dialect: Dialect) -> std::result::Result<Expr, ExpressionError> {
    match pair.as_rule() {
        Rule::number => {
            let offset = pair.as_span().start();
            pair.as_str()
                .parse::<f64>()
                .map(Expr::Number)
                .map_err(|e| ExpressionError::Syntax {
                    offset,
                    message: e.to_string(),
                })
        }
        Rule::name => {
            let name = pair.as_str();
            if dialect.is_pi(name) {
                Ok(Expr::Pi)
            } else if is_reserved(name) {
                Err(ExpressionError::UnknownName(name.to_string()))
            } else {
                Ok(Expr::Variable(name.to_string()))
            }
        }
        Rule::call => {
            let mut inner = pair.into_inner();
            let name = match inner.next() {
                Some(name) => name.as_str().to_string(),
                None => unreachable!("call without a name"),
            };
            let function = dialect
                .function(&name)
                .ok_or_else(|| ExpressionError::UnknownName(name.clone()))?;

            let mut args = inner
                .map(|arg| build(arg.into_inner(), dialect))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            if args.len() != 1 {
                return Err(ExpressionError::Arity {
                    name,
                    expected: 1,
                    got: args.len(),
                });
            }
            Ok(Expr::Call {
                function,
                arg: Box::new(args.remove(0)),
            })
        }
        Rule::expr => build(pair.into_inner(), dialect),
        rule => unreachable!("unexpected primary {:?}", rule),
    }
}

// =============================================================================
// SAMPLER
// =============================================================================

/// Sample `expr` over `n` evenly spaced voltages on `[v_min, v_max]`.
///
/// The expression is normalized, parsed once, and evaluated at every grid
/// point. Any failing point fails the whole call.
pub fn sample(expr: &str, v_min: Voltage, v_max: Voltage, n: usize) -> Result<SampleSet> {
    let sweep = SweepParams {
        v_min,
        v_max,
        samples: n,
        ..SweepParams::default()
    };
    sample_sweep(expr, &sweep)
}

/// Sample `expr` over the grid and variable described by `sweep`
pub fn sample_sweep(expr: &str, sweep: &SweepParams) -> Result<SampleSet> {
    let grid = sweep.grid()?;
    let parsed = Expr::parse(&normalize_for_numeric(expr), Dialect::Numeric)?;
    let values = evaluate_grid(&parsed, &sweep.variable, &grid)?;
    SampleSet::new(grid, values)
}

/// Evaluate an already parsed expression at every voltage in `grid`
pub fn evaluate_grid(expr: &Expr, var: &str, grid: &Array1<Voltage>) -> Result<Array1<f64>> {
    if let Some(unknown) = expr.variables().into_iter().find(|name| name != var) {
        return Err(ExpressionError::UnknownName(unknown).into());
    }

    let mut values = Array1::zeros(grid.len());
    for (slot, &v) in values.iter_mut().zip(grid.iter()) {
        *slot = expr.eval_at(var, v).map_err(|e| ExpressionError::AtVoltage {
            voltage: v,
            source: Box::new(e),
        })?;
    }

    log::debug!("evaluated {} points of {}", grid.len(), var);
    Ok(values)
}

// =============================================================================
// GEOMETRY
// =============================================================================

/// Distance formulas over three points
pub mod geometry {
    use super::*;
    use nalgebra::Point3;

    /// Variable names bound for each of the three points
    pub const POINT_VARIABLES: [[&str; 3]; 3] = [
        ["x1", "y1", "z1"],
        ["x2", "y2", "z2"],
        ["x3", "y3", "z3"],
    ];

    /// Euclidean distance between two points
    pub fn point_distance(a: &Point3<f64>, b: &Point3<f64>) -> f64 {
        nalgebra::distance(a, b)
    }

    /// Evaluate a user formula over `x1 y1 z1 .. x3 y3 z3`.
    ///
    /// An empty formula falls back to the distance from point 1 to point 2.
    pub fn distance(formula: &str, points: &[Point3<f64>; 3]) -> Result<f64> {
        if formula.trim().is_empty() {
            return Ok(point_distance(&points[0], &points[1]));
        }

        let parsed = Expr::parse(&normalize_for_numeric(formula), Dialect::Numeric)?;
        let mut scope = Scope::new();
        for (names, point) in POINT_VARIABLES.iter().zip(points) {
            for (name, coord) in names.iter().zip(point.coords.iter()) {
                scope.set(name, *coord);
            }
        }

        let value = parsed.eval(&scope)?;
        if !value.is_finite() {
            return Err(ExpressionError::NonFinite.into());
        }
        Ok(value)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;
    use neuroeq_core::{presets, NeuroEqError};

    fn eval_symbolic(input: &str, v: f64) -> std::result::Result<f64, ExpressionError> {
        Expr::parse(input, Dialect::Symbolic)?.eval_at("v", v)
    }

    #[test]
    fn test_normalize_for_numeric() {
        assert_eq!(
            normalize_for_numeric("4*exp(-(v+70)/18)"),
            "4*f64::exp(-(v+70)/18)"
        );
        assert_eq!(normalize_for_numeric("sin(pi*v)"), "f64::sin(f64::PI*v)");
        // Names that merely start with a function name are untouched
        assert_eq!(normalize_for_numeric("expo + v"), "expo + v");
        // So is the exponent marker of a literal
        assert_eq!(normalize_for_numeric("1e-3*exp(v)"), "1e-3*f64::exp(v)");
    }

    #[test]
    fn test_normalize_idempotent() {
        let once = normalize_for_numeric(presets::DEFAULT_ALPHA);
        assert_eq!(normalize_for_numeric(&once), once);
        assert_eq!(normalize_for_symbolic(&once), presets::DEFAULT_ALPHA);
    }

    #[test]
    fn test_normalize_preserves_values() {
        for input in [presets::DEFAULT_ALPHA, presets::DEFAULT_BETA, "cos(v/10)+tan(pi/8)"] {
            let numeric = Expr::parse(&normalize_for_numeric(input), Dialect::Numeric).unwrap();
            let symbolic = Expr::parse(input, Dialect::Symbolic).unwrap();
            for v in [-80.0, -30.0, 12.5] {
                assert_eq!(numeric.eval_at("v", v).unwrap(), symbolic.eval_at("v", v).unwrap());
            }
        }
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval_symbolic("-v^2", 3.0).unwrap(), -9.0);
        assert_eq!(eval_symbolic("-v**2", 3.0).unwrap(), -9.0);
        assert_eq!(eval_symbolic("2**-1", 0.0).unwrap(), 0.5);
        assert_eq!(eval_symbolic("2^3^2", 0.0).unwrap(), 512.0);
        assert_eq!(eval_symbolic("1 - 2 - 3", 0.0).unwrap(), -4.0);
        assert_eq!(eval_symbolic("12/2/3", 0.0).unwrap(), 2.0);
        assert_eq!(eval_symbolic("v+-45.0", 45.0).unwrap(), 0.0);
        assert_eq!(eval_symbolic("1.5e2 + .5", 0.0).unwrap(), 150.5);
    }

    #[test]
    fn test_dialects_are_exclusive() {
        assert_eq!(
            Expr::parse("f64::exp(v)", Dialect::Symbolic),
            Err(ExpressionError::UnknownName("f64::exp".into()))
        );
        assert_eq!(
            Expr::parse("exp(v)", Dialect::Numeric),
            Err(ExpressionError::UnknownName("exp".into()))
        );
        assert_eq!(
            Expr::parse("pi*v", Dialect::Numeric),
            Err(ExpressionError::UnknownName("pi".into()))
        );
        assert_eq!(Expr::parse("pi", Dialect::Symbolic), Ok(Expr::Pi));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Expr::parse("2*", Dialect::Symbolic),
            Err(ExpressionError::Syntax { .. })
        ));
        assert!(matches!(
            Expr::parse("", Dialect::Symbolic),
            Err(ExpressionError::Syntax { .. })
        ));
        assert!(matches!(
            Expr::parse("2v", Dialect::Symbolic),
            Err(ExpressionError::Syntax { .. })
        ));
        assert_eq!(
            Expr::parse("exp(1, 2)", Dialect::Symbolic),
            Err(ExpressionError::Arity {
                name: "exp".into(),
                expected: 1,
                got: 2
            })
        );
        assert_eq!(
            Expr::parse("cosh(v)", Dialect::Symbolic),
            Err(ExpressionError::UnknownName("cosh".into()))
        );
    }

    #[test]
    fn test_evaluation_errors() {
        assert_eq!(eval_symbolic("1/v", 0.0), Err(ExpressionError::DivisionByZero));
        assert_eq!(eval_symbolic("v^-1", 0.0), Err(ExpressionError::DivisionByZero));
        assert!(matches!(eval_symbolic("log(v)", -1.0), Err(ExpressionError::Domain(_))));
        assert!(matches!(eval_symbolic("sqrt(v)", -4.0), Err(ExpressionError::Domain(_))));
        assert_eq!(eval_symbolic("exp(v)", 1000.0), Err(ExpressionError::NonFinite));
        assert_eq!(
            Expr::parse("w+1", Dialect::Symbolic).unwrap().eval_at("v", 0.0),
            Err(ExpressionError::UnknownName("w".into()))
        );
    }

    #[test]
    fn test_removable_singularity() {
        // alpha_m of the default equations is 0/0 at -45 mV, the limit is 1
        let alpha = eval_symbolic(presets::DEFAULT_ALPHA, -45.0).unwrap();
        assert!((alpha - 1.0).abs() < 1e-6);

        // A genuine 0/0 with no finite neighbourhood stays an error
        assert_eq!(eval_symbolic("0/(v-v)", 2.0), Err(ExpressionError::Indeterminate));
    }

    #[test]
    fn test_pole_is_not_a_limit() {
        // Odd poles: the two sides have opposite signs
        assert_eq!(eval_symbolic("v/(v*v)", 0.0), Err(ExpressionError::DivisionByZero));
        match sample("v/(v*v)", -1.0, 1.0, 3).unwrap_err() {
            NeuroEqError::Expression(ExpressionError::AtVoltage { voltage, source }) => {
                assert_eq!(voltage, 0.0);
                assert_eq!(*source, ExpressionError::DivisionByZero);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(sample("(v+45)/((v+45)^2)", -46.0, -44.0, 3).is_err());

        // Even pole: the sides agree but blow up as the step shrinks
        assert_eq!(eval_symbolic("v^2/v^4", 0.0), Err(ExpressionError::DivisionByZero));

        // A removable point away from zero still resolves
        let value = eval_symbolic("(v*v-4)/(v-2)", 2.0).unwrap();
        assert!((value - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_sample_grid() {
        let samples = sample("v", -100.0, 50.0, 2000).unwrap();
        assert_eq!(samples.len(), 2000);
        assert_eq!(samples.voltages[0], -100.0);
        assert_eq!(samples.voltages[1999], 50.0);
        assert!(samples.voltages.windows(2).into_iter().all(|w| w[1] > w[0]));
        assert_eq!(samples.values, samples.voltages);
    }

    #[test]
    fn test_sample_division_by_zero() {
        let err = sample("1/(v)", -1.0, 1.0, 3).unwrap_err();
        match err {
            NeuroEqError::Expression(ExpressionError::AtVoltage { voltage, source }) => {
                assert_eq!(voltage, 0.0);
                assert_eq!(*source, ExpressionError::DivisionByZero);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_sample_rejects_unknown_variable() {
        assert!(matches!(
            sample("v + w", -1.0, 1.0, 3),
            Err(NeuroEqError::Expression(ExpressionError::UnknownName(name))) if name == "w"
        ));
        assert!(matches!(
            sample("v", -1.0, 1.0, 1),
            Err(NeuroEqError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_sample_custom_variable() {
        let sweep = SweepParams {
            v_min: 0.0,
            v_max: 1.0,
            samples: 11,
            variable: "vm".into(),
        };
        let samples = sample_sweep("2*vm", &sweep).unwrap();
        assert!((samples.values[10] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_sample_is_deterministic() {
        let a = sample(presets::DEFAULT_BETA, -100.0, 50.0, 500).unwrap();
        let b = sample(presets::DEFAULT_BETA, -100.0, 50.0, 500).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_preset_expressions_match_rates() {
        for gate in presets::all() {
            let alpha = Expr::parse(&gate.alpha_expression(), Dialect::Symbolic).unwrap();
            let beta = Expr::parse(&gate.beta_expression(), Dialect::Symbolic).unwrap();
            for v in [-90.0, -65.0, -20.0, 10.0] {
                let a = alpha.eval_at("v", v).unwrap();
                let b = beta.eval_at("v", v).unwrap();
                assert!((a - gate.alpha.eval(v)).abs() < 1e-9 * a.abs().max(1.0));
                assert!((b - gate.beta.eval(v)).abs() < 1e-9 * b.abs().max(1.0));
            }
        }
    }

    #[test]
    fn test_distance_formula() {
        let points = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(3.0, 4.0, 0.0),
            Point3::new(1.0, 1.0, 1.0),
        ];

        assert_eq!(geometry::distance("", &points).unwrap(), 5.0);

        let formula = "sqrt((x2-x1)^2 + (y2-y1)^2 + (z2-z1)^2)";
        assert!((geometry::distance(formula, &points).unwrap() - 5.0).abs() < 1e-12);

        let trig = geometry::distance("sin(pi/2)*x3 + cos(0)*z3", &points).unwrap();
        assert!((trig - 2.0).abs() < 1e-12);

        assert!(geometry::distance("x4", &points).is_err());
    }
}
