//! # NeuroEQ CLI
//!
//! Command-line interface for gating-kinetics conversion.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use nalgebra::Point3;
use neuroeq_core::{presets, FitParams, SweepParams};
use neuroeq_expr::{geometry, normalize_for_symbolic, sample_sweep};
use neuroeq_fit::{fit_expression, FitResult, SignConvention};
use neuroeq_symbolic::{derive_inf_tau, sample_kinetics};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "neuroeq")]
#[command(author = "Yatrogenesis")]
#[command(version = "0.1.0")]
#[command(about = "Hodgkin-Huxley gating kinetics converter", long_about = None)]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON file with `sweep` and `fit` sections
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert alpha/beta rates to inf/tau
    Convert {
        /// Opening rate alpha(v)
        #[arg(short, long, default_value = presets::DEFAULT_ALPHA)]
        alpha: String,
        /// Closing rate beta(v)
        #[arg(short, long, default_value = presets::DEFAULT_BETA)]
        beta: String,
        /// Keep the composed expressions as they are
        #[arg(long)]
        no_simplify: bool,
        /// Also fit a sigmoid to inf
        #[arg(long)]
        fit: bool,
        #[arg(long)]
        json: bool,
    },

    /// Evaluate an expression over the voltage sweep
    Sample {
        expr: String,
        #[arg(long, allow_hyphen_values = true)]
        v_min: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        v_max: Option<f64>,
        /// Number of points
        #[arg(short = 'n', long)]
        samples: Option<usize>,
        #[arg(long)]
        json: bool,
    },

    /// Sample alpha, beta, inf and tau as CSV
    Curves {
        #[arg(short, long, default_value = presets::DEFAULT_ALPHA)]
        alpha: String,
        #[arg(short, long, default_value = presets::DEFAULT_BETA)]
        beta: String,
    },

    /// Fit 1/(1+exp((v+vhalf)/tau)) to a steady-state expression
    Fit {
        expr: String,
        #[arg(long, value_enum, default_value_t = Convention::Template)]
        convention: Convention,
        #[arg(long)]
        json: bool,
    },

    /// Evaluate a distance formula over three points
    Distance {
        /// Formula over x1 y1 z1 .. x3 y3 z3, empty for |p2 - p1|
        #[arg(default_value = "")]
        formula: String,
        #[arg(long, value_parser = parse_point, default_value = "0,0,0", allow_hyphen_values = true)]
        p1: Point3<f64>,
        #[arg(long, value_parser = parse_point, default_value = "0,0,0", allow_hyphen_values = true)]
        p2: Point3<f64>,
        #[arg(long, value_parser = parse_point, default_value = "0,0,0", allow_hyphen_values = true)]
        p3: Point3<f64>,
    },

    /// List the classic squid-axon gates
    Presets,
}

#[derive(Clone, Copy, ValueEnum)]
enum Convention {
    /// (vhalf, tau) as in the fitted template
    Template,
    /// Half-activation voltage and slope factor
    Slope,
}

impl From<Convention> for SignConvention {
    fn from(c: Convention) -> Self {
        match c {
            Convention::Template => SignConvention::Template,
            Convention::Slope => SignConvention::Slope,
        }
    }
}

/// Settings file, missing sections take defaults
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Config {
    sweep: SweepParams,
    fit: FitParams,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let Some(path) = path else {
        log::debug!("no config file, using defaults");
        return Ok(Config::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: Config =
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
    log::debug!("loaded {}: {:?}", path.display(), config);
    Ok(config)
}

fn parse_point(s: &str) -> Result<Point3<f64>, String> {
    let coords = s
        .split(',')
        .map(|c| c.trim().parse::<f64>().map_err(|e| format!("{}: {}", c.trim(), e)))
        .collect::<Result<Vec<_>, _>>()?;
    match coords.as_slice() {
        [x, y, z] => Ok(Point3::new(*x, *y, *z)),
        _ => Err(format!("expected x,y,z, got `{}`", s)),
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn print_fit(fit: &FitResult, convention: SignConvention) {
    let (a, b) = fit.parameters(convention);
    let (name_a, name_b) = match convention {
        SignConvention::Template => ("vhalf", "tau"),
        SignConvention::Slope => ("v50", "k"),
    };
    println!("{}", "Sigmoid fit:".green().bold());
    println!("  {} = {}", name_a.cyan(), a);
    println!("  {} = {}", name_b.cyan(), b);
    println!("  branch   {:?}", fit.branch);
    println!("  residual {:.3e}", fit.residual_norm);
    println!("  {}", fit.render(convention));
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Convert {
            alpha,
            beta,
            no_simplify,
            fit,
            json,
        } => {
            log::debug!("convert alpha={} beta={} simplify={}", alpha, beta, !no_simplify);
            let alpha = normalize_for_symbolic(&alpha);
            let beta = normalize_for_symbolic(&beta);
            let pair = derive_inf_tau(&alpha, &beta, !no_simplify)?;
            let fitted = if fit {
                Some(fit_expression(&pair.inf, &config.sweep, &config.fit)?)
            } else {
                None
            };

            if json {
                let out = json!({ "inf": pair.inf, "tau": pair.tau, "fit": fitted });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("{} {}", "inf =".green().bold(), pair.inf);
                println!("{} {}", "tau =".green().bold(), pair.tau);
                if let Some(result) = fitted {
                    println!();
                    print_fit(&result, SignConvention::Template);
                }
            }
        }

        Commands::Sample {
            expr,
            v_min,
            v_max,
            samples,
            json,
        } => {
            let mut sweep = config.sweep;
            sweep.v_min = v_min.unwrap_or(sweep.v_min);
            sweep.v_max = v_max.unwrap_or(sweep.v_max);
            sweep.samples = samples.unwrap_or(sweep.samples);

            log::debug!("sample {} over {:?}", expr, sweep);
            let set = sample_sweep(&expr, &sweep)?;
            if json {
                let out = json!({
                    "voltages": set.voltages.to_vec(),
                    "values": set.values.to_vec(),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("{},value", sweep.variable);
                for (v, value) in set.iter() {
                    println!("{:.4},{:.6}", v, value);
                }
            }
        }

        Commands::Curves { alpha, beta } => {
            log::debug!("curves alpha={} beta={}", alpha, beta);
            let curves = sample_kinetics(&alpha, &beta, &config.sweep)?;
            println!("{},alpha,beta,inf,tau", config.sweep.variable);
            for i in 0..curves.voltages.len() {
                println!(
                    "{:.4},{:.6},{:.6},{:.6},{:.6}",
                    curves.voltages[i], curves.alpha[i], curves.beta[i], curves.inf[i], curves.tau[i]
                );
            }
        }

        Commands::Fit {
            expr,
            convention,
            json,
        } => {
            log::debug!("fit {} with {:?}", expr, config.fit);
            let result = fit_expression(&expr, &config.sweep, &config.fit)?;
            let convention = SignConvention::from(convention);
            if json {
                let (a, b) = result.parameters(convention);
                let out = json!({
                    "convention": convention,
                    "parameters": [a, b],
                    "expression": result.render(convention),
                    "fit": result,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                print_fit(&result, convention);
            }
        }

        Commands::Distance { formula, p1, p2, p3 } => {
            log::debug!("distance `{}` over {} {} {}", formula, p1, p2, p3);
            let d = geometry::distance(&formula, &[p1, p2, p3])?;
            println!("{} {}", "distance =".green().bold(), d);
        }

        Commands::Presets => {
            println!("{}", "Hodgkin-Huxley gates (squid axon):".green().bold());
            for gate in presets::all() {
                println!();
                println!("  {} - {}", gate.name.cyan(), gate.description);
                println!("    alpha = {}", gate.alpha_expression());
                println!("    beta  = {}", gate.beta_expression());
                println!(
                    "    at -65 mV: inf = {:.4}, tau = {:.4} ms",
                    gate.inf(-65.0),
                    gate.tau(-65.0)
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_point() {
        assert_eq!(parse_point("1, -2.5, 3").unwrap(), Point3::new(1.0, -2.5, 3.0));
        assert!(parse_point("1,2").is_err());
        assert!(parse_point("1,x,3").is_err());
    }

    #[test]
    fn test_load_config() {
        let defaults = load_config(None).unwrap();
        assert_eq!(defaults.sweep.samples, SweepParams::default().samples);

        let path = std::env::temp_dir().join(format!("neuroeq-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "sweep": { "samples": 50 }, "fit": { "decimals": 3 } }"#).unwrap();
        let config = load_config(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.sweep.samples, 50);
        assert_eq!(config.sweep.v_min, SweepParams::default().v_min);
        assert_eq!(config.fit.decimals, 3);
        assert_eq!(config.fit.max_iterations, FitParams::default().max_iterations);

        assert!(load_config(Some(Path::new("/nonexistent/neuroeq.json"))).is_err());
    }
}
