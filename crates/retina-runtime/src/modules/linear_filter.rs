//! Temporal linear filters
//!
//! A Gamma kernel of order `n` is realised as a cascade of `n` first-order
//! low-pass stages, each with time constant `tau / n`. Each stage decays by
//! `exp(-dt / tau_stage)` per step, which stays stable for any `dt / tau`.

use super::{Module, ModuleParams, PortInputs};
use crate::{error::*, grid::{Grid, GridShape}};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Temporal kernel shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelShape {
    /// Cascade of `n` exponential stages
    Gamma,
    /// Single exponential stage
    Exponential,
}

/// Parameters for [`LinearFilter`]
#[derive(Debug, Clone, PartialEq)]
pub struct LinearFilterParams {
    /// Time constant of the whole kernel (ms)
    pub tau_ms: f64,
    /// Cascade order; 0 behaves as a single stage
    pub order: usize,
    /// Kernel shape
    pub kernel: KernelShape,
}

impl Default for LinearFilterParams {
    fn default() -> Self {
        Self {
            tau_ms: 10.0,
            order: 0,
            kernel: KernelShape::Gamma,
        }
    }
}

impl LinearFilterParams {
    /// Create Gamma-kernel parameters with validation
    pub fn new(tau_ms: f64, order: usize) -> Result<Self> {
        if !(tau_ms > 0.0) || !tau_ms.is_finite() {
            return Err(RuntimeError::invalid_parameter(
                "tau",
                tau_ms.to_string(),
                "> 0.0",
            ));
        }
        Ok(Self {
            tau_ms,
            order,
            kernel: KernelShape::Gamma,
        })
    }

    /// Select the kernel shape
    pub fn with_kernel(mut self, kernel: KernelShape) -> Self {
        self.kernel = kernel;
        self
    }

    /// Read `tau`, `n` and `type` from a parameter map
    pub fn from_params(params: &ModuleParams) -> Result<Self> {
        params.ensure_known("LinearFilter", &["tau", "n", "type"])?;
        let kernel = match params.text("type")? {
            None | Some("Gamma") => KernelShape::Gamma,
            Some("Exp") => KernelShape::Exponential,
            Some(other) => {
                return Err(RuntimeError::invalid_parameter(
                    "type",
                    other,
                    "'Gamma' or 'Exp'",
                ))
            }
        };
        let tau = params.number("tau")?.ok_or_else(|| {
            RuntimeError::invalid_parameter("tau", "missing", "> 0.0")
        })?;
        Ok(Self::new(tau, params.count_or("n", 0)?)?.with_kernel(kernel))
    }

    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        Self::new(self.tau_ms, self.order)?;
        Ok(())
    }

    /// Number of cascade stages
    pub fn stages(&self) -> usize {
        match self.kernel {
            KernelShape::Gamma => self.order.max(1),
            KernelShape::Exponential => 1,
        }
    }

    /// Time constant of one stage (ms)
    pub fn stage_tau_ms(&self) -> f64 {
        match self.kernel {
            KernelShape::Gamma if self.order > 0 => self.tau_ms / self.order as f64,
            _ => self.tau_ms,
        }
    }
}

/// Cascade of first-order low-pass stages
#[derive(Debug, Clone)]
pub struct LinearFilter {
    params: LinearFilterParams,
    /// Pixel-major stage values: `stages` consecutive entries per pixel
    state: Vec<f64>,
    output: Grid,
}

impl LinearFilter {
    /// Create a filter sized for `shape`
    pub fn new(params: LinearFilterParams, shape: &GridShape) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            state: vec![0.0; shape.len() * params.stages()],
            output: Grid::for_shape(shape),
            params,
        })
    }

    /// Filter parameters
    pub fn params(&self) -> &LinearFilterParams {
        &self.params
    }
}

impl Module for LinearFilter {
    fn type_tag(&self) -> &'static str {
        "LinearFilter"
    }

    fn reset(&mut self) {
        self.state.iter_mut().for_each(|s| *s = 0.0);
        self.output.fill(0.0);
    }

    fn step(&mut self, dt_ms: f64, inputs: &PortInputs) -> Result<()> {
        self.output.ensure_same_shape(&inputs.current)?;
        let decay = (-dt_ms / self.params.stage_tau_ms()).exp();
        let gain = 1.0 - decay;
        let stages = self.params.stages();

        let cascade = |(cell, (x, y)): (&mut [f64], (&f64, &mut f64))| {
            let mut drive = *x;
            for s in cell.iter_mut() {
                *s = decay * *s + gain * drive;
                drive = *s;
            }
            *y = drive;
        };

        let input = inputs.current.as_slice();
        let output = self.output.as_mut_slice();

        #[cfg(feature = "parallel")]
        self.state
            .par_chunks_mut(stages)
            .zip(input.par_iter().zip(output.par_iter_mut()))
            .for_each(cascade);

        #[cfg(not(feature = "parallel"))]
        self.state
            .chunks_mut(stages)
            .zip(input.iter().zip(output.iter_mut()))
            .for_each(cascade);

        Ok(())
    }

    fn output(&self) -> &Grid {
        &self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> GridShape {
        GridShape::new(2, 2, 1.0).unwrap()
    }

    #[test]
    fn test_params_validation() {
        assert!(LinearFilterParams::new(0.0, 1).is_err());
        assert!(LinearFilterParams::new(-1.0, 1).is_err());
        assert!(LinearFilterParams::new(5.0, 3).is_ok());
    }

    #[test]
    fn test_stage_layout() {
        let gamma = LinearFilterParams::new(30.0, 3).unwrap();
        assert_eq!(gamma.stages(), 3);
        assert_eq!(gamma.stage_tau_ms(), 10.0);

        let single = LinearFilterParams::new(30.0, 0).unwrap();
        assert_eq!(single.stages(), 1);
        assert_eq!(single.stage_tau_ms(), 30.0);

        let exp = gamma.with_kernel(KernelShape::Exponential);
        assert_eq!(exp.stages(), 1);
        assert_eq!(exp.stage_tau_ms(), 30.0);
    }

    #[test]
    fn test_from_params() {
        let params = ModuleParams::new()
            .with("type", "Gamma")
            .with("tau", 20.0)
            .with("n", 4.0);
        let p = LinearFilterParams::from_params(&params).unwrap();
        assert_eq!(p.order, 4);
        assert_eq!(p.kernel, KernelShape::Gamma);

        let missing_tau = ModuleParams::new().with("n", 1.0);
        assert!(LinearFilterParams::from_params(&missing_tau).is_err());

        let bad_type = ModuleParams::new().with("tau", 1.0).with("type", "Box");
        assert!(LinearFilterParams::from_params(&bad_type).is_err());
    }

    #[test]
    fn test_step_response_matches_exponential() {
        let tau = 10.0;
        let dt = 1.0;
        let mut filter = LinearFilter::new(LinearFilterParams::new(tau, 0).unwrap(), &shape()).unwrap();
        let drive = PortInputs::current(Grid::filled(2, 2, 1.0));

        for k in 1..=50 {
            filter.step(dt, &drive).unwrap();
            let expected = 1.0 - (-(k as f64) * dt / tau).exp();
            let got = filter.output().get(1, 1).unwrap();
            assert!((got - expected).abs() < 1e-12, "step {}: {} vs {}", k, got, expected);
        }
    }

    #[test]
    fn test_gamma_cascade_delays_peak() {
        let mut filter = LinearFilter::new(LinearFilterParams::new(20.0, 4).unwrap(), &shape()).unwrap();
        let pulse = PortInputs::current(Grid::filled(2, 2, 1.0));
        let silence = PortInputs::current(Grid::new(2, 2));

        filter.step(1.0, &pulse).unwrap();
        let first = filter.output().get(0, 0).unwrap();
        let mut peak = (0, first);
        for k in 1..100 {
            filter.step(1.0, &silence).unwrap();
            let v = filter.output().get(0, 0).unwrap();
            if v > peak.1 {
                peak = (k, v);
            }
        }
        // an order-4 cascade peaks well after the impulse
        assert!(peak.0 > 5);
    }

    #[test]
    fn test_large_dt_is_stable() {
        let mut filter = LinearFilter::new(LinearFilterParams::new(1.0, 2).unwrap(), &shape()).unwrap();
        let drive = PortInputs::current(Grid::filled(2, 2, 3.0));
        for _ in 0..10 {
            filter.step(100.0, &drive).unwrap();
            let v = filter.output().get(0, 0).unwrap();
            assert!(v <= 3.0 && v >= 0.0);
        }
    }

    #[test]
    fn test_reset_clears_state() {
        let mut filter = LinearFilter::new(LinearFilterParams::default(), &shape()).unwrap();
        filter.step(1.0, &PortInputs::current(Grid::filled(2, 2, 1.0))).unwrap();
        assert!(filter.output().mean() > 0.0);
        filter.reset();
        assert_eq!(filter.output().mean(), 0.0);
        filter.step(1.0, &PortInputs::current(Grid::new(2, 2))).unwrap();
        assert_eq!(filter.output().mean(), 0.0);
    }
}
