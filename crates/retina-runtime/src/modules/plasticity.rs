//! Short-term synaptic plasticity (facilitation and depression)

use super::{nonlinearity::safe_pow, Module, ModuleParams, PortInputs};
use crate::{error::*, grid::{Grid, GridShape}};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Offset added to |input| before dividing by it
const INPUT_EPSILON: f64 = 1.0e-2;

/// Parameters for [`ShortTermPlasticity`]
#[derive(Debug, Clone, PartialEq)]
pub struct ShortTermPlasticityParams {
    /// Gain on the input
    pub slope: f64,
    /// Constant offset
    pub offset: f64,
    /// Output exponent
    pub exponent: f64,
    /// Facilitation rate
    pub kf: f64,
    /// Depletion factor
    pub kd: f64,
    /// Resource recovery time constant (ms)
    pub tau_ms: f64,
    /// Lower clamp on the input
    pub threshold: Option<f64>,
}

impl Default for ShortTermPlasticityParams {
    fn default() -> Self {
        Self {
            slope: 1.0,
            offset: 0.0,
            exponent: 1.0,
            kf: 0.0,
            kd: 0.0,
            tau_ms: 1.0,
            threshold: None,
        }
    }
}

impl ShortTermPlasticityParams {
    /// Read the plasticity parameter map
    pub fn from_params(params: &ModuleParams) -> Result<Self> {
        params.ensure_known(
            "ShortTermPlasticity",
            &["slope", "offset", "exponent", "kf", "kd", "tau", "threshold"],
        )?;
        let defaults = Self::default();
        let p = Self {
            slope: params.number_or("slope", defaults.slope)?,
            offset: params.number_or("offset", defaults.offset)?,
            exponent: params.number_or("exponent", defaults.exponent)?,
            kf: params.number_or("kf", defaults.kf)?,
            kd: params.number_or("kd", defaults.kd)?,
            tau_ms: params.number_or("tau", defaults.tau_ms)?,
            threshold: params.number("threshold")?,
        };
        p.validate()?;
        Ok(p)
    }

    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        if !(self.tau_ms > 0.0) {
            return Err(RuntimeError::invalid_parameter(
                "tau",
                self.tau_ms.to_string(),
                "> 0.0",
            ));
        }
        if self.kd < 0.0 {
            return Err(RuntimeError::invalid_parameter(
                "kd",
                self.kd.to_string(),
                ">= 0.0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SynapseState {
    /// Depletion variable km
    km: f64,
    /// Facilitation P
    facilitation: f64,
}

/// Facilitation/depression synapse.
///
/// Per pixel, with `a = |x| + eps`:
/// `km <- kd/a + (km - kd/a) * exp(-dt/tau)`, `P <- P + kf * (km*|x| - P)`,
/// output `(slope * x + offset + P)^exponent`.
#[derive(Debug, Clone)]
pub struct ShortTermPlasticity {
    params: ShortTermPlasticityParams,
    state: Vec<SynapseState>,
    output: Grid,
}

impl ShortTermPlasticity {
    /// Create a plasticity module sized for `shape`
    pub fn new(params: ShortTermPlasticityParams, shape: &GridShape) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            state: vec![SynapseState::default(); shape.len()],
            output: Grid::for_shape(shape),
        })
    }

    /// Current facilitation at pixel index `i`
    pub fn facilitation(&self, i: usize) -> Option<f64> {
        self.state.get(i).map(|s| s.facilitation)
    }
}

impl Module for ShortTermPlasticity {
    fn type_tag(&self) -> &'static str {
        "ShortTermPlasticity"
    }

    fn reset(&mut self) {
        self.state
            .iter_mut()
            .for_each(|s| *s = SynapseState::default());
        self.output.fill(0.0);
    }

    fn step(&mut self, dt_ms: f64, inputs: &PortInputs) -> Result<()> {
        self.output.ensure_same_shape(&inputs.current)?;
        let p = &self.params;
        let decay = (-dt_ms / p.tau_ms).exp();

        let update = |(s, (x, y)): (&mut SynapseState, (&f64, &mut f64))| {
            let x = *x;
            let km_inf = p.kd / (x.abs() + INPUT_EPSILON);
            s.km = km_inf + (s.km - km_inf) * decay;
            s.facilitation += p.kf * (s.km * x.abs() - s.facilitation);

            let drive = match p.threshold {
                Some(th) if x < th => th,
                _ => x,
            };
            *y = safe_pow(p.slope * drive + p.offset + s.facilitation, p.exponent);
        };

        let input = inputs.current.as_slice();
        let output = self.output.as_mut_slice();

        #[cfg(feature = "parallel")]
        self.state
            .par_iter_mut()
            .zip(input.par_iter().zip(output.par_iter_mut()))
            .for_each(update);

        #[cfg(not(feature = "parallel"))]
        self.state
            .iter_mut()
            .zip(input.iter().zip(output.iter_mut()))
            .for_each(update);

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
        GridShape::new(1, 1, 1.0).unwrap()
    }

    #[test]
    fn test_without_plasticity_is_affine() {
        let params = ShortTermPlasticityParams {
            slope: 2.0,
            offset: 1.0,
            ..Default::default()
        };
        let mut stp = ShortTermPlasticity::new(params, &shape()).unwrap();
        stp.step(1.0, &PortInputs::current(Grid::filled(1, 1, 3.0))).unwrap();
        assert_eq!(stp.output().get(0, 0), Some(7.0));
    }

    #[test]
    fn test_facilitation_builds_up_and_resets() {
        let params = ShortTermPlasticityParams {
            kf: 0.5,
            kd: 1.0,
            tau_ms: 5.0,
            ..Default::default()
        };
        let mut stp = ShortTermPlasticity::new(params, &shape()).unwrap();
        let drive = PortInputs::current(Grid::filled(1, 1, 1.0));

        stp.step(1.0, &drive).unwrap();
        let first = stp.output().get(0, 0).unwrap();
        for _ in 0..20 {
            stp.step(1.0, &drive).unwrap();
        }
        let later = stp.output().get(0, 0).unwrap();
        assert!(later > first);

        // km converges to kd / (|x| + eps) and P to km * |x|
        let km_inf = 1.0 / (1.0 + INPUT_EPSILON);
        let p = stp.facilitation(0).unwrap();
        assert!((p - km_inf).abs() < 0.1);

        stp.reset();
        assert_eq!(stp.facilitation(0), Some(0.0));
        assert_eq!(stp.output().get(0, 0), Some(0.0));
    }

    #[test]
    fn test_threshold_clamps_input() {
        let params = ShortTermPlasticityParams {
            threshold: Some(0.0),
            ..Default::default()
        };
        let mut stp = ShortTermPlasticity::new(params, &shape()).unwrap();
        stp.step(1.0, &PortInputs::current(Grid::filled(1, 1, -4.0))).unwrap();
        assert_eq!(stp.output().get(0, 0), Some(0.0));
    }

    #[test]
    fn test_rejects_bad_tau() {
        let params = ModuleParams::new().with("tau", 0.0);
        assert!(ShortTermPlasticityParams::from_params(&params).is_err());
    }
}
