//! Module library: stateful per-pixel processing units
//!
//! Every module consumes the accumulated drive on its ports and produces one
//! output [`Grid`] per step. [`ModuleKind`] closes the set of module types and
//! maps configuration type tags onto constructors.

use crate::{error::*, grid::{Grid, GridShape}};

pub mod compartment;
pub mod gauss;
pub mod linear_filter;
pub mod nonlinearity;
pub mod params;
pub mod plasticity;

pub use compartment::{Integration, SingleCompartment, SingleCompartmentParams};
pub use gauss::{GaussFilter, GaussFilterParams};
pub use linear_filter::{KernelShape, LinearFilter, LinearFilterParams};
pub use nonlinearity::{
    CustomNonLinearity, Segment, SigmoidNonLinearity, SigmoidParams, StaticNonLinearity,
    StaticNonLinearityParams, SymmetricSigmoidNonLinearity,
};
pub use params::{ModuleParams, ParamValue};
pub use plasticity::{ShortTermPlasticity, ShortTermPlasticityParams};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Type tags understood by [`ModuleKind::from_params`]
pub const MODULE_TYPES: &[&str] = &[
    "LinearFilter",
    "StaticNonLinearity",
    "CustomNonLinearity",
    "SigmoidNonLinearity",
    "SymmetricSigmoidNonLinearity",
    "ShortTermPlasticity",
    "GaussFilter",
    "SingleCompartment",
];

/// Port declaration of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSpec {
    /// Maximum number of Current connections; `None` sums any number into one port
    pub current: Option<usize>,
    /// Number of Conductance ports, one connection each
    pub conductance: usize,
}

impl PortSpec {
    /// A single Current port that sums every incoming connection
    pub const fn summing() -> Self {
        Self {
            current: None,
            conductance: 0,
        }
    }
}

/// Drive accumulated on a module's ports for one step
#[derive(Debug, Clone)]
pub struct PortInputs {
    /// Sum of all signed Current connections
    pub current: Grid,
    /// One accumulated grid per Conductance port, in connection order
    pub conductances: Vec<Grid>,
}

impl PortInputs {
    /// Zeroed inputs for a retina shape
    pub fn new(shape: &GridShape) -> Self {
        Self {
            current: Grid::for_shape(shape),
            conductances: Vec::new(),
        }
    }

    /// Inputs carrying only a Current drive
    pub fn current(current: Grid) -> Self {
        Self {
            current,
            conductances: Vec::new(),
        }
    }
}

/// Capability shared by every module type
pub trait Module: Send {
    /// Configuration type tag
    fn type_tag(&self) -> &'static str;

    /// Ports accepted by this module
    fn ports(&self) -> PortSpec {
        PortSpec::summing()
    }

    /// Restore the trial-start state
    fn reset(&mut self);

    /// Advance by `dt_ms` using the accumulated port drive
    fn step(&mut self, dt_ms: f64, inputs: &PortInputs) -> Result<()>;

    /// Output computed by the last step
    fn output(&self) -> &Grid;
}

/// Closed set of module implementations
#[derive(Debug, Clone)]
pub enum ModuleKind {
    /// Gamma or exponential temporal filter
    LinearFilter(LinearFilter),
    /// Polynomial pointwise nonlinearity
    StaticNonLinearity(StaticNonLinearity),
    /// Piecewise polynomial nonlinearity
    CustomNonLinearity(CustomNonLinearity),
    /// Logistic nonlinearity
    Sigmoid(SigmoidNonLinearity),
    /// Sign-symmetric logistic nonlinearity
    SymmetricSigmoid(SymmetricSigmoidNonLinearity),
    /// Facilitation/depression synapse
    ShortTermPlasticity(ShortTermPlasticity),
    /// Spatial Gaussian blur
    GaussFilter(GaussFilter),
    /// Conductance-based leaky integrator
    SingleCompartment(SingleCompartment),
}

macro_rules! dispatch {
    ($self:expr, $m:ident => $body:expr) => {
        match $self {
            ModuleKind::LinearFilter($m) => $body,
            ModuleKind::StaticNonLinearity($m) => $body,
            ModuleKind::CustomNonLinearity($m) => $body,
            ModuleKind::Sigmoid($m) => $body,
            ModuleKind::SymmetricSigmoid($m) => $body,
            ModuleKind::ShortTermPlasticity($m) => $body,
            ModuleKind::GaussFilter($m) => $body,
            ModuleKind::SingleCompartment($m) => $body,
        }
    };
}

impl ModuleKind {
    /// Build a module from its type tag and parameter map
    pub fn from_params(type_tag: &str, params: &ModuleParams, shape: &GridShape) -> Result<Self> {
        let module = match type_tag {
            "LinearFilter" => Self::LinearFilter(LinearFilter::new(
                LinearFilterParams::from_params(params)?,
                shape,
            )?),
            "StaticNonLinearity" => Self::StaticNonLinearity(StaticNonLinearity::new(
                StaticNonLinearityParams::from_params(params)?,
                shape,
            )),
            "CustomNonLinearity" => {
                Self::CustomNonLinearity(CustomNonLinearity::from_params(params, shape)?)
            }
            "SigmoidNonLinearity" => Self::Sigmoid(SigmoidNonLinearity::new(
                SigmoidParams::from_params(params)?,
                shape,
            )),
            "SymmetricSigmoidNonLinearity" => Self::SymmetricSigmoid(
                SymmetricSigmoidNonLinearity::new(SigmoidParams::from_params(params)?, shape),
            ),
            "ShortTermPlasticity" => Self::ShortTermPlasticity(ShortTermPlasticity::new(
                ShortTermPlasticityParams::from_params(params)?,
                shape,
            )?),
            "GaussFilter" => Self::GaussFilter(GaussFilter::new(
                GaussFilterParams::from_params(params)?,
                shape,
            )?),
            "SingleCompartment" => Self::SingleCompartment(SingleCompartment::new(
                SingleCompartmentParams::from_params(params)?,
                shape,
            )?),
            other => {
                return Err(RuntimeError::UnknownModuleType {
                    type_tag: other.to_string(),
                })
            }
        };
        Ok(module)
    }
}

impl Module for ModuleKind {
    fn type_tag(&self) -> &'static str {
        dispatch!(self, m => m.type_tag())
    }

    fn ports(&self) -> PortSpec {
        dispatch!(self, m => m.ports())
    }

    fn reset(&mut self) {
        dispatch!(self, m => m.reset())
    }

    fn step(&mut self, dt_ms: f64, inputs: &PortInputs) -> Result<()> {
        dispatch!(self, m => m.step(dt_ms, inputs))
    }

    fn output(&self) -> &Grid {
        dispatch!(self, m => m.output())
    }
}

/// Apply `f` to every input sample, writing the result into `output`
pub(crate) fn map_pointwise<F>(input: &Grid, output: &mut Grid, f: F) -> Result<()>
where
    F: Fn(f64) -> f64 + Sync + Send,
{
    output.ensure_same_shape(input)?;
    let src = input.as_slice();
    let dst = output.as_mut_slice();

    #[cfg(feature = "parallel")]
    dst.par_iter_mut()
        .zip(src.par_iter())
        .for_each(|(y, x)| *y = f(*x));

    #[cfg(not(feature = "parallel"))]
    dst.iter_mut().zip(src.iter()).for_each(|(y, x)| *y = f(*x));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> GridShape {
        GridShape::new(4, 3, 5.0).unwrap()
    }

    #[test]
    fn test_every_type_tag_constructs() {
        let params = ModuleParams::new();
        for tag in MODULE_TYPES {
            let params = match *tag {
                "LinearFilter" => ModuleParams::new().with("tau", 10.0),
                "CustomNonLinearity" => ModuleParams::new()
                    .with("start", vec![0.0])
                    .with("end", vec![1.0])
                    .with("slope", vec![1.0])
                    .with("offset", vec![0.0])
                    .with("exponent", vec![1.0]),
                "SingleCompartment" => ModuleParams::new().with("Cm", 1.0),
                _ => params.clone(),
            };
            let module = ModuleKind::from_params(tag, &params, &shape()).unwrap();
            assert_eq!(module.type_tag(), *tag);
            assert_eq!(module.output().dimensions(), (4, 3));
        }
    }

    #[test]
    fn test_unknown_type_tag() {
        let err = ModuleKind::from_params("Retina", &ModuleParams::new(), &shape());
        assert!(matches!(err, Err(RuntimeError::UnknownModuleType { .. })));
    }

    #[test]
    fn test_map_pointwise() {
        let input = Grid::filled(4, 3, 2.0);
        let mut output = Grid::new(4, 3);
        map_pointwise(&input, &mut output, |x| x * x).unwrap();
        assert!(output.as_slice().iter().all(|v| *v == 4.0));
    }
}
