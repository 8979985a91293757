//! Stateless pointwise nonlinearities

use super::{map_pointwise, Module, ModuleParams, PortInputs};
use crate::{error::*, grid::{Grid, GridShape}};

/// Bound applied to logistic exponent arguments
const EXP_ARG_LIMIT: f64 = 500.0;

/// `base^exponent`, with bases outside the real domain clamped to zero
pub(crate) fn safe_pow(base: f64, exponent: f64) -> f64 {
    if exponent == 1.0 {
        return base;
    }
    if base < 0.0 && exponent.fract() != 0.0 {
        return 0.0f64.powf(exponent);
    }
    base.powf(exponent)
}

fn logistic(max: f64, slope: f64, offset: f64, x: f64) -> f64 {
    let arg = (-slope * (x - offset)).clamp(-EXP_ARG_LIMIT, EXP_ARG_LIMIT);
    max / (1.0 + arg.exp())
}

/// Parameters for [`StaticNonLinearity`]
#[derive(Debug, Clone, PartialEq)]
pub struct StaticNonLinearityParams {
    /// Multiplicative gain
    pub slope: f64,
    /// Additive offset
    pub offset: f64,
    /// Power applied to the (rectified) input
    pub exponent: f64,
    /// Rectification threshold
    pub threshold: Option<f64>,
}

impl Default for StaticNonLinearityParams {
    fn default() -> Self {
        Self {
            slope: 1.0,
            offset: 0.0,
            exponent: 1.0,
            threshold: None,
        }
    }
}

impl StaticNonLinearityParams {
    /// Read `slope`, `offset`, `exponent` and `threshold`
    pub fn from_params(params: &ModuleParams) -> Result<Self> {
        params.ensure_known(
            "StaticNonLinearity",
            &["slope", "offset", "exponent", "threshold"],
        )?;
        let defaults = Self::default();
        Ok(Self {
            slope: params.number_or("slope", defaults.slope)?,
            offset: params.number_or("offset", defaults.offset)?,
            exponent: params.number_or("exponent", defaults.exponent)?,
            threshold: params.number("threshold")?,
        })
    }

    /// Set a rectification threshold
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Evaluate the nonlinearity at `x`
    pub fn apply(&self, x: f64) -> f64 {
        match self.threshold {
            Some(th) if x <= th => self.offset,
            Some(th) => self.slope * safe_pow(x - th, self.exponent) + self.offset,
            None => self.slope * safe_pow(x, self.exponent) + self.offset,
        }
    }
}

/// `slope * x^exponent + offset`, optionally rectified at a threshold
#[derive(Debug, Clone)]
pub struct StaticNonLinearity {
    params: StaticNonLinearityParams,
    output: Grid,
}

impl StaticNonLinearity {
    /// Create a nonlinearity sized for `shape`
    pub fn new(params: StaticNonLinearityParams, shape: &GridShape) -> Self {
        Self {
            params,
            output: Grid::for_shape(shape),
        }
    }
}

impl Module for StaticNonLinearity {
    fn type_tag(&self) -> &'static str {
        "StaticNonLinearity"
    }

    fn reset(&mut self) {
        self.output.fill(0.0);
    }

    fn step(&mut self, _dt_ms: f64, inputs: &PortInputs) -> Result<()> {
        let params = &self.params;
        map_pointwise(&inputs.current, &mut self.output, |x| params.apply(x))
    }

    fn output(&self) -> &Grid {
        &self.output
    }
}

/// One interval of a piecewise nonlinearity, `[start, end)`
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Inclusive lower bound
    pub start: f64,
    /// Exclusive upper bound
    pub end: f64,
    /// Gain inside the interval
    pub slope: f64,
    /// Offset inside the interval
    pub offset: f64,
    /// Power applied inside the interval
    pub exponent: f64,
}

impl Segment {
    fn contains(&self, x: f64) -> bool {
        x >= self.start && x < self.end
    }
}

/// Piecewise `(slope_k * x + offset_k)^exponent_k`; inputs outside every
/// segment pass through unchanged.
#[derive(Debug, Clone)]
pub struct CustomNonLinearity {
    segments: Vec<Segment>,
    output: Grid,
}

impl CustomNonLinearity {
    /// Create a piecewise nonlinearity
    pub fn new(segments: Vec<Segment>, shape: &GridShape) -> Result<Self> {
        if segments.is_empty() {
            return Err(RuntimeError::invalid_parameter(
                "start",
                "[]",
                "at least one segment",
            ));
        }
        for (k, seg) in segments.iter().enumerate() {
            if !(seg.start < seg.end) {
                return Err(RuntimeError::invalid_parameter(
                    format!("end[{}]", k),
                    seg.end.to_string(),
                    format!("> start ({})", seg.start),
                ));
            }
        }
        Ok(Self {
            segments,
            output: Grid::for_shape(shape),
        })
    }

    /// Read parallel `start`/`end`/`slope`/`offset`/`exponent` lists
    pub fn from_params(params: &ModuleParams, shape: &GridShape) -> Result<Self> {
        const KEYS: [&str; 5] = ["start", "end", "slope", "offset", "exponent"];
        params.ensure_known("CustomNonLinearity", &KEYS)?;

        let mut columns = Vec::with_capacity(KEYS.len());
        for key in KEYS {
            let values = params.numbers(key)?.ok_or_else(|| {
                RuntimeError::invalid_parameter(key, "missing", "a list of numbers")
            })?;
            columns.push(values);
        }
        let n = columns[0].len();
        if let Some((k, col)) = columns.iter().enumerate().find(|(_, c)| c.len() != n) {
            return Err(RuntimeError::invalid_parameter(
                KEYS[k],
                format!("{} values", col.len()),
                format!("{} values (one per segment)", n),
            ));
        }

        let segments = (0..n)
            .map(|i| Segment {
                start: columns[0][i],
                end: columns[1][i],
                slope: columns[2][i],
                offset: columns[3][i],
                exponent: columns[4][i],
            })
            .collect();
        Self::new(segments, shape)
    }

    /// Evaluate at `x`
    pub fn apply(&self, x: f64) -> f64 {
        match self.segments.iter().find(|s| s.contains(x)) {
            Some(s) => safe_pow(s.slope * x + s.offset, s.exponent),
            None => x,
        }
    }
}

impl Module for CustomNonLinearity {
    fn type_tag(&self) -> &'static str {
        "CustomNonLinearity"
    }

    fn reset(&mut self) {
        self.output.fill(0.0);
    }

    fn step(&mut self, _dt_ms: f64, inputs: &PortInputs) -> Result<()> {
        let segments = &self.segments;
        map_pointwise(&inputs.current, &mut self.output, |x| {
            match segments.iter().find(|s| s.contains(x)) {
                Some(s) => safe_pow(s.slope * x + s.offset, s.exponent),
                None => x,
            }
        })
    }

    fn output(&self) -> &Grid {
        &self.output
    }
}

/// Parameters shared by both logistic nonlinearities
#[derive(Debug, Clone, PartialEq)]
pub struct SigmoidParams {
    /// Saturation value
    pub max: f64,
    /// Steepness
    pub slope: f64,
    /// Input at half saturation
    pub offset: f64,
}

impl Default for SigmoidParams {
    fn default() -> Self {
        Self {
            max: 1.0,
            slope: 1.0,
            offset: 0.0,
        }
    }
}

impl SigmoidParams {
    /// Read `max`, `slope` and `offset`
    pub fn from_params(params: &ModuleParams) -> Result<Self> {
        params.ensure_known("SigmoidNonLinearity", &["max", "slope", "offset"])?;
        let defaults = Self::default();
        Ok(Self {
            max: params.number_or("max", defaults.max)?,
            slope: params.number_or("slope", defaults.slope)?,
            offset: params.number_or("offset", defaults.offset)?,
        })
    }
}

/// `max / (1 + exp(-slope * (x - offset)))`
///
/// Output lies in `(0, max)`. Once `slope * (x - offset)` exceeds about 37 the
/// result rounds to exactly `max` in `f64`.
#[derive(Debug, Clone)]
pub struct SigmoidNonLinearity {
    params: SigmoidParams,
    output: Grid,
}

impl SigmoidNonLinearity {
    /// Create a logistic nonlinearity
    pub fn new(params: SigmoidParams, shape: &GridShape) -> Self {
        Self {
            params,
            output: Grid::for_shape(shape),
        }
    }

    /// Evaluate at `x`
    pub fn apply(&self, x: f64) -> f64 {
        logistic(self.params.max, self.params.slope, self.params.offset, x)
    }
}

impl Module for SigmoidNonLinearity {
    fn type_tag(&self) -> &'static str {
        "SigmoidNonLinearity"
    }

    fn reset(&mut self) {
        self.output.fill(0.0);
    }

    fn step(&mut self, _dt_ms: f64, inputs: &PortInputs) -> Result<()> {
        let SigmoidParams { max, slope, offset } = self.params;
        map_pointwise(&inputs.current, &mut self.output, |x| {
            logistic(max, slope, offset, x)
        })
    }

    fn output(&self) -> &Grid {
        &self.output
    }
}

/// `sgn(x) * max / (1 + exp(-slope * (|x| - offset)))`
#[derive(Debug, Clone)]
pub struct SymmetricSigmoidNonLinearity {
    params: SigmoidParams,
    output: Grid,
}

impl SymmetricSigmoidNonLinearity {
    /// Create a sign-symmetric logistic nonlinearity
    pub fn new(params: SigmoidParams, shape: &GridShape) -> Self {
        Self {
            params,
            output: Grid::for_shape(shape),
        }
    }

    /// Evaluate at `x`
    pub fn apply(&self, x: f64) -> f64 {
        symmetric(&self.params, x)
    }
}

fn symmetric(p: &SigmoidParams, x: f64) -> f64 {
    if x == 0.0 {
        return 0.0;
    }
    x.signum() * logistic(p.max, p.slope, p.offset, x.abs())
}

impl Module for SymmetricSigmoidNonLinearity {
    fn type_tag(&self) -> &'static str {
        "SymmetricSigmoidNonLinearity"
    }

    fn reset(&mut self) {
        self.output.fill(0.0);
    }

    fn step(&mut self, _dt_ms: f64, inputs: &PortInputs) -> Result<()> {
        let params = &self.params;
        map_pointwise(&inputs.current, &mut self.output, |x| symmetric(params, x))
    }

    fn output(&self) -> &Grid {
        &self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn shape() -> GridShape {
        GridShape::new(3, 1, 1.0).unwrap()
    }

    #[test]
    fn test_safe_pow_domain() {
        assert_eq!(safe_pow(-4.0, 0.5), 0.0);
        assert_eq!(safe_pow(-2.0, 2.0), 4.0);
        assert_eq!(safe_pow(4.0, 0.5), 2.0);
        assert_eq!(safe_pow(-3.0, 1.0), -3.0);
    }

    #[test]
    fn test_static_linear_case() {
        let p = StaticNonLinearityParams::default();
        let (a, b) = (1.25, -0.5);
        assert_eq!(p.apply(a + b), p.apply(a) + p.apply(b) - p.offset);
    }

    #[test]
    fn test_static_threshold_rectifies() {
        let p = StaticNonLinearityParams {
            slope: 2.0,
            offset: 0.5,
            exponent: 2.0,
            threshold: None,
        }
        .with_threshold(1.0);
        assert_eq!(p.apply(-10.0), 0.5);
        assert_eq!(p.apply(1.0), 0.5);
        assert_eq!(p.apply(3.0), 2.0 * 4.0 + 0.5);
    }

    #[test]
    fn test_static_module_step() {
        let mut m = StaticNonLinearity::new(
            StaticNonLinearityParams {
                slope: 3.0,
                offset: 1.0,
                exponent: 1.0,
                threshold: None,
            },
            &shape(),
        );
        let input = Grid::from_vec(3, 1, vec![-1.0, 0.0, 2.0]).unwrap();
        m.step(1.0, &PortInputs::current(input)).unwrap();
        assert_eq!(m.output().as_slice(), &[-2.0, 1.0, 7.0]);
    }

    #[test]
    fn test_custom_segments() {
        let params = ModuleParams::new()
            .with("start", vec![0.0, 1.0])
            .with("end", vec![1.0, 2.0])
            .with("slope", vec![2.0, 1.0])
            .with("offset", vec![0.0, 1.0])
            .with("exponent", vec![1.0, 2.0]);
        let m = CustomNonLinearity::from_params(&params, &shape()).unwrap();
        assert_eq!(m.apply(0.5), 1.0);
        assert_eq!(m.apply(1.0), 4.0);
        assert_eq!(m.apply(-3.0), -3.0);
        assert_eq!(m.apply(2.0), 2.0);
    }

    #[test]
    fn test_custom_rejects_ragged_lists() {
        let params = ModuleParams::new()
            .with("start", vec![0.0, 1.0])
            .with("end", vec![1.0])
            .with("slope", vec![2.0, 1.0])
            .with("offset", vec![0.0, 1.0])
            .with("exponent", vec![1.0, 2.0]);
        assert!(CustomNonLinearity::from_params(&params, &shape()).is_err());
    }

    #[test]
    fn test_sigmoid_half_point_and_overflow() {
        let m = SigmoidNonLinearity::new(
            SigmoidParams {
                max: 10.0,
                slope: 1000.0,
                offset: 2.0,
            },
            &shape(),
        );
        assert_eq!(m.apply(2.0), 5.0);
        assert!(m.apply(-1e9).is_finite());
        assert!(m.apply(-1e9) > 0.0);
        assert_eq!(m.apply(1e9), 10.0);
    }

    #[test]
    fn test_symmetric_sigmoid_is_odd() {
        let m = SymmetricSigmoidNonLinearity::new(SigmoidParams::default(), &shape());
        for x in [0.3, 1.0, 4.0] {
            assert_eq!(m.apply(-x), -m.apply(x));
        }
        assert_eq!(m.apply(0.0), 0.0);
    }

    proptest! {
        #[test]
        fn prop_sigmoid_monotonic_and_bounded(
            a in -50.0f64..50.0,
            b in -50.0f64..50.0,
            slope in 0.01f64..5.0,
            max in 0.1f64..100.0,
        ) {
            let m = SigmoidNonLinearity::new(SigmoidParams { max, slope, offset: 0.5 }, &shape());
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(m.apply(lo) <= m.apply(hi));
            for x in [lo, hi] {
                let y = m.apply(x);
                prop_assert!(y > 0.0 && y <= max);
                if slope * (x - 0.5) < 30.0 {
                    prop_assert!(y < max);
                }
            }
        }
    }
}
