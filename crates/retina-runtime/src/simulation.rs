//! Simulation engine: clock, trials and per-step scheduling of the retina graph

use crate::{
    error::*,
    graph::{Graph, SourceRef},
    grid::GridShape,
    input::{ChannelSet, InputFrame, InputProvider, InputSource},
    multimeter::Multimeter,
    output::OutputPort,
    results::{check_label, file_names, ResultWriter, WriteReport, AGGREGATE_FILE},
};
use std::collections::HashSet;
use std::time::Instant;

/// Seed used when none is configured
pub const DEFAULT_SEED: u64 = 42;

/// Simulation parameters
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct SimulationParams {
    /// Time step (ms)
    pub dt_ms: f64,
    /// Duration of one trial (ms)
    pub duration_ms: f64,
    /// Number of independent trials
    pub num_trials: usize,
    /// Pixels per degree of visual angle
    pub pixels_per_degree: f64,
    /// Grid columns
    pub columns: usize,
    /// Grid rows
    pub rows: usize,
    /// Seed for stochastic inputs (None = DEFAULT_SEED)
    pub seed: Option<u64>,
    /// Enable performance sampling
    pub perf_enabled: bool,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            dt_ms: crate::DEFAULT_TIMESTEP_MS,
            duration_ms: 1000.0,
            num_trials: 1,
            pixels_per_degree: 5.0,
            columns: 25,
            rows: 25,
            seed: None,
            perf_enabled: false,
        }
    }
}

impl SimulationParams {
    /// Create new simulation parameters with validation
    pub fn new(dt_ms: f64, duration_ms: f64) -> Result<Self> {
        if !(dt_ms > 0.0) || !dt_ms.is_finite() {
            return Err(RuntimeError::invalid_parameter(
                "dt_ms",
                dt_ms.to_string(),
                "> 0.0",
            ));
        }
        if !(duration_ms > 0.0) || !duration_ms.is_finite() {
            return Err(RuntimeError::invalid_parameter(
                "duration_ms",
                duration_ms.to_string(),
                "> 0.0",
            ));
        }
        if duration_ms < dt_ms {
            return Err(RuntimeError::invalid_parameter(
                "duration_ms",
                format!("{} (with dt_ms={})", duration_ms, dt_ms),
                ">= dt_ms",
            ));
        }

        Ok(Self {
            dt_ms,
            duration_ms,
            ..Default::default()
        })
    }

    /// Set the number of trials
    pub fn with_trials(mut self, num_trials: usize) -> Self {
        self.num_trials = num_trials;
        self
    }

    /// Set the grid size and resolution
    pub fn with_grid(mut self, columns: usize, rows: usize, pixels_per_degree: f64) -> Self {
        self.columns = columns;
        self.rows = rows;
        self.pixels_per_degree = pixels_per_degree;
        self
    }

    /// Set random seed for reproducibility
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Enable or disable performance sampling
    pub fn with_perf(mut self, enabled: bool) -> Self {
        self.perf_enabled = enabled;
        self
    }

    /// Seed actually used
    pub fn effective_seed(&self) -> u64 {
        self.seed.unwrap_or(DEFAULT_SEED)
    }

    /// Retina shape
    pub fn shape(&self) -> Result<GridShape> {
        GridShape::new(self.columns, self.rows, self.pixels_per_degree)
    }

    /// Get number of simulation steps per trial
    pub fn num_steps(&self) -> usize {
        (self.duration_ms / self.dt_ms + 1e-9).floor() as usize
    }

    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        Self::new(self.dt_ms, self.duration_ms)?;
        if self.num_trials == 0 {
            return Err(RuntimeError::invalid_parameter("num_trials", "0", "> 0"));
        }
        self.shape()?;
        Ok(())
    }
}

/// Simulation clock threaded through input, graph and multimeters
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationClock {
    /// Time of the next step (ms)
    pub time_ms: f64,
    /// Step size (ms)
    pub dt_ms: f64,
    /// Trial duration (ms)
    pub duration_ms: f64,
    /// Steps completed in the current trial
    pub step: usize,
    /// Current trial index
    pub trial: usize,
    /// Total trials
    pub num_trials: usize,
}

impl SimulationClock {
    fn new(params: &SimulationParams) -> Self {
        Self {
            time_ms: 0.0,
            dt_ms: params.dt_ms,
            duration_ms: params.duration_ms,
            step: 0,
            trial: 0,
            num_trials: params.num_trials,
        }
    }

    fn start_trial(&mut self, trial: usize) {
        self.trial = trial;
        self.step = 0;
        self.time_ms = 0.0;
    }

    fn advance(&mut self) {
        self.step += 1;
        // Derived from the step count so long trials do not accumulate drift
        self.time_ms = self.step as f64 * self.dt_ms;
    }
}

/// Scheduler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Graph built, no trial started
    Built,
    /// Module state reset, input stream re-established
    Initialized,
    /// Stepping through a trial
    Running,
    /// Trial finished, more to go
    TrialDone,
    /// Every trial finished
    AllDone,
}

/// Performance metrics collected during simulation steps.
/// Present when SimulationParams::with_perf(true) is used.
#[derive(Debug, Clone)]
pub struct PerfReport {
    /// Average step time in nanoseconds
    pub avg_step_ns: u64,
    /// Max step time in nanoseconds
    pub max_step_ns: u64,
    /// Steps sampled
    pub steps: usize,
}

/// Summary of a completed run
#[derive(Debug, Clone)]
pub struct SimulationReport {
    /// Trials executed
    pub trials: usize,
    /// Steps per trial
    pub steps_per_trial: usize,
    /// Output cells after the last step, in cell order
    pub final_output: Vec<f64>,
    /// Optional performance report
    pub perf: Option<PerfReport>,
}

/// Retina simulation engine
#[derive(Debug)]
pub struct RetinaSimulation {
    params: SimulationParams,
    shape: GridShape,
    graph: Graph,
    input: InputProvider,
    frame: InputFrame,
    channels: ChannelSet,
    multimeters: Vec<Multimeter>,
    /// Resolved target of each multimeter
    meter_sources: Vec<SourceRef>,
    outputs: Vec<usize>,
    clock: SimulationClock,
    state: EngineState,
    trials_done: usize,
    /// Per-step timing samples (ns), captured when perf_enabled
    perf_samples: Vec<u64>,
}

impl RetinaSimulation {
    /// Create a new simulation engine
    pub fn new(params: SimulationParams, graph: Graph, input: InputProvider) -> Result<Self> {
        params.validate()?;
        let shape = params.shape()?;

        let graph_dims = (graph.shape().columns, graph.shape().rows);
        if graph_dims != (shape.columns, shape.rows) {
            return Err(RuntimeError::dimension_mismatch(
                (shape.columns, shape.rows),
                graph_dims,
            ));
        }
        if let InputProvider::Sequence(seq) = &input {
            if let Some(dims) = seq.dimensions() {
                if dims != (shape.columns, shape.rows) {
                    return Err(RuntimeError::dimension_mismatch(
                        (shape.columns, shape.rows),
                        dims,
                    ));
                }
            }
        }

        Ok(Self {
            clock: SimulationClock::new(&params),
            frame: InputFrame::new(&shape),
            channels: ChannelSet::new(&shape),
            params,
            shape,
            graph,
            input,
            multimeters: Vec::new(),
            meter_sources: Vec::new(),
            outputs: Vec::new(),
            state: EngineState::Built,
            trials_done: 0,
            perf_samples: Vec::new(),
        })
    }

    /// Bind a multimeter to a module or input channel
    pub fn add_multimeter(&mut self, multimeter: Multimeter) -> Result<()> {
        multimeter
            .mode()
            .validate(self.shape.columns, self.shape.rows)?;
        check_label(multimeter.label())?;
        let source = self.resolve(multimeter.target())?;
        if self.multimeters.iter().any(|m| m.label() == multimeter.label()) {
            return Err(RuntimeError::invalid_config(format!(
                "duplicate multimeter label '{}'",
                multimeter.label()
            )));
        }

        // Result files of different multimeters must never share a name
        let trials = self.params.num_trials;
        let pixels = self.shape.len();
        let names: HashSet<String> =
            file_names(multimeter.label(), multimeter.mode(), trials, pixels)
                .into_iter()
                .collect();
        if names.contains(AGGREGATE_FILE) {
            return Err(RuntimeError::invalid_config(format!(
                "multimeter '{}' would overwrite the aggregate file '{}'",
                multimeter.label(),
                AGGREGATE_FILE
            )));
        }
        for other in &self.multimeters {
            if let Some(clash) = file_names(other.label(), other.mode(), trials, pixels)
                .into_iter()
                .find(|name| names.contains(name))
            {
                return Err(RuntimeError::invalid_config(format!(
                    "multimeters '{}' and '{}' both write result file '{}'",
                    other.label(),
                    multimeter.label(),
                    clash
                )));
            }
        }
        self.multimeters.push(multimeter);
        self.meter_sources.push(source);
        Ok(())
    }

    /// Designate the modules exposed through [`RetinaSimulation::output`]
    pub fn set_outputs<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        self.outputs = names
            .iter()
            .map(|n| {
                self.graph
                    .index_of(n.as_ref())
                    .ok_or_else(|| RuntimeError::module_not_found(n.as_ref()))
            })
            .collect::<Result<_>>()?;
        Ok(())
    }

    fn resolve(&self, name: &str) -> Result<SourceRef> {
        if let Some(channel) = crate::input::InputChannel::from_name(name) {
            return Ok(SourceRef::Channel(channel));
        }
        self.graph
            .index_of(name)
            .map(SourceRef::Module)
            .ok_or_else(|| RuntimeError::module_not_found(name))
    }

    /// Reset module state and the input stream for the next trial
    pub fn begin_trial(&mut self) -> Result<()> {
        if self.trials_done >= self.params.num_trials {
            return Err(RuntimeError::simulation_step(
                self.clock.time_ms,
                format!("all {} trial(s) already completed", self.params.num_trials),
            ));
        }
        let trial = self.trials_done;
        self.graph.reset();
        self.input.reset(trial, self.params.effective_seed());
        for m in &mut self.multimeters {
            m.begin_trial(self.shape.len());
        }
        self.clock.start_trial(trial);
        self.state = EngineState::Initialized;
        log::debug!("Trial {} initialized", trial);
        Ok(())
    }

    /// Advance the current trial by one step
    pub fn step(&mut self) -> Result<()> {
        if !matches!(self.state, EngineState::Initialized | EngineState::Running) {
            return Err(RuntimeError::simulation_step(
                self.clock.time_ms,
                format!("cannot step in state {:?}", self.state),
            ));
        }

        let time_ms = self.clock.time_ms;
        let dt_ms = self.params.dt_ms;
        self.state = EngineState::Running;

        self.input.frame(time_ms, &mut self.frame)?;
        self.channels.update(&self.frame)?;
        self.graph.step(dt_ms, time_ms, &self.channels)?;

        for (meter, source) in self.multimeters.iter_mut().zip(&self.meter_sources) {
            let grid = match *source {
                SourceRef::Channel(channel) => self.channels.get(channel),
                SourceRef::Module(i) => match self.graph.output_of(i) {
                    Some(g) => g,
                    None => continue,
                },
            };
            meter.observe(self.clock.step, time_ms, dt_ms, grid);
        }

        self.clock.advance();
        if self.clock.step >= self.params.num_steps() {
            self.trials_done += 1;
            self.state = if self.trials_done >= self.params.num_trials {
                EngineState::AllDone
            } else {
                EngineState::TrialDone
            };
        }
        Ok(())
    }

    /// Run one full trial
    pub fn run_trial(&mut self) -> Result<()> {
        self.begin_trial()?;
        let num_steps = self.params.num_steps();

        for step in 0..num_steps {
            let step_start = Instant::now();

            self.step()?;

            if self.params.perf_enabled {
                let elapsed_ns = step_start.elapsed().as_nanos() as u64;
                self.perf_samples.push(elapsed_ns);
            }

            if step % (num_steps / 10).max(1) == 0 {
                let progress = (step as f64 / num_steps as f64) * 100.0;
                log::debug!("Trial {} progress: {:.1}%", self.clock.trial, progress);
            }
        }
        Ok(())
    }

    /// Run every trial from scratch
    pub fn run(&mut self) -> Result<SimulationReport> {
        log::info!(
            "Starting simulation: {} trial(s) of {}ms with {}ms timestep",
            self.params.num_trials,
            self.params.duration_ms,
            self.params.dt_ms
        );

        self.trials_done = 0;
        self.perf_samples.clear();
        for m in &mut self.multimeters {
            m.clear();
        }

        for trial in 0..self.params.num_trials {
            self.run_trial()?;
            log::info!("Trial {} of {} completed", trial + 1, self.params.num_trials);
        }

        log::info!(
            "Simulation completed: {} trial(s), {} steps each",
            self.trials_done,
            self.params.num_steps()
        );
        Ok(self.report())
    }

    /// Summary of the trials run so far
    pub fn report(&self) -> SimulationReport {
        // Build performance report if enabled
        let perf = if self.params.perf_enabled && !self.perf_samples.is_empty() {
            let steps = self.perf_samples.len();
            let sum: u128 = self.perf_samples.iter().map(|v| *v as u128).sum();
            let avg = (sum / steps as u128) as u64;
            let max = *self.perf_samples.iter().max().unwrap_or(&0);
            Some(PerfReport {
                avg_step_ns: avg,
                max_step_ns: max,
                steps,
            })
        } else {
            None
        };

        SimulationReport {
            trials: self.trials_done,
            steps_per_trial: self.params.num_steps(),
            final_output: self.output().values(),
            perf,
        }
    }

    /// Designated output modules after the last step
    pub fn output(&self) -> OutputPort<'_> {
        OutputPort::new(
            self.outputs
                .iter()
                .filter_map(|&i| self.graph.output_of(i))
                .collect(),
        )
    }

    /// Write every multimeter record through `writer`
    pub fn write_results(&self, writer: &ResultWriter, default_label: Option<&str>) -> WriteReport {
        writer.write_all(&self.multimeters, default_label)
    }

    /// Bound multimeters
    pub fn multimeters(&self) -> &[Multimeter] {
        &self.multimeters
    }

    /// Multimeter by label
    pub fn multimeter(&self, label: &str) -> Option<&Multimeter> {
        self.multimeters.iter().find(|m| m.label() == label)
    }

    /// Current channel values (after the last step)
    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    /// Get reference to the graph
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Get simulation parameters
    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    /// Simulation clock
    pub fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    /// Lifecycle state
    pub fn state(&self) -> EngineState {
        self.state
    }
}

/// Run a fixed-step deterministic simulation of `graph` driven by `input`,
/// exposing `output` as the designated output module
pub fn run_fixed_step(
    graph: Graph,
    input: InputProvider,
    output: &str,
    dt_ms: f64,
    duration_ms: f64,
    seed: Option<u64>,
) -> Result<SimulationReport> {
    let shape = *graph.shape();
    let params = SimulationParams::new(dt_ms, duration_ms)?.with_grid(
        shape.columns,
        shape.rows,
        shape.pixels_per_degree,
    );
    let mut engine = RetinaSimulation::new(SimulationParams { seed, ..params }, graph, input)?;
    engine.set_outputs(&[output])?;
    engine.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Connection, GraphBuilder, PortKind};
    use crate::input::{ImpulseInput, WhiteNoiseInput};
    use crate::modules::ModuleParams;
    use crate::multimeter::MultimeterMode;

    fn params() -> SimulationParams {
        SimulationParams::new(1.0, 20.0).unwrap().with_grid(3, 2, 1.0)
    }

    fn filter_graph(params: &SimulationParams) -> Graph {
        GraphBuilder::new(params.shape().unwrap())
            .create("LinearFilter", "tmp", ModuleParams::new().with("tau", 5.0))
            .connect(Connection::new("tmp", PortKind::Current).plus("Input"))
            .build()
            .unwrap()
    }

    fn pulse() -> InputProvider {
        InputProvider::Impulse(ImpulseInput::new(2.0, 6.0, 1.0, 0.0).unwrap())
    }

    #[test]
    fn test_simulation_params_default() {
        let params = SimulationParams::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.num_steps(), 1000);
        assert_eq!(params.effective_seed(), DEFAULT_SEED);
    }

    #[test]
    fn test_simulation_params_validation() {
        assert!(SimulationParams::new(0.0, 10.0).is_err());
        assert!(SimulationParams::new(1.0, 0.0).is_err());
        assert!(SimulationParams::new(2.0, 1.0).is_err());
        assert!(SimulationParams::new(f64::NAN, 1.0).is_err());
        assert!(params().with_trials(0).validate().is_err());
        assert!(params().with_grid(0, 2, 1.0).validate().is_err());
    }

    #[test]
    fn test_num_steps_tolerates_rounding() {
        let params = SimulationParams::new(0.1, 0.3).unwrap();
        assert_eq!(params.num_steps(), 3);
    }

    #[test]
    fn test_state_machine() {
        let p = params().with_trials(2);
        let mut sim = RetinaSimulation::new(p.clone(), filter_graph(&p), pulse()).unwrap();
        assert_eq!(sim.state(), EngineState::Built);
        assert!(sim.step().is_err());

        sim.begin_trial().unwrap();
        assert_eq!(sim.state(), EngineState::Initialized);
        sim.step().unwrap();
        assert_eq!(sim.state(), EngineState::Running);
        assert_eq!(sim.clock().time_ms, 1.0);

        for _ in 1..20 {
            sim.step().unwrap();
        }
        assert_eq!(sim.state(), EngineState::TrialDone);
        assert!(sim.step().is_err());

        sim.run_trial().unwrap();
        assert_eq!(sim.state(), EngineState::AllDone);
        assert!(sim.begin_trial().is_err());
    }

    #[test]
    fn test_multimeter_binding() {
        let p = params();
        let mut sim = RetinaSimulation::new(p.clone(), filter_graph(&p), pulse()).unwrap();
        let unknown = sim.add_multimeter(Multimeter::new("x", "ghost", MultimeterMode::TemporalAll));
        assert!(matches!(unknown, Err(RuntimeError::ModuleNotFound { .. })));

        let outside = sim.add_multimeter(Multimeter::new("x", "tmp", MultimeterMode::Temporal { x: 5, y: 0 }));
        assert!(outside.is_err());

        sim.add_multimeter(Multimeter::new("in", "Input", MultimeterMode::Temporal { x: 0, y: 0 }))
            .unwrap();
        sim.add_multimeter(Multimeter::new("out", "tmp", MultimeterMode::Temporal { x: 2, y: 1 }))
            .unwrap();
        assert!(sim
            .add_multimeter(Multimeter::new("out", "tmp", MultimeterMode::TemporalAll))
            .is_err());

        sim.run().unwrap();
        let input = sim.multimeter("in").unwrap().trace(0).unwrap();
        assert_eq!(input.len(), 20);
        assert_eq!(input[1], 0.0);
        assert_eq!(input[2], 1.0);
        assert_eq!(input[6], 1.0);
        assert_eq!(input[7], 0.0);

        let out = sim.multimeter("out").unwrap().trace(0).unwrap();
        assert!(out[6] > out[2]);
        assert!(out[19] < out[7]);
    }

    #[test]
    fn test_multimeter_labels_never_share_result_files() {
        let p = params().with_trials(2);
        let mut sim = RetinaSimulation::new(p.clone(), filter_graph(&p), pulse()).unwrap();
        let temporal = MultimeterMode::Temporal { x: 0, y: 0 };

        let reserved = sim.add_multimeter(Multimeter::new(AGGREGATE_FILE, "tmp", temporal));
        assert!(matches!(reserved, Err(RuntimeError::InvalidConfiguration { .. })));
        for escaping in ["../bip", "sub/bip", ".."] {
            assert!(sim.add_multimeter(Multimeter::new(escaping, "tmp", temporal)).is_err());
        }

        // pixel 1 of "pop" is the file "pop1"
        sim.add_multimeter(Multimeter::new("pop", "tmp", MultimeterMode::TemporalAll))
            .unwrap();
        let pixel_clash = sim.add_multimeter(Multimeter::new("pop1", "tmp", temporal));
        assert!(matches!(pixel_clash, Err(RuntimeError::InvalidConfiguration { .. })));

        // the second trial of "bip" is the file "bip_trial1"
        sim.add_multimeter(Multimeter::new("bip", "tmp", temporal)).unwrap();
        assert!(sim
            .add_multimeter(Multimeter::new("bip_trial1", "tmp", temporal))
            .is_err());

        // with one trial there is no "bip_trial1" file
        let p = params();
        let mut single = RetinaSimulation::new(p.clone(), filter_graph(&p), pulse()).unwrap();
        single.add_multimeter(Multimeter::new("bip", "tmp", temporal)).unwrap();
        single
            .add_multimeter(Multimeter::new("bip_trial1", "tmp", temporal))
            .unwrap();

        sim.run().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let report = sim.write_results(&ResultWriter::new(dir.path()), Some("bip"));
        assert!(report.is_complete());
        let unique: HashSet<_> = report.written.iter().collect();
        assert_eq!(unique.len(), report.written.len());
        assert_eq!(report.written.len(), 2 * 6 + 2 + 1);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let p = params();
        let other = SimulationParams::default().with_grid(4, 4, 1.0);
        let err = RetinaSimulation::new(p, filter_graph(&other), pulse());
        assert!(matches!(err, Err(RuntimeError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let p = params().with_trials(2).with_seed(7);
        let noise = InputProvider::WhiteNoise(WhiteNoiseInput::new(50.0, 0.3, 0.3, 2.0, 0.0).unwrap());
        let mut sim = RetinaSimulation::new(p.clone(), filter_graph(&p), noise).unwrap();
        sim.add_multimeter(Multimeter::new("out", "tmp", MultimeterMode::Temporal { x: 1, y: 0 }))
            .unwrap();
        sim.set_outputs(&["tmp"]).unwrap();

        let first = sim.run().unwrap();
        let trace_a = sim.multimeter("out").unwrap().records().to_vec();
        let second = sim.run().unwrap();
        let trace_b = sim.multimeter("out").unwrap().records().to_vec();

        assert_eq!(first.final_output, second.final_output);
        assert_eq!(trace_a, trace_b);
        assert_eq!(trace_a.len(), 2);
        assert_ne!(trace_a[0], trace_a[1]);
    }

    #[test]
    fn test_perf_report() {
        let p = params().with_perf(true);
        let mut sim = RetinaSimulation::new(p.clone(), filter_graph(&p), pulse()).unwrap();
        let report = sim.run().unwrap();
        let perf = report.perf.unwrap();
        assert_eq!(perf.steps, 20);
        assert!(perf.max_step_ns >= perf.avg_step_ns);
    }

    #[test]
    fn test_run_fixed_step_smoke() {
        let p = params();
        let report = run_fixed_step(filter_graph(&p), pulse(), "tmp", 1.0, 10.0, Some(1234)).unwrap();
        assert_eq!(report.trials, 1);
        assert_eq!(report.steps_per_trial, 10);
        assert_eq!(report.final_output.len(), 6);
        assert!(report.final_output.iter().all(|v| *v > 0.0));
    }
}
