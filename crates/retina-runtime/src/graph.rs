//! Retina graph: named modules joined by signed, typed connections
//!
//! The builder resolves every connection, classifies back edges of a
//! depth-first traversal as feedback, and fixes a topological evaluation
//! order over the remaining (feedforward) edges. Feedback edges read the
//! source's output from the previous step.

use crate::{
    error::*,
    grid::{Grid, GridShape},
    input::{ChannelSet, InputChannel},
    modules::{Module, ModuleKind, ModuleParams, PortInputs},
};
use smallvec::SmallVec;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Sign applied to a source before summation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    /// Added
    Plus,
    /// Subtracted
    Minus,
}

impl Sign {
    /// Multiplicative factor
    pub fn factor(&self) -> f64 {
        match self {
            Sign::Plus => 1.0,
            Sign::Minus => -1.0,
        }
    }
}

/// Kind of port a connection drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PortKind {
    /// Additive drive
    Current,
    /// Conductance with an associated reversal potential
    Conductance,
}

/// One term of a connection's source expression
#[derive(Debug, Clone, PartialEq)]
pub struct SignedSource {
    /// Module or input channel name
    pub name: String,
    /// Sign applied to the term
    pub sign: Sign,
}

impl SignedSource {
    /// Parse `"name"`, `"+name"` or `"-name"`
    pub fn parse(term: &str) -> Result<Self> {
        let term = term.trim();
        let (sign, name) = match term.strip_prefix('-') {
            Some(rest) => (Sign::Minus, rest),
            None => (Sign::Plus, term.strip_prefix('+').unwrap_or(term)),
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(RuntimeError::invalid_config(format!(
                "empty source term '{}'",
                term
            )));
        }
        Ok(Self {
            name: name.to_string(),
            sign,
        })
    }
}

/// `Connect` directive: signed sources summed into one port of a target
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    /// Summed source terms
    pub sources: SmallVec<[SignedSource; 2]>,
    /// Target module name
    pub target: String,
    /// Target port kind
    pub port: PortKind,
    /// Treat every edge of this connection as feedback
    pub feedback: bool,
}

impl Connection {
    /// Start a connection into `target`
    pub fn new(target: impl Into<String>, port: PortKind) -> Self {
        Self {
            sources: SmallVec::new(),
            target: target.into(),
            port,
            feedback: false,
        }
    }

    /// Build from source terms such as `["L_cones", "-M_cones"]`
    pub fn from_terms<S: AsRef<str>>(terms: &[S], target: impl Into<String>, port: PortKind) -> Result<Self> {
        let mut conn = Self::new(target, port);
        for term in terms {
            conn.sources.push(SignedSource::parse(term.as_ref())?);
        }
        Ok(conn)
    }

    /// Add a source with a `+` sign
    pub fn plus(mut self, name: impl Into<String>) -> Self {
        self.sources.push(SignedSource {
            name: name.into(),
            sign: Sign::Plus,
        });
        self
    }

    /// Add a source with a `-` sign
    pub fn minus(mut self, name: impl Into<String>) -> Self {
        self.sources.push(SignedSource {
            name: name.into(),
            sign: Sign::Minus,
        });
        self
    }

    /// Mark the connection as feedback
    pub fn as_feedback(mut self) -> Self {
        self.feedback = true;
        self
    }
}

/// How cycles in the module graph are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FeedbackPolicy {
    /// Back edges found by traversal become feedback
    #[default]
    Automatic,
    /// Only connections marked as feedback may close a cycle
    Explicit,
}

/// Where an edge reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRef {
    /// Input channel (always the current step)
    Channel(InputChannel),
    /// Module by declaration index
    Module(usize),
}

/// A resolved single-source edge
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    /// Source of the edge
    pub source: SourceRef,
    /// Target module index
    pub target: usize,
    /// Target port kind
    pub port: PortKind,
    /// Conductance port index (0 for Current)
    pub port_index: usize,
    /// `+1` or `-1`
    pub sign: f64,
    /// Reads the previous step's output
    pub feedback: bool,
}

#[derive(Debug, Clone)]
enum PendingModule {
    Built(ModuleKind),
    Tagged { type_tag: String, params: ModuleParams },
}

/// Builder for [`Graph`]
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    shape: GridShape,
    modules: Vec<(String, PendingModule)>,
    connections: Vec<Connection>,
    policy: FeedbackPolicy,
}

impl GraphBuilder {
    /// Start an empty graph over `shape`
    pub fn new(shape: GridShape) -> Self {
        Self {
            shape,
            modules: Vec::new(),
            connections: Vec::new(),
            policy: FeedbackPolicy::default(),
        }
    }

    /// Add an already constructed module
    pub fn add_module(mut self, name: impl Into<String>, module: ModuleKind) -> Self {
        self.modules.push((name.into(), PendingModule::Built(module)));
        self
    }

    /// Add a module from a type tag and parameter map (`Create`)
    pub fn create(
        mut self,
        type_tag: impl Into<String>,
        name: impl Into<String>,
        params: ModuleParams,
    ) -> Self {
        self.modules.push((
            name.into(),
            PendingModule::Tagged {
                type_tag: type_tag.into(),
                params,
            },
        ));
        self
    }

    /// Add a connection (`Connect`)
    pub fn connect(mut self, connection: Connection) -> Self {
        self.connections.push(connection);
        self
    }

    /// Select the cycle resolution policy
    pub fn with_feedback_policy(mut self, policy: FeedbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Resolve and validate the graph
    pub fn build(self) -> Result<Graph> {
        let mut index = HashMap::with_capacity(self.modules.len());
        let mut nodes = Vec::with_capacity(self.modules.len());

        for (name, pending) in self.modules {
            if name.is_empty() {
                return Err(RuntimeError::invalid_config("module name must not be empty"));
            }
            if InputChannel::from_name(&name).is_some() {
                return Err(RuntimeError::network_topology(format!(
                    "module name '{}' is reserved for an input channel",
                    name
                )));
            }
            if index.contains_key(&name) {
                return Err(RuntimeError::network_topology(format!(
                    "duplicate module name '{}'",
                    name
                )));
            }
            let module = match pending {
                PendingModule::Built(m) => m,
                PendingModule::Tagged { type_tag, params } => {
                    ModuleKind::from_params(&type_tag, &params, &self.shape)?
                }
            };
            if module.output().dimensions() != (self.shape.columns, self.shape.rows) {
                return Err(RuntimeError::dimension_mismatch(
                    (self.shape.columns, self.shape.rows),
                    module.output().dimensions(),
                ));
            }
            index.insert(name.clone(), nodes.len());
            nodes.push(Node {
                name,
                module,
                incoming: Vec::new(),
            });
        }

        let mut edges = resolve_edges(&self.connections, &index, &nodes)?;
        classify_feedback(&mut edges, &nodes, self.policy)?;
        let order = topological_order(&edges, nodes.len())?;

        for (i, edge) in edges.iter().enumerate() {
            nodes[edge.target].incoming.push(i);
        }

        let mut delayed: Vec<Option<Grid>> = vec![None; nodes.len()];
        for edge in edges.iter().filter(|e| e.feedback) {
            if let SourceRef::Module(src) = edge.source {
                delayed[src].get_or_insert_with(|| Grid::for_shape(&self.shape));
            }
        }

        let graph = Graph {
            scratch: PortInputs::new(&self.shape),
            shape: self.shape,
            nodes,
            index,
            edges,
            order,
            delayed,
        };

        log::debug!("Evaluation order: {}", graph.evaluation_order().join(" -> "));
        for (src, dst) in graph.feedback_edges() {
            log::debug!("Feedback edge: {} -> {}", src, dst);
        }

        Ok(graph)
    }
}

fn resolve_edges(
    connections: &[Connection],
    index: &HashMap<String, usize>,
    nodes: &[Node],
) -> Result<Vec<Edge>> {
    let mut edges = Vec::new();
    let mut current_used = vec![0usize; nodes.len()];
    let mut conductance_used = vec![0usize; nodes.len()];

    for conn in connections {
        if InputChannel::from_name(&conn.target).is_some() {
            return Err(RuntimeError::port_mismatch(
                conn.target.clone(),
                "input channels cannot be connection targets",
            ));
        }
        let target = *index
            .get(&conn.target)
            .ok_or_else(|| RuntimeError::module_not_found(conn.target.clone()))?;
        if conn.sources.is_empty() {
            return Err(RuntimeError::invalid_config(format!(
                "connection into '{}' has no sources",
                conn.target
            )));
        }

        let ports = nodes[target].module.ports();
        let port_index = match conn.port {
            PortKind::Current => {
                current_used[target] += 1;
                if let Some(limit) = ports.current {
                    if current_used[target] > limit {
                        return Err(RuntimeError::port_mismatch(
                            conn.target.clone(),
                            format!("more than {} Current connections", limit),
                        ));
                    }
                }
                0
            }
            PortKind::Conductance => {
                let k = conductance_used[target];
                if k >= ports.conductance {
                    return Err(RuntimeError::port_mismatch(
                        conn.target.clone(),
                        format!(
                            "{} declares {} Conductance port(s)",
                            nodes[target].module.type_tag(),
                            ports.conductance
                        ),
                    ));
                }
                conductance_used[target] += 1;
                k
            }
        };

        for term in &conn.sources {
            let source = match InputChannel::from_name(&term.name) {
                Some(channel) => SourceRef::Channel(channel),
                None => SourceRef::Module(
                    *index
                        .get(&term.name)
                        .ok_or_else(|| RuntimeError::module_not_found(term.name.clone()))?,
                ),
            };
            edges.push(Edge {
                source,
                target,
                port: conn.port,
                port_index,
                sign: term.sign.factor(),
                feedback: conn.feedback && matches!(source, SourceRef::Module(_)),
            });
        }
    }
    Ok(edges)
}

/// Mark back edges of a depth-first traversal as feedback.
///
/// Modules are visited in declaration order and outgoing edges in
/// connection order, so the classification is deterministic.
fn classify_feedback(edges: &mut [Edge], nodes: &[Node], policy: FeedbackPolicy) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        Active,
        Done,
    }

    let n = nodes.len();
    let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, e) in edges.iter().enumerate() {
        if let SourceRef::Module(src) = e.source {
            if !e.feedback {
                outgoing[src].push(i);
            }
        }
    }

    let mut marks = vec![Mark::Unvisited; n];
    for root in 0..n {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        // (node, next outgoing position)
        let mut stack = vec![(root, 0usize)];
        marks[root] = Mark::Active;
        while let Some(top) = stack.last_mut() {
            let node = top.0;
            let Some(&edge_idx) = outgoing[node].get(top.1) else {
                marks[node] = Mark::Done;
                stack.pop();
                continue;
            };
            top.1 += 1;
            let target = edges[edge_idx].target;
            match marks[target] {
                Mark::Unvisited => {
                    marks[target] = Mark::Active;
                    stack.push((target, 0));
                }
                Mark::Active => match policy {
                    FeedbackPolicy::Automatic => edges[edge_idx].feedback = true,
                    FeedbackPolicy::Explicit => {
                        return Err(RuntimeError::network_topology(format!(
                            "cycle through '{}' -> '{}' is not marked as feedback",
                            nodes[node].name, nodes[target].name
                        )))
                    }
                },
                Mark::Done => {}
            }
        }
    }
    Ok(())
}

/// Kahn's algorithm over feedforward edges, preferring declaration order
fn topological_order(edges: &[Edge], n: usize) -> Result<Vec<usize>> {
    let mut in_degree = vec![0usize; n];
    let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); n];
    for e in edges.iter().filter(|e| !e.feedback) {
        if let SourceRef::Module(src) = e.source {
            outgoing[src].push(e.target);
            in_degree[e.target] += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
        .filter(|&i| in_degree[i] == 0)
        .map(Reverse)
        .collect();
    let mut order = Vec::with_capacity(n);
    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for &t in &outgoing[i] {
            in_degree[t] -= 1;
            if in_degree[t] == 0 {
                ready.push(Reverse(t));
            }
        }
    }

    if order.len() != n {
        return Err(RuntimeError::network_topology(
            "feedforward edges contain a cycle",
        ));
    }
    Ok(order)
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    module: ModuleKind,
    /// Indices into `Graph::edges`
    incoming: Vec<usize>,
}

/// Built retina graph
#[derive(Debug, Clone)]
pub struct Graph {
    shape: GridShape,
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    edges: Vec<Edge>,
    order: Vec<usize>,
    /// Previous-step outputs of feedback sources
    delayed: Vec<Option<Grid>>,
    scratch: PortInputs,
}

impl Graph {
    /// Retina shape
    pub fn shape(&self) -> &GridShape {
        &self.shape
    }

    /// Number of modules
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the graph has no modules
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Module names in declaration order
    pub fn module_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    /// Declaration index of a module
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Module by name
    pub fn module(&self, name: &str) -> Option<&ModuleKind> {
        self.index_of(name).map(|i| &self.nodes[i].module)
    }

    /// Output of the module at `index`
    pub fn output_of(&self, index: usize) -> Option<&Grid> {
        self.nodes.get(index).map(|n| n.module.output())
    }

    /// Resolved edges
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Module names in evaluation order
    pub fn evaluation_order(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|&i| self.nodes[i].name.as_str())
            .collect()
    }

    /// `(source, target)` names of every feedback edge
    pub fn feedback_edges(&self) -> Vec<(&str, &str)> {
        self.edges
            .iter()
            .filter(|e| e.feedback)
            .filter_map(|e| match e.source {
                SourceRef::Module(src) => Some((
                    self.nodes[src].name.as_str(),
                    self.nodes[e.target].name.as_str(),
                )),
                SourceRef::Channel(_) => None,
            })
            .collect()
    }

    /// Restore trial-start state of every module
    pub fn reset(&mut self) {
        for node in &mut self.nodes {
            node.module.reset();
        }
    }

    /// Evaluate every module once
    pub fn step(&mut self, dt_ms: f64, time_ms: f64, channels: &ChannelSet) -> Result<()> {
        let Graph {
            shape,
            nodes,
            edges,
            order,
            delayed,
            scratch,
            ..
        } = self;

        for (slot, node) in delayed.iter_mut().zip(nodes.iter()) {
            if let Some(buf) = slot {
                buf.copy_from(node.module.output())?;
            }
        }

        for &i in order.iter() {
            accumulate(i, nodes, edges, delayed, channels, shape, scratch)?;

            let node = &mut nodes[i];
            node.module.step(dt_ms, scratch)?;
            if let Some((pixel, value)) = node.module.output().find_non_finite() {
                return Err(RuntimeError::NumericalError {
                    module: node.name.clone(),
                    time_ms,
                    pixel,
                    value,
                });
            }
        }
        Ok(())
    }
}

fn accumulate(
    target: usize,
    nodes: &[Node],
    edges: &[Edge],
    delayed: &[Option<Grid>],
    channels: &ChannelSet,
    shape: &GridShape,
    scratch: &mut PortInputs,
) -> Result<()> {
    let node = &nodes[target];
    scratch.current.fill(0.0);
    scratch
        .conductances
        .resize_with(node.module.ports().conductance, || Grid::for_shape(shape));
    scratch.conductances.iter_mut().for_each(|g| g.fill(0.0));

    for &e in &node.incoming {
        let edge = &edges[e];
        let source = match edge.source {
            SourceRef::Channel(channel) => channels.get(channel),
            SourceRef::Module(src) if edge.feedback => delayed[src].as_ref().ok_or_else(|| {
                RuntimeError::network_topology(format!(
                    "no delayed output kept for '{}'",
                    nodes[src].name
                ))
            })?,
            SourceRef::Module(src) => nodes[src].module.output(),
        };
        let port = match edge.port {
            PortKind::Current => &mut scratch.current,
            PortKind::Conductance => &mut scratch.conductances[edge.port_index],
        };
        port.add_scaled(source, edge.sign)?;
    }
    Ok(())
}
