//! Workflow and step definitions.

use std::{
    collections::HashMap,
    fmt,
    sync::Arc,
};

use serde_json::Value;

use crate::{
    context::Context,
    document::DocumentStatus,
    error::{FlowError, Result},
    history::StepOutcome,
    retry::RetryPolicy,
    step::StepHandler,
};

/// Predicate over the run context.
pub type Predicate = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// A labelled context predicate used for step eligibility and edge guards.
#[derive(Clone)]
pub struct Guard {
    label: String,
    predicate: Predicate,
}

impl Guard {
    pub fn new<F>(label: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Holds when `key` is present in the context.
    pub fn has_key(key: &'static str) -> Self {
        Self::new(format!("has {key}"), move |ctx| ctx.contains(key))
    }

    /// Holds when `key` is present and equal to `value`.
    pub fn equals(key: &'static str, value: impl Into<Value>) -> Self {
        let value = value.into();
        Self::new(format!("{key} == {value}"), move |ctx| {
            ctx.get_raw(key) == Some(&value)
        })
    }

    /// Holds when `key` is absent or differs from `value`.
    pub fn not_equals(key: &'static str, value: impl Into<Value>) -> Self {
        let value = value.into();
        Self::new(format!("{key} != {value}"), move |ctx| {
            ctx.get_raw(key) != Some(&value)
        })
    }

    pub fn check(&self, ctx: &Context) -> bool {
        (self.predicate)(ctx)
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Guard").field(&self.label).finish()
    }
}

/// Where an edge leads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Step(String),
    End,
}

impl Target {
    pub fn step(name: impl Into<String>) -> Self {
        Self::Step(name.into())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step(name) => f.write_str(name),
            Self::End => f.write_str("<end>"),
        }
    }
}

/// Outgoing edge of a step, taken when the step ends with `trigger`.
#[derive(Debug, Clone)]
pub struct Edge {
    pub trigger: StepOutcome,
    pub guard: Option<Guard>,
    pub target: Target,
}

/// One step of a workflow.
#[derive(Clone)]
pub struct StepDefinition {
    name: String,
    handler: Arc<dyn StepHandler>,
    output_key: Option<String>,
    retry: Option<RetryPolicy>,
    fatal: bool,
    eligibility: Option<Guard>,
    marks_status: Option<DocumentStatus>,
    description: Option<String>,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, handler: Arc<dyn StepHandler>) -> Self {
        Self {
            name: name.into(),
            handler,
            output_key: None,
            retry: None,
            fatal: false,
            eligibility: None,
            marks_status: None,
            description: None,
        }
    }

    /// Context key the step's output is written under. Defaults to the step name.
    pub fn output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// Step-level retry policy, applied around the handler's own retries.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// A failure of a fatal step halts the run.
    pub fn fatal(mut self, fatal: bool) -> Self {
        self.fatal = fatal;
        self
    }

    /// Only run the step when `guard` holds; otherwise it is skipped.
    pub fn when(mut self, guard: Guard) -> Self {
        self.eligibility = Some(guard);
        self
    }

    /// Document status to set when the step succeeds.
    pub fn marks(mut self, status: DocumentStatus) -> Self {
        self.marks_status = Some(status);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> &Arc<dyn StepHandler> {
        &self.handler
    }

    pub fn key(&self) -> &str {
        self.output_key.as_deref().unwrap_or(&self.name)
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    pub fn eligibility(&self) -> Option<&Guard> {
        self.eligibility.as_ref()
    }

    pub fn marks_status(&self) -> Option<DocumentStatus> {
        self.marks_status
    }

    pub fn get_description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Outcomes this step can end with; each needs an outgoing edge.
    pub fn possible_outcomes(&self) -> Vec<StepOutcome> {
        let mut outcomes = vec![StepOutcome::Succeeded];
        if !self.fatal {
            outcomes.push(StepOutcome::Failed);
        }
        if self.eligibility.is_some() {
            outcomes.push(StepOutcome::Skipped);
        }
        outcomes
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("name", &self.name)
            .field("handler", &self.handler.name())
            .field("output_key", &self.key())
            .field("fatal", &self.fatal)
            .field("eligibility", &self.eligibility)
            .field("marks_status", &self.marks_status)
            .finish()
    }
}

/// A validated workflow graph.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    name: String,
    version: String,
    start: String,
    steps: Vec<StepDefinition>,
    index: HashMap<String, usize>,
    edges: HashMap<String, Vec<Edge>>,
}

impl WorkflowDefinition {
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.index.get(name).map(|&i| &self.steps[i])
    }

    /// Outgoing edges of `step`, in declaration order.
    pub fn edges_from(&self, step: &str) -> &[Edge] {
        self.edges.get(step).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Builder for constructing workflow definitions.
pub struct WorkflowBuilder {
    name: String,
    version: String,
    start: Option<String>,
    steps: Vec<StepDefinition>,
    edges: Vec<(String, Edge)>,
    fallthrough: HashMap<String, Target>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "1".to_string(),
            start: None,
            steps: Vec::new(),
            edges: Vec::new(),
            fallthrough: HashMap::new(),
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set the start step. Defaults to the first step added.
    pub fn start(mut self, step: impl Into<String>) -> Self {
        self.start = Some(step.into());
        self
    }

    pub fn step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    /// Add an unguarded edge.
    pub fn edge(mut self, from: impl Into<String>, trigger: StepOutcome, target: Target) -> Self {
        self.edges.push((
            from.into(),
            Edge {
                trigger,
                guard: None,
                target,
            },
        ));
        self
    }

    /// Add an edge taken only when `guard` holds.
    pub fn edge_when(
        mut self,
        from: impl Into<String>,
        trigger: StepOutcome,
        guard: Guard,
        target: Target,
    ) -> Self {
        self.edges.push((
            from.into(),
            Edge {
                trigger,
                guard: Some(guard),
                target,
            },
        ));
        self
    }

    /// Continue to `target` for every outcome of `from` that has no unguarded edge.
    pub fn then(mut self, from: impl Into<String>, target: Target) -> Self {
        self.fallthrough.insert(from.into(), target);
        self
    }

    /// Validate and build the definition.
    pub fn build(self) -> Result<WorkflowDefinition> {
        if self.steps.is_empty() {
            return Err(FlowError::configuration(format!(
                "workflow '{}' has no steps",
                self.name
            )));
        }

        let mut index = HashMap::new();
        for (i, step) in self.steps.iter().enumerate() {
            if index.insert(step.name.clone(), i).is_some() {
                return Err(FlowError::configuration(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }
            if let Some(policy) = &step.retry {
                policy.validate().map_err(|e| {
                    FlowError::configuration(format!("step '{}': {e}", step.name))
                })?;
            }
        }

        let start = self
            .start
            .unwrap_or_else(|| self.steps[0].name.clone());
        if !index.contains_key(&start) {
            return Err(FlowError::configuration(format!(
                "start step '{start}' is not defined"
            )));
        }

        let check_target = |from: &str, target: &Target| -> Result<()> {
            if let Target::Step(name) = target
                && !index.contains_key(name)
            {
                return Err(FlowError::configuration(format!(
                    "edge from '{from}' targets unknown step '{name}'"
                )));
            }
            Ok(())
        };

        let mut edges: HashMap<String, Vec<Edge>> = HashMap::new();
        for (from, edge) in self.edges {
            if !index.contains_key(&from) {
                return Err(FlowError::configuration(format!(
                    "edge declared from unknown step '{from}'"
                )));
            }
            check_target(&from, &edge.target)?;
            let existing = edges.entry(from.clone()).or_default();
            if edge.guard.is_none()
                && existing
                    .iter()
                    .any(|e| e.guard.is_none() && e.trigger == edge.trigger)
            {
                return Err(FlowError::configuration(format!(
                    "step '{from}' has more than one unguarded '{}' edge",
                    edge.trigger
                )));
            }
            existing.push(edge);
        }

        for (from, target) in self.fallthrough {
            if !index.contains_key(&from) {
                return Err(FlowError::configuration(format!(
                    "edge declared from unknown step '{from}'"
                )));
            }
            check_target(&from, &target)?;
            let existing = edges.entry(from).or_default();
            for trigger in [
                StepOutcome::Succeeded,
                StepOutcome::Failed,
                StepOutcome::Skipped,
            ] {
                if !existing
                    .iter()
                    .any(|e| e.guard.is_none() && e.trigger == trigger)
                {
                    existing.push(Edge {
                        trigger,
                        guard: None,
                        target: target.clone(),
                    });
                }
            }
        }

        for step in &self.steps {
            let outgoing = edges.get(&step.name).map(Vec::as_slice).unwrap_or(&[]);
            // Guards may all fail at runtime, so each outcome needs an unguarded fallback.
            for outcome in step.possible_outcomes() {
                if !outgoing
                    .iter()
                    .any(|e| e.guard.is_none() && e.trigger == outcome)
                {
                    let guarded = outgoing.iter().any(|e| e.trigger == outcome);
                    return Err(FlowError::configuration(format!(
                        "step '{}' has no {}edge for outcome '{outcome}'",
                        step.name,
                        if guarded { "unguarded " } else { "" }
                    )));
                }
            }
        }

        // Acyclic with an edge for every outcome means every path ends at End.
        check_acyclic(&self.steps, &edges)?;

        Ok(WorkflowDefinition {
            name: self.name,
            version: self.version,
            start,
            steps: self.steps,
            index,
            edges,
        })
    }
}

fn successors<'a>(edges: &'a HashMap<String, Vec<Edge>>, step: &str) -> impl Iterator<Item = &'a str> {
    edges
        .get(step)
        .into_iter()
        .flatten()
        .filter_map(|e| match &e.target {
            Target::Step(name) => Some(name.as_str()),
            Target::End => None,
        })
}

fn check_acyclic(steps: &[StepDefinition], edges: &HashMap<String, Vec<Edge>>) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        step: &'a str,
        edges: &'a HashMap<String, Vec<Edge>>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> Result<()> {
        match marks.get(step) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                return Err(FlowError::configuration(format!(
                    "cycle detected through step '{step}'"
                )));
            }
            None => {}
        }
        marks.insert(step, Mark::Visiting);
        for next in successors(edges, step) {
            visit(next, edges, marks)?;
        }
        marks.insert(step, Mark::Done);
        Ok(())
    }

    let mut marks = HashMap::new();
    for step in steps {
        visit(&step.name, edges, &mut marks)?;
    }
    Ok(())
}
