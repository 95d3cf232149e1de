//! DAG engine: validation, fan-out dispatch over the bus, and ordered
//! close on shutdown.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, gauge};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{CdpError, Result};
use crate::event::Event;
use crate::pattern::{self, Pattern};
use crate::pipeline::RESERVED_INPUT_NAME;
use crate::queue::Queue;
use crate::step::{FunctionMode, PatternMode, StepDef, TumblingWindow, Window};

/// The step function adapter contract: consumes a batch, yields a
/// (possibly empty, possibly multi-element) sequence of events. Built-in
/// functions live in `cdp-tx`; sink and processor-bridged functions live in
/// `cdp-io`. The DAG engine only depends on this trait, not on any concrete
/// implementation, so the two downstream crates stay free to depend on
/// `cdp-core` without a cycle.
#[async_trait]
pub trait StepFunction: Send + Sync {
    async fn apply(&self, batch: Vec<Event>) -> Vec<Event>;
}

/// Everything the engine needs to drive one step, beyond its position in the
/// graph: the resolved pattern filter, window shape, and function.
pub struct StepRuntimeSpec {
    pub pattern: Option<(Pattern, PatternMode)>,
    pub window: Option<Window>,
    pub mode: FunctionMode,
    pub function: Arc<dyn StepFunction>,
}

const INPUT_ID: i64 = -1;

/// Validates uniqueness, dangling references, and acyclicity. On a cycle,
/// reports one offending cycle's node names joined by `-->`.
pub fn validate_graph(steps: &HashMap<String, StepDef>) -> Result<()> {
    for name in steps.keys() {
        if name == RESERVED_INPUT_NAME {
            return Err(CdpError::ReservedStepName(name.clone()));
        }
    }
    for (name, step) in steps {
        for dep in &step.after {
            if dep != RESERVED_INPUT_NAME && !steps.contains_key(dep) {
                return Err(CdpError::DanglingReference {
                    step: name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }
    if let Some(cycle) = detect_cycle(steps) {
        return Err(CdpError::CycleDetected(cycle.join("-->")));
    }
    Ok(())
}

/// Builds a `step --after--> dependency` graph and looks for a non-trivial
/// strongly connected component, i.e. a cycle. `tarjan_scc` runs in one pass
/// and, unlike a topological sort, hands back the whole offending component
/// rather than just flagging that one exists.
fn detect_cycle(steps: &HashMap<String, StepDef>) -> Option<Vec<String>> {
    let mut graph = petgraph::graph::DiGraph::<&str, ()>::new();
    let mut index_of = HashMap::new();
    for name in steps.keys() {
        index_of.insert(name.as_str(), graph.add_node(name.as_str()));
    }
    for (name, step) in steps {
        let from = index_of[name.as_str()];
        for dep in &step.after {
            if dep != RESERVED_INPUT_NAME {
                if let Some(&to) = index_of.get(dep.as_str()) {
                    graph.add_edge(from, to, ());
                }
            }
        }
    }

    for scc in petgraph::algo::tarjan_scc(&graph) {
        let is_cycle = scc.len() > 1 || graph.contains_edge(scc[0], scc[0]);
        if is_cycle {
            return Some(scc.iter().map(|&idx| graph[idx].to_string()).collect());
        }
    }
    None
}

enum WindowState {
    Sliding(crate::step::SlidingWindow),
    Tumbling(TumblingWindow),
    /// No window configured: every event is its own one-element batch.
    None,
}

struct Step {
    id: i64,
    name: String,
    input_queue: Arc<Queue<Event>>,
    forward_targets: Vec<i64>,
    driver: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// The running DAG: the bus, every step's queue, and the dispatcher.
pub struct Engine {
    pipeline_name: String,
    bus: Arc<Queue<(i64, Event)>>,
    steps: HashMap<i64, Arc<Step>>,
    name_to_id: HashMap<String, i64>,
    dead_letters: Arc<Mutex<Vec<Event>>>,
    drain_grace: Duration,
    dispatcher: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Assembles the graph, instantiates every step's channel, wires the
    /// bus, and starts the dispatcher. `specs` must contain one entry per
    /// name in `step_defs`.
    pub fn build(
        pipeline_name: String,
        step_defs: &HashMap<String, StepDef>,
        mut specs: HashMap<String, StepRuntimeSpec>,
        drain_grace: Duration,
    ) -> Result<Arc<Self>> {
        validate_graph(step_defs)?;

        let mut name_to_id = HashMap::new();
        for (i, name) in step_defs.keys().enumerate() {
            name_to_id.insert(name.clone(), i as i64);
        }

        let mut forward: HashMap<i64, Vec<i64>> = HashMap::new();
        for (name, def) in step_defs {
            let id = name_to_id[name];
            if def.after.is_empty() {
                forward.entry(INPUT_ID).or_default().push(id);
            }
            for dep in &def.after {
                let dep_id = if dep == RESERVED_INPUT_NAME {
                    INPUT_ID
                } else {
                    name_to_id[dep]
                };
                forward.entry(dep_id).or_default().push(id);
            }
        }

        let bus = Queue::new(format!("{pipeline_name}::bus"));
        let dead_letters = Arc::new(Mutex::new(Vec::new()));
        let mut steps = HashMap::new();

        for (name, def) in step_defs {
            let id = name_to_id[name];
            let spec = specs
                .remove(name)
                .ok_or_else(|| CdpError::InvalidTemplate(format!("missing runtime spec for step '{name}'")))?;
            let input_queue = Queue::new(format!("{pipeline_name}::{name}"));
            let forward_targets = forward.get(&id).cloned().unwrap_or_default();
            let is_terminal = forward_targets.is_empty();

            let driver = spawn_step_driver(
                id,
                name.clone(),
                is_terminal,
                input_queue.clone(),
                spec,
                bus.clone(),
                dead_letters.clone(),
            );

            steps.insert(
                id,
                Arc::new(Step {
                    id,
                    name: name.clone(),
                    input_queue,
                    forward_targets,
                    driver: std::sync::Mutex::new(Some(driver)),
                }),
            );
        }

        let engine = Arc::new(Self {
            pipeline_name,
            bus,
            steps,
            name_to_id,
            dead_letters,
            drain_grace,
            dispatcher: std::sync::Mutex::new(None),
        });

        let dispatcher = spawn_dispatcher(engine.clone(), forward);
        *engine.dispatcher.lock().unwrap() = Some(dispatcher);

        Ok(engine)
    }

    /// Feeds one event from the input adapter onto the bus under `$input`.
    pub async fn feed_input(&self, event: Event) -> bool {
        let ok = self.bus.push((INPUT_ID, event.clone())).await;
        if ok {
            counter!("pipeline_events_total", "flow" => "in").increment(1);
        } else {
            counter!("dead_events").increment(1);
            self.dead_letters.lock().await.push(event);
        }
        ok
    }

    pub fn bus_depth(&self) -> usize {
        self.bus.len()
    }

    pub fn queued_events(&self) -> usize {
        let total = self.bus.len() + self.steps.values().map(|s| s.input_queue.len()).sum::<usize>();
        gauge!("queued_events").set(total as f64);
        total
    }

    /// Topological close from leaves (deepest dependents) to roots, per
    /// Repeatedly close steps whose dependents are all already
    /// closed, pausing `drain_grace` between rounds.
    pub async fn shutdown(&self) -> Vec<Event> {
        info!(pipeline = %self.pipeline_name, "closing bus to new input");
        self.bus.close().await;

        let mut closed: HashSet<i64> = HashSet::new();
        loop {
            let closable: Vec<i64> = self
                .steps
                .values()
                .filter(|s| !closed.contains(&s.id))
                .filter(|s| s.forward_targets.iter().all(|t| closed.contains(t)))
                .map(|s| s.id)
                .collect();
            if closable.is_empty() {
                break;
            }
            for id in closable {
                let step = &self.steps[&id];
                info!(pipeline = %self.pipeline_name, step = %step.name, "closing step");
                step.input_queue.close().await;
                step.input_queue.wait_drained().await;
                let handle = step.driver.lock().unwrap().take();
                if let Some(handle) = handle {
                    let _ = handle.await;
                }
                closed.insert(id);
            }
            if closed.len() < self.steps.len() {
                tokio::time::sleep(self.drain_grace).await;
            }
        }

        self.bus.wait_drained().await;
        let dispatcher = self.dispatcher.lock().unwrap().take();
        if let Some(handle) = dispatcher {
            let _ = handle.await;
        }

        self.dead_letters.lock().await.drain(..).collect()
    }

    pub fn step_id(&self, name: &str) -> Option<i64> {
        self.name_to_id.get(name).copied()
    }
}

fn spawn_dispatcher(engine: Arc<Engine>, forward: HashMap<i64, Vec<i64>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some((src, ev)) = engine.bus.receive().await {
            let targets = forward.get(&src).cloned().unwrap_or_default();
            for tgt in targets {
                if let Some(step) = engine.steps.get(&tgt) {
                    if step.input_queue.push(ev.clone()).await {
                        counter!("step_events_total", "step" => step.name.clone(), "flow" => "in")
                            .increment(1);
                    } else {
                        counter!("dead_events").increment(1);
                        engine.dead_letters.lock().await.push(ev.clone());
                    }
                }
            }
        }
    })
}

#[allow(clippy::too_many_arguments)]
fn spawn_step_driver(
    id: i64,
    name: String,
    is_terminal: bool,
    input_queue: Arc<Queue<Event>>,
    spec: StepRuntimeSpec,
    bus: Arc<Queue<(i64, Event)>>,
    dead_letters: Arc<Mutex<Vec<Event>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!(step = %name, "step driver started");
        let mut window_state = match spec.window {
            Some(w) if w.events == 1 => WindowState::None,
            Some(w) => match spec.mode {
                FunctionMode::Flatmap => {
                    WindowState::Sliding(crate::step::SlidingWindow::new(w.events))
                }
                FunctionMode::Reduce => WindowState::Tumbling(TumblingWindow::new(w.events)),
            },
            None => WindowState::None,
        };
        let window_seconds = spec.window.map(|w| w.seconds).unwrap_or(f64::INFINITY);
        let timer_relevant = matches!(window_state, WindowState::Tumbling(_))
            && window_seconds.is_finite();
        let window_duration = if timer_relevant {
            Duration::from_secs_f64(window_seconds)
        } else {
            Duration::from_secs(0)
        };

        // The deadline for a tumbling batch is armed once, when its first
        // event lands, and held across loop iterations until the batch
        // flushes by count or by this same timer firing. Rebuilding the
        // sleep on every iteration (as a bare `tokio::time::sleep(...)` in
        // the `select!` would) turns it into an idle-gap timeout instead of
        // a deadline anchored to batch start.
        let deadline = tokio::time::sleep(window_duration);
        tokio::pin!(deadline);
        let mut timer_armed = false;

        loop {
            let next = if timer_relevant {
                tokio::select! {
                    ev = input_queue.receive() => Received::Event(ev),
                    _ = &mut deadline, if timer_armed => Received::Timeout,
                }
            } else {
                Received::Event(input_queue.receive().await)
            };

            match next {
                Received::Event(None) => break,
                Received::Event(Some(ev)) => {
                    let pass_through = match &spec.pattern {
                        Some((p, PatternMode::Pass)) => !pattern::matches(&ev.name, p),
                        Some((p, PatternMode::Drop)) => pattern::matches(&ev.name, p),
                        None => false,
                    };
                    if pass_through {
                        publish(&bus, &dead_letters, id, &name, is_terminal, ev).await;
                        continue;
                    }
                    match &mut window_state {
                        WindowState::Sliding(w) => {
                            let batch = w.push(ev);
                            let out = spec.function.apply(batch).await;
                            for oe in out {
                                publish(&bus, &dead_letters, id, &name, is_terminal, oe).await;
                            }
                        }
                        WindowState::Tumbling(w) => {
                            let starting_batch = w.is_empty();
                            if let Some(batch) = w.push(ev) {
                                timer_armed = false;
                                let out = spec.function.apply(batch).await;
                                for oe in out {
                                    publish(&bus, &dead_letters, id, &name, is_terminal, oe).await;
                                }
                            } else if starting_batch && timer_relevant {
                                deadline
                                    .as_mut()
                                    .reset(tokio::time::Instant::now() + window_duration);
                                timer_armed = true;
                            }
                        }
                        WindowState::None => {
                            let out = spec.function.apply(vec![ev]).await;
                            for oe in out {
                                publish(&bus, &dead_letters, id, &name, is_terminal, oe).await;
                            }
                        }
                    }
                }
                Received::Timeout => {
                    timer_armed = false;
                    if let WindowState::Tumbling(w) = &mut window_state {
                        if let Some(batch) = w.flush() {
                            let out = spec.function.apply(batch).await;
                            for oe in out {
                                publish(&bus, &dead_letters, id, &name, is_terminal, oe).await;
                            }
                        }
                    }
                }
            }
        }

        // Input closed: emit the sliding-window tail, or the tumbling
        // window's partial batch.
        match window_state {
            WindowState::Sliding(w) => {
                for batch in w.drain_tail() {
                    let out = spec.function.apply(batch).await;
                    for oe in out {
                        publish(&bus, &dead_letters, id, &name, is_terminal, oe).await;
                    }
                }
            }
            WindowState::Tumbling(mut w) => {
                if let Some(batch) = w.flush() {
                    let out = spec.function.apply(batch).await;
                    for oe in out {
                        publish(&bus, &dead_letters, id, &name, is_terminal, oe).await;
                    }
                }
            }
            WindowState::None => {}
        }
        tracing::debug!(step = %name, "step driver finished");
    })
}

enum Received {
    Event(Option<Event>),
    Timeout,
}

async fn publish(
    bus: &Arc<Queue<(i64, Event)>>,
    dead_letters: &Arc<Mutex<Vec<Event>>>,
    id: i64,
    name: &str,
    is_terminal: bool,
    ev: Event,
) {
    if bus.push((id, ev.clone())).await {
        counter!("step_events_total", "step" => name.to_string(), "flow" => "out").increment(1);
        if is_terminal {
            counter!("pipeline_events_total", "flow" => "out").increment(1);
        }
    } else {
        warn!("dead-lettering event: bus closed");
        counter!("dead_events").increment(1);
        dead_letters.lock().await.push(ev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(after: Vec<&str>) -> StepDef {
        serde_json::from_value(serde_json::json!({
            "after": after,
            "reduce": {"send-dead-letter": {}}
        }))
        .unwrap()
    }

    #[test]
    fn rejects_reserved_step_name() {
        let mut steps = HashMap::new();
        steps.insert("$input".to_string(), step(vec![]));
        assert!(validate_graph(&steps).is_err());
    }

    #[test]
    fn rejects_dangling_reference() {
        let mut steps = HashMap::new();
        steps.insert("a".to_string(), step(vec!["missing"]));
        assert!(validate_graph(&steps).is_err());
    }

    #[test]
    fn rejects_cycles_and_reports_one() {
        let mut steps = HashMap::new();
        steps.insert("a".to_string(), step(vec!["b"]));
        steps.insert("b".to_string(), step(vec!["a"]));
        let err = validate_graph(&steps).unwrap_err();
        assert!(matches!(err, CdpError::CycleDetected(_)));
    }

    #[test]
    fn accepts_acyclic_graph() {
        let mut steps = HashMap::new();
        steps.insert("a".to_string(), step(vec![]));
        steps.insert("b".to_string(), step(vec!["a"]));
        assert!(validate_graph(&steps).is_ok());
    }

    fn ev(n: i64) -> Event {
        Event::new(
            "e".to_string(),
            serde_json::json!(n),
            vec![crate::event::TracePoint {
                i: n,
                p: "p".into(),
                h: "h".into(),
            }],
        )
    }

    struct RecordBatchSizes(std::sync::Mutex<Vec<usize>>);

    #[async_trait]
    impl StepFunction for RecordBatchSizes {
        async fn apply(&self, batch: Vec<Event>) -> Vec<Event> {
            self.0.lock().unwrap().push(batch.len());
            Vec::new()
        }
    }

    /// Regression test for the step driver's tumbling-window deadline: it
    /// must be armed once, on the batch's first event, and held across
    /// subsequent events, not rebuilt as a fresh idle-gap timeout on every
    /// receive. `tumbling_window_ceil_division_batch_count` in `step.rs`
    /// exercises `TumblingWindow` directly and would not have caught this,
    /// since the bug lived in this driver loop, not the window itself.
    #[tokio::test(start_paused = true)]
    async fn tumbling_window_deadline_is_anchored_to_batch_start() {
        let recorder = Arc::new(RecordBatchSizes(std::sync::Mutex::new(Vec::new())));
        let input_queue = Queue::new("test::tumbling-deadline");
        let bus = Queue::new("test::tumbling-deadline::bus");
        let dead_letters = Arc::new(Mutex::new(Vec::new()));

        let spec = StepRuntimeSpec {
            pattern: None,
            window: Some(Window {
                events: 5,
                seconds: 1.0,
            }),
            mode: FunctionMode::Reduce,
            function: recorder.clone(),
        };

        let handle = spawn_step_driver(
            0,
            "deadline-test".to_string(),
            true,
            input_queue.clone(),
            spec,
            bus,
            dead_letters,
        );

        // First event of the batch arrives at t=0, arming a one-second
        // deadline. The second arrives at t=0.6s, well inside that window;
        // under the old fresh-sleep-per-iteration bug this would have
        // pushed the timeout out to t=1.6s instead of leaving it at t=1.0s.
        input_queue.push(ev(1)).await;
        tokio::time::advance(Duration::from_millis(600)).await;
        input_queue.push(ev(2)).await;

        // Advancing past t=1.0s should fire the original deadline and flush
        // the two-event partial batch, well before a third event arrives.
        tokio::time::advance(Duration::from_millis(500)).await;
        input_queue.push(ev(3)).await;

        input_queue.close().await;
        let _ = handle.await;

        assert_eq!(recorder.0.lock().unwrap().clone(), vec![2, 1]);
    }
}
