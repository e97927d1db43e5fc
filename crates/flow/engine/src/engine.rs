//! Flow Engine: the main entry point for running a scenario
//!
//! The engine owns the scenario, one processor and one state per node,
//! the activity queue and the activity ledger. Each step it:
//! 1. Dequeues the earliest event and advances the logical clock
//! 2. Dispatches it to the target node's processor
//! 3. Applies the returned state, activities and events, or records an
//!    `error` activity and discards them when processing fails
//! 4. Routes successfully processed `Emit` events one tick later
//! 5. Runs the eligibility sweep
//!
//! Processors never see the queue or ledger. Everything the engine does is
//! reported through the injected [`TraceSink`].

use crate::config::{EngineConfig, RunLimits};
use crate::ledger::{ActivityLedger, JourneyStep, TokenQuery, TokenRecord};
use crate::processors::{build_processor, NodeProcessor, ProcessOutcome};
use crate::queue::ActivityQueue;
use crate::stats::{EngineStatus, NodeInfo, RunId, RunStats, StopReason};
use crate::trace::{TraceEvent, TraceSink, TracingSink};
use flow_types::{
    ActivityAction, ActivityRecord, CorrelationId, Event, EventId, EventKind, EventPayload,
    ExternalEvent, FlowError, FlowResult, NodeId, NodeKind, NodeState, ProcessingError, Scenario,
    Tick, Token, TriggerReason, ValidationReport, EXTERNAL_INPUT,
};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative stop and abort flags, shareable with other tasks
#[derive(Clone, Debug, Default)]
pub struct StopHandle {
    stop: Arc<AtomicBool>,
    abort: Arc<AtomicBool>,
}

impl StopHandle {
    /// Ask the current run to pause at the next loop boundary
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Ask the current run to abort at the next loop boundary
    pub fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn is_abort_requested(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.stop.store(false, Ordering::SeqCst);
        self.abort.store(false, Ordering::SeqCst);
    }
}

/// Deterministic single-run token-flow engine
pub struct FlowEngine {
    config: EngineConfig,
    trace: Arc<dyn TraceSink>,
    scenario: Option<Scenario>,
    processors: BTreeMap<NodeId, Box<dyn NodeProcessor>>,
    states: BTreeMap<NodeId, NodeState>,
    /// Eligibility sweep order: BFS from sources, then the rest
    sweep_order: Vec<NodeId>,
    /// Nodes with a queued `Eligible` trigger
    pending_triggers: BTreeSet<NodeId>,
    /// Nodes whose last trigger failed; skipped by the sweep until their
    /// next successfully processed event
    faulted: BTreeSet<NodeId>,
    queue: ActivityQueue,
    ledger: ActivityLedger,
    status: EngineStatus,
    run_id: Option<RunId>,
    start_tick: Tick,
    current_tick: Tick,
    steps: u64,
    processing_errors: usize,
    stop_reason: Option<StopReason>,
    stop: StopHandle,
}

impl std::fmt::Debug for FlowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowEngine")
            .field("status", &self.status)
            .field("run_id", &self.run_id)
            .field("current_tick", &self.current_tick)
            .field("steps", &self.steps)
            .field("pending_events", &self.queue.size())
            .field("activities", &self.ledger.len())
            .finish_non_exhaustive()
    }
}

impl Default for FlowEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl FlowEngine {
    /// Create an engine that reports through `tracing`
    pub fn new(config: EngineConfig) -> Self {
        let queue = Self::fresh_queue(&config);
        Self {
            config,
            trace: Arc::new(TracingSink),
            scenario: None,
            processors: BTreeMap::new(),
            states: BTreeMap::new(),
            sweep_order: Vec::new(),
            pending_triggers: BTreeSet::new(),
            faulted: BTreeSet::new(),
            queue,
            ledger: ActivityLedger::new(),
            status: EngineStatus::Uninitialized,
            run_id: None,
            start_tick: 0,
            current_tick: 0,
            steps: 0,
            processing_errors: 0,
            stop_reason: None,
            stop: StopHandle::default(),
        }
    }

    /// Replace the trace sink
    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace = sink;
        self
    }

    fn fresh_queue(config: &EngineConfig) -> ActivityQueue {
        if config.snapshot_history {
            ActivityQueue::new()
        } else {
            ActivityQueue::new().without_history()
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Validate `scenario`, compile its processors, build node states and
    /// seed `RunStart` for self-initializing kinds.
    ///
    /// Any configuration error aborts before anything is queued and leaves
    /// the engine uninitialized.
    pub fn initialize(&mut self, scenario: Scenario) -> FlowResult<()> {
        if self.status != EngineStatus::Uninitialized {
            return Err(self.lifecycle_error("uninitialized"));
        }
        scenario.validate()?;

        let mut processors = BTreeMap::new();
        let mut states = BTreeMap::new();
        for node in &scenario.nodes {
            let processor = build_processor(node)?;
            states.insert(node.id.clone(), processor.initialize_state(node));
            processors.insert(node.id.clone(), processor);
        }

        self.start_tick = self.config.start_time.resolve();
        self.current_tick = self.start_tick;
        self.sweep_order = sweep_order(&scenario);
        self.processors = processors;
        self.states = states;
        self.queue = Self::fresh_queue(&self.config);
        self.ledger.reset();
        self.pending_triggers.clear();
        self.faulted.clear();
        self.steps = 0;
        self.processing_errors = 0;
        self.stop_reason = None;
        self.stop.clear();

        let mut seeded = 0;
        for (id, processor) in &self.processors {
            if processor.kind().self_initializes() {
                self.queue
                    .enqueue(Event::run_start(self.start_tick, id.clone()));
                seeded += 1;
            }
        }

        self.trace.record(&TraceEvent::Initialized {
            nodes: scenario.nodes.len(),
            edges: scenario.edges.len(),
            seeded,
            start_tick: self.start_tick,
        });
        self.scenario = Some(scenario);
        self.run_id = Some(RunId::new());
        self.set_status(EngineStatus::Initialized);
        Ok(())
    }

    /// Queue an external event for a source node. The token's lineage is
    /// the external id; its timestamp is clamped to the current tick.
    pub fn inject(&mut self, external: ExternalEvent) -> FlowResult<EventId> {
        self.require_live()?;
        let scenario = self.scenario.as_ref().ok_or_else(|| self.lifecycle_error("initialized"))?;
        let node = scenario
            .node(&external.target_node_id)
            .ok_or_else(|| FlowError::NodeNotFound(external.target_node_id.clone()))?;
        if node.node_kind()? != NodeKind::Source {
            return Err(FlowError::NotASource(external.target_node_id.clone()));
        }

        let tick = external.timestamp.max(self.current_tick);
        let mut token = Token::new(external.payload, NodeId::new(EXTERNAL_INPUT), tick);
        if !external.id.is_empty() {
            token = token.with_correlation(CorrelationId::new(external.id.clone()));
        }
        let event = Event::token_arrival(
            tick,
            None,
            external.target_node_id.clone(),
            EXTERNAL_INPUT,
            token,
        )
        .with_metadata("externalId", external.id)
        .with_metadata("source", external.source)
        .with_metadata("kind", external.kind);

        let event_id = self.queue.enqueue(event);
        self.trace.record(&TraceEvent::Injected {
            event_id,
            node: external.target_node_id,
            tick,
        });
        if self.status == EngineStatus::Completed {
            self.stop_reason = None;
            self.set_status(EngineStatus::Paused);
        }
        Ok(event_id)
    }

    /// Process exactly one event. Returns `None` once the queue is empty,
    /// which completes the run.
    pub fn step(&mut self) -> FlowResult<Option<Event>> {
        self.require_live()?;
        if self.status == EngineStatus::Initialized {
            self.set_status(EngineStatus::Paused);
        }
        match self.advance() {
            Some(event) => Ok(Some(event)),
            None => {
                self.stop_reason = Some(StopReason::Drained);
                self.set_status(EngineStatus::Completed);
                Ok(None)
            }
        }
    }

    /// Step until the queue drains, a limit is reached, or a stop or abort
    /// is requested. Yields to the scheduler every `yield_every` steps and
    /// sleeps between steps in real-time mode.
    pub async fn run(&mut self, limits: RunLimits) -> FlowResult<RunStats> {
        self.require_live()?;
        self.set_status(EngineStatus::Running);
        self.stop_reason = None;

        let mut taken = 0u64;
        let reason = loop {
            if self.stop.is_abort_requested() {
                break StopReason::Aborted;
            }
            if self.stop.is_stop_requested() {
                break StopReason::Stopped;
            }
            if limits.max_steps.is_some_and(|max| taken >= max) {
                break StopReason::StepLimit;
            }
            match self.queue.peek() {
                None => break StopReason::Drained,
                Some(next) => {
                    if limits
                        .max_tick
                        .is_some_and(|max| next.timestamp.max(self.current_tick) > max)
                    {
                        break StopReason::TickLimit;
                    }
                }
            }

            self.advance();
            taken += 1;

            if self.config.yield_every > 0 && taken % self.config.yield_every == 0 {
                tokio::task::yield_now().await;
            }
            if let Some(delay) = self.config.real_time_delay() {
                tokio::time::sleep(delay).await;
            }
        };

        self.finish_run(reason);
        Ok(self.stats())
    }

    /// Run with the configured default limits
    pub async fn run_to_completion(&mut self) -> FlowResult<RunStats> {
        let limits = self.config.default_limits;
        self.run(limits).await
    }

    fn finish_run(&mut self, reason: StopReason) {
        let status = match reason {
            StopReason::Drained => EngineStatus::Completed,
            StopReason::Aborted => EngineStatus::Aborted,
            StopReason::StepLimit | StopReason::TickLimit | StopReason::Stopped => {
                EngineStatus::Paused
            }
        };
        if reason == StopReason::Stopped {
            self.stop.stop.store(false, Ordering::SeqCst);
        }
        self.stop_reason = Some(reason);
        self.set_status(status);
        self.trace.record(&TraceEvent::RunFinished {
            steps: self.steps,
            tick: self.current_tick,
            reason,
        });
    }

    /// Request a cooperative stop; the next `run` loop boundary pauses
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Handle for stopping or aborting a run from elsewhere
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Abort the run. Only `reset` leaves the aborted state.
    pub fn abort(&mut self) {
        if self.status == EngineStatus::Uninitialized || self.status == EngineStatus::Aborted {
            return;
        }
        self.stop.abort();
        self.stop_reason = Some(StopReason::Aborted);
        self.set_status(EngineStatus::Aborted);
    }

    /// Drop the scenario, node state, queue and ledger
    pub fn reset(&mut self) {
        self.scenario = None;
        self.processors.clear();
        self.states.clear();
        self.sweep_order.clear();
        self.pending_triggers.clear();
        self.faulted.clear();
        self.queue.clear();
        self.ledger.reset();
        self.run_id = None;
        self.start_tick = 0;
        self.current_tick = 0;
        self.steps = 0;
        self.processing_errors = 0;
        self.stop_reason = None;
        self.stop.clear();
        self.trace.record(&TraceEvent::Reset);
        self.set_status(EngineStatus::Uninitialized);
    }

    // ── Processing ───────────────────────────────────────────────────

    /// Dequeue and fully process one event
    fn advance(&mut self) -> Option<Event> {
        let event = self.queue.dequeue()?;
        self.current_tick = self.current_tick.max(event.timestamp);
        self.steps += 1;
        self.trace.record(&TraceEvent::Stepped {
            step: self.steps,
            tick: self.current_tick,
            event_id: event.id,
            kind: event.kind(),
            node: event.target_node_id.clone(),
        });

        if let EventPayload::ProcessingTrigger {
            reason: TriggerReason::Eligible,
        } = event.payload
        {
            self.pending_triggers.remove(&event.target_node_id);
        }

        match self.dispatch(&event) {
            Ok(outcome) => {
                self.faulted.remove(&event.target_node_id);
                self.apply(&event, outcome);
                if let EventPayload::Emit { output, token } = &event.payload {
                    self.route(&event, output, token);
                }
            }
            Err(err) => self.record_failure(&event, err),
        }

        self.sweep();
        self.queue.snapshot(self.steps, self.current_tick);
        Some(event)
    }

    fn dispatch(&self, event: &Event) -> Result<ProcessOutcome, ProcessingError> {
        let node = &event.target_node_id;
        let (Some(processor), Some(config), Some(state)) = (
            self.processors.get(node),
            self.scenario.as_ref().and_then(|s| s.node(node)),
            self.states.get(node),
        ) else {
            return Err(ProcessingError::NoProcessor(node.clone()));
        };
        processor.process(event, config, state)
    }

    fn apply(&mut self, event: &Event, outcome: ProcessOutcome) {
        self.states
            .insert(event.target_node_id.clone(), outcome.new_state);
        for record in outcome.activities {
            self.ledger.log(record);
        }
        for mut produced in outcome.new_events {
            produced.timestamp = produced.timestamp.max(self.current_tick);
            if produced.caused_by.is_none() {
                produced.caused_by = Some(event.id);
            }
            self.queue.enqueue(produced);
        }
    }

    /// Deliver a processed `Emit` to every destination of its output
    fn route(&mut self, emit: &Event, output: &str, token: &Token) {
        let Some(scenario) = self.scenario.as_ref() else {
            return;
        };
        let routes = scenario.routes_from(&emit.target_node_id, output);
        let arrival_tick = self.current_tick + 1;
        for route in &routes {
            let arrival = Event::token_arrival(
                arrival_tick,
                Some(emit.target_node_id.clone()),
                route.target_node_id.clone(),
                &route.target_input,
                token.clone(),
            )
            .with_cause(emit.id);
            self.queue.enqueue(arrival);
        }
        self.trace.record(&TraceEvent::Routed {
            from: emit.target_node_id.clone(),
            output: output.to_string(),
            destinations: routes.len(),
        });
    }

    /// Log a failed event as an `error` activity; its outcome is dropped
    fn record_failure(&mut self, event: &Event, err: ProcessingError) {
        self.processing_errors += 1;
        if matches!(event.payload, EventPayload::ProcessingTrigger { .. }) {
            self.faulted.insert(event.target_node_id.clone());
        }
        self.trace.record(&TraceEvent::ProcessingFailed {
            node: event.target_node_id.clone(),
            event_id: event.id,
            error: err.to_string(),
        });
        self.ledger.log(
            ActivityRecord::new(
                self.current_tick,
                event.target_node_id.clone(),
                ActivityAction::Error,
                json!({ "error": err.to_string(), "eventKind": event.kind().to_string() }),
            )
            .with_correlations(event.correlation_ids.clone()),
        );
    }

    /// Schedule a trigger for the next tick on every ready trigger-driven
    /// node that has none queued
    fn sweep(&mut self) {
        let next_tick = self.current_tick + 1;
        let mut ready = Vec::new();
        for id in &self.sweep_order {
            if self.pending_triggers.contains(id) || self.faulted.contains(id) {
                continue;
            }
            let (Some(processor), Some(config), Some(state)) = (
                self.processors.get(id),
                self.scenario.as_ref().and_then(|s| s.node(id)),
                self.states.get(id),
            ) else {
                continue;
            };
            if processor.fires_on_trigger() && processor.is_ready(config, state, self.current_tick)
            {
                ready.push(id.clone());
            }
        }

        for id in ready {
            self.queue.enqueue(Event::processing_trigger(
                next_tick,
                id.clone(),
                TriggerReason::Eligible,
            ));
            self.trace.record(&TraceEvent::Triggered {
                node: id.clone(),
                tick: next_tick,
            });
            self.pending_triggers.insert(id);
        }
    }

    // ── Inspection ───────────────────────────────────────────────────

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    pub fn current_tick(&self) -> Tick {
        self.current_tick
    }

    pub fn scenario(&self) -> Option<&Scenario> {
        self.scenario.as_ref()
    }

    pub fn queue(&self) -> &ActivityQueue {
        &self.queue
    }

    pub fn ledger(&self) -> &ActivityLedger {
        &self.ledger
    }

    pub fn stats(&self) -> RunStats {
        RunStats {
            run_id: self.run_id,
            status: self.status,
            is_running: self.status == EngineStatus::Running,
            steps: self.steps,
            start_tick: self.start_tick,
            current_tick: self.current_tick,
            events_processed: self.queue.processed_count(),
            events_enqueued: self.queue.total_count(),
            pending_events: self.queue.size(),
            activities_logged: self.ledger.len(),
            processing_errors: self.processing_errors,
            stop_reason: self.stop_reason,
        }
    }

    /// State, counters and pending work for one node
    pub fn node_info(&self, id: &NodeId) -> FlowResult<NodeInfo> {
        let (Some(processor), Some(state)) = (self.processors.get(id), self.states.get(id)) else {
            return Err(FlowError::NodeNotFound(id.clone()));
        };
        Ok(NodeInfo {
            id: id.clone(),
            kind: processor.kind(),
            state: state.clone(),
            counters: self.ledger.node_counters(id),
            pending_events: self.queue.events_for_node(id).len(),
            trigger_pending: self.pending_triggers.contains(id),
        })
    }

    pub fn find_tokens(&self, query: &TokenQuery) -> Vec<TokenRecord> {
        self.ledger.find_tokens(query)
    }

    pub fn token_journey(&self, id: &CorrelationId) -> Vec<JourneyStep> {
        self.ledger.token_journey(id)
    }

    /// Cross-check queue, ledger and engine bookkeeping. Never fatal.
    pub fn validate_state(&self) -> ValidationReport {
        let mut report = ValidationReport::new();
        let Some(scenario) = self.scenario.as_ref() else {
            if !self.queue.is_empty() || !self.ledger.is_empty() {
                report.push("engine", "uninitialized engine holds events or activities");
            }
            return report;
        };

        report.merge(self.queue.validate(scenario));
        report.merge(self.ledger.validate());

        for node in &scenario.nodes {
            let Some(state) = self.states.get(&node.id) else {
                report.push("engine", format!("node {} has no state", node.id));
                continue;
            };
            let emits = self
                .queue
                .events_for_node(&node.id)
                .into_iter()
                .filter(|e| e.kind() == EventKind::Emit)
                .count();
            if state.output_buffer.len() != emits {
                report.push(
                    "engine",
                    format!(
                        "node {} stages {} outputs but has {} emits queued",
                        node.id,
                        state.output_buffer.len(),
                        emits
                    ),
                );
            }
        }
        for id in &self.pending_triggers {
            let queued = self.queue.events_for_node(id).into_iter().any(|e| {
                matches!(
                    e.payload,
                    EventPayload::ProcessingTrigger {
                        reason: TriggerReason::Eligible
                    }
                )
            });
            if !queued {
                report.push("engine", format!("node {} marked pending but no trigger queued", id));
            }
        }
        if self.current_tick < self.start_tick {
            report.push(
                "engine",
                format!(
                    "clock {} is behind start tick {}",
                    self.current_tick, self.start_tick
                ),
            );
        }
        if let Some(last) = self.ledger.last() {
            if last.timestamp > self.current_tick {
                report.push(
                    "engine",
                    format!(
                        "ledger entry {} is ahead of the clock ({} > {})",
                        last.seq, last.timestamp, self.current_tick
                    ),
                );
            }
        }
        if let Some(next) = self.queue.peek() {
            if next.timestamp < self.current_tick {
                report.push(
                    "engine",
                    format!("{} is scheduled before the current tick", next.id),
                );
            }
        }
        report
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn set_status(&mut self, to: EngineStatus) {
        if self.status == to {
            return;
        }
        let from = self.status;
        self.status = to;
        self.trace.record(&TraceEvent::StatusChanged { from, to });
    }

    fn require_live(&self) -> FlowResult<()> {
        if self.status.is_live() {
            Ok(())
        } else {
            Err(self.lifecycle_error("initialized"))
        }
    }

    fn lifecycle_error(&self, expected: &'static str) -> FlowError {
        FlowError::InvalidLifecycle {
            expected,
            actual: self.status.to_string(),
        }
    }
}

/// Breadth-first from the sources in scenario order, then any node no
/// source reaches, also in scenario order
fn sweep_order(scenario: &Scenario) -> Vec<NodeId> {
    let mut order = Vec::with_capacity(scenario.nodes.len());
    let mut seen = BTreeSet::new();
    let mut frontier: VecDeque<&NodeId> = scenario
        .nodes
        .iter()
        .filter(|n| matches!(n.node_kind(), Ok(NodeKind::Source)))
        .map(|n| &n.id)
        .collect();

    while let Some(id) = frontier.pop_front() {
        if !seen.insert(id.clone()) {
            continue;
        }
        order.push(id.clone());
        for next in scenario.neighbors(id) {
            if !seen.contains(next) {
                frontier.push_back(next);
            }
        }
    }
    for node in &scenario.nodes {
        if seen.insert(node.id.clone()) {
            order.push(node.id.clone());
        }
    }
    order
}
