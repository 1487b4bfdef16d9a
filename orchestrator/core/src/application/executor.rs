// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Chain Executor
//!
//! Drives [`ChainExecution`]s one step at a time.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Collaborators:** `ChainRepository`, `ChainExecutionRepository`,
//!   `GuardService`, `AgentInvoker`, `LessonReporter`, `EventBus`
//!
//! # Single writer
//!
//! Every mutation of an execution happens while holding that execution's
//! lease (a `tokio::sync::Mutex` keyed by id). Concurrent `advance_step`
//! calls queue on the lease and re-read state once they get it, so a replay
//! of an already-advanced step is a no-op.
//!
//! `cancel_chain` never waits behind an in-flight agent call. If the lease is
//! busy the `cancel_requested` flag is persisted and the writer applies the
//! cancellation as soon as the running step has been recorded. A flag found on
//! a stored execution is honoured by the next advance, including after a
//! restart.
//!
//! Lease entries only live while some call holds or waits on them.

use crate::application::error::AtlasError;
use crate::application::guard::GuardService;
use crate::application::lesson_reporter::LessonReporter;
use crate::domain::chain::StepDefinition;
use crate::domain::events::ChainEvent;
use crate::domain::execution::{ChainExecution, ExecutionId, ExecutionStatus, StepCompletion};
use crate::domain::guard::{GuardContext, GuardDecision};
use crate::domain::lesson::{LessonReport, LessonType};
use crate::domain::policy::Severity;
use crate::domain::repository::{ChainExecutionRepository, ChainRepository};
use crate::domain::runtime::{AgentInvoker, InvocationRequest};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::input_template_engine::InputTemplateEngine;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const EXECUTOR_SOURCE: &str = "executor";

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Agent timeout for steps that declare none
    pub step_timeout: Duration,
    /// Guard domain for sensitive steps that declare none
    pub default_domain: String,
    pub record_lessons: bool,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(300),
            default_domain: "general".to_string(),
            record_lessons: true,
        }
    }
}

#[async_trait]
pub trait ChainExecutor: Send + Sync {
    /// Create an execution of `chain_name` positioned at step 0
    async fn start_chain(
        &self,
        chain_name: &str,
        input: Value,
        triggered_by: &str,
    ) -> Result<ChainExecution, AtlasError>;

    /// Run the current step. With `expected_step`, the call is a no-op unless
    /// the execution is still at that step.
    async fn advance_step(
        &self,
        id: ExecutionId,
        expected_step: Option<usize>,
    ) -> Result<ChainExecution, AtlasError>;

    async fn cancel_chain(&self, id: ExecutionId) -> Result<ChainExecution, AtlasError>;

    async fn approve_step(&self, id: ExecutionId, approved_by: &str) -> Result<ChainExecution, AtlasError>;

    async fn get_execution(&self, id: ExecutionId) -> Result<ChainExecution, AtlasError>;

    async fn list_executions(
        &self,
        chain_name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChainExecution>, AtlasError>;

    /// Advance until the execution is terminal or paused for approval
    async fn run_to_completion(&self, id: ExecutionId) -> Result<ChainExecution, AtlasError> {
        let mut execution = self.get_execution(id).await?;
        // One call per step plus one to observe a pause at the end
        for _ in 0..=execution.chain.len() {
            if execution.is_terminal() || execution.status == ExecutionStatus::Paused {
                break;
            }
            execution = self.advance_step(id, Some(execution.current_step_index)).await?;
        }
        Ok(execution)
    }
}

pub struct StandardChainExecutor {
    chains: Arc<dyn ChainRepository>,
    executions: Arc<dyn ChainExecutionRepository>,
    guard: Arc<dyn GuardService>,
    invoker: Arc<dyn AgentInvoker>,
    lesson_reporter: Option<Arc<dyn LessonReporter>>,
    event_bus: Arc<EventBus>,
    templates: InputTemplateEngine,
    settings: ExecutorSettings,
    leases: DashMap<ExecutionId, Arc<Mutex<()>>>,
    cancel_requests: DashSet<ExecutionId>,
}

impl StandardChainExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chains: Arc<dyn ChainRepository>,
        executions: Arc<dyn ChainExecutionRepository>,
        guard: Arc<dyn GuardService>,
        invoker: Arc<dyn AgentInvoker>,
        lesson_reporter: Option<Arc<dyn LessonReporter>>,
        event_bus: Arc<EventBus>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            chains,
            executions,
            guard,
            invoker,
            lesson_reporter,
            event_bus,
            templates: InputTemplateEngine::new(),
            settings,
            leases: DashMap::new(),
            cancel_requests: DashSet::new(),
        }
    }

    fn lease(&self, id: ExecutionId) -> Arc<Mutex<()>> {
        self.leases.entry(id).or_default().clone()
    }

    /// Drop the lease entry unless another caller still references it. The
    /// map and the caller's own clone account for two references.
    fn release_lease(&self, id: ExecutionId) {
        self.leases.remove_if(&id, |_, lease| Arc::strong_count(lease) <= 2);
    }

    /// Cancellation requested in this process or persisted while the step ran
    async fn take_cancel_request(&self, execution: &ChainExecution) -> Result<bool, AtlasError> {
        if self.cancel_requests.remove(&execution.id).is_some() || execution.cancel_requested {
            return Ok(true);
        }
        let stored = self.executions.find_by_id(execution.id).await?;
        Ok(stored.is_some_and(|e| e.cancel_requested))
    }

    async fn cancel_locked(&self, id: ExecutionId) -> Result<ChainExecution, AtlasError> {
        let mut execution = self.load(id).await?;
        execution.cancel()?;
        self.executions.save(&execution).await?;
        self.finish(&execution, None, false).await;
        Ok(execution)
    }

    /// Persist a cancellation for the writer that holds the lease
    async fn request_in_flight_cancel(&self, id: ExecutionId) -> Result<ChainExecution, AtlasError> {
        self.cancel_requests.insert(id);
        let stored = match self.executions.mark_cancel_requested(id).await {
            Ok(stored) => stored,
            Err(e) => {
                self.cancel_requests.remove(&id);
                return Err(e.into());
            }
        };
        let execution = match stored {
            Some(execution) => execution,
            None => {
                self.cancel_requests.remove(&id);
                return Err(AtlasError::NotFound(format!("execution {} not found", id)));
            }
        };

        match execution.status {
            // The writer already applied it
            ExecutionStatus::Cancelled => Ok(execution),
            status if execution.is_terminal() => {
                self.cancel_requests.remove(&id);
                Err(AtlasError::InvalidTransition(format!(
                    "cannot cancel execution {} in status {}",
                    id, status
                )))
            }
            _ => {
                info!(execution_id = %id, "Cancellation requested for in-flight execution");
                Ok(execution)
            }
        }
    }

    async fn load(&self, id: ExecutionId) -> Result<ChainExecution, AtlasError> {
        self.executions
            .find_by_id(id)
            .await?
            .ok_or_else(|| AtlasError::NotFound(format!("execution {} not found", id)))
    }

    fn guard_context(&self, step: &StepDefinition, execution: &ChainExecution) -> GuardContext {
        let domain = step
            .domain
            .clone()
            .unwrap_or_else(|| self.settings.default_domain.clone());
        let mut context = GuardContext::new(domain, step.agent_ref.clone());
        if let Some(Value::Object(evidence)) = execution.input.get("evidence") {
            for (key, value) in evidence {
                context.evidence.insert(key.clone(), value.clone());
            }
        }
        for (key, value) in &step.evidence {
            context.evidence.insert(key.clone(), value.clone());
        }
        context
    }

    fn publish(&self, event: ChainEvent) {
        self.event_bus.publish_chain_event(event);
    }

    fn publish_paused(&self, execution: &ChainExecution) {
        info!(
            execution_id = %execution.id,
            step = execution.current_step_index,
            "Execution paused awaiting approval"
        );
        self.publish(ChainEvent::ExecutionPaused {
            execution_id: execution.id,
            step_index: execution.current_step_index,
            paused_at: Utc::now(),
        });
    }

    /// Terminal bookkeeping: events, metrics, outcome lesson
    async fn finish(&self, execution: &ChainExecution, failed_step: Option<&StepDefinition>, blocked: bool) {
        let now = Utc::now();
        match execution.status {
            ExecutionStatus::Completed => {
                info!(
                    execution_id = %execution.id,
                    chain = %execution.chain_name,
                    total_cost = execution.total_cost,
                    "Chain execution completed"
                );
                self.publish(ChainEvent::ExecutionCompleted {
                    execution_id: execution.id,
                    total_cost: execution.total_cost,
                    total_duration_ms: execution.total_duration_ms,
                    completed_at: now,
                });
            }
            ExecutionStatus::Failed => {
                let reason = execution.failure_reason.clone().unwrap_or_default();
                warn!(execution_id = %execution.id, chain = %execution.chain_name, reason = %reason, "Chain execution failed");
                self.publish(ChainEvent::ExecutionFailed {
                    execution_id: execution.id,
                    reason,
                    failed_at: now,
                });
            }
            ExecutionStatus::Cancelled => {
                info!(execution_id = %execution.id, "Chain execution cancelled");
                self.publish(ChainEvent::ExecutionCancelled {
                    execution_id: execution.id,
                    cancelled_at: now,
                });
            }
            _ => return,
        }
        metrics::counter!("atlas_chain_executions_total", "status" => execution.status.as_str()).increment(1);

        self.cancel_requests.remove(&execution.id);
        self.report_outcome(execution, failed_step, blocked).await;
    }

    async fn report_outcome(&self, execution: &ChainExecution, failed_step: Option<&StepDefinition>, blocked: bool) {
        if !self.settings.record_lessons {
            return;
        }
        let Some(reporter) = &self.lesson_reporter else {
            return;
        };

        let report = match (execution.status, failed_step) {
            (ExecutionStatus::Completed, _) => LessonReport::new(
                LessonType::Success,
                self.settings.default_domain.clone(),
                format!("chain {} completed", execution.chain_name),
                EXECUTOR_SOURCE,
            )
            .context(format!("execution {} triggered by {}", execution.id, execution.triggered_by))
            .outcome(format!(
                "{} steps, cost {:.4}, {} ms",
                execution.chain.len(),
                execution.total_cost,
                execution.total_duration_ms
            ))
            .severity(Severity::Low),
            (ExecutionStatus::Failed, Some(step)) => LessonReport::new(
                LessonType::Failure,
                step.domain.clone().unwrap_or_else(|| self.settings.default_domain.clone()),
                format!("chain {} failed at step {}", execution.chain_name, step.name),
                EXECUTOR_SOURCE,
            )
            .context(format!(
                "execution {} step {} via agent '{}'",
                execution.id, execution.current_step_index, step.agent_ref
            ))
            .outcome(execution.failure_reason.clone().unwrap_or_default())
            .severity(if blocked { Severity::High } else { Severity::Medium }),
            _ => return,
        };

        if let Err(e) = reporter.report(report).await {
            warn!(execution_id = %execution.id, error = %e, "Failed to report chain outcome lesson");
        }
    }

    /// Save a step failure that happened before dispatch (template errors)
    async fn fail_before_dispatch(
        &self,
        mut execution: ChainExecution,
        step: &StepDefinition,
        error: String,
    ) -> Result<ChainExecution, AtlasError> {
        let index = execution.current_step_index;
        execution.fail_step(error.clone(), 0)?;
        self.executions.save(&execution).await?;
        metrics::counter!("atlas_chain_steps_total", "status" => "failed").increment(1);
        self.publish(ChainEvent::StepFailed {
            execution_id: execution.id,
            step_index: index,
            step_name: step.name.clone(),
            error,
            failed_at: Utc::now(),
        });
        self.finish(&execution, Some(step), false).await;
        Ok(execution)
    }

    async fn advance_locked(
        &self,
        id: ExecutionId,
        expected_step: Option<usize>,
    ) -> Result<ChainExecution, AtlasError> {
        let mut execution = self.load(id).await?;

        let cancel_pending = self.cancel_requests.remove(&id).is_some() || execution.cancel_requested;
        if cancel_pending && !execution.is_terminal() {
            execution.cancel()?;
            self.executions.save(&execution).await?;
            self.finish(&execution, None, false).await;
            return Ok(execution);
        }

        if execution.is_terminal() {
            debug!(execution_id = %id, status = %execution.status, "Advance on terminal execution ignored");
            return Ok(execution);
        }
        if expected_step.is_some_and(|expected| expected != execution.current_step_index) {
            debug!(execution_id = %id, "Step already advanced, ignoring replay");
            return Ok(execution);
        }

        match execution.status {
            ExecutionStatus::Paused => {
                let step = execution.current_step().map(|s| s.name.clone()).unwrap_or_default();
                return Err(AtlasError::InvalidTransition(format!(
                    "execution {} is paused awaiting approval of step '{}'",
                    id, step
                )));
            }
            ExecutionStatus::Pending => execution.start()?,
            _ => {}
        }

        if execution.awaiting_approval() {
            execution.pause_for_approval()?;
            self.executions.save(&execution).await?;
            self.publish_paused(&execution);
            return Ok(execution);
        }

        let index = execution.current_step_index;
        let step = execution
            .current_step()
            .cloned()
            .ok_or_else(|| AtlasError::Internal(format!("execution {} has no step {}", id, index)))?;

        let input = match self.templates.render_step_input(&step, &execution) {
            Ok(input) => input,
            Err(e) => return self.fail_before_dispatch(execution, &step, e.to_string()).await,
        };

        let mut decision: Option<GuardDecision> = None;
        if step.sensitive {
            let action = match self.templates.render_action(&step, &execution) {
                Ok(action) => action,
                Err(e) => return self.fail_before_dispatch(execution, &step, e.to_string()).await,
            };
            let context = self.guard_context(&step, &execution);
            let result = self.guard.check(&action, &context).await;

            if result.blocked {
                let reason = format!("step '{}' blocked by guard: {}", step.name, result.reason());
                execution.block_step(result.decision(), reason.clone())?;
                self.executions.save(&execution).await?;
                metrics::counter!("atlas_chain_steps_total", "status" => "blocked").increment(1);
                self.publish(ChainEvent::StepBlocked {
                    execution_id: id,
                    step_index: index,
                    step_name: step.name.clone(),
                    reason,
                    blocked_at: Utc::now(),
                });
                self.finish(&execution, Some(&step), true).await;
                return Ok(execution);
            }
            decision = Some(result.decision());
        }

        let resumed = execution.begin_step(Value::Object(input.clone()), decision)?;
        if resumed {
            info!(execution_id = %id, step = %step.name, "Re-dispatching step interrupted mid-flight");
        }
        self.executions.save(&execution).await?;

        let timeout = step.timeout.unwrap_or(self.settings.step_timeout);
        let request = InvocationRequest {
            agent_ref: step.agent_ref.clone(),
            input,
            execution_id: id.to_string(),
            step: step.name.clone(),
        };
        debug!(execution_id = %id, step = %step.name, agent = %step.agent_ref, "Dispatching step");
        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, self.invoker.invoke(request, timeout)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let step_event = match outcome {
            Ok(Ok(output)) => {
                let (cost, duration_ms) = (output.cost, output.duration_ms);
                execution.complete_step(StepCompletion {
                    output: output.output,
                    cost,
                    duration_ms,
                    tokens: output.tokens,
                })?;
                metrics::counter!("atlas_chain_steps_total", "status" => "completed").increment(1);
                metrics::histogram!("atlas_chain_step_duration_seconds").record(duration_ms as f64 / 1000.0);
                ChainEvent::StepCompleted {
                    execution_id: id,
                    step_index: index,
                    step_name: step.name.clone(),
                    cost,
                    duration_ms,
                    completed_at: Utc::now(),
                }
            }
            failure => {
                let error = match failure {
                    Ok(Err(e)) => e.to_string(),
                    _ => format!("agent '{}' timed out after {:?}", step.agent_ref, timeout),
                };
                warn!(execution_id = %id, step = %step.name, error = %error, "Step failed");
                execution.fail_step(error.clone(), elapsed_ms)?;
                metrics::counter!("atlas_chain_steps_total", "status" => "failed").increment(1);
                ChainEvent::StepFailed {
                    execution_id: id,
                    step_index: index,
                    step_name: step.name.clone(),
                    error,
                    failed_at: Utc::now(),
                }
            }
        };

        let mut paused = false;
        if !execution.is_terminal() {
            if self.take_cancel_request(&execution).await? {
                execution.cancel()?;
            } else if execution.awaiting_approval() {
                execution.pause_for_approval()?;
                paused = true;
            }
        }

        self.executions.save(&execution).await?;
        self.publish(step_event);
        if paused {
            self.publish_paused(&execution);
        }
        let failed_step = (execution.status == ExecutionStatus::Failed).then_some(&step);
        self.finish(&execution, failed_step, false).await;

        Ok(execution)
    }
}

#[async_trait]
impl ChainExecutor for StandardChainExecutor {
    async fn start_chain(
        &self,
        chain_name: &str,
        input: Value,
        triggered_by: &str,
    ) -> Result<ChainExecution, AtlasError> {
        let chain = self
            .chains
            .find_by_name(chain_name)
            .await?
            .ok_or_else(|| AtlasError::NotFound(format!("chain '{}' not found", chain_name)))?;

        // The execution carries its own copy of the chain
        let mut execution = ChainExecution::new(chain, input, triggered_by);
        self.executions.save(&execution).await?;

        execution.start()?;
        let paused = execution.awaiting_approval();
        if paused {
            execution.pause_for_approval()?;
        }
        self.executions.save(&execution).await?;

        info!(
            execution_id = %execution.id,
            chain = %chain_name,
            triggered_by = %triggered_by,
            "Chain execution started"
        );
        metrics::counter!("atlas_chain_executions_started_total").increment(1);
        self.publish(ChainEvent::ExecutionStarted {
            execution_id: execution.id,
            chain_name: execution.chain_name.clone(),
            triggered_by: execution.triggered_by.clone(),
            started_at: Utc::now(),
        });
        if paused {
            self.publish_paused(&execution);
        }
        Ok(execution)
    }

    async fn advance_step(
        &self,
        id: ExecutionId,
        expected_step: Option<usize>,
    ) -> Result<ChainExecution, AtlasError> {
        let lease = self.lease(id);
        let _guard = lease.lock().await;
        let result = self.advance_locked(id, expected_step).await;
        self.release_lease(id);
        result
    }

    async fn cancel_chain(&self, id: ExecutionId) -> Result<ChainExecution, AtlasError> {
        let lease = self.lease(id);
        let result = match lease.try_lock() {
            Ok(_guard) => self.cancel_locked(id).await,
            // A step is in flight; its writer applies the cancellation
            Err(_) => self.request_in_flight_cancel(id).await,
        };
        self.release_lease(id);
        result
    }

    async fn approve_step(&self, id: ExecutionId, approved_by: &str) -> Result<ChainExecution, AtlasError> {
        let lease = self.lease(id);
        let _guard = lease.lock().await;

        let result = async {
            let mut execution = self.load(id).await?;
            execution.approve(approved_by)?;
            self.executions.save(&execution).await?;

            info!(execution_id = %id, approved_by = %approved_by, "Step approved, execution resumed");
            self.publish(ChainEvent::ExecutionResumed {
                execution_id: id,
                approved_by: approved_by.to_string(),
                resumed_at: Utc::now(),
            });
            Ok::<_, AtlasError>(execution)
        }
        .await;
        self.release_lease(id);
        result
    }

    async fn get_execution(&self, id: ExecutionId) -> Result<ChainExecution, AtlasError> {
        self.load(id).await
    }

    async fn list_executions(
        &self,
        chain_name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChainExecution>, AtlasError> {
        let mut executions = match chain_name {
            Some(name) => self.executions.find_by_chain(name).await?,
            None => self.executions.find_recent(limit).await?,
        };
        executions.truncate(limit);
        Ok(executions)
    }
}
