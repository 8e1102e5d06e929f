//! Pipeline driver (§4.11): the single loop that ties every subsystem
//! together. Each iteration: check shutdown, check budget, dispatch the
//! current phase, persist state. Repeats until `complete` or `failed`.
//!
//! Grounded on `main.rs`'s `run_orchestrator` top-level loop shape (phase
//! iteration, no approval gate here since the CLI is non-interactive) and
//! `factory::pipeline::PipelineRunner::start_run`'s spawn-track-finalize
//! structure.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, info_span, warn};

use crate::collaborators::architect::Architect;
use crate::collaborators::contracts::ContractEngine;
use crate::collaborators::graph_rag::GraphRag;
use crate::config::Config;
use crate::cost::{BudgetStatus, CostTracker};
use crate::error::PipelineError;
use crate::fixpass::{self, FixPassConfig};
use crate::gate::run_gate;
use crate::integration::{DockerHarness, run_integration};
use crate::models::{Phase, PipelineState, Trigger};
use crate::scheduler::builder::{BuilderConfig, run_builder};
use crate::scheduler::context::resolve_context;
use crate::scheduler::{materialize_builder_input, register_contracts, run_builders};
use crate::shutdown::ShutdownCoordinator;
use crate::state::advance;
use crate::store;

pub struct Driver {
    config: Config,
    state: Arc<Mutex<PipelineState>>,
    cost: CostTracker,
    shutdown: ShutdownCoordinator,
    prd: String,
    context_file: Option<PathBuf>,
}

impl Driver {
    pub fn new(config: Config, prd: String, context_file: Option<PathBuf>) -> Self {
        let state = PipelineState::new(config.budget_limit);
        let cost = CostTracker::new(config.budget_limit);
        Self {
            config,
            state: Arc::new(Mutex::new(state)),
            cost,
            shutdown: ShutdownCoordinator::new(),
            prd,
            context_file,
        }
    }

    pub fn resume(config: Config, state: PipelineState, prd: String) -> Self {
        let cost = CostTracker::new(config.budget_limit);
        Self {
            config,
            state: Arc::new(Mutex::new(state)),
            cost,
            shutdown: ShutdownCoordinator::new(),
            prd,
            context_file: None,
        }
    }

    async fn persist(&self) -> Result<(), PipelineError> {
        let state = self.state.lock().await;
        store::write_atomic(&self.config.state_path(), &*state).map_err(PipelineError::from)
    }

    /// Override the current phase, used by `integrate`/`verify` to re-enter
    /// the loop partway through against previously-persisted state. Callers
    /// always invoke this before `run`/`run_until` starts its loop, so the
    /// state mutex is never contended here.
    pub fn force_phase(&mut self, phase: Phase) {
        self.state
            .try_lock()
            .expect("state is uncontended before run/run_until starts")
            .phase = phase;
    }

    /// Run the driver loop until `Complete` or `Failed`.
    pub async fn run(self) -> Result<PipelineState, PipelineError> {
        self.run_until(Phase::Complete).await
    }

    /// Run the driver loop until `target` phase is reached (inclusive) or
    /// the pipeline lands on `Complete`/`Failed`, whichever comes first.
    /// Installs the shutdown coordinator's emergency save on first entry, so
    /// a Ctrl-C mid-phase still leaves `PIPELINE_STATE.json` consistent.
    pub async fn run_until(mut self, target: Phase) -> Result<PipelineState, PipelineError> {
        let save_state = self.state.clone();
        let save_path = self.config.state_path();
        self.shutdown.install(move || async move {
            let state = save_state.lock().await;
            if let Err(err) = store::write_atomic(&save_path, &*state) {
                error!(%err, "emergency save failed");
            }
        });

        loop {
            let phase = self.state.lock().await.phase;
            if phase == target {
                self.persist().await?;
                return Ok(self.state.lock().await.clone());
            }

            if self.shutdown.should_stop() {
                info!("shutdown requested, persisting state and stopping");
                self.abort("shutdown signal received".to_string()).await?;
                return Err(PipelineError::Interrupted {
                    reason: "shutdown signal received".to_string(),
                });
            }

            if self.cost.check_budget() == BudgetStatus::OverBudget {
                let (total, _) = self.cost.snapshot();
                let reason = format!("total cost {total} exceeds ceiling {}", self.config.budget_limit);
                self.abort(reason).await?;
                return Err(PipelineError::BudgetExceeded {
                    total,
                    ceiling: self.config.budget_limit,
                });
            }

            let span = info_span!("phase", %phase);
            let _enter = span.enter();

            match phase {
                Phase::Init => self.dispatch_init().await?,
                Phase::ArchitectRunning => self.dispatch_architect_running().await?,
                Phase::ArchitectReview => self.dispatch_architect_review().await?,
                Phase::ContractsRegistering => self.dispatch_contracts().await?,
                Phase::BuildersRunning => self.dispatch_builders().await?,
                Phase::BuildersComplete => self.dispatch_builders_complete().await?,
                Phase::Integrating => self.dispatch_integrating().await?,
                Phase::QualityGate => self.dispatch_gate().await?,
                Phase::FixPass => self.dispatch_fix_pass().await?,
                Phase::Complete | Phase::Failed => {
                    self.persist().await?;
                    return Ok(self.state.lock().await.clone());
                }
            }

            self.persist().await?;
        }
    }

    async fn abort(&mut self, reason: String) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        state.interrupted = true;
        state.interrupt_reason = Some(reason);
        advance(&mut state, Trigger::Abort)?;
        drop(state);
        self.persist().await
    }

    async fn dispatch_init(&mut self) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        advance(&mut state, Trigger::ArchitectStarted)?;
        Ok(())
    }

    async fn dispatch_architect_running(&mut self) -> Result<(), PipelineError> {
        let architect = Architect::new(&self.config.architect_command);
        let prd_path = self.config.output_dir.join("prd.md");
        let services = architect.decompose(&self.prd, &prd_path.to_string_lossy()).await;

        let mut state = self.state.lock().await;
        if services.is_empty() {
            if state.architect_retries < self.config.architect_max_retries {
                state.architect_retries += 1;
                warn!(retries = state.architect_retries, "architect returned no services, retrying");
                advance(&mut state, Trigger::RetryArchitect)?;
                return Ok(());
            }
            return Err(PipelineError::Invariant(
                "architect exhausted retries without producing any services".to_string(),
            ));
        }

        state.services = services;
        drop(state);
        let state = self.state.lock().await;
        store::write_atomic(&self.config.service_map_path(), &state.services).map_err(PipelineError::from)?;
        let mut state = state;
        advance(&mut state, Trigger::ArchitectDone)?;
        Ok(())
    }

    /// `architect_review` is the approval gate between decomposition and
    /// contract registration. The CLI is non-interactive, so approval is
    /// driven entirely by `config.auto_approve`; a future interactive mode
    /// would pause here instead of auto-advancing.
    async fn dispatch_architect_review(&mut self) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        if state.services.is_empty() {
            return Err(PipelineError::Invariant(
                "architect review entered with an empty service map".to_string(),
            ));
        }
        if !self.config.auto_approve {
            return Err(PipelineError::Invariant(
                "architect review requires approval but auto_approve is disabled and the CLI is non-interactive"
                    .to_string(),
            ));
        }
        advance(&mut state, Trigger::ApproveArchitect)?;
        Ok(())
    }

    async fn dispatch_contracts(&mut self) -> Result<(), PipelineError> {
        let engine = ContractEngine::new(
            &self.config.contract_engine_command,
            self.config.output_dir.join("registry"),
        );
        let mut state = self.state.lock().await;
        register_contracts(&engine, &state.services).await.map_err(PipelineError::from)?;
        advance(&mut state, Trigger::ContractsRegistered)?;
        Ok(())
    }

    /// Either the full builder fan-out (first entry) or, when re-entered
    /// after a fix pass, a targeted quick-depth rerun of only the services
    /// that have a pending `FIX_INSTRUCTIONS.md` (APPLY, per §4.10).
    async fn dispatch_builders(&mut self) -> Result<(), PipelineError> {
        let is_fix_pass_rerun = {
            let state = self.state.lock().await;
            state
                .fix_pass_history
                .last()
                .map(|f| f.after_count.is_none())
                .unwrap_or(false)
        };

        if is_fix_pass_rerun {
            self.apply_fix_pass().await
        } else {
            self.run_full_builder_fanout().await
        }
    }

    async fn run_full_builder_fanout(&mut self) -> Result<(), PipelineError> {
        let graph_rag = GraphRag::new(&self.config.graph_rag_command);
        let explicit_context = match &self.context_file {
            Some(path) => {
                Some(std::fs::read_to_string(path).map_err(|e| PipelineError::Invariant(e.to_string()))?)
            }
            None => None,
        };

        let contract_engine = ContractEngine::new(
            &self.config.contract_engine_command,
            self.config.output_dir.join("registry"),
        );

        let services = self.state.lock().await.services.clone();
        let provided_contracts = contract_engine.load_registered(&services);
        let mut service_dirs = Vec::with_capacity(services.len());
        for service in &services {
            let context = resolve_context(&graph_rag, service, explicit_context.as_deref()).await;
            let dir = materialize_builder_input(
                &self.config.output_dir,
                service,
                &self.prd,
                &provided_contracts,
                context.as_deref(),
            )
            .map_err(PipelineError::from)?;
            service_dirs.push(dir);
        }

        let builder_config = BuilderConfig {
            command: self.config.builder_command.clone(),
            args: vec![],
            timeout: std::time::Duration::from_secs(1800),
            depth: self.config.depth.clone(),
        };

        let results = run_builders(services, service_dirs, builder_config, self.config.max_concurrent_builders)
            .await
            .map_err(PipelineError::from)?;

        let mut state = self.state.lock().await;
        for result in results {
            self.cost.charge(Phase::BuildersRunning, result.cost);
            state.builder_results.insert(result.service.clone(), result);
        }
        advance(&mut state, Trigger::BuildersFinished)?;
        Ok(())
    }

    /// APPLY: rerun only the services with a pending `FIX_INSTRUCTIONS.md`,
    /// at `depth=quick`, consuming the instructions file afterward.
    async fn apply_fix_pass(&mut self) -> Result<(), PipelineError> {
        let services = self.state.lock().await.services.clone();
        let builder_config = BuilderConfig {
            command: self.config.builder_command.clone(),
            args: vec![],
            timeout: std::time::Duration::from_secs(1800),
            depth: "quick".to_string(),
        };

        let mut applied = 0u32;
        for service in &services {
            let service_dir = self.config.output_dir.join("builders").join(&service.name);
            let instructions_path = service_dir.join("FIX_INSTRUCTIONS.md");
            if !instructions_path.exists() {
                continue;
            }
            let result = run_builder(service, &service_dir, &builder_config).await;
            let _ = std::fs::remove_file(&instructions_path);
            applied += 1;

            let mut state = self.state.lock().await;
            self.cost.charge(Phase::BuildersRunning, result.cost);
            state.builder_results.insert(result.service.clone(), result);
        }

        let mut state = self.state.lock().await;
        if let Some(last) = state.fix_pass_history.last_mut() {
            last.fixes_applied = applied;
        }
        advance(&mut state, Trigger::BuildersFinished)?;
        Ok(())
    }

    async fn dispatch_builders_complete(&mut self) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        let at_least_one_passed = state.builder_results.values().any(|r| r.success);
        if at_least_one_passed {
            advance(&mut state, Trigger::StartIntegration)?;
        } else {
            state.interrupted = true;
            state.interrupt_reason = Some("every builder failed; no service to integrate".to_string());
            advance(&mut state, Trigger::Abort)?;
        }
        Ok(())
    }

    async fn dispatch_integrating(&mut self) -> Result<(), PipelineError> {
        let run_id = self.state.lock().await.run_id;
        let harness = DockerHarness::connect(format!("forge-{run_id}"));
        let services = self.state.lock().await.services.clone();
        let report = run_integration(&harness, &services, &self.config.output_dir)
            .await
            .map_err(PipelineError::from)?;

        crate::report::write_integration_report(&self.config.output_dir, &report)
            .map_err(|e| PipelineError::Invariant(e.to_string()))?;

        let mut state = self.state.lock().await;
        state.integration_reports.push(report);
        // Integration health is assessed by the quality gate's layer 2, not
        // here — builders_complete already gated on "at least one builder
        // passed", so integrating always promotes to quality_gate.
        advance(&mut state, Trigger::IntegrationDone)?;
        Ok(())
    }

    async fn dispatch_gate(&mut self) -> Result<(), PipelineError> {
        let (services, builder_results, integration_report) = {
            let state = self.state.lock().await;
            (
                state.services.clone(),
                state.builder_results.clone(),
                state.integration_reports.last().cloned(),
            )
        };

        let report = run_gate(&services, &builder_results, integration_report.as_ref())
            .await
            .map_err(PipelineError::from)?;

        crate::report::write_quality_gate_report(&self.config.output_dir, &report)
            .map_err(|e| PipelineError::Invariant(e.to_string()))?;

        let mut state = self.state.lock().await;
        state.gate_reports.push(report.clone());

        let pending_fix_pass = state
            .fix_pass_history
            .last()
            .map(|f| f.after_count.is_none())
            .unwrap_or(false);

        if pending_fix_pass {
            let remaining_budget = self.config.budget_limit - self.cost.snapshot().0;
            let initial_weighted = initial_weighted_score(&state.fix_pass_history[0]);
            let fix_pass_config = FixPassConfig {
                max_fix_passes: self.config.max_fix_passes,
            };
            let fixes_applied = state.fix_pass_history.last().map(|f| f.fixes_applied).unwrap_or(0);
            let decision = {
                let last = state.fix_pass_history.last_mut().expect("checked pending above");
                fixpass::finalize(last, fixes_applied, &report, &fix_pass_config, remaining_budget, initial_weighted)
            };

            match decision {
                fixpass::ConvergenceDecision::Converged => advance(&mut state, Trigger::GatePassed)?,
                fixpass::ConvergenceDecision::KeepGoing => advance(&mut state, Trigger::GateFailed)?,
                fixpass::ConvergenceDecision::Exhausted => {
                    state.interrupted = true;
                    state.interrupt_reason = Some("fix-pass convergence exhausted".to_string());
                    advance(&mut state, Trigger::Abort)?;
                }
            }
            return Ok(());
        }

        let overall = report.overall;
        if matches!(overall, crate::models::Verdict::Passed) {
            advance(&mut state, Trigger::GatePassed)?;
        } else if matches!(overall, crate::models::Verdict::Partial) && self.config.max_fix_passes == 0 {
            advance(&mut state, Trigger::SkipToComplete)?;
        } else {
            advance(&mut state, Trigger::GateFailed)?;
        }
        Ok(())
    }

    /// DISCOVER + CLASSIFY + GENERATE only (§4.10). APPLY happens on the
    /// next `builders_running` entry; VERIFY/REGRESS happen on the
    /// `quality_gate` entry after that.
    async fn dispatch_fix_pass(&mut self) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        let pass = state.fix_pass_history.len() as u32 + 1;
        let previous_gate = state
            .gate_reports
            .last()
            .cloned()
            .ok_or_else(|| PipelineError::Invariant("fix pass entered with no prior gate report".to_string()))?;
        let services = state.services.clone();

        let result =
            fixpass::discover_classify_generate(pass, &services, &previous_gate, &self.config.output_dir)
                .map_err(PipelineError::from)?;

        state.fix_pass_history.push(result);
        advance(&mut state, Trigger::FixDone)?;
        Ok(())
    }
}

fn initial_weighted_score(first_pass: &crate::models::FixPassResult) -> f64 {
    0.4 * first_pass.p0_count as f64 + 0.3 * first_pass.p1_count as f64 + 0.1 * first_pass.p2_count as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn dispatch_init_transitions_to_architect_running() {
        let dir = tempdir().unwrap();
        let config = Config::resolve(dir.path().to_path_buf(), None, None, false).unwrap();
        config.ensure_directories().unwrap();
        let mut driver = Driver::new(config, "# PRD".to_string(), None);
        driver.dispatch_init().await.unwrap();
        assert_eq!(driver.state.lock().await.phase, Phase::ArchitectRunning);
    }

    #[tokio::test]
    async fn dispatch_architect_running_falls_back_to_monolith_and_reaches_review() {
        let dir = tempdir().unwrap();
        let config = Config::resolve(dir.path().to_path_buf(), None, None, false).unwrap();
        config.ensure_directories().unwrap();
        let mut driver = Driver::new(config, "# PRD".to_string(), None);
        driver.state.lock().await.phase = Phase::ArchitectRunning;
        driver.dispatch_architect_running().await.unwrap();
        let state = driver.state.lock().await;
        assert_eq!(state.phase, Phase::ArchitectReview);
        assert_eq!(state.services.len(), 1);
    }

    #[tokio::test]
    async fn dispatch_architect_review_auto_approves_by_default() {
        let dir = tempdir().unwrap();
        let config = Config::resolve(dir.path().to_path_buf(), None, None, false).unwrap();
        config.ensure_directories().unwrap();
        let mut driver = Driver::new(config, "# PRD".to_string(), None);
        {
            let mut state = driver.state.lock().await;
            state.phase = Phase::ArchitectReview;
            state.services = vec![crate::models::ServiceInfo {
                name: "monolith".into(),
                description: "".into(),
                depends_on: vec![],
                owns_data: vec![],
                stack: Default::default(),
                port: 8080,
                health_endpoint: "/health".into(),
                events: None,
            }];
        }
        driver.dispatch_architect_review().await.unwrap();
        assert_eq!(driver.state.lock().await.phase, Phase::ContractsRegistering);
    }

    #[tokio::test]
    async fn dispatch_builders_complete_aborts_when_every_builder_failed() {
        use crate::models::BuilderResult;

        let dir = tempdir().unwrap();
        let config = Config::resolve(dir.path().to_path_buf(), None, None, false).unwrap();
        config.ensure_directories().unwrap();
        let mut driver = Driver::new(config, "# PRD".to_string(), None);
        {
            let mut state = driver.state.lock().await;
            state.phase = Phase::BuildersComplete;
            state.builder_results.insert(
                "users".to_string(),
                BuilderResult {
                    service: "users".into(),
                    success: false,
                    cost: 0.0,
                    duration_seconds: 0.0,
                    fallback: false,
                    error: Some("failed".into()),
                    output_dir: Default::default(),
                    tests_passed: 0,
                    tests_total: 0,
                    artifacts: vec![],
                },
            );
        }
        driver.dispatch_builders_complete().await.unwrap();
        let state = driver.state.lock().await;
        assert_eq!(state.phase, Phase::Failed);
        assert!(state.interrupted);
    }

    #[tokio::test]
    async fn dispatch_builders_complete_proceeds_when_one_builder_passed() {
        use crate::models::BuilderResult;

        let dir = tempdir().unwrap();
        let config = Config::resolve(dir.path().to_path_buf(), None, None, false).unwrap();
        config.ensure_directories().unwrap();
        let mut driver = Driver::new(config, "# PRD".to_string(), None);
        {
            let mut state = driver.state.lock().await;
            state.phase = Phase::BuildersComplete;
            state.builder_results.insert(
                "users".to_string(),
                BuilderResult {
                    service: "users".into(),
                    success: true,
                    cost: 0.0,
                    duration_seconds: 0.0,
                    fallback: false,
                    error: None,
                    output_dir: Default::default(),
                    tests_passed: 1,
                    tests_total: 1,
                    artifacts: vec![],
                },
            );
        }
        driver.dispatch_builders_complete().await.unwrap();
        assert_eq!(driver.state.lock().await.phase, Phase::Integrating);
    }
}
</content>
