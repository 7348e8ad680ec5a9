//! Runs registered modules for one candidate.
//!
//! Modules execute strictly in registration order. Each one runs in its own
//! tokio task so a panic is caught at the join handle and a time budget can
//! abort it; either way, and for returned errors, the scheduler records a
//! synthesized KILL result and moves on. A KILL from a critical module stops
//! scheduling: every remaining module is recorded as skipped.

use chrono::Utc;
use serde::Serialize;
use std::any::Any;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn, Instrument};

use etrial_core::domain::digest::digest_of;
use etrial_core::obs::{
    emit_gate_triggered, emit_module_failed, emit_module_finished, emit_run_finished,
    emit_run_started, run_span,
};
use etrial_core::{
    AuditRecorder, Candidate, Decision, EnvironmentSnapshot, ModuleContext,
    ModuleExecutionError, ModuleResult, ThresholdTable, TimelineEntry, TimelineOutcome,
};

use crate::aggregate::aggregate_results;
use crate::error::Result;
use crate::registry::{ModuleRegistry, Registration};
use crate::result::{PipelineResult, PipelineRun, SkipReason, SkippedModule};

/// Everything that determines results, hashed into the audit `config_hash`.
#[derive(Serialize)]
struct RunFingerprint<'a> {
    modules: Vec<serde_json::Value>,
    thresholds: &'a ThresholdTable,
    gpu_enabled: bool,
    random_seed: u64,
    gating: bool,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    registry: Arc<ModuleRegistry>,
    ctx: Arc<ModuleContext>,
    gating: bool,
}

impl Scheduler {
    pub fn new(registry: ModuleRegistry, ctx: ModuleContext) -> Self {
        Self {
            registry: Arc::new(registry),
            ctx: Arc::new(ctx),
            gating: true,
        }
    }

    /// Disable critical-KILL gating: every selected module runs.
    pub fn with_gating(mut self, enabled: bool) -> Self {
        self.gating = enabled;
        self
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn context(&self) -> &ModuleContext {
        &self.ctx
    }

    /// Hash of the configuration a run over `selection` would execute under.
    pub fn config_hash(&self, selection: Option<&[String]>) -> Result<String> {
        let selected = self.registry.select(selection)?;
        self.hash_selected(&selected)
    }

    fn hash_selected(&self, selected: &[&Registration]) -> Result<String> {
        let fingerprint = RunFingerprint {
            modules: selected.iter().map(|r| r.fingerprint()).collect(),
            thresholds: &self.ctx.thresholds,
            gpu_enabled: self.ctx.gpu_enabled,
            random_seed: self.ctx.random_seed,
            gating: self.gating,
        };
        Ok(digest_of(&fingerprint)?)
    }

    /// Evaluate one candidate with the selected modules (all when `None`).
    ///
    /// Only an unknown module name in `selection` or an unhashable input
    /// fails the run; module failures are part of the result.
    pub async fn run(&self, candidate: &Candidate, selection: Option<&[String]>) -> Result<PipelineRun> {
        let selected = self.registry.select(selection)?;
        let recorder = AuditRecorder::start(
            &candidate.id,
            self.hash_selected(&selected)?,
            candidate.digest()?,
            EnvironmentSnapshot::capture(self.ctx.gpu_enabled),
        );
        let span = run_span(&recorder.run_id().to_string(), &candidate.id);
        Ok(self.execute(candidate, &selected, recorder).instrument(span).await)
    }

    async fn execute(
        &self,
        candidate: &Candidate,
        selected: &[&Registration],
        mut recorder: AuditRecorder,
    ) -> PipelineRun {
        let clock = Instant::now();
        let run_id = recorder.run_id().to_string();
        for registration in selected {
            recorder.record_module_version(registration.name(), registration.version());
        }
        let applicable = selected
            .iter()
            .filter(|r| r.applies_to(candidate.modality))
            .count();
        emit_run_started(&run_id, &candidate.id, applicable);

        let shared = Arc::new(candidate.clone());
        let mut results: Vec<ModuleResult> = Vec::new();
        let mut skipped = Vec::new();
        let mut gated_by: Option<String> = None;

        for (index, registration) in selected.iter().enumerate() {
            let name = registration.name();
            if let Some(by) = &gated_by {
                skipped.push(SkippedModule {
                    module_name: name.to_string(),
                    reason: SkipReason::Gated { by: by.clone() },
                });
                continue;
            }
            if !registration.applies_to(candidate.modality) {
                debug!(module = %name, modality = %candidate.modality, "module not applicable");
                skipped.push(SkippedModule {
                    module_name: name.to_string(),
                    reason: SkipReason::NotApplicable {
                        modality: candidate.modality,
                    },
                });
                continue;
            }

            let started_at = Utc::now();
            let module_clock = Instant::now();
            let outcome = self.execute_module(registration, Arc::clone(&shared)).await;
            let ended_at = Utc::now();
            let duration_ms = module_clock.elapsed().as_millis() as u64;

            let result = match outcome {
                Ok(mut result) => {
                    result.module_name = name.to_string();
                    result.is_critical = registration.is_critical();
                    emit_module_finished(name, result.decision, duration_ms);
                    recorder.record(TimelineEntry {
                        module_name: name.to_string(),
                        started_at,
                        ended_at,
                        outcome: TimelineOutcome::Completed {
                            decision: result.decision,
                        },
                    });
                    result
                }
                Err(error) => {
                    emit_module_failed(name, &error);
                    recorder.record(TimelineEntry {
                        module_name: name.to_string(),
                        started_at,
                        ended_at,
                        outcome: TimelineOutcome::Failed {
                            error: error.to_string(),
                        },
                    });
                    ModuleResult::synthesized(
                        name,
                        registration.version(),
                        registration.is_critical(),
                        &error,
                    )
                }
            };

            if self.gating && registration.is_critical() && result.decision == Decision::Kill {
                emit_gate_triggered(name, selected.len() - index - 1);
                gated_by = Some(name.to_string());
            }
            results.push(result);
        }

        if results.is_empty() {
            warn!(candidate_id = %candidate.id, "no module executed; overall decision is PASS");
        }
        let overall_decision = aggregate_results(&results);
        let runtime = clock.elapsed();
        emit_run_finished(
            &run_id,
            overall_decision,
            runtime.as_millis() as u64,
            results.len(),
        );

        PipelineRun {
            result: PipelineResult {
                candidate_id: candidate.id.clone(),
                overall_decision,
                module_results: results,
                skipped,
                runtime_seconds: runtime.as_secs_f64(),
                timestamp: Utc::now(),
            },
            audit: recorder.seal(),
        }
    }

    async fn execute_module(
        &self,
        registration: &Registration,
        candidate: Arc<Candidate>,
    ) -> std::result::Result<ModuleResult, ModuleExecutionError> {
        let module = Arc::clone(registration.module());
        let ctx = Arc::clone(&self.ctx);
        let name = registration.name().to_string();

        let mut handle =
            tokio::spawn(async move { module.validate(&candidate, &ctx).await }.in_current_span());

        let joined = match registration.time_budget() {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    return Err(ModuleExecutionError::TimedOut {
                        module: name,
                        timeout: limit,
                    });
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(error)) => Err(ModuleExecutionError::Failed {
                module: name,
                message: format!("{:#}", error),
            }),
            Err(join_error) if join_error.is_panic() => Err(ModuleExecutionError::Panicked {
                module: name,
                message: panic_message(join_error.into_panic()),
            }),
            Err(join_error) => Err(ModuleExecutionError::Failed {
                module: name,
                message: join_error.to_string(),
            }),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use etrial_core::{Modality, Outcome, ScoringModule, ThresholdRule};
    use std::time::Duration;

    enum Behaviour {
        Decide(Decision),
        Fail,
        Panic,
        Hang,
    }

    struct Stub {
        name: &'static str,
        behaviour: Behaviour,
    }

    fn stub(name: &'static str, behaviour: Behaviour) -> Arc<dyn ScoringModule> {
        Arc::new(Stub { name, behaviour })
    }

    #[async_trait]
    impl ScoringModule for Stub {
        fn name(&self) -> &str {
            self.name
        }

        async fn validate(
            &self,
            _candidate: &Candidate,
            ctx: &ModuleContext,
        ) -> anyhow::Result<ModuleResult> {
            match self.behaviour {
                Behaviour::Decide(decision) => Ok(ctx.result_builder(self).decision(decision).build()),
                Behaviour::Fail => anyhow::bail!("reference data unavailable"),
                Behaviour::Panic => panic!("index out of range"),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(ctx.result_builder(self).build())
                }
            }
        }
    }

    fn candidate() -> Candidate {
        Candidate::new("mAb-1", Modality::Antibody, "HER2")
    }

    fn scheduler(registrations: Vec<Registration>) -> Scheduler {
        let mut registry = ModuleRegistry::new();
        for registration in registrations {
            registry.add(registration).expect("register");
        }
        Scheduler::new(registry, ModuleContext::default())
    }

    #[tokio::test]
    async fn test_failure_is_synthesized_and_run_continues() {
        let scheduler = scheduler(vec![
            Registration::new(stub("flaky", Behaviour::Fail)),
            Registration::new(stub("after", Behaviour::Decide(Decision::Pass))),
        ]);
        let run = scheduler.run(&candidate(), None).await.expect("run");

        let flaky = run.result.result("flaky").expect("flaky result");
        assert_eq!(flaky.decision, Decision::Kill);
        assert!(flaky.is_synthesized());
        assert!(flaky.risks[0].contains("reference data unavailable"));
        assert_eq!(run.result.executed(), vec!["flaky", "after"]);
        assert_eq!(run.result.overall_decision, Decision::Revise);
        assert!(matches!(
            run.audit.timeline[0].outcome,
            TimelineOutcome::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let scheduler = scheduler(vec![
            Registration::new(stub("boom", Behaviour::Panic)),
            Registration::new(stub("after", Behaviour::Decide(Decision::Pass))),
        ]);
        let run = scheduler.run(&candidate(), None).await.expect("run");
        let boom = run.result.result("boom").expect("boom");
        assert!(matches!(boom.outcome, Outcome::Synthesized { ref cause } if cause.contains("panicked")));
        assert!(run.result.result("after").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_a_failure() {
        let scheduler = scheduler(vec![
            Registration::new(stub("slow", Behaviour::Hang)).timeout(Some(Duration::from_secs(2))),
            Registration::new(stub("after", Behaviour::Decide(Decision::Pass))),
        ]);
        let run = scheduler.run(&candidate(), None).await.expect("run");
        let slow = run.result.result("slow").expect("slow");
        assert_eq!(slow.decision, Decision::Kill);
        assert!(slow.risks[0].contains("timed out"));
        assert_eq!(run.result.executed().len(), 2);
    }

    #[tokio::test]
    async fn test_critical_failure_gates() {
        let scheduler = scheduler(vec![
            Registration::new(stub("structure", Behaviour::Fail)).critical(true),
            Registration::new(stub("binding", Behaviour::Decide(Decision::Pass))),
        ]);
        let run = scheduler.run(&candidate(), None).await.expect("run");
        assert_eq!(run.result.overall_decision, Decision::Kill);
        assert_eq!(
            run.result.skip_reason("binding"),
            Some(&SkipReason::Gated {
                by: "structure".to_string()
            })
        );
        assert_eq!(run.audit.module_versions.len(), 2);
        assert_eq!(run.audit.timeline.len(), 1);
    }

    #[tokio::test]
    async fn test_gating_can_be_disabled() {
        let scheduler = scheduler(vec![
            Registration::new(stub("structure", Behaviour::Decide(Decision::Kill))).critical(true),
            Registration::new(stub("binding", Behaviour::Decide(Decision::Pass))),
        ])
        .with_gating(false);
        let run = scheduler.run(&candidate(), None).await.expect("run");
        assert_eq!(run.result.executed(), vec!["structure", "binding"]);
        assert_eq!(run.result.overall_decision, Decision::Kill);
    }

    #[tokio::test]
    async fn test_modality_filter_and_selection() {
        let scheduler = scheduler(vec![
            Registration::new(stub("chem", Behaviour::Decide(Decision::Kill)))
                .modalities([Modality::SmallMolecule]),
            Registration::new(stub("binding", Behaviour::Decide(Decision::Revise))),
            Registration::new(stub("tox", Behaviour::Decide(Decision::Pass))),
        ]);
        let run = scheduler.run(&candidate(), None).await.expect("run");
        assert_eq!(
            run.result.skip_reason("chem"),
            Some(&SkipReason::NotApplicable {
                modality: Modality::Antibody
            })
        );
        assert_eq!(run.result.overall_decision, Decision::Revise);

        let only_tox = vec!["tox".to_string()];
        let run = scheduler.run(&candidate(), Some(&only_tox)).await.expect("run");
        assert_eq!(run.result.executed(), vec!["tox"]);
        assert!(run.result.skipped.is_empty());

        let unknown = vec!["ghost".to_string()];
        assert!(scheduler.run(&candidate(), Some(&unknown)).await.is_err());
    }

    #[tokio::test]
    async fn test_result_identity_comes_from_registration() {
        let scheduler = scheduler(vec![
            Registration::new(stub("binding", Behaviour::Decide(Decision::Pass))).critical(true),
        ]);
        let run = scheduler.run(&candidate(), None).await.expect("run");
        let binding = run.result.result("binding").expect("binding");
        assert!(binding.is_critical);
        assert_eq!(run.audit.candidate_id, "mAb-1");
        assert_eq!(run.audit.module_versions.get("binding").map(String::as_str), Some("0.1.0"));
    }

    #[tokio::test]
    async fn test_empty_selection_is_pass() {
        let scheduler = scheduler(Vec::new());
        let run = scheduler.run(&candidate(), None).await.expect("run");
        assert_eq!(run.result.overall_decision, Decision::Pass);
        assert!(run.result.module_results.is_empty());
    }

    #[test]
    fn test_config_hash_tracks_thresholds() {
        let mut registry = ModuleRegistry::new();
        registry
            .register(stub("binding", Behaviour::Decide(Decision::Pass)), [])
            .expect("register");
        let table = |kill_at: f64| {
            ThresholdTable::new()
                .with_rule("kd_nm", ThresholdRule::ascending(50.0, kill_at))
                .expect("rule")
        };
        let a = Scheduler::new(registry.clone(), ModuleContext::new(table(500.0)));
        let b = Scheduler::new(registry.clone(), ModuleContext::new(table(500.0)));
        let c = Scheduler::new(registry, ModuleContext::new(table(400.0)));
        let hash = |s: &Scheduler| s.config_hash(None).expect("hash");
        assert_eq!(hash(&a), hash(&b));
        assert_ne!(hash(&a), hash(&c));

        let reseeded = Scheduler::new(
            a.registry().clone(),
            ModuleContext::new(table(500.0)).with_seed(7),
        );
        assert_ne!(hash(&a), hash(&reseeded));
    }
}
