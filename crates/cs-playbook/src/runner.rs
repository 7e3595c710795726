//! Playbook runner
//!
//! Executes a playbook as a DAG: at every tick, all steps whose
//! dependencies succeeded launch concurrently. A failed step marks its
//! dependents `skipped` without blocking unrelated branches. Cycles
//! fail the whole run. Terminal step states (`success`, `failed`,
//! `skipped`) are absorbing.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::actions::ActionExecutor;
use crate::dsl::{Playbook, PlaybookStep};
use crate::{PlaybookError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl StepStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Success | StepStatus::Failed | StepStatus::Skipped)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub output: Value,
    pub error_message: Option<String>,
    pub retries: u32,
}

/// Complete playbook execution record. Append-only once the run ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub playbook_id: String,
    pub playbook_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: String,
    pub variables: HashMap<String, Value>,
    pub step_results: Vec<StepResult>,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub skipped_steps: usize,
}

impl RunRecord {
    pub fn result_for(&self, step_id: &str) -> Option<&StepResult> {
        self.step_results.iter().find(|r| r.step_id == step_id)
    }
}

#[derive(Debug, Default)]
pub struct PlaybookRunner {
    executor: ActionExecutor,
}

impl PlaybookRunner {
    pub fn new() -> Self {
        Self {
            executor: ActionExecutor::new(),
        }
    }

    /// Execute a playbook to completion. Step failures are recorded in
    /// the run record; only an unresolvable dependency graph is an
    /// error.
    pub async fn execute(
        &self,
        playbook: &Playbook,
        variables: HashMap<String, Value>,
    ) -> Result<RunRecord> {
        let mut run_variables: HashMap<String, Value> = playbook.variables.clone();
        run_variables.extend(variables);

        let mut record = RunRecord {
            run_id: format!("run_{}", Uuid::new_v4()),
            playbook_id: playbook.id.clone(),
            playbook_name: playbook.name.clone(),
            start_time: Utc::now(),
            end_time: None,
            status: "running".to_string(),
            variables: run_variables.clone(),
            step_results: Vec::with_capacity(playbook.steps.len()),
            total_steps: playbook.steps.len(),
            completed_steps: 0,
            failed_steps: 0,
            skipped_steps: 0,
        };

        info!(
            "starting playbook {} ({} steps, run {})",
            playbook.name,
            playbook.steps.len(),
            record.run_id
        );

        let mut pending: HashMap<String, PlaybookStep> = playbook
            .steps
            .iter()
            .map(|s| (s.id.clone(), s.clone()))
            .collect();
        let mut succeeded: HashSet<String> = HashSet::new();
        let mut dead: HashSet<String> = HashSet::new(); // failed or skipped

        while !pending.is_empty() {
            let ready: Vec<String> = pending
                .values()
                .filter(|step| step.depends_on.iter().all(|d| succeeded.contains(d)))
                .map(|step| step.id.clone())
                .collect();

            if ready.is_empty() {
                // Steps whose dependency chain died get skipped.
                let skippable: Vec<String> = pending
                    .values()
                    .filter(|step| step.depends_on.iter().any(|d| dead.contains(d)))
                    .map(|step| step.id.clone())
                    .collect();

                if skippable.is_empty() {
                    let mut remaining: Vec<String> = pending.keys().cloned().collect();
                    remaining.sort();
                    error!(
                        "cyclic dependency in playbook {}: {remaining:?}",
                        playbook.id
                    );
                    record.status = "failed".to_string();
                    record.end_time = Some(Utc::now());
                    return Err(PlaybookError::CyclicDependency {
                        playbook: playbook.id.clone(),
                        remaining,
                    });
                }

                for step_id in skippable {
                    pending.remove(&step_id);
                    dead.insert(step_id.clone());
                    record.skipped_steps += 1;
                    warn!("skipping step {step_id}: dependency failed");
                    record.step_results.push(StepResult {
                        step_id,
                        status: StepStatus::Skipped,
                        start_time: Utc::now(),
                        end_time: Some(Utc::now()),
                        output: Value::Null,
                        error_message: Some("dependency failed or was skipped".to_string()),
                        retries: 0,
                    });
                }
                continue;
            }

            // Current frontier runs concurrently.
            let batch: Vec<PlaybookStep> = ready
                .iter()
                .map(|id| pending.remove(id).expect("ready step is pending"))
                .collect();
            let futures = batch
                .iter()
                .map(|step| self.execute_step(step, &run_variables));
            let results = join_all(futures).await;

            for (step, result) in batch.iter().zip(results) {
                if result.status == StepStatus::Success {
                    succeeded.insert(step.id.clone());
                    record.completed_steps += 1;
                } else {
                    dead.insert(step.id.clone());
                    record.failed_steps += 1;
                }
                record.step_results.push(result);
            }
        }

        record.status = if record.failed_steps > 0 || record.skipped_steps > 0 {
            "partial_failure".to_string()
        } else {
            "completed".to_string()
        };
        record.end_time = Some(Utc::now());

        info!(
            "playbook {} finished: {} ({} ok, {} failed, {} skipped)",
            playbook.name,
            record.status,
            record.completed_steps,
            record.failed_steps,
            record.skipped_steps
        );
        Ok(record)
    }

    async fn execute_step(
        &self,
        step: &PlaybookStep,
        variables: &HashMap<String, Value>,
    ) -> StepResult {
        let start_time = Utc::now();
        let params = resolve_variables(&step.parameters, variables);
        let timeout = Duration::from_secs(step.timeout_seconds);

        let mut retries = 0u32;
        loop {
            let attempt = tokio::time::timeout(timeout, self.executor.execute(&step.action, &params)).await;
            let error_text = match attempt {
                Ok(Ok(output)) => {
                    return StepResult {
                        step_id: step.id.clone(),
                        status: StepStatus::Success,
                        start_time,
                        end_time: Some(Utc::now()),
                        output,
                        error_message: None,
                        retries,
                    };
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("step timed out after {}s", step.timeout_seconds),
            };

            if retries < step.retry_count {
                retries += 1;
                let delay = cs_core::backoff_delay(
                    retries,
                    Duration::from_secs(2),
                    2.0,
                    Duration::from_secs(10),
                );
                warn!(
                    "step {} failed ({error_text}), retry {retries}/{} in {}s",
                    step.id,
                    step.retry_count,
                    delay.as_secs()
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            error!("step {} failed after {retries} retries: {error_text}", step.id);
            return StepResult {
                step_id: step.id.clone(),
                status: StepStatus::Failed,
                start_time,
                end_time: Some(Utc::now()),
                output: Value::Null,
                error_message: Some(error_text),
                retries,
            };
        }
    }
}

/// Resolve `${name}` parameter values against the run variables.
/// Unresolved references are logged and passed through literally.
fn resolve_variables(
    parameters: &HashMap<String, Value>,
    variables: &HashMap<String, Value>,
) -> Map<String, Value> {
    let mut resolved = Map::new();
    for (key, value) in parameters {
        let out = match value.as_str() {
            Some(text) if text.starts_with("${") && text.ends_with('}') => {
                let name = &text[2..text.len() - 1];
                match variables.get(name) {
                    Some(substituted) => substituted.clone(),
                    None => {
                        warn!("variable {name} not found, using literal value");
                        value.clone()
                    }
                }
            }
            _ => value.clone(),
        };
        resolved.insert(key.clone(), out);
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(id: &str, action: &str, deps: &[&str], params: &[(&str, Value)]) -> PlaybookStep {
        PlaybookStep {
            id: id.to_string(),
            action: action.to_string(),
            description: String::new(),
            parameters: params
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
            timeout_seconds: 5,
            retry_count: 0,
            depends_on: deps.iter().map(|d| (*d).to_string()).collect(),
        }
    }

    fn playbook(id: &str, steps: Vec<PlaybookStep>) -> Playbook {
        Playbook {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            risk_tier: crate::dsl::RiskTier::Low,
            tags: vec![],
            steps,
            variables: HashMap::new(),
            prerequisites: vec![],
            estimated_duration_minutes: 5,
            reversible: true,
        }
    }

    #[tokio::test]
    async fn linear_chain_runs_in_order() {
        let pb = playbook(
            "chain",
            vec![
                step("first", "log_action", &[], &[("message", json!("one"))]),
                step("second", "log_action", &["first"], &[("message", json!("two"))]),
            ],
        );
        let record = PlaybookRunner::new()
            .execute(&pb, HashMap::new())
            .await
            .unwrap();
        assert_eq!(record.status, "completed");
        assert_eq!(record.completed_steps, 2);
        assert_eq!(record.step_results[0].step_id, "first");
        assert_eq!(record.step_results[1].step_id, "second");
    }

    #[tokio::test]
    async fn independent_steps_run_concurrently() {
        let pb = playbook(
            "parallel",
            vec![
                step("a", "wait", &[], &[("duration", json!(0.3))]),
                step("b", "wait", &[], &[("duration", json!(0.3))]),
                step("c", "wait", &[], &[("duration", json!(0.3))]),
            ],
        );
        let started = std::time::Instant::now();
        let record = PlaybookRunner::new()
            .execute(&pb, HashMap::new())
            .await
            .unwrap();
        let elapsed = started.elapsed();
        assert_eq!(record.completed_steps, 3);
        // Three 300ms waits in parallel finish well under their serial time.
        assert!(elapsed < Duration::from_millis(800), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn failure_skips_dependents_but_not_unrelated_branches() {
        let pb = playbook(
            "branches",
            vec![
                // Fails: block_ip without an ip parameter.
                step("broken", "block_ip", &[], &[]),
                step("downstream", "log_action", &["broken"], &[("message", json!("x"))]),
                step("unrelated", "log_action", &[], &[("message", json!("y"))]),
            ],
        );
        let record = PlaybookRunner::new()
            .execute(&pb, HashMap::new())
            .await
            .unwrap();
        assert_eq!(record.status, "partial_failure");
        assert_eq!(record.failed_steps, 1);
        assert_eq!(record.skipped_steps, 1);
        assert_eq!(record.completed_steps, 1);
        assert_eq!(
            record.result_for("downstream").unwrap().status,
            StepStatus::Skipped
        );
        assert_eq!(
            record.result_for("unrelated").unwrap().status,
            StepStatus::Success
        );
        // Every step ended in a terminal state.
        for result in &record.step_results {
            assert!(result.status.is_terminal());
        }
    }

    #[tokio::test]
    async fn cycle_is_detected_and_fails_the_run() {
        let pb = playbook(
            "cyclic",
            vec![
                step("a", "log_action", &["b"], &[("message", json!("a"))]),
                step("b", "log_action", &["a"], &[("message", json!("b"))]),
            ],
        );
        let err = PlaybookRunner::new()
            .execute(&pb, HashMap::new())
            .await
            .unwrap_err();
        match err {
            PlaybookError::CyclicDependency { remaining, .. } => {
                assert_eq!(remaining, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected cycle error, got {other}"),
        }
    }

    #[tokio::test]
    async fn variables_resolve_and_unresolved_pass_through() {
        let pb = playbook(
            "vars",
            vec![step(
                "block",
                "block_ip",
                &[],
                &[("ip_address", json!("${source_ip}"))],
            )],
        );
        let vars = HashMap::from([("source_ip".to_string(), json!("203.0.113.9"))]);
        let record = PlaybookRunner::new().execute(&pb, vars).await.unwrap();
        assert_eq!(
            record.result_for("block").unwrap().output["ip_address"],
            "203.0.113.9"
        );

        // Unresolved variable stays literal; block_ip still gets a value.
        let record = PlaybookRunner::new()
            .execute(&pb, HashMap::new())
            .await
            .unwrap();
        assert_eq!(
            record.result_for("block").unwrap().output["ip_address"],
            "${source_ip}"
        );
    }

    #[tokio::test]
    async fn timeout_fails_step_after_retries() {
        let mut slow = step("slow", "wait", &[], &[("duration", json!(5.0))]);
        slow.timeout_seconds = 1;
        slow.retry_count = 0;
        let pb = playbook("timeouts", vec![slow]);
        let record = PlaybookRunner::new()
            .execute(&pb, HashMap::new())
            .await
            .unwrap();
        let result = record.result_for("slow").unwrap();
        assert_eq!(result.status, StepStatus::Failed);
        assert!(result.error_message.as_ref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn retry_count_is_honored() {
        // block_ip with no parameters fails deterministically each try.
        let mut flaky = step("flaky", "block_ip", &[], &[]);
        flaky.retry_count = 1;
        let pb = playbook("retries", vec![flaky]);
        let record = PlaybookRunner::new()
            .execute(&pb, HashMap::new())
            .await
            .unwrap();
        let result = record.result_for("flaky").unwrap();
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.retries, 1);
    }

    #[tokio::test]
    async fn playbook_variables_merge_with_run_variables() {
        let mut pb = playbook(
            "merge",
            vec![step(
                "notify",
                "notify_stakeholders",
                &[],
                &[("message", json!("${note}")), ("severity", json!("${sev}"))],
            )],
        );
        pb.variables.insert("note".to_string(), json!("default note"));
        pb.variables.insert("sev".to_string(), json!("low"));

        let vars = HashMap::from([("sev".to_string(), json!("high"))]);
        let record = PlaybookRunner::new().execute(&pb, vars).await.unwrap();
        let output = &record.result_for("notify").unwrap().output;
        assert_eq!(output["message"], "default note");
        assert_eq!(output["severity"], "high");
    }
}
