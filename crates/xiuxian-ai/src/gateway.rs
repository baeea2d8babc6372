//! The bounded, task-routed, health-tracked LLM gateway.
//!
//! One [`LlmGateway`] serves the whole engine. A semaphore caps
//! in-flight requests at the configured maximum; each call names its
//! task, which picks the normal or fast model; every call is
//! time-bounded; a transport failure falls back once to the other
//! model. Consecutive failures past a threshold trip the `unhealthy`
//! flag, which the run loop watches to pause ticking until the gateway
//! recovers.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use crate::AiError;
use crate::backend::{
    BackendConfig, BackendKind, CompletionRequest, GenerationProfile, LlmBackend, create_backend,
};
use crate::cost::CostTracker;
use crate::parse::extract_json;
use crate::prompt::PromptEngine;

/// Consecutive failures before the gateway reports unhealthy.
const UNHEALTHY_THRESHOLD: u32 = 5;

/// Which model tier a task runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskMode {
    /// The cheap, fast model.
    Fast,
    /// The full model.
    Normal,
}

/// Route a task name to its model tier.
///
/// Plan decisions, relation resolutions, and stories carry the most
/// context and go to the full model; one-line generations go fast.
pub fn mode_for_task(task: &str) -> TaskMode {
    match task {
        "nickname" | "backstory" | "goal" => TaskMode::Fast,
        _ => TaskMode::Normal,
    }
}

/// Sampling settings per task.
///
/// Narrative tasks get heat and room; verdict-shaped tasks get neither,
/// which keeps their JSON tight and cheap.
pub fn profile_for_task(task: &str) -> GenerationProfile {
    match task {
        "decide" => GenerationProfile {
            max_tokens: 700,
            temperature: 0.7,
        },
        "relation" => GenerationProfile {
            max_tokens: 200,
            temperature: 0.5,
        },
        "story" => GenerationProfile {
            max_tokens: 600,
            temperature: 0.9,
        },
        "backstory" => GenerationProfile {
            max_tokens: 300,
            temperature: 0.8,
        },
        "nickname" => GenerationProfile {
            max_tokens: 100,
            temperature: 0.9,
        },
        "goal" => GenerationProfile {
            max_tokens: 150,
            temperature: 0.8,
        },
        _ => GenerationProfile::default(),
    }
}

/// Gateway construction settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// API base URL shared by both tiers.
    pub base_url: String,
    /// API key shared by both tiers.
    pub key: String,
    /// Model for [`TaskMode::Normal`].
    pub model_name: String,
    /// Model for [`TaskMode::Fast`].
    pub fast_model_name: String,
    /// Backend protocol.
    pub kind: BackendKind,
    /// Cap on concurrently in-flight requests.
    pub max_concurrent_requests: usize,
    /// Per-call deadline.
    pub request_timeout: Duration,
}

/// The bounded-concurrency LLM gateway.
pub struct LlmGateway {
    semaphore: Semaphore,
    normal: LlmBackend,
    fast: LlmBackend,
    prompts: PromptEngine,
    timeout: Duration,
    consecutive_failures: AtomicU32,
    unhealthy: AtomicBool,
    cost: Mutex<CostTracker>,
}

impl LlmGateway {
    /// Build a gateway from configuration and a templates directory.
    pub fn new(config: &GatewayConfig, templates_dir: &str) -> Self {
        let normal = create_backend(
            config.kind,
            &BackendConfig {
                api_url: config.base_url.clone(),
                api_key: config.key.clone(),
                model: config.model_name.clone(),
            },
        );
        let fast = create_backend(
            config.kind,
            &BackendConfig {
                api_url: config.base_url.clone(),
                api_key: config.key.clone(),
                model: config.fast_model_name.clone(),
            },
        );
        Self {
            semaphore: Semaphore::new(config.max_concurrent_requests.max(1)),
            normal,
            fast,
            prompts: PromptEngine::new(templates_dir),
            timeout: config.request_timeout,
            consecutive_failures: AtomicU32::new(0),
            unhealthy: AtomicBool::new(false),
            cost: Mutex::new(CostTracker::default()),
        }
    }

    /// Build a gateway around pre-made backends (scripted runs, tests).
    pub fn with_backends(
        normal: LlmBackend,
        fast: LlmBackend,
        templates_dir: &str,
        max_concurrent_requests: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            semaphore: Semaphore::new(max_concurrent_requests.max(1)),
            normal,
            fast,
            prompts: PromptEngine::new(templates_dir),
            timeout,
            consecutive_failures: AtomicU32::new(0),
            unhealthy: AtomicBool::new(false),
            cost: Mutex::new(CostTracker::default()),
        }
    }

    /// Answer a task-named query with a JSON value.
    ///
    /// Renders `template` (plus `system.j2`) against `substitutions`,
    /// acquires a concurrency permit, calls the task's backend tier
    /// under the deadline (falling back once to the other tier on
    /// transport failure), and parses the response as JSON. Structural
    /// validation of the value is the caller's job.
    ///
    /// # Errors
    ///
    /// All gateway failures come back as [`AiError`]; nothing is thrown
    /// into the engine.
    pub async fn query(
        &self,
        task: &str,
        template: &str,
        substitutions: &serde_json::Value,
    ) -> Result<serde_json::Value, AiError> {
        let prompt = self.prompts.render(template, substitutions)?;
        let request = CompletionRequest {
            prompt: &prompt,
            profile: profile_for_task(task),
        };

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| AiError::Closed)?;

        let (primary, secondary) = match mode_for_task(task) {
            TaskMode::Normal => (&self.normal, &self.fast),
            TaskMode::Fast => (&self.fast, &self.normal),
        };

        let completion = match tokio::time::timeout(self.timeout, primary.complete(&request)).await
        {
            Ok(Ok(completion)) => completion,
            Ok(Err(primary_err)) => {
                warn!(task, backend = primary.name(), error = %primary_err, "primary tier failed, trying fallback");
                match tokio::time::timeout(self.timeout, secondary.complete(&request)).await {
                    Ok(Ok(completion)) => completion,
                    Ok(Err(secondary_err)) => {
                        warn!(task, backend = secondary.name(), error = %secondary_err, "fallback tier failed");
                        self.record_failure();
                        return Err(secondary_err);
                    }
                    Err(_) => {
                        self.record_failure();
                        return Err(self.timeout_error(task));
                    }
                }
            }
            Err(_) => {
                self.record_failure();
                return Err(self.timeout_error(task));
            }
        };

        // Transport succeeded; the gateway is healthy even if the shape
        // turns out wrong.
        self.record_success();
        self.cost
            .lock()
            .await
            .record(task, completion.usage.prompt, completion.usage.completion);
        debug!(
            task,
            response_len = completion.text.len(),
            prompt_tokens = completion.usage.prompt,
            completion_tokens = completion.usage.completion,
            "llm responded"
        );

        extract_json(&completion.text)
    }

    /// Whether repeated failures have tripped the health flag.
    pub fn is_unhealthy(&self) -> bool {
        self.unhealthy.load(Ordering::Acquire)
    }

    /// Clear the health flag (operator acknowledgment).
    pub fn reset_health(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.unhealthy.store(false, Ordering::Release);
    }

    /// Snapshot the total call count.
    pub async fn total_calls(&self) -> u64 {
        self.cost.lock().await.total_calls()
    }

    /// Snapshot one task's token usage as `(prompt, completion)`.
    pub async fn usage_for(&self, task: &str) -> Option<(u64, u64)> {
        self.cost
            .lock()
            .await
            .task(task)
            .map(|totals| (totals.prompt_tokens, totals.completion_tokens))
    }

    fn record_failure(&self) {
        let failures = self
            .consecutive_failures
            .fetch_add(1, Ordering::AcqRel)
            .saturating_add(1);
        if failures >= UNHEALTHY_THRESHOLD {
            self.unhealthy.store(true, Ordering::Release);
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.unhealthy.store(false, Ordering::Release);
    }

    fn timeout_error(&self, task: &str) -> AiError {
        AiError::Timeout {
            task: task.to_owned(),
            ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}
