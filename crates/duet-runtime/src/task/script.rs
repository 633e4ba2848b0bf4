//! Script generation through an Ollama-compatible `/api/generate` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::TRACING_TARGET_REGISTRY;
use crate::error::TaskError;
use crate::registry::{TaskContext, TaskHandler};

const PROGRESS_STEPS: u32 = 5;
const DEFAULT_TIMEOUT_MS: u64 = 20_000;
const PROVIDER: &str = "ollama";

/// Writes a stage prompt and narration for a short talking video.
#[derive(Debug, Clone)]
pub struct ScriptTask {
    http: reqwest::Client,
}

impl ScriptTask {
    /// Creates the task over a shared HTTP client.
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn generate(&self, request: &ScriptRequest) -> Result<GenerateResponse, TaskError> {
        let url = format!("{}/api/generate", request.endpoint.trim_end_matches('/'));
        let body = json!({
            "model": request.model,
            "prompt": request.template(),
            "temperature": request.temperature,
            "stream": false,
        });

        let response = self
            .http
            .post(&url)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| TaskError::new(format!("LLM request failed: {e}")).with_code("llm_unavailable"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TaskError::new(format!("LLM request failed: {status} - {text}"))
                .with_code("llm_status")
                .with_details(json!({ "status": status.as_u16() })));
        }

        response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| TaskError::new(format!("LLM request failed: {e}")).with_code("llm_response"))
    }
}

#[async_trait]
impl TaskHandler for ScriptTask {
    async fn call(&self, ctx: TaskContext, input: Value) -> Result<Value, TaskError> {
        let request = ScriptRequest::new(ctx.params(), &input)?;
        let mut progress = StepProgress::new(ctx.progress_weight());

        progress.bump(&ctx).await;
        let response = self.generate(&request).await?;
        progress.bump(&ctx).await;

        let output = ScriptOutput::parse(&request, &response);
        progress.bump(&ctx).await;

        tracing::debug!(
            target: TRACING_TARGET_REGISTRY,
            job_id = %ctx.job_id(),
            node_id = %ctx.node_id(),
            model = %request.model,
            tokens = output.tokens_used,
            "Generated script"
        );

        progress.bump(&ctx).await;
        let output = serde_json::to_value(&output)
            .map_err(|e| TaskError::new(format!("failed to encode script: {e}")))?;
        progress.bump(&ctx).await;
        Ok(output)
    }
}

/// Evenly spaced progress reports summing to the node's weight.
struct StepProgress {
    step: f64,
    current: f64,
}

impl StepProgress {
    fn new(weight: f64) -> Self {
        let step = if weight > 0.0 {
            weight / f64::from(PROGRESS_STEPS)
        } else {
            0.0
        };
        Self { step, current: 0.0 }
    }

    async fn bump(&mut self, ctx: &TaskContext) {
        if self.step > 0.0 {
            self.current += self.step;
            ctx.report_progress(self.current).await;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ScriptRequest {
    prompt: String,
    tone: String,
    length: String,
    persona: String,
    model: String,
    temperature: f64,
    endpoint: String,
    timeout: Duration,
}

impl ScriptRequest {
    /// Reads the prompt from the input (falling back to params) and the
    /// generation settings from params.
    fn new(params: &Map<String, Value>, input: &Value) -> Result<Self, TaskError> {
        let prompt = input
            .get("prompt")
            .or_else(|| params.get("prompt"))
            .and_then(Value::as_str)
            .filter(|prompt| !prompt.trim().is_empty())
            .ok_or_else(|| TaskError::new("Missing prompt for script generation"))?;

        let text = |name: &str, message: &str| {
            match params.get(name) {
                Some(Value::String(value)) if !value.is_empty() => Some(value.clone()),
                Some(Value::Number(value)) => Some(value.to_string()),
                _ => None,
            }
            .ok_or_else(|| TaskError::new(message))
        };

        let temperature = params
            .get("temperature")
            .and_then(Value::as_f64)
            .ok_or_else(|| TaskError::new("LLM temperature is required"))?;
        let timeout_ms = params
            .get("timeoutMs")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        Ok(Self {
            prompt: prompt.to_owned(),
            endpoint: text("endpoint", "LLM endpoint is required")?,
            model: text("model", "LLM model is required")?,
            persona: text("persona", "Persona is required")?,
            tone: text("tone", "Tone is required")?,
            length: text("length", "Length is required")?,
            temperature,
            timeout: Duration::from_millis(timeout_ms),
        })
    }

    fn template(&self) -> String {
        [
            "You generate two fields for a short talking video:".to_owned(),
            "1) \"stagePrompt\": a detailed, camera-ready visual description suitable for diffusion (include style, composition, mood).".to_owned(),
            "2) \"narration\": concise spoken text (<= 80 words) matching the topic and tone.".to_owned(),
            format!("Topic: {}", self.prompt),
            format!("Tone: {}", self.tone),
            format!("Persona: {}", self.persona),
            format!("Target length: ~{} seconds of speech.", self.length),
            "Respond ONLY with JSON: {\"stagePrompt\": \"...\", \"narration\": \"...\"}. No markdown.".to_owned(),
        ]
        .join("\n")
    }
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    eval_count: u64,
    #[serde(default)]
    prompt_eval_count: u64,
}

/// Output of the script task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptOutput {
    pub stage_prompt: String,
    pub narration: String,
    pub tokens_used: u64,
    pub model: String,
    pub temperature: f64,
    pub provider: String,
}

impl ScriptOutput {
    fn parse(request: &ScriptRequest, response: &GenerateResponse) -> Self {
        let cleaned = strip_fences(response.response.trim());
        let parsed: Value = serde_json::from_str(&cleaned).unwrap_or(Value::Null);

        let field = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| parsed.get(*name).and_then(Value::as_str))
                .filter(|value| !value.is_empty())
                .map(str::to_owned)
        };

        let stage_prompt = field(&["stagePrompt", "stage_prompt"])
            .or_else(|| {
                cleaned
                    .lines()
                    .map(str::trim)
                    .find(|line| !line.is_empty())
                    .map(str::to_owned)
            })
            .unwrap_or_else(|| format!("Scene inspired by: {}", request.prompt));

        let narration = field(&["narration", "script"])
            .or_else(|| (!cleaned.is_empty()).then(|| cleaned.clone()))
            .unwrap_or_else(|| {
                format!(
                    "({}/{}) Narration for \"{}\" lasting ~{}s.",
                    request.tone, request.persona, request.prompt, request.length
                )
            });

        let counted = response.eval_count + response.prompt_eval_count;
        let tokens_used = if counted > 0 {
            counted
        } else {
            (cleaned.len() as f64 / 4.0).round() as u64
        };

        Self {
            stage_prompt,
            narration,
            tokens_used,
            model: request.model.clone(),
            temperature: request.temperature,
            provider: PROVIDER.to_owned(),
        }
    }
}

/// Removes markdown code fences around a JSON answer.
fn strip_fences(text: &str) -> String {
    let mut cleaned = text.to_owned();
    for fence in ["```json", "```JSON", "```Json", "```"] {
        cleaned = cleaned.replace(fence, "");
    }
    cleaned.trim().to_owned()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use duet_nats::job::JobId;
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::graph::NodeId;
    use crate::planner::PlannerConfig;
    use crate::registry::UpdateSink;

    fn request() -> ScriptRequest {
        ScriptRequest::new(
            &PlannerConfig::default().script_params(),
            &json!({ "prompt": "A lighthouse keeper" }),
        )
        .unwrap()
    }

    #[test]
    fn settings_come_from_params() {
        let request = request();
        assert_eq!(request.model, "llama3");
        assert_eq!(request.length, "20");
        assert_eq!(request.timeout, Duration::from_millis(20_000));
        assert!(request.template().contains("Topic: A lighthouse keeper"));
    }

    #[test]
    fn missing_settings_are_task_errors() {
        let error = ScriptRequest::new(&Map::new(), &json!({ "prompt": "x" })).unwrap_err();
        assert_eq!(error.message, "LLM temperature is required");

        let error = ScriptRequest::new(&Map::new(), &json!({})).unwrap_err();
        assert_eq!(error.message, "Missing prompt for script generation");
    }

    #[test]
    fn parses_fenced_json_answer() {
        let response = GenerateResponse {
            response: "```json\n{\"stage_prompt\": \"A foggy coast\", \"script\": \"Hello\"}\n```".into(),
            eval_count: 10,
            prompt_eval_count: 5,
        };
        let output = ScriptOutput::parse(&request(), &response);
        assert_eq!(output.stage_prompt, "A foggy coast");
        assert_eq!(output.narration, "Hello");
        assert_eq!(output.tokens_used, 15);
        assert_eq!(output.provider, "ollama");
    }

    #[test]
    fn falls_back_on_plain_text_and_empty_answers() {
        let plain = GenerateResponse {
            response: "A foggy coast\nHello there".into(),
            ..GenerateResponse::default()
        };
        let output = ScriptOutput::parse(&request(), &plain);
        assert_eq!(output.stage_prompt, "A foggy coast");
        assert_eq!(output.narration, "A foggy coast\nHello there");
        assert_eq!(output.tokens_used, 6);

        let output = ScriptOutput::parse(&request(), &GenerateResponse::default());
        assert_eq!(output.stage_prompt, "Scene inspired by: A lighthouse keeper");
        assert!(output.narration.starts_with("(casual/default)"));
    }

    #[derive(Default)]
    struct Recorded(Mutex<Vec<f64>>);

    #[async_trait]
    impl UpdateSink for Recorded {
        async fn progress(&self, _node_id: &NodeId, contribution: f64) {
            self.0.lock().await.push(contribution);
        }

        async fn data(&self, _node_id: &NodeId, _data: Value) {}
    }

    /// Mounts one canned `/api/generate` answer.
    async fn llm_server(response: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({ "model": "llama3", "stream": false })))
            .respond_with(response)
            .expect(1)
            .mount(&server)
            .await;
        server
    }

    fn script_ctx(endpoint: String, updates: Arc<Recorded>) -> TaskContext {
        let mut params = PlannerConfig::default().script_params();
        params.insert("endpoint".into(), json!(endpoint));
        TaskContext::new(JobId::new(), NodeId::from("script"), params, 0.1).with_updates(updates)
    }

    #[tokio::test]
    async fn generates_script_and_reports_progress() {
        let server = llm_server(ResponseTemplate::new(200).set_body_json(json!({
            "response": "{\"stagePrompt\": \"A foggy coast\", \"narration\": \"Hello\"}",
            "eval_count": 3,
            "prompt_eval_count": 4,
        })))
        .await;

        let recorded = Arc::new(Recorded::default());
        let ctx = script_ctx(server.uri(), recorded.clone());

        let output = ScriptTask::new(reqwest::Client::new())
            .call(ctx, json!({ "prompt": "A lighthouse keeper" }))
            .await
            .unwrap();

        assert_eq!(output["stagePrompt"], "A foggy coast");
        assert_eq!(output["tokensUsed"], 7);

        let reports = recorded.0.lock().await;
        assert_eq!(reports.len(), 5);
        assert!((reports[4] - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn error_status_fails_the_task() {
        let server = llm_server(ResponseTemplate::new(503).set_body_string("model loading")).await;
        let ctx = script_ctx(server.uri(), Arc::new(Recorded::default()));

        let error = ScriptTask::new(reqwest::Client::new())
            .call(ctx, json!({ "prompt": "x" }))
            .await
            .unwrap_err();
        assert_eq!(error.message, "LLM request failed: 503 Service Unavailable - model loading");
        assert_eq!(error.code.as_deref(), Some("llm_status"));
        assert_eq!(error.details, Some(json!({ "status": 503 })));
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_the_task() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let mut params = PlannerConfig::default().script_params();
        params.insert("endpoint".into(), json!(format!("http://{address}")));
        let ctx = TaskContext::new(JobId::new(), NodeId::from("script"), params, 0.1);

        let error = ScriptTask::new(reqwest::Client::new())
            .call(ctx, json!({ "prompt": "x" }))
            .await
            .unwrap_err();
        assert!(error.message.starts_with("LLM request failed"));
    }
}
