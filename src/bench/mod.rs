// Copyright 2026 The Mooring Project
// SPDX-License-Identifier: Apache-2.0

// Benchmark harness for OpenAI-compatible chat servers.
//
// Sends every prompt `iterations` times to every server under a
// concurrency bound, measuring time to first token, total latency and
// output size. Works against mooring itself or any local runtime.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Prompts used when none are supplied.
pub const DEFAULT_PROMPTS: [&str; 3] = [
    "Explain the significance of the Turing Test in AI in 2-3 sentences.",
    "Write a Python function for Fibonacci using memoization.",
    "Summarize the benefits and drawbacks of static typing vs dynamic typing.",
];

#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("--server must be of the form 'name|base_url|model', got {0:?}")]
    ServerSpec(String),

    #[error("--extra-json must be a JSON object: {0}")]
    ExtraJson(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// One server under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    pub name: String,
    pub base_url: String,
    pub model: String,
}

impl ServerSpec {
    /// Chat completions URL, accepting bases with or without `/v1`.
    pub fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }
}

impl FromStr for ServerSpec {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '|').map(str::trim);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), Some(base_url), Some(model))
                if !name.is_empty() && !base_url.is_empty() && !model.is_empty() =>
            {
                Ok(Self {
                    name: name.to_string(),
                    base_url: base_url.to_string(),
                    model: model.to_string(),
                })
            }
            _ => Err(BenchError::ServerSpec(s.to_string())),
        }
    }
}

/// Request shape shared by every run.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub temperature: f64,
    pub max_tokens: u32,
    pub stream: bool,
    pub timeout: Duration,
    /// Merged into every payload, overriding the fields above.
    pub extra_json: Option<Map<String, Value>>,
    /// Sent as a bearer token when set.
    pub api_key: Option<String>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 512,
            stream: true,
            timeout: Duration::from_secs(60),
            extra_json: None,
            api_key: None,
        }
    }
}

pub fn parse_extra_json(raw: &str) -> Result<Map<String, Value>, BenchError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(BenchError::ExtraJson(format!("got {other}"))),
        Err(e) => Err(BenchError::ExtraJson(e.to_string())),
    }
}

/// Prompts from `file` (one per line, blanks skipped) followed by
/// `inline`; the built-in set when both are empty.
pub fn load_prompts(file: Option<&Path>, inline: &[String]) -> Result<Vec<String>, BenchError> {
    let mut prompts = Vec::new();
    if let Some(path) = file {
        let content = std::fs::read_to_string(path)?;
        prompts.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string),
        );
    }
    prompts.extend(inline.iter().cloned());
    if prompts.is_empty() {
        prompts = DEFAULT_PROMPTS.iter().map(|p| p.to_string()).collect();
    }
    Ok(prompts)
}

pub fn build_payload(server: &ServerSpec, prompt: &str, config: &BenchConfig) -> Value {
    let mut payload = serde_json::json!({
        "model": server.model,
        "messages": [{"role": "user", "content": prompt}],
        "temperature": config.temperature,
        "max_tokens": config.max_tokens,
        "stream": config.stream,
    });
    if let (Some(extra), Value::Object(fields)) = (&config.extra_json, &mut payload) {
        for (key, value) in extra {
            fields.insert(key.clone(), value.clone());
        }
    }
    payload
}

// ---------------------------------------------------------------------------
// Single run
// ---------------------------------------------------------------------------

/// Outcome of one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub server: String,
    pub model: String,
    pub prompt_id: usize,
    pub iteration: u32,
    pub success: bool,
    pub status_code: Option<u16>,
    pub ttft_ms: Option<f64>,
    pub total_ms: Option<f64>,
    pub output_chars: usize,
    pub output_bytes: usize,
    pub error: Option<String>,
}

/// What one line of a streamed body contributes.
#[derive(Debug, PartialEq, Eq)]
pub enum StreamLine {
    Done,
    Text(String),
}

/// Interpret one line of a streamed response.
///
/// Lines without `data: ` are taken as raw data; non-JSON data counts as
/// raw text.
pub fn parse_stream_line(line: &str) -> Option<StreamLine> {
    let line = line.trim_end_matches('\r');
    if line.is_empty() {
        return None;
    }
    let data = line.strip_prefix("data: ").unwrap_or(line).trim();
    if data == "[DONE]" {
        return Some(StreamLine::Done);
    }
    let text = match serde_json::from_str::<Value>(data) {
        Ok(obj) => {
            let source = match obj.get("choices").and_then(Value::as_array) {
                Some(choices) if !choices.is_empty() => choices[0].get("delta"),
                _ => Some(&obj),
            };
            source
                .and_then(|v| v.get("content"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        }
        Err(_) => data.to_string(),
    };
    Some(StreamLine::Text(text))
}

/// Output size of a non-streamed body.
fn non_stream_output(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(obj)) => match obj.get("choices").and_then(Value::as_array) {
            Some(choices) if !choices.is_empty() => choices[0]
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => Value::Object(obj).to_string(),
        },
        _ => body.to_string(),
    }
}

#[derive(Default)]
struct Progress {
    status_code: Option<u16>,
    ttft_ms: Option<f64>,
    output_chars: usize,
    output_bytes: usize,
}

impl Progress {
    fn add(&mut self, text: &str, started: Instant) {
        if text.is_empty() {
            return;
        }
        if self.ttft_ms.is_none() {
            self.ttft_ms = Some(elapsed_ms(started));
        }
        self.output_chars += text.chars().count();
        self.output_bytes += text.len();
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Send one request and measure it.
pub async fn run_single(
    client: &reqwest::Client,
    server: &ServerSpec,
    prompt_id: usize,
    iteration: u32,
    prompt: &str,
    config: &BenchConfig,
) -> RunResult {
    let started = Instant::now();
    let mut progress = Progress::default();
    let outcome = exchange(client, server, prompt, config, started, &mut progress).await;
    let total_ms = Some(elapsed_ms(started));

    let (success, error) = match outcome {
        Ok(()) => (
            progress
                .status_code
                .is_some_and(|code| (200..300).contains(&code)),
            None,
        ),
        Err(e) => {
            tracing::debug!(server = %server.name, error = %e, "benchmark request failed");
            progress.status_code = None;
            (false, Some(e.to_string()))
        }
    };

    RunResult {
        server: server.name.clone(),
        model: server.model.clone(),
        prompt_id,
        iteration,
        success,
        status_code: progress.status_code,
        ttft_ms: progress.ttft_ms,
        total_ms,
        output_chars: progress.output_chars,
        output_bytes: progress.output_bytes,
        error,
    }
}

async fn exchange(
    client: &reqwest::Client,
    server: &ServerSpec,
    prompt: &str,
    config: &BenchConfig,
    started: Instant,
    progress: &mut Progress,
) -> Result<(), reqwest::Error> {
    let accept = if config.stream {
        "text/event-stream"
    } else {
        "application/json"
    };
    let mut request = client
        .post(server.endpoint())
        .header(reqwest::header::ACCEPT, accept)
        .timeout(config.timeout)
        .json(&build_payload(server, prompt, config));
    if let Some(key) = &config.api_key {
        request = request.bearer_auth(key);
    }

    let response = request.send().await?;
    progress.status_code = Some(response.status().as_u16());

    if !config.stream {
        let body = response.text().await?;
        progress.ttft_ms = Some(elapsed_ms(started));
        let output = non_stream_output(&body);
        progress.output_chars = output.chars().count();
        progress.output_bytes = output.len();
        return Ok(());
    }

    let mut body = response.bytes_stream();
    let mut pending: Vec<u8> = Vec::new();
    while let Some(chunk) = body.next().await {
        pending.extend_from_slice(&chunk?);
        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            match parse_stream_line(&line) {
                Some(StreamLine::Done) => return Ok(()),
                Some(StreamLine::Text(text)) => progress.add(&text, started),
                None => {}
            }
        }
    }
    if let Some(StreamLine::Text(text)) = parse_stream_line(&String::from_utf8_lossy(&pending)) {
        progress.add(&text, started);
    }
    Ok(())
}

/// Run every (server, prompt, iteration) with at most `concurrency` in
/// flight. Results arrive in completion order.
pub async fn run_benchmark(
    client: reqwest::Client,
    servers: &[ServerSpec],
    prompts: &[String],
    iterations: u32,
    concurrency: usize,
    config: Arc<BenchConfig>,
) -> Vec<RunResult> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for server in servers {
        for (prompt_id, prompt) in prompts.iter().enumerate() {
            for iteration in 1..=iterations {
                let client = client.clone();
                let server = server.clone();
                let prompt = prompt.clone();
                let config = config.clone();
                let semaphore = semaphore.clone();
                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    run_single(&client, &server, prompt_id, iteration, &prompt, &config).await
                });
            }
        }
    }

    let mut results = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => tracing::warn!(error = %e, "benchmark task panicked"),
        }
    }
    results
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Linear-interpolated percentile, `p` in `0..=1`.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let k = (sorted.len() - 1) as f64 * p;
    let lo = k.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    if lo == hi {
        return Some(sorted[lo]);
    }
    Some(sorted[lo] * (hi as f64 - k) + sorted[hi] * (k - lo as f64))
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Per (server, model) statistics. Missing values serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub runs: usize,
    pub success_rate: f64,
    pub ttft_ms_avg: Option<f64>,
    pub ttft_ms_p50: Option<f64>,
    pub ttft_ms_p95: Option<f64>,
    pub total_ms_avg: Option<f64>,
    pub total_ms_p50: Option<f64>,
    pub total_ms_p95: Option<f64>,
    pub output_chars_avg: Option<f64>,
    pub output_bytes_avg: Option<f64>,
    pub chars_per_sec_avg: Option<f64>,
    pub bytes_per_sec_avg: Option<f64>,
}

/// Summaries keyed `server|model`. Only successful runs feed the timings.
pub fn aggregate(results: &[RunResult]) -> BTreeMap<String, Summary> {
    let mut groups: BTreeMap<String, Vec<&RunResult>> = BTreeMap::new();
    for result in results {
        groups
            .entry(format!("{}|{}", result.server, result.model))
            .or_default()
            .push(result);
    }

    groups
        .into_iter()
        .map(|(key, runs)| {
            let ok: Vec<&RunResult> = runs.iter().copied().filter(|r| r.success).collect();
            let totals: Vec<f64> = ok.iter().filter_map(|r| r.total_ms).collect();
            let ttfts: Vec<f64> = ok.iter().filter_map(|r| r.ttft_ms).collect();
            let chars: Vec<f64> = ok.iter().map(|r| r.output_chars as f64).collect();
            let bytes: Vec<f64> = ok.iter().map(|r| r.output_bytes as f64).collect();

            let total_ms_avg = mean(&totals);
            let output_chars_avg = mean(&chars);
            let output_bytes_avg = mean(&bytes);
            let per_sec = |avg: Option<f64>| match (avg, total_ms_avg) {
                (Some(avg), Some(ms)) if ms > 0.0 => Some(avg / (ms / 1000.0)),
                _ => None,
            };

            let summary = Summary {
                runs: runs.len(),
                success_rate: ok.len() as f64 / runs.len().max(1) as f64,
                ttft_ms_avg: mean(&ttfts),
                ttft_ms_p50: percentile(&ttfts, 0.5),
                ttft_ms_p95: percentile(&ttfts, 0.95),
                total_ms_avg,
                total_ms_p50: percentile(&totals, 0.5),
                total_ms_p95: percentile(&totals, 0.95),
                output_chars_avg,
                output_bytes_avg,
                chars_per_sec_avg: per_sec(output_chars_avg),
                bytes_per_sec_avg: per_sec(output_bytes_avg),
            };
            (key, summary)
        })
        .collect()
}

struct Ms(Option<f64>);

impl fmt::Display for Ms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{v:.1}"),
            None => f.write_str("n/a"),
        }
    }
}

/// One console line for a summary.
pub fn format_summary(summary: &Summary) -> String {
    format!(
        "success_rate={:.1}%  ttft_avg={}ms  ttft_p50={}ms  ttft_p95={}ms  \
         total_avg={}ms  p50={}ms  p95={}ms  chars/s={}  bytes/s={}",
        summary.success_rate * 100.0,
        Ms(summary.ttft_ms_avg),
        Ms(summary.ttft_ms_p50),
        Ms(summary.ttft_ms_p95),
        Ms(summary.total_ms_avg),
        Ms(summary.total_ms_p50),
        Ms(summary.total_ms_p95),
        Ms(summary.chars_per_sec_avg),
        Ms(summary.bytes_per_sec_avg),
    )
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

const CSV_COLUMNS: [&str; 11] = [
    "server",
    "model",
    "prompt_id",
    "iteration",
    "success",
    "status_code",
    "ttft_ms",
    "total_ms",
    "output_chars",
    "output_bytes",
    "error",
];

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Write `<prefix>.results.json` and `<prefix>.summary.json`.
pub fn export_json(
    prefix: &Path,
    results: &[RunResult],
    summary: &BTreeMap<String, Summary>,
) -> Result<(PathBuf, PathBuf), BenchError> {
    let results_path = with_suffix(prefix, ".results.json");
    let summary_path = with_suffix(prefix, ".summary.json");
    std::fs::write(&results_path, serde_json::to_vec_pretty(results)?)?;
    std::fs::write(&summary_path, serde_json::to_vec_pretty(summary)?)?;
    Ok((results_path, summary_path))
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

pub fn to_csv(results: &[RunResult]) -> String {
    let mut out = CSV_COLUMNS.join(",");
    out.push_str("\r\n");
    for r in results {
        let row = [
            csv_field(&r.server),
            csv_field(&r.model),
            r.prompt_id.to_string(),
            r.iteration.to_string(),
            r.success.to_string(),
            opt(&r.status_code),
            opt(&r.ttft_ms),
            opt(&r.total_ms),
            r.output_chars.to_string(),
            r.output_bytes.to_string(),
            csv_field(r.error.as_deref().unwrap_or_default()),
        ];
        out.push_str(&row.join(","));
        out.push_str("\r\n");
    }
    out
}

/// Write `<prefix>.results.csv`.
pub fn export_csv(prefix: &Path, results: &[RunResult]) -> Result<PathBuf, BenchError> {
    let path = with_suffix(prefix, ".results.csv");
    std::fs::write(&path, to_csv(results))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn spec(base_url: &str) -> ServerSpec {
        ServerSpec {
            name: "local".into(),
            base_url: base_url.into(),
            model: "m".into(),
        }
    }

    fn result(server: &str, success: bool, ttft: f64, total: f64, chars: usize) -> RunResult {
        RunResult {
            server: server.into(),
            model: "m".into(),
            prompt_id: 0,
            iteration: 1,
            success,
            status_code: Some(if success { 200 } else { 500 }),
            ttft_ms: Some(ttft),
            total_ms: Some(total),
            output_chars: chars,
            output_bytes: chars,
            error: None,
        }
    }

    #[test]
    fn endpoint_normalization() {
        assert_eq!(
            spec("http://localhost:11434").endpoint(),
            "http://localhost:11434/v1/chat/completions"
        );
        assert_eq!(
            spec("http://localhost:1234/v1").endpoint(),
            "http://localhost:1234/v1/chat/completions"
        );
        assert_eq!(
            spec("http://localhost:1234/v1/").endpoint(),
            "http://localhost:1234/v1/chat/completions"
        );
    }

    #[test]
    fn server_spec_parsing() {
        let parsed: ServerSpec = "ollama | http://localhost:11434 | llama3.1".parse().unwrap();
        assert_eq!(parsed.name, "ollama");
        assert_eq!(parsed.base_url, "http://localhost:11434");
        assert_eq!(parsed.model, "llama3.1");

        let with_pipe: ServerSpec = "a|http://h|model|tag".parse().unwrap();
        assert_eq!(with_pipe.model, "model|tag");

        assert!("just-a-name".parse::<ServerSpec>().is_err());
        assert!("a||m".parse::<ServerSpec>().is_err());
    }

    #[test]
    fn extra_json_must_be_object() {
        assert!(parse_extra_json(r#"{"top_k": 40}"#).is_ok());
        assert!(matches!(parse_extra_json("[1,2]"), Err(BenchError::ExtraJson(_))));
        assert!(matches!(parse_extra_json("{oops"), Err(BenchError::ExtraJson(_))));
    }

    #[test]
    fn extra_json_overrides_payload() {
        let config = BenchConfig {
            extra_json: Some(parse_extra_json(r#"{"temperature": 0.9, "seed": 7}"#).unwrap()),
            ..BenchConfig::default()
        };
        let payload = build_payload(&spec("http://h"), "hi", &config);
        assert_eq!(payload["temperature"], 0.9);
        assert_eq!(payload["seed"], 7);
        assert_eq!(payload["messages"][0]["content"], "hi");
        assert_eq!(payload["stream"], true);
    }

    #[test]
    fn prompts_from_file_then_inline() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"first\n\n  second  \n").unwrap();
        let prompts = load_prompts(Some(file.path()), &["third".to_string()]).unwrap();
        assert_eq!(prompts, vec!["first", "second", "third"]);
    }

    #[test]
    fn prompts_default_when_empty() {
        let prompts = load_prompts(None, &[]).unwrap();
        assert_eq!(prompts.len(), DEFAULT_PROMPTS.len());
    }

    #[test]
    fn stream_line_variants() {
        assert_eq!(parse_stream_line(""), None);
        assert_eq!(parse_stream_line("data: [DONE]"), Some(StreamLine::Done));
        assert_eq!(
            parse_stream_line(r#"data: {"choices":[{"delta":{"content":"hi"}}]}"#),
            Some(StreamLine::Text("hi".into()))
        );
        assert_eq!(
            parse_stream_line(r#"{"content":"raw json"}"#),
            Some(StreamLine::Text("raw json".into()))
        );
        assert_eq!(
            parse_stream_line("data: not json"),
            Some(StreamLine::Text("not json".into()))
        );
        assert_eq!(
            parse_stream_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            Some(StreamLine::Text(String::new()))
        );
    }

    #[test]
    fn non_stream_output_prefers_message_content() {
        assert_eq!(
            non_stream_output(r#"{"choices":[{"message":{"content":"héllo"}}]}"#),
            "héllo"
        );
        assert_eq!(non_stream_output("plain"), "plain");
        assert_eq!(non_stream_output(r#"{"a":1}"#), r#"{"a":1}"#);
    }

    #[test]
    fn percentile_interpolates() {
        let values = [10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile(&values, 0.5), Some(25.0));
        assert_eq!(percentile(&values, 0.0), Some(10.0));
        assert_eq!(percentile(&values, 1.0), Some(40.0));
        assert_eq!(percentile(&[5.0], 0.95), Some(5.0));
        assert_eq!(percentile(&[], 0.5), None);
    }

    #[test]
    fn aggregate_uses_successful_runs() {
        let results = vec![
            result("a", true, 10.0, 100.0, 50),
            result("a", true, 30.0, 300.0, 150),
            result("a", false, 1.0, 1.0, 0),
            result("b", false, 1.0, 1.0, 0),
        ];
        let summary = aggregate(&results);

        let a = &summary["a|m"];
        assert_eq!(a.runs, 3);
        assert!((a.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(a.ttft_ms_avg, Some(20.0));
        assert_eq!(a.total_ms_avg, Some(200.0));
        assert_eq!(a.output_chars_avg, Some(100.0));
        assert_eq!(a.chars_per_sec_avg, Some(500.0));

        let b = &summary["b|m"];
        assert_eq!(b.success_rate, 0.0);
        assert_eq!(b.ttft_ms_avg, None);
        let json = serde_json::to_value(b).unwrap();
        assert!(json["total_ms_p95"].is_null());
    }

    #[test]
    fn csv_escapes_fields() {
        let mut r = result("a,b", false, 1.0, 2.0, 0);
        r.error = Some("said \"no\"".into());
        r.status_code = None;
        let csv = to_csv(&[r]);
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(CSV_COLUMNS.join(",").as_str()));
        assert_eq!(
            lines.next(),
            Some(r#""a,b",m,0,1,false,,1,2,0,0,"said ""no""""#)
        );
    }

    #[test]
    fn exports_write_expected_files() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("bench");
        let results = vec![result("a", true, 10.0, 100.0, 5)];
        let (results_path, summary_path) =
            export_json(&prefix, &results, &aggregate(&results)).unwrap();
        let csv_path = export_csv(&prefix, &results).unwrap();

        assert!(results_path.ends_with("bench.results.json"));
        let summary: Value =
            serde_json::from_slice(&std::fs::read(summary_path).unwrap()).unwrap();
        assert_eq!(summary["a|m"]["runs"], 1);
        assert!(std::fs::read_to_string(csv_path).unwrap().starts_with("server,model"));
    }

    #[tokio::test]
    async fn streaming_run_measures_content() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"hé\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(serde_json::json!({"model": "m", "stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let result = run_single(&client, &spec(&server.uri()), 0, 1, "hi", &BenchConfig::default()).await;
        assert!(result.success);
        assert_eq!(result.status_code, Some(200));
        assert_eq!(result.output_chars, 5);
        assert_eq!(result.output_bytes, 6);
        assert!(result.ttft_ms.is_some());
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn non_streaming_run_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "four"}}]
            })))
            .mount(&server)
            .await;

        let config = BenchConfig {
            stream: false,
            api_key: Some("secret".into()),
            ..BenchConfig::default()
        };
        let client = reqwest::Client::new();
        let result = run_single(&client, &spec(&server.uri()), 0, 1, "hi", &config).await;
        assert!(result.success);
        assert_eq!(result.output_chars, 4);
        assert!(result.ttft_ms.is_some());
    }

    #[tokio::test]
    async fn http_error_status_is_not_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let config = BenchConfig {
            stream: false,
            ..BenchConfig::default()
        };
        let result = run_single(&reqwest::Client::new(), &spec(&server.uri()), 0, 1, "hi", &config).await;
        assert!(!result.success);
        assert_eq!(result.status_code, Some(404));
    }

    #[tokio::test]
    async fn benchmark_runs_every_combination() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\ndata: [DONE]\n\n",
                "text/event-stream",
            ))
            .expect(6)
            .mount(&server)
            .await;

        let prompts = vec!["a".to_string(), "b".to_string()];
        let results = run_benchmark(
            reqwest::Client::new(),
            &[spec(&server.uri())],
            &prompts,
            3,
            2,
            Arc::new(BenchConfig::default()),
        )
        .await;
        assert_eq!(results.len(), 6);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(aggregate(&results)["local|m"].runs, 6);
    }
}
