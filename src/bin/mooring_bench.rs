// Copyright 2026 The Mooring Project
// SPDX-License-Identifier: Apache-2.0

// mooring-bench: time to first token, latency and throughput of
// OpenAI-compatible chat servers.
//
// Usage:
//   cargo run --bin mooring-bench -- --server "mooring|http://127.0.0.1:11435|echo"
//   cargo run --bin mooring-bench -- \
//     --server "ollama|http://localhost:11434|llama3.1" \
//     --server "lmstudio|http://localhost:1234/v1|qwen2.5-7b-instruct" \
//     --prompt "Explain the Turing Test." --iterations 5 --concurrency 4 \
//     --output-prefix ./results/llm-bench --export json csv

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use mooring::bench::{self, BenchConfig, ServerSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ExportFormat {
    Json,
    Csv,
}

#[derive(Parser)]
#[command(name = "mooring-bench", about = "Benchmark OpenAI-compatible chat servers")]
struct Cli {
    /// Server spec 'name|base_url|model' (repeatable)
    #[arg(long = "server", required = true)]
    servers: Vec<ServerSpec>,

    /// Prompt text (repeatable); built-in samples when none are given
    #[arg(long = "prompt")]
    prompts: Vec<String>,

    /// File with one prompt per line
    #[arg(long)]
    prompts_file: Option<PathBuf>,

    /// Iterations per prompt per server
    #[arg(long, default_value_t = 3)]
    iterations: u32,

    /// Maximum concurrent requests
    #[arg(long, default_value_t = 2)]
    concurrency: usize,

    #[arg(long, default_value_t = 0.2)]
    temperature: f64,

    #[arg(long, default_value_t = 512)]
    max_tokens: u32,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 60.0)]
    timeout: f64,

    /// Disable streaming; TTFT then equals total latency
    #[arg(long, default_value_t = false)]
    no_stream: bool,

    /// JSON object merged into every request payload
    #[arg(long)]
    extra_json: Option<String>,

    /// Output path prefix (without extension)
    #[arg(long, default_value = "./llm-bench")]
    output_prefix: PathBuf,

    #[arg(long, value_enum, num_args = 1.., default_values_t = [ExportFormat::Json, ExportFormat::Csv])]
    export: Vec<ExportFormat>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let extra_json = match cli.extra_json.as_deref().map(bench::parse_extra_json).transpose() {
        Ok(extra) => extra,
        Err(e) => {
            eprintln!("failed to parse --extra-json: {e}");
            std::process::exit(2);
        }
    };

    let prompts = match bench::load_prompts(cli.prompts_file.as_deref(), &cli.prompts) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("failed to load prompts: {e}");
            std::process::exit(1);
        }
    };

    if !cli.timeout.is_finite() || cli.timeout <= 0.0 {
        eprintln!("--timeout must be a positive number of seconds");
        std::process::exit(2);
    }

    let config = Arc::new(BenchConfig {
        temperature: cli.temperature,
        max_tokens: cli.max_tokens,
        stream: !cli.no_stream,
        timeout: Duration::from_secs_f64(cli.timeout),
        extra_json,
        api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
    });

    let client = match reqwest::Client::builder().build() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to build http client: {e}");
            std::process::exit(1);
        }
    };

    println!(
        "Running benchmark against {} server(s), {} prompt(s), {} iteration(s) each, concurrency={}...",
        cli.servers.len(),
        prompts.len(),
        cli.iterations,
        cli.concurrency
    );

    let results = bench::run_benchmark(
        client,
        &cli.servers,
        &prompts,
        cli.iterations,
        cli.concurrency,
        config,
    )
    .await;
    let summary = bench::aggregate(&results);

    println!();
    println!("Summary:");
    for (key, stats) in &summary {
        println!("- {key}:");
        println!("  {}", bench::format_summary(stats));
    }

    if let Some(parent) = cli.output_prefix.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = std::fs::create_dir_all(parent) {
            eprintln!("failed to create {}: {e}", parent.display());
            std::process::exit(1);
        }
    }
    if cli.export.contains(&ExportFormat::Json) {
        if let Err(e) = bench::export_json(&cli.output_prefix, &results, &summary) {
            eprintln!("failed to write json: {e}");
            std::process::exit(1);
        }
    }
    if cli.export.contains(&ExportFormat::Csv) {
        if let Err(e) = bench::export_csv(&cli.output_prefix, &results) {
            eprintln!("failed to write csv: {e}");
            std::process::exit(1);
        }
    }

    println!();
    println!("Saved artifacts with prefix: {}", cli.output_prefix.display());
}
