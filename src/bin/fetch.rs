use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;
use serde_json::{json, Map, Value};

use carillon::config::load_client_config;
use carillon::header::{HeaderMap, HeaderName, HeaderValue};
use carillon::{Client, ClientCtx, Method};

#[derive(Parser)]
#[command(name = "carillon-fetch")]
#[command(about = "Send requests over one pipelined connection and print the responses as JSON", long_about = None)]
struct Cli {
    /// Base URL, e.g. http://localhost:8080
    url: String,

    /// Request targets, sent in order.
    #[arg(default_value = "/")]
    targets: Vec<String>,

    /// Request method.
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Extra header as `name: value`. Repeatable.
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body.
    #[arg(short, long)]
    data: Option<String>,

    /// TOML client configuration (user agent, timeouts). The URL still
    /// decides where to connect.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Per-step timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Upper bound for the whole batch in milliseconds.
    #[arg(long)]
    batch_timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let method = Method::from_bytes(cli.method.to_ascii_uppercase().as_bytes())?;
    let headers = parse_headers(&cli.headers)?;

    let mut client = Client::from_url(&cli.url)?;
    if let Some(path) = &cli.config {
        let file = load_client_config(path)?;
        let config = client.config_mut();
        config.user_agent = file.user_agent;
        config.step_timeout_ms = file.step_timeout_ms;
        config.batch_timeout_ms = file.batch_timeout_ms;
    }
    if let Some(ms) = cli.timeout_ms {
        client.config_mut().step_timeout_ms = ms;
    }
    if cli.batch_timeout_ms.is_some() {
        client.config_mut().batch_timeout_ms = cli.batch_timeout_ms;
    }

    let responses = Arc::new(Mutex::new(Vec::new()));
    let error = Arc::new(Mutex::new(None));

    for target in &cli.targets {
        let responses = Arc::clone(&responses);
        client.on_http_with(
            method.clone(),
            target,
            headers.clone(),
            cli.data.clone().unwrap_or_default(),
            move |ctx: &mut ClientCtx| {
                if let Ok(mut responses) = responses.lock() {
                    responses.push(describe(ctx));
                }
            },
        );
    }

    let seen = Arc::clone(&error);
    client.on_http_error(move |e| {
        if let Ok(mut error) = seen.lock() {
            *error = Some(e.to_string());
        }
    });

    let completed = client.connect().await;

    let responses = responses.lock().map(|r| r.clone()).unwrap_or_default();
    let error = error.lock().map(|e| e.clone()).unwrap_or_default();
    let output = json!({
        "completed": completed,
        "remaining": client.queue_len(),
        "responses": responses,
        "error": error,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    if error.is_some() {
        std::process::exit(1);
    }
    Ok(())
}

fn parse_headers(raw: &[String]) -> Result<HeaderMap, Box<dyn std::error::Error>> {
    let mut headers = HeaderMap::new();
    for line in raw {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| format!("header `{}` is not `name: value`", line))?;
        headers.append(
            HeaderName::from_bytes(name.trim().as_bytes())?,
            HeaderValue::from_str(value.trim())?,
        );
    }
    Ok(headers)
}

fn describe(ctx: &ClientCtx) -> Value {
    let headers: Map<String, Value> = ctx
        .res
        .headers
        .iter()
        .map(|(name, value)| {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            (name.to_string(), Value::String(value))
        })
        .collect();

    json!({
        "target": ctx.req.target,
        "status": ctx.res.status_code(),
        "headers": headers,
        "body": ctx.res.text(),
    })
}
