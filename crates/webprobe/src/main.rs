use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use webprobe_core::{FetchResult, SearchQuery, DEFAULT_MAX_RESULTS, DEFAULT_REGION};
use webprobe_local::config::{parse_bool, show_snippet_from_env, FaultConfig, PerturbConfig};
use webprobe_local::{search, ChatGateway, WebTools};

#[derive(Parser, Debug)]
#[command(name = "webprobe")]
#[command(about = "Simulated web search / page fetch tools (JSON on stdout)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Query the configured search backend (Serper, else SerpApi) and print results.
    Search(SearchCmd),
    /// Fetch a URL and print `{"content": ...}` or `{"error": ...}`.
    Fetch(FetchCmd),
    /// Send a chat-completions request through the OpenAI-compatible gateway.
    Chat(ChatCmd),
    /// Show which backends and knobs are configured (json; no secrets).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct SearchCmd {
    /// Keywords to search for.
    keywords: String,
    #[arg(long, default_value_t = DEFAULT_MAX_RESULTS)]
    max_results: usize,
    /// Region code, e.g. de-de. "wt-wt" means no region.
    #[arg(long, default_value = DEFAULT_REGION)]
    region: String,
    /// Override snippet display for this call (default: WEBPROBE_SHOW_SNIPPET, else true).
    #[arg(long, action = clap::ArgAction::Set)]
    show_snippet: Option<bool>,
}

#[derive(clap::Args, Debug)]
struct FetchCmd {
    /// URL to fetch (http:// or https:// only).
    url: String,
    /// Output mode. Allowed: raw, markdown, truncate
    #[arg(long, default_value = "raw")]
    mode: String,
}

#[derive(clap::Args, Debug)]
struct ChatCmd {
    /// Gateway model id, e.g. qwen/qwen-2.5-72b-instruct
    #[arg(long, env = "WEBPROBE_OPENROUTER_MODEL")]
    model: String,
    #[arg(long, default_value_t = 0.001)]
    temperature: f64,
    /// User message (repeatable). Ignored when --messages-file is given.
    #[arg(long)]
    message: Vec<String>,
    /// JSON file holding the full message array.
    #[arg(long)]
    messages_file: Option<PathBuf>,
    /// JSON file holding an array of tool schemas (function-calling mode).
    #[arg(long)]
    tools_file: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

/// Load `.env`-style configuration without overriding the process environment.
///
/// `WEBPROBE_DOTENV=0` disables loading; `WEBPROBE_ENV_FILE` picks an explicit file.
fn load_env_file() -> Option<String> {
    if let Ok(v) = std::env::var("WEBPROBE_DOTENV") {
        if parse_bool(&v) == Some(false) {
            return None;
        }
    }
    match std::env::var("WEBPROBE_ENV_FILE") {
        Ok(p) if !p.trim().is_empty() => dotenvy::from_path(p.trim())
            .err()
            .map(|e| format!("could not load WEBPROBE_ENV_FILE={}: {e}", p.trim())),
        _ => {
            // A missing .env is the common case, not an error.
            let _ = dotenvy::dotenv();
            None
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn read_json_array(path: &PathBuf) -> Result<Vec<serde_json::Value>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let v: Vec<serde_json::Value> = serde_json::from_str(&raw)
        .with_context(|| format!("{} must hold a JSON array", path.display()))?;
    Ok(v)
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_file_error = load_env_file();
    init_tracing();
    if let Some(e) = env_file_error {
        tracing::warn!("{e}");
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Search(args) => {
            let mut tools = WebTools::from_env()?;
            if let Some(show) = args.show_snippet {
                tools.load_scenario(&webprobe_core::Scenario { show_snippet: show });
            }
            let q = SearchQuery::new(args.keywords)
                .with_max_results(args.max_results)
                .with_region(args.region);
            let results = tools.search_engine_query(&q).await;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Commands::Fetch(args) => {
            let tools = WebTools::from_env()?;
            let r: FetchResult = tools.fetch_url_content(&args.url, &args.mode).await?;
            println!("{}", serde_json::to_string_pretty(&r)?);
        }
        Commands::Chat(args) => {
            let messages = match &args.messages_file {
                Some(p) => read_json_array(p)?,
                None => args
                    .message
                    .iter()
                    .map(|m| serde_json::json!({"role": "user", "content": m}))
                    .collect(),
            };
            if messages.is_empty() {
                anyhow::bail!("no messages: pass --message or --messages-file");
            }
            let tools = match &args.tools_file {
                Some(p) => read_json_array(p)?,
                None => Vec::new(),
            };
            let gateway = ChatGateway::from_env(reqwest::Client::new(), &args.model, args.temperature)?;
            tracing::debug!(
                model = gateway.model(),
                base_url = gateway.base_url(),
                messages = messages.len(),
                tools = tools.len(),
                "chat request"
            );
            let out = if tools.is_empty() {
                gateway.query_prompting(&messages).await?
            } else {
                gateway.query_fc(&messages, &tools).await?
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Doctor(args) => {
            let t0 = std::time::Instant::now();
            // Booleans only; never print values.
            let (serper, serpapi) = search::configured_backends();
            let selected = if serper {
                Some("serper")
            } else if serpapi {
                Some("serpapi")
            } else {
                None
            };
            let perturb = PerturbConfig::from_env();
            let faults = FaultConfig::from_env();
            let payload = serde_json::json!({
                "schema_version": 1,
                "kind": "doctor",
                "ok": true,
                "name": "webprobe",
                "version": env!("CARGO_PKG_VERSION"),
                "configured": {
                    "search": {
                        "serper": serper,
                        "serpapi": serpapi,
                        "selected": selected,
                        "show_snippet": show_snippet_from_env(),
                    },
                    "gateway": {
                        "openrouter": webprobe_local::openai_compat::gateway_configured(),
                    },
                    "perturbation": {
                        "enabled": perturb.enabled,
                        "rate": perturb.rate,
                        "pool_size": perturb.pool.len(),
                        "seed": perturb.seed,
                    },
                    "fault_injection": {
                        "enabled": faults.enabled,
                        "rate": faults.rate,
                    },
                },
                "elapsed_ms": t0.elapsed().as_millis() as u64,
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => {
                    println!("webprobe {}", env!("CARGO_PKG_VERSION"));
                    println!(
                        "search: selected={} serper={serper} serpapi={serpapi}",
                        selected.unwrap_or("none")
                    );
                    println!(
                        "gateway: openrouter={}",
                        payload["configured"]["gateway"]["openrouter"]
                    );
                    println!(
                        "perturbation: enabled={} rate={}",
                        perturb.enabled, perturb.rate
                    );
                    println!(
                        "fault_injection: enabled={} rate={}",
                        faults.enabled, faults.rate
                    );
                }
                _ => println!("{}", payload),
            }
        }
        Commands::Version(args) => {
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "version",
                "ok": true,
                "name": "webprobe",
                "version": env!("CARGO_PKG_VERSION"),
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => println!("webprobe {}", env!("CARGO_PKG_VERSION")),
                _ => println!("{}", v),
            }
        }
    }

    Ok(())
}
