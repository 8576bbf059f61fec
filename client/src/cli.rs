use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use common::{env_or, EnqueueResponse, ErrorResponse, JobStatusView, QueueConfig, WorkerStats};
use reqwest::Client;
use serde_json::json;

/// Igual que en el worker:
/// - En Docker: API_URL=http://api:5000
/// - Local: default http://localhost:5000
fn api_base_url() -> String {
    env_or("API_URL", "http://localhost:5000")
}

#[derive(Parser, Debug)]
#[command(name = "client")]
#[command(about = "CLI simple para hablar con la API de jobs")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Envía un job nuevo (background_task)
    Submit {
        #[arg(long, default_value_t = 1)]
        a: i64,
        #[arg(long, default_value_t = 2)]
        b: i64,
        /// Cantidad de pasos de progreso que publica el worker
        #[arg(long)]
        steps: Option<u64>,
        /// Argumentos crudos en JSON; pisa --a/--b/--steps
        #[arg(long, value_name = "JSON")]
        args: Option<String>,
    },
    /// Consulta el estado de un job
    Status {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Consulta el estado hasta que el job termine
    Wait {
        #[arg(value_name = "JOB_ID")]
        id: String,
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
        /// 0 = sin límite
        #[arg(long, default_value_t = 0)]
        timeout_secs: u64,
    },
    /// Lista los workers vivos según el broker
    Workers,
}

/// Arma los argumentos del job a partir de las flags.
pub fn build_args(a: i64, b: i64, steps: Option<u64>, raw: Option<&str>) -> Result<serde_json::Value> {
    if let Some(raw) = raw {
        return serde_json::from_str(raw).context("--args no es JSON válido");
    }
    let mut args = json!({"a": a, "b": b});
    if let Some(steps) = steps {
        args["steps"] = json!(steps);
    }
    Ok(args)
}

pub fn render_status(view: &JobStatusView) -> String {
    let value = match &view.value {
        Some(v) => v.to_string(),
        None => "-".to_string(),
    };
    format!(
        "Job:\n  id: {}\n  estado: {}\n  valor: {}\n  worker disponible: {}\n  info: {}",
        view.id, view.state, value, view.worker_available, view.info
    )
}

async fn fetch_status(client: &Client, base_url: &str, id: &str) -> Result<JobStatusView> {
    let url = format!("{}/feature-extraction/{}", base_url, id);
    let resp = client.get(&url).send().await?;
    if !resp.status().is_success() {
        let status = resp.status();
        let err: Option<ErrorResponse> = resp.json().await.ok();
        bail!(
            "la API devolvió {}: {}",
            status,
            err.map(|e| e.error).unwrap_or_default()
        );
    }
    Ok(resp.json().await?)
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = api_base_url();

    match cli.command {
        Commands::Submit { a, b, steps, args } => {
            let args = build_args(a, b, steps, args.as_deref())?;
            let url = format!("{}/feature-extraction", base_url);
            let resp = client
                .post(&url)
                .json(&json!({ "args": args }))
                .send()
                .await?;

            if resp.status().is_success() {
                let EnqueueResponse { id } = resp.json().await?;
                println!("Job creado:");
                println!("  id: {}", id);
            } else {
                let status = resp.status();
                let err: Option<ErrorResponse> = resp.json().await.ok();
                bail!(
                    "no se pudo crear el job ({}): {}",
                    status,
                    err.map(|e| e.error).unwrap_or_default()
                );
            }
        }

        Commands::Status { id } => {
            let view = fetch_status(&client, &base_url, &id).await?;
            println!("{}", render_status(&view));
        }

        Commands::Wait {
            id,
            interval_ms,
            timeout_secs,
        } => {
            let started = Instant::now();
            let mut last_state = None;
            loop {
                let view = fetch_status(&client, &base_url, &id).await?;
                if last_state.as_ref() != Some(&view.state) {
                    println!("  {} {}", view.state, view.info);
                    last_state = Some(view.state.clone());
                }
                if view.is_terminal() {
                    println!("{}", render_status(&view));
                    break;
                }
                if timeout_secs > 0 && started.elapsed() > Duration::from_secs(timeout_secs) {
                    bail!("el job {} no terminó en {}s", id, timeout_secs);
                }
                tokio::time::sleep(Duration::from_millis(interval_ms)).await;
            }
        }

        Commands::Workers => {
            let broker_url = QueueConfig::from_env().broker_url;
            let url = format!("{}/api/v1/workers/stats", broker_url);
            let resp = client.get(&url).send().await?;
            if !resp.status().is_success() {
                bail!("Error consultando {} (status {})", url, resp.status());
            }
            let workers: Vec<WorkerStats> = resp.json().await?;
            if workers.is_empty() {
                println!("No hay workers vivos.");
            }
            for w in workers {
                println!("Worker {}", w.worker_id);
                println!("  host           : {}", w.hostname);
                println!("  last_heartbeat : {} s ago", w.last_heartbeat_secs_ago);
                println!("  concurrency    : {}/{}", w.active_jobs, w.max_concurrency);
                println!(
                    "  jobs           : started={}, ok={}, failed={}",
                    w.jobs_started, w.jobs_succeeded, w.jobs_failed
                );
                match (w.last_cpu_percent, w.last_mem_bytes) {
                    (Some(cpu), Some(mem)) => println!("  cpu/mem        : {:.1}% / {} bytes", cpu, mem),
                    _ => println!("  cpu/mem        : (sin datos)"),
                }
                println!();
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{JobState, JobValue};

    #[test]
    fn flags_build_the_default_tuple() {
        assert_eq!(build_args(1, 2, None, None).unwrap(), json!({"a": 1, "b": 2}));
        assert_eq!(
            build_args(1, 2, Some(4), None).unwrap(),
            json!({"a": 1, "b": 2, "steps": 4})
        );
    }

    #[test]
    fn raw_args_win_over_flags() {
        let args = build_args(1, 2, Some(4), Some(r#"{"a": 10, "b": 20}"#)).unwrap();
        assert_eq!(args, json!({"a": 10, "b": 20}));
        assert!(build_args(1, 2, None, Some("{roto")).is_err());
    }

    #[test]
    fn cli_parses_wait_with_defaults() {
        let cli = Cli::try_parse_from(["client", "wait", "abc"]).unwrap();
        match cli.command {
            Commands::Wait {
                id,
                interval_ms,
                timeout_secs,
            } => {
                assert_eq!(id, "abc");
                assert_eq!(interval_ms, 1000);
                assert_eq!(timeout_secs, 0);
            }
            other => panic!("comando inesperado: {other:?}"),
        }
    }

    #[test]
    fn status_render_shows_value_or_dash() {
        let mut view = JobStatusView {
            id: "abc".into(),
            state: JobState::Pending,
            value: None,
            worker_available: false,
            info: String::new(),
        };
        assert!(render_status(&view).contains("valor: -"));

        view.state = JobState::Succeeded;
        view.value = Some(JobValue::from(3_i64));
        let out = render_status(&view);
        assert!(out.contains("estado: SUCCEEDED"));
        assert!(out.contains("valor: 3"));
    }
}
