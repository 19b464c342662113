//! loan-desk: headless runner for the credit-risk scoring desk.
//!
//! Usage:
//!   loan-desk --data-dir ./data --db desk.db health
//!   loan-desk --db desk.db --token dev-officer-token score application.json
//!   loan-desk --db desk.db --token dev-officer-token save scored.json
//!   loan-desk --db desk.db --token dev-officer-token portfolio
//!   loan-desk --db desk.db simulate --threshold 0.30
//!   loan-desk --db desk.db --token dev-officer-token show <application-id>
//!   loan-desk --db desk.db --token dev-officer-token seed --count 200 --seed 42
//!   loan-desk --db desk.db --ipc-mode      (JSON requests on stdin, one per line)

use anyhow::{Context, Result};
use loan_desk_core::{
    config::ServiceConfig,
    error::{ServiceError, ServiceResult},
    features::ScoreRequest,
    sample::SampleGenerator,
    service::{LoanDesk, SaveApplicationRequest},
    store::LoanStore,
};
use serde::Serialize;
use std::env;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcRequest {
    Health,
    Score {
        #[serde(default)]
        authorization: Option<String>,
        request: ScoreRequest,
    },
    Save {
        #[serde(default)]
        authorization: Option<String>,
        request: SaveApplicationRequest,
    },
    Portfolio {
        #[serde(default)]
        authorization: Option<String>,
    },
    Simulate {
        #[serde(default)]
        authorization: Option<String>,
        #[serde(default)]
        threshold: Option<f64>,
    },
    Show {
        #[serde(default)]
        authorization: Option<String>,
        id: String,
    },
    Quit,
}

#[derive(Serialize)]
struct ErrorBody {
    status: u16,
    error: String,
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("loan-desk: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let args: Vec<String> = env::args().collect();
    let data_dir = flag_value(&args, "--data-dir").unwrap_or("./data");
    let db = flag_value(&args, "--db").unwrap_or(":memory:");
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let authorization = flag_value(&args, "--token").map(|t| format!("Bearer {t}"));
    let authorization = authorization.as_deref();

    // For :memory: use a SQLite shared-memory URI so reopened connections
    // see the same database.
    let db_effective: String = if db == ":memory:" {
        format!(
            "file:loandesk_{}?mode=memory&cache=shared",
            chrono::Utc::now().timestamp_millis()
        )
    } else {
        db.to_string()
    };
    let store = LoanStore::open(&db_effective)?;
    store.migrate()?;

    let config = ServiceConfig::load(data_dir)?;
    let desk = LoanDesk::build(config, store);

    if ipc_mode {
        run_ipc_loop(&desk)?;
        return Ok(ExitCode::SUCCESS);
    }

    let positional = positional_args(&args);
    let Some(command) = positional.first().copied() else {
        anyhow::bail!(
            "missing command (health | score | save | portfolio | simulate | show | seed)"
        );
    };

    let outcome = match command {
        "health" => Ok(to_json(&desk.health())?),
        "score" => {
            let path = positional.get(1).context("score needs an application JSON file")?;
            let req: ScoreRequest = read_json(path)?;
            render(desk.score(&req, authorization))?
        }
        "save" => {
            let path = positional.get(1).context("save needs a scored application JSON file")?;
            let req: SaveApplicationRequest = read_json(path)?;
            render(desk.save_application(&req, authorization))?
        }
        "portfolio" => render(desk.portfolio(authorization))?,
        "simulate" => {
            let threshold = match flag_value(&args, "--threshold") {
                Some(t) => Some(t.parse::<f64>().context("--threshold must be a number")?),
                None => None,
            };
            render(desk.simulate(threshold, authorization))?
        }
        "show" => {
            let id = positional.get(1).context("show needs an application id")?;
            render(desk.application(id, authorization))?
        }
        "seed" => {
            let count = parse_arg(&args, "--count", 100usize);
            let seed = parse_arg(&args, "--seed", 42u64);
            seed_store(&desk, count, seed, authorization)
        }
        other => anyhow::bail!("unknown command: {other}"),
    };

    match outcome {
        Ok(json) => {
            println!("{json}");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("{}", to_json(&error_body(&e))?);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn seed_store(
    desk: &LoanDesk,
    count: usize,
    seed: u64,
    authorization: Option<&str>,
) -> ServiceResult<String> {
    let mut generator = SampleGenerator::new(seed);
    let before = desk.store().total_application_count()?;
    for req in generator.take(count) {
        desk.score(&req, authorization)?;
    }
    let after = desk.store().total_application_count()?;
    log::info!("Seeded {} of {count} sample applications", after - before);
    Ok(serde_json::json!({
        "requested": count,
        "stored": after - before,
        "seed": seed,
    })
    .to_string())
}

fn run_ipc_loop(desk: &LoanDesk) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let request: IpcRequest = match serde_json::from_str(&buffer) {
            Ok(r) => r,
            Err(e) => {
                let body = ErrorBody { status: 400, error: format!("Invalid request: {e}") };
                writeln!(stdout, "{}", serde_json::to_string(&body)?)?;
                stdout.flush()?;
                continue;
            }
        };

        let reply = match request {
            IpcRequest::Quit => break,
            IpcRequest::Health => to_json(&desk.health()),
            IpcRequest::Score { authorization, request } => {
                reply_json(desk.score(&request, authorization.as_deref()))
            }
            IpcRequest::Save { authorization, request } => {
                reply_json(desk.save_application(&request, authorization.as_deref()))
            }
            IpcRequest::Portfolio { authorization } => {
                reply_json(desk.portfolio(authorization.as_deref()))
            }
            IpcRequest::Simulate { authorization, threshold } => {
                reply_json(desk.simulate(threshold, authorization.as_deref()))
            }
            IpcRequest::Show { authorization, id } => {
                reply_json(desk.application(&id, authorization.as_deref()))
            }
        }?;
        writeln!(stdout, "{reply}")?;
        stdout.flush()?;
    }
    Ok(())
}

/// Serialize a successful result; pass a service error through untouched.
fn render<T: Serialize>(result: ServiceResult<T>) -> Result<ServiceResult<String>> {
    match result {
        Ok(value) => Ok(Ok(to_json(&value)?)),
        Err(e) => Ok(Err(e)),
    }
}

fn reply_json<T: Serialize>(result: ServiceResult<T>) -> Result<String> {
    match result {
        Ok(value) => to_json(&value),
        Err(e) => to_json(&error_body(&e)),
    }
}

fn error_body(e: &ServiceError) -> ErrorBody {
    log::debug!("Request failed ({}): {e}", e.class());
    ErrorBody { status: e.status_code(), error: e.public_message() }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> Result<T> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Cannot read {path}"))?;
    serde_json::from_str(&content).with_context(|| format!("Cannot parse {path}"))
}

/// Arguments that are neither flags nor flag values.
fn positional_args(args: &[String]) -> Vec<&str> {
    const VALUED: &[&str] = &["--data-dir", "--db", "--token", "--threshold", "--count", "--seed"];
    let mut out = Vec::new();
    let mut skip_next = false;
    for arg in args.iter().skip(1) {
        if skip_next {
            skip_next = false;
            continue;
        }
        if VALUED.contains(&arg.as_str()) {
            skip_next = true;
        } else if !arg.starts_with("--") {
            out.push(arg.as_str());
        }
    }
    out
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
