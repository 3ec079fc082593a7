use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};

use firecast::core::{
    AnalysisOptions, AnnualSummary, CancellationToken, RawSimulationParams, SimulationOptions,
    SimulationParams, SimulationResult, params_from_json, perform_fire_simulation, summarize_years,
};
use firecast::error::SimulationError;
use firecast::worker::{WorkerRequest, WorkerResponse, respond};

#[derive(Parser, Debug)]
#[command(name = "firecast", about = "Financial-independence projection and Monte Carlo engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the JSON HTTP API.
    Serve {
        #[arg(long, env = "FIRECAST_PORT", default_value_t = 8080)]
        port: u16,
        #[arg(long, env = "FIRECAST_BIND", default_value = "127.0.0.1")]
        bind: IpAddr,
    },
    /// Run the deterministic projection for a params file and print it as JSON.
    Simulate {
        params: PathBuf,
        /// Retire at this month instead of searching for one.
        #[arg(long)]
        fire_month: Option<usize>,
    },
    /// Run the full Monte Carlo analysis for a params file and print it as JSON.
    MonteCarlo {
        params: PathBuf,
        #[arg(long)]
        trials: Option<u32>,
        #[arg(long)]
        seed: Option<u32>,
        /// Annual return volatility, e.g. 0.15.
        #[arg(long)]
        volatility: Option<f64>,
        #[arg(long)]
        target_success_rate: Option<f64>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateOutput {
    #[serde(flatten)]
    result: SimulationResult,
    annual: Vec<AnnualSummary>,
}

fn read_file(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("cannot read {}: {e}", path.display()))
}

fn read_params(path: &Path) -> Result<RawSimulationParams, String> {
    serde_json::from_str(&read_file(path)?).map_err(|e| SimulationError::from(e).to_string())
}

fn load_params(path: &Path) -> Result<SimulationParams, String> {
    params_from_json(&read_file(path)?).map_err(|e| e.to_string())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{text}");
    Ok(())
}

fn simulate(path: &Path, fire_month: Option<usize>) -> Result<(), String> {
    let params = load_params(path)?;
    let result = perform_fire_simulation(
        &params,
        &SimulationOptions {
            force_fire_month: fire_month,
            record_monthly: true,
            ..SimulationOptions::default()
        },
    );
    info!(
        fire_month = ?result.fire_reached_month,
        survived = result.survived,
        "projection complete"
    );
    let annual = summarize_years(&result.monthly_data, result.fire_reached_month);
    print_json(&SimulateOutput { result, annual })
}

fn monte_carlo(path: &Path, options: AnalysisOptions) -> Result<(), String> {
    let request = WorkerRequest {
        simulation_params: read_params(path)?,
        options,
    };
    let response = respond(&request, &CancellationToken::new());
    print_json(&response)?;
    match response {
        WorkerResponse::Success { .. } => Ok(()),
        WorkerResponse::Error { error } => Err(error),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Serve { port, bind } => firecast::api::run_http_server(bind, port)
            .await
            .map_err(|e| format!("Server error: {e}")),
        Command::Simulate { params, fire_month } => simulate(&params, fire_month),
        Command::MonteCarlo {
            params,
            trials,
            seed,
            volatility,
            target_success_rate,
        } => monte_carlo(
            &params,
            AnalysisOptions {
                trials: trials.map(f64::from),
                annual_volatility: volatility,
                seed,
                target_success_rate,
                ..AnalysisOptions::default()
            },
        ),
    };

    if let Err(msg) = outcome {
        error!("{msg}");
        std::process::exit(1);
    }
}
