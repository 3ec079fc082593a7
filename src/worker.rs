//! Message-passing boundary for Monte Carlo work.
//!
//! Requests and responses are plain data. A [`MonteCarloWorker`] owns one
//! background thread that handles requests in arrival order; callers get a
//! [`PendingRun`] they can wait on or cancel.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::core::{
    AnalysisOptions, CancellationToken, FullAnalysisResult, RawSimulationParams,
    run_full_monte_carlo_analysis,
};
use crate::error::SimulationError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkerRequest {
    pub simulation_params: RawSimulationParams,
    pub options: AnalysisOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerResponse {
    Success { result: Box<FullAnalysisResult> },
    Error { error: String },
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "Monte Carlo analysis panicked".to_string()
    }
}

/// Handle one request. Errors and panics become `WorkerResponse::Error`.
pub fn respond(request: &WorkerRequest, token: &CancellationToken) -> WorkerResponse {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        run_full_monte_carlo_analysis(&request.simulation_params, &request.options, token)
    }));

    match outcome {
        Ok(Ok(result)) => WorkerResponse::Success {
            result: Box::new(result),
        },
        Ok(Err(err)) => {
            error!(error = %err, "monte carlo analysis failed");
            WorkerResponse::Error {
                error: err.to_string(),
            }
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(panic = %message, "monte carlo analysis panicked");
            WorkerResponse::Error { error: message }
        }
    }
}

struct Job {
    request: WorkerRequest,
    token: CancellationToken,
    reply: Sender<WorkerResponse>,
}

/// A submitted request. Dropping it without waiting leaves the run going
/// until it finishes or is cancelled.
#[derive(Debug)]
pub struct PendingRun {
    receiver: Receiver<WorkerResponse>,
    token: CancellationToken,
}

impl PendingRun {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Block until the worker replies.
    pub fn wait(self) -> Result<WorkerResponse, SimulationError> {
        self.receiver
            .recv()
            .map_err(|_| SimulationError::Worker("worker exited before replying".to_string()))
    }
}

/// Dedicated Monte Carlo thread fed over a channel.
#[derive(Debug)]
pub struct MonteCarloWorker {
    sender: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl MonteCarloWorker {
    pub fn spawn() -> Result<Self, SimulationError> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let handle = thread::Builder::new()
            .name("monte-carlo".to_string())
            .spawn(move || Self::run(receiver))
            .map_err(|e| SimulationError::Worker(format!("failed to start worker thread: {e}")))?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    fn run(receiver: Receiver<Job>) {
        for job in receiver {
            let response = if job.token.is_cancelled() {
                WorkerResponse::Error {
                    error: SimulationError::Cancelled.to_string(),
                }
            } else {
                respond(&job.request, &job.token)
            };
            // The caller may have stopped waiting.
            if job.reply.send(response).is_err() {
                debug!("monte carlo reply dropped, caller went away");
            }
        }
        debug!("monte carlo worker shutting down");
    }

    pub fn submit(&self, request: WorkerRequest) -> Result<PendingRun, SimulationError> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| SimulationError::Worker("worker is shut down".to_string()))?;

        let (reply, receiver) = mpsc::channel();
        let token = CancellationToken::new();
        sender
            .send(Job {
                request,
                token: token.clone(),
                reply,
            })
            .map_err(|_| SimulationError::Worker("worker thread has stopped".to_string()))?;

        Ok(PendingRun { receiver, token })
    }
}

impl Drop for MonteCarloWorker {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop.
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("monte carlo worker thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn request(value: Value) -> WorkerRequest {
        serde_json::from_value(value).expect("valid request")
    }

    fn small_request() -> WorkerRequest {
        request(json!({
            "simulationParams": {
                "initialAssets": 30_000_000,
                "riskAssets": 20_000_000,
                "annualReturnRate": 0.04,
                "monthlyExpense": 200_000,
                "monthlyIncome": 400_000,
                "monthlyInvestment": 100_000,
                "currentAge": 50,
                "startMonth": "2025-01"
            },
            "options": { "trials": 20, "annualVolatility": 0.1, "seed": 7 }
        }))
    }

    #[test]
    fn request_accepts_camel_case_and_missing_options() {
        let req = request(json!({ "simulationParams": { "currentAge": "45" } }));
        assert_eq!(req.options, AnalysisOptions::default());
        assert!(req.simulation_params.current_age.is_some());

        let req = small_request();
        assert_eq!(req.options.trials, Some(20.0));
        assert_eq!(req.options.seed, Some(7));
    }

    #[test]
    fn success_response_is_tagged() {
        let response = respond(&small_request(), &CancellationToken::new());
        let value = serde_json::to_value(&response).expect("serializes");
        assert_eq!(value["type"], "success");
        assert_eq!(value["result"]["trials"], 20);
        assert!(value["result"].get("successRate").is_some());
        assert!(value["result"].get("recommendedFireMonth").is_some());
    }

    #[test]
    fn cancelled_run_is_reported_as_error() {
        let token = CancellationToken::new();
        token.cancel();
        let response = respond(&small_request(), &token);
        let value = serde_json::to_value(&response).expect("serializes");
        assert_eq!(value["type"], "error");
        assert_eq!(value["error"], "Monte Carlo run was cancelled");
    }

    #[test]
    fn panic_payloads_are_turned_into_messages() {
        let payload = panic::catch_unwind(|| -> u32 { panic!("boom") }).expect_err("panicked");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload = panic::catch_unwind(|| -> u32 { panic!("{} {}", "formatted", 1) }).expect_err("panicked");
        assert_eq!(panic_message(payload.as_ref()), "formatted 1");
    }

    #[test]
    fn worker_thread_matches_direct_response() {
        let worker = MonteCarloWorker::spawn().expect("worker starts");
        let pending = worker.submit(small_request()).expect("submitted");
        let threaded = pending.wait().expect("worker replies");
        let direct = respond(&small_request(), &CancellationToken::new());
        assert_eq!(threaded, direct);
    }

    #[test]
    fn worker_handles_requests_in_order() {
        let worker = MonteCarloWorker::spawn().expect("worker starts");
        let first = worker.submit(small_request()).expect("submitted");
        let second = worker.submit(small_request()).expect("submitted");
        second.cancel();

        assert!(matches!(first.wait().expect("reply"), WorkerResponse::Success { .. }));
        match second.wait().expect("reply") {
            WorkerResponse::Error { error } => assert_eq!(error, "Monte Carlo run was cancelled"),
            other => panic!("expected cancellation, got {other:?}"),
        }
    }
}
