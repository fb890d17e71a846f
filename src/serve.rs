//! HTTP surface for stepping through a program by hand.
//!
//! Blocks are written, on request, to an executor stream that is already
//! open (typically the stdin of an interactive shell). Nothing is tracked
//! about how they run.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::info;

use crate::block::FileName;
use crate::program::{Program, ProgramError};

pub type Executor = Box<dyn Write + Send>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no block {block} in script {script}")]
    NoSuchBlock { script: usize, block: usize },
    #[error("write to executor failed: {0}")]
    Write(String),
}

#[derive(Debug, Serialize)]
pub struct ScriptOutline {
    pub file: FileName,
    pub blocks: Vec<BlockOutline>,
}

#[derive(Debug, Serialize)]
pub struct BlockOutline {
    pub index: usize,
    pub name: String,
    pub line: usize,
    pub code: String,
}

/// Holds the program and the executor the handlers act on.
#[derive(Clone)]
pub struct BlockServer {
    program: Arc<Mutex<Program>>,
    executor: Arc<Mutex<Executor>>,
    shutdown: Arc<Notify>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BlockServer {
    pub fn new(program: Program, executor: Executor) -> Self {
        Self {
            program: Arc::new(Mutex::new(program)),
            executor: Arc::new(Mutex::new(executor)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Writes the code of one block to the executor. This blocks for as
    /// long as the executor does; async callers go through
    /// [`BlockServer::dispatch_blocking`].
    pub fn dispatch(&self, script: usize, block: usize) -> Result<(), DispatchError> {
        let code = lock(&self.program)
            .block_code(script, block)
            .map(str::to_string)
            .ok_or(DispatchError::NoSuchBlock { script, block })?;
        info!("Running block {block} of script {script}");
        let mut executor = lock(&self.executor);
        executor
            .write_all(code.as_bytes())
            .and_then(|_| executor.flush())
            .map_err(|err| DispatchError::Write(err.to_string()))
    }

    /// Runs [`BlockServer::dispatch`] on tokio's blocking pool, so a stalled
    /// executor does not hold up the runtime.
    pub async fn dispatch_blocking(&self, script: usize, block: usize) -> Result<(), DispatchError> {
        let server = self.clone();
        tokio::task::spawn_blocking(move || server.dispatch(script, block))
            .await
            .map_err(|err| DispatchError::Write(err.to_string()))?
    }

    /// Re-reads the program's files and lists their blocks.
    pub fn outline(&self) -> Result<Vec<ScriptOutline>, ProgramError> {
        let mut program = lock(&self.program);
        program.reload()?;
        Ok(program
            .scripts()
            .iter()
            .map(|script| ScriptOutline {
                file: script.file_name().clone(),
                blocks: script
                    .blocks()
                    .iter()
                    .enumerate()
                    .map(|(index, block)| BlockOutline {
                        index,
                        name: block.name().to_string(),
                        line: block.line(),
                        code: block.code().to_string(),
                    })
                    .collect(),
            })
            .collect())
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/", get(control_page))
            .route("/runblock", get(run_block))
            .route("/q", get(quit))
            .with_state(self)
    }

    /// Serves until `/q` is requested.
    pub async fn serve(self, address: &str) -> Result<()> {
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("Fail to bind {address}"))?;
        self.serve_on(listener).await
    }

    pub async fn serve_on(self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr().context("Fail to read bound address")?;
        info!("Serving at http://{local}");
        let shutdown = self.shutdown.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.notified().await })
            .await
            .context("server failed")
    }
}

async fn control_page(State(server): State<BlockServer>) -> Response {
    match server.outline() {
        Ok(outline) => Json(outline).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{err}\n")).into_response(),
    }
}

fn index_param(params: &HashMap<String, String>, name: &str) -> Option<usize> {
    params.get(name).and_then(|v| v.parse().ok())
}

async fn run_block(
    State(server): State<BlockServer>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    let (Some(script), Some(block)) = (index_param(&params, "sid"), index_param(&params, "bid"))
    else {
        return (
            StatusCode::BAD_REQUEST,
            "expected numeric sid and bid\n".to_string(),
        );
    };
    match server.dispatch_blocking(script, block).await {
        Ok(()) => (StatusCode::OK, "Ok\n".to_string()),
        Err(err @ DispatchError::NoSuchBlock { .. }) => (StatusCode::NOT_FOUND, format!("{err}\n")),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{err}\n")),
    }
}

async fn quit(State(server): State<BlockServer>) -> &'static str {
    info!("Quit requested");
    server.shutdown.notify_one();
    "Bye\n"
}
