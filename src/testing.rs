//! Test doubles: a scripted launcher and an HTTP responder

use async_trait::async_trait;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::supervisor::{LaunchError, LaunchSpec, Launcher, ProcessExit, ProcessHandle};

type ExitCell = Arc<Mutex<Option<ProcessExit>>>;

/// Launcher that records every spawn and hands out fake processes
#[derive(Default)]
pub struct ScriptedLauncher {
    spawned: Mutex<Vec<LaunchSpec>>,
    processes: Mutex<Vec<ExitCell>>,
    peak: Mutex<usize>,
    fail: AtomicBool,
    output: Vec<String>,
    next_pid: AtomicU32,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every spawned process prints `lines` and then goes quiet
    pub fn with_output(lines: Vec<String>) -> Self {
        Self {
            output: lines,
            ..Self::default()
        }
    }

    pub fn fail_spawns(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn spawned(&self) -> Vec<LaunchSpec> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }

    /// Processes that have neither exited nor been killed
    pub fn live(&self) -> usize {
        self.processes
            .lock()
            .unwrap()
            .iter()
            .filter(|cell| cell.lock().unwrap().is_none())
            .count()
    }

    /// Highest number of simultaneously live processes seen at spawn time
    pub fn peak_live(&self) -> usize {
        *self.peak.lock().unwrap()
    }

    /// Make every live process exit with `code`
    pub fn exit_all(&self, code: Option<i32>) {
        for cell in self.processes.lock().unwrap().iter() {
            let mut exit = cell.lock().unwrap();
            if exit.is_none() {
                *exit = Some(ProcessExit { code });
            }
        }
    }
}

#[async_trait]
impl Launcher for ScriptedLauncher {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessHandle>, LaunchError> {
        self.spawned.lock().unwrap().push(spec.clone());

        if self.fail.load(Ordering::SeqCst) {
            return Err(LaunchError::Spawn {
                program: spec.program.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "scripted failure"),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for line in &self.output {
            let _ = tx.send(line.clone());
        }

        let exit: ExitCell = Arc::new(Mutex::new(None));
        self.processes.lock().unwrap().push(exit.clone());
        let live = self.live();
        let mut peak = self.peak.lock().unwrap();
        *peak = (*peak).max(live);

        Ok(Box::new(ScriptedProcess {
            pid: 1000 + self.next_pid.fetch_add(1, Ordering::SeqCst),
            output: Some(rx),
            exit,
        }))
    }
}

struct ScriptedProcess {
    pid: u32,
    output: Option<mpsc::UnboundedReceiver<String>>,
    exit: ExitCell,
}

impl ScriptedProcess {
    fn terminate(&self) {
        let mut exit = self.exit.lock().unwrap();
        if exit.is_none() {
            *exit = Some(ProcessExit { code: None });
        }
    }
}

#[async_trait]
impl ProcessHandle for ScriptedProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn take_output(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.output.take()
    }

    fn try_exit(&mut self) -> Option<ProcessExit> {
        *self.exit.lock().unwrap()
    }

    async fn kill(&mut self) {
        self.terminate();
    }
}

impl Drop for ScriptedProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Response for a request target: `None` never answers
pub type Responder = dyn Fn(&str) -> Option<(u16, String)> + Send + Sync;

/// Axum router on a loopback port, answering every path through a responder
pub struct TestServer {
    pub port: u16,
    paths: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start<F>(respond: F) -> Self
    where
        F: Fn(&str) -> Option<(u16, String)> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let paths = Arc::new(Mutex::new(Vec::new()));
        let respond: Arc<Responder> = Arc::new(respond);

        let recorded = paths.clone();
        let app = Router::new().fallback(move |uri: Uri| {
            let respond = respond.clone();
            let recorded = recorded.clone();
            async move {
                let target = uri
                    .path_and_query()
                    .map(|pq| pq.as_str().to_string())
                    .unwrap_or_else(|| uri.path().to_string());
                recorded.lock().unwrap().push(target.clone());

                match respond(&target) {
                    Some((status, body)) => (
                        StatusCode::from_u16(status).unwrap(),
                        [(header::CONTENT_TYPE, "application/json")],
                        body,
                    )
                        .into_response(),
                    None => std::future::pending::<Response>().await,
                }
            }
        });

        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { port, paths, task }
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Request targets received so far, path plus query
    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
