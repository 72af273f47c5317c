//! In-memory `ContainerRuntime` used by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use warden_core::{ForbiddenPaths, LifecycleConfig, MountPolicy, SandboxLifecycle};
use warden_runtime::mux::{encode_frame, StreamKind};
use warden_runtime::{
    ContainerInspect, ContainerRuntime, ContainerSpec, ContainerState, ContainerStats,
    ContainerSummary, ExecConfig, ExecInspect, ListOptions, MemoryStats, OutputStream, PidsStats,
    Result, RuntimeError,
};

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub spec: ContainerSpec,
    pub created: i64,
    pub running: bool,
    pub oom_killed: bool,
    pub exit_code: i64,
}

/// What a scripted exec produces.
#[derive(Debug, Clone, Default)]
pub struct ScriptedExec {
    /// Raw chunks as they arrive on the wire, already framed.
    pub chunks: Vec<Bytes>,
    pub exit_code: Option<i64>,
    /// Fail the stream after the chunks with this message.
    pub break_stream: Option<String>,
    /// Mark the container OOM-killed and stopped once the exec starts.
    pub oom_kill: bool,
    /// Stop the container with exit code 137 once the exec starts, without OOM.
    pub kill_container: bool,
    /// Delete the container once the exec starts.
    pub delete_container: bool,
}

impl ScriptedExec {
    pub fn stdout(payload: &[u8], exit_code: i64) -> Self {
        Self {
            chunks: vec![encode_frame(StreamKind::Stdout, payload)],
            exit_code: Some(exit_code),
            ..Default::default()
        }
    }
}

#[derive(Debug)]
struct FakeExec {
    container_id: String,
    script: ScriptedExec,
}

/// How a call should fail.
#[derive(Debug, Clone)]
pub enum Fault {
    Api(u16, String),
    Conflict(String),
    Unavailable,
}

impl Fault {
    fn error(&self) -> RuntimeError {
        match self {
            Fault::Api(status, message) => RuntimeError::Api {
                status: *status,
                message: message.clone(),
            },
            Fault::Conflict(message) => RuntimeError::Conflict(message.clone()),
            Fault::Unavailable => RuntimeError::Unavailable {
                endpoint: "/fake.sock".into(),
                message: "connection refused".into(),
            },
        }
    }
}

#[derive(Debug, Default)]
struct State {
    containers: BTreeMap<String, FakeContainer>,
    execs: HashMap<String, FakeExec>,
    exec_configs: Vec<ExecConfig>,
    scripts: VecDeque<ScriptedExec>,
    calls: Vec<String>,
    next_id: u64,
    create_fault: Option<Fault>,
    start_fault: Option<Fault>,
    remove_faults: HashMap<String, Fault>,
    exec_ids: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<State>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        let state = self.state.lock().unwrap();
        state.containers.values().find(|c| c.name == name).cloned()
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().unwrap().containers.len()
    }

    pub fn exec_configs(&self) -> Vec<ExecConfig> {
        self.state.lock().unwrap().exec_configs.clone()
    }

    /// Add a pre-existing container created `age` ago.
    pub fn insert_container(&self, name: &str, age: Duration, running: bool) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("c{:04}", state.next_id);
        let created = chrono::Utc::now().timestamp() - age.as_secs() as i64;
        state.containers.insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                name: name.to_string(),
                spec: ContainerSpec::default(),
                created,
                running,
                oom_killed: false,
                exit_code: 0,
            },
        );
        id
    }

    /// Stop a container behind the lifecycle's back.
    pub fn kill_externally(&self, id: &str) {
        if let Some(c) = self.state.lock().unwrap().containers.get_mut(id) {
            c.running = false;
            c.exit_code = 137;
        }
    }

    /// Remove a container behind the lifecycle's back.
    pub fn delete_externally(&self, id: &str) {
        self.state.lock().unwrap().containers.remove(id);
    }

    pub fn fail_create(&self, fault: Fault) {
        self.state.lock().unwrap().create_fault = Some(fault);
    }

    pub fn fail_start(&self, fault: Fault) {
        self.state.lock().unwrap().start_fault = Some(fault);
    }

    pub fn fail_remove(&self, id: &str, fault: Fault) {
        self.state
            .lock()
            .unwrap()
            .remove_faults
            .insert(id.to_string(), fault);
    }

    /// Queue the behaviour of the next exec.
    pub fn script_exec(&self, script: ScriptedExec) {
        self.state.lock().unwrap().scripts.push_back(script);
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create_container(&self, name: &str, spec: &ContainerSpec) -> Result<String> {
        self.record(format!("create {name}"));
        let mut state = self.state.lock().unwrap();
        if let Some(fault) = state.create_fault.take() {
            return Err(fault.error());
        }
        if state.containers.values().any(|c| c.name == name) {
            return Err(RuntimeError::Conflict(format!(
                "the container name \"/{name}\" is already in use"
            )));
        }
        state.next_id += 1;
        let id = format!("c{:04}", state.next_id);
        state.containers.insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                name: name.to_string(),
                spec: spec.clone(),
                created: chrono::Utc::now().timestamp(),
                running: false,
                oom_killed: false,
                exit_code: 0,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.record(format!("start {id}"));
        let mut state = self.state.lock().unwrap();
        if let Some(fault) = state.start_fault.take() {
            return Err(fault.error());
        }
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {id}")))?;
        if container.running {
            return Err(RuntimeError::NotModified(id.to_string()));
        }
        container.running = true;
        Ok(())
    }

    async fn stop_container(&self, id: &str, _grace: Duration) -> Result<()> {
        self.record(format!("stop {id}"));
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {id}")))?;
        if !container.running {
            return Err(RuntimeError::NotModified(id.to_string()));
        }
        container.running = false;
        Ok(())
    }

    async fn remove_container(&self, id: &str, _force: bool) -> Result<()> {
        self.record(format!("remove {id}"));
        let mut state = self.state.lock().unwrap();
        if let Some(fault) = state.remove_faults.get(id) {
            return Err(fault.error());
        }
        state
            .containers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {id}")))
    }

    async fn list_containers(&self, options: &ListOptions) -> Result<Vec<ContainerSummary>> {
        self.record("list".to_string());
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .values()
            .filter(|c| options.all || c.running)
            .filter(|c| options.name.as_ref().map_or(true, |n| c.name.contains(n.as_str())))
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                names: vec![format!("/{}", c.name)],
                image: c.spec.image.clone(),
                created: c.created,
                state: if c.running { "running" } else { "exited" }.to_string(),
                labels: c.spec.labels.clone(),
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect> {
        self.record(format!("inspect {id}"));
        let state = self.state.lock().unwrap();
        let c = state
            .containers
            .get(id)
            .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {id}")))?;
        Ok(ContainerInspect {
            id: c.id.clone(),
            name: format!("/{}", c.name),
            state: ContainerState {
                status: if c.running { "running" } else { "exited" }.to_string(),
                running: c.running,
                oom_killed: c.oom_killed,
                exit_code: c.exit_code,
            },
        })
    }

    async fn create_exec(&self, container_id: &str, config: &ExecConfig) -> Result<String> {
        self.record(format!("exec {container_id}"));
        let mut state = self.state.lock().unwrap();
        let running = state
            .containers
            .get(container_id)
            .map(|c| c.running)
            .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {container_id}")))?;
        if !running {
            return Err(RuntimeError::Conflict(format!(
                "container {container_id} is not running"
            )));
        }
        let script = state.scripts.pop_front().unwrap_or_else(|| ScriptedExec {
            exit_code: Some(0),
            ..Default::default()
        });
        let exec_id = format!("e{}", state.exec_ids.len() + 1);
        state.exec_ids.insert(exec_id.clone());
        state.exec_configs.push(config.clone());
        state.execs.insert(
            exec_id.clone(),
            FakeExec {
                container_id: container_id.to_string(),
                script,
            },
        );
        Ok(exec_id)
    }

    async fn start_exec(&self, exec_id: &str) -> Result<OutputStream> {
        let mut state = self.state.lock().unwrap();
        let exec = state
            .execs
            .get(exec_id)
            .ok_or_else(|| RuntimeError::NotFound(format!("no such exec: {exec_id}")))?;
        let script = exec.script.clone();
        let container_id = exec.container_id.clone();
        if script.oom_kill {
            if let Some(c) = state.containers.get_mut(&container_id) {
                c.running = false;
                c.oom_killed = true;
                c.exit_code = 137;
            }
        }
        if script.kill_container {
            if let Some(c) = state.containers.get_mut(&container_id) {
                c.running = false;
                c.exit_code = 137;
            }
        }
        if script.delete_container {
            state.containers.remove(&container_id);
        }

        let mut items: Vec<Result<Bytes>> = script.chunks.into_iter().map(Ok).collect();
        if let Some(message) = script.break_stream {
            items.push(Err(RuntimeError::Stream(message)));
        }
        Ok(futures::stream::iter(items).boxed())
    }

    async fn inspect_exec(&self, exec_id: &str) -> Result<ExecInspect> {
        let state = self.state.lock().unwrap();
        let exec = state
            .execs
            .get(exec_id)
            .ok_or_else(|| RuntimeError::NotFound(format!("no such exec: {exec_id}")))?;
        Ok(ExecInspect {
            running: false,
            exit_code: exec.script.exit_code,
        })
    }

    async fn stats(&self, id: &str) -> Result<ContainerStats> {
        let state = self.state.lock().unwrap();
        if !state.containers.contains_key(id) {
            return Err(RuntimeError::NotFound(format!("no such container: {id}")));
        }
        Ok(ContainerStats {
            memory_stats: MemoryStats {
                usage: 64 << 20,
                limit: 2 << 30,
            },
            pids_stats: PidsStats { current: 3 },
            ..Default::default()
        })
    }
}

pub fn forbidden_paths() -> ForbiddenPaths {
    ForbiddenPaths::new(
        "/opt/warden",
        "/etc/warden/credentials.json",
        "/etc/warden",
        "/var/lib/warden/tasks",
    )
    .with_tools_root("/opt/warden/tools")
}

pub fn lifecycle(runtime: Arc<FakeRuntime>) -> SandboxLifecycle {
    SandboxLifecycle::new(
        runtime,
        MountPolicy::new(forbidden_paths()),
        LifecycleConfig::default(),
    )
    .unwrap()
}
