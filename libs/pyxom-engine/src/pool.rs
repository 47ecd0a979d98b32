/// Worker Pool Manager
///
/// **Responsibility:**
/// Own a bounded set of executors and a FIFO queue of tasks, hand each task
/// to an idle executor, and keep the set healthy.
///
/// **Concurrency Model:**
/// - A single dispatcher task owns every slot and the queue; nothing else
///   mutates them. Callers talk to it over an mpsc channel.
/// - Each running task executes on its own spawned task that borrows the
///   slot's sandbox and hands it back through a completion channel.
/// - `submit` never blocks; the returned `TaskHandle` resolves when the
///   dispatcher answers.
///
/// **Lifecycle Rules:**
/// - Timeout or infrastructure failure: the task fails, the executor is
///   terminated and replaced
/// - Idle slots are reclaimed on each reap tick down to a floor of one, and
///   regrown up to `size` on demand
/// - A queued task that waited longer than its own timeout fails with
///   `QueueTimeout` instead of running
/// - Dropping a `TaskHandle` cancels a queued task for free; a running task
///   runs to completion and its result is discarded

use crate::error::ExecutionError;
use crate::sandbox::{ExecutionOutput, ExecutionRequest, Sandbox, SandboxFactory};
use pyxom_common::config::Config;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Upper bound on interpreter boot, separate from the task's own timeout
const BOOT_TIMEOUT: Duration = Duration::from_secs(120);

type TaskResult = Result<ExecutionOutput, ExecutionError>;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub size: usize,
    pub idle_timeout: Duration,
    pub reap_interval: Duration,
    pub max_queue_len: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 3,
            idle_timeout: Duration::from_secs(300),
            reap_interval: Duration::from_secs(60),
            max_queue_len: 256,
        }
    }
}

impl PoolConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            size: config.pool_size.max(1),
            idle_timeout: Duration::from_millis(config.pool_idle_timeout_ms),
            reap_interval: Duration::from_millis(config.pool_reap_interval_ms.max(1)),
            max_queue_len: config.pool_max_queue,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorStatus {
    pub id: usize,
    pub busy: bool,
    pub current_task: Option<String>,
    pub idle_ms: u64,
    pub tasks_completed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub backend: String,
    pub size: usize,
    pub total_executors: usize,
    pub busy_executors: usize,
    pub queue_length: usize,
    pub completed_tasks: u64,
    pub replaced_executors: u64,
    pub executors: Vec<ExecutorStatus>,
}

struct QueuedTask {
    request: ExecutionRequest,
    enqueued_at: Instant,
    reply: oneshot::Sender<TaskResult>,
}

enum PoolCommand {
    Submit(QueuedTask),
    Status(oneshot::Sender<PoolStatus>),
    Shutdown(oneshot::Sender<()>),
}

struct Completion {
    executor_id: usize,
    sandbox: Option<Box<dyn Sandbox>>,
    outcome: TaskResult,
}

struct RunningTask {
    task_id: String,
    reply: oneshot::Sender<TaskResult>,
    join: JoinHandle<()>,
}

struct ExecutorSlot {
    id: usize,
    sandbox: Option<Box<dyn Sandbox>>,
    current: Option<RunningTask>,
    last_used_at: Instant,
    tasks_completed: u64,
}

impl ExecutorSlot {
    fn busy(&self) -> bool {
        self.current.is_some()
    }
}

/// Resolves to the outcome of one submitted task
pub struct TaskHandle {
    task_id: String,
    rx: oneshot::Receiver<TaskResult>,
}

impl TaskHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }
}

impl Future for TaskHandle {
    type Output = TaskResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ExecutionError::PoolClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Cheap, cloneable handle to the dispatcher
#[derive(Clone)]
pub struct WorkerPool {
    commands: mpsc::UnboundedSender<PoolCommand>,
    size: usize,
}

impl WorkerPool {
    /// Spawn the dispatcher. Must be called inside a Tokio runtime.
    pub fn new(config: PoolConfig, factory: Arc<dyn SandboxFactory>) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let size = config.size.max(1);

        info!(
            size = size,
            backend = factory.backend(),
            idle_timeout_ms = config.idle_timeout.as_millis() as u64,
            max_queue_len = config.max_queue_len,
            "Starting worker pool"
        );

        let mut dispatcher = Dispatcher {
            config: PoolConfig { size, ..config },
            factory,
            slots: Vec::with_capacity(size),
            queue: VecDeque::new(),
            next_executor_id: 0,
            completions_tx,
            completed_tasks: 0,
            replaced_executors: 0,
        };
        for _ in 0..size {
            dispatcher.add_slot();
        }

        tokio::spawn(dispatcher.run(rx, completions_rx));

        Self { commands, size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue `code` for execution with `stdin`. Returns immediately.
    pub fn submit(&self, code: impl Into<String>, stdin: impl Into<String>, timeout_ms: u64) -> TaskHandle {
        let request = ExecutionRequest {
            task_id: uuid::Uuid::new_v4().to_string(),
            code: code.into(),
            stdin: stdin.into(),
            timeout_ms,
        };
        self.submit_request(request)
    }

    pub fn submit_request(&self, request: ExecutionRequest) -> TaskHandle {
        let (reply, rx) = oneshot::channel();
        let task_id = request.task_id.clone();
        let task = QueuedTask {
            request,
            enqueued_at: Instant::now(),
            reply,
        };
        // On a closed pool the reply sender is dropped here and the handle
        // resolves to PoolClosed
        let _ = self.commands.send(PoolCommand::Submit(task));
        TaskHandle { task_id, rx }
    }

    pub async fn status(&self) -> Result<PoolStatus, ExecutionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(PoolCommand::Status(tx))
            .map_err(|_| ExecutionError::PoolClosed)?;
        rx.await.map_err(|_| ExecutionError::PoolClosed)
    }

    /// Fail queued and running tasks with `PoolClosed` and tear down every executor
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(PoolCommand::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

struct Dispatcher {
    config: PoolConfig,
    factory: Arc<dyn SandboxFactory>,
    slots: Vec<ExecutorSlot>,
    queue: VecDeque<QueuedTask>,
    next_executor_id: usize,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completed_tasks: u64,
    replaced_executors: u64,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<PoolCommand>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        let period = self.config.reap_interval;
        let mut reap = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        reap.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(PoolCommand::Submit(task)) => self.enqueue(task),
                    Some(PoolCommand::Status(tx)) => {
                        let _ = tx.send(self.status());
                    }
                    Some(PoolCommand::Shutdown(ack)) => {
                        self.shutdown().await;
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some(done) = completions.recv() => self.complete(done),
                _ = reap.tick() => {
                    self.expire_queued();
                    self.reap_idle();
                }
            }
            self.dispatch();
        }

        info!("Worker pool stopped");
    }

    fn add_slot(&mut self) -> usize {
        let id = self.next_executor_id;
        self.next_executor_id += 1;
        self.slots.push(ExecutorSlot {
            id,
            sandbox: Some(self.factory.create(id)),
            current: None,
            last_used_at: Instant::now(),
            tasks_completed: 0,
        });
        self.slots.len() - 1
    }

    fn enqueue(&mut self, task: QueuedTask) {
        if self.queue.len() >= self.config.max_queue_len {
            warn!(task_id = %task.request.task_id, queue_length = self.queue.len(), "Queue full, rejecting task");
            let _ = task.reply.send(Err(ExecutionError::QueueFull(self.queue.len())));
            return;
        }
        debug!(task_id = %task.request.task_id, queue_length = self.queue.len() + 1, "Task queued");
        self.queue.push_back(task);
    }

    fn idle_slot(&mut self) -> Option<usize> {
        if let Some(idx) = self.slots.iter().position(|s| !s.busy()) {
            return Some(idx);
        }
        if self.slots.len() < self.config.size {
            let idx = self.add_slot();
            debug!(executor_id = self.slots[idx].id, "Executor added on demand");
            return Some(idx);
        }
        None
    }

    fn dispatch(&mut self) {
        while let Some(front) = self.queue.front() {
            if front.reply.is_closed() {
                if let Some(task) = self.queue.pop_front() {
                    debug!(task_id = %task.request.task_id, "Dropping cancelled task");
                }
                continue;
            }
            if waited_too_long(front) {
                if let Some(task) = self.queue.pop_front() {
                    reject_queue_timeout(task);
                }
                continue;
            }

            let Some(idx) = self.idle_slot() else {
                break;
            };
            if let Some(task) = self.queue.pop_front() {
                self.start_on(idx, task);
            }
        }
    }

    fn start_on(&mut self, idx: usize, task: QueuedTask) {
        let slot = &mut self.slots[idx];
        let executor_id = slot.id;
        let mut sandbox = match slot.sandbox.take() {
            Some(sandbox) => sandbox,
            None => self.factory.create(executor_id),
        };

        let QueuedTask { request, enqueued_at, reply } = task;
        let task_id = request.task_id.clone();
        debug!(
            task_id = %task_id,
            executor_id = executor_id,
            queued_ms = enqueued_at.elapsed().as_millis() as u64,
            "Dispatching task"
        );

        let completions = self.completions_tx.clone();
        let join = tokio::spawn(async move {
            let outcome = run_task(sandbox.as_mut(), &request).await;
            let sandbox = match &outcome {
                Err(e) if e.poisons_executor() => {
                    warn!(
                        task_id = %request.task_id,
                        executor_id = executor_id,
                        error = %e,
                        "Discarding executor"
                    );
                    sandbox.terminate().await;
                    None
                }
                _ => Some(sandbox),
            };
            let _ = completions.send(Completion {
                executor_id,
                sandbox,
                outcome,
            });
        });

        let slot = &mut self.slots[idx];
        slot.current = Some(RunningTask { task_id, reply, join });
    }

    fn complete(&mut self, done: Completion) {
        let Some(idx) = self.slots.iter().position(|s| s.id == done.executor_id) else {
            warn!(executor_id = done.executor_id, "Completion for unknown executor");
            return;
        };

        let replacement_id = if done.sandbox.is_none() {
            let id = self.next_executor_id;
            self.next_executor_id += 1;
            self.replaced_executors += 1;
            Some(id)
        } else {
            None
        };

        let slot = &mut self.slots[idx];
        let running = slot.current.take();
        slot.last_used_at = Instant::now();
        slot.tasks_completed += 1;
        match (done.sandbox, replacement_id) {
            (Some(sandbox), _) => slot.sandbox = Some(sandbox),
            (None, Some(new_id)) => {
                info!(old_executor_id = slot.id, executor_id = new_id, "Executor replaced");
                slot.id = new_id;
                slot.tasks_completed = 0;
                slot.sandbox = Some(self.factory.create(new_id));
            }
            (None, None) => {}
        }
        self.completed_tasks += 1;

        if let Some(running) = running {
            if running.reply.send(done.outcome).is_err() {
                debug!(task_id = %running.task_id, "Task result discarded, caller went away");
            }
        }
    }

    /// Fail queued tasks that already outlived their own timeout
    fn expire_queued(&mut self) {
        let mut kept = VecDeque::with_capacity(self.queue.len());
        while let Some(task) = self.queue.pop_front() {
            if task.reply.is_closed() {
                continue;
            }
            if waited_too_long(&task) {
                reject_queue_timeout(task);
            } else {
                kept.push_back(task);
            }
        }
        self.queue = kept;
    }

    fn reap_idle(&mut self) {
        let idle_timeout = self.config.idle_timeout;
        let mut idx = 0;
        while idx < self.slots.len() && self.slots.len() > 1 {
            let slot = &self.slots[idx];
            if !slot.busy() && slot.last_used_at.elapsed() > idle_timeout {
                let mut slot = self.slots.remove(idx);
                info!(executor_id = slot.id, remaining = self.slots.len(), "Reclaiming idle executor");
                if let Some(mut sandbox) = slot.sandbox.take() {
                    tokio::spawn(async move { sandbox.terminate().await });
                }
            } else {
                idx += 1;
            }
        }
    }

    fn status(&self) -> PoolStatus {
        let executors: Vec<ExecutorStatus> = self
            .slots
            .iter()
            .map(|slot| ExecutorStatus {
                id: slot.id,
                busy: slot.busy(),
                current_task: slot.current.as_ref().map(|r| r.task_id.clone()),
                idle_ms: if slot.busy() { 0 } else { slot.last_used_at.elapsed().as_millis() as u64 },
                tasks_completed: slot.tasks_completed,
            })
            .collect();

        PoolStatus {
            backend: self.factory.backend().to_string(),
            size: self.config.size,
            total_executors: executors.len(),
            busy_executors: executors.iter().filter(|e| e.busy).count(),
            queue_length: self.queue.len(),
            completed_tasks: self.completed_tasks,
            replaced_executors: self.replaced_executors,
            executors,
        }
    }

    async fn shutdown(&mut self) {
        info!(
            queued = self.queue.len(),
            busy = self.slots.iter().filter(|s| s.busy()).count(),
            "Shutting down worker pool"
        );

        for task in self.queue.drain(..) {
            let _ = task.reply.send(Err(ExecutionError::PoolClosed));
        }
        for slot in self.slots.iter_mut() {
            if let Some(running) = slot.current.take() {
                // Aborting drops the sandbox, which kills its interpreter
                running.join.abort();
                let _ = running.reply.send(Err(ExecutionError::PoolClosed));
            }
            if let Some(mut sandbox) = slot.sandbox.take() {
                sandbox.terminate().await;
            }
        }
        self.slots.clear();
    }
}

fn waited_too_long(task: &QueuedTask) -> bool {
    task.enqueued_at.elapsed() > Duration::from_millis(task.request.timeout_ms)
}

fn reject_queue_timeout(task: QueuedTask) {
    let waited_ms = task.enqueued_at.elapsed().as_millis() as u64;
    warn!(task_id = %task.request.task_id, waited_ms = waited_ms, "Task timeout in queue");
    let _ = task.reply.send(Err(ExecutionError::QueueTimeout { waited_ms }));
}

/// Boot (if needed) and run one task under its deadline
async fn run_task(sandbox: &mut dyn Sandbox, request: &ExecutionRequest) -> TaskResult {
    match tokio::time::timeout(BOOT_TIMEOUT, sandbox.start()).await {
        Ok(started) => started?,
        Err(_) => {
            return Err(ExecutionError::Infrastructure(format!(
                "Executor did not start within {}s",
                BOOT_TIMEOUT.as_secs()
            )))
        }
    }

    let deadline = Duration::from_millis(request.timeout_ms);
    match tokio::time::timeout(deadline, sandbox.execute(request)).await {
        Ok(result) => result,
        Err(_) => Err(ExecutionError::ExecutionTimeout {
            timeout_ms: request.timeout_ms,
        }),
    }
}
