//! The host environment: capability slots, objects, clock and task queue.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::error::HostError;

use super::value::{Callback, ObjectId, Value};

/// Identity of a scheduled task, as returned by the timer primitives.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TaskId(pub u64);

/// One native invocation: positional arguments plus an optional receiver.
pub struct CallFrame {
    pub args: Vec<Value>,
    pub this: Option<ObjectId>,
}

pub type NativeFn = Arc<dyn Fn(&HostEnv, &mut CallFrame) -> Result<Value, HostError> + Send + Sync>;

static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);

/// An identity-carrying callable slot. A wrapper produced by the interceptor
/// keeps a marker back to its original, which is what makes wrapping
/// idempotent and restoration exact.
#[derive(Clone)]
pub struct CallTarget {
    id: u64,
    name: String,
    original: Option<Arc<CallTarget>>,
    func: NativeFn,
}

impl CallTarget {
    pub fn new(
        name: &str,
        f: impl Fn(&HostEnv, &mut CallFrame) -> Result<Value, HostError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            original: None,
            func: Arc::new(f),
        }
    }

    /// Builds a wrapper around `original`, carrying over its name so
    /// inspecting code cannot tell the two apart.
    pub fn wrapper_of(original: &CallTarget, func: NativeFn) -> Self {
        Self {
            id: NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed),
            name: original.name.clone(),
            original: Some(Arc::new(original.clone())),
            func,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_wrapper(&self) -> bool {
        self.original.is_some()
    }

    pub fn original(&self) -> Option<&CallTarget> {
        self.original.as_deref()
    }

    pub fn call(&self, env: &HostEnv, frame: &mut CallFrame) -> Result<Value, HostError> {
        (self.func)(env, frame)
    }

    /// Slot identity, used by the restore-at-zero tests and bookkeeping.
    pub fn same_target(&self, other: &CallTarget) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CallTarget({} #{}{})",
            self.name,
            self.id,
            if self.is_wrapper() { ", wrapper" } else { "" }
        )
    }
}

struct Task {
    id: TaskId,
    due: f64,
    every: Option<f64>,
    cb: Callback,
    args: Vec<Value>,
}

struct EnvInner {
    origin: String,
    slots: RwLock<HashMap<String, CallTarget>>,
    objects: RwLock<HashMap<ObjectId, HashMap<String, Value>>>,
    now_ms: Mutex<f64>,
    tasks: Mutex<Vec<Task>>,
    microtasks: Mutex<VecDeque<(Callback, Vec<Value>)>>,
    next_id: AtomicU64,
}

/// The embedder-provided environment the agent instruments.
///
/// Execution is single-threaded cooperative: nothing runs until the embedder
/// pumps the queue via [`HostEnv::advance`] or [`HostEnv::run_until_idle`],
/// and every callback runs to completion.
#[derive(Clone)]
pub struct HostEnv {
    inner: Arc<EnvInner>,
}

// A pumped run stops after this many tasks so a repeating timer cannot spin
// the loop forever.
const MAX_TASKS_PER_PUMP: usize = 4096;

impl HostEnv {
    pub fn new(origin: &str) -> Self {
        Self {
            inner: Arc::new(EnvInner {
                origin: origin.to_string(),
                slots: RwLock::new(HashMap::new()),
                objects: RwLock::new(HashMap::new()),
                now_ms: Mutex::new(0.0),
                tasks: Mutex::new(Vec::new()),
                microtasks: Mutex::new(VecDeque::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Hostname of the hosting page, for same-origin decisions.
    pub fn origin(&self) -> &str {
        &self.inner.origin
    }

    pub fn slot(&self, name: &str) -> Option<CallTarget> {
        self.inner.slots.read().get(name).cloned()
    }

    pub fn has_slot(&self, name: &str) -> bool {
        self.inner.slots.read().contains_key(name)
    }

    pub fn set_slot(&self, name: &str, target: CallTarget) {
        self.inner.slots.write().insert(name.to_string(), target);
    }

    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, HostError> {
        let target = self
            .slot(name)
            .ok_or_else(|| HostError::MissingSlot(name.to_string()))?;
        let mut frame = CallFrame { args, this: None };
        target.call(self, &mut frame)
    }

    pub fn call_method(
        &self,
        this: ObjectId,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, HostError> {
        if !self.inner.objects.read().contains_key(&this) {
            return Err(HostError::UnknownObject(this));
        }
        let target = self
            .slot(name)
            .ok_or_else(|| HostError::MissingSlot(name.to_string()))?;
        let mut frame = CallFrame {
            args,
            this: Some(this),
        };
        target.call(self, &mut frame)
    }

    pub fn new_object(&self) -> ObjectId {
        let id = ObjectId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.objects.write().insert(id, HashMap::new());
        id
    }

    pub fn get_prop(&self, obj: ObjectId, name: &str) -> Value {
        self.inner
            .objects
            .read()
            .get(&obj)
            .and_then(|props| props.get(name).cloned())
            .unwrap_or_default()
    }

    pub fn set_prop(&self, obj: ObjectId, name: &str, value: Value) {
        if let Some(props) = self.inner.objects.write().get_mut(&obj) {
            props.insert(name.to_string(), value);
        }
    }

    pub fn now(&self) -> f64 {
        *self.inner.now_ms.lock()
    }

    pub fn schedule(
        &self,
        delay_ms: f64,
        every: Option<f64>,
        cb: Callback,
        args: Vec<Value>,
    ) -> TaskId {
        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let due = self.now() + delay_ms.max(0.0);
        self.inner.tasks.lock().push(Task {
            id,
            due,
            every,
            cb,
            args,
        });
        id
    }

    /// Cancels a scheduled task. Returns whether anything was pending.
    pub fn cancel(&self, id: TaskId) -> bool {
        let mut tasks = self.inner.tasks.lock();
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        tasks.len() != before
    }

    pub fn enqueue_microtask(&self, cb: Callback, args: Vec<Value>) {
        self.inner.microtasks.lock().push_back((cb, args));
    }

    fn drain_microtasks(&self) {
        loop {
            let next = self.inner.microtasks.lock().pop_front();
            let Some((cb, args)) = next else { break };
            cb.invoke(self, &args);
        }
    }

    fn pop_due(&self, horizon: f64) -> Option<Task> {
        let mut tasks = self.inner.tasks.lock();
        let idx = tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due <= horizon)
            .min_by(|(_, a), (_, b)| a.due.total_cmp(&b.due))
            .map(|(i, _)| i)?;
        Some(tasks.swap_remove(idx))
    }

    fn run_task(&self, task: Task) {
        {
            let mut now = self.inner.now_ms.lock();
            if task.due > *now {
                *now = task.due;
            }
        }
        if let Some(every) = task.every {
            let again = Task {
                id: task.id,
                due: task.due + every.max(1.0),
                every: task.every,
                cb: task.cb.clone(),
                args: task.args.clone(),
            };
            self.inner.tasks.lock().push(again);
        }
        task.cb.invoke(self, &task.args);
        self.drain_microtasks();
    }

    /// Moves the clock forward by `ms`, running everything that comes due.
    pub fn advance(&self, ms: f64) {
        let target = self.now() + ms.max(0.0);
        self.drain_microtasks();
        let mut ran = 0usize;
        while let Some(task) = self.pop_due(target) {
            self.run_task(task);
            ran += 1;
            if ran >= MAX_TASKS_PER_PUMP {
                warn!(ran, "task pump budget exhausted during advance");
                break;
            }
        }
        *self.inner.now_ms.lock() = target;
        self.drain_microtasks();
    }

    /// Runs tasks in due order until nothing is pending, jumping the clock
    /// to each task's due time.
    pub fn run_until_idle(&self) {
        self.drain_microtasks();
        let mut ran = 0usize;
        while let Some(task) = self.pop_due(f64::INFINITY) {
            self.run_task(task);
            ran += 1;
            if ran >= MAX_TASKS_PER_PUMP {
                warn!(ran, "task pump budget exhausted; pending tasks remain");
                break;
            }
        }
        self.drain_microtasks();
    }

    /// Number of pending scheduled tasks; used by cancellation bookkeeping
    /// tests and the demo.
    pub fn pending_tasks(&self) -> usize {
        self.inner.tasks.lock().len()
    }
}
