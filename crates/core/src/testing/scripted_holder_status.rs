//! Scripted holder status source for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::backoff::{BackoffError, HolderStatus, HolderStatusSource};

type Hook = Box<dyn FnMut() + Send>;

/// Answers holder status polls from a script.
///
/// Answers are consumed in order; once the script runs out the last answer
/// repeats. Hooks run just before a given poll is answered, which lets a
/// test change the world at a precise point in the wait.
pub struct ScriptedHolderStatus {
    script: Mutex<VecDeque<Result<HolderStatus, String>>>,
    last: Mutex<HolderStatus>,
    calls: AtomicUsize,
    hooks: Mutex<HashMap<usize, Hook>>,
}

impl ScriptedHolderStatus {
    pub fn new(statuses: Vec<HolderStatus>) -> Self {
        Self::with_failures(0, statuses)
    }

    pub fn always(status: HolderStatus) -> Self {
        Self::new(vec![status])
    }

    /// Fail the first `failures` polls, then follow `statuses`.
    pub fn with_failures(failures: usize, statuses: Vec<HolderStatus>) -> Self {
        let script = (0..failures)
            .map(|i| Err(format!("scripted failure {}", i + 1)))
            .chain(statuses.into_iter().map(Ok))
            .collect();

        Self {
            script: Mutex::new(script),
            last: Mutex::new(HolderStatus::Unknown),
            calls: AtomicUsize::new(0),
            hooks: Mutex::new(HashMap::new()),
        }
    }

    /// Run `hook` before answering poll number `index` (zero-based).
    pub fn on_call(&self, index: usize, hook: impl FnMut() + Send + 'static) {
        self.hooks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(index, Box::new(hook));
    }

    /// Polls answered so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HolderStatusSource for ScriptedHolderStatus {
    async fn holder_status(&self, _task_id: &str) -> Result<HolderStatus, BackoffError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(hook) = self
            .hooks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&index)
        {
            hook();
        }

        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        match next {
            Some(Ok(status)) => {
                *last = status;
                Ok(status)
            }
            Some(Err(message)) => Err(BackoffError::Status(message)),
            None => Ok(*last),
        }
    }
}
