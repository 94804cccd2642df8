//! Named commands executed through the scheduler

use crate::error::SchedulerError;
use crate::pool::{ObjectPool, Poolable, VecPool};
use crate::utils::{read, write};
use compact_str::CompactString;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, trace, warn};

/// Free-list size for command arguments
const ARGS_POOL_CAPACITY: usize = 32;

/// Pooled argument list handed to command handlers
#[derive(Debug, Default)]
pub struct CommandArgs {
    pub values: Vec<Value>,
}

impl CommandArgs {
    pub fn push(&mut self, value: impl Into<Value>) -> &mut Self {
        self.values.push(value.into());
        self
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Poolable for CommandArgs {
    fn cleanup(&mut self) {
        self.values.clear();
    }
}

/// Handler for a named command
pub type CommandHandler = Arc<dyn Fn(&CommandArgs) -> Option<Value> + Send + Sync>;

/// Name → handler table with pooled arguments
pub struct CommandDispatcher {
    handlers: RwLock<HashMap<CompactString, CommandHandler>>,
    pool: Arc<dyn ObjectPool<CommandArgs>>,
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::with_pool(Arc::new(VecPool::<CommandArgs>::new(ARGS_POOL_CAPACITY)))
    }

    pub fn with_pool(pool: Arc<dyn ObjectPool<CommandArgs>>) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            pool,
        }
    }

    pub fn register(&self, name: &str, handler: CommandHandler) -> Result<(), SchedulerError> {
        let mut handlers = write(&self.handlers);
        if handlers.contains_key(name) {
            warn!("⚠️ Command {} already registered, ignoring", name);
            return Err(SchedulerError::DuplicateCommand(name.to_string()));
        }
        handlers.insert(CompactString::new(name), handler);
        debug!("📝 Registered command {}", name);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        write(&self.handlers).remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        read(&self.handlers).contains_key(name)
    }

    /// Run command `name` with arguments written by `fill`.
    ///
    /// Unknown commands return `None` without running `fill`.
    pub fn execute(&self, name: &str, fill: impl FnOnce(&mut CommandArgs)) -> Option<Value> {
        let handler = match read(&self.handlers).get(name) {
            Some(handler) => handler.clone(),
            None => {
                trace!("No command named {}", name);
                return None;
            }
        };

        let mut args = self.pool.acquire();
        fill(&mut args);
        let result = handler(&args);
        self.pool.release(args);
        result
    }

    pub fn len(&self) -> usize {
        read(&self.handlers).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.handlers).is_empty()
    }

    pub fn clear(&self) {
        write(&self.handlers).clear();
    }
}
