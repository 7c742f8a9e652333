pub mod console;
pub mod error;
pub mod io;
pub mod kernel;
pub mod util;

use std::sync::{Arc, Mutex};

use crate::io::Config;
use crate::kernel::{MemoryManager, ProcessManager, ReadyQueue, Scheduler};

/// Top-level bundle of the simulator's services. Collaborators receive
/// explicit references; nothing is a process-wide global.
pub struct App {
    pub config: Mutex<Option<Arc<Config>>>,
    pub registry: Arc<ProcessManager>,
    pub queue: Arc<ReadyQueue>,
    pub memory: Arc<MemoryManager>,
    pub scheduler: Scheduler,
}

impl App {
    pub fn new() -> App {
        let registry = Arc::new(ProcessManager::new());
        let queue = Arc::new(ReadyQueue::new());
        let memory = Arc::new(MemoryManager::new());
        let scheduler = Scheduler::new(
            Arc::clone(&queue),
            Arc::clone(&registry),
            Arc::clone(&memory),
        );
        App {
            config: Mutex::new(None),
            registry,
            queue,
            memory,
            scheduler,
        }
    }

    pub fn config(&self) -> Option<Arc<Config>> {
        self.config.lock().unwrap().clone()
    }

    /// Idempotent shutdown: stop the scheduler if it is running, then drain
    /// the registry and release every process's memory.
    pub fn shutdown(&self) {
        if self.scheduler.is_running() {
            let _ = self.scheduler.stop();
        }
        for process in self.registry.drain() {
            if process.memory_size > 0 {
                self.memory.deallocate(process.pid);
            }
        }
    }
}

impl Default for App {
    fn default() -> App {
        App::new()
    }
}
