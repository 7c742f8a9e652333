use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::SimError;

use super::process_control_block::Process;

/// Process registry: the sole owner of every PCB, indexed by unique name
/// and by pid under one mutex. Also hands out the pid sequence, so batch
/// and console admissions never collide.
pub struct ProcessManager {
    registry: Mutex<Registry>,
    next_pid: AtomicU32,
}

#[derive(Default)]
struct Registry {
    by_name: HashMap<String, Arc<Process>>,
    by_pid: HashMap<u32, Arc<Process>>,
}

impl ProcessManager {
    pub fn new() -> ProcessManager {
        ProcessManager {
            registry: Mutex::new(Registry::default()),
            next_pid: AtomicU32::new(1),
        }
    }

    pub fn next_pid(&self) -> u32 {
        self.next_pid.fetch_add(1, Ordering::SeqCst)
    }

    pub fn insert(&self, process: Arc<Process>) -> Result<(), SimError> {
        let mut registry = self.registry.lock().unwrap();
        if registry.by_name.contains_key(&process.name) {
            return Err(SimError::invalid(format!(
                "process name '{}' already in use",
                process.name
            )));
        }
        registry
            .by_name
            .insert(process.name.clone(), Arc::clone(&process));
        registry.by_pid.insert(process.pid, process);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Process>> {
        self.registry.lock().unwrap().by_name.get(name).cloned()
    }

    pub fn get_by_pid(&self, pid: u32) -> Option<Arc<Process>> {
        self.registry.lock().unwrap().by_pid.get(&pid).cloned()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.registry.lock().unwrap().by_name.contains_key(name)
    }

    /// Snapshot of every process, ordered by pid for stable listings.
    pub fn all(&self) -> Vec<Arc<Process>> {
        let registry = self.registry.lock().unwrap();
        let mut processes: Vec<Arc<Process>> = registry.by_pid.values().cloned().collect();
        processes.sort_by_key(|process| process.pid);
        processes
    }

    pub fn len(&self) -> usize {
        self.registry.lock().unwrap().by_pid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.lock().unwrap().by_pid.is_empty()
    }

    /// Removes and returns every process. Used by shutdown cleanup.
    pub fn drain(&self) -> Vec<Arc<Process>> {
        let mut registry = self.registry.lock().unwrap();
        registry.by_name.clear();
        let mut processes: Vec<Arc<Process>> =
            registry.by_pid.drain().map(|(_, process)| process).collect();
        processes.sort_by_key(|process| process.pid);
        processes
    }
}

impl Default for ProcessManager {
    fn default() -> ProcessManager {
        ProcessManager::new()
    }
}
