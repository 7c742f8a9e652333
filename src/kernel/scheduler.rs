use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::error::SimError;
use crate::io::Config;

use super::cpu::CpuWorker;
use super::memory_manager::MemoryManager;
use super::process_control_block::Process;
use super::process_generator::ProcessGenerator;
use super::process_manager::ProcessManager;
use super::ready_queue::ReadyQueue;

/// How often sleeping scheduler threads re-check the running flag.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Per-core busy flags and completion counters under one mutex, plus the
/// global active/idle tick tallies as atomics.
pub struct CpuStats {
    cores: Mutex<CoreStats>,
    pub active_ticks: AtomicU64,
    pub idle_ticks: AtomicU64,
}

#[derive(Default)]
struct CoreStats {
    busy: Vec<bool>,
    completed: Vec<u64>,
}

impl CpuStats {
    pub fn new(num_cpu: usize) -> CpuStats {
        CpuStats {
            cores: Mutex::new(CoreStats {
                busy: vec![false; num_cpu],
                completed: vec![0; num_cpu],
            }),
            active_ticks: AtomicU64::new(0),
            idle_ticks: AtomicU64::new(0),
        }
    }

    // Completion counts survive a stop/start cycle; only the shape changes.
    fn resize(&self, num_cpu: usize) {
        let mut cores = self.cores.lock().unwrap();
        cores.busy.resize(num_cpu, false);
        cores.completed.resize(num_cpu, 0);
    }

    pub fn set_busy(&self, core_id: usize, busy: bool) {
        let mut cores = self.cores.lock().unwrap();
        if let Some(slot) = cores.busy.get_mut(core_id) {
            *slot = busy;
        }
    }

    pub fn record_completion(&self, core_id: usize) {
        let mut cores = self.cores.lock().unwrap();
        if let Some(count) = cores.completed.get_mut(core_id) {
            *count += 1;
        }
    }

    pub fn cores_used(&self) -> usize {
        self.cores.lock().unwrap().busy.iter().filter(|b| **b).count()
    }

    pub fn busy_snapshot(&self) -> Vec<bool> {
        self.cores.lock().unwrap().busy.clone()
    }

    pub fn completed_snapshot(&self) -> Vec<u64> {
        self.cores.lock().unwrap().completed.clone()
    }

    pub fn active_ticks(&self) -> u64 {
        self.active_ticks.load(Ordering::Relaxed)
    }

    pub fn idle_ticks(&self) -> u64 {
        self.idle_ticks.load(Ordering::Relaxed)
    }

    fn clear_busy(&self) {
        self.cores.lock().unwrap().busy.fill(false);
    }
}

/// Scheduler lifecycle: owns the worker and batch-generator threads and the
/// running flag they all observe between iterations.
pub struct Scheduler {
    running: Arc<AtomicBool>,
    queue: Arc<ReadyQueue>,
    registry: Arc<ProcessManager>,
    memory: Arc<MemoryManager>,
    stats: Arc<CpuStats>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    generator: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        queue: Arc<ReadyQueue>,
        registry: Arc<ProcessManager>,
        memory: Arc<MemoryManager>,
    ) -> Scheduler {
        Scheduler {
            running: Arc::new(AtomicBool::new(false)),
            queue,
            registry,
            memory,
            stats: Arc::new(CpuStats::new(0)),
            workers: Mutex::new(Vec::new()),
            generator: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &CpuStats {
        &self.stats
    }

    pub fn enqueue(&self, process: &Arc<Process>) {
        self.queue.push(process);
    }

    /// Launches one worker per configured core and the batch generator.
    pub fn start(&self, config: &Arc<Config>) -> Result<(), SimError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(SimError::AlreadyRunning);
        }

        self.stats.resize(config.num_cpu);
        self.running.store(true, Ordering::SeqCst);

        let mut workers = self.workers.lock().unwrap();
        for core_id in 0..config.num_cpu {
            let running = Arc::clone(&self.running);
            let queue = Arc::clone(&self.queue);
            let memory = Arc::clone(&self.memory);
            let stats = Arc::clone(&self.stats);
            let quantum_cycles = config.quantum_cycles;
            let delay = Duration::from_millis(config.delays_per_exec);

            workers.push(thread::spawn(move || {
                let mut worker = CpuWorker::new(core_id, quantum_cycles, queue, memory, stats);
                while running.load(Ordering::SeqCst) {
                    worker.tick();
                    thread::sleep(delay);
                }
            }));
        }

        let running = Arc::clone(&self.running);
        let config = Arc::clone(config);
        let registry = Arc::clone(&self.registry);
        let queue = Arc::clone(&self.queue);
        let memory = Arc::clone(&self.memory);
        *self.generator.lock().unwrap() = Some(thread::spawn(move || {
            generator_loop(running, config, registry, queue, memory);
        }));

        Ok(())
    }

    /// Stops and joins the batch generator first, then every worker.
    /// Statistics and the process registry are preserved.
    pub fn stop(&self) -> Result<(), SimError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(SimError::NotRunning);
        }

        if let Some(handle) = self.generator.lock().unwrap().take() {
            let _ = handle.join();
        }
        for handle in self.workers.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
        self.stats.clear_busy();
        Ok(())
    }
}

/// Batch admission loop: one synthetic process per period while the
/// scheduler runs. Admission is skipped when memory allocation fails.
fn generator_loop(
    running: Arc<AtomicBool>,
    config: Arc<Config>,
    registry: Arc<ProcessManager>,
    queue: Arc<ReadyQueue>,
    memory: Arc<MemoryManager>,
) {
    let mut generator = ProcessGenerator::new();

    while running.load(Ordering::SeqCst) {
        let mut memory_size = 0;
        if memory.is_initialized() && config.min_mem_per_proc > 0 && config.max_mem_per_proc > 0 {
            memory_size =
                generator.random_memory_size(config.min_mem_per_proc, config.max_mem_per_proc);
        }

        let pid = registry.next_pid();
        let program = generator.random_program(config.min_ins, config.max_ins);
        let process = Arc::new(Process::new(
            pid,
            format!("process_{pid}"),
            program,
            memory_size,
        ));

        let admitted = memory_size == 0 || memory.allocate(pid, memory_size).is_ok();
        if admitted {
            match registry.insert(Arc::clone(&process)) {
                Ok(()) => {
                    debug!("admitted process_{pid} ({memory_size} bytes)");
                    queue.push(&process);
                }
                Err(err) => {
                    warn!("batch admission of process_{pid} failed: {err}");
                    if memory_size > 0 {
                        memory.deallocate(pid);
                    }
                }
            }
        } else {
            debug!("memory allocation failed for process_{pid}, skipping admission");
        }

        // Sleep the batch period in slices so a stop request is observed
        // promptly; cadence is unchanged.
        let deadline = Instant::now() + Duration::from_secs(config.batch_process_freq);
        while running.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(STOP_POLL_INTERVAL);
        }
    }
}
