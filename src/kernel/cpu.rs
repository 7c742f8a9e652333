use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::SystemTime;

use super::memory_manager::MemoryManager;
use super::process_control_block::{Instruction, Operand, PcbState, Process};
use super::ready_queue::ReadyQueue;
use super::scheduler::CpuStats;
use crate::util;

/// Per-core execution engine. Each scheduler tick it accounts one
/// active/idle tick, acquires a process from the ready queue if it holds
/// none, and runs exactly one instruction under the process's mutex,
/// preempting after `quantum_cycles` instructions.
pub struct CpuWorker {
    core_id: usize,
    quantum_cycles: u32,
    queue: Arc<ReadyQueue>,
    memory: Arc<MemoryManager>,
    stats: Arc<CpuStats>,
    current: Option<Arc<Process>>,
    run_cycles: u32,
}

impl CpuWorker {
    pub fn new(
        core_id: usize,
        quantum_cycles: u32,
        queue: Arc<ReadyQueue>,
        memory: Arc<MemoryManager>,
        stats: Arc<CpuStats>,
    ) -> CpuWorker {
        CpuWorker {
            core_id,
            quantum_cycles,
            queue,
            memory,
            stats,
            current: None,
            run_cycles: 0,
        }
    }

    /// One scheduler tick: accounting, acquire, execute, post-iteration.
    pub fn tick(&mut self) {
        if self.current.is_some() {
            self.stats.active_ticks.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.idle_ticks.fetch_add(1, Ordering::Relaxed);
        }

        if self.current.is_none() {
            match self.queue.try_pop() {
                Some(process) => {
                    self.run_cycles = 0;
                    self.stats.set_busy(self.core_id, true);
                    self.current = Some(process);
                }
                None => {
                    self.stats.set_busy(self.core_id, false);
                    return;
                }
            }
        }

        let process = Arc::clone(self.current.as_ref().unwrap());
        let outcome = self.dispatch(&process);

        // The process mutex is released before any queue or memory work.
        match outcome {
            Outcome::Finished => {
                self.stats.record_completion(self.core_id);
                self.stats.set_busy(self.core_id, false);
                if process.memory_size > 0 {
                    self.memory.deallocate(process.pid);
                }
                self.current = None;
            }
            Outcome::Preempted { finished } => {
                if !finished {
                    self.queue.push(&process);
                }
                self.current = None;
            }
            Outcome::Running => {}
        }
    }

    fn dispatch(&mut self, process: &Arc<Process>) -> Outcome {
        let mut state = process.state.lock().unwrap();
        state.cpu_core = Some(self.core_id);

        if state.sleep_ticks > 0 {
            state.sleep_ticks -= 1;
            if state.sleep_ticks == 0 {
                advance(process, &mut state);
            }
            return Outcome::Preempted {
                finished: state.finished,
            };
        }

        if process.memory_size > 0 {
            // Touch the address the program counter maps to, so execution
            // itself drives demand paging. Value and errors are discarded.
            let _ = self.memory.read(process.pid, state.pc % process.memory_size);
        }

        let instruction = &process.instructions[state.pc];
        execute(process, &mut state, instruction, &self.memory);
        self.run_cycles += 1;

        if state.finished {
            Outcome::Finished
        } else if self.run_cycles >= self.quantum_cycles {
            Outcome::Preempted { finished: false }
        } else {
            Outcome::Running
        }
    }
}

enum Outcome {
    Running,
    Preempted { finished: bool },
    Finished,
}

/// Runs one instruction against the PCB. Every executed instruction
/// advances the program counter, except SLEEP (the worker advances it on
/// wake-up) and any instruction after the program finishes mid-loop.
pub fn execute(
    process: &Process,
    state: &mut PcbState,
    instruction: &Instruction,
    memory: &MemoryManager,
) {
    match instruction {
        Instruction::For { count, body } => run_loop(process, state, *count, body, memory),
        _ => step(process, state, instruction, memory),
    }
}

struct LoopFrame<'a> {
    body: &'a [Instruction],
    index: usize,
    remaining: u32,
}

/// Iterative loop dispatch over an explicit frame stack; a process that
/// finishes mid-body unwinds immediately.
fn run_loop<'a>(
    process: &Process,
    state: &mut PcbState,
    count: u32,
    body: &'a [Instruction],
    memory: &MemoryManager,
) {
    if count == 0 {
        advance(process, state);
        return;
    }

    let mut stack = vec![LoopFrame {
        body,
        index: 0,
        remaining: count,
    }];

    while let Some(frame) = stack.last_mut() {
        if frame.index >= frame.body.len() {
            frame.index = 0;
            frame.remaining -= 1;
            if frame.remaining == 0 {
                stack.pop();
                // The completed loop advances the counter like any other
                // instruction.
                advance(process, state);
                if state.finished {
                    return;
                }
            }
            continue;
        }

        // Bodies borrow from the instruction tree, not from the stack.
        let body: &'a [Instruction] = frame.body;
        let instruction = &body[frame.index];
        frame.index += 1;

        match instruction {
            Instruction::For { count, body } => {
                if *count == 0 {
                    advance(process, state);
                    if state.finished {
                        return;
                    }
                } else {
                    stack.push(LoopFrame {
                        body,
                        index: 0,
                        remaining: *count,
                    });
                }
            }
            _ => {
                step(process, state, instruction, memory);
                if state.finished {
                    return;
                }
            }
        }
    }
}

fn step(process: &Process, state: &mut PcbState, instruction: &Instruction, memory: &MemoryManager) {
    match instruction {
        Instruction::Print { var } => {
            let message = match var {
                Some(name) => {
                    let value = state.vars.get(name).copied().unwrap_or(0);
                    format!("Hello world from {}! Value: {}", process.name, value)
                }
                None => format!("Hello world from {}!", process.name),
            };
            state.log.push(format!("({}) {}", util::timestamp(), message));
        }
        Instruction::Declare { var, value } => {
            state.vars.insert(var.clone(), *value);
        }
        Instruction::Add { dst, lhs, rhs } => {
            let value = operand_value(state, lhs).wrapping_add(operand_value(state, rhs));
            state.vars.insert(dst.clone(), value);
        }
        Instruction::Sub { dst, lhs, rhs } => {
            let value = operand_value(state, lhs).wrapping_sub(operand_value(state, rhs));
            state.vars.insert(dst.clone(), value);
        }
        Instruction::Sleep { ticks } => {
            state.sleep_ticks = *ticks;
            // The program counter stays put until the sleep expires.
            return;
        }
        Instruction::For { .. } => unreachable!("loops are expanded by the caller"),
        Instruction::Read { var, addr } => match memory.read(process.pid, *addr) {
            Ok(value) => {
                state.vars.insert(var.clone(), value);
                state.log.push(format!(
                    "({}) READ {} from address {} = {}",
                    util::timestamp(),
                    var,
                    addr,
                    value
                ));
            }
            Err(_) => {
                state.log.push(format!(
                    "({}) ERROR: Failed to read from address {}",
                    util::timestamp(),
                    addr
                ));
            }
        },
        Instruction::Write { addr, value } => match memory.write(process.pid, *addr, *value) {
            Ok(()) => {
                state.log.push(format!(
                    "({}) WRITE {} to address {}",
                    util::timestamp(),
                    value,
                    addr
                ));
            }
            Err(_) => {
                state.log.push(format!(
                    "({}) ERROR: Failed to write to address {}",
                    util::timestamp(),
                    addr
                ));
            }
        },
    }
    advance(process, state);
}

fn operand_value(state: &PcbState, operand: &Operand) -> u16 {
    match operand {
        Operand::Var(name) => state.vars.get(name).copied().unwrap_or(0),
        Operand::Imm(value) => *value,
    }
}

fn advance(process: &Process, state: &mut PcbState) {
    state.pc += 1;
    if state.pc >= process.instructions.len() {
        state.finished = true;
        state.end_time = Some(SystemTime::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::process_control_block::{Instruction as I, Operand as O};

    fn process_with(instructions: Vec<I>) -> Process {
        Process::new(1, "test".to_string(), instructions, 0)
    }

    fn run_one(process: &Process, memory: &MemoryManager) {
        let instruction = {
            let state = process.state.lock().unwrap();
            process.instructions[state.pc].clone()
        };
        let mut state = process.state.lock().unwrap();
        execute(process, &mut state, &instruction, memory);
    }

    fn run_all(process: &Process, memory: &MemoryManager) {
        while !process.is_finished() {
            run_one(process, memory);
        }
    }

    #[test]
    fn test_execute_print_logs_template() {
        let memory = MemoryManager::new();
        let process = process_with(vec![I::Print { var: None }]);

        run_one(&process, &memory);

        let state = process.state.lock().unwrap();
        assert!(state.log[0].contains("Hello world from test!"));
        assert!(state.finished);
        assert!(state.end_time.is_some());
    }

    #[test]
    fn test_execute_arithmetic_wraps_modulo_u16() {
        // DECLARE x0 65530; ADD x0 x0 10; PRINT x0
        let memory = MemoryManager::new();
        let process = process_with(vec![
            I::Declare { var: "x0".to_string(), value: 65530 },
            I::Add {
                dst: "x0".to_string(),
                lhs: O::Var("x0".to_string()),
                rhs: O::Imm(10),
            },
            I::Print { var: Some("x0".to_string()) },
        ]);

        run_all(&process, &memory);

        let state = process.state.lock().unwrap();
        assert_eq!(state.vars["x0"], 4);
        assert!(state.log[0].contains("Value: 4"));
    }

    #[test]
    fn test_execute_subtract_wraps_below_zero() {
        let memory = MemoryManager::new();
        let process = process_with(vec![I::Sub {
            dst: "x0".to_string(),
            lhs: O::Imm(0),
            rhs: O::Imm(1),
        }]);

        run_one(&process, &memory);

        assert_eq!(process.state.lock().unwrap().vars["x0"], 65535);
    }

    #[test]
    fn test_execute_undeclared_variable_reads_zero() {
        let memory = MemoryManager::new();
        let process = process_with(vec![I::Add {
            dst: "x0".to_string(),
            lhs: O::Var("x9".to_string()),
            rhs: O::Imm(3),
        }]);

        run_one(&process, &memory);

        assert_eq!(process.state.lock().unwrap().vars["x0"], 3);
    }

    #[test]
    fn test_execute_sleep_keeps_program_counter() {
        let memory = MemoryManager::new();
        let process = process_with(vec![I::Sleep { ticks: 3 }, I::Print { var: None }]);

        run_one(&process, &memory);

        let state = process.state.lock().unwrap();
        assert_eq!(state.pc, 0);
        assert_eq!(state.sleep_ticks, 3);
        assert!(!state.finished);
    }

    #[test]
    fn test_execute_loop_body_advances_program_counter() {
        // The loop dispatches its body through the regular executor, so
        // nested instructions move the counter too: two body runs plus the
        // loop's own advance land on pc 3.
        let memory = MemoryManager::new();
        let process = process_with(vec![
            I::For {
                count: 2,
                body: vec![I::Add {
                    dst: "x0".to_string(),
                    lhs: O::Var("x0".to_string()),
                    rhs: O::Imm(1),
                }],
            },
            I::Print { var: None },
            I::Print { var: None },
            I::Print { var: None },
            I::Print { var: None },
        ]);

        run_one(&process, &memory);

        let state = process.state.lock().unwrap();
        assert_eq!(state.vars["x0"], 2);
        assert_eq!(state.pc, 3);
        assert!(!state.finished);
    }

    #[test]
    fn test_execute_loop_unwinds_when_program_finishes() {
        let memory = MemoryManager::new();
        let process = process_with(vec![I::For {
            count: 4,
            body: vec![I::Add {
                dst: "x0".to_string(),
                lhs: O::Var("x0".to_string()),
                rhs: O::Imm(1),
            }],
        }]);

        run_one(&process, &memory);

        // The first body instruction pushes pc to the program length, so
        // the loop stops after a single iteration.
        let state = process.state.lock().unwrap();
        assert!(state.finished);
        assert_eq!(state.vars["x0"], 1);
        assert_eq!(state.pc, 1);
    }

    #[test]
    fn test_execute_nested_loops() {
        let memory = MemoryManager::new();
        let body = vec![I::Add {
            dst: "x0".to_string(),
            lhs: O::Var("x0".to_string()),
            rhs: O::Imm(1),
        }];
        let mut program = vec![I::For {
            count: 2,
            body: vec![I::For { count: 3, body }],
        }];
        // Padding so the nested advances stay inside the program.
        program.extend(vec![I::Print { var: None }; 20]);
        let process = process_with(program);

        run_one(&process, &memory);

        let state = process.state.lock().unwrap();
        assert_eq!(state.vars["x0"], 6);
        assert!(!state.finished);
    }

    #[test]
    fn test_execute_read_write_through_memory() {
        let dir = tempfile::tempdir().unwrap();
        let memory = MemoryManager::new();
        memory
            .initialize(1024, 256, dir.path().join("store.txt"))
            .unwrap();
        memory.allocate(1, 256).unwrap();

        let process = process_with(vec![
            I::Write { addr: 0, value: 43690 },
            I::Read { var: "x0".to_string(), addr: 0 },
        ]);

        run_all(&process, &memory);

        let state = process.state.lock().unwrap();
        assert_eq!(state.vars["x0"], 43690);
        assert!(state.log[0].contains("WRITE 43690 to address 0"));
        assert!(state.log[1].contains("READ x0 from address 0 = 43690"));
    }

    #[test]
    fn test_execute_memory_failure_logs_and_advances() {
        let dir = tempfile::tempdir().unwrap();
        let memory = MemoryManager::new();
        memory
            .initialize(1024, 256, dir.path().join("store.txt"))
            .unwrap();
        memory.allocate(1, 256).unwrap();

        // Address 512 is outside the single 256-byte page.
        let process = process_with(vec![I::Read { var: "x0".to_string(), addr: 512 }]);

        run_one(&process, &memory);

        let state = process.state.lock().unwrap();
        assert!(state.log[0].contains("ERROR: Failed to read from address 512"));
        assert!(state.finished);
    }
}
