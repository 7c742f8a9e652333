use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

/// ADD/SUB operand: a variable reference or an immediate 16-bit value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Var(String),
    Imm(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Print { var: Option<String> },
    Declare { var: String, value: u16 },
    Add { dst: String, lhs: Operand, rhs: Operand },
    Sub { dst: String, lhs: Operand, rhs: Operand },
    Sleep { ticks: u32 },
    For { count: u32, body: Vec<Instruction> },
    Read { var: String, addr: usize },
    Write { addr: usize, value: u16 },
}

/// Mutable half of a process control block, guarded by the per-process
/// mutex in `Process`.
pub struct PcbState {
    pub pc: usize,
    pub vars: HashMap<String, u16>,
    pub sleep_ticks: u32,
    pub finished: bool,
    pub log: Vec<String>,
    pub end_time: Option<SystemTime>,
    pub cpu_core: Option<usize>,
}

/// Process control block. Identity, program, and memory size are fixed at
/// creation; everything the scheduler and interpreter mutate lives behind
/// `state`. The registry owns every `Process`; the ready queue and the CPU
/// workers only borrow it.
pub struct Process {
    pub pid: u32,
    pub name: String,
    pub instructions: Vec<Instruction>,
    pub memory_size: usize,
    pub start_time: SystemTime,
    pub state: Mutex<PcbState>,
}

impl Process {
    pub fn new(pid: u32, name: String, instructions: Vec<Instruction>, memory_size: usize) -> Process {
        Process {
            pid,
            name,
            instructions,
            memory_size,
            start_time: SystemTime::now(),
            state: Mutex::new(PcbState {
                pc: 0,
                vars: HashMap::new(),
                sleep_ticks: 0,
                finished: false,
                log: Vec::new(),
                end_time: None,
                cpu_core: None,
            }),
        }
    }

    pub fn total_instructions(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().unwrap().finished
    }
}
