pub mod screen;

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use crate::error::SimError;
use crate::io::backing_store::BACKING_STORE_FILE;
use crate::io::config::{Config, CONFIG_FILE};
use crate::kernel::process_control_block::Process;
use crate::kernel::process_generator::ProcessGenerator;
use crate::util;
use crate::App;

/// Which display the console is attached to.
enum ScreenMode {
    MainMenu,
    ProcessScreen(String),
}

/// Line-oriented command shell over the simulator core. Every command
/// translates into core operations; failures come back as `SimError` and
/// are rendered as `ERROR:` lines.
pub struct Console<'a> {
    app: &'a App,
    mode: ScreenMode,
    quit: bool,
}

impl<'a> Console<'a> {
    pub fn new(app: &'a App) -> Console<'a> {
        Console {
            app,
            mode: ScreenMode::MainMenu,
            quit: false,
        }
    }

    /// Reads commands from standard input until `exit` at the main menu or
    /// end of input.
    pub fn run(&mut self) -> io::Result<()> {
        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();
        loop {
            print!("Command >> ");
            io::stdout().flush()?;
            let Some(line) = lines.next() else {
                break;
            };
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Err(err) = self.dispatch(line) {
                println!("ERROR: {err}");
            }
            if self.quit {
                break;
            }
        }
        Ok(())
    }

    /// Name of the process screen currently attached, if any.
    pub fn current_process(&self) -> Option<&str> {
        match &self.mode {
            ScreenMode::ProcessScreen(name) => Some(name),
            ScreenMode::MainMenu => None,
        }
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    pub fn dispatch(&mut self, line: &str) -> Result<(), SimError> {
        let mut tokens = line.split_whitespace();
        let command = tokens.next().unwrap_or("");

        match command {
            "exit" => {
                self.exit();
                Ok(())
            }
            "initialize" => self.initialize(),
            "scheduler-start" => {
                let config = self.require_config()?;
                self.app.scheduler.start(&config)?;
                println!("Scheduler started.");
                Ok(())
            }
            "scheduler-stop" => {
                self.app.scheduler.stop()?;
                println!("Scheduler stopped.");
                Ok(())
            }
            "screen" => self.screen_command(line),
            "process-smi" => {
                let config = self.require_config()?;
                screen::process_smi(self.app, &config);
                Ok(())
            }
            "vmstat" => {
                let config = self.require_config()?;
                screen::vmstat(self.app, &config)
            }
            "report-util" => {
                let config = self.require_config()?;
                screen::report_util(self.app, &config, screen::REPORT_FILE)
            }
            _ => {
                println!("Command not found.");
                Ok(())
            }
        }
    }

    fn exit(&mut self) {
        if matches!(self.mode, ScreenMode::ProcessScreen(_)) {
            self.mode = ScreenMode::MainMenu;
            util::clear_screen();
            println!("Returned to main menu.\n");
        } else {
            self.quit = true;
        }
    }

    /// Loads `config.txt` and, when both memory keys are present, brings up
    /// the memory manager.
    fn initialize(&mut self) -> Result<(), SimError> {
        let config = Arc::new(Config::load_from_file(CONFIG_FILE)?);
        if config.has_memory() {
            self.app.memory.initialize(
                config.max_overall_mem,
                config.mem_per_frame,
                BACKING_STORE_FILE,
            )?;
            println!(
                "Memory manager initialized: {} frames, {} bytes per frame.",
                config.max_overall_mem / config.mem_per_frame,
                config.mem_per_frame
            );
        }
        *self.app.config.lock().unwrap() = Some(config);
        println!("Console initialized successfully.");
        Ok(())
    }

    fn screen_command(&mut self, line: &str) -> Result<(), SimError> {
        const USAGE: &str = "usage: screen -s <process_name> [<memory_size>] | \
                             screen -r <process_name> | screen -ls | \
                             screen -c <process_name> <memory_size> \"<instructions>\"";

        let config = self.require_config()?;
        let tokens: Vec<&str> = line.split_whitespace().collect();

        match tokens.get(1).copied().unwrap_or("") {
            "-s" => {
                let name = *tokens.get(2).ok_or_else(|| SimError::invalid(USAGE))?;
                let memory_size = match tokens.get(3) {
                    Some(raw) => validate_memory_size(raw)?,
                    None => 0,
                };
                self.create_random(name, memory_size, &config)
            }
            "-c" => {
                let name = *tokens.get(2).ok_or_else(|| SimError::invalid(USAGE))?;
                let raw_size = *tokens.get(3).ok_or_else(|| SimError::invalid(USAGE))?;
                let memory_size = validate_memory_size(raw_size)?;
                let program_text = strip_quotes(remainder_after(line, 4));
                if program_text.is_empty() {
                    return Err(SimError::invalid(USAGE));
                }
                self.create_custom(name, memory_size, program_text)
            }
            "-r" => {
                let name = *tokens.get(2).ok_or_else(|| SimError::invalid(USAGE))?;
                self.reattach(name)
            }
            "-ls" => {
                screen::screen_ls(self.app, &config);
                Ok(())
            }
            _ => Err(SimError::invalid(USAGE)),
        }
    }

    fn create_random(
        &mut self,
        name: &str,
        memory_size: usize,
        config: &Config,
    ) -> Result<(), SimError> {
        let mut generator = ProcessGenerator::new();
        let program = generator.random_program(config.min_ins, config.max_ins);
        let pid = self.app.registry.next_pid();
        let process = Arc::new(Process::new(pid, name.to_string(), program, memory_size));
        self.admit(process)
    }

    fn create_custom(
        &mut self,
        name: &str,
        memory_size: usize,
        program_text: &str,
    ) -> Result<(), SimError> {
        let program = ProcessGenerator::parse_program(program_text)?;
        let pid = self.app.registry.next_pid();
        let process = Arc::new(Process::new(pid, name.to_string(), program, memory_size));
        self.admit(process)
    }

    /// Allocates memory when requested, registers, enqueues, and attaches
    /// to the new process's screen.
    fn admit(&mut self, process: Arc<Process>) -> Result<(), SimError> {
        if process.memory_size > 0 && self.app.memory.is_initialized() {
            self.app.memory.allocate(process.pid, process.memory_size)?;
        }
        if let Err(err) = self.app.registry.insert(Arc::clone(&process)) {
            self.app.memory.deallocate(process.pid);
            return Err(err);
        }
        self.app.scheduler.enqueue(&process);

        self.mode = ScreenMode::ProcessScreen(process.name.clone());
        screen::display_process_screen(&process);
        Ok(())
    }

    /// Reattaches to an existing process screen. Running processes display
    /// too, matching what `screen -ls` shows.
    fn reattach(&mut self, name: &str) -> Result<(), SimError> {
        let process = self
            .app
            .registry
            .get(name)
            .ok_or_else(|| SimError::NotFound(name.to_string()))?;
        self.mode = ScreenMode::ProcessScreen(name.to_string());
        screen::display_process_screen(&process);
        Ok(())
    }

    fn require_config(&self) -> Result<Arc<Config>, SimError> {
        self.app.config().ok_or(SimError::NotInitialized)
    }
}

fn validate_memory_size(raw: &str) -> Result<usize, SimError> {
    let size: usize = raw
        .parse()
        .map_err(|_| SimError::invalid(format!("invalid memory size '{raw}'")))?;
    if !size.is_power_of_two() {
        return Err(SimError::invalid("process memory size must be a power of 2"));
    }
    if !(64..=65536).contains(&size) {
        return Err(SimError::invalid(
            "process memory size must be between 64 and 65536",
        ));
    }
    Ok(size)
}

/// Slice of `line` after its first `skip_tokens` whitespace-separated
/// tokens, trimmed.
fn remainder_after(line: &str, skip_tokens: usize) -> &str {
    let mut rest = line;
    for _ in 0..skip_tokens {
        rest = rest.trim_start();
        match rest.find(char::is_whitespace) {
            Some(pos) => rest = &rest[pos..],
            None => return "",
        }
    }
    rest.trim()
}

fn strip_quotes(text: &str) -> &str {
    let text = text.strip_prefix('"').unwrap_or(text);
    text.strip_suffix('"').unwrap_or(text)
}
