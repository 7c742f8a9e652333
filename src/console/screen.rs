use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::error::SimError;
use crate::io::Config;
use crate::kernel::process_control_block::Process;
use crate::util;
use crate::App;

pub const REPORT_FILE: &str = "csopesy-log.txt";

const TABLE_RULE: &str =
    "+---------------+--------------------------+----------+-----------------------------------+";
const PROGRESS_BAR_WIDTH: usize = 20;

/// Clears the display and shows one process: identity, progress, and the
/// last 20 log lines.
pub fn display_process_screen(process: &Arc<Process>) {
    let state = process.state.lock().unwrap();
    util::clear_screen();

    println!("Process: {}", process.name);
    println!("ID: {}", process.pid);
    if process.memory_size > 0 {
        println!("Memory Size: {} bytes", process.memory_size);
    }

    if state.finished {
        println!("\nFinished!\n");
    } else {
        println!("Current instruction line: {}", state.pc);
        println!("Lines of code: {}", process.total_instructions());
    }

    println!("\n--- Logs ---");
    let start = state.log.len().saturating_sub(20);
    for line in &state.log[start..] {
        println!("{line}");
    }
    println!();
}

/// `screen -ls`: utilization summary and a progress table of every process.
pub fn screen_ls(app: &App, config: &Config) {
    let cores_used = app.scheduler.stats().cores_used();
    let num_cpu = config.num_cpu;
    let processes = app.registry.all();
    let finished = processes.iter().filter(|p| p.is_finished()).count();
    let running = processes.len() - finished;

    println!("\nCPU Utilization: {}%", cores_used * 100 / num_cpu.max(1));
    println!("Cores used: {cores_used}");
    println!("Cores available: {}", num_cpu.saturating_sub(cores_used));
    println!("\nRunning processes: {running}");
    println!("Finished processes: {finished}");
    println!("{TABLE_RULE}");
    for process in &processes {
        println!("{}", process_row(process));
    }
    println!("{TABLE_RULE}");
}

fn process_row(process: &Arc<Process>) -> String {
    let state = process.state.lock().unwrap();
    let started = util::format_time(process.start_time);
    let status = if state.finished {
        format!("{:>7}", "Done")
    } else {
        format!("Core: {}", state.cpu_core.map(|c| c as i64).unwrap_or(-1))
    };

    let total = process.total_instructions();
    let filled = (state.pc * PROGRESS_BAR_WIDTH) / total.max(1);
    let bar: String = (0..PROGRESS_BAR_WIDTH)
        .map(|i| if i < filled { '=' } else { ' ' })
        .collect();

    format!(
        "| {:<14}|  ({}) | {} | [{}] {:>3} / {} |",
        process.name, started, status, bar, state.pc, total
    )
}

/// `process-smi`: global CPU/memory summary with per-running-process
/// memory sizes.
pub fn process_smi(app: &App, config: &Config) {
    let stats = app.memory.stats().unwrap_or_default();
    let cores_used = app.scheduler.stats().cores_used();
    let total_cpu = config.num_cpu;

    let cpu_util = if total_cpu > 0 {
        cores_used as f64 / total_cpu as f64 * 100.0
    } else {
        0.0
    };
    let total_mem = config.max_overall_mem;
    let used_mem = stats.used_frames * config.mem_per_frame;
    let mem_util = if total_mem > 0 {
        used_mem as f64 / total_mem as f64 * 100.0
    } else {
        0.0
    };

    println!();
    println!("--------------------------------------------------");
    println!("| PROCESS-SMI V01.00 Driver Version: 01.00       |");
    println!("--------------------------------------------------");
    println!("CPU-Util: {cpu_util:.0}%");
    println!("Memory Usage: {used_mem} bytes / {total_mem} bytes");
    println!("Memory Util: {mem_util:.0}%");
    println!();
    println!("==================================================");
    println!("Running processes and memory usage:");
    println!("--------------------------------------------------");

    let mut any_running = false;
    for process in app.registry.all() {
        if !process.is_finished() {
            println!("{:<20}{} bytes", process.name, process.memory_size);
            any_running = true;
        }
    }
    if !any_running {
        println!("No running processes.");
    }
    println!("--------------------------------------------------");
    println!();
}

/// `vmstat`: byte and page statistics, tick tallies, and the frame table.
pub fn vmstat(app: &App, config: &Config) -> Result<(), SimError> {
    let stats = app.memory.stats()?;
    let cpu_stats = app.scheduler.stats();

    println!("\n=== Virtual Memory Statistics ===");
    println!("Total Memory: {} bytes", config.max_overall_mem);
    println!("Frame Size: {} bytes", config.mem_per_frame);
    println!("Total Frames: {}", stats.total_frames);
    println!("Used Frames: {}", stats.used_frames);
    println!("Free Frames: {}", stats.free_frames);
    let utilization = if stats.total_frames > 0 {
        stats.used_frames as f64 * 100.0 / stats.total_frames as f64
    } else {
        0.0
    };
    println!("Memory Utilization: {utilization:.1}%");
    println!("\n--- Page Fault Statistics ---");
    println!("Total Page Faults: {}", stats.total_page_faults);
    println!("Pages Loaded (In): {}", stats.total_pages_in);
    println!("Pages Evicted (Out): {}", stats.total_pages_out);
    println!("\n--- CPU Ticks ---");
    println!("Active Ticks: {}", cpu_stats.active_ticks());
    println!("Idle Ticks: {}", cpu_stats.idle_ticks());

    println!("\nFrame Allocation:");
    println!("+-------+----------+----------+");
    println!("| Frame | Process  | Page     |");
    println!("+-------+----------+----------+");
    for frame in app.memory.frame_table()? {
        match frame.owner {
            Some((pid, page)) => {
                println!("| {:>5} | {:>8} | {:>8} |", frame.frame_id, pid, page)
            }
            None => println!("| {:>5} | {:>8} | {:>8} |", frame.frame_id, "FREE", "-"),
        }
    }
    println!("+-------+----------+----------+");
    println!();
    Ok(())
}

/// `report-util`: writes the utilization report to `csopesy-log.txt`.
pub fn report_util(app: &App, config: &Config, path: impl AsRef<Path>) -> Result<(), SimError> {
    let cores_used = app.scheduler.stats().cores_used();
    let num_cpu = config.num_cpu;

    let mut running = Vec::new();
    let mut finished = Vec::new();
    for process in app.registry.all() {
        if process.is_finished() {
            finished.push(process);
        } else {
            running.push(process);
        }
    }

    let mut report = String::new();
    let _ = writeln!(report, "CPU Utilization Report");
    let _ = writeln!(report, "Generated: {}\n", util::timestamp());
    let _ = writeln!(
        report,
        "CPU Utilization: {:.1}%",
        cores_used as f64 * 100.0 / num_cpu.max(1) as f64
    );
    let _ = writeln!(report, "Cores used: {cores_used}");
    let _ = writeln!(report, "Cores available: {}", num_cpu.saturating_sub(cores_used));
    let _ = writeln!(report, "Running processes: {}", running.len());
    let _ = writeln!(report, "Finished processes: {}\n", finished.len());
    let _ = writeln!(report, "--------------------------------------");

    let _ = writeln!(report, "Running processes:");
    for process in &running {
        let state = process.state.lock().unwrap();
        let _ = writeln!(
            report,
            "{}    ({})    Core: {}    {} / {}",
            process.name,
            util::format_time(process.start_time),
            state.cpu_core.map(|c| c as i64).unwrap_or(-1),
            state.pc,
            process.total_instructions()
        );
    }

    let _ = writeln!(report, "\nFinished processes:");
    for process in &finished {
        let state = process.state.lock().unwrap();
        let _ = writeln!(
            report,
            "{}    ({})    Finished    {} / {}",
            process.name,
            util::format_time(process.start_time),
            state.pc,
            process.total_instructions()
        );
    }
    let _ = writeln!(report, "--------------------------------------");

    fs::write(path.as_ref(), report)?;
    println!("Report generated: {}", path.as_ref().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::process_control_block::Instruction;

    #[test]
    fn test_process_row_shows_done_when_finished() {
        let process = Arc::new(Process::new(
            7,
            "worker".to_string(),
            vec![Instruction::Print { var: None }],
            0,
        ));
        {
            let mut state = process.state.lock().unwrap();
            state.pc = 1;
            state.finished = true;
        }

        let row = process_row(&process);
        assert!(row.contains("worker"));
        assert!(row.contains("Done"));
        assert!(row.contains("[====================]"));
        assert!(row.contains("1 / 1"));
    }

    #[test]
    fn test_process_row_shows_core_and_progress() {
        let process = Arc::new(Process::new(
            7,
            "worker".to_string(),
            vec![Instruction::Print { var: None }; 4],
            0,
        ));
        {
            let mut state = process.state.lock().unwrap();
            state.pc = 2;
            state.cpu_core = Some(3);
        }

        let row = process_row(&process);
        assert!(row.contains("Core: 3"));
        assert!(row.contains("[==========          ]"));
        assert!(row.contains("2 / 4"));
    }
}
