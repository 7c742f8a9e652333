use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::SimError;

pub const CONFIG_FILE: &str = "config.txt";

/// Simulation parameters loaded by the `initialize` command. One key-value
/// pair per line, whitespace separated; string values may be quoted.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub num_cpu: usize,
    pub scheduler: String,
    pub quantum_cycles: u32,
    pub batch_process_freq: u64,
    pub min_ins: usize,
    pub max_ins: usize,
    pub delays_per_exec: u64,
    pub max_overall_mem: usize,
    pub mem_per_frame: usize,
    pub min_mem_per_proc: usize,
    pub max_mem_per_proc: usize,
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config, SimError> {
        let contents = fs::read_to_string(path)?;
        Config::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Config, SimError> {
        let mut config = Config::default();

        for line in contents.lines() {
            let mut parts = line.split_whitespace();
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            let value = value.trim_matches('"');

            match key {
                "num-cpu" => config.num_cpu = parse_value(key, value)?,
                "scheduler" => config.scheduler = value.to_string(),
                "quantum-cycles" => config.quantum_cycles = parse_value(key, value)?,
                "batch-processes-freq" => config.batch_process_freq = parse_value(key, value)?,
                "min-ins" => config.min_ins = parse_value(key, value)?,
                "max-ins" => config.max_ins = parse_value(key, value)?,
                "delay-per-exec" => config.delays_per_exec = parse_value(key, value)?,
                "max-overall-mem" => config.max_overall_mem = parse_value(key, value)?,
                "mem-per-frame" => config.mem_per_frame = parse_value(key, value)?,
                "min-mem-per-proc" => config.min_mem_per_proc = parse_value(key, value)?,
                "max-mem-per-proc" => config.max_mem_per_proc = parse_value(key, value)?,
                _ => {}
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// True when both memory keys are present, enabling the memory manager.
    pub fn has_memory(&self) -> bool {
        self.max_overall_mem > 0 && self.mem_per_frame > 0
    }

    fn validate(&self) -> Result<(), SimError> {
        if self.num_cpu < 1 {
            return Err(SimError::invalid("num-cpu must be at least 1"));
        }
        if self.scheduler != "rr" {
            return Err(SimError::invalid(format!(
                "unsupported scheduler '{}'",
                self.scheduler
            )));
        }
        if self.quantum_cycles < 1 {
            return Err(SimError::invalid("quantum-cycles must be at least 1"));
        }
        if self.min_ins < 1 {
            return Err(SimError::invalid("min-ins must be at least 1"));
        }
        if self.min_ins > self.max_ins {
            return Err(SimError::invalid("min-ins must not exceed max-ins"));
        }
        if (self.max_overall_mem > 0 || self.mem_per_frame > 0)
            && (self.mem_per_frame == 0 || self.max_overall_mem % self.mem_per_frame != 0)
        {
            return Err(SimError::invalid(
                "mem-per-frame must divide max-overall-mem",
            ));
        }
        for (key, size) in [
            ("min-mem-per-proc", self.min_mem_per_proc),
            ("max-mem-per-proc", self.max_mem_per_proc),
        ] {
            if size > 0 && (!size.is_power_of_two() || !(64..=65536).contains(&size)) {
                return Err(SimError::invalid(format!(
                    "{key} must be a power of 2 between 64 and 65536"
                )));
            }
        }
        if self.min_mem_per_proc > self.max_mem_per_proc {
            return Err(SimError::invalid(
                "min-mem-per-proc must not exceed max-mem-per-proc",
            ));
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, SimError> {
    value
        .parse()
        .map_err(|_| SimError::invalid(format!("invalid value '{value}' for {key}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "num-cpu 4\n\
                         scheduler \"rr\"\n\
                         quantum-cycles 5\n\
                         batch-processes-freq 1\n\
                         min-ins 10\n\
                         max-ins 30\n\
                         delay-per-exec 100\n\
                         max-overall-mem 16384\n\
                         mem-per-frame 256\n\
                         min-mem-per-proc 512\n\
                         max-mem-per-proc 4096\n";

    #[test]
    fn test_config_parse_valid() {
        let config = Config::parse(VALID).unwrap();
        assert_eq!(config.num_cpu, 4);
        assert_eq!(config.scheduler, "rr");
        assert_eq!(config.quantum_cycles, 5);
        assert_eq!(config.batch_process_freq, 1);
        assert_eq!(config.min_ins, 10);
        assert_eq!(config.max_ins, 30);
        assert_eq!(config.delays_per_exec, 100);
        assert_eq!(config.max_overall_mem, 16384);
        assert_eq!(config.mem_per_frame, 256);
        assert!(config.has_memory());
    }

    #[test]
    fn test_config_strips_quotes() {
        let config = Config::parse(VALID).unwrap();
        assert_eq!(config.scheduler, "rr");
    }

    #[test]
    fn test_config_without_memory_keys() {
        let text = "num-cpu 2\nscheduler rr\nquantum-cycles 3\nmin-ins 1\nmax-ins 5\n";
        let config = Config::parse(text).unwrap();
        assert!(!config.has_memory());
    }

    #[test]
    fn test_config_rejects_missing_num_cpu() {
        let text = "scheduler rr\nquantum-cycles 3\nmin-ins 1\nmax-ins 5\n";
        assert!(Config::parse(text).is_err());
    }

    #[test]
    fn test_config_rejects_unknown_scheduler() {
        let text = "num-cpu 1\nscheduler fcfs\nquantum-cycles 3\nmin-ins 1\nmax-ins 5\n";
        assert!(Config::parse(text).is_err());
    }

    #[test]
    fn test_config_rejects_min_ins_above_max_ins() {
        let text = "num-cpu 1\nscheduler rr\nquantum-cycles 3\nmin-ins 9\nmax-ins 5\n";
        assert!(Config::parse(text).is_err());
    }

    #[test]
    fn test_config_rejects_frame_size_not_dividing_total() {
        let text = "num-cpu 1\nscheduler rr\nquantum-cycles 1\nmin-ins 1\nmax-ins 1\n\
                    max-overall-mem 1000\nmem-per-frame 256\n";
        assert!(Config::parse(text).is_err());
    }

    #[test]
    fn test_config_rejects_non_power_of_two_proc_memory() {
        let text = "num-cpu 1\nscheduler rr\nquantum-cycles 1\nmin-ins 1\nmax-ins 1\n\
                    max-overall-mem 1024\nmem-per-frame 256\n\
                    min-mem-per-proc 100\nmax-mem-per-proc 256\n";
        assert!(Config::parse(text).is_err());
    }

    #[test]
    fn test_config_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.txt");
        fs::write(&path, VALID).unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.num_cpu, 4);
    }

    #[test]
    fn test_config_load_missing_file() {
        let result = Config::load_from_file("/nonexistent/config.txt");
        assert!(matches!(result, Err(SimError::Io(_))));
    }
}
