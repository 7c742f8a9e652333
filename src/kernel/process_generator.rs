use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::SimError;

use super::process_control_block::{Instruction, Operand};

/// Loop nesting bound for random programs.
const MAX_NESTING: u32 = 3;
/// Variables are drawn from x0..x4.
const VAR_POOL: u32 = 5;
/// Custom programs carry between 1 and 50 instructions.
const MAX_CUSTOM_INSTRUCTIONS: usize = 50;

/// Synthesizes random programs for batch admission and parses the
/// semicolon-separated programs of `screen -c`.
pub struct ProcessGenerator {
    rng: StdRng,
}

impl ProcessGenerator {
    pub fn new() -> ProcessGenerator {
        ProcessGenerator {
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn random_program(&mut self, min_ins: usize, max_ins: usize) -> Vec<Instruction> {
        let count = self.rng.random_range(min_ins..=max_ins);
        (0..count).map(|_| self.random_instruction(0)).collect()
    }

    /// 2^k with k uniform over [log2(min), log2(max)]; both bounds are
    /// powers of two by config validation.
    pub fn random_memory_size(&mut self, min: usize, max: usize) -> usize {
        let low = min.trailing_zeros();
        let high = max.trailing_zeros();
        1usize << self.rng.random_range(low..=high)
    }

    fn random_instruction(&mut self, depth: u32) -> Instruction {
        let kinds = if depth >= MAX_NESTING { 5 } else { 6 };
        match self.rng.random_range(0..kinds) {
            0 => Instruction::Print { var: None },
            1 => Instruction::Declare {
                var: self.random_var(),
                value: self.rng.random_range(0..500),
            },
            2 => Instruction::Add {
                dst: self.random_var(),
                lhs: self.random_operand(),
                rhs: self.random_operand(),
            },
            3 => Instruction::Sub {
                dst: self.random_var(),
                lhs: self.random_operand(),
                rhs: self.random_operand(),
            },
            4 => Instruction::Sleep {
                ticks: self.rng.random_range(1..=5),
            },
            _ => {
                let body_len = self.rng.random_range(1..=3);
                let body = (0..body_len)
                    .map(|_| self.random_instruction(depth + 1))
                    .collect();
                Instruction::For {
                    count: self.rng.random_range(2..=4),
                    body,
                }
            }
        }
    }

    fn random_var(&mut self) -> String {
        format!("x{}", self.rng.random_range(0..VAR_POOL))
    }

    fn random_operand(&mut self) -> Operand {
        if self.rng.random_bool(0.5) {
            Operand::Var(self.random_var())
        } else {
            Operand::Imm(self.rng.random_range(0..500))
        }
    }

    /// Parses a semicolon-separated custom program. Any malformed
    /// instruction, an empty program, or more than 50 instructions is
    /// rejected as `invalid command`.
    pub fn parse_program(text: &str) -> Result<Vec<Instruction>, SimError> {
        let pieces: Vec<&str> = text
            .split(';')
            .map(str::trim)
            .filter(|piece| !piece.is_empty())
            .collect();
        if pieces.is_empty() || pieces.len() > MAX_CUSTOM_INSTRUCTIONS {
            return Err(invalid_command());
        }
        pieces.into_iter().map(Self::parse_instruction).collect()
    }

    fn parse_instruction(text: &str) -> Result<Instruction, SimError> {
        let mut tokens = text.split_whitespace();
        let keyword = tokens.next().ok_or_else(invalid_command)?.to_ascii_uppercase();

        let instruction = match keyword.as_str() {
            "PRINT" => Instruction::Print {
                var: tokens.next().map(str::to_string),
            },
            "DECLARE" => {
                let var = tokens.next().ok_or_else(invalid_command)?.to_string();
                let value = parse_number(tokens.next())?;
                Instruction::Declare { var, value }
            }
            "ADD" | "SUBTRACT" => {
                let dst = tokens.next().ok_or_else(invalid_command)?.to_string();
                let lhs = Self::parse_operand(tokens.next())?;
                let rhs = Self::parse_operand(tokens.next())?;
                if keyword == "ADD" {
                    Instruction::Add { dst, lhs, rhs }
                } else {
                    Instruction::Sub { dst, lhs, rhs }
                }
            }
            "SLEEP" => Instruction::Sleep {
                ticks: parse_number(tokens.next())?,
            },
            "READ" => {
                let var = tokens.next().ok_or_else(invalid_command)?.to_string();
                let addr = parse_number(tokens.next())?;
                Instruction::Read { var, addr }
            }
            "WRITE" => {
                let addr = parse_number(tokens.next())?;
                let value = parse_number(tokens.next())?;
                Instruction::Write { addr, value }
            }
            _ => return Err(invalid_command()),
        };

        if tokens.next().is_some() {
            return Err(invalid_command());
        }
        Ok(instruction)
    }

    fn parse_operand(token: Option<&str>) -> Result<Operand, SimError> {
        let token = token.ok_or_else(invalid_command)?;
        if token.starts_with('x') || token.starts_with('X') {
            Ok(Operand::Var(token.to_string()))
        } else {
            token
                .parse()
                .map(Operand::Imm)
                .map_err(|_| invalid_command())
        }
    }
}

impl Default for ProcessGenerator {
    fn default() -> ProcessGenerator {
        ProcessGenerator::new()
    }
}

fn invalid_command() -> SimError {
    SimError::invalid("invalid command")
}

fn parse_number<T: std::str::FromStr>(token: Option<&str>) -> Result<T, SimError> {
    token
        .and_then(|t| t.parse().ok())
        .ok_or_else(invalid_command)
}
