//! Reference executor for generated listings.
//!
//! Memory is a sparse map of 8-byte words. The stack starts at
//! [`STACK_TOP`] and grows down; lists are carved out of a heap that grows
//! up from [`HEAP_BASE`], each preceded by a header word holding its length.
//! Variable slots are kept by name.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use tracing::{debug, trace};

use crate::codegen::{
    Address, ArithOp, ENTRY_LABEL, Instruction, Operand, Register, WORD_SIZE,
};

pub const STACK_TOP: i64 = 1 << 20;
pub const HEAP_BASE: i64 = 1 << 12;
pub const DEFAULT_STEP_LIMIT: usize = 1_000_000;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    fn as_int(&self) -> Result<i64, MachineError> {
        match self {
            Value::Int(value) => Ok(*value),
            Value::Float(_) | Value::Str(_) => Err(MachineError::TypeMismatch {
                expected: "integer",
                found: self.to_string(),
            }),
        }
    }

    fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(value) => Some(*value as f64),
            Value::Float(value) => Some(*value),
            Value::Str(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value:?}"),
            Value::Str(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MachineError {
    #[error("Unknown label '{label}'")]
    UnknownLabel { label: String },
    #[error("Label '{label}' defined more than once")]
    DuplicateLabel { label: String },
    #[error("Stack underflow")]
    StackUnderflow,
    #[error("Expected {expected}, got {found}")]
    TypeMismatch {
        expected: &'static str,
        found: String,
    },
    #[error("Unsupported operands for {op}: {lhs} and {rhs}")]
    UnsupportedOperands {
        op: &'static str,
        lhs: String,
        rhs: String,
    },
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Integer overflow in {op}")]
    Overflow { op: &'static str },
    #[error("Register {register} read before it was written")]
    UninitializedRegister { register: Register },
    #[error("Undefined variable '{name}'")]
    UndefinedVariable { name: String },
    #[error("Invalid memory address {address}")]
    InvalidAddress { address: i64 },
    #[error("Conditional instruction without a preceding cmp")]
    MissingComparison,
    #[error("range() step must not be zero")]
    ZeroStep,
    #[error("Step limit of {limit} instructions exceeded")]
    StepLimit { limit: usize },
}

type MachineResult<T> = Result<T, MachineError>;

enum Location {
    Slot(String),
    Word(i64),
}

pub struct Machine {
    registers: HashMap<Register, Value>,
    memory: HashMap<i64, Value>,
    slots: HashMap<String, Value>,
    heap_top: i64,
    comparison: Option<Ordering>,
    output: Vec<String>,
    step_limit: usize,
}

impl Machine {
    pub fn new() -> Self {
        Self::with_step_limit(DEFAULT_STEP_LIMIT)
    }

    pub fn with_step_limit(step_limit: usize) -> Self {
        Self {
            registers: HashMap::new(),
            memory: HashMap::new(),
            slots: HashMap::new(),
            heap_top: HEAP_BASE,
            comparison: None,
            output: Vec::new(),
            step_limit,
        }
    }

    /// Runs `listing` from its entry label until `halt` and returns the
    /// printed lines. Running off the end of the listing also halts.
    pub fn run(&mut self, listing: &[Instruction]) -> MachineResult<Vec<String>> {
        self.reset();
        let labels = resolve_labels(listing)?;
        let mut ip = jump_target(&labels, ENTRY_LABEL)?;
        debug!(instructions = listing.len(), "running listing");

        let mut steps = 0;
        while let Some(instruction) = listing.get(ip) {
            steps += 1;
            if steps > self.step_limit {
                return Err(MachineError::StepLimit {
                    limit: self.step_limit,
                });
            }
            ip += 1;
            trace!(%instruction, "step");

            match instruction {
                Instruction::Label(_) => {}
                Instruction::Mov { dst, src } => {
                    let value = self.operand(src)?;
                    self.registers.insert(*dst, value);
                }
                Instruction::Load { dst, addr } => {
                    let location = self.locate(addr)?;
                    let value = self.read(&location)?;
                    self.registers.insert(*dst, value);
                }
                Instruction::Store { addr, src } => {
                    let value = self.register(*src)?;
                    match self.locate(addr)? {
                        Location::Slot(name) => {
                            self.slots.insert(name, value);
                        }
                        Location::Word(address) => {
                            self.memory.insert(address, value);
                        }
                    }
                }
                Instruction::Arith { op, dst, src } => {
                    let lhs = self.register(*dst)?;
                    let rhs = self.operand(src)?;
                    let result = arith(*op, lhs, rhs)?;
                    self.registers.insert(*dst, result);
                }
                Instruction::Cmp { lhs, rhs } => {
                    let lhs = self.register(*lhs)?;
                    let rhs = self.operand(rhs)?;
                    self.comparison = Some(compare(&lhs, &rhs)?);
                }
                Instruction::Set { cond, dst } => {
                    let ordering = self.comparison.ok_or(MachineError::MissingComparison)?;
                    let flag = i64::from(cond.holds(ordering));
                    self.registers.insert(*dst, Value::Int(flag));
                }
                Instruction::Jmp(target) => ip = jump_target(&labels, target)?,
                Instruction::Jcc { cond, target } => {
                    let ordering = self.comparison.ok_or(MachineError::MissingComparison)?;
                    if cond.holds(ordering) {
                        ip = jump_target(&labels, target)?;
                    }
                }
                Instruction::Push(register) => {
                    let value = self.register(*register)?;
                    self.push(value)?;
                }
                Instruction::Pop(register) => {
                    let value = self.pop()?;
                    self.registers.insert(*register, value);
                }
                Instruction::Call(name) => {
                    let target = jump_target(&labels, name)?;
                    self.push(Value::Int(ip as i64))?;
                    ip = target;
                }
                Instruction::Ret => {
                    let address = self.pop()?.as_int()?;
                    ip = usize::try_from(address)
                        .map_err(|_| MachineError::InvalidAddress { address })?;
                }
                Instruction::Halt => break,
                Instruction::Print(register) => {
                    let value = self.register(*register)?;
                    self.output.push(value.to_string());
                }
                Instruction::NewList { dst, len } => {
                    let base = self.allocate_list(vec![Value::Int(0); *len]);
                    self.registers.insert(*dst, Value::Int(base));
                }
                Instruction::Range {
                    dst,
                    start,
                    stop,
                    step,
                } => {
                    let start = self.register(*start)?.as_int()?;
                    let stop = self.register(*stop)?.as_int()?;
                    let step = self.register(*step)?.as_int()?;
                    let values = range_values(start, stop, step)?;
                    let base = self.allocate_list(values);
                    self.registers.insert(*dst, Value::Int(base));
                }
                Instruction::Len { dst, src } => {
                    let length = match self.register(*src)? {
                        Value::Str(text) => text.chars().count() as i64,
                        value => {
                            let base = value.as_int()?;
                            self.read(&Location::Word(base - WORD_SIZE))?.as_int()?
                        }
                    };
                    self.registers.insert(*dst, Value::Int(length));
                }
            }
        }

        debug!(steps, lines = self.output.len(), "listing finished");
        Ok(std::mem::take(&mut self.output))
    }

    fn reset(&mut self) {
        self.registers.clear();
        self.memory.clear();
        self.slots.clear();
        self.heap_top = HEAP_BASE;
        self.comparison = None;
        self.output.clear();
        self.registers.insert(Register::Stack, Value::Int(STACK_TOP));
        self.registers.insert(Register::Base, Value::Int(STACK_TOP));
    }

    fn register(&self, register: Register) -> MachineResult<Value> {
        self.registers
            .get(&register)
            .cloned()
            .ok_or(MachineError::UninitializedRegister { register })
    }

    fn operand(&self, operand: &Operand) -> MachineResult<Value> {
        match operand {
            Operand::Register(register) => self.register(*register),
            Operand::Int(value) => Ok(Value::Int(*value)),
            Operand::Float(value) => Ok(Value::Float(*value)),
            Operand::Str(value) => Ok(Value::Str(value.clone())),
        }
    }

    fn locate(&self, addr: &Address) -> MachineResult<Location> {
        match addr {
            Address::Slot(name) => Ok(Location::Slot(name.clone())),
            Address::Offset { base, offset } => {
                let base = self.register(*base)?.as_int()?;
                Ok(Location::Word(base + offset))
            }
            Address::Indexed { base, index, scale } => {
                let base = self.register(*base)?.as_int()?;
                let index = self.register(*index)?.as_int()?;
                Ok(Location::Word(base + index * scale))
            }
        }
    }

    fn read(&self, location: &Location) -> MachineResult<Value> {
        match location {
            Location::Slot(name) => self
                .slots
                .get(name)
                .cloned()
                .ok_or_else(|| MachineError::UndefinedVariable { name: name.clone() }),
            Location::Word(address) => self
                .memory
                .get(address)
                .cloned()
                .ok_or(MachineError::InvalidAddress { address: *address }),
        }
    }

    fn push(&mut self, value: Value) -> MachineResult<()> {
        let sp = self.register(Register::Stack)?.as_int()? - WORD_SIZE;
        if sp < self.heap_top {
            return Err(MachineError::InvalidAddress { address: sp });
        }
        self.memory.insert(sp, value);
        self.registers.insert(Register::Stack, Value::Int(sp));
        Ok(())
    }

    fn pop(&mut self) -> MachineResult<Value> {
        let sp = self.register(Register::Stack)?.as_int()?;
        if sp >= STACK_TOP {
            return Err(MachineError::StackUnderflow);
        }
        let value = self
            .memory
            .remove(&sp)
            .ok_or(MachineError::InvalidAddress { address: sp })?;
        self.registers
            .insert(Register::Stack, Value::Int(sp + WORD_SIZE));
        Ok(value)
    }

    /// Returns the address of the first element.
    fn allocate_list(&mut self, elements: Vec<Value>) -> i64 {
        let len = elements.len() as i64;
        let header = self.heap_top;
        self.memory.insert(header, Value::Int(len));
        let base = header + WORD_SIZE;
        for (index, element) in elements.into_iter().enumerate() {
            self.memory.insert(base + index as i64 * WORD_SIZE, element);
        }
        self.heap_top = base + len * WORD_SIZE;
        base
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `listing` on a fresh machine with the default step limit.
pub fn run(listing: &[Instruction]) -> MachineResult<Vec<String>> {
    Machine::new().run(listing)
}

fn resolve_labels(listing: &[Instruction]) -> MachineResult<HashMap<&str, usize>> {
    let mut labels = HashMap::new();
    for (index, instruction) in listing.iter().enumerate() {
        if let Some(label) = instruction.label_name()
            && labels.insert(label, index).is_some()
        {
            return Err(MachineError::DuplicateLabel {
                label: label.to_string(),
            });
        }
    }
    Ok(labels)
}

fn jump_target(labels: &HashMap<&str, usize>, label: &str) -> MachineResult<usize> {
    labels
        .get(label)
        .copied()
        .ok_or_else(|| MachineError::UnknownLabel {
            label: label.to_string(),
        })
}

fn range_values(start: i64, stop: i64, step: i64) -> MachineResult<Vec<Value>> {
    if step == 0 {
        return Err(MachineError::ZeroStep);
    }
    let mut values = Vec::new();
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        values.push(Value::Int(current));
        match current.checked_add(step) {
            Some(next) => current = next,
            None => break,
        }
    }
    Ok(values)
}

fn arith(op: ArithOp, lhs: Value, rhs: Value) -> MachineResult<Value> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => int_arith(op, a, b),
        (Value::Str(a), Value::Str(b)) if op == ArithOp::Add => Ok(Value::Str(a + &b)),
        (lhs, rhs) => match (lhs.as_float(), rhs.as_float()) {
            (Some(a), Some(b)) => float_arith(op, a, b),
            _ => Err(MachineError::UnsupportedOperands {
                op: op.mnemonic(),
                lhs: lhs.to_string(),
                rhs: rhs.to_string(),
            }),
        },
    }
}

fn int_arith(op: ArithOp, a: i64, b: i64) -> MachineResult<Value> {
    let result = match op {
        ArithOp::Add => a.checked_add(b),
        ArithOp::Sub => a.checked_sub(b),
        ArithOp::Mul => a.checked_mul(b),
        ArithOp::Div | ArithOp::Mod if b == 0 => return Err(MachineError::DivisionByZero),
        ArithOp::Div => a.checked_div(b),
        ArithOp::Mod => a.checked_rem_euclid(b),
        ArithOp::Pow => match u32::try_from(b) {
            Ok(exponent) => a.checked_pow(exponent),
            Err(_) => return Ok(Value::Float((a as f64).powf(b as f64))),
        },
    };
    result.map(Value::Int).ok_or(MachineError::Overflow {
        op: op.mnemonic(),
    })
}

fn float_arith(op: ArithOp, a: f64, b: f64) -> MachineResult<Value> {
    let result = match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div | ArithOp::Mod if b == 0.0 => return Err(MachineError::DivisionByZero),
        ArithOp::Div => a / b,
        ArithOp::Mod => a.rem_euclid(b),
        ArithOp::Pow => a.powf(b),
    };
    Ok(Value::Float(result))
}

fn compare(lhs: &Value, rhs: &Value) -> MachineResult<Ordering> {
    let ordering = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => match (lhs.as_float(), rhs.as_float()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };
    ordering.ok_or_else(|| MachineError::UnsupportedOperands {
        op: "cmp",
        lhs: lhs.to_string(),
        rhs: rhs.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::codegen::generate;
    use crate::parser::parse;

    fn execute(source: &str) -> MachineResult<Vec<String>> {
        let parsed = parse(source);
        assert!(!parsed.has_errors(), "{:?}", parsed.diagnostics);
        let listing = generate(&parsed).expect("generation should succeed");
        run(&listing)
    }

    fn output(source: &str) -> Vec<String> {
        execute(source).expect("program should run")
    }

    #[test]
    fn for_over_range_runs_each_iteration_once() {
        assert_eq!(output("for i in range(3): print(i)"), vec!["0", "1", "2"]);
        assert_eq!(
            output("for i in range(10, 0, 0 - 4):\n    print(i)\n"),
            vec!["10", "6", "2"]
        );
        assert!(output("for i in range(0):\n    print(i)\n").is_empty());
    }

    #[test]
    fn branches_and_loops() {
        let source = indoc! {"
            def main():
                x = 1
                if x > 0:
                    print(x)
                else:
                    print(0)
                n = 0
                while n < 3:
                    if n == 0:
                        print('zero')
                    elif n == 1:
                        print('one')
                    else:
                        print('many')
                    n += 1
        "};
        assert_eq!(output(source), vec!["1", "zero", "one", "many"]);
    }

    #[test]
    fn recursive_calls_keep_caller_registers() {
        let source = indoc! {"
            def fact(n):
                if n <= 1:
                    return 1
                return n * fact(n - 1)

            def sub(a, b):
                return a - b

            print(fact(5))
            print(100 + sub(10, 3))
        "};
        assert_eq!(output(source), vec!["120", "107"]);
    }

    #[test]
    fn lists_and_len() {
        let source = indoc! {"
            xs = [3, 4, 5]
            total = 0
            for x in xs:
                total += x
            print(total, len(xs), len('abc'))
        "};
        assert_eq!(output(source), vec!["12", "3", "3"]);
    }

    #[test]
    fn arithmetic_follows_operand_types() {
        assert_eq!(
            output("print(7 / 2, 7 % 3, (0 - 7) % 3, 2 ** 10, 1.5 * 2, 'a' + 'b')"),
            vec!["3", "1", "2", "1024", "3.0", "ab"]
        );
    }

    #[test]
    fn runtime_errors_are_reported() {
        assert_eq!(execute("print(1 / 0)"), Err(MachineError::DivisionByZero));
        assert_eq!(
            execute("print(y)"),
            Err(MachineError::UndefinedVariable {
                name: "y".to_string(),
            })
        );
        assert_eq!(
            execute("for i in range(1, 5, 0): print(i)"),
            Err(MachineError::ZeroStep)
        );
    }

    #[test]
    fn infinite_loops_hit_the_step_limit() {
        let listing = generate(&parse("while True:\n    x = 1\n")).expect("generate");
        assert_eq!(
            Machine::with_step_limit(100).run(&listing),
            Err(MachineError::StepLimit { limit: 100 })
        );
    }

    #[test]
    fn rejects_malformed_listings() {
        assert_eq!(
            run(&[Instruction::Halt]),
            Err(MachineError::UnknownLabel {
                label: ENTRY_LABEL.to_string(),
            })
        );
        assert_eq!(
            run(&[
                Instruction::Label(ENTRY_LABEL.to_string()),
                Instruction::Pop(Register::General(0)),
            ]),
            Err(MachineError::StackUnderflow)
        );
        assert_eq!(
            run(&[
                Instruction::Label(ENTRY_LABEL.to_string()),
                Instruction::Jmp("nowhere".to_string()),
            ]),
            Err(MachineError::UnknownLabel {
                label: "nowhere".to_string(),
            })
        );
    }

    #[test]
    fn machine_is_reusable() {
        let listing = generate(&parse("print(42)")).expect("generate");
        let mut machine = Machine::new();
        assert_eq!(machine.run(&listing), Ok(vec!["42".to_string()]));
        assert_eq!(machine.run(&listing), Ok(vec!["42".to_string()]));
    }
}
