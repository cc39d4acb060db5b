use std::fmt;

/// Size in bytes of one stack slot or list element.
pub const WORD_SIZE: i64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Register {
    /// Allocatable scratch register `r<n>`.
    General(u8),
    /// Holds a function's result across `ret`.
    Return,
    Stack,
    Base,
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::General(index) => write!(f, "r{index}"),
            Register::Return => f.write_str("rv"),
            Register::Stack => f.write_str("sp"),
            Register::Base => f.write_str("bp"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Register(Register),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<Register> for Operand {
    fn from(register: Register) -> Self {
        Operand::Register(register)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(register) => write!(f, "{register}"),
            Operand::Int(value) => write!(f, "{value}"),
            Operand::Float(value) => write!(f, "{value:?}"),
            Operand::Str(value) => write!(f, "{value:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Address {
    /// Named memory slot of a variable: `[x]`.
    Slot(String),
    /// `[base+offset]`, used for frame arguments and list elements.
    Offset { base: Register, offset: i64 },
    /// `[base + index*scale]`.
    Indexed {
        base: Register,
        index: Register,
        scale: i64,
    },
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Slot(name) => write!(f, "[{name}]"),
            Address::Offset { base, offset } => write!(f, "[{base}{offset:+}]"),
            Address::Indexed { base, index, scale } => write!(f, "[{base} + {index}*{scale}]"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl ArithOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
            ArithOp::Mod => "mod",
            ArithOp::Pow => "pow",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Equal,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
}

impl Condition {
    pub fn suffix(self) -> &'static str {
        match self {
            Condition::Equal => "e",
            Condition::NotEqual => "ne",
            Condition::Less => "l",
            Condition::Greater => "g",
            Condition::LessEqual => "le",
            Condition::GreaterEqual => "ge",
        }
    }

    /// Whether a comparison whose outcome is `ordering` satisfies this condition.
    pub fn holds(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::{Equal, Greater, Less};
        match self {
            Condition::Equal => ordering == Equal,
            Condition::NotEqual => ordering != Equal,
            Condition::Less => ordering == Less,
            Condition::Greater => ordering == Greater,
            Condition::LessEqual => ordering != Greater,
            Condition::GreaterEqual => ordering != Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Label(String),
    Mov {
        dst: Register,
        src: Operand,
    },
    Load {
        dst: Register,
        addr: Address,
    },
    Store {
        addr: Address,
        src: Register,
    },
    Arith {
        op: ArithOp,
        dst: Register,
        src: Operand,
    },
    Cmp {
        lhs: Register,
        rhs: Operand,
    },
    /// Writes 1 to `dst` when the last comparison satisfied `cond`, else 0.
    Set {
        cond: Condition,
        dst: Register,
    },
    Jmp(String),
    Jcc {
        cond: Condition,
        target: String,
    },
    Push(Register),
    Pop(Register),
    Call(String),
    Ret,
    Halt,
    Print(Register),
    /// Allocates a list of `len` elements and leaves its address in `dst`.
    NewList {
        dst: Register,
        len: usize,
    },
    Range {
        dst: Register,
        start: Register,
        stop: Register,
        step: Register,
    },
    Len {
        dst: Register,
        src: Register,
    },
}

impl Instruction {
    pub fn label_name(&self) -> Option<&str> {
        match self {
            Instruction::Label(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Label(name) => write!(f, "{name}:"),
            Instruction::Mov { dst, src } => write!(f, "    mov {dst}, {src}"),
            Instruction::Load { dst, addr } => write!(f, "    load {dst}, {addr}"),
            Instruction::Store { addr, src } => write!(f, "    store {addr}, {src}"),
            Instruction::Arith { op, dst, src } => write!(f, "    {} {dst}, {src}", op.mnemonic()),
            Instruction::Cmp { lhs, rhs } => write!(f, "    cmp {lhs}, {rhs}"),
            Instruction::Set { cond, dst } => write!(f, "    set{} {dst}", cond.suffix()),
            Instruction::Jmp(target) => write!(f, "    jmp {target}"),
            Instruction::Jcc { cond, target } => write!(f, "    j{} {target}", cond.suffix()),
            Instruction::Push(register) => write!(f, "    push {register}"),
            Instruction::Pop(register) => write!(f, "    pop {register}"),
            Instruction::Call(name) => write!(f, "    call {name}"),
            Instruction::Ret => f.write_str("    ret"),
            Instruction::Halt => f.write_str("    halt"),
            Instruction::Print(register) => write!(f, "    print {register}"),
            Instruction::NewList { dst, len } => write!(f, "    newlist {dst}, {len}"),
            Instruction::Range {
                dst,
                start,
                stop,
                step,
            } => write!(f, "    range {dst}, {start}, {stop}, {step}"),
            Instruction::Len { dst, src } => write!(f, "    len {dst}, {src}"),
        }
    }
}

/// Renders a listing, one instruction per line.
pub fn render(instructions: &[Instruction]) -> String {
    let mut out = String::new();
    for instruction in instructions {
        out.push_str(&instruction.to_string());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_text_operations() {
        let listing = [
            Instruction::Label("L0".to_string()),
            Instruction::Load {
                dst: Register::General(1),
                addr: Address::Indexed {
                    base: Register::General(0),
                    index: Register::General(2),
                    scale: WORD_SIZE,
                },
            },
            Instruction::Load {
                dst: Register::General(0),
                addr: Address::Offset {
                    base: Register::Base,
                    offset: 16,
                },
            },
            Instruction::Store {
                addr: Address::Slot("x".to_string()),
                src: Register::General(0),
            },
            Instruction::Mov {
                dst: Register::Return,
                src: Operand::Str("hi".to_string()),
            },
            Instruction::Arith {
                op: ArithOp::Sub,
                dst: Register::Stack,
                src: Operand::Float(0.5),
            },
            Instruction::Set {
                cond: Condition::GreaterEqual,
                dst: Register::General(3),
            },
            Instruction::Jcc {
                cond: Condition::Equal,
                target: "L1".to_string(),
            },
        ];
        assert_eq!(
            render(&listing),
            "L0:\n    load r1, [r0 + r2*8]\n    load r0, [bp+16]\n    store [x], r0\n    mov rv, \"hi\"\n    sub sp, 0.5\n    setge r3\n    je L1\n"
        );
    }
}
