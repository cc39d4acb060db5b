//! Lowers a parsed [`Program`] into a flat pseudo-assembly listing.
//!
//! Expressions are evaluated into general registers handed out first-fit
//! from a fixed pool; there is no spilling, so running out of registers
//! aborts the pass. Every value a lowering routine returns in a register is
//! owned by its caller, which releases it once consumed.
//!
//! Variables live in named memory slots. Function arguments are pushed right
//! to left and read relative to `bp`; results come back in `rv`. Live
//! registers are saved around calls by the caller.

use std::collections::HashMap;
use std::iter;

use tracing::debug;

use crate::ast::{BinaryOperator, Expression, FunctionDef, Program, Statement};
use crate::parser::ParseResult;

pub mod error;
pub mod instruction;
mod registers;

pub use error::CodegenError;
pub use instruction::{
    Address, ArithOp, Condition, Instruction, Operand, Register, WORD_SIZE, render,
};
use registers::RegisterPool;

/// Label the listing starts executing at.
pub const ENTRY_LABEL: &str = "_start";

/// `bp` points at the saved `bp`; the return address and then the first
/// argument follow it.
const FIRST_ARGUMENT_OFFSET: i64 = 2 * WORD_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Number of general registers available to expressions.
    pub registers: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self { registers: 8 }
    }
}

/// State of one code generation pass. Consumed by [`CodeGenerator::generate`].
pub struct CodeGenerator {
    registers: RegisterPool,
    next_label: usize,
    output: Vec<Instruction>,
    functions: HashMap<String, usize>,
    params: Vec<String>,
    in_function: bool,
}

type LowerResult<T> = Result<T, CodegenError>;

impl CodeGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self {
            registers: RegisterPool::new(config.registers),
            next_label: 0,
            output: Vec::new(),
            functions: HashMap::new(),
            params: Vec::new(),
            in_function: false,
        }
    }

    pub fn generate(mut self, parsed: &ParseResult) -> LowerResult<Vec<Instruction>> {
        if parsed.has_errors() {
            return Err(CodegenError::SyntaxErrors {
                count: parsed.diagnostics.len(),
            });
        }
        debug!(
            registers = self.registers.capacity(),
            "starting code generation"
        );

        self.lower_program(&parsed.program)?;

        if !self.registers.is_empty() {
            let live = self
                .registers
                .live()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>();
            return Err(CodegenError::LeakedRegisters {
                registers: live.join(", "),
            });
        }
        Ok(self.output)
    }

    fn lower_program(&mut self, program: &Program) -> LowerResult<()> {
        for function in &program.functions {
            let duplicate = function.name == ENTRY_LABEL
                || self
                    .functions
                    .insert(function.name.clone(), function.params.len())
                    .is_some();
            if duplicate {
                return Err(CodegenError::DuplicateFunction {
                    name: function.name.clone(),
                });
            }
        }

        self.emit(Instruction::Label(ENTRY_LABEL.to_string()));
        self.lower_block(&program.statements)?;
        if let Some(&arity) = self.functions.get("main") {
            if arity != 0 {
                return Err(CodegenError::ArityMismatch {
                    name: "main".to_string(),
                    expected: arity,
                    found: 0,
                });
            }
            self.emit(Instruction::Call("main".to_string()));
        }
        self.emit(Instruction::Halt);

        for function in &program.functions {
            self.lower_function(function)?;
        }
        Ok(())
    }

    fn lower_function(&mut self, function: &FunctionDef) -> LowerResult<()> {
        debug!(name = %function.name, "lowering function");
        self.params = function.params.clone();
        self.in_function = true;

        self.emit(Instruction::Label(function.name.clone()));
        self.emit(Instruction::Push(Register::Base));
        self.emit(Instruction::Mov {
            dst: Register::Base,
            src: Register::Stack.into(),
        });
        self.lower_block(&function.body)?;
        self.emit(Instruction::Mov {
            dst: Register::Return,
            src: Operand::Int(0),
        });
        self.emit_epilogue();

        self.params.clear();
        self.in_function = false;
        Ok(())
    }

    fn emit_epilogue(&mut self) {
        self.emit(Instruction::Mov {
            dst: Register::Stack,
            src: Register::Base.into(),
        });
        self.emit(Instruction::Pop(Register::Base));
        self.emit(Instruction::Ret);
    }

    fn lower_block(&mut self, statements: &[Statement]) -> LowerResult<()> {
        for statement in statements {
            self.lower_statement(statement)?;
        }
        Ok(())
    }

    fn lower_statement(&mut self, statement: &Statement) -> LowerResult<()> {
        match statement {
            Statement::Print { args } => {
                for arg in args {
                    let register = self.lower_expression(arg)?;
                    self.emit(Instruction::Print(register));
                    self.registers.release(register);
                }
            }
            Statement::Assign { target, value } => {
                let register = self.lower_expression(value)?;
                self.emit(Instruction::Store {
                    addr: self.variable_address(target),
                    src: register,
                });
                self.registers.release(register);
            }
            Statement::AugmentedAssign { target, op, value } => {
                let accumulator = self.registers.allocate()?;
                self.emit(Instruction::Load {
                    dst: accumulator,
                    addr: self.variable_address(target),
                });
                let operand = self.lower_expression(value)?;
                self.emit_binary(*op, accumulator, operand);
                self.registers.release(operand);
                self.emit(Instruction::Store {
                    addr: self.variable_address(target),
                    src: accumulator,
                });
                self.registers.release(accumulator);
            }
            Statement::If {
                condition,
                then_block,
                elif_clauses,
                else_block,
            } => {
                let clauses = iter::once((condition, then_block))
                    .chain(elif_clauses.iter().map(|(condition, block)| (condition, block)));
                let clause_count = 1 + elif_clauses.len();
                let mut end_label: Option<String> = None;

                for (index, (condition, block)) in clauses.enumerate() {
                    let has_alternative = index + 1 < clause_count || else_block.is_some();
                    let next_label = self.new_label();
                    self.emit_branch_if_false(condition, &next_label)?;
                    self.lower_block(block)?;
                    if has_alternative {
                        let end = end_label.get_or_insert_with(|| self.new_label()).clone();
                        self.emit(Instruction::Jmp(end));
                    }
                    self.emit(Instruction::Label(next_label));
                }

                if let Some(block) = else_block {
                    self.lower_block(block)?;
                }
                if let Some(end) = end_label {
                    self.emit(Instruction::Label(end));
                }
            }
            Statement::While { condition, body } => {
                let start_label = self.new_label();
                let end_label = self.new_label();
                self.emit(Instruction::Label(start_label.clone()));
                self.emit_branch_if_false(condition, &end_label)?;
                self.lower_block(body)?;
                self.emit(Instruction::Jmp(start_label));
                self.emit(Instruction::Label(end_label));
            }
            Statement::For {
                var,
                iterable,
                body,
            } => self.lower_for(var, iterable, body)?,
            Statement::Return(value) => {
                if !self.in_function {
                    return Err(CodegenError::ReturnOutsideFunction);
                }
                match value {
                    Some(value) => {
                        let register = self.lower_expression(value)?;
                        self.emit(Instruction::Mov {
                            dst: Register::Return,
                            src: register.into(),
                        });
                        self.registers.release(register);
                    }
                    None => self.emit(Instruction::Mov {
                        dst: Register::Return,
                        src: Operand::Int(0),
                    }),
                }
                self.emit_epilogue();
            }
            Statement::Expression(expr) => {
                let register = self.lower_expression(expr)?;
                self.registers.release(register);
            }
        }
        Ok(())
    }

    fn lower_for(
        &mut self,
        var: &str,
        iterable: &Expression,
        body: &[Statement],
    ) -> LowerResult<()> {
        let base = self.lower_expression(iterable)?;
        let counter = self.registers.allocate()?;
        self.emit(Instruction::Mov {
            dst: counter,
            src: Operand::Int(0),
        });

        let start_label = self.new_label();
        let end_label = self.new_label();
        self.emit(Instruction::Label(start_label.clone()));

        let length = self.registers.allocate()?;
        self.emit(Instruction::Len {
            dst: length,
            src: base,
        });
        self.emit(Instruction::Cmp {
            lhs: counter,
            rhs: length.into(),
        });
        self.registers.release(length);
        self.emit(Instruction::Jcc {
            cond: Condition::GreaterEqual,
            target: end_label.clone(),
        });

        let element = self.registers.allocate()?;
        self.emit(Instruction::Load {
            dst: element,
            addr: Address::Indexed {
                base,
                index: counter,
                scale: WORD_SIZE,
            },
        });
        self.emit(Instruction::Store {
            addr: self.variable_address(var),
            src: element,
        });
        self.registers.release(element);

        self.lower_block(body)?;

        self.emit(Instruction::Arith {
            op: ArithOp::Add,
            dst: counter,
            src: Operand::Int(1),
        });
        self.emit(Instruction::Jmp(start_label));
        self.emit(Instruction::Label(end_label));

        self.registers.release(counter);
        self.registers.release(base);
        Ok(())
    }

    /// Evaluates `condition` and jumps to `target` when it is zero.
    fn emit_branch_if_false(&mut self, condition: &Expression, target: &str) -> LowerResult<()> {
        let register = self.lower_expression(condition)?;
        self.emit(Instruction::Cmp {
            lhs: register,
            rhs: Operand::Int(0),
        });
        self.registers.release(register);
        self.emit(Instruction::Jcc {
            cond: Condition::Equal,
            target: target.to_string(),
        });
        Ok(())
    }

    fn lower_expression(&mut self, expr: &Expression) -> LowerResult<Register> {
        match expr {
            Expression::Number(value) => self.load_immediate(Operand::Int(*value)),
            Expression::Float(value) => self.load_immediate(Operand::Float(*value)),
            Expression::String(value) => self.load_immediate(Operand::Str(value.clone())),
            Expression::Bool(value) => self.load_immediate(Operand::Int(i64::from(*value))),
            Expression::Identifier(name) => {
                let register = self.registers.allocate()?;
                self.emit(Instruction::Load {
                    dst: register,
                    addr: self.variable_address(name),
                });
                Ok(register)
            }
            Expression::List(elements) => {
                let base = self.registers.allocate()?;
                self.emit(Instruction::NewList {
                    dst: base,
                    len: elements.len(),
                });
                for (index, element) in elements.iter().enumerate() {
                    let register = self.lower_expression(element)?;
                    self.emit(Instruction::Store {
                        addr: Address::Offset {
                            base,
                            offset: index as i64 * WORD_SIZE,
                        },
                        src: register,
                    });
                    self.registers.release(register);
                }
                Ok(base)
            }
            Expression::BinaryOp { left, op, right } => {
                let left = self.lower_expression(left)?;
                let right = self.lower_expression(right)?;
                self.emit_binary(*op, left, right);
                self.registers.release(right);
                Ok(left)
            }
            Expression::Call { name, args } => self.lower_call(name, args),
            Expression::Range { args } => self.lower_range(args),
        }
    }

    fn load_immediate(&mut self, value: Operand) -> LowerResult<Register> {
        let register = self.registers.allocate()?;
        self.emit(Instruction::Mov {
            dst: register,
            src: value,
        });
        Ok(register)
    }

    /// Combines `left` and `right` into `left`.
    fn emit_binary(&mut self, op: BinaryOperator, left: Register, right: Register) {
        let arith = match op {
            BinaryOperator::Add => ArithOp::Add,
            BinaryOperator::Sub => ArithOp::Sub,
            BinaryOperator::Mul => ArithOp::Mul,
            BinaryOperator::Div => ArithOp::Div,
            BinaryOperator::Mod => ArithOp::Mod,
            BinaryOperator::Pow => ArithOp::Pow,
            BinaryOperator::Eq
            | BinaryOperator::NotEq
            | BinaryOperator::Less
            | BinaryOperator::Greater
            | BinaryOperator::LessEq
            | BinaryOperator::GreaterEq => {
                let cond = match op {
                    BinaryOperator::Eq => Condition::Equal,
                    BinaryOperator::NotEq => Condition::NotEqual,
                    BinaryOperator::Less => Condition::Less,
                    BinaryOperator::Greater => Condition::Greater,
                    BinaryOperator::LessEq => Condition::LessEqual,
                    _ => Condition::GreaterEqual,
                };
                self.emit(Instruction::Cmp {
                    lhs: left,
                    rhs: right.into(),
                });
                self.emit(Instruction::Set { cond, dst: left });
                return;
            }
        };
        self.emit(Instruction::Arith {
            op: arith,
            dst: left,
            src: right.into(),
        });
    }

    fn lower_call(&mut self, name: &str, args: &[Expression]) -> LowerResult<Register> {
        let Some(&arity) = self.functions.get(name) else {
            if name == "len" {
                return self.lower_len(args);
            }
            return Err(CodegenError::UnknownFunction {
                name: name.to_string(),
            });
        };
        if arity != args.len() {
            return Err(CodegenError::ArityMismatch {
                name: name.to_string(),
                expected: arity,
                found: args.len(),
            });
        }

        let saved = self.registers.live();
        for register in &saved {
            self.emit(Instruction::Push(*register));
        }
        for arg in args.iter().rev() {
            let register = self.lower_expression(arg)?;
            self.emit(Instruction::Push(register));
            self.registers.release(register);
        }
        self.emit(Instruction::Call(name.to_string()));
        if !args.is_empty() {
            self.emit(Instruction::Arith {
                op: ArithOp::Add,
                dst: Register::Stack,
                src: Operand::Int(args.len() as i64 * WORD_SIZE),
            });
        }
        for register in saved.iter().rev() {
            self.emit(Instruction::Pop(*register));
        }

        let result = self.registers.allocate()?;
        self.emit(Instruction::Mov {
            dst: result,
            src: Register::Return.into(),
        });
        Ok(result)
    }

    fn lower_len(&mut self, args: &[Expression]) -> LowerResult<Register> {
        let [arg] = args else {
            return Err(CodegenError::ArityMismatch {
                name: "len".to_string(),
                expected: 1,
                found: args.len(),
            });
        };
        let register = self.lower_expression(arg)?;
        self.emit(Instruction::Len {
            dst: register,
            src: register,
        });
        Ok(register)
    }

    fn lower_range(&mut self, args: &[Expression]) -> LowerResult<Register> {
        let (start, stop, step) = match args {
            [stop] => (None, stop, None),
            [start, stop] => (Some(start), stop, None),
            [start, stop, step] => (Some(start), stop, Some(step)),
            _ => {
                return Err(CodegenError::ArityMismatch {
                    name: "range".to_string(),
                    expected: 3,
                    found: args.len(),
                });
            }
        };

        let start = match start {
            Some(start) => self.lower_expression(start)?,
            None => self.load_immediate(Operand::Int(0))?,
        };
        let stop = self.lower_expression(stop)?;
        let step = match step {
            Some(step) => self.lower_expression(step)?,
            None => self.load_immediate(Operand::Int(1))?,
        };
        self.emit(Instruction::Range {
            dst: start,
            start,
            stop,
            step,
        });
        self.registers.release(step);
        self.registers.release(stop);
        Ok(start)
    }

    fn variable_address(&self, name: &str) -> Address {
        match self.params.iter().position(|param| param == name) {
            Some(index) => Address::Offset {
                base: Register::Base,
                offset: FIRST_ARGUMENT_OFFSET + index as i64 * WORD_SIZE,
            },
            None => Address::Slot(name.to_string()),
        }
    }

    /// Hands out `L<n>` labels, skipping any that a function already uses.
    fn new_label(&mut self) -> String {
        loop {
            let label = format!("L{}", self.next_label);
            self.next_label += 1;
            if !self.functions.contains_key(&label) {
                return label;
            }
        }
    }

    fn emit(&mut self, instruction: Instruction) {
        self.output.push(instruction);
    }
}

/// Generates a listing with the default configuration.
pub fn generate(parsed: &ParseResult) -> Result<Vec<Instruction>, CodegenError> {
    CodeGenerator::new(GeneratorConfig::default()).generate(parsed)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use indoc::indoc;

    use super::*;
    use crate::parser::{self, Diagnostic};

    fn listing(source: &str) -> Vec<Instruction> {
        let parsed = parser::parse(source);
        generate(&parsed).expect("generation should succeed")
    }

    fn lines(source: &str) -> Vec<String> {
        listing(source).iter().map(ToString::to_string).collect()
    }

    fn labels(instructions: &[Instruction]) -> Vec<&str> {
        instructions
            .iter()
            .filter_map(Instruction::label_name)
            .collect()
    }

    #[test]
    fn lowers_top_level_assignment() {
        assert_eq!(
            lines("x = 5\nprint(x + 1)\n"),
            vec![
                "_start:",
                "    mov r0, 5",
                "    store [x], r0",
                "    load r0, [x]",
                "    mov r1, 1",
                "    add r0, r1",
                "    print r0",
                "    halt",
            ]
        );
    }

    #[test]
    fn if_else_uses_two_labels() {
        let source = indoc! {"
            def main():
                x = 1
                if x > 0:
                    print(x)
                else:
                    print(0)
        "};
        let instructions = listing(source);
        let generated = labels(&instructions)
            .into_iter()
            .filter(|label| label.starts_with('L'))
            .collect::<Vec<_>>();
        assert_eq!(generated, vec!["L0", "L1"]);

        let rendered = instructions
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        assert_eq!(
            rendered,
            vec![
                "_start:",
                "    call main",
                "    halt",
                "main:",
                "    push bp",
                "    mov bp, sp",
                "    mov r0, 1",
                "    store [x], r0",
                "    load r0, [x]",
                "    mov r1, 0",
                "    cmp r0, r1",
                "    setg r0",
                "    cmp r0, 0",
                "    je L0",
                "    load r0, [x]",
                "    print r0",
                "    jmp L1",
                "L0:",
                "    mov r0, 0",
                "    print r0",
                "L1:",
                "    mov rv, 0",
                "    mov sp, bp",
                "    pop bp",
                "    ret",
            ]
        );
    }

    #[test]
    fn lone_if_uses_one_label() {
        let instructions = listing("if 1:\n    print(1)\n");
        assert_eq!(labels(&instructions), vec!["_start", "L0"]);
        assert!(
            !instructions
                .iter()
                .any(|instruction| matches!(instruction, Instruction::Jmp(_)))
        );
    }

    #[test]
    fn labels_are_unique_across_nested_constructs() {
        let source = indoc! {"
            def L1():
                return 1
            i = 0
            while i < 3:
                for j in range(2):
                    if j == 0:
                        print(j)
                    elif j == 1:
                        while False:
                            print(L1())
                    else:
                        print(i)
                if i:
                    i += 1
                else:
                    i += 2
        "};
        let instructions = listing(source);
        let all = labels(&instructions);
        let unique = all.iter().collect::<HashSet<_>>();
        assert_eq!(all.len(), unique.len(), "duplicate labels in {all:?}");
        assert!(all.contains(&"L1"));
    }

    #[test]
    fn augmented_assignment_loads_computes_and_stores() {
        assert_eq!(
            lines("x *= 3\n")[1..4],
            ["    load r0, [x]", "    mov r1, 3", "    mul r0, r1"]
        );
        assert_eq!(lines("x *= 3\n")[4], "    store [x], r0");
    }

    #[test]
    fn for_loop_shape() {
        let rendered = lines("for i in range(3): print(i)");
        assert_eq!(
            rendered,
            vec![
                "_start:",
                "    mov r0, 0",
                "    mov r1, 3",
                "    mov r2, 1",
                "    range r0, r0, r1, r2",
                "    mov r1, 0",
                "L0:",
                "    len r2, r0",
                "    cmp r1, r2",
                "    jge L1",
                "    load r2, [r0 + r1*8]",
                "    store [i], r2",
                "    load r2, [i]",
                "    print r2",
                "    add r1, 1",
                "    jmp L0",
                "L1:",
                "    halt",
            ]
        );
    }

    #[test]
    fn calls_save_live_registers_and_read_frame_arguments() {
        let source = indoc! {"
            def add(a, b):
                return a + b
            x = 1 + add(2, 3)
        "};
        let rendered = lines(source);
        let start = rendered
            .iter()
            .position(|line| line == "    push r0")
            .expect("live register saved");
        assert_eq!(
            rendered[start..start + 9],
            [
                "    push r0",
                "    mov r1, 3",
                "    push r1",
                "    mov r1, 2",
                "    push r1",
                "    call add",
                "    add sp, 16",
                "    pop r0",
                "    mov r1, rv",
            ]
        );
        assert!(rendered.contains(&"    load r0, [bp+16]".to_string()));
        assert!(rendered.contains(&"    load r1, [bp+24]".to_string()));
    }

    #[test]
    fn list_literal_stores_each_element() {
        assert_eq!(
            lines("xs = [7, 'a']\n")[1..6],
            [
                "    newlist r0, 2",
                "    mov r1, 7",
                "    store [r0+0], r1",
                "    mov r1, \"a\"",
                "    store [r0+8], r1",
            ]
        );
    }

    #[test]
    fn refuses_programs_with_diagnostics() {
        let parsed = parser::parse("if x > : ");
        assert!(parsed.has_errors());
        assert_eq!(
            generate(&parsed),
            Err(CodegenError::SyntaxErrors { count: 1 })
        );

        let forged = ParseResult {
            program: Program::default(),
            diagnostics: vec![Diagnostic {
                message: "forged".to_string(),
                line: 1,
            }],
        };
        assert!(generate(&forged).is_err());
    }

    #[test]
    fn register_exhaustion_is_fatal() {
        let mut expr = String::from("9");
        for digit in (1..9).rev() {
            expr = format!("{digit} + ({expr})");
        }
        let parsed = parser::parse(&format!("x = {expr}\n"));
        assert_eq!(
            generate(&parsed),
            Err(CodegenError::RegistersExhausted { available: 8 })
        );

        let small = CodeGenerator::new(GeneratorConfig { registers: 2 });
        assert_eq!(
            small.generate(&parser::parse("x = 1 + (2 + 3)\n")),
            Err(CodegenError::RegistersExhausted { available: 2 })
        );

        let left_leaning = parser::parse("x = 1 + 2 + 3 + 4 + 5 + 6 + 7 + 8 + 9 + 10\n");
        assert!(
            CodeGenerator::new(GeneratorConfig { registers: 2 })
                .generate(&left_leaning)
                .is_ok()
        );
    }

    #[test]
    fn reports_bad_calls() {
        assert_eq!(
            generate(&parser::parse("missing(1)\n")),
            Err(CodegenError::UnknownFunction {
                name: "missing".to_string(),
            })
        );
        assert_eq!(
            generate(&parser::parse("def f(a):\n    return a\nf()\n")),
            Err(CodegenError::ArityMismatch {
                name: "f".to_string(),
                expected: 1,
                found: 0,
            })
        );
        assert_eq!(
            generate(&parser::parse("def f():\n    return 1\ndef f():\n    return 2\n")),
            Err(CodegenError::DuplicateFunction {
                name: "f".to_string(),
            })
        );
    }

    #[test]
    fn return_outside_function_is_a_hard_error() {
        let parsed = ParseResult {
            program: Program {
                functions: vec![],
                statements: vec![Statement::Return(None)],
            },
            diagnostics: vec![],
        };
        assert_eq!(
            generate(&parsed),
            Err(CodegenError::ReturnOutsideFunction)
        );
    }

    #[test]
    fn main_with_parameters_cannot_be_entered() {
        let parsed = ParseResult {
            program: Program {
                functions: vec![FunctionDef {
                    name: "main".to_string(),
                    params: vec!["argc".to_string()],
                    body: vec![Statement::Return(None)],
                }],
                statements: vec![],
            },
            diagnostics: vec![],
        };
        assert_eq!(
            generate(&parsed),
            Err(CodegenError::ArityMismatch {
                name: "main".to_string(),
                expected: 1,
                found: 0,
            })
        );
    }

    #[test]
    fn generation_is_deterministic() {
        let source = indoc! {"
            def main():
                total = 0
                for n in [1, 2, 3]:
                    if n % 2 == 0:
                        total += n
                print(total)
        "};
        let first = listing(source);
        let second = listing(source);
        assert_eq!(first, second);
    }
}
