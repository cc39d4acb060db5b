//! Syntax tree shared by the parser and the code generator.
//!
//! The parser builds these nodes once; the generator only reads them.

use std::fmt::{self, Write};

#[derive(Debug, PartialEq, Clone)]
pub enum Expression {
    Number(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Identifier(String),
    List(Vec<Expression>),
    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    Call {
        name: String,
        args: Vec<Expression>,
    },
    /// `range(stop)`, `range(start, stop)` or `range(start, stop, step)`.
    Range { args: Vec<Expression> },
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    NotEq,
    Less,
    Greater,
    LessEq,
    GreaterEq,
}

impl BinaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Pow => "**",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Less => "<",
            Self::Greater => ">",
            Self::LessEq => "<=",
            Self::GreaterEq => ">=",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::NotEq | Self::Less | Self::Greater | Self::LessEq | Self::GreaterEq
        )
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum Statement {
    Print {
        args: Vec<Expression>,
    },
    Assign {
        target: String,
        value: Expression,
    },
    AugmentedAssign {
        target: String,
        op: BinaryOperator,
        value: Expression,
    },
    If {
        condition: Expression,
        then_block: Vec<Statement>,
        elif_clauses: Vec<(Expression, Vec<Statement>)>,
        else_block: Option<Vec<Statement>>,
    },
    While {
        condition: Expression,
        body: Vec<Statement>,
    },
    For {
        var: String,
        iterable: Expression,
        body: Vec<Statement>,
    },
    Return(Option<Expression>),
    /// A call evaluated for its side effects.
    Expression(Expression),
}

#[derive(Debug, PartialEq, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Statement>,
}

#[derive(Debug, PartialEq, Clone, Default)]
pub struct Program {
    pub functions: Vec<FunctionDef>,
    pub statements: Vec<Statement>,
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Number(value) => write!(f, "{value}"),
            Expression::Float(value) => write!(f, "{value:?}"),
            Expression::String(value) => write!(f, "{value:?}"),
            Expression::Bool(true) => f.write_str("True"),
            Expression::Bool(false) => f.write_str("False"),
            Expression::Identifier(name) => f.write_str(name),
            Expression::List(elements) => {
                f.write_char('[')?;
                write_comma_separated(f, elements)?;
                f.write_char(']')
            }
            Expression::BinaryOp { left, op, right } => write!(f, "({left} {op} {right})"),
            Expression::Call { name, args } => {
                write!(f, "{name}(")?;
                write_comma_separated(f, args)?;
                f.write_char(')')
            }
            Expression::Range { args } => {
                f.write_str("range(")?;
                write_comma_separated(f, args)?;
                f.write_char(')')
            }
        }
    }
}

fn write_comma_separated(f: &mut fmt::Formatter<'_>, items: &[Expression]) -> fmt::Result {
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

/// Indented tree rendering, one node per line.
impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for function in &self.functions {
            writeln!(f, "Function: {}", function.name)?;
            if function.params.is_empty() {
                writeln!(f, "  Parameters:")?;
            } else {
                writeln!(f, "  Parameters: {}", function.params.join(", "))?;
            }
            writeln!(f, "  Body:")?;
            write_block(f, &function.body, 2)?;
        }
        write_block(f, &self.statements, 0)
    }
}

fn write_block(f: &mut fmt::Formatter<'_>, statements: &[Statement], depth: usize) -> fmt::Result {
    for statement in statements {
        write_statement(f, statement, depth)?;
    }
    Ok(())
}

fn write_statement(f: &mut fmt::Formatter<'_>, statement: &Statement, depth: usize) -> fmt::Result {
    let pad = "  ".repeat(depth);
    match statement {
        Statement::Print { args } => {
            writeln!(f, "{pad}Print:")?;
            for arg in args {
                writeln!(f, "{pad}  {arg}")?;
            }
        }
        Statement::Assign { target, value } => {
            writeln!(f, "{pad}Assign: {target} = {value}")?;
        }
        Statement::AugmentedAssign { target, op, value } => {
            writeln!(f, "{pad}AugmentedAssign: {target} {op}= {value}")?;
        }
        Statement::If {
            condition,
            then_block,
            elif_clauses,
            else_block,
        } => {
            writeln!(f, "{pad}If: {condition}")?;
            write_block(f, then_block, depth + 1)?;
            for (condition, block) in elif_clauses {
                writeln!(f, "{pad}Elif: {condition}")?;
                write_block(f, block, depth + 1)?;
            }
            if let Some(block) = else_block {
                writeln!(f, "{pad}Else:")?;
                write_block(f, block, depth + 1)?;
            }
        }
        Statement::While { condition, body } => {
            writeln!(f, "{pad}While: {condition}")?;
            write_block(f, body, depth + 1)?;
        }
        Statement::For {
            var,
            iterable,
            body,
        } => {
            writeln!(f, "{pad}For: {var} in {iterable}")?;
            write_block(f, body, depth + 1)?;
        }
        Statement::Return(Some(value)) => writeln!(f, "{pad}Return: {value}")?,
        Statement::Return(None) => writeln!(f, "{pad}Return")?,
        Statement::Expression(expr) => writeln!(f, "{pad}Expression: {expr}")?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn renders_indented_tree() {
        let program = Program {
            functions: vec![FunctionDef {
                name: "main".to_string(),
                params: vec![],
                body: vec![Statement::If {
                    condition: Expression::BinaryOp {
                        left: Box::new(Expression::Identifier("x".to_string())),
                        op: BinaryOperator::Greater,
                        right: Box::new(Expression::Number(0)),
                    },
                    then_block: vec![Statement::Print {
                        args: vec![Expression::String("pos".to_string())],
                    }],
                    elif_clauses: vec![(
                        Expression::Bool(false),
                        vec![Statement::Return(None)],
                    )],
                    else_block: Some(vec![Statement::AugmentedAssign {
                        target: "x".to_string(),
                        op: BinaryOperator::Add,
                        value: Expression::Float(1.5),
                    }]),
                }],
            }],
            statements: vec![Statement::For {
                var: "i".to_string(),
                iterable: Expression::Range {
                    args: vec![Expression::Number(3)],
                },
                body: vec![Statement::Expression(Expression::Call {
                    name: "main".to_string(),
                    args: vec![Expression::List(vec![
                        Expression::Number(1),
                        Expression::Identifier("i".to_string()),
                    ])],
                })],
            }],
        };

        let expected = indoc! {r#"
            Function: main
              Parameters:
              Body:
                If: (x > 0)
                  Print:
                    "pos"
                Elif: False
                  Return
                Else:
                  AugmentedAssign: x += 1.5
            For: i in range(3)
              Expression: main([1, i])
        "#};
        assert_eq!(program.to_string(), expected);
    }
}
