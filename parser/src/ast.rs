//! FILENAME: parser/src/ast.rs
//! PURPOSE: Defines the Abstract Syntax Tree (AST) for formula expressions.
//! CONTEXT: The parser converts the token stream into this tree; the engine
//! walks it to compute cell values. The tree is deliberately small: literals,
//! references kept as raw text (resolved by the evaluation context), binary
//! operations, and function calls. The range operator `:` stays an Operation
//! node whose operands are Variable references; the evaluator turns it into a
//! rectangle of values rather than an arithmetic result.

/// Represents a parsed formula expression.
#[derive(Debug, PartialEq, Clone)]
pub enum Ast {
    /// A numeric literal: `42`, `3.14`.
    Number(f64),

    /// A string literal with quotes stripped and escapes resolved.
    Str(String),

    /// A boolean literal: TRUE / FALSE (case-insensitive in source).
    Boolean(bool),

    /// A cell reference kept as written, e.g. `A1` or `AA100`. Resolution to
    /// coordinates happens at evaluation time so one tree can run against
    /// different sheets.
    Variable(String),

    /// A binary operation: `left op right`. Unary minus is lowered to
    /// `0 - operand` by the parser, so no separate unary node exists.
    Operation {
        op: BinaryOperator,
        left: Box<Ast>,
        right: Box<Ast>,
    },

    /// A function call like `SUM(A1:A10, 5)`.
    FunctionCall { name: String, args: Vec<Ast> },
}

/// Binary operators, including the range constructor.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BinaryOperator {
    Add,      // +
    Subtract, // -
    Multiply, // *
    Divide,   // /
    /// `:` builds a range reference, not an arithmetic value.
    Range,
}

impl std::fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinaryOperator::Add => write!(f, "+"),
            BinaryOperator::Subtract => write!(f, "-"),
            BinaryOperator::Multiply => write!(f, "*"),
            BinaryOperator::Divide => write!(f, "/"),
            BinaryOperator::Range => write!(f, ":"),
        }
    }
}

impl Ast {
    /// Walks the tree and reports every function name called, outermost
    /// first. Used by the engine to decide statically whether a formula is
    /// asynchronous.
    pub fn called_functions(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_functions(&mut names);
        names
    }

    fn collect_functions<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Ast::Operation { left, right, .. } => {
                left.collect_functions(names);
                right.collect_functions(names);
            }
            Ast::FunctionCall { name, args } => {
                names.push(name);
                for arg in args {
                    arg.collect_functions(names);
                }
            }
            _ => {}
        }
    }
}
