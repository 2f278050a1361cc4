//! FILENAME: engine/src/formula.rs
//! PURPOSE: Compiles formula text into its executable form.
//! CONTEXT: `compile` runs the parser crate's tokenizer and Pratt parser
//! against the engine's function registry and packages the result. There is
//! no runtime code generation: the compiled unit is the AST itself, walked by
//! the evaluator against injected dependencies (cell lookup, range
//! materialization, the registry), so one compiled formula can run under any
//! evaluation context without recompiling.
//!
//! Whether a formula is asynchronous is decided here, once: a formula is
//! async iff any function it calls is declared async in the registry.

use parser::ast::Ast;
use parser::token::TokenType;

pub use parser::FormulaSyntaxError;

use crate::functions::FunctionRegistry;

/// The executable form of a formula cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFormula {
    pub ast: Ast,
    /// Set when a `?` debug marker follows the leading `=`; the evaluator
    /// then traces every intermediate computation step.
    pub debug: bool,
    /// Static property: true iff the formula calls at least one function the
    /// registry declares asynchronous.
    pub is_async: bool,
}

/// Compiles a formula string (including its leading `=`). Fails with a
/// `FormulaSyntaxError` if tokenizing or parsing cannot consume the entire
/// input.
pub fn compile(
    content: &str,
    registry: &FunctionRegistry,
) -> Result<CompiledFormula, FormulaSyntaxError> {
    let is_function = |name: &str| registry.contains(name);
    let tokens = parser::lexer::tokenize(content, &is_function)?;

    // The debug marker only counts directly after the formula marker.
    let debug = matches!(
        (tokens.first(), tokens.get(1)),
        (Some(first), Some(second))
            if first.token_type == TokenType::Formula
                && second.token_type == TokenType::Debugger
    );

    let ast = parser::Parser::new(&tokens).parse()?;

    let is_async = ast
        .called_functions()
        .iter()
        .any(|name| registry.is_async(name));

    Ok(CompiledFormula {
        ast,
        debug,
        is_async,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_sync_formula() {
        let registry = FunctionRegistry::standard();
        let compiled = compile("=SUM(A1,2)", &registry).unwrap();
        assert!(!compiled.is_async);
        assert!(!compiled.debug);
    }

    #[test]
    fn test_compile_detects_debug_marker() {
        let registry = FunctionRegistry::standard();
        assert!(compile("=?1+1", &registry).unwrap().debug);
        // A question mark anywhere else carries no grammar and no debug flag;
        // the parser filters it out like whitespace.
        assert!(!compile("=1+?1", &registry).unwrap().debug);
    }

    #[test]
    fn test_compile_detects_async_statically() {
        let registry = FunctionRegistry::standard();
        assert!(compile("=WAIT(10)", &registry).unwrap().is_async);
        assert!(compile("=SUM(WAIT(1),2)", &registry).unwrap().is_async);
        assert!(!compile("=SUM(1,2)", &registry).unwrap().is_async);
    }

    #[test]
    fn test_compile_rejects_syntax_errors() {
        let registry = FunctionRegistry::standard();
        assert!(compile("=1+", &registry).is_err());
        assert!(compile("=(1", &registry).is_err());
        assert!(compile("=SUM", &registry).is_err());
    }
}
