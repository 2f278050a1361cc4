//! FILENAME: engine/src/offset.rs
//! PURPOSE: Rewrites cell references in formula text by a column/row offset.
//! CONTEXT: Works on the token stream, not the AST: every Variable token of
//! the letters-then-digits shape is translated and spliced back, all other
//! tokens (operators, spaces, the markers) pass through verbatim, so the
//! rewritten formula keeps the author's spacing. A translated reference that
//! leaves the grid (negative column or row) is replaced with the literal
//! `#REF`, which fails to compile and surfaces as `#BAD_EXPR` if the result
//! is ever stored.

use parser::token::TokenType;

use crate::coord::{index_to_col, split_reference};

/// Rewrites every cell reference of `text` by (`delta_col`, `delta_row`).
/// `is_function` is the registry predicate used for tokenizing. Text that
/// does not tokenize is returned unchanged; there is nothing to rewrite in a
/// formula the compiler will reject anyway.
pub fn apply_offset(
    text: &str,
    delta_col: i64,
    delta_row: i64,
    is_function: &dyn Fn(&str) -> bool,
) -> String {
    let Ok(tokens) = parser::lexer::tokenize(text, is_function) else {
        return text.to_string();
    };

    tokens
        .iter()
        .map(|token| {
            if token.token_type == TokenType::Variable {
                offset_reference(&token.value, delta_col, delta_row)
            } else {
                token.value.clone()
            }
        })
        .collect()
}

fn offset_reference(reference: &str, delta_col: i64, delta_row: i64) -> String {
    let Some((letters, row)) = split_reference(reference) else {
        // Not an A1-shaped reference; leave it for the compiler to reject.
        return reference.to_string();
    };
    let col = crate::coord::col_to_index(letters) as i64 + delta_col;
    let row = (row as i64 - 1) + delta_row;
    if col < 0 || row < 0 {
        return "#REF".to_string();
    }
    format!("{}{}", index_to_col(col as u32), row + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_functions(_: &str) -> bool {
        false
    }

    fn shift(text: &str, dc: i64, dr: i64) -> String {
        apply_offset(text, dc, dr, &no_functions)
    }

    #[test]
    fn test_offsets_simple_reference() {
        assert_eq!(shift("=A1", 1, 1), "=B2");
        assert_eq!(shift("=B2", -1, -1), "=A1");
    }

    #[test]
    fn test_negative_row_becomes_ref() {
        assert_eq!(shift("=B2", 0, -4), "=#REF");
    }

    #[test]
    fn test_negative_col_becomes_ref() {
        assert_eq!(shift("=A5", -1, 0), "=#REF");
    }

    #[test]
    fn test_offsets_every_reference_in_expression() {
        assert_eq!(shift("=A1+B2*C3", 1, 0), "=B1+C2*D3");
    }

    #[test]
    fn test_offsets_range_bounds_independently() {
        assert_eq!(shift("=A1:B3", 2, 1), "=C2:D4");
    }

    #[test]
    fn test_preserves_spacing_and_literals() {
        assert_eq!(shift("= A1 + 2", 0, 1), "= A2 + 2");
        assert_eq!(shift("=\"A1\"", 5, 5), "=\"A1\"");
    }

    #[test]
    fn test_function_names_are_not_rewritten() {
        let is_function = |name: &str| name.eq_ignore_ascii_case("SUM");
        assert_eq!(
            apply_offset("=SUM(A1,B1)", 1, 1, &is_function),
            "=SUM(B2,C2)"
        );
    }

    #[test]
    fn test_untokenizable_text_passes_through() {
        assert_eq!(shift("=A1 @ B2", 1, 1), "=A1 @ B2");
    }

    #[test]
    fn test_crossing_column_letter_boundary() {
        assert_eq!(shift("=Z1", 1, 0), "=AA1");
        assert_eq!(shift("=AA1", -1, 0), "=Z1");
    }
}
