//! Arithmetic formulas for calculated fields.
//!
//! Formulas are parsed once, when a calculated field is defined, and kept as
//! an [`Expr`] tree; evaluation never re-parses text.

mod ast;
mod parser;

pub use ast::{BinaryOp, Expr};
pub use parser::{parse, FormulaError};

#[cfg(test)]
mod tests {
    use super::*;
    use ntest::timeout;

    fn eval(source: &str, vars: &[(&str, f64)]) -> Option<f64> {
        let expr = parse(source).unwrap();
        expr.evaluate(&|name: &str| {
            vars.iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| *v)
        })
    }

    #[timeout(1000)]
    #[test]
    fn test_precedence_and_associativity() {
        assert_eq!(eval("2 + 3 * 4", &[]), Some(14.0));
        assert_eq!(eval("(2 + 3) * 4", &[]), Some(20.0));
        assert_eq!(eval("10 - 4 - 3", &[]), Some(3.0));
        assert_eq!(eval("8 / 4 / 2", &[]), Some(1.0));
        assert_eq!(eval("-3 * -2", &[]), Some(6.0));
        assert_eq!(eval("1.5 + .5", &[]), Some(2.0));
    }

    #[timeout(1000)]
    #[test]
    fn test_variables_resolve_through_lookup() {
        assert_eq!(eval("a * b", &[("a", 10.0), ("b", 250.0)]), Some(2500.0));
        assert_eq!(
            eval("num_bundles * unit_price", &[("num_bundles", 3.0), ("unit_price", 120.0)]),
            Some(360.0)
        );
    }

    #[timeout(1000)]
    #[test]
    fn test_division_by_zero_is_undefined_and_propagates() {
        assert_eq!(eval("a / b", &[("a", 1.0), ("b", 0.0)]), None);
        assert_eq!(eval("1 + a / b", &[("a", 1.0), ("b", 0.0)]), None);
        // undefined input propagates too
        assert_eq!(eval("a + 1", &[]), None);
    }

    #[timeout(1000)]
    #[test]
    fn test_variables_are_collected() {
        let expr = parse("(price - discount) * qty + price").unwrap();
        let names: Vec<&str> = expr.variables().into_iter().collect();
        assert_eq!(names, vec!["discount", "price", "qty"]);
    }

    #[timeout(1000)]
    #[test]
    fn test_parse_errors_report_position() {
        assert_eq!(parse("").unwrap_err().position, 0);
        assert_eq!(parse("a +").unwrap_err().position, 3);
        assert_eq!(parse("a b").unwrap_err().position, 2);
        assert_eq!(parse("3 $ 4").unwrap_err().position, 2);
        assert!(parse("(a + b").unwrap_err().message.contains("unclosed"));
        assert!(parse("a + )").is_err());
        assert!(parse("1..2").is_err());
    }

    #[timeout(1000)]
    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert!(parse(&deep).unwrap_err().message.contains("nested"));

        let ok = format!("{}1{}", "(".repeat(10), ")".repeat(10));
        assert_eq!(parse(&ok).unwrap(), Expr::Literal(1.0));
    }

    #[timeout(1000)]
    #[test]
    fn test_display_keeps_meaning() {
        for source in ["a - (b - c)", "(a + b) * c", "a / (b * c)", "-(a + b)"] {
            let expr = parse(source).unwrap();
            assert_eq!(parse(&expr.to_string()).unwrap(), expr);
        }
    }
}
