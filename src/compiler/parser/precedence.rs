//! Operator precedence and binding power for the Pratt parser.
//!
//! Levels follow Ruby's operator table for the subset the template language
//! supports. `and`, `or`, `not` and statement modifiers sit below every level here
//! and are handled at statement level.

use crate::compiler::ast::BinOp;
use crate::compiler::syntax::SyntaxKind;

/// Binding power for operators in Pratt parser style.
///
/// Using (left, right) pairs enables both left and right associativity:
/// - Left-associative: `left < right` (e.g., `a + b + c` = `(a + b) + c`)
/// - Right-associative: `left > right` (e.g., `a = b = c` = `a = (b = c)`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingPower {
    /// Left binding power - compared against previous operator's right bp.
    pub left: u8,
    /// Right binding power - compared against next operator's left bp.
    pub right: u8,
}

impl BindingPower {
    /// Creates a left-associative binding power.
    #[inline]
    pub const fn left(power: u8) -> Self {
        Self {
            left: power,
            right: power + 1,
        }
    }

    /// Creates a right-associative binding power.
    #[inline]
    pub const fn right(power: u8) -> Self {
        Self {
            left: power + 1,
            right: power,
        }
    }

    /// Creates a non-associative binding power.
    #[inline]
    pub const fn none(power: u8) -> Self {
        Self {
            left: power,
            right: power,
        }
    }
}

/// Precedence levels. Higher numbers bind tighter.
pub mod prec {
    use super::BindingPower;

    /// `=`, `+=`, `-=`, `||=` - right associative
    pub const ASSIGN: BindingPower = BindingPower::right(4);

    /// `c ? a : b` - right associative
    pub const CONDITIONAL: BindingPower = BindingPower::right(6);

    /// `a..b`, `a...b` - do not chain
    pub const RANGE: BindingPower = BindingPower::none(8);

    /// `||`
    pub const LOGICAL_OR: BindingPower = BindingPower::left(10);

    /// `&&`
    pub const LOGICAL_AND: BindingPower = BindingPower::left(12);

    /// `==`, `!=`
    pub const EQUALITY: BindingPower = BindingPower::left(14);

    /// `<`, `<=`, `>`, `>=`
    pub const RELATIONAL: BindingPower = BindingPower::left(16);

    /// `<<`
    pub const SHIFT: BindingPower = BindingPower::left(18);

    /// `+`, `-`
    pub const ADDITIVE: BindingPower = BindingPower::left(20);

    /// `*`, `/`, `%`
    pub const MULTIPLICATIVE: BindingPower = BindingPower::left(22);

    /// `!x`, `-x`
    pub const PREFIX: u8 = 24;
}

/// Infix operator classes recognized by the expression loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Infix {
    Binary(BinOp),
    And,
    Or,
    Range { exclusive: bool },
    Conditional,
    Assign,
    OpAssign(BinOp),
}

/// Gets the infix operator and binding power for a token.
pub fn infix_binding_power(kind: SyntaxKind) -> Option<(Infix, BindingPower)> {
    use SyntaxKind as K;
    Some(match kind {
        K::Eq => (Infix::Assign, prec::ASSIGN),
        K::PlusEq => (Infix::OpAssign(BinOp::Add), prec::ASSIGN),
        K::MinusEq => (Infix::OpAssign(BinOp::Sub), prec::ASSIGN),
        K::OrOrEq => (Infix::OpAssign(BinOp::OrAssign), prec::ASSIGN),
        K::Question => (Infix::Conditional, prec::CONDITIONAL),
        K::DotDot => (Infix::Range { exclusive: false }, prec::RANGE),
        K::DotDotDot => (Infix::Range { exclusive: true }, prec::RANGE),
        K::OrOr => (Infix::Or, prec::LOGICAL_OR),
        K::AndAnd => (Infix::And, prec::LOGICAL_AND),
        K::EqEq => (Infix::Binary(BinOp::Eq), prec::EQUALITY),
        K::NotEq => (Infix::Binary(BinOp::NotEq), prec::EQUALITY),
        K::Lt => (Infix::Binary(BinOp::Lt), prec::RELATIONAL),
        K::Le => (Infix::Binary(BinOp::Le), prec::RELATIONAL),
        K::Gt => (Infix::Binary(BinOp::Gt), prec::RELATIONAL),
        K::Ge => (Infix::Binary(BinOp::Ge), prec::RELATIONAL),
        K::Shl => (Infix::Binary(BinOp::Shl), prec::SHIFT),
        K::Plus => (Infix::Binary(BinOp::Add), prec::ADDITIVE),
        K::Minus => (Infix::Binary(BinOp::Sub), prec::ADDITIVE),
        K::Star => (Infix::Binary(BinOp::Mul), prec::MULTIPLICATIVE),
        K::Slash => (Infix::Binary(BinOp::Div), prec::MULTIPLICATIVE),
        K::Percent => (Infix::Binary(BinOp::Rem), prec::MULTIPLICATIVE),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_power_left_associative() {
        let bp = BindingPower::left(10);
        assert_eq!(bp.left, 10);
        assert_eq!(bp.right, 11);
    }

    #[test]
    fn test_binding_power_right_associative() {
        let bp = BindingPower::right(10);
        assert_eq!(bp.left, 11);
        assert_eq!(bp.right, 10);
    }

    #[test]
    fn test_precedence_ordering() {
        assert!(prec::ASSIGN.right < prec::CONDITIONAL.right);
        assert!(prec::CONDITIONAL.left < prec::RANGE.left);
        assert!(prec::LOGICAL_OR.left < prec::LOGICAL_AND.left);
        assert!(prec::EQUALITY.left < prec::RELATIONAL.left);
        assert!(prec::SHIFT.left < prec::ADDITIVE.left);
        assert!(prec::ADDITIVE.left < prec::MULTIPLICATIVE.left);
        assert!(prec::MULTIPLICATIVE.right < prec::PREFIX);
    }

    #[test]
    fn test_infix_lookup() {
        assert_eq!(
            infix_binding_power(SyntaxKind::Plus),
            Some((Infix::Binary(BinOp::Add), prec::ADDITIVE))
        );
        assert_eq!(
            infix_binding_power(SyntaxKind::OrOrEq).map(|(op, _)| op),
            Some(Infix::OpAssign(BinOp::OrAssign))
        );
        assert_eq!(infix_binding_power(SyntaxKind::Comma), None);
    }
}
