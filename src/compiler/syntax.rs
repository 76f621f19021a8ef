//! Syntax kinds for the template language.
//!
//! Every token the lexer can produce. Whitespace and comments are consumed by the lexer
//! and only surface as the `space_before` flag on the following token.

/// All token kinds in the template language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum SyntaxKind {
    // ============================================
    // Names and literals
    // ============================================
    /// Lowercase identifier, may end with `?` or `!`
    Ident = 0,
    /// Capitalized identifier
    Const,
    /// `@name`
    Ivar,
    /// `name:` in argument and hash position
    Label,
    /// `:name`
    Symbol,
    /// Integer literal
    Int,
    /// Float literal
    Float,
    /// `'...'`
    SString,
    /// `"..."`, may contain `#{...}`
    DString,

    // ============================================
    // Keywords
    // ============================================
    IfKw,
    ElsifKw,
    ElseKw,
    EndKw,
    UnlessKw,
    WhileKw,
    UntilKw,
    DoKw,
    ThenKw,
    AndKw,
    OrKw,
    NotKw,
    NilKw,
    TrueKw,
    FalseKw,

    // ============================================
    // Punctuation
    // ============================================
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `{`
    LBrace,
    /// `}`
    RBrace,
    /// `,`
    Comma,
    /// `.`
    Dot,
    /// `&.`
    AmpDot,
    /// `::`
    ColonColon,
    /// `:`
    Colon,
    /// `?`
    Question,
    /// `=>`
    FatArrow,
    /// `->`
    Arrow,
    /// `|`
    Pipe,
    /// `&`
    Amp,
    /// `*`
    Star,
    /// `**`
    DoubleStar,
    /// `=`
    Eq,
    /// `==`
    EqEq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// `!`
    Bang,
    /// `&&`
    AndAnd,
    /// `||`
    OrOr,
    /// `<<`
    Shl,
    /// `..`
    DotDot,
    /// `...`
    DotDotDot,
    /// `+=`
    PlusEq,
    /// `-=`
    MinusEq,
    /// `||=`
    OrOrEq,
    /// `;`
    Semicolon,
    /// Line break that terminates a statement
    Newline,

    /// Invalid input
    Error,
}

impl SyntaxKind {
    /// Returns the keyword kind for an identifier, if it is one.
    pub fn keyword(text: &str) -> Option<Self> {
        Some(match text {
            "if" => Self::IfKw,
            "elsif" => Self::ElsifKw,
            "else" => Self::ElseKw,
            "end" => Self::EndKw,
            "unless" => Self::UnlessKw,
            "while" => Self::WhileKw,
            "until" => Self::UntilKw,
            "do" => Self::DoKw,
            "then" => Self::ThenKw,
            "and" => Self::AndKw,
            "or" => Self::OrKw,
            "not" => Self::NotKw,
            "nil" => Self::NilKw,
            "true" => Self::TrueKw,
            "false" => Self::FalseKw,
            _ => return None,
        })
    }

    /// Returns true if this is a keyword.
    pub fn is_keyword(self) -> bool {
        (self as u16) >= (Self::IfKw as u16) && (self as u16) <= (Self::FalseKw as u16)
    }

    /// Returns true for tokens that end a statement.
    pub fn is_terminator(self) -> bool {
        matches!(self, Self::Newline | Self::Semicolon)
    }

    /// Tokens that unambiguously begin a command-call argument when preceded by a space.
    pub fn starts_argument(self) -> bool {
        matches!(
            self,
            Self::Ident
                | Self::Const
                | Self::Ivar
                | Self::Label
                | Self::Symbol
                | Self::Int
                | Self::Float
                | Self::SString
                | Self::DString
                | Self::NilKw
                | Self::TrueKw
                | Self::FalseKw
                | Self::NotKw
                | Self::Arrow
                | Self::Bang
                | Self::LBracket
                | Self::LParen
        )
    }

    /// Operators that become argument prefixes (`-1`, `*rest`, `**opts`, `&blk`) when
    /// written with a space before and none after.
    pub fn is_prefix_ambiguous(self) -> bool {
        matches!(
            self,
            Self::Minus | Self::Star | Self::DoubleStar | Self::Amp | Self::ColonColon
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_are_recognized() {
        assert_eq!(SyntaxKind::keyword("elsif"), Some(SyntaxKind::ElsifKw));
        assert_eq!(SyntaxKind::keyword("class"), None);
        assert!(SyntaxKind::EndKw.is_keyword());
        assert!(!SyntaxKind::Ident.is_keyword());
        assert!(!SyntaxKind::LParen.is_keyword());
    }

    #[test]
    fn test_argument_starters() {
        assert!(SyntaxKind::DString.starts_argument());
        assert!(SyntaxKind::Label.starts_argument());
        assert!(!SyntaxKind::Plus.starts_argument());
        assert!(!SyntaxKind::LBrace.starts_argument());
        assert!(SyntaxKind::Minus.is_prefix_ambiguous());
    }
}
