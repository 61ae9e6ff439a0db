//! Textual syntax for type and member references.
//!
//! Manifests and run-time lookups name types the way a disassembler prints
//! them: `Ns.List<int>`, open definitions `Ns.Map<,>`, parameters `!0` /
//! `!!0`, and suffixes `*`, `&`, `[]`, `[,]`. Members are written
//! `Owner::name`, optionally followed by `<Args>` and a `(Params)` filter.
//!
//! Parsing produces unresolved [`TypeExpr`] trees; name resolution against
//! a program happens in [`crate::program::manifest`].

use std::ops::Range;

use logos::Logos;
use thiserror::Error;

/// Logos-based token enum for lexing references.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
enum SyntaxToken {
    #[regex(r"[A-Za-z_][A-Za-z0-9_`+]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"!![0-9]+", |lex| lex.slice()[2..].parse::<u16>().ok())]
    MethodParam(u16),

    #[regex(r"![0-9]+", |lex| lex.slice()[1..].parse::<u16>().ok())]
    TypeParam(u16),

    #[token("::")]
    PathSep,

    #[token(".")]
    Dot,

    #[token("<")]
    Lt,

    #[token(">")]
    Gt,

    #[token(",")]
    Comma,

    #[token("*")]
    Star,

    #[token("&")]
    Amp,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,
}

impl SyntaxToken {
    fn describe(&self) -> String {
        match self {
            SyntaxToken::Ident(name) => format!("identifier '{}'", name),
            SyntaxToken::MethodParam(i) => format!("'!!{}'", i),
            SyntaxToken::TypeParam(i) => format!("'!{}'", i),
            SyntaxToken::PathSep => "'::'".to_string(),
            SyntaxToken::Dot => "'.'".to_string(),
            SyntaxToken::Lt => "'<'".to_string(),
            SyntaxToken::Gt => "'>'".to_string(),
            SyntaxToken::Comma => "','".to_string(),
            SyntaxToken::Star => "'*'".to_string(),
            SyntaxToken::Amp => "'&'".to_string(),
            SyntaxToken::LBracket => "'['".to_string(),
            SyntaxToken::RBracket => "']'".to_string(),
            SyntaxToken::LParen => "'('".to_string(),
            SyntaxToken::RParen => "')'".to_string(),
        }
    }
}

/// Syntax errors with byte offsets into the reference text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    /// Character that starts no token
    #[error("unexpected character at offset {offset}")]
    InvalidCharacter {
        /// Byte offset
        offset: usize,
    },

    /// Token that does not fit the grammar
    #[error("unexpected {found} at offset {offset}")]
    UnexpectedToken {
        /// Description of the token
        found: String,
        /// Byte offset
        offset: usize,
    },

    /// Input ended mid-reference
    #[error("unexpected end of input")]
    UnexpectedEnd,

    /// Array rank above 32
    #[error("array rank {rank} is too large")]
    RankTooLarge {
        /// Requested rank
        rank: usize,
    },
}

/// Unresolved type reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeExpr {
    /// Dotted name: a type, a primitive keyword or an in-scope parameter
    Named(String),
    /// `Name<A, B>`
    Generic {
        /// Definition name
        name: String,
        /// Type arguments
        args: Vec<TypeExpr>,
    },
    /// `Name<>` / `Name<,>`
    Open {
        /// Definition name
        name: String,
        /// Number of parameters implied by the commas
        arity: usize,
    },
    /// `!n`
    TypeParam(u16),
    /// `!!n`
    MethodParam(u16),
    /// `__Canon`
    Canon,
    /// `T*`
    Pointer(Box<TypeExpr>),
    /// `T&`
    ByRef(Box<TypeExpr>),
    /// `T[]`, `T[,]`, ...
    Array {
        /// Element type
        element: Box<TypeExpr>,
        /// Number of dimensions
        rank: u8,
    },
}

/// Unresolved member reference: `Owner::name<Inst>(Params)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberExpr {
    /// Declaring type
    pub owner: TypeExpr,
    /// Member name (`.ctor` and `.cctor` included)
    pub name: String,
    /// Generic method arguments, empty when not given
    pub inst: Vec<TypeExpr>,
    /// Parameter filter used to pick an overload
    pub params: Option<Vec<TypeExpr>>,
}

/// Parse a type reference
pub fn parse_type(source: &str) -> Result<TypeExpr, SyntaxError> {
    let mut parser = Parser::new(source)?;
    let ty = parser.parse_type()?;
    parser.expect_end()?;
    Ok(ty)
}

/// Parse a member reference
pub fn parse_member(source: &str) -> Result<MemberExpr, SyntaxError> {
    let mut parser = Parser::new(source)?;
    let member = parser.parse_member()?;
    parser.expect_end()?;
    Ok(member)
}

struct Parser {
    tokens: Vec<(SyntaxToken, Range<usize>)>,
    pos: usize,
}

impl Parser {
    fn new(source: &str) -> Result<Self, SyntaxError> {
        let mut tokens = Vec::new();
        let mut lexer = SyntaxToken::lexer(source);
        while let Some(token) = lexer.next() {
            match token {
                Ok(token) => tokens.push((token, lexer.span())),
                Err(()) => {
                    return Err(SyntaxError::InvalidCharacter {
                        offset: lexer.span().start,
                    })
                }
            }
        }
        Ok(Parser { tokens, pos: 0 })
    }

    fn peek(&self) -> Option<&SyntaxToken> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn peek_at(&self, ahead: usize) -> Option<&SyntaxToken> {
        self.tokens.get(self.pos + ahead).map(|(token, _)| token)
    }

    fn next(&mut self) -> Result<SyntaxToken, SyntaxError> {
        let token = self
            .tokens
            .get(self.pos)
            .map(|(token, _)| token.clone())
            .ok_or(SyntaxError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn unexpected(&self) -> SyntaxError {
        match self.tokens.get(self.pos) {
            Some((token, span)) => SyntaxError::UnexpectedToken {
                found: token.describe(),
                offset: span.start,
            },
            None => SyntaxError::UnexpectedEnd,
        }
    }

    fn eat(&mut self, expected: &SyntaxToken) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &SyntaxToken) -> Result<(), SyntaxError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn expect_end(&self) -> Result<(), SyntaxError> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn parse_member(&mut self) -> Result<MemberExpr, SyntaxError> {
        let owner = self.parse_type()?;
        self.expect(&SyntaxToken::PathSep)?;

        // `.ctor` / `.cctor`
        let dotted = self.eat(&SyntaxToken::Dot);
        let name = match self.next()? {
            SyntaxToken::Ident(name) if dotted => format!(".{}", name),
            SyntaxToken::Ident(name) => name,
            _ => {
                self.pos -= 1;
                return Err(self.unexpected());
            }
        };

        let inst = if self.eat(&SyntaxToken::Lt) {
            self.parse_list(&SyntaxToken::Gt)?
        } else {
            Vec::new()
        };

        let params = if self.eat(&SyntaxToken::LParen) {
            Some(self.parse_list(&SyntaxToken::RParen)?)
        } else {
            None
        };

        Ok(MemberExpr {
            owner,
            name,
            inst,
            params,
        })
    }

    /// Comma-separated types up to `close`; the opening token is consumed.
    fn parse_list(&mut self, close: &SyntaxToken) -> Result<Vec<TypeExpr>, SyntaxError> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_type()?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(&SyntaxToken::Comma)?;
        }
    }

    fn parse_type(&mut self) -> Result<TypeExpr, SyntaxError> {
        let mut ty = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(SyntaxToken::Star) => {
                    self.pos += 1;
                    ty = TypeExpr::Pointer(Box::new(ty));
                }
                Some(SyntaxToken::Amp) => {
                    self.pos += 1;
                    ty = TypeExpr::ByRef(Box::new(ty));
                }
                Some(SyntaxToken::LBracket) => {
                    self.pos += 1;
                    let mut rank = 1usize;
                    while self.eat(&SyntaxToken::Comma) {
                        rank += 1;
                    }
                    self.expect(&SyntaxToken::RBracket)?;
                    if rank > 32 {
                        return Err(SyntaxError::RankTooLarge { rank });
                    }
                    ty = TypeExpr::Array {
                        element: Box::new(ty),
                        rank: rank as u8,
                    };
                }
                _ => return Ok(ty),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<TypeExpr, SyntaxError> {
        match self.next()? {
            SyntaxToken::TypeParam(index) => Ok(TypeExpr::TypeParam(index)),
            SyntaxToken::MethodParam(index) => Ok(TypeExpr::MethodParam(index)),
            SyntaxToken::Ident(first) => {
                if first == "__Canon" {
                    return Ok(TypeExpr::Canon);
                }
                let mut name = first;
                while self.peek() == Some(&SyntaxToken::Dot)
                    && matches!(self.peek_at(1), Some(SyntaxToken::Ident(_)))
                {
                    self.pos += 1;
                    if let SyntaxToken::Ident(segment) = self.next()? {
                        name.push('.');
                        name.push_str(&segment);
                    }
                }

                if !self.eat(&SyntaxToken::Lt) {
                    return Ok(TypeExpr::Named(name));
                }

                // Open definition: `<>` or `<,,>`
                if matches!(self.peek(), Some(SyntaxToken::Gt | SyntaxToken::Comma)) {
                    let mut arity = 1;
                    while self.eat(&SyntaxToken::Comma) {
                        arity += 1;
                    }
                    self.expect(&SyntaxToken::Gt)?;
                    return Ok(TypeExpr::Open { name, arity });
                }

                let args = self.parse_list(&SyntaxToken::Gt)?;
                Ok(TypeExpr::Generic { name, args })
            }
            _ => {
                self.pos -= 1;
                Err(self.unexpected())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> TypeExpr {
        TypeExpr::Named(name.to_string())
    }

    #[test]
    fn test_parse_dotted_name() {
        assert_eq!(parse_type("App.Models.Order").unwrap(), named("App.Models.Order"));
        assert_eq!(parse_type("Outer+Inner").unwrap(), named("Outer+Inner"));
    }

    #[test]
    fn test_parse_generic_instance() {
        let ty = parse_type("Ns.Map<string, Ns.List<int>>").unwrap();
        assert_eq!(
            ty,
            TypeExpr::Generic {
                name: "Ns.Map".to_string(),
                args: vec![
                    named("string"),
                    TypeExpr::Generic {
                        name: "Ns.List".to_string(),
                        args: vec![named("int")],
                    },
                ],
            }
        );
    }

    #[test]
    fn test_parse_open_definitions() {
        assert_eq!(
            parse_type("G<>").unwrap(),
            TypeExpr::Open {
                name: "G".to_string(),
                arity: 1
            }
        );
        assert_eq!(
            parse_type("Ns.Map<,>").unwrap(),
            TypeExpr::Open {
                name: "Ns.Map".to_string(),
                arity: 2
            }
        );
    }

    #[test]
    fn test_parse_suffixes() {
        let ty = parse_type("int*[,]&").unwrap();
        assert_eq!(
            ty,
            TypeExpr::ByRef(Box::new(TypeExpr::Array {
                element: Box::new(TypeExpr::Pointer(Box::new(named("int")))),
                rank: 2,
            }))
        );
        assert_eq!(
            parse_type("T[]").unwrap(),
            TypeExpr::Array {
                element: Box::new(named("T")),
                rank: 1
            }
        );
    }

    #[test]
    fn test_parse_params_and_canon() {
        assert_eq!(parse_type("!0").unwrap(), TypeExpr::TypeParam(0));
        assert_eq!(parse_type("!!12").unwrap(), TypeExpr::MethodParam(12));
        assert_eq!(parse_type("__Canon").unwrap(), TypeExpr::Canon);
    }

    #[test]
    fn test_parse_member_with_inst_and_params() {
        let member = parse_member("Ns.G<!0>::Make<int>(!!0, string)").unwrap();
        assert_eq!(member.name, "Make");
        assert_eq!(member.inst, vec![named("int")]);
        assert_eq!(
            member.params,
            Some(vec![TypeExpr::MethodParam(0), named("string")])
        );
    }

    #[test]
    fn test_parse_constructor_names() {
        assert_eq!(parse_member("Foo::.ctor").unwrap().name, ".ctor");
        assert_eq!(parse_member("Foo::.cctor()").unwrap().params, Some(vec![]));
    }

    #[test]
    fn test_reject_trailing_garbage() {
        assert!(matches!(
            parse_type("int >"),
            Err(SyntaxError::UnexpectedToken { offset: 4, .. })
        ));
        assert_eq!(parse_type("List<int"), Err(SyntaxError::UnexpectedEnd));
        assert!(matches!(
            parse_type("a$b"),
            Err(SyntaxError::InvalidCharacter { offset: 1 })
        ));
    }

    #[test]
    fn test_member_requires_separator() {
        assert!(parse_member("Foo.Bar").is_err());
    }
}
