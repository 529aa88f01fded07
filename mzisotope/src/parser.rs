//! A recursive descent parser for molecular formulas such as `C6H12O6`, `(H2O)3`
//! or `C5[13C]H12`.
//!
//! The grammar is
//!
//! ```text
//! group := item*
//! item  := (ELEMENT | '(' group ')') [NUMBER]
//! ```
//!
//! where an ELEMENT is either an upper case letter followed by any number of lower case
//! letters, or an arbitrary name enclosed in square brackets.
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::Display;

use tracing::trace;

use crate::formula::{ElementCount, ElementIndex, Formula};
use crate::table::ElementLookup;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    LeftParen,
    RightParen,
    /// The digits of a count, possibly with a leading `-`
    Number(String),
    Element(String),
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Start,
    Alpha,
    Literal,
    Number,
}

/// Splits a formula into [`Token`]s, tracking byte offsets into the input
#[derive(Debug, Clone)]
pub struct Tokenizer<'a> {
    input: &'a str,
    position: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn error(&self, kind: SyntaxErrorKind, offset: usize) -> FormulaSyntaxError {
        FormulaSyntaxError::new(kind, self.input, offset)
    }

    /// Read the next token, returning it with the byte offset it starts at
    pub fn next_token(&mut self) -> Result<(Token, usize), FormulaSyntaxError> {
        while let Some(c) = self.peek().filter(|c| c.is_whitespace()) {
            self.position += c.len_utf8();
        }
        let start = self.position;
        let mut state = ScanState::Start;
        let mut value = String::new();

        loop {
            let c = self.peek();
            match state {
                ScanState::Start => match c {
                    None => return Ok((Token::End, start)),
                    Some(c) if c.is_ascii_digit() || c == '-' => {
                        value.push(c);
                        state = ScanState::Number;
                    }
                    Some(c) if c.is_uppercase() => {
                        value.push(c);
                        state = ScanState::Alpha;
                    }
                    Some('[') => {
                        state = ScanState::Literal;
                    }
                    Some('(') => {
                        self.position += 1;
                        return Ok((Token::LeftParen, start));
                    }
                    Some(')') => {
                        self.position += 1;
                        return Ok((Token::RightParen, start));
                    }
                    Some(c) => {
                        return Err(self.error(SyntaxErrorKind::IllegalCharacter(c), start))
                    }
                },
                ScanState::Alpha => match c {
                    Some(c) if c.is_lowercase() => value.push(c),
                    _ => return Ok((Token::Element(value), start)),
                },
                ScanState::Literal => match c {
                    None | Some('%') => {
                        return Err(self.error(SyntaxErrorKind::UnterminatedLiteral, start))
                    }
                    Some(']') => {
                        self.position += 1;
                        return Ok((Token::Element(value), start));
                    }
                    Some(c) => value.push(c),
                },
                ScanState::Number => match c {
                    Some(c) if c.is_ascii_digit() => value.push(c),
                    _ => return Ok((Token::Number(value), start)),
                },
            }
            if let Some(c) = c {
                self.position += c.len_utf8();
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxErrorKind {
    UnknownElement(String),
    ExpectedRightParenthesis,
    TrailingInput,
    IllegalCharacter(char),
    UnterminatedLiteral,
    MalformedCount(String),
    CountOverflow,
}

impl Display for SyntaxErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownElement(symbol) => write!(f, "'{symbol}' is not an element"),
            Self::ExpectedRightParenthesis => f.write_str("Expected right parenthesis"),
            Self::TrailingInput => f.write_str("End of input expected"),
            Self::IllegalCharacter('%') => f.write_str("Illegal character: '%'"),
            Self::IllegalCharacter(_) => f.write_str("Parse error"),
            Self::UnterminatedLiteral => f.write_str("Missing closing bracket"),
            Self::MalformedCount(text) => write!(f, "Malformed count '{text}'"),
            Self::CountOverflow => f.write_str("Element count overflow"),
        }
    }
}

/// A formula that could not be parsed, rendered with a caret under the offending
/// column of the input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaSyntaxError {
    pub kind: SyntaxErrorKind,
    pub input: String,
    /// The character column where the error was found
    pub column: usize,
}

impl FormulaSyntaxError {
    pub fn new(kind: SyntaxErrorKind, input: &str, byte_offset: usize) -> Self {
        let column = input
            .get(..byte_offset)
            .map(|s| s.chars().count())
            .unwrap_or_else(|| input.chars().count());
        Self {
            kind,
            input: input.to_string(),
            column,
        }
    }

    pub fn message(&self) -> String {
        self.kind.to_string()
    }
}

impl Display for FormulaSyntaxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:\n{}\n{:>width$}",
            self.kind,
            self.input,
            "^",
            width = self.column + 1
        )
    }
}

impl Error for FormulaSyntaxError {}

/// A node of the parse tree. Counted items are wrapped in a [`FormulaNode::Group`]
/// carrying the multiplier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormulaNode {
    Element(ElementIndex),
    Group {
        count: ElementCount,
        children: Vec<FormulaNode>,
    },
}

impl FormulaNode {
    fn with_count(self, count: ElementCount) -> Self {
        match self {
            Self::Group { children, .. } => Self::Group { count, children },
            node => Self::Group {
                count,
                children: vec![node],
            },
        }
    }

    fn accumulate(
        &self,
        weight: ElementCount,
        acc: &mut BTreeMap<ElementIndex, ElementCount>,
    ) -> Option<()> {
        match self {
            Self::Element(element) => {
                let total = acc.entry(*element).or_default();
                *total = total.checked_add(weight)?;
            }
            Self::Group { count, children } => {
                let weight = count.checked_mul(weight)?;
                for child in children {
                    child.accumulate(weight, acc)?;
                }
            }
        }
        Some(())
    }

    /// Multiply counts down the tree and sum them per element. Returns `None`
    /// if any product or sum overflows.
    pub fn flatten(&self) -> Option<Formula> {
        let mut acc = BTreeMap::new();
        self.accumulate(1, &mut acc)?;
        Some(acc.into())
    }
}

struct ParseState<'a> {
    tokenizer: Tokenizer<'a>,
    token: Token,
    start: usize,
}

impl<'a> ParseState<'a> {
    fn new(input: &'a str) -> Result<Self, FormulaSyntaxError> {
        let mut tokenizer = Tokenizer::new(input);
        let (token, start) = tokenizer.next_token()?;
        Ok(Self {
            tokenizer,
            token,
            start,
        })
    }

    fn advance(&mut self) -> Result<(), FormulaSyntaxError> {
        let (token, start) = self.tokenizer.next_token()?;
        self.token = token;
        self.start = start;
        Ok(())
    }

    fn error(&self, kind: SyntaxErrorKind) -> FormulaSyntaxError {
        self.tokenizer.error(kind, self.start)
    }
}

/// Parses formula text, resolving element symbols through an [`ElementLookup`]
#[derive(Debug, Clone, Copy)]
pub struct FormulaParser<'a, L: ElementLookup + ?Sized> {
    elements: &'a L,
}

impl<'a, L: ElementLookup + ?Sized> FormulaParser<'a, L> {
    pub fn new(elements: &'a L) -> Self {
        Self { elements }
    }

    /// Parse `text` into its parse tree without flattening it
    pub fn parse_tree(&self, text: &str) -> Result<FormulaNode, FormulaSyntaxError> {
        let mut state = ParseState::new(text)?;
        let tree = self.parse_group(&mut state)?;
        if state.token != Token::End {
            return Err(state.error(SyntaxErrorKind::TrailingInput));
        }
        Ok(tree)
    }

    /// Parse `text` into a [`Formula`]
    pub fn parse(&self, text: &str) -> Result<Formula, FormulaSyntaxError> {
        let tree = self.parse_tree(text)?;
        let formula = tree
            .flatten()
            .ok_or_else(|| FormulaSyntaxError::new(SyntaxErrorKind::CountOverflow, text, text.len()))?;
        trace!("Parsed {text:?} into {} elements", formula.len());
        Ok(formula)
    }

    /// Check that `text` is syntactically valid and only names known elements
    pub fn validate(&self, text: &str) -> Result<(), FormulaSyntaxError> {
        self.parse_tree(text).map(|_| ())
    }

    fn parse_group(&self, state: &mut ParseState<'_>) -> Result<FormulaNode, FormulaSyntaxError> {
        let mut children = Vec::new();
        loop {
            let item = match &state.token {
                Token::LeftParen => {
                    state.advance()?;
                    let inner = self.parse_group(state)?;
                    if state.token != Token::RightParen {
                        return Err(state.error(SyntaxErrorKind::ExpectedRightParenthesis));
                    }
                    inner
                }
                Token::Element(symbol) => match self.elements.element_index(symbol) {
                    Some(element) => FormulaNode::Element(element),
                    None => {
                        return Err(
                            state.error(SyntaxErrorKind::UnknownElement(symbol.to_string()))
                        )
                    }
                },
                _ => break,
            };
            state.advance()?;

            let item = if let Token::Number(digits) = &state.token {
                let count: ElementCount = digits.parse().map_err(|_| {
                    state.error(SyntaxErrorKind::MalformedCount(digits.to_string()))
                })?;
                state.advance()?;
                item.with_count(count)
            } else {
                item
            };
            children.push(item);
        }
        Ok(FormulaNode::Group { count: 1, children })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::table::IsotopeTable;
    use std::collections::HashMap;

    fn symbols() -> HashMap<String, ElementIndex> {
        [("H", 0), ("C", 1), ("N", 2), ("O", 3), ("Cl", 4), ("13C", 5)]
            .into_iter()
            .map(|(s, i)| (s.to_string(), i))
            .collect()
    }

    fn tokens(text: &str) -> Result<Vec<(Token, usize)>, FormulaSyntaxError> {
        let mut tokenizer = Tokenizer::new(text);
        let mut acc = Vec::new();
        loop {
            let (tok, start) = tokenizer.next_token()?;
            if tok == Token::End {
                break;
            }
            acc.push((tok, start));
        }
        Ok(acc)
    }

    #[test]
    fn test_tokenizer() -> Result<(), FormulaSyntaxError> {
        let toks = tokens("Cl2 ([13C]H-1)")?;
        assert_eq!(
            toks,
            vec![
                (Token::Element("Cl".into()), 0),
                (Token::Number("2".into()), 2),
                (Token::LeftParen, 4),
                (Token::Element("13C".into()), 5),
                (Token::Element("H".into()), 10),
                (Token::Number("-1".into()), 11),
                (Token::RightParen, 13),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_tokenizer_whitespace_offsets() -> Result<(), FormulaSyntaxError> {
        let mut tokenizer = Tokenizer::new("  H\t2 ");
        assert_eq!(tokenizer.next_token()?, (Token::Element("H".into()), 2));
        assert_eq!(tokenizer.next_token()?, (Token::Number("2".into()), 4));
        assert_eq!(tokenizer.next_token()?, (Token::End, 6));
        assert_eq!(tokenizer.next_token()?, (Token::End, 6));
        Ok(())
    }

    #[test]
    fn test_tokenizer_errors() {
        let err = tokens("H2 %").unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::IllegalCharacter('%'));
        assert_eq!(err.column, 3);
        assert_eq!(err.message(), "Illegal character: '%'");

        let err = tokens("H2*").unwrap_err();
        assert_eq!(err.message(), "Parse error");
        assert_eq!(err.column, 2);

        let err = tokens("C[13C").unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::UnterminatedLiteral);
        assert_eq!(err.column, 1);

        let err = tokens("[13%C]").unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::UnterminatedLiteral);
    }

    #[test]
    fn test_parse_simple() -> Result<(), FormulaSyntaxError> {
        let table = symbols();
        let parser = FormulaParser::new(&table);
        let water = parser.parse("H2O")?;
        assert_eq!(water, vec![(0, 2), (3, 1)].into());

        let repeated = parser.parse("(H2O)3")?;
        assert_eq!(repeated, vec![(0, 6), (3, 3)].into());

        let labeled = parser.parse("C5[13C]H12")?;
        assert_eq!(labeled.get(1), 5);
        assert_eq!(labeled.get(5), 1);

        let nested = parser.parse("((CH2)2 O)2 H")?;
        assert_eq!(nested, vec![(0, 9), (1, 4), (3, 2)].into());
        Ok(())
    }

    #[test]
    fn test_parse_empty() -> Result<(), FormulaSyntaxError> {
        let table = symbols();
        let parser = FormulaParser::new(&table);
        assert!(parser.parse("")?.is_empty());
        assert!(parser.parse("   ")?.is_empty());
        assert!(parser.parse("()")?.is_empty());
        assert!(parser.parse("H2H-2")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_parse_tree_shape() -> Result<(), FormulaSyntaxError> {
        let table = symbols();
        let parser = FormulaParser::new(&table);
        let tree = parser.parse_tree("H2O")?;
        assert_eq!(
            tree,
            FormulaNode::Group {
                count: 1,
                children: vec![
                    FormulaNode::Group {
                        count: 2,
                        children: vec![FormulaNode::Element(0)]
                    },
                    FormulaNode::Element(3),
                ]
            }
        );
        Ok(())
    }

    #[test]
    fn test_parse_negative() -> Result<(), FormulaSyntaxError> {
        let table = symbols();
        let parser = FormulaParser::new(&table);
        let f = parser.parse("C2H-1")?;
        assert_eq!(f.get(0), -1);
        assert!(!f.is_real());
        Ok(())
    }

    #[test]
    fn test_parse_errors() {
        let table = symbols();
        let parser = FormulaParser::new(&table);

        let err = parser.parse("Xx2").unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::UnknownElement("Xx".into()));
        assert_eq!(err.column, 0);
        assert_eq!(err.to_string(), "'Xx' is not an element:\nXx2\n^");

        let err = parser.parse("(H2O").unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::ExpectedRightParenthesis);
        assert_eq!(err.column, 4);
        assert_eq!(err.to_string(), "Expected right parenthesis:\n(H2O\n    ^");

        let err = parser.parse("H2O)").unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::TrailingInput);
        assert_eq!(err.column, 3);

        let err = parser.parse("2H").unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::TrailingInput);

        let err = parser.parse("C  Q").unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::UnknownElement("Q".into()));
        assert_eq!(err.column, 3);

        let err = parser.parse("H-").unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::MalformedCount("-".into()));

        let err = parser.parse("H99999999999999999999").unwrap_err();
        assert!(matches!(err.kind, SyntaxErrorKind::MalformedCount(_)));

        let err = parser
            .parse("((H4294967296)4294967296)4294967296")
            .unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::CountOverflow);
    }

    #[test]
    fn test_validate_with_table() {
        let table = IsotopeTable::bundled();
        let parser = FormulaParser::new(table);
        assert!(parser.validate("C6H12O6").is_ok());
        assert!(parser.validate("CH3[13C]OOH").is_ok());
        assert!(parser.validate("Zz").is_err());
    }
}
