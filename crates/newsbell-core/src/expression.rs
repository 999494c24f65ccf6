//! Boolean keyword expressions.
//!
//! A subscriber registers an expression such as `삼성 AND 전자`,
//! `apple OR samsung`, or `(apple OR samsung) AND chip`. Primitive terms are
//! free text (a term may span several words) matched case-insensitively as
//! substrings. Terms are combined with the whole words `AND` / `OR`
//! (upper case), and parentheses group sub-expressions.
//!
//! # Validation
//!
//! `AND` and `OR` may not be mixed inside one group: `a AND b OR c` is
//! rejected with [`ExpressionError::MixedOperators`] instead of guessing a
//! precedence. Mixing across explicit groups (`(a OR b) AND c`) is fine.
//! Validation happens once, at registration time; the matching engine only
//! ever sees parsed [`Expression`]s.
//!
//! # Example
//!
//! ```rust
//! use newsbell_core::expression::Expression;
//!
//! let expr = Expression::parse("(Apple OR Samsung) AND chip").unwrap();
//! assert!(expr.matches("Samsung unveils new CHIP line"));
//! assert!(!expr.matches("Apple earnings beat estimates"));
//! assert_eq!(expr.primitive_terms(), vec!["Apple", "Samsung", "chip"]);
//! ```

use std::fmt;

use thiserror::Error;

/// Reasons an expression is rejected at registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    #[error("expression is empty")]
    Empty,
    #[error("AND and OR cannot be mixed without parentheses: {0}")]
    MixedOperators(String),
    #[error("unbalanced parentheses in: {0}")]
    UnbalancedParentheses(String),
    #[error("operator without a term on both sides in: {0}")]
    DanglingOperator(String),
    #[error("empty parentheses in: {0}")]
    EmptyGroup(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Op(Op),
    Word(String),
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Term(String),
    All(Vec<Node>),
    Any(Vec<Node>),
}

/// How the planner should fetch and recombine results for an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    /// A single primitive term.
    Single(String),
    /// Flat conjunction of two or more distinct terms.
    All(Vec<String>),
    /// Flat disjunction of two or more distinct terms.
    Any(Vec<String>),
    /// Grouped form mixing both operators, e.g. `(a OR b) AND c`.
    Nested,
}

/// A validated keyword expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    root: Node,
}

impl Expression {
    /// Parse and validate an expression.
    pub fn parse(text: &str) -> Result<Self, ExpressionError> {
        if text.trim().is_empty() {
            return Err(ExpressionError::Empty);
        }
        let tokens = tokenize(text);
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            source: text,
        };
        let root = parser.group(0)?;
        if parser.pos < tokens.len() {
            return Err(ExpressionError::UnbalancedParentheses(text.to_string()));
        }
        Ok(Self { root })
    }

    /// True when `text` satisfies the expression (case-insensitive containment).
    pub fn matches(&self, text: &str) -> bool {
        let haystack = text.to_lowercase();
        self.evaluate(&mut |term: &str| haystack.contains(&term.to_lowercase()))
    }

    /// Evaluate the expression with a caller-supplied predicate for terms.
    pub fn evaluate<F>(&self, term_matches: &mut F) -> bool
    where
        F: FnMut(&str) -> bool,
    {
        eval(&self.root, term_matches)
    }

    /// Distinct bare terms in first-appearance order.
    pub fn primitive_terms(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_terms(&self.root, &mut out);
        out
    }

    /// Classify the expression for the fetch planner.
    pub fn shape(&self) -> Shape {
        match &self.root {
            Node::Term(t) => Shape::Single(t.clone()),
            Node::All(children) | Node::Any(children)
                if children.iter().all(|c| matches!(c, Node::Term(_))) =>
            {
                let terms = self.primitive_terms();
                if terms.len() == 1 {
                    return Shape::Single(terms[0].clone());
                }
                match &self.root {
                    Node::All(_) => Shape::All(terms),
                    _ => Shape::Any(terms),
                }
            }
            _ => Shape::Nested,
        }
    }
}

/// Canonical text form: single spaces, upper-case operators, minimal parentheses.
impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_node(&self.root, f, false)
    }
}

/// Bare terms of `text` with operators and parentheses stripped.
///
/// Convenience for fetch planning over already-validated expression text.
pub fn extract_primitive_terms(text: &str) -> Result<Vec<String>, ExpressionError> {
    Ok(Expression::parse(text)?.primitive_terms())
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word = String::new();

    let flush = |word: &mut String, tokens: &mut Vec<Token>| {
        if word.is_empty() {
            return;
        }
        let tok = match word.as_str() {
            "AND" => Token::Op(Op::And),
            "OR" => Token::Op(Op::Or),
            _ => Token::Word(word.clone()),
        };
        tokens.push(tok);
        word.clear();
    };

    for ch in text.chars() {
        match ch {
            '(' => {
                flush(&mut word, &mut tokens);
                tokens.push(Token::Open);
            }
            ')' => {
                flush(&mut word, &mut tokens);
                tokens.push(Token::Close);
            }
            c if c.is_whitespace() => flush(&mut word, &mut tokens),
            c => word.push(c),
        }
    }
    flush(&mut word, &mut tokens);
    tokens
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    source: &'a str,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    /// Parse operands joined by one operator until `)` (depth > 0) or end.
    fn group(&mut self, depth: usize) -> Result<Node, ExpressionError> {
        let mut operands = vec![self.operand(depth)?];
        let mut op: Option<Op> = None;

        loop {
            match self.peek() {
                None => {
                    if depth > 0 {
                        return Err(self.unbalanced());
                    }
                    break;
                }
                Some(Token::Close) => {
                    if depth == 0 {
                        return Err(self.unbalanced());
                    }
                    self.pos += 1;
                    break;
                }
                Some(Token::Op(next)) => {
                    let next = *next;
                    if op.is_some_and(|current| current != next) {
                        return Err(ExpressionError::MixedOperators(self.source.to_string()));
                    }
                    op = Some(next);
                    self.pos += 1;
                    operands.push(self.operand(depth)?);
                }
                // Words directly after a closing group: `(a OR b) c`
                Some(Token::Word(_)) | Some(Token::Open) => {
                    return Err(ExpressionError::DanglingOperator(self.source.to_string()));
                }
            }
        }

        Ok(build(op, operands))
    }

    fn operand(&mut self, depth: usize) -> Result<Node, ExpressionError> {
        match self.peek() {
            Some(Token::Open) => {
                self.pos += 1;
                if matches!(self.peek(), Some(Token::Close)) {
                    return Err(ExpressionError::EmptyGroup(self.source.to_string()));
                }
                self.group(depth + 1)
            }
            Some(Token::Word(_)) => {
                let mut words = Vec::new();
                while let Some(Token::Word(w)) = self.peek() {
                    words.push(w.clone());
                    self.pos += 1;
                }
                Ok(Node::Term(words.join(" ")))
            }
            Some(Token::Close) if depth == 0 => Err(self.unbalanced()),
            _ => Err(ExpressionError::DanglingOperator(self.source.to_string())),
        }
    }

    fn unbalanced(&self) -> ExpressionError {
        ExpressionError::UnbalancedParentheses(self.source.to_string())
    }
}

/// Combine operands, flattening same-operator children.
fn build(op: Option<Op>, operands: Vec<Node>) -> Node {
    let Some(op) = op else {
        return operands
            .into_iter()
            .next()
            .unwrap_or(Node::All(Vec::new()));
    };
    let mut flat = Vec::with_capacity(operands.len());
    for node in operands {
        match (op, node) {
            (Op::And, Node::All(inner)) | (Op::Or, Node::Any(inner)) => flat.extend(inner),
            (_, other) => flat.push(other),
        }
    }
    match op {
        Op::And => Node::All(flat),
        Op::Or => Node::Any(flat),
    }
}

fn eval<F>(node: &Node, term_matches: &mut F) -> bool
where
    F: FnMut(&str) -> bool,
{
    match node {
        Node::Term(t) => term_matches(t),
        Node::All(children) => children.iter().all(|c| eval(c, term_matches)),
        Node::Any(children) => children.iter().any(|c| eval(c, term_matches)),
    }
}

fn collect_terms(node: &Node, out: &mut Vec<String>) {
    match node {
        Node::Term(t) => {
            if !out.contains(t) {
                out.push(t.clone());
            }
        }
        Node::All(children) | Node::Any(children) => {
            for c in children {
                collect_terms(c, out);
            }
        }
    }
}

fn write_node(node: &Node, f: &mut fmt::Formatter<'_>, nested: bool) -> fmt::Result {
    let (children, sep) = match node {
        Node::Term(t) => return write!(f, "{}", t),
        Node::All(children) => (children, " AND "),
        Node::Any(children) => (children, " OR "),
    };
    if nested {
        write!(f, "(")?;
    }
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", sep)?;
        }
        write_node(child, f, true)?;
    }
    if nested {
        write!(f, ")")?;
    }
    Ok(())
}
