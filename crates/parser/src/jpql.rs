//! Annotated-query parser: the JPQL subset → [`LogicalQuery`].
//!
//! Hand-rolled lexer and recursive-descent parser. Accepted statements:
//!
//! ```text
//! SELECT [DISTINCT] <proj> FROM Entity alias [JOIN alias.path alias2]*
//!     [WHERE expr] [GROUP BY paths] [HAVING COUNT(*) cmp operand]
//!     [ORDER BY path [ASC|DESC], ...]
//! UPDATE Entity alias SET alias.path = operand, ... [WHERE expr]
//! DELETE FROM Entity alias [WHERE expr]
//! ```
//!
//! Predicates support `= != <> < <= > >= LIKE ILIKE NOT LIKE IN NOT IN
//! BETWEEN IS [NOT] NULL`, boolean `AND OR NOT` with parentheses, `:name`
//! and 1-based `?n` parameters, and string/number/boolean/null literals.
//! The boolean structure is normalized to an OR of AND groups with NOT
//! pushed into the operators.

use common::{EngineError, EngineResult};
use schema::{EntityDescriptor, OpCode};
use typecode::{Operator, Value};

use crate::logical::{Argument, Condition, Having, LogicalQuery, OrderKey};

// ---- lexer ---------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Ident(String),
    Num(String),
    Str(String),
    Named(String),
    Positional(usize),
    Comma,
    Dot,
    LParen,
    RParen,
    Star,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn lex(text: &str) -> EngineResult<Vec<Tok>> {
    let mut toks = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                toks.push(Tok::Ident(chars[start..i].iter().collect()));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                if i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                toks.push(Tok::Num(chars[start..i].iter().collect()));
            }
            '-' if i + 1 < chars.len() && chars[i + 1].is_ascii_digit() => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                if i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                toks.push(Tok::Num(chars[start..i].iter().collect()));
            }
            '\'' => {
                i += 1;
                let mut s = String::new();
                loop {
                    if i >= chars.len() {
                        return Err(EngineError::BadInput("unterminated string literal".into()));
                    }
                    if chars[i] == '\'' {
                        // '' escapes a quote inside the literal.
                        if i + 1 < chars.len() && chars[i + 1] == '\'' {
                            s.push('\'');
                            i += 2;
                            continue;
                        }
                        i += 1;
                        break;
                    }
                    s.push(chars[i]);
                    i += 1;
                }
                toks.push(Tok::Str(s));
            }
            ':' => {
                i += 1;
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                if start == i {
                    return Err(EngineError::BadInput("':' without a parameter name".into()));
                }
                toks.push(Tok::Named(chars[start..i].iter().collect()));
            }
            '?' => {
                i += 1;
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                if start == i {
                    return Err(EngineError::BadInput(
                        "'?' parameters must be numbered (?1, ?2, …)".into(),
                    ));
                }
                let n: usize = chars[start..i]
                    .iter()
                    .collect::<String>()
                    .parse()
                    .map_err(|_| EngineError::BadInput("bad positional parameter".into()))?;
                if n == 0 {
                    return Err(EngineError::BadInput("positional parameters are 1-based".into()));
                }
                toks.push(Tok::Positional(n));
            }
            ',' => {
                toks.push(Tok::Comma);
                i += 1;
            }
            '.' => {
                toks.push(Tok::Dot);
                i += 1;
            }
            '(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            '*' => {
                toks.push(Tok::Star);
                i += 1;
            }
            '=' => {
                toks.push(Tok::Eq);
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                toks.push(Tok::Ne);
                i += 2;
            }
            '<' => {
                if chars.get(i + 1) == Some(&'>') {
                    toks.push(Tok::Ne);
                    i += 2;
                } else if chars.get(i + 1) == Some(&'=') {
                    toks.push(Tok::Le);
                    i += 2;
                } else {
                    toks.push(Tok::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    toks.push(Tok::Ge);
                    i += 2;
                } else {
                    toks.push(Tok::Gt);
                    i += 1;
                }
            }
            other => {
                return Err(EngineError::BadInput(format!(
                    "unexpected character '{other}' in query"
                )))
            }
        }
    }
    Ok(toks)
}

// ---- boolean structure ---------------------------------------------------

enum Pred {
    Cond(Condition),
    And(Vec<Pred>),
    Or(Vec<Pred>),
    Not(Box<Pred>),
}

fn push_not(p: Pred, negate: bool) -> EngineResult<Pred> {
    Ok(match p {
        Pred::Cond(mut c) => {
            if negate {
                c.op = c.op.negated().ok_or_else(|| {
                    EngineError::BadInput(format!("cannot negate {:?}", c.op))
                })?;
            }
            Pred::Cond(c)
        }
        Pred::Not(inner) => push_not(*inner, !negate)?,
        Pred::And(children) => {
            let mapped = children
                .into_iter()
                .map(|c| push_not(c, negate))
                .collect::<EngineResult<Vec<_>>>()?;
            if negate {
                Pred::Or(mapped)
            } else {
                Pred::And(mapped)
            }
        }
        Pred::Or(children) => {
            let mapped = children
                .into_iter()
                .map(|c| push_not(c, negate))
                .collect::<EngineResult<Vec<_>>>()?;
            if negate {
                Pred::And(mapped)
            } else {
                Pred::Or(mapped)
            }
        }
    })
}

/// Flatten to the single-level OR-of-ANDs form.
fn to_groups(p: Pred) -> Vec<Vec<Condition>> {
    match p {
        Pred::Cond(c) => vec![vec![c]],
        Pred::Or(children) => children.into_iter().flat_map(to_groups).collect(),
        Pred::And(children) => {
            let mut acc: Vec<Vec<Condition>> = vec![Vec::new()];
            for child in children {
                let child_groups = to_groups(child);
                let mut next = Vec::with_capacity(acc.len() * child_groups.len());
                for left in &acc {
                    for right in &child_groups {
                        let mut merged = left.clone();
                        merged.extend(right.iter().cloned());
                        next.push(merged);
                    }
                }
                acc = next;
            }
            acc
        }
        Pred::Not(_) => unreachable!("NOT is pushed down before flattening"),
    }
}

// ---- parser --------------------------------------------------------------

/// Parse an annotated query against the owning entity's descriptor.
pub fn parse_query(text: &str, desc: &EntityDescriptor) -> EngineResult<LogicalQuery> {
    let toks = lex(text)?;
    let mut p = Parser {
        toks,
        pos: 0,
        desc,
        main_alias: String::new(),
        joins: Vec::new(),
    };
    let mut query = p.parse_statement()?;
    if p.pos != p.toks.len() {
        return Err(EngineError::BadInput(format!(
            "trailing tokens after query: {:?}",
            &p.toks[p.pos..]
        )));
    }
    query.annotated = true;
    Ok(query)
}

struct Parser<'a> {
    toks: Vec<Tok>,
    pos: usize,
    desc: &'a EntityDescriptor,
    main_alias: String,
    /// `JOIN u.field alias` bindings: (alias, relation field name).
    joins: Vec<(String, String)>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> EngineResult<Tok> {
        let tok = self
            .toks
            .get(self.pos)
            .cloned()
            .ok_or_else(|| EngineError::BadInput("unexpected end of query".into()))?;
        self.pos += 1;
        Ok(tok)
    }

    fn expect(&mut self, tok: &Tok) -> EngineResult<()> {
        let got = self.next()?;
        if &got == tok {
            Ok(())
        } else {
            Err(EngineError::BadInput(format!(
                "expected {tok:?}, found {got:?}"
            )))
        }
    }

    fn keyword(&self) -> Option<String> {
        match self.peek() {
            Some(Tok::Ident(s)) => Some(s.to_ascii_uppercase()),
            _ => None,
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.keyword().as_deref() == Some(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> EngineResult<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(EngineError::BadInput(format!(
                "expected {kw}, found {:?}",
                self.peek()
            )))
        }
    }

    fn ident(&mut self) -> EngineResult<String> {
        match self.next()? {
            Tok::Ident(s) => Ok(s),
            other => Err(EngineError::BadInput(format!(
                "expected identifier, found {other:?}"
            ))),
        }
    }

    fn parse_statement(&mut self) -> EngineResult<LogicalQuery> {
        match self.keyword().as_deref() {
            Some("SELECT") => self.parse_select(),
            Some("UPDATE") => self.parse_update(),
            Some("DELETE") => self.parse_delete(),
            _ => Err(EngineError::BadInput(format!(
                "expected SELECT, UPDATE or DELETE, found {:?}",
                self.peek()
            ))),
        }
    }

    fn parse_select(&mut self) -> EngineResult<LogicalQuery> {
        self.expect_keyword("SELECT")?;
        let distinct = self.eat_keyword("DISTINCT");

        let mut count = false;
        let mut raw_projection: Vec<Vec<String>> = Vec::new();
        if self.eat_keyword("COUNT") {
            count = true;
            self.expect(&Tok::LParen)?;
            match self.next()? {
                Tok::Star | Tok::Ident(_) => {}
                other => {
                    return Err(EngineError::BadInput(format!(
                        "expected COUNT(*) or COUNT(alias), found {other:?}"
                    )))
                }
            }
            self.expect(&Tok::RParen)?;
        } else {
            loop {
                raw_projection.push(self.raw_path()?);
                if self.peek() == Some(&Tok::Comma) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }

        self.expect_keyword("FROM")?;
        self.parse_from()?;
        self.parse_joins()?;

        let mut query = LogicalQuery::new(if count { OpCode::Count } else { OpCode::Find });
        query.distinct = distinct;
        if !count {
            // Resolve projection now that the aliases are known; a bare
            // main-alias projection means the whole entity.
            for raw in raw_projection {
                let path = self.resolve_path(raw)?;
                if !path.is_empty() {
                    query.projection.push(path);
                }
            }
        }

        if self.eat_keyword("WHERE") {
            let pred = self.parse_or()?;
            query.groups = to_groups(push_not(pred, false)?);
        }
        if self.eat_keyword("GROUP") {
            self.expect_keyword("BY")?;
            loop {
                let raw = self.raw_path()?;
                query.group_by.push(self.resolve_nonempty(raw)?);
                if self.peek() == Some(&Tok::Comma) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        if self.eat_keyword("HAVING") {
            query.having = Some(self.parse_having()?);
        }
        if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            loop {
                let raw = self.raw_path()?;
                let path = self.resolve_nonempty(raw)?;
                let descending = if self.eat_keyword("DESC") {
                    true
                } else {
                    self.eat_keyword("ASC");
                    false
                };
                query.order_by.push(OrderKey { path, descending });
                if self.peek() == Some(&Tok::Comma) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        Ok(query)
    }

    fn parse_update(&mut self) -> EngineResult<LogicalQuery> {
        self.expect_keyword("UPDATE")?;
        self.parse_from()?;
        self.expect_keyword("SET")?;
        let mut query = LogicalQuery::new(OpCode::UpdateQuery);
        loop {
            let raw = self.raw_path()?;
            let path = self.resolve_nonempty(raw)?;
            if path.len() > 1 {
                return Err(EngineError::BadInput(format!(
                    "nested assignment target '{}' is unsupported",
                    path.join(".")
                )));
            }
            self.expect(&Tok::Eq)?;
            let arg = self.operand()?;
            query.assignments.push((path, arg));
            if self.peek() == Some(&Tok::Comma) {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.eat_keyword("WHERE") {
            let pred = self.parse_or()?;
            query.groups = to_groups(push_not(pred, false)?);
        }
        Ok(query)
    }

    fn parse_delete(&mut self) -> EngineResult<LogicalQuery> {
        self.expect_keyword("DELETE")?;
        self.expect_keyword("FROM")?;
        self.parse_from()?;
        let mut query = LogicalQuery::new(OpCode::DeleteQuery);
        if self.eat_keyword("WHERE") {
            let pred = self.parse_or()?;
            query.groups = to_groups(push_not(pred, false)?);
        }
        Ok(query)
    }

    /// `Entity alias`, validated against the owning descriptor.
    fn parse_from(&mut self) -> EngineResult<()> {
        let entity = self.ident()?;
        if entity != self.desc.name {
            return Err(EngineError::BadInput(format!(
                "query targets entity '{entity}' but the repository stores '{}'",
                self.desc.name
            )));
        }
        self.main_alias = self.ident()?;
        Ok(())
    }

    /// Zero or more `JOIN alias.field alias2`.
    fn parse_joins(&mut self) -> EngineResult<()> {
        while self.eat_keyword("JOIN") {
            let base = self.ident()?;
            if base != self.main_alias {
                return Err(EngineError::BadInput(format!(
                    "JOIN must start from '{}', found '{base}'",
                    self.main_alias
                )));
            }
            self.expect(&Tok::Dot)?;
            let field = self.ident()?;
            let alias = self.ident()?;
            self.joins.push((alias, field));
        }
        Ok(())
    }

    /// Raw dotted identifier sequence, unresolved.
    fn raw_path(&mut self) -> EngineResult<Vec<String>> {
        let mut segments = vec![self.ident()?];
        while self.peek() == Some(&Tok::Dot) {
            self.pos += 1;
            segments.push(self.ident()?);
        }
        Ok(segments)
    }

    /// Strip the leading alias and prepend join prefixes. The result is a
    /// field path on the main entity (possibly empty: the alias itself).
    fn resolve_path(&self, mut segments: Vec<String>) -> EngineResult<Vec<String>> {
        let head = segments.first().cloned().unwrap_or_default();
        if head == self.main_alias {
            segments.remove(0);
        } else if let Some((_, field)) = self.joins.iter().find(|(alias, _)| *alias == head) {
            segments[0] = field.clone();
        }
        // Otherwise treat the whole path as fields of the main entity.
        if segments.len() > 2 {
            return Err(EngineError::BadInput(format!(
                "path '{}' nests deeper than one join level",
                segments.join(".")
            )));
        }
        Ok(segments)
    }

    fn resolve_nonempty(&self, raw: Vec<String>) -> EngineResult<Vec<String>> {
        let display = raw.join(".");
        let path = self.resolve_path(raw)?;
        if path.is_empty() {
            return Err(EngineError::BadInput(format!(
                "expected a property path, found bare alias '{display}'"
            )));
        }
        Ok(path)
    }

    // Boolean grammar: or := and (OR and)*; and := unary (AND unary)*;
    // unary := NOT unary | '(' or ')' | predicate.
    fn parse_or(&mut self) -> EngineResult<Pred> {
        let mut children = vec![self.parse_and()?];
        while self.eat_keyword("OR") {
            children.push(self.parse_and()?);
        }
        Ok(if children.len() == 1 {
            children.pop().expect("single child")
        } else {
            Pred::Or(children)
        })
    }

    fn parse_and(&mut self) -> EngineResult<Pred> {
        let mut children = vec![self.parse_unary()?];
        while self.eat_keyword("AND") {
            children.push(self.parse_unary()?);
        }
        Ok(if children.len() == 1 {
            children.pop().expect("single child")
        } else {
            Pred::And(children)
        })
    }

    fn parse_unary(&mut self) -> EngineResult<Pred> {
        if self.eat_keyword("NOT") {
            return Ok(Pred::Not(Box::new(self.parse_unary()?)));
        }
        if self.peek() == Some(&Tok::LParen) {
            self.pos += 1;
            let inner = self.parse_or()?;
            self.expect(&Tok::RParen)?;
            return Ok(inner);
        }
        self.parse_predicate().map(Pred::Cond)
    }

    fn parse_predicate(&mut self) -> EngineResult<Condition> {
        let raw = self.raw_path()?;
        let path = self.resolve_nonempty(raw)?;

        // IS [NOT] NULL
        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            self.expect_keyword("NULL")?;
            return Ok(Condition {
                path,
                op: if negated {
                    Operator::IsNotNull
                } else {
                    Operator::IsNull
                },
                ignore_case: false,
                args: Vec::new(),
            });
        }

        // NOT LIKE / NOT IN
        if self.eat_keyword("NOT") {
            if self.eat_keyword("LIKE") {
                let arg = self.operand()?;
                return Ok(Condition {
                    path,
                    op: Operator::NotLike,
                    ignore_case: false,
                    args: vec![arg],
                });
            }
            if self.eat_keyword("IN") {
                let args = self.in_list()?;
                return Ok(Condition {
                    path,
                    op: Operator::NotIn,
                    ignore_case: false,
                    args,
                });
            }
            return Err(EngineError::BadInput(
                "expected LIKE or IN after NOT".into(),
            ));
        }

        if self.eat_keyword("LIKE") {
            let arg = self.operand()?;
            return Ok(Condition {
                path,
                op: Operator::Like,
                ignore_case: false,
                args: vec![arg],
            });
        }
        if self.eat_keyword("ILIKE") {
            let arg = self.operand()?;
            return Ok(Condition {
                path,
                op: Operator::Like,
                ignore_case: true,
                args: vec![arg],
            });
        }
        if self.eat_keyword("IN") {
            let args = self.in_list()?;
            return Ok(Condition {
                path,
                op: Operator::In,
                ignore_case: false,
                args,
            });
        }
        if self.eat_keyword("BETWEEN") {
            let lo = self.operand()?;
            self.expect_keyword("AND")?;
            let hi = self.operand()?;
            return Ok(Condition {
                path,
                op: Operator::Between,
                ignore_case: false,
                args: vec![lo, hi],
            });
        }

        let op = match self.next()? {
            Tok::Eq => Operator::Eq,
            Tok::Ne => Operator::Ne,
            Tok::Lt => Operator::Lt,
            Tok::Le => Operator::Le,
            Tok::Gt => Operator::Gt,
            Tok::Ge => Operator::Ge,
            other => {
                return Err(EngineError::BadInput(format!(
                    "expected a comparison operator, found {other:?}"
                )))
            }
        };
        let arg = self.operand()?;
        Ok(Condition {
            path,
            op,
            ignore_case: false,
            args: vec![arg],
        })
    }

    fn in_list(&mut self) -> EngineResult<Vec<Argument>> {
        // `IN :names` binds a whole collection parameter without parens.
        match self.peek() {
            Some(Tok::Named(_)) | Some(Tok::Positional(_)) => {
                return Ok(vec![self.operand()?]);
            }
            _ => {}
        }
        self.expect(&Tok::LParen)?;
        let mut args = Vec::new();
        loop {
            args.push(self.operand()?);
            match self.next()? {
                Tok::Comma => continue,
                Tok::RParen => break,
                other => {
                    return Err(EngineError::BadInput(format!(
                        "expected ',' or ')' in IN list, found {other:?}"
                    )))
                }
            }
        }
        Ok(args)
    }

    fn operand(&mut self) -> EngineResult<Argument> {
        match self.next()? {
            Tok::Named(name) => Ok(Argument::Named(name)),
            Tok::Positional(n) => Ok(Argument::Param(n - 1)),
            Tok::Str(s) => Ok(Argument::Literal(Value::str(s))),
            Tok::Num(n) => {
                if n.contains('.') {
                    let v: f64 = n
                        .parse()
                        .map_err(|_| EngineError::BadInput(format!("bad numeric literal '{n}'")))?;
                    Ok(Argument::Literal(Value::F64(v)))
                } else {
                    let v: i64 = n
                        .parse()
                        .map_err(|_| EngineError::BadInput(format!("bad numeric literal '{n}'")))?;
                    Ok(Argument::Literal(Value::I64(v)))
                }
            }
            Tok::Ident(word) => match word.to_ascii_uppercase().as_str() {
                "TRUE" => Ok(Argument::Literal(Value::Bool(true))),
                "FALSE" => Ok(Argument::Literal(Value::Bool(false))),
                "NULL" => Ok(Argument::Literal(Value::Null)),
                _ => Err(EngineError::BadInput(format!(
                    "expected a literal or parameter, found '{word}'"
                ))),
            },
            other => Err(EngineError::BadInput(format!(
                "expected a literal or parameter, found {other:?}"
            ))),
        }
    }

    fn parse_having(&mut self) -> EngineResult<Having> {
        self.expect_keyword("COUNT")?;
        self.expect(&Tok::LParen)?;
        match self.next()? {
            Tok::Star | Tok::Ident(_) => {}
            other => {
                return Err(EngineError::BadInput(format!(
                    "HAVING supports COUNT(*) only, found {other:?}"
                )))
            }
        }
        self.expect(&Tok::RParen)?;
        let op = match self.next()? {
            Tok::Eq => Operator::Eq,
            Tok::Ne => Operator::Ne,
            Tok::Lt => Operator::Lt,
            Tok::Le => Operator::Le,
            Tok::Gt => Operator::Gt,
            Tok::Ge => Operator::Ge,
            other => {
                return Err(EngineError::BadInput(format!(
                    "expected a comparison in HAVING, found {other:?}"
                )))
            }
        };
        let arg = self.operand()?;
        Ok(Having { op, arg })
    }
}
