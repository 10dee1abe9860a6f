use crate::{
    ast::{BinaryOp, Branch, CompareOp, Expr, Macro, MacroParam, Node, OpaqueExpr, Statement},
    error::{ParseError, ParseErrorKind},
    value::Value,
};

type ParseResult<T> = Result<T, ParseError>;

#[inline]
const fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

#[inline]
const fn is_ident_continue(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

#[derive(Clone, Copy)]
struct Parser<'a> {
    input: &'a str,
    pos: usize,
    /// Current line number (1-indexed)
    line: usize,
    /// The starting location of the current line
    line_start_pos: usize,
    /// Set by `-}}`, `-%}` and `-#}`: strip leading whitespace of the next text.
    trim_next: bool,
}

impl<'a> Parser<'a> {
    const fn new(input: &'a str) -> Self {
        Parser {
            input,
            pos: 0,
            line: 1,
            line_start_pos: 0,
            trim_next: false,
        }
    }

    #[inline]
    const fn current_column(&self) -> usize {
        self.pos - self.line_start_pos + 1
    }

    #[inline]
    fn make_error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError {
            line: self.line,
            column: self.current_column(),
            kind,
        }
    }

    #[inline]
    fn current_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    /// Advances past `ch`, which must be the current character, tracking newlines.
    #[inline]
    fn advance_char(&mut self, ch: char) {
        if ch == '\n' {
            self.line += 1;
            self.line_start_pos = self.pos + 1;
        }
        self.pos += ch.len_utf8();
    }

    /// Advances the parser position by `len` bytes.
    /// Only used for fixed delimiters, which never contain newlines.
    #[inline]
    const fn advance_bytes_no_newline(&mut self, len: usize) {
        self.pos += len;
    }

    const fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Peek if the remaining input starts with `s`
    fn peek(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }

    /// Peek for `keyword` as a whole word.
    fn peek_keyword(&self, keyword: &str) -> bool {
        self.peek(keyword)
            && !self.input[self.pos + keyword.len()..].starts_with(is_ident_continue)
    }

    /// Consume `s` if the remaining input starts with it.
    /// Assumes `s` does not contain newlines.
    fn consume(&mut self, s: &str) -> bool {
        if self.peek(s) {
            self.advance_bytes_no_newline(s.len());
            true
        } else {
            false
        }
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        self.consume_whitespace();
        if self.peek_keyword(keyword) {
            self.advance_bytes_no_newline(keyword.len());
            true
        } else {
            false
        }
    }

    fn consume_whitespace(&mut self) {
        while let Some(ch) = self.current_char() {
            if !ch.is_whitespace() {
                break;
            }
            self.advance_char(ch);
        }
    }

    fn snippet(&self, len: usize) -> &'a str {
        let end = std::cmp::min(self.pos + len, self.input.len());
        let end = (end..=self.input.len())
            .find(|&i| self.input.is_char_boundary(i))
            .unwrap_or(self.input.len());
        &self.input[self.pos..end]
    }

    /// Expect `s` to be the start of the remaining input, consume it or return Err.
    /// Assumes `s` does not contain newlines.
    fn expect(&mut self, s: &str) -> ParseResult<()> {
        if self.consume(s) {
            Ok(())
        } else if self.eof() {
            Err(self.make_error(ParseErrorKind::unexpected_eof(Some(s.to_string()))))
        } else {
            Err(self.make_error(ParseErrorKind::Expected {
                description: format!("'{}', found '{}'", s, self.snippet(s.len() + 10)),
            }))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> ParseResult<()> {
        if self.consume_keyword(keyword) {
            Ok(())
        } else {
            Err(self.make_error(ParseErrorKind::Expected {
                description: format!("'{}', found '{}'", keyword, self.snippet(keyword.len() + 10)),
            }))
        }
    }

    /// Consume and return an identifier (`[A-Za-z_][A-Za-z0-9_]*`).
    fn consume_identifier(&mut self) -> ParseResult<&'a str> {
        self.consume_whitespace();
        let start = self.pos;
        match self.current_char() {
            Some(ch) if is_ident_start(ch) => self.advance_char(ch),
            Some(ch) => {
                return Err(self.make_error(ParseErrorKind::InvalidIdentifier {
                    at_char: ch.to_string(),
                }));
            }
            None => {
                return Err(self.make_error(ParseErrorKind::unexpected_eof(Some(
                    "identifier".to_string(),
                ))));
            }
        }
        while let Some(ch) = self.current_char() {
            if !is_ident_continue(ch) {
                break;
            }
            self.advance_char(ch);
        }
        Ok(&self.input[start..self.pos])
    }

    fn peek_open_delimiter(&self) -> bool {
        self.peek("{{") || self.peek("{%") || self.peek("{#")
    }

    /// Parses literal text up to the next delimiter, applying whitespace control.
    fn parse_text(&mut self) -> String {
        let start = self.pos;
        while let Some(ch) = self.current_char() {
            if self.peek_open_delimiter() {
                break;
            }
            self.advance_char(ch);
        }

        let mut text = &self.input[start..self.pos];
        if std::mem::take(&mut self.trim_next) {
            text = text.trim_start();
        }
        if self.peek("{{-") || self.peek("{%-") || self.peek("{#-") {
            text = text.trim_end();
        }
        text.to_owned()
    }

    /// Consumes a closing delimiter such as `}}`, honoring a leading `-`.
    fn expect_close(&mut self, close: &str) -> ParseResult<()> {
        self.consume_whitespace();
        if self.peek("-") && self.input[self.pos + 1..].starts_with(close) {
            self.advance_bytes_no_newline(1 + close.len());
            self.trim_next = true;
            return Ok(());
        }
        self.expect(close)
    }

    fn skip_comment(&mut self) -> ParseResult<()> {
        self.expect("{#")?;
        while !self.eof() {
            if self.peek("-#}") {
                self.advance_bytes_no_newline(3);
                self.trim_next = true;
                return Ok(());
            }
            if self.consume("#}") {
                return Ok(());
            }
            if let Some(ch) = self.current_char() {
                self.advance_char(ch);
            }
        }
        Err(self.make_error(ParseErrorKind::unexpected_eof(Some("#}".to_string()))))
    }

    /// Keyword of the `{% ... %}` tag at the current position, without consuming it.
    fn peek_tag_keyword(&self) -> Option<&'a str> {
        if !self.peek("{%") {
            return None;
        }
        let mut probe = *self;
        probe.advance_bytes_no_newline(2);
        probe.consume("-");
        probe.consume_identifier().ok()
    }

    fn consume_tag_open(&mut self) -> ParseResult<&'a str> {
        self.expect("{%")?;
        self.consume("-");
        self.consume_identifier()
    }

    /// Consumes `{% keyword %}`, the closing half of a block.
    fn expect_end_tag(&mut self, keyword: &str) -> ParseResult<()> {
        self.expect("{%")?;
        self.consume("-");
        self.expect_keyword(keyword)?;
        self.expect_close("%}")
    }

    /// Parse nodes until a `{% tag %}` whose keyword is in `end_tags`.
    ///
    /// The terminating tag is left unconsumed and its keyword returned. With no
    /// end tags, parses to EOF.
    fn parse_nodes_until(&mut self, end_tags: &[&str]) -> ParseResult<(Vec<Node>, Option<&'a str>)> {
        let mut nodes = Vec::new();
        loop {
            let text = self.parse_text();
            if !text.is_empty() {
                nodes.push(Node::Text(text));
            }

            if self.eof() {
                return match end_tags.last() {
                    Some(closing) => Err(self.make_error(ParseErrorKind::unexpected_eof(Some(
                        format!("{{% {closing} %}}"),
                    )))),
                    None => Ok((nodes, None)),
                };
            }

            if let Some(keyword) = self.peek_tag_keyword() {
                if end_tags.contains(&keyword) {
                    return Ok((nodes, Some(keyword)));
                }
            }

            if let Some(node) = self.parse_markup()? {
                nodes.push(node);
            }
        }
    }

    fn parse_markup(&mut self) -> ParseResult<Option<Node>> {
        if self.peek("{#") {
            self.skip_comment()?;
            Ok(None)
        } else if self.peek("{{") {
            self.parse_output().map(Some)
        } else {
            self.parse_tag()
        }
    }

    fn parse_output(&mut self) -> ParseResult<Node> {
        self.expect("{{")?;
        self.consume("-");
        let expr = self.parse_expression()?;
        self.expect_close("}}")?;
        Ok(Node::Output(expr))
    }

    // --- Tags ---

    fn parse_tag(&mut self) -> ParseResult<Option<Node>> {
        let keyword_pos = *self;
        let keyword = self.consume_tag_open()?;
        match keyword {
            "if" => self.parse_if_statement().map(Some),
            "for" => self.parse_for_loop().map(Some),
            "include" => self.parse_include().map(Some),
            "set" => self.parse_set().map(Some),
            "block" => self.parse_block().map(Some),
            "extends" => {
                let parent = self.parse_expression()?;
                self.expect_close("%}")?;
                Ok(Some(Node::Other(Statement::Extends(parent))))
            }
            "raw" => self.parse_raw().map(Some),
            "macro" => self.parse_macro().map(Some),
            "call" => self.parse_call().map(Some),
            "filter" => self.parse_filter_block().map(Some),
            "import" => self.parse_import().map(Some),
            "from" => self.parse_from_import().map(Some),
            _ => Err(keyword_pos.make_error(ParseErrorKind::UnknownKeyword {
                keyword: keyword.to_string(),
            })),
        }
    }

    fn parse_if_statement(&mut self) -> ParseResult<Node> {
        let mut condition = self.parse_expression()?;
        self.expect_close("%}")?;

        let mut branches = Vec::new();
        let mut otherwise = None;
        loop {
            let (body, end) = self.parse_nodes_until(&["elif", "elseif", "else", "endif"])?;
            branches.push(Branch { condition, body });

            match end {
                Some("elif" | "elseif") => {
                    self.consume_tag_open()?;
                    condition = self.parse_expression()?;
                    self.expect_close("%}")?;
                }
                Some("else") => {
                    self.consume_tag_open()?;
                    self.expect_close("%}")?;
                    let (else_body, _) = self.parse_nodes_until(&["endif"])?;
                    self.expect_end_tag("endif")?;
                    otherwise = Some(else_body);
                    break;
                }
                _ => {
                    self.expect_end_tag("endif")?;
                    break;
                }
            }
        }

        Ok(Node::If {
            branches,
            otherwise,
        })
    }

    fn parse_for_loop(&mut self) -> ParseResult<Node> {
        let mut targets = vec![self.consume_identifier()?.to_string()];
        loop {
            self.consume_whitespace();
            if !self.consume(",") {
                break;
            }
            targets.push(self.consume_identifier()?.to_string());
        }
        self.expect_keyword("in")?;
        let iter = self.parse_or_expression()?;
        self.expect_close("%}")?;

        let (body, end) = self.parse_nodes_until(&["else", "endfor"])?;
        let otherwise = if end == Some("else") {
            self.consume_tag_open()?;
            self.expect_close("%}")?;
            let (else_body, _) = self.parse_nodes_until(&["endfor"])?;
            Some(else_body)
        } else {
            None
        };
        self.expect_end_tag("endfor")?;

        Ok(Node::Other(Statement::For {
            targets,
            iter,
            body,
            otherwise,
        }))
    }

    fn parse_include(&mut self) -> ParseResult<Node> {
        let name = self.parse_expression()?;

        let ignore_missing = if self.consume_keyword("ignore") {
            self.expect_keyword("missing")?;
            true
        } else {
            false
        };

        let with_context = self.parse_context_modifier()?;
        self.expect_close("%}")?;
        Ok(Node::Include {
            name,
            ignore_missing,
            with_context,
        })
    }

    /// Optional `with context` / `without context`; context is passed by default.
    fn parse_context_modifier(&mut self) -> ParseResult<bool> {
        if self.consume_keyword("without") {
            self.expect_keyword("context")?;
            return Ok(false);
        }
        if self.consume_keyword("with") {
            self.expect_keyword("context")?;
        }
        Ok(true)
    }

    /// `(name, name=default, ...)` after `macro name` or `call`.
    fn parse_macro_params(&mut self) -> ParseResult<Vec<MacroParam>> {
        self.expect("(")?;
        let mut params = Vec::new();
        loop {
            self.consume_whitespace();
            if self.consume(")") {
                return Ok(params);
            }

            let name = self.consume_identifier()?.to_string();
            self.consume_whitespace();
            let default = if self.peek("=") && !self.peek("==") {
                self.advance_bytes_no_newline(1);
                Some(self.parse_expression()?)
            } else {
                None
            };
            params.push(MacroParam { name, default });

            self.consume_whitespace();
            if !self.consume(",") {
                self.expect(")")?;
                return Ok(params);
            }
        }
    }

    fn parse_macro(&mut self) -> ParseResult<Node> {
        let name = self.consume_identifier()?.to_string();
        self.consume_whitespace();
        let params = self.parse_macro_params()?;
        self.expect_close("%}")?;
        let (body, _) = self.parse_nodes_until(&["endmacro"])?;
        self.expect_end_tag("endmacro")?;
        Ok(Node::Other(Statement::Macro(Macro { name, params, body })))
    }

    fn parse_call(&mut self) -> ParseResult<Node> {
        self.consume_whitespace();
        let params = if self.peek("(") {
            self.parse_macro_params()?
        } else {
            Vec::new()
        };
        let call = self.parse_expression()?;
        self.expect_close("%}")?;
        let (body, _) = self.parse_nodes_until(&["endcall"])?;
        self.expect_end_tag("endcall")?;
        Ok(Node::Other(Statement::Call { params, call, body }))
    }

    fn parse_filter_block(&mut self) -> ParseResult<Node> {
        let name = self.consume_identifier()?.to_string();
        self.consume_whitespace();
        let args = if self.peek("(") {
            self.parse_call_args()?
        } else {
            Vec::new()
        };
        self.expect_close("%}")?;
        let (body, _) = self.parse_nodes_until(&["endfilter"])?;
        self.expect_end_tag("endfilter")?;
        Ok(Node::Other(Statement::FilterBlock { name, args, body }))
    }

    fn parse_import(&mut self) -> ParseResult<Node> {
        let template = self.parse_expression()?;
        self.expect_keyword("as")?;
        let alias = self.consume_identifier()?.to_string();
        self.parse_context_modifier()?;
        self.expect_close("%}")?;
        Ok(Node::Other(Statement::Import { template, alias }))
    }

    fn parse_from_import(&mut self) -> ParseResult<Node> {
        let template = self.parse_expression()?;
        self.expect_keyword("import")?;
        let mut names = Vec::new();
        loop {
            let name = self.consume_identifier()?.to_string();
            let alias = if self.consume_keyword("as") {
                self.consume_identifier()?.to_string()
            } else {
                name.clone()
            };
            names.push((name, alias));
            self.consume_whitespace();
            if !self.consume(",") {
                break;
            }
        }
        self.parse_context_modifier()?;
        self.expect_close("%}")?;
        Ok(Node::Other(Statement::FromImport { template, names }))
    }

    fn parse_set(&mut self) -> ParseResult<Node> {
        let name = self.consume_identifier()?.to_string();
        self.consume_whitespace();
        self.expect("=")?;
        let value = self.parse_expression()?;
        self.expect_close("%}")?;
        Ok(Node::Other(Statement::Set { name, value }))
    }

    fn parse_block(&mut self) -> ParseResult<Node> {
        let name = self.consume_identifier()?.to_string();
        self.expect_close("%}")?;
        let (body, _) = self.parse_nodes_until(&["endblock"])?;

        self.expect("{%")?;
        self.consume("-");
        self.expect_keyword("endblock")?;
        self.consume_whitespace();
        if self.current_char().is_some_and(is_ident_start) {
            let closing = self.consume_identifier()?;
            if closing != name {
                return Err(self.make_error(ParseErrorKind::UnexpectedToken {
                    expected: format!("endblock for '{name}'"),
                    found: closing.to_string(),
                }));
            }
        }
        self.expect_close("%}")?;

        Ok(Node::Block { name, body })
    }

    /// Everything up to `{% endraw %}` is kept verbatim.
    fn parse_raw(&mut self) -> ParseResult<Node> {
        self.expect_close("%}")?;
        let start = self.pos;
        loop {
            if self.eof() {
                return Err(self.make_error(ParseErrorKind::unexpected_eof(Some(
                    "{% endraw %}".to_string(),
                ))));
            }
            if self.peek_tag_keyword() == Some("endraw") {
                break;
            }
            if let Some(ch) = self.current_char() {
                self.advance_char(ch);
            }
        }

        let mut text = &self.input[start..self.pos];
        if std::mem::take(&mut self.trim_next) {
            text = text.trim_start();
        }
        if self.peek("{%-") {
            text = text.trim_end();
        }
        let text = text.to_owned();
        self.expect_end_tag("endraw")?;
        Ok(Node::Text(text))
    }

    // --- Expression Parsing (recursive descent) ---
    // Precedence, loosest first: inline-if -> or -> and -> not -> comparison
    // -> `~` -> `+ -` -> `* / // % **` -> unary minus -> postfix -> primary

    fn parse_expression(&mut self) -> ParseResult<Expr> {
        let then = self.parse_or_expression()?;
        if !self.consume_keyword("if") {
            return Ok(then);
        }
        let condition = self.parse_or_expression()?;
        let otherwise = if self.consume_keyword("else") {
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };
        Ok(Expr::Other(OpaqueExpr::InlineIf {
            then: Box::new(then),
            condition: Box::new(condition),
            otherwise,
        }))
    }

    fn parse_or_expression(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_and_expression()?;
        while self.consume_keyword("or") {
            let right = self.parse_and_expression()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and_expression(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_not_expression()?;
        while self.consume_keyword("and") {
            let right = self.parse_not_expression()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not_expression(&mut self) -> ParseResult<Expr> {
        if self.consume_keyword("not") {
            let inner = self.parse_not_expression()?;
            Ok(Expr::Not(Box::new(inner)))
        } else {
            self.parse_compare_expression()
        }
    }

    fn consume_compare_op(&mut self) -> Option<CompareOp> {
        self.consume_whitespace();
        const SYMBOLS: [(&str, CompareOp); 6] = [
            ("==", CompareOp::Eq),
            ("!=", CompareOp::Ne),
            ("<=", CompareOp::Le),
            (">=", CompareOp::Ge),
            ("<", CompareOp::Lt),
            (">", CompareOp::Gt),
        ];
        for (symbol, op) in SYMBOLS {
            if self.consume(symbol) {
                return Some(op);
            }
        }

        if self.consume_keyword("in") {
            return Some(CompareOp::In);
        }
        let mut probe = *self;
        if probe.consume_keyword("not") && probe.consume_keyword("in") {
            *self = probe;
            return Some(CompareOp::NotIn);
        }
        None
    }

    fn parse_compare_expression(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_concat_expression()?;
        while let Some(op) = self.consume_compare_op() {
            let right = self.parse_concat_expression()?;
            left = Expr::Other(OpaqueExpr::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right),
            });
        }
        Ok(left)
    }

    fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Other(OpaqueExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_concat_expression(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_additive_expression()?;
        loop {
            self.consume_whitespace();
            if !self.consume("~") {
                break;
            }
            let right = self.parse_additive_expression()?;
            left = Self::binary(BinaryOp::Concat, left, right);
        }
        Ok(left)
    }

    /// True at `-}}`, `-%}` or `-#}`, where `-` is whitespace control rather than minus.
    fn at_trim_close(&self) -> bool {
        self.peek("-}}") || self.peek("-%}") || self.peek("-#}")
    }

    fn parse_additive_expression(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_multiplicative_expression()?;
        loop {
            self.consume_whitespace();
            let op = if self.consume("+") {
                BinaryOp::Add
            } else if !self.at_trim_close() && self.consume("-") {
                BinaryOp::Sub
            } else {
                break;
            };
            let right = self.parse_multiplicative_expression()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative_expression(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_unary_expression()?;
        loop {
            self.consume_whitespace();
            let op = if self.consume("**") {
                BinaryOp::Pow
            } else if self.consume("*") {
                BinaryOp::Mul
            } else if self.consume("//") {
                BinaryOp::FloorDiv
            } else if self.consume("/") {
                BinaryOp::Div
            } else if !self.peek("%}") && self.consume("%") {
                BinaryOp::Rem
            } else {
                break;
            };
            let right = self.parse_unary_expression()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary_expression(&mut self) -> ParseResult<Expr> {
        self.consume_whitespace();
        if self.consume("-") {
            let inner = self.parse_unary_expression()?;
            return Ok(Expr::Other(OpaqueExpr::Neg(Box::new(inner))));
        }
        if self.consume("+") {
            return self.parse_unary_expression();
        }
        self.parse_postfix_expression()
    }

    /// Comma-separated arguments in parentheses; keyword arguments keep only their value.
    fn parse_call_args(&mut self) -> ParseResult<Vec<Expr>> {
        self.expect("(")?;
        let mut args = Vec::new();
        loop {
            self.consume_whitespace();
            if self.consume(")") {
                return Ok(args);
            }

            let mut probe = *self;
            if probe.consume_identifier().is_ok() {
                probe.consume_whitespace();
                if probe.peek("=") && !probe.peek("==") {
                    probe.advance_bytes_no_newline(1);
                    *self = probe;
                }
            }

            args.push(self.parse_expression()?);
            self.consume_whitespace();
            if !self.consume(",") {
                self.expect(")")?;
                return Ok(args);
            }
        }
    }

    fn parse_postfix_expression(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary_expression()?;
        loop {
            self.consume_whitespace();
            if self.consume(".") {
                let key = if self.current_char().is_some_and(|c| c.is_ascii_digit()) {
                    self.parse_number()?
                } else {
                    Value::from(self.consume_identifier()?)
                };
                expr = Expr::Lookup {
                    base: Box::new(expr),
                    key: Box::new(Expr::Literal(key)),
                };
            } else if self.consume("[") {
                let key = self.parse_expression()?;
                self.consume_whitespace();
                self.expect("]")?;
                expr = Expr::Lookup {
                    base: Box::new(expr),
                    key: Box::new(key),
                };
            } else if self.peek("(") {
                let args = self.parse_call_args()?;
                expr = Expr::Other(OpaqueExpr::Call {
                    callee: Box::new(expr),
                    args,
                });
            } else if self.consume("|") {
                let name = self.consume_identifier()?.to_string();
                self.consume_whitespace();
                let args = if self.peek("(") {
                    self.parse_call_args()?
                } else {
                    Vec::new()
                };
                expr = Expr::Filter {
                    name,
                    target: Box::new(expr),
                    args,
                };
            } else if self.consume_keyword("is") {
                expr = self.parse_test(expr)?;
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_test(&mut self, target: Expr) -> ParseResult<Expr> {
        let negated = self.consume_keyword("not");
        let name = self.consume_identifier()?;
        let defined = match name {
            "defined" => Some(true),
            "undefined" => Some(false),
            _ => None,
        };

        if let Some(positive) = defined {
            let test = Expr::Defined(Box::new(target));
            return Ok(if positive != negated {
                test
            } else {
                Expr::Not(Box::new(test))
            });
        }

        self.consume_whitespace();
        let args = if self.peek("(") {
            self.parse_call_args()?
        } else {
            Vec::new()
        };
        Ok(Expr::Other(OpaqueExpr::Test {
            name: name.to_string(),
            target: Box::new(target),
            args,
            negated,
        }))
    }

    fn parse_string_literal(&mut self, quote: char) -> ParseResult<String> {
        self.advance_char(quote);
        let mut out = String::new();
        loop {
            let Some(ch) = self.current_char() else {
                return Err(self.make_error(ParseErrorKind::unexpected_eof(Some(quote.to_string()))));
            };
            self.advance_char(ch);
            match ch {
                c if c == quote => return Ok(out),
                '\\' => {
                    let Some(escaped) = self.current_char() else {
                        return Err(self.make_error(ParseErrorKind::unexpected_eof(Some(
                            quote.to_string(),
                        ))));
                    };
                    self.advance_char(escaped);
                    out.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                }
                c => out.push(c),
            }
        }
    }

    fn skip_digits(&mut self) {
        while let Some(ch) = self.current_char() {
            if !ch.is_ascii_digit() {
                break;
            }
            self.advance_char(ch);
        }
    }

    fn parse_number(&mut self) -> ParseResult<Value> {
        let start = self.pos;
        self.skip_digits();
        let is_float = self.peek(".")
            && self.input[self.pos + 1..].starts_with(|c: char| c.is_ascii_digit());
        if is_float {
            self.advance_bytes_no_newline(1);
            self.skip_digits();
        }

        let text = &self.input[start..self.pos];
        let value = if is_float {
            text.parse::<f64>().ok().map(Value::Float)
        } else {
            text.parse::<i64>().ok().map(Value::Int)
        };
        value.ok_or_else(|| {
            self.make_error(ParseErrorKind::Message(format!("invalid number literal '{text}'")))
        })
    }

    fn parse_sequence_until(&mut self, close: &str) -> ParseResult<Vec<Expr>> {
        let mut items = Vec::new();
        loop {
            self.consume_whitespace();
            if self.consume(close) {
                return Ok(items);
            }
            items.push(self.parse_expression()?);
            self.consume_whitespace();
            if !self.consume(",") {
                self.expect(close)?;
                return Ok(items);
            }
        }
    }

    fn parse_dict(&mut self) -> ParseResult<Expr> {
        let mut entries = Vec::new();
        loop {
            self.consume_whitespace();
            if self.consume("}") {
                break;
            }
            let key = self.parse_expression()?;
            self.consume_whitespace();
            self.expect(":")?;
            let value = self.parse_expression()?;
            entries.push((key, value));
            self.consume_whitespace();
            if !self.consume(",") {
                self.expect("}")?;
                break;
            }
        }
        Ok(Expr::Other(OpaqueExpr::Dict(entries)))
    }

    fn parse_primary_expression(&mut self) -> ParseResult<Expr> {
        self.consume_whitespace();
        let Some(ch) = self.current_char() else {
            return Err(self.make_error(ParseErrorKind::unexpected_eof(Some(
                "expression".to_string(),
            ))));
        };

        match ch {
            '(' => {
                self.advance_char(ch);
                let inner = self.parse_expression()?;
                self.consume_whitespace();
                self.expect(")")?;
                Ok(inner)
            }
            '[' => {
                self.advance_char(ch);
                let items = self.parse_sequence_until("]")?;
                Ok(Expr::Other(OpaqueExpr::List(items)))
            }
            '{' => {
                self.advance_char(ch);
                self.parse_dict()
            }
            '"' | '\'' => Ok(Expr::Literal(Value::String(self.parse_string_literal(ch)?))),
            c if c.is_ascii_digit() => Ok(Expr::Literal(self.parse_number()?)),
            c if is_ident_start(c) => {
                let name = self.consume_identifier()?;
                Ok(match name {
                    "true" | "True" => Expr::Literal(Value::Bool(true)),
                    "false" | "False" => Expr::Literal(Value::Bool(false)),
                    "none" | "None" | "null" => Expr::Literal(Value::Null),
                    _ => Expr::Var(name.to_string()),
                })
            }
            _ => Err(self.make_error(ParseErrorKind::Expected {
                description: format!("expression, found '{}'", self.snippet(10)),
            })),
        }
    }
}

/// Parses template source into its node list.
pub fn parse_template(input: &str) -> Result<Vec<Node>, ParseError> {
    let mut parser = Parser::new(input);
    let (nodes, _) = parser.parse_nodes_until(&[])?;
    Ok(nodes)
}
