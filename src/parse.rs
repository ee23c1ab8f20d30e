//! Parser for build manifest files.
//!
//! To avoid allocations parsing frequently uses references into the input
//! text, marked with the lifetime `'text`.  Evaluation and interning happen
//! in the loader; the parser only produces statements.

use crate::eval::{EvalPart, EvalString};
use crate::graph::is_reserved_binding;
use crate::scanner::{ParseError, ParseResult, Scanner};
use crate::smallmap::SmallMap;
use std::path::Path;

/// A list of variable bindings, as expressed with syntax like:
///   key = $val
pub type VarList<'text> = SmallMap<&'text str, EvalString<&'text str>>;

pub struct Rule<'text> {
    pub name: &'text str,
    pub vars: VarList<'text>,
}

pub struct Build<'text> {
    pub rule: &'text str,
    pub line: usize,
    pub outs: Vec<EvalString<&'text str>>,
    pub explicit_outs: usize,
    pub ins: Vec<EvalString<&'text str>>,
    pub explicit_ins: usize,
    pub implicit_ins: usize,
    pub order_only_ins: usize,
    pub vars: VarList<'text>,
}

#[derive(Debug)]
pub struct Pool<'text> {
    pub name: &'text str,
    pub vars: VarList<'text>,
}

pub enum Statement<'text> {
    Rule(Rule<'text>),
    Build(Build<'text>),
    Default(Vec<EvalString<&'text str>>),
    Include(EvalString<&'text str>),
    Subninja(EvalString<&'text str>),
    Pool(Pool<'text>),
    Binding((&'text str, EvalString<&'text str>)),
}

pub struct Parser<'text> {
    scanner: Scanner<'text>,
}

impl<'text> Parser<'text> {
    pub fn new(buf: &'text [u8]) -> Parser<'text> {
        Parser {
            scanner: Scanner::new(buf),
        }
    }

    pub fn format_parse_error(&self, filename: &Path, err: ParseError) -> String {
        self.scanner.format_parse_error(filename, err)
    }

    pub fn read(&mut self) -> ParseResult<Option<Statement<'text>>> {
        loop {
            match self.scanner.peek() {
                '\0' => return Ok(None),
                '\n' | '\r' => self.skip_newline()?,
                '#' => self.skip_comment()?,
                ' ' | '\t' => return self.scanner.parse_error("unexpected whitespace"),
                _ => {
                    let ident = self.read_ident()?;
                    self.scanner.skip_spaces();
                    return Ok(Some(match ident {
                        "rule" => Statement::Rule(self.read_rule()?),
                        "build" => Statement::Build(self.read_build()?),
                        "default" => Statement::Default(self.read_default()?),
                        "include" => Statement::Include(self.read_file_stmt()?),
                        "subninja" => Statement::Subninja(self.read_file_stmt()?),
                        "pool" => Statement::Pool(self.read_pool()?),
                        ident => Statement::Binding((ident, self.read_vardef()?)),
                    }));
                }
            }
        }
    }

    /// Read the `= value` part of a variable definition, through the
    /// trailing newline.
    fn read_vardef(&mut self) -> ParseResult<EvalString<&'text str>> {
        self.scanner.skip_spaces();
        self.scanner.expect('=')?;
        self.scanner.skip_spaces();
        let value = self.read_eval_string(false)?;
        self.skip_newline()?;
        Ok(value)
    }

    /// Read a collection of indented variable definitions.
    fn read_scoped_vars(&mut self) -> ParseResult<VarList<'text>> {
        let mut vars = VarList::default();
        while self.scanner.peek() == ' ' {
            self.scanner.skip_spaces();
            let name = self.read_ident()?;
            self.scanner.skip_spaces();
            let val = self.read_vardef()?;
            vars.insert(name, val);
        }
        Ok(vars)
    }

    fn read_rule(&mut self) -> ParseResult<Rule<'text>> {
        let name = self.read_ident()?;
        self.skip_newline()?;
        let vars = self.read_scoped_vars()?;
        for (key, _) in vars.iter() {
            if !is_reserved_binding(key) {
                // Checked here so its location is reported, rather than
                // failing obscurely when the rule is used.
                return self
                    .scanner
                    .parse_error(format!("unexpected variable {:?}", key));
            }
        }
        Ok(Rule { name, vars })
    }

    fn read_pool(&mut self) -> ParseResult<Pool<'text>> {
        let name = self.read_ident()?;
        self.skip_newline()?;
        let vars = self.read_scoped_vars()?;
        for (key, _) in vars.iter() {
            if *key != "depth" {
                return self
                    .scanner
                    .parse_error(format!("unexpected pool variable {:?}", key));
            }
        }
        Ok(Pool { name, vars })
    }

    fn read_default(&mut self) -> ParseResult<Vec<EvalString<&'text str>>> {
        let mut defaults = Vec::new();
        while let Some(path) = self.read_path()? {
            defaults.push(path);
        }
        if defaults.is_empty() {
            return self.scanner.parse_error("expected path");
        }
        self.skip_newline()?;
        Ok(defaults)
    }

    fn read_file_stmt(&mut self) -> ParseResult<EvalString<&'text str>> {
        let path = match self.read_path()? {
            Some(path) => path,
            None => return self.scanner.parse_error("expected path"),
        };
        self.skip_newline()?;
        Ok(path)
    }

    fn read_build(&mut self) -> ParseResult<Build<'text>> {
        let line = self.scanner.line;

        let mut outs = Vec::new();
        while let Some(path) = self.read_path()? {
            outs.push(path);
        }
        let explicit_outs = outs.len();
        if self.scanner.skip('|') {
            while let Some(path) = self.read_path()? {
                outs.push(path);
            }
        }
        if outs.is_empty() {
            return self.scanner.parse_error("expected output path");
        }

        self.scanner.expect(':')?;
        self.scanner.skip_spaces();
        let rule = self.read_ident()?;

        let mut ins = Vec::new();
        while let Some(path) = self.read_path()? {
            ins.push(path);
        }
        let explicit_ins = ins.len();

        if self.scanner.skip('|') {
            if self.scanner.skip('|') {
                // "||" with no "|" section in between.
                while let Some(path) = self.read_path()? {
                    ins.push(path);
                }
                let order_only_ins = ins.len() - explicit_ins;
                self.skip_newline()?;
                let vars = self.read_scoped_vars()?;
                return Ok(Build {
                    rule,
                    line,
                    outs,
                    explicit_outs,
                    ins,
                    explicit_ins,
                    implicit_ins: 0,
                    order_only_ins,
                    vars,
                });
            }
            while let Some(path) = self.read_path()? {
                ins.push(path);
            }
        }
        let implicit_ins = ins.len() - explicit_ins;

        let mut order_only_ins = 0;
        if self.scanner.skip('|') {
            self.scanner.expect('|')?;
            while let Some(path) = self.read_path()? {
                ins.push(path);
            }
            order_only_ins = ins.len() - explicit_ins - implicit_ins;
        }

        self.skip_newline()?;
        let vars = self.read_scoped_vars()?;
        Ok(Build {
            rule,
            line,
            outs,
            explicit_outs,
            ins,
            explicit_ins,
            implicit_ins,
            order_only_ins,
            vars,
        })
    }

    fn skip_comment(&mut self) -> ParseResult<()> {
        loop {
            match self.scanner.read() {
                '\0' => {
                    self.scanner.back();
                    return Ok(());
                }
                '\n' => return Ok(()),
                _ => {}
            }
        }
    }

    /// Consume an end of line, accepting CRLF.
    fn skip_newline(&mut self) -> ParseResult<()> {
        self.scanner.skip('\r');
        match self.scanner.read() {
            '\n' => Ok(()),
            '\0' => {
                self.scanner.back();
                Ok(())
            }
            c => {
                self.scanner.back();
                self.scanner.parse_error(format!("expected newline, got {:?}", c))
            }
        }
    }

    fn read_ident(&mut self) -> ParseResult<&'text str> {
        let start = self.scanner.ofs;
        while matches!(self.scanner.read(),
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '.')
        {}
        self.scanner.back();
        let end = self.scanner.ofs;
        if end == start {
            return self.scanner.parse_error("failed to scan ident");
        }
        Ok(self.scanner.slice(start, end))
    }

    fn read_path(&mut self) -> ParseResult<Option<EvalString<&'text str>>> {
        self.scanner.skip_spaces();
        let path = self.read_eval_string(true)?;
        if path.is_empty() {
            return Ok(None);
        }
        Ok(Some(path))
    }

    /// Read a variable-reference string.  In path mode, space, ':', and '|'
    /// terminate the string; in value mode it runs to end of line.
    fn read_eval_string(&mut self, path: bool) -> ParseResult<EvalString<&'text str>> {
        let mut parts = Vec::new();
        let mut literal_start = self.scanner.ofs;
        loop {
            let ofs = self.scanner.ofs;
            let c = self.scanner.read();
            match c {
                '\0' | '\n' | '\r' => {
                    self.scanner.back();
                    if ofs > literal_start {
                        parts.push(EvalPart::Literal(self.scanner.slice(literal_start, ofs)));
                    }
                    break;
                }
                ' ' | ':' | '|' if path => {
                    self.scanner.back();
                    if ofs > literal_start {
                        parts.push(EvalPart::Literal(self.scanner.slice(literal_start, ofs)));
                    }
                    break;
                }
                '$' => {
                    if ofs > literal_start {
                        parts.push(EvalPart::Literal(self.scanner.slice(literal_start, ofs)));
                    }
                    self.read_escape(&mut parts)?;
                    literal_start = self.scanner.ofs;
                }
                _ => {}
            }
        }
        Ok(EvalString::new(parts))
    }

    /// Read the text after a '$' escape.
    fn read_escape(&mut self, parts: &mut Vec<EvalPart<&'text str>>) -> ParseResult<()> {
        match self.scanner.read() {
            '$' => parts.push(EvalPart::Literal("$")),
            ' ' => parts.push(EvalPart::Literal(" ")),
            ':' => parts.push(EvalPart::Literal(":")),
            c @ ('\r' | '\n') => {
                // Line continuation: swallow the newline and any indent.
                if c == '\r' {
                    self.scanner.expect('\n')?;
                }
                self.scanner.skip_spaces();
            }
            '{' => {
                let start = self.scanner.ofs;
                while matches!(self.scanner.read(),
                    'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '.')
                {}
                self.scanner.back();
                let end = self.scanner.ofs;
                if end == start {
                    return self.scanner.parse_error("expected variable name");
                }
                self.scanner.expect('}')?;
                parts.push(EvalPart::VarRef(self.scanner.slice(start, end)));
            }
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' => {
                self.scanner.back();
                let start = self.scanner.ofs;
                while matches!(self.scanner.read(),
                    'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-')
                {}
                self.scanner.back();
                parts.push(EvalPart::VarRef(self.scanner.slice(start, self.scanner.ofs)));
            }
            _ => {
                self.scanner.back();
                return self.scanner.parse_error("bad $-escape (literal $ must be written $$)");
            }
        }
        Ok(())
    }
}
