//! Shell grammar subset used for risk classification.
//!
//! Recognises enough of POSIX `sh` to find every program a command line would
//! start: pipelines, `;` / `&` / `&&` / `||` lists, `( ... )` subshells,
//! redirects, here-documents, and command / process substitutions.
//! Substitution bodies are kept as source text and parsed again by the
//! classifier, so nesting depth is controlled there.
//!
//! Control-flow keywords (`if`, `for`, `{`, ...) are not given structure; they
//! arrive as ordinary words and the classifier skips them.

use crate::approval::report::SubstitutionKind;
use thiserror::Error;

/// Maximum `( ... )` nesting accepted before giving up.
const MAX_SUBSHELL_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unterminated single quote")]
    UnterminatedSingleQuote,
    #[error("unterminated double quote")]
    UnterminatedDoubleQuote,
    #[error("unterminated command substitution")]
    UnterminatedSubstitution,
    #[error("unterminated backquote")]
    UnterminatedBackquote,
    #[error("unterminated parameter expansion")]
    UnterminatedParameter,
    #[error("dangling escape at end of input")]
    DanglingEscape,
    #[error("missing target for redirect '{0}'")]
    MissingRedirectTarget(&'static str),
    #[error("unexpected '{0}'")]
    UnexpectedToken(&'static str),
    #[error("missing command after '{0}'")]
    MissingCommand(&'static str),
    #[error("unmatched '('")]
    UnclosedSubshell,
    #[error("subshells nested too deeply")]
    TooDeep,
}

/// A word after quote removal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Word {
    /// Literal text; substitutions appear in their source form
    pub text: String,
    /// Any part of the word was quoted or escaped
    pub quoted: bool,
    /// Unquoted `NAME=value` prefix
    pub assignment: bool,
    pub substitutions: Vec<Substitution>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub kind: SubstitutionKind,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectOp {
    /// `>`
    Output,
    /// `>>`
    Append,
    /// `>|`
    Clobber,
    /// `<`
    Input,
    /// `<<` and `<<-`
    HereDoc,
    /// `<<<`
    HereString,
    /// `>&`
    DupOutput,
    /// `<&`
    DupInput,
    /// `<>`
    ReadWrite,
    /// `&>`
    OutputAll,
    /// `&>>`
    AppendAll,
}

impl RedirectOp {
    pub fn symbol(self) -> &'static str {
        match self {
            RedirectOp::Output => ">",
            RedirectOp::Append => ">>",
            RedirectOp::Clobber => ">|",
            RedirectOp::Input => "<",
            RedirectOp::HereDoc => "<<",
            RedirectOp::HereString => "<<<",
            RedirectOp::DupOutput => ">&",
            RedirectOp::DupInput => "<&",
            RedirectOp::ReadWrite => "<>",
            RedirectOp::OutputAll => "&>",
            RedirectOp::AppendAll => "&>>",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub fd: Option<u32>,
    pub op: RedirectOp,
    pub target: Word,
}

impl Redirect {
    /// Whether this redirect creates or overwrites a file.
    ///
    /// Descriptor duplication (`2>&1`, `>&-`) and the null / standard
    /// stream devices do not count.
    pub fn writes_file(&self) -> bool {
        let target = self.target.text.as_str();
        let harmless_device = matches!(target, "/dev/null" | "/dev/stdout" | "/dev/stderr");
        match self.op {
            RedirectOp::Output
            | RedirectOp::Append
            | RedirectOp::Clobber
            | RedirectOp::ReadWrite
            | RedirectOp::OutputAll
            | RedirectOp::AppendAll => !harmless_device,
            RedirectOp::DupOutput => {
                let is_fd = !target.is_empty() && target.chars().all(|c| c.is_ascii_digit());
                !(is_fd || target == "-" || harmless_device)
            }
            RedirectOp::Input
            | RedirectOp::HereDoc
            | RedirectOp::HereString
            | RedirectOp::DupInput => false,
        }
    }

    /// Source form, e.g. `2>&1` or `> out.txt`.
    pub fn display(&self) -> String {
        match self.fd {
            Some(fd) => format!("{}{}", fd, self.op.symbol()),
            None => self.op.symbol().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleCommand {
    pub words: Vec<Word>,
    pub redirects: Vec<Redirect>,
}

impl SimpleCommand {
    /// Leading `NAME=value` words.
    pub fn assignments(&self) -> impl Iterator<Item = &Word> {
        self.words.iter().take_while(|w| w.assignment)
    }

    /// Program and arguments, leading assignments excluded.
    pub fn argv(&self) -> Vec<String> {
        self.words
            .iter()
            .skip_while(|w| w.assignment)
            .map(|w| w.text.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Simple(SimpleCommand),
    Subshell {
        body: Script,
        redirects: Vec<Redirect>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    And,
    Or,
}

/// Commands joined by `|` or `|&`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub commands: Vec<Command>,
}

/// Pipelines joined by `&&` / `||`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AndOr {
    pub first: Pipeline,
    pub rest: Vec<(Connector, Pipeline)>,
}

impl AndOr {
    pub fn pipelines(&self) -> impl Iterator<Item = &Pipeline> {
        std::iter::once(&self.first).chain(self.rest.iter().map(|(_, p)| p))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    pub and_or: AndOr,
    /// Terminated by `&`
    pub background: bool,
}

/// A full command line: list items separated by `;`, `&` or newlines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    pub items: Vec<ListItem>,
}

impl Script {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Parse a command line.
///
/// # Errors
///
/// Returns [`ParseError`] for unterminated quotes or substitutions, dangling
/// operators, unmatched parentheses, and redirects without a target.
pub fn parse(input: &str) -> Result<Script, ParseError> {
    let tokens = Lexer::new(input).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let script = parser.parse_list(false)?;
    match parser.peek() {
        None => Ok(script),
        Some(token) => Err(ParseError::UnexpectedToken(token.symbol())),
    }
}

// ===== Lexer =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Pipe,
    PipeAll,
    AndIf,
    OrIf,
    Semi,
    Amp,
    Newline,
    LParen,
    RParen,
}

impl Op {
    fn symbol(self) -> &'static str {
        match self {
            Op::Pipe => "|",
            Op::PipeAll => "|&",
            Op::AndIf => "&&",
            Op::OrIf => "||",
            Op::Semi => ";",
            Op::Amp => "&",
            Op::Newline => "newline",
            Op::LParen => "(",
            Op::RParen => ")",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(Word),
    Op(Op),
    Redirect(Redirect),
}

impl Token {
    fn symbol(&self) -> &'static str {
        match self {
            Token::Word(_) => "word",
            Token::Op(op) => op.symbol(),
            Token::Redirect(r) => r.op.symbol(),
        }
    }
}

struct PendingHereDoc {
    token_index: usize,
    delimiter: String,
    strip_tabs: bool,
    expands: bool,
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    tokens: Vec<Token>,
    heredocs: Vec<PendingHereDoc>,
}

impl Lexer {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            tokens: Vec::new(),
            heredocs: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' => self.pos += 1,
                '\\' if self.peek_at(1) == Some('\n') => self.pos += 2,
                '\n' => {
                    self.pos += 1;
                    self.tokens.push(Token::Op(Op::Newline));
                    self.read_heredoc_bodies()?;
                }
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                '|' | '&' | ';' | '(' | ')' => self.lex_operator()?,
                '<' | '>' if self.peek_at(1) != Some('(') => self.lex_redirect(None)?,
                _ => {
                    let word = self.read_word()?;
                    if let Some(fd) = io_number(&word) {
                        if matches!(self.peek(), Some('<') | Some('>'))
                            && self.peek_at(1) != Some('(')
                        {
                            self.lex_redirect(Some(fd))?;
                            continue;
                        }
                    }
                    self.tokens.push(Token::Word(word));
                }
            }
        }
        // Here-document started on the last line with no body.
        self.read_heredoc_bodies()?;
        Ok(self.tokens)
    }

    fn lex_operator(&mut self) -> Result<(), ParseError> {
        let Some(c) = self.bump() else {
            return Ok(());
        };
        let op = match c {
            '|' if self.eat('|') => Op::OrIf,
            '|' if self.eat('&') => Op::PipeAll,
            '|' => Op::Pipe,
            '&' if self.eat('&') => Op::AndIf,
            '&' if self.eat('>') => {
                let op = if self.eat('>') {
                    RedirectOp::AppendAll
                } else {
                    RedirectOp::OutputAll
                };
                return self.finish_redirect(None, op);
            }
            '&' => Op::Amp,
            ';' => Op::Semi,
            '(' => Op::LParen,
            _ => Op::RParen,
        };
        self.tokens.push(Token::Op(op));
        Ok(())
    }

    fn lex_redirect(&mut self, fd: Option<u32>) -> Result<(), ParseError> {
        let op = match self.bump() {
            Some('>') => {
                if self.eat('>') {
                    RedirectOp::Append
                } else if self.eat('|') {
                    RedirectOp::Clobber
                } else if self.eat('&') {
                    RedirectOp::DupOutput
                } else {
                    RedirectOp::Output
                }
            }
            _ => {
                if self.eat('<') {
                    if self.eat('<') {
                        RedirectOp::HereString
                    } else {
                        return self.finish_heredoc(fd);
                    }
                } else if self.eat('&') {
                    RedirectOp::DupInput
                } else if self.eat('>') {
                    RedirectOp::ReadWrite
                } else {
                    RedirectOp::Input
                }
            }
        };
        self.finish_redirect(fd, op)
    }

    fn read_redirect_target(&mut self, op: RedirectOp) -> Result<Word, ParseError> {
        while matches!(self.peek(), Some(' ') | Some('\t')) {
            self.pos += 1;
        }
        match self.peek() {
            None | Some('\n') | Some('|') | Some('&') | Some(';') | Some('(') | Some(')') => {
                Err(ParseError::MissingRedirectTarget(op.symbol()))
            }
            Some('<') | Some('>') if self.peek_at(1) != Some('(') => {
                Err(ParseError::MissingRedirectTarget(op.symbol()))
            }
            _ => self.read_word(),
        }
    }

    fn finish_redirect(&mut self, fd: Option<u32>, op: RedirectOp) -> Result<(), ParseError> {
        let target = self.read_redirect_target(op)?;
        self.tokens.push(Token::Redirect(Redirect { fd, op, target }));
        Ok(())
    }

    fn finish_heredoc(&mut self, fd: Option<u32>) -> Result<(), ParseError> {
        let strip_tabs = self.eat('-');
        let target = self.read_redirect_target(RedirectOp::HereDoc)?;
        self.heredocs.push(PendingHereDoc {
            token_index: self.tokens.len(),
            delimiter: target.text.clone(),
            strip_tabs,
            expands: !target.quoted,
        });
        self.tokens.push(Token::Redirect(Redirect {
            fd,
            op: RedirectOp::HereDoc,
            target,
        }));
        Ok(())
    }

    /// Consume here-document bodies queued on the line just finished.
    ///
    /// Bodies with an unquoted delimiter undergo expansion, so any command
    /// substitution inside is attached to the redirect target word.
    fn read_heredoc_bodies(&mut self) -> Result<(), ParseError> {
        for pending in std::mem::take(&mut self.heredocs) {
            let mut body = String::new();
            while self.peek().is_some() {
                let mut line = String::new();
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                    line.push(c);
                }
                let candidate = if pending.strip_tabs {
                    line.trim_start_matches('\t')
                } else {
                    line.as_str()
                };
                if candidate == pending.delimiter {
                    break;
                }
                body.push_str(&line);
                body.push('\n');
            }
            if !pending.expands {
                continue;
            }
            let mut scanner = Lexer::new(&body);
            let mut text = String::new();
            let mut subs = Vec::new();
            scanner.read_expanding(None, &mut text, &mut subs)?;
            if subs.is_empty() {
                continue;
            }
            if let Some(Token::Redirect(redirect)) = self.tokens.get_mut(pending.token_index) {
                redirect.target.substitutions.push(Substitution {
                    kind: SubstitutionKind::HereDocument,
                    body,
                });
                redirect.target.substitutions.extend(subs);
            }
        }
        Ok(())
    }

    fn read_word(&mut self) -> Result<Word, ParseError> {
        let mut word = Word::default();
        let mut assignment_possible = true;
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' | '\n' | '|' | '&' | ';' | '(' | ')' => break,
                '<' | '>' => {
                    if self.peek_at(1) != Some('(') {
                        break;
                    }
                    let kind = if c == '<' {
                        SubstitutionKind::ProcessInput
                    } else {
                        SubstitutionKind::ProcessOutput
                    };
                    self.pos += 2;
                    let body = self.read_paren_body()?;
                    word.text.push(c);
                    word.text.push('(');
                    word.text.push_str(&body);
                    word.text.push(')');
                    word.substitutions.push(Substitution { kind, body });
                    assignment_possible = false;
                }
                '\\' => {
                    self.pos += 1;
                    match self.bump() {
                        None => return Err(ParseError::DanglingEscape),
                        Some('\n') => {}
                        Some(escaped) => {
                            word.text.push(escaped);
                            word.quoted = true;
                        }
                    }
                    assignment_possible = false;
                }
                '\'' => {
                    self.pos += 1;
                    word.quoted = true;
                    assignment_possible = false;
                    loop {
                        match self.bump() {
                            None => return Err(ParseError::UnterminatedSingleQuote),
                            Some('\'') => break,
                            Some(ch) => word.text.push(ch),
                        }
                    }
                }
                '"' => {
                    self.pos += 1;
                    word.quoted = true;
                    assignment_possible = false;
                    self.read_expanding(Some('"'), &mut word.text, &mut word.substitutions)?;
                }
                '`' | '$' => {
                    self.read_expansion(&mut word.text, &mut word.substitutions)?;
                    assignment_possible = false;
                }
                '=' if assignment_possible && !word.assignment => {
                    self.pos += 1;
                    word.assignment = is_identifier(&word.text);
                    word.text.push('=');
                    assignment_possible = false;
                }
                _ => {
                    self.pos += 1;
                    word.text.push(c);
                }
            }
        }
        Ok(word)
    }

    /// Read text subject to expansion up to `terminator` (a closing double
    /// quote) or end of input when `terminator` is `None`.
    fn read_expanding(
        &mut self,
        terminator: Option<char>,
        text: &mut String,
        subs: &mut Vec<Substitution>,
    ) -> Result<(), ParseError> {
        loop {
            match self.peek() {
                None => {
                    return match terminator {
                        Some(_) => Err(ParseError::UnterminatedDoubleQuote),
                        None => Ok(()),
                    };
                }
                Some(c) if Some(c) == terminator => {
                    self.pos += 1;
                    return Ok(());
                }
                Some('\\') => {
                    self.pos += 1;
                    match self.bump() {
                        None if terminator.is_some() => {
                            return Err(ParseError::UnterminatedDoubleQuote)
                        }
                        None => text.push('\\'),
                        Some('\n') => {}
                        Some(c @ ('"' | '\\' | '$' | '`')) => text.push(c),
                        Some(c) => {
                            text.push('\\');
                            text.push(c);
                        }
                    }
                }
                Some('`') | Some('$') => self.read_expansion(text, subs)?,
                Some(c) => {
                    self.pos += 1;
                    text.push(c);
                }
            }
        }
    }

    /// Read a `$...` or backquote expansion at the current position.
    fn read_expansion(
        &mut self,
        text: &mut String,
        subs: &mut Vec<Substitution>,
    ) -> Result<(), ParseError> {
        if self.eat('`') {
            let mut body = String::new();
            loop {
                match self.bump() {
                    None => return Err(ParseError::UnterminatedBackquote),
                    Some('`') => break,
                    Some('\\') => match self.bump() {
                        None => return Err(ParseError::UnterminatedBackquote),
                        Some(c @ ('`' | '\\' | '$')) => body.push(c),
                        Some(c) => {
                            body.push('\\');
                            body.push(c);
                        }
                    },
                    Some(c) => body.push(c),
                }
            }
            text.push('`');
            text.push_str(&body);
            text.push('`');
            subs.push(Substitution {
                kind: SubstitutionKind::Backquote,
                body,
            });
            return Ok(());
        }

        // At '$'
        self.pos += 1;
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let body = self.read_paren_body()?;
                text.push_str("$(");
                text.push_str(&body);
                text.push(')');
                if is_single_group(&body) {
                    subs.push(Substitution {
                        kind: SubstitutionKind::Arithmetic,
                        body: body[1..body.len() - 1].to_string(),
                    });
                } else {
                    subs.push(Substitution {
                        kind: SubstitutionKind::Command,
                        body,
                    });
                }
            }
            Some('{') => {
                self.pos += 1;
                let body = self.read_brace_body()?;
                text.push_str("${");
                text.push_str(&body);
                text.push('}');
                if body.contains("$(") || body.contains('`') {
                    subs.push(Substitution {
                        kind: SubstitutionKind::Parameter,
                        body,
                    });
                }
            }
            _ => text.push('$'),
        }
        Ok(())
    }

    /// Read up to the `)` matching an already-consumed `(`.
    fn read_paren_body(&mut self) -> Result<String, ParseError> {
        let mut body = String::new();
        let mut depth = 1usize;
        loop {
            let Some(c) = self.bump() else {
                return Err(ParseError::UnterminatedSubstitution);
            };
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(body);
                    }
                }
                '\\' => {
                    body.push(c);
                    match self.bump() {
                        Some(next) => body.push(next),
                        None => return Err(ParseError::UnterminatedSubstitution),
                    }
                    continue;
                }
                '\'' | '"' | '`' => {
                    body.push(c);
                    self.copy_quoted(c, &mut body)
                        .ok_or(ParseError::UnterminatedSubstitution)?;
                    continue;
                }
                _ => {}
            }
            body.push(c);
        }
    }

    /// Read up to the `}` matching an already-consumed `${`.
    fn read_brace_body(&mut self) -> Result<String, ParseError> {
        let mut body = String::new();
        let mut depth = 1usize;
        loop {
            let Some(c) = self.bump() else {
                return Err(ParseError::UnterminatedParameter);
            };
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(body);
                    }
                }
                '\\' => {
                    body.push(c);
                    match self.bump() {
                        Some(next) => body.push(next),
                        None => return Err(ParseError::UnterminatedParameter),
                    }
                    continue;
                }
                '\'' | '"' | '`' => {
                    body.push(c);
                    self.copy_quoted(c, &mut body)
                        .ok_or(ParseError::UnterminatedParameter)?;
                    continue;
                }
                _ => {}
            }
            body.push(c);
        }
    }

    /// Copy raw text through the closing `quote`, keeping the quotes.
    fn copy_quoted(&mut self, quote: char, out: &mut String) -> Option<()> {
        loop {
            let c = self.bump()?;
            out.push(c);
            if c == '\\' && quote != '\'' {
                out.push(self.bump()?);
                continue;
            }
            if c == quote {
                return Some(());
            }
        }
    }
}

fn io_number(word: &Word) -> Option<u32> {
    if word.quoted || word.assignment || !word.substitutions.is_empty() || word.text.is_empty() {
        return None;
    }
    if !word.text.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    word.text.parse().ok()
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ===== Parser =====

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_op(&self) -> Option<Op> {
        match self.peek() {
            Some(Token::Op(op)) => Some(*op),
            _ => None,
        }
    }

    fn skip_newlines(&mut self) {
        while self.peek_op() == Some(Op::Newline) {
            self.pos += 1;
        }
    }

    fn parse_list(&mut self, in_subshell: bool) -> Result<Script, ParseError> {
        let mut items = Vec::new();
        self.skip_newlines();
        loop {
            match self.peek_op() {
                _ if self.peek().is_none() => break,
                Some(Op::RParen) if in_subshell => break,
                _ => {}
            }
            let and_or = self.parse_and_or()?;
            let background = match self.peek() {
                None => false,
                Some(Token::Op(Op::Semi)) | Some(Token::Op(Op::Newline)) => {
                    self.pos += 1;
                    false
                }
                Some(Token::Op(Op::Amp)) => {
                    self.pos += 1;
                    true
                }
                Some(Token::Op(Op::RParen)) if in_subshell => false,
                Some(other) => return Err(ParseError::UnexpectedToken(other.symbol())),
            };
            items.push(ListItem { and_or, background });
            self.skip_newlines();
        }
        Ok(Script { items })
    }

    fn parse_and_or(&mut self) -> Result<AndOr, ParseError> {
        let first = self.parse_pipeline()?;
        let mut rest = Vec::new();
        while let Some(op @ (Op::AndIf | Op::OrIf)) = self.peek_op() {
            self.pos += 1;
            self.skip_newlines();
            self.expect_command(op)?;
            let connector = if op == Op::AndIf {
                Connector::And
            } else {
                Connector::Or
            };
            rest.push((connector, self.parse_pipeline()?));
        }
        Ok(AndOr { first, rest })
    }

    fn parse_pipeline(&mut self) -> Result<Pipeline, ParseError> {
        let mut commands = vec![self.parse_command()?];
        while let Some(op @ (Op::Pipe | Op::PipeAll)) = self.peek_op() {
            self.pos += 1;
            self.skip_newlines();
            self.expect_command(op)?;
            commands.push(self.parse_command()?);
        }
        Ok(Pipeline { commands })
    }

    fn expect_command(&self, after: Op) -> Result<(), ParseError> {
        match self.peek() {
            None => Err(ParseError::MissingCommand(after.symbol())),
            Some(Token::Op(Op::LParen)) | Some(Token::Word(_)) | Some(Token::Redirect(_)) => {
                Ok(())
            }
            Some(Token::Op(_)) => Err(ParseError::MissingCommand(after.symbol())),
        }
    }

    fn parse_command(&mut self) -> Result<Command, ParseError> {
        match self.peek() {
            Some(Token::Op(Op::LParen)) => {
                self.pos += 1;
                if self.depth >= MAX_SUBSHELL_DEPTH {
                    return Err(ParseError::TooDeep);
                }
                self.depth += 1;
                let body = self.parse_list(true)?;
                self.depth -= 1;
                if self.peek_op() != Some(Op::RParen) {
                    return Err(ParseError::UnclosedSubshell);
                }
                if body.is_empty() {
                    return Err(ParseError::UnexpectedToken(")"));
                }
                self.pos += 1;
                let redirects = self.collect_redirects();
                Ok(Command::Subshell { body, redirects })
            }
            Some(Token::Op(op)) => Err(ParseError::UnexpectedToken(op.symbol())),
            None => Err(ParseError::MissingCommand("start")),
            Some(_) => Ok(Command::Simple(self.parse_simple())),
        }
    }

    fn collect_redirects(&mut self) -> Vec<Redirect> {
        let mut redirects = Vec::new();
        while let Some(Token::Redirect(redirect)) = self.peek() {
            redirects.push(redirect.clone());
            self.pos += 1;
        }
        redirects
    }

    fn parse_simple(&mut self) -> SimpleCommand {
        let mut words = Vec::new();
        let mut redirects = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Word(word)) => words.push(word.clone()),
                Some(Token::Redirect(redirect)) => redirects.push(redirect.clone()),
                _ => break,
            }
            self.pos += 1;
        }
        SimpleCommand { words, redirects }
    }
}

/// True when `body` is one parenthesised group, so `$(` + body + `)` is
/// `$((...))` arithmetic. `$((a); (b))` is a command substitution whose
/// body starts with a subshell; quotes inside also mean commands.
fn is_single_group(body: &str) -> bool {
    if !body.starts_with('(') || !body.ends_with(')') {
        return false;
    }
    let mut depth = 0usize;
    for (i, c) in body.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i == body.len() - 1;
                }
            }
            '\'' | '"' | '`' | '\\' => return false,
            _ => {}
        }
    }
    false
}
