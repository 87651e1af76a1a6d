//! # Python Source Scanner Module
//!
//! Structural extraction of call expressions from Python source
//!
//! ## Key Components
//! - [`PySource::parse`] - Tokenize a file into call sites, or `None` when
//!   the source cannot be tracked (the caller then uses its regex fallback)
//! - [`CallSite`] - A call expression with its arguments and line number
//! - [`ArgValue`] - Literal argument values (strings, numbers, lists, dicts)

/// Python statement keywords that look like call heads but are not.
const PY_KEYWORDS: &[&str] = &[
    "if", "elif", "else", "for", "while", "return", "not", "and", "or", "in", "is", "with", "as",
    "def", "class", "try", "except", "finally", "raise", "assert", "del", "lambda", "yield",
    "import", "from", "pass", "break", "continue", "global", "nonlocal", "await", "async",
];

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Str(String),
    Number(f64),
    Ident(String),
    List(Vec<ArgValue>),
    Dict(Vec<(String, ArgValue)>),
    Other(String),
}

impl ArgValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Arg {
    pub keyword: Option<String>,
    pub value: ArgValue,
}

/// One call expression. `callee` is the last segment of the called name
/// (`autogen.AssistantAgent(...)` yields `AssistantAgent`); `target` is the
/// assignment target when the call is the right-hand side of `name = ...`.
#[derive(Debug, Clone)]
pub struct CallSite {
    pub callee: String,
    pub target: Option<String>,
    pub line: usize,
    pub args: Vec<Arg>,
}

impl CallSite {
    pub fn kwarg(&self, name: &str) -> Option<&ArgValue> {
        self.args
            .iter()
            .find(|arg| arg.keyword.as_deref() == Some(name))
            .map(|arg| &arg.value)
    }

    pub fn kwarg_str(&self, name: &str) -> Option<&str> {
        self.kwarg(name).and_then(ArgValue::as_str)
    }

    pub fn first_positional_str(&self) -> Option<&str> {
        self.args
            .iter()
            .find(|arg| arg.keyword.is_none())
            .and_then(|arg| arg.value.as_str())
    }
}

#[derive(Debug)]
pub struct PySource {
    calls: Vec<CallSite>,
}

impl PySource {
    pub fn calls(&self) -> &[CallSite] {
        &self.calls
    }

    /// Scan Python source into call sites. Returns `None` for source the
    /// scanner cannot track: unbalanced delimiters, an unterminated string,
    /// or a newline inside a single-quoted string.
    pub fn parse(content: &str) -> Option<PySource> {
        Scanner::new(content).run()
    }
}

enum Bracket {
    Plain,
    /// A paren opening the argument list of a tracked call.
    Call,
}

struct OpenCall {
    callee: String,
    target: Option<String>,
    line: usize,
    args_start: usize,
}

struct Scanner {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    line_start: usize,
    brackets: Vec<Bracket>,
    open_calls: Vec<OpenCall>,
    calls: Vec<CallSite>,
}

impl Scanner {
    fn new(content: &str) -> Self {
        Self {
            chars: content.chars().collect(),
            pos: 0,
            line: 1,
            line_start: 0,
            brackets: Vec::new(),
            open_calls: Vec::new(),
            calls: Vec::new(),
        }
    }

    fn run(mut self) -> Option<PySource> {
        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];
            match c {
                '#' => self.skip_comment(),
                '\'' | '"' => self.skip_string()?,
                '\n' => {
                    self.pos += 1;
                    self.line += 1;
                    self.line_start = self.pos;
                }
                '(' => {
                    self.brackets.push(Bracket::Plain);
                    self.pos += 1;
                }
                '[' | '{' => {
                    self.brackets.push(Bracket::Plain);
                    self.pos += 1;
                }
                ')' | ']' | '}' => {
                    let bracket = self.brackets.pop()?;
                    if let Bracket::Call = bracket {
                        let call = self.open_calls.pop()?;
                        let span: String =
                            self.chars[call.args_start..self.pos].iter().collect();
                        self.calls.push(CallSite {
                            callee: call.callee,
                            target: call.target,
                            line: call.line,
                            args: parse_args(&span),
                        });
                    }
                    self.pos += 1;
                }
                c if c.is_alphabetic() || c == '_' => self.read_identifier(),
                _ => self.pos += 1,
            }
        }

        // Anything left open means the source is malformed
        if self.brackets.is_empty() && self.open_calls.is_empty() {
            Some(PySource { calls: self.calls })
        } else {
            None
        }
    }

    fn skip_comment(&mut self) {
        while self.pos < self.chars.len() && self.chars[self.pos] != '\n' {
            self.pos += 1;
        }
    }

    /// Skip a string literal starting at the current quote char. Handles
    /// triple quotes and escapes; `None` when unterminated.
    fn skip_string(&mut self) -> Option<()> {
        let quote = self.chars[self.pos];
        let triple = self.peek_is(1, quote) && self.peek_is(2, quote);

        if triple {
            self.pos += 3;
            loop {
                if self.pos >= self.chars.len() {
                    return None;
                }
                let c = self.chars[self.pos];
                if c == '\\' {
                    self.pos += 2;
                    continue;
                }
                if c == '\n' {
                    self.line += 1;
                    self.line_start = self.pos + 1;
                }
                if c == quote && self.peek_is(1, quote) && self.peek_is(2, quote) {
                    self.pos += 3;
                    return Some(());
                }
                self.pos += 1;
            }
        } else {
            self.pos += 1;
            loop {
                if self.pos >= self.chars.len() {
                    return None;
                }
                let c = self.chars[self.pos];
                match c {
                    '\\' => self.pos += 2,
                    // Raw newline in a single-quoted string: malformed
                    '\n' => return None,
                    c if c == quote => {
                        self.pos += 1;
                        return Some(());
                    }
                    _ => self.pos += 1,
                }
            }
        }
    }

    fn peek_is(&self, offset: usize, expected: char) -> bool {
        self.chars.get(self.pos + offset) == Some(&expected)
    }

    /// Read a (possibly dotted) identifier; when it heads a call
    /// expression, open a call frame for it.
    fn read_identifier(&mut self) {
        let ident_start = self.pos;
        let mut last_segment_start = self.pos;

        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];
            if c.is_alphanumeric() || c == '_' {
                self.pos += 1;
            } else if c == '.'
                && self
                    .chars
                    .get(self.pos + 1)
                    .is_some_and(|n| n.is_alphabetic() || *n == '_')
            {
                self.pos += 1;
                last_segment_start = self.pos;
            } else {
                break;
            }
        }

        // Identifier directly followed by a quote is a string prefix
        // (f"...", r'...'); the string branch handles what follows.
        if matches!(self.chars.get(self.pos).copied(), Some('\'' | '"')) {
            return;
        }

        let callee: String = self.chars[last_segment_start..self.pos].iter().collect();
        let full_name: String = self.chars[ident_start..self.pos].iter().collect();

        // Allow spaces between the name and its argument list
        let mut lookahead = self.pos;
        while matches!(self.chars.get(lookahead).copied(), Some(' ' | '\t')) {
            lookahead += 1;
        }

        // `def name(...)` and `class Name(...)` head definitions, not calls
        let prefix: String = self.chars[self.line_start..ident_start].iter().collect();
        let is_definition = matches!(
            prefix.split_whitespace().last(),
            Some("def") | Some("class")
        );

        if self.chars.get(lookahead) == Some(&'(')
            && !is_definition
            && !PY_KEYWORDS.contains(&full_name.as_str())
        {
            let target = self.assignment_target(ident_start);
            self.open_calls.push(OpenCall {
                callee,
                target,
                line: self.line,
                args_start: lookahead + 1,
            });
            self.brackets.push(Bracket::Call);
            self.pos = lookahead + 1;
        }
    }

    /// `name = Callee(...)` target, read from the text between the line
    /// start and the callee.
    fn assignment_target(&self, ident_start: usize) -> Option<String> {
        let prefix: String = self.chars[self.line_start..ident_start].iter().collect();
        let trimmed = prefix.trim();
        let (name, rest) = trimmed.split_once('=')?;
        let name = name.trim();
        if rest.trim().is_empty()
            && !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_')
            && !name.starts_with(|c: char| c.is_numeric())
        {
            Some(name.to_string())
        } else {
            None
        }
    }
}

/// Split an argument span on top-level commas and parse each piece.
fn parse_args(span: &str) -> Vec<Arg> {
    split_top_level(span, ',')
        .into_iter()
        .filter(|piece| !piece.trim().is_empty())
        .map(parse_arg)
        .collect()
}

fn parse_arg(piece: String) -> Arg {
    let trimmed = piece.trim();

    // keyword=value, rejecting comparison operators
    let mut ident_end = 0;
    for (idx, c) in trimmed.char_indices() {
        if c.is_alphanumeric() || c == '_' {
            ident_end = idx + c.len_utf8();
        } else {
            break;
        }
    }

    if ident_end > 0 && !trimmed.starts_with(|c: char| c.is_numeric()) {
        let rest = trimmed[ident_end..].trim_start();
        if let Some(value) = rest.strip_prefix('=') {
            if !value.starts_with('=') {
                return Arg {
                    keyword: Some(trimmed[..ident_end].to_string()),
                    value: parse_value(value.trim()),
                };
            }
        }
    }

    Arg {
        keyword: None,
        value: parse_value(trimmed),
    }
}

fn parse_value(text: &str) -> ArgValue {
    let text = text.trim();

    if let Some(parsed) = parse_string_literal(text) {
        return ArgValue::Str(parsed);
    }

    if let Ok(number) = text.parse::<f64>() {
        return ArgValue::Number(number);
    }

    if let Some(inner) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        let items = split_top_level(inner, ',')
            .into_iter()
            .filter(|piece| !piece.trim().is_empty())
            .map(|piece| parse_value(&piece))
            .collect();
        return ArgValue::List(items);
    }

    if let Some(inner) = text.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
        let entries = split_top_level(inner, ',')
            .into_iter()
            .filter_map(|item| {
                let (key, value) = split_once_top_level(&item, ':')?;
                let key = match parse_value(key.trim()) {
                    ArgValue::Str(s) => s,
                    _ => key.trim().to_string(),
                };
                Some((key, parse_value(value.trim())))
            })
            .collect();
        return ArgValue::Dict(entries);
    }

    let is_ident = !text.is_empty()
        && !text.starts_with(|c: char| c.is_numeric())
        && text.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.');
    if is_ident {
        return ArgValue::Ident(text.to_string());
    }

    ArgValue::Other(text.to_string())
}

/// Parse a Python string literal (with optional r/b/f/u prefix) into its
/// value; `None` when the text is not a single string literal.
fn parse_string_literal(text: &str) -> Option<String> {
    let mut rest = text;
    let mut raw = false;

    let prefix: String = rest
        .chars()
        .take_while(|c| c.is_alphabetic())
        .take(2)
        .collect();
    if !prefix.is_empty() {
        if prefix.chars().all(|c| "rRbBuUfF".contains(c)) {
            raw = prefix.chars().any(|c| c == 'r' || c == 'R');
            rest = &rest[prefix.len()..];
        } else {
            return None;
        }
    }

    let quote = rest.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let (body, closer_len) = if rest.len() >= 6 && rest.starts_with(&quote.to_string().repeat(3)) {
        (&rest[3..], 3)
    } else {
        (&rest[1..], 1)
    };

    let closer = quote.to_string().repeat(closer_len);
    let end = find_unescaped(body, &closer, raw)?;

    // Anything after the closing quote means this is not a plain literal
    if !body[end + closer_len..].trim().is_empty() {
        return None;
    }

    let inner = &body[..end];
    Some(if raw {
        inner.to_string()
    } else {
        unescape(inner)
    })
}

fn find_unescaped(body: &str, closer: &str, raw: bool) -> Option<usize> {
    let mut iter = body.char_indices();
    while let Some((i, c)) = iter.next() {
        if !raw && c == '\\' {
            iter.next();
            continue;
        }
        if body[i..].starts_with(closer) {
            return Some(i);
        }
    }
    None
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('\n') => {} // line continuation
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Split on a separator at nesting depth zero, respecting strings,
/// brackets and comments.
fn split_top_level(span: &str, separator: char) -> Vec<String> {
    let chars: Vec<char> = span.chars().collect();
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '\'' | '"' => {
                let quote = c;
                let triple = chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote);
                let closer_len = if triple { 3 } else { 1 };
                current.extend(std::iter::repeat_n(quote, closer_len));
                i += closer_len;
                while i < chars.len() {
                    if chars[i] == '\\' {
                        current.push(chars[i]);
                        if let Some(&next) = chars.get(i + 1) {
                            current.push(next);
                        }
                        i += 2;
                        continue;
                    }
                    if chars[i] == quote
                        && (!triple
                            || (chars.get(i + 1) == Some(&quote)
                                && chars.get(i + 2) == Some(&quote)))
                    {
                        current.extend(std::iter::repeat_n(quote, closer_len));
                        i += closer_len;
                        break;
                    }
                    current.push(chars[i]);
                    i += 1;
                }
            }
            '(' | '[' | '{' => {
                depth += 1;
                current.push(c);
                i += 1;
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
                i += 1;
            }
            c if c == separator && depth == 0 => {
                pieces.push(std::mem::take(&mut current));
                i += 1;
            }
            _ => {
                current.push(c);
                i += 1;
            }
        }
    }

    if !current.trim().is_empty() {
        pieces.push(current);
    }
    pieces
}

fn split_once_top_level(span: &str, separator: char) -> Option<(String, String)> {
    let mut pieces = split_top_level(span, separator);
    if pieces.len() < 2 {
        return None;
    }
    let first = pieces.remove(0);
    Some((first, pieces.join(&separator.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_call_with_kwargs() {
        let source = r#"
agent = AssistantAgent(
    name="researcher",
    system_message="You classify incoming documents",
    llm_config={"model": "gpt-4", "temperature": 0.2},
)
"#;
        let parsed = PySource::parse(source).expect("parses");
        let call = &parsed.calls()[0];

        assert_eq!(call.callee, "AssistantAgent");
        assert_eq!(call.target.as_deref(), Some("agent"));
        assert_eq!(call.line, 2);
        assert_eq!(call.kwarg_str("name"), Some("researcher"));
        assert_eq!(
            call.kwarg_str("system_message"),
            Some("You classify incoming documents")
        );

        match call.kwarg("llm_config") {
            Some(ArgValue::Dict(entries)) => {
                assert_eq!(entries[0].0, "model");
                assert_eq!(entries[0].1.as_str(), Some("gpt-4"));
            }
            other => panic!("expected dict, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_calls_all_found() {
        let source = "chain = LLMChain(llm=ChatOpenAI(model=\"gpt-4\"), prompt=prompt)\n";
        let parsed = PySource::parse(source).expect("parses");
        let callees: Vec<&str> = parsed.calls().iter().map(|c| c.callee.as_str()).collect();

        // Inner call closes first
        assert_eq!(callees, vec!["ChatOpenAI", "LLMChain"]);

        let chain = parsed.calls().iter().find(|c| c.callee == "LLMChain").unwrap();
        assert_eq!(chain.target.as_deref(), Some("chain"));
        // Nested call is not a plain identifier value
        assert!(matches!(chain.kwarg("llm"), Some(ArgValue::Other(_))));
        assert!(matches!(chain.kwarg("prompt"), Some(ArgValue::Ident(_))));
    }

    #[test]
    fn test_dotted_callee_uses_last_segment() {
        let source = "client = openai.ChatCompletion(model=\"gpt-4\")\n";
        let parsed = PySource::parse(source).expect("parses");
        assert_eq!(parsed.calls()[0].callee, "ChatCompletion");
    }

    #[test]
    fn test_triple_quoted_system_message() {
        let source = "a = AssistantAgent(system_message=\"\"\"Summarize the\nreport body\"\"\")\n";
        let parsed = PySource::parse(source).expect("parses");
        assert_eq!(
            parsed.calls()[0].kwarg_str("system_message"),
            Some("Summarize the\nreport body")
        );
    }

    #[test]
    fn test_positional_string_and_list() {
        let source = "gc = GroupChat(agents=[alice, bob, carol], messages=[])\n";
        let parsed = PySource::parse(source).expect("parses");
        let call = &parsed.calls()[0];

        match call.kwarg("agents") {
            Some(ArgValue::List(items)) => assert_eq!(items.len(), 3),
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn test_string_prefix_is_not_a_call() {
        let source = "msg = f\"hello {name}\"\nx = fn(1)\n";
        let parsed = PySource::parse(source).expect("parses");
        assert_eq!(parsed.calls().len(), 1);
        assert_eq!(parsed.calls()[0].callee, "fn");
    }

    #[test]
    fn test_keywords_are_not_calls() {
        let source = "if (x):\n    while (y):\n        run(x)\n";
        let parsed = PySource::parse(source).expect("parses");
        assert_eq!(parsed.calls().len(), 1);
        assert_eq!(parsed.calls()[0].callee, "run");
    }

    #[test]
    fn test_definitions_are_not_calls() {
        let source = "\
def create_research_agent(llm):
    return initialize_agent(llm)

class ReviewAgent(BaseAgent):
    def run(self, task):
        return self.step(task)
";
        let parsed = PySource::parse(source).expect("parses");
        let callees: Vec<&str> = parsed.calls().iter().map(|c| c.callee.as_str()).collect();

        assert_eq!(callees, vec!["initialize_agent", "step"]);
    }

    #[test]
    fn test_unbalanced_source_fails() {
        assert!(PySource::parse("agent = AssistantAgent(name=\"x\"\n").is_none());
        assert!(PySource::parse("x = foo)\n").is_none());
        assert!(PySource::parse("s = \"unterminated\n").is_none());
    }

    #[test]
    fn test_comment_inside_call() {
        let source = "a = Tool(\n    name=\"search\",  # web search\n    func=run,\n)\n";
        let parsed = PySource::parse(source).expect("parses");
        assert_eq!(parsed.calls()[0].kwarg_str("name"), Some("search"));
        assert_eq!(parsed.calls()[0].args.len(), 2);
    }
}
