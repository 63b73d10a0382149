use std::fmt;
use std::path::Path;

use crate::error::ShellError;

/// One element of a command line after tokenizing and expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(String),
    /// `|`
    Pipe,
    /// `;`
    Sequence,
    /// `&`
    Background,
    /// `<`
    Input,
    /// `>`
    Output,
    /// `>>`
    Append,
}

impl Token {
    pub fn is_redirection(&self) -> bool {
        matches!(self, Token::Input | Token::Output | Token::Append)
    }

    pub fn as_word(&self) -> Option<&str> {
        match self {
            Token::Word(word) => Some(word),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Token::Word(word) => word,
            Token::Pipe => "|",
            Token::Sequence => ";",
            Token::Background => "&",
            Token::Input => "<",
            Token::Output => ">",
            Token::Append => ">>",
        })
    }
}

/// A word before expansion, remembering whether any part of it was quoted.
#[derive(Debug, Clone, PartialEq)]
struct RawWord {
    text: String,
    quoted: bool,
}

/// Operators remember their byte offset so segments can be cut from the input.
#[derive(Debug, Clone, PartialEq)]
enum Lexeme {
    Word(RawWord),
    Op(Token, usize),
}

/// One command between `;`/`&` separators, ready for the pipeline orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub tokens: Vec<Token>,
    /// The command as typed, quotes and wildcards included. Used as the job name.
    pub text: String,
    pub background: bool,
}

/// States for the tokenizer state machine.
enum State {
    /// Between tokens; whitespace is skipped
    Normal,
    /// Building a word until whitespace or an operator
    InWord,
    InDoubleQuote,
    InSingleQuote,
}

/// Tokenize, validate and expand one input line, then split it on `;` and `&`.
///
/// `~` (alone or followed by `/`) in an unquoted word becomes `home`; unquoted
/// words with wildcard characters are glob-expanded when they match anything.
/// Empty segments (from a trailing separator) are dropped.
pub fn parse_line(input: &str, home: &Path) -> Result<Vec<Segment>, ShellError> {
    let lexemes = lex(input)?;
    validate(&lexemes)?;

    let mut segments = Vec::new();
    let mut tokens = Vec::new();
    let mut start = 0;
    for lexeme in lexemes {
        match lexeme {
            Lexeme::Op(op @ (Token::Sequence | Token::Background), at) => {
                let background = op == Token::Background;
                push_segment(&mut segments, std::mem::take(&mut tokens), &input[start..at], background);
                start = at + 1;
            }
            Lexeme::Op(op, _) => tokens.push(op),
            Lexeme::Word(word) => tokens.extend(expand_word(word, home).into_iter().map(Token::Word)),
        }
    }
    push_segment(&mut segments, tokens, &input[start..], false);
    Ok(segments)
}

fn push_segment(segments: &mut Vec<Segment>, tokens: Vec<Token>, text: &str, background: bool) {
    if tokens.is_empty() {
        return;
    }
    segments.push(Segment {
        tokens,
        text: text.trim().to_string(),
        background,
    });
}

/// The command name of every pipeline stage on the line, in order. Used to keep
/// `log` invocations out of the history.
pub fn command_names(input: &str) -> Vec<String> {
    let Ok(lexemes) = lex(input) else {
        return Vec::new();
    };
    let mut names = Vec::new();
    let mut at_start = true;
    for lexeme in lexemes {
        match lexeme {
            Lexeme::Word(word) if at_start => {
                names.push(word.text);
                at_start = false;
            }
            Lexeme::Op(Token::Pipe | Token::Sequence | Token::Background, _) => at_start = true,
            _ => at_start = false,
        }
    }
    names
}

fn lex(input: &str) -> Result<Vec<Lexeme>, ShellError> {
    let mut lexemes = Vec::new();
    let mut current = RawWord {
        text: String::new(),
        quoted: false,
    };
    let mut state = State::Normal;
    let mut chars = input.char_indices().peekable();

    let finish_word = |current: &mut RawWord, lexemes: &mut Vec<Lexeme>| {
        lexemes.push(Lexeme::Word(std::mem::replace(
            current,
            RawWord {
                text: String::new(),
                quoted: false,
            },
        )));
    };

    while let Some((at, ch)) = chars.next() {
        match (&state, ch) {
            (State::InDoubleQuote, '"') | (State::InSingleQuote, '\'') => state = State::InWord,
            (State::InDoubleQuote | State::InSingleQuote, c) => current.text.push(c),

            (State::Normal | State::InWord, c) if c.is_whitespace() => {
                if matches!(state, State::InWord) {
                    finish_word(&mut current, &mut lexemes);
                }
                state = State::Normal;
            }
            (State::Normal | State::InWord, '|' | ';' | '&' | '<' | '>') => {
                if matches!(state, State::InWord) {
                    finish_word(&mut current, &mut lexemes);
                }
                let op = match ch {
                    '|' => Token::Pipe,
                    ';' => Token::Sequence,
                    '&' => Token::Background,
                    '<' => Token::Input,
                    _ if matches!(chars.peek(), Some((_, '>'))) => {
                        chars.next();
                        Token::Append
                    }
                    _ => Token::Output,
                };
                lexemes.push(Lexeme::Op(op, at));
                state = State::Normal;
            }
            (State::Normal | State::InWord, '"') => {
                current.quoted = true;
                state = State::InDoubleQuote;
            }
            (State::Normal | State::InWord, '\'') => {
                current.quoted = true;
                state = State::InSingleQuote;
            }
            (State::Normal | State::InWord, c) => {
                current.text.push(c);
                state = State::InWord;
            }
        }
    }

    match state {
        State::InDoubleQuote | State::InSingleQuote => Err(ShellError::InvalidSyntax),
        State::InWord => {
            finish_word(&mut current, &mut lexemes);
            Ok(lexemes)
        }
        State::Normal => Ok(lexemes),
    }
}

/// Every atomic command must start with a word, redirections need a filename,
/// a pipe must be followed by a command, and a separator may only be followed
/// by a command or end the line.
fn validate(lexemes: &[Lexeme]) -> Result<(), ShellError> {
    let mut at_start = true;
    let mut iter = lexemes.iter().peekable();

    while let Some(lexeme) = iter.next() {
        let next_is_word = matches!(iter.peek(), Some(Lexeme::Word(_)));
        match lexeme {
            Lexeme::Word(_) => at_start = false,
            Lexeme::Op(op, _) if op.is_redirection() => {
                if at_start || !next_is_word {
                    return Err(ShellError::InvalidSyntax);
                }
                iter.next();
            }
            Lexeme::Op(Token::Pipe, _) => {
                if at_start || !next_is_word {
                    return Err(ShellError::InvalidSyntax);
                }
                at_start = true;
            }
            Lexeme::Op(..) => {
                if at_start || matches!(iter.peek(), Some(Lexeme::Op(..))) {
                    return Err(ShellError::InvalidSyntax);
                }
                at_start = true;
            }
        }
    }
    Ok(())
}

fn expand_word(word: RawWord, home: &Path) -> Vec<String> {
    if word.quoted {
        return vec![word.text];
    }

    let text = expand_home(&word.text, home);
    if !text.contains(['*', '?', '[']) {
        return vec![text];
    }

    let matches: Vec<String> = match glob::glob(&text) {
        Ok(paths) => paths
            .filter_map(Result::ok)
            .map(|p| p.to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    if matches.is_empty() { vec![text] } else { matches }
}

fn expand_home(text: &str, home: &Path) -> String {
    match text.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => {
            format!("{}{rest}", home.display())
        }
        _ => text.to_string(),
    }
}
