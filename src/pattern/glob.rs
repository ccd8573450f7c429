//! Glob compilation and matching.
//!
//! A glob is compiled once into a forward-only instruction program and then
//! executed by a small backtracking VM. Every jump points forward, so the VM's
//! recursion depth is bounded by the program length, and failed
//! `(instruction, position)` states are memoized so matching stays polynomial
//! even for patterns like `*a*a*a*b`.
//!
//! Syntax:
//!
//! | syntax       | meaning                                                 |
//! |--------------|---------------------------------------------------------|
//! | `*`          | any run of characters within one path segment           |
//! | `**`         | as a whole segment: zero or more segments; else any run |
//! | `?`          | exactly one character other than `/`                    |
//! | `{a,b}`      | alternation, alternatives may use `*` and `?`           |
//! | `{name}`     | named capture of a `*` run                              |
//! | `{name=a,b}` | alternation captured as `name`                          |
//! | `\c`         | literal `c`, where `c` is one of `\ * ? { } , =`        |

use crate::error::ParseError;

use super::ast::MatchScope;

/// Escape character for glob expressions
pub const ESCAPE: char = '\\';

const ESCAPABLE: &[char] = &['\\', '*', '?', '{', '}', ',', '='];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Inst {
    /// Case-folded when the program is case-insensitive
    Literal(Vec<char>),
    AnyChar,
    /// Greedy run; `/` is only consumed when `cross_segments` is set
    AnyRun { cross_segments: bool },
    /// Zero or more complete `segment/` prefixes
    AnySegments,
    Split(usize, usize),
    Jump(usize),
    Save(usize),
    Match,
}

/// Piece of a brace alternative
#[derive(Debug, Clone)]
enum Piece {
    Char(char),
    AnyChar,
    AnyRun,
}

/// A compiled glob expression
#[derive(Debug, Clone)]
pub struct GlobProgram {
    source: String,
    insts: Vec<Inst>,
    capture_names: Vec<String>,
    case_sensitive: bool,
    scope: MatchScope,
    catch_all: bool,
}

impl GlobProgram {
    /// Compile a glob expression
    pub fn compile(raw: &str, case_sensitive: bool) -> Result<Self, ParseError> {
        if raw.trim().is_empty() {
            return Err(ParseError::EmptyExpression);
        }
        let mut compiler = Compiler {
            chars: raw.chars().collect(),
            insts: Vec::new(),
            capture_names: Vec::new(),
            case_sensitive,
        };
        compiler.compile()?;

        let insts = compiler.insts;
        let catch_all = is_catch_all(&insts);
        Ok(Self {
            source: raw.to_string(),
            insts,
            capture_names: compiler.capture_names,
            case_sensitive,
            scope: MatchScope::for_expression(raw),
            catch_all,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn scope(&self) -> MatchScope {
        self.scope
    }

    pub fn is_catch_all(&self) -> bool {
        self.catch_all
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn capture_names(&self) -> &[String] {
        &self.capture_names
    }

    /// Match `input` and return the named captures on success.
    ///
    /// Captures of alternation branches that did not participate are absent.
    pub fn captures(&self, input: &str) -> Option<Vec<(String, String)>> {
        let chars: Vec<char> = input.chars().collect();
        let mut vm = Vm {
            insts: &self.insts,
            input: &chars,
            case_sensitive: self.case_sensitive,
            failed: vec![false; self.insts.len() * (chars.len() + 1)],
            slots: vec![None; self.capture_names.len() * 2],
        };

        if !vm.run(0, 0) {
            return None;
        }

        let captures = self
            .capture_names
            .iter()
            .enumerate()
            .filter_map(|(i, name)| match (vm.slots[i * 2], vm.slots[i * 2 + 1]) {
                (Some(start), Some(end)) if start <= end => {
                    Some((name.clone(), chars[start..end].iter().collect()))
                }
                _ => None,
            })
            .collect();
        Some(captures)
    }

    pub fn is_match(&self, input: &str) -> bool {
        self.captures(input).is_some()
    }
}

fn is_catch_all(insts: &[Inst]) -> bool {
    let meaningful: Vec<&Inst> = insts
        .iter()
        .filter(|i| !matches!(i, Inst::Save(_) | Inst::Match))
        .collect();
    !meaningful.is_empty()
        && meaningful
            .iter()
            .all(|i| matches!(i, Inst::AnyRun { .. } | Inst::AnySegments))
        && matches!(meaningful.last(), Some(Inst::AnyRun { .. }))
}

fn fold(c: char) -> char {
    if c.is_ascii() {
        c.to_ascii_lowercase()
    } else {
        c.to_lowercase().next().unwrap_or(c)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

struct Compiler {
    chars: Vec<char>,
    insts: Vec<Inst>,
    capture_names: Vec<String>,
    case_sensitive: bool,
}

impl Compiler {
    fn compile(&mut self) -> Result<(), ParseError> {
        let len = self.chars.len();
        let mut i = 0;

        while i < len {
            match self.chars[i] {
                ESCAPE => {
                    let c = self.escaped(i)?;
                    self.push_char(c);
                    i += 2;
                }
                '*' => {
                    let mut j = i;
                    while j < len && self.chars[j] == '*' {
                        j += 1;
                    }
                    if j - i == 1 {
                        self.insts.push(Inst::AnyRun {
                            cross_segments: false,
                        });
                        i = j;
                        continue;
                    }
                    let at_segment_start = i == 0 || self.chars[i - 1] == '/';
                    if at_segment_start && j < len && self.chars[j] == '/' {
                        self.insts.push(Inst::AnySegments);
                        i = j + 1;
                    } else {
                        self.insts.push(Inst::AnyRun {
                            cross_segments: true,
                        });
                        i = j;
                    }
                }
                '?' => {
                    self.insts.push(Inst::AnyChar);
                    i += 1;
                }
                '{' => {
                    i = self.brace_group(i)?;
                }
                '}' => return Err(ParseError::syntax("unmatched '}'", i)),
                c => {
                    self.push_char(c);
                    i += 1;
                }
            }
        }

        self.insts.push(Inst::Match);
        Ok(())
    }

    /// Validate the escape at `i` and return the escaped character
    fn escaped(&self, i: usize) -> Result<char, ParseError> {
        match self.chars.get(i + 1) {
            Some(&c) if ESCAPABLE.contains(&c) => Ok(c),
            Some(&c) => Err(ParseError::InvalidEscape {
                sequence: format!("{}{}", ESCAPE, c),
                position: i,
            }),
            None => Err(ParseError::InvalidEscape {
                sequence: ESCAPE.to_string(),
                position: i,
            }),
        }
    }

    fn push_char(&mut self, c: char) {
        let c = if self.case_sensitive { c } else { fold(c) };
        if let Some(Inst::Literal(lit)) = self.insts.last_mut() {
            lit.push(c);
        } else {
            self.insts.push(Inst::Literal(vec![c]));
        }
    }

    /// Compile the brace group opening at `open`; returns the index after `}`
    fn brace_group(&mut self, open: usize) -> Result<usize, ParseError> {
        let mut close = None;
        let mut j = open + 1;
        while j < self.chars.len() {
            match self.chars[j] {
                ESCAPE => {
                    self.escaped(j)?;
                    j += 2;
                    continue;
                }
                '{' => return Err(ParseError::syntax("nested '{' is not supported", j)),
                '/' => return Err(ParseError::syntax("'/' is not allowed inside braces", j)),
                '}' => {
                    close = Some(j);
                    break;
                }
                _ => {}
            }
            j += 1;
        }
        let close = close.ok_or_else(|| ParseError::syntax("unclosed '{'", open))?;
        let content: String = self.chars[open + 1..close].iter().collect();

        if content.is_empty() {
            return Err(ParseError::syntax("empty group '{}'", open));
        }

        // {name}
        if is_identifier(&content) {
            let slot = self.declare_capture(&content, open)?;
            self.insts.push(Inst::Save(slot * 2));
            self.insts.push(Inst::AnyRun {
                cross_segments: false,
            });
            self.insts.push(Inst::Save(slot * 2 + 1));
            return Ok(close + 1);
        }

        // {name=a,b}
        let mut body_start = open + 1;
        let mut capture = None;
        if let Some(eq) = content.find('=') {
            let name = &content[..eq];
            if name.is_empty() {
                return Err(ParseError::syntax("empty capture name", open));
            }
            if is_identifier(name) {
                capture = Some(self.declare_capture(name, open)?);
                body_start = open + 1 + name.chars().count() + 1;
            }
        }

        let alternatives = self.alternatives(body_start, close)?;
        if let Some(slot) = capture {
            self.insts.push(Inst::Save(slot * 2));
        }
        self.emit_alternation(alternatives);
        if let Some(slot) = capture {
            self.insts.push(Inst::Save(slot * 2 + 1));
        }
        Ok(close + 1)
    }

    fn declare_capture(&mut self, name: &str, position: usize) -> Result<usize, ParseError> {
        if self.capture_names.iter().any(|n| n == name) {
            return Err(ParseError::syntax(
                format!("duplicate capture name '{}'", name),
                position,
            ));
        }
        self.capture_names.push(name.to_string());
        Ok(self.capture_names.len() - 1)
    }

    fn alternatives(&self, start: usize, end: usize) -> Result<Vec<Vec<Piece>>, ParseError> {
        let mut alternatives = vec![Vec::new()];
        let mut i = start;
        while i < end {
            let piece = match self.chars[i] {
                ESCAPE => {
                    let c = self.escaped(i)?;
                    i += 1;
                    Piece::Char(c)
                }
                ',' => {
                    alternatives.push(Vec::new());
                    i += 1;
                    continue;
                }
                '*' => {
                    while i + 1 < end && self.chars[i + 1] == '*' {
                        i += 1;
                    }
                    Piece::AnyRun
                }
                '?' => Piece::AnyChar,
                c => Piece::Char(c),
            };
            if let Some(current) = alternatives.last_mut() {
                current.push(piece);
            }
            i += 1;
        }
        Ok(alternatives)
    }

    fn emit_pieces(&mut self, pieces: Vec<Piece>) {
        for piece in pieces {
            match piece {
                Piece::Char(c) => self.push_char(c),
                Piece::AnyChar => self.insts.push(Inst::AnyChar),
                Piece::AnyRun => self.insts.push(Inst::AnyRun {
                    cross_segments: false,
                }),
            }
        }
    }

    /// Lay out `a|b|c` as split/jump chains that only ever jump forward
    fn emit_alternation(&mut self, alternatives: Vec<Vec<Piece>>) {
        let count = alternatives.len();
        let mut jumps = Vec::new();

        for (idx, pieces) in alternatives.into_iter().enumerate() {
            if idx + 1 < count {
                let split = self.insts.len();
                self.insts.push(Inst::Split(0, 0));
                // A fresh instruction keeps literals of different branches apart
                self.insts.push(Inst::Jump(split + 2));
                self.emit_pieces(pieces);
                jumps.push(self.insts.len());
                self.insts.push(Inst::Jump(0));
                let next = self.insts.len();
                self.insts[split] = Inst::Split(split + 1, next);
            } else {
                self.insts.push(Inst::Jump(self.insts.len() + 1));
                self.emit_pieces(pieces);
            }
        }

        // Branches rejoin at a no-op so following literals are not merged
        // into the last branch
        let end = self.insts.len();
        self.insts.push(Inst::Jump(end + 1));
        for jump in jumps {
            self.insts[jump] = Inst::Jump(end);
        }
    }
}

struct Vm<'a> {
    insts: &'a [Inst],
    input: &'a [char],
    case_sensitive: bool,
    /// `failed[pc * (len + 1) + pos]`; failure does not depend on slot state
    failed: Vec<bool>,
    slots: Vec<Option<usize>>,
}

impl Vm<'_> {
    fn run(&mut self, pc: usize, pos: usize) -> bool {
        let key = pc * (self.input.len() + 1) + pos;
        if self.failed[key] {
            return false;
        }

        let ok = match &self.insts[pc] {
            Inst::Match => pos == self.input.len(),
            Inst::Literal(lit) => self.literal_at(lit, pos) && self.run(pc + 1, pos + lit.len()),
            Inst::AnyChar => {
                pos < self.input.len() && self.input[pos] != '/' && self.run(pc + 1, pos + 1)
            }
            Inst::AnyRun { cross_segments } => {
                let max = if *cross_segments {
                    self.input.len()
                } else {
                    self.input[pos..]
                        .iter()
                        .position(|&c| c == '/')
                        .map_or(self.input.len(), |offset| pos + offset)
                };
                (pos..=max).rev().any(|end| self.run(pc + 1, end))
            }
            Inst::AnySegments => {
                let mut ends = vec![pos];
                ends.extend(
                    (pos..self.input.len())
                        .filter(|&i| self.input[i] == '/')
                        .map(|i| i + 1),
                );
                ends.into_iter().rev().any(|end| self.run(pc + 1, end))
            }
            Inst::Split(first, second) => {
                let (first, second) = (*first, *second);
                self.run(first, pos) || self.run(second, pos)
            }
            Inst::Jump(target) => self.run(*target, pos),
            Inst::Save(slot) => {
                let slot = *slot;
                let previous = self.slots[slot];
                self.slots[slot] = Some(pos);
                if self.run(pc + 1, pos) {
                    true
                } else {
                    self.slots[slot] = previous;
                    false
                }
            }
        };

        if !ok {
            self.failed[key] = true;
        }
        ok
    }

    fn literal_at(&self, lit: &[char], pos: usize) -> bool {
        if pos + lit.len() > self.input.len() {
            return false;
        }
        self.input[pos..pos + lit.len()]
            .iter()
            .zip(lit)
            .all(|(&c, &l)| if self.case_sensitive { c == l } else { fold(c) == l })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glob(raw: &str) -> GlobProgram {
        GlobProgram::compile(raw, true).unwrap()
    }

    fn capture(raw: &str, input: &str, name: &str) -> Option<String> {
        glob(raw)
            .captures(input)
            .and_then(|caps| caps.into_iter().find(|(n, _)| n == name).map(|(_, v)| v))
    }

    #[test]
    fn test_star_stays_in_segment() {
        let g = glob("*.jpg");
        assert!(g.is_match("photo.jpg"));
        assert!(g.is_match(".jpg"));
        assert!(!g.is_match("photo.png"));
        assert!(!g.is_match("dir/photo.jpg"));
    }

    #[test]
    fn test_question_mark() {
        let g = glob("IMG_????.jpg");
        assert!(g.is_match("IMG_0001.jpg"));
        assert!(!g.is_match("IMG_001.jpg"));
        assert!(!glob("a?b").is_match("a/b"));
    }

    #[test]
    fn test_double_star_segments() {
        let g = glob("a/**/b");
        assert!(g.is_match("a/b"));
        assert!(g.is_match("a/x/b"));
        assert!(g.is_match("a/x/y/b"));
        assert!(!g.is_match("a/xb"));
        assert!(!g.is_match("ab"));

        let g = glob("**/*.rs");
        assert!(g.is_match("main.rs"));
        assert!(g.is_match("src/pattern/glob.rs"));

        let g = glob("docs/**");
        assert!(g.is_match("docs/a/b.txt"));
        assert!(!g.is_match("other/a.txt"));
    }

    #[test]
    fn test_embedded_double_star_crosses_segments() {
        let g = glob("a**z");
        assert!(g.is_match("a/b/z"));
        assert!(g.is_match("az"));
    }

    #[test]
    fn test_alternation() {
        let g = glob("*.{jpg,jpeg,png}");
        assert!(g.is_match("a.jpg"));
        assert!(g.is_match("a.jpeg"));
        assert!(g.is_match("a.png"));
        assert!(!g.is_match("a.gif"));

        let g = glob("{a,b}c");
        assert!(g.is_match("ac"));
        assert!(g.is_match("bc"));
        assert!(!g.is_match("a"));

        let g = glob("{IMG,DSC}_*.{jp?g,heic}");
        assert!(g.is_match("DSC_1.jpeg"));
        assert!(g.is_match("IMG_2.heic"));
        assert!(!g.is_match("PXL_3.jpg"));
    }

    #[test]
    fn test_named_captures() {
        assert_eq!(capture("*.{ext}", "photo.jpg", "ext").as_deref(), Some("jpg"));
        // Greedy star leaves the last extension for the capture
        assert_eq!(capture("*.{ext}", "a.tar.gz", "ext").as_deref(), Some("gz"));
        assert_eq!(
            capture("{year}-{month}-*.pdf", "2024-03-invoice.pdf", "month").as_deref(),
            Some("03")
        );
        assert_eq!(
            capture("*.{kind=jpg,png}", "x.png", "kind").as_deref(),
            Some("png")
        );
    }

    #[test]
    fn test_case_insensitive() {
        let g = GlobProgram::compile("*.JPG", false).unwrap();
        assert!(g.is_match("photo.jpg"));
        assert!(g.is_match("PHOTO.Jpg"));
        // Captures keep the original spelling
        let g = GlobProgram::compile("{stem}.jpg", false).unwrap();
        let caps = g.captures("Holiday.JPG").unwrap();
        assert_eq!(caps, vec![("stem".to_string(), "Holiday".to_string())]);

        assert!(!glob("*.JPG").is_match("photo.jpg"));
    }

    #[test]
    fn test_escapes() {
        let g = glob(r"report\*.txt");
        assert!(g.is_match("report*.txt"));
        assert!(!g.is_match("report1.txt"));
        assert!(glob(r"\{draft\}*").is_match("{draft}notes"));

        let err = GlobProgram::compile(r"bad\q", true).unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidEscape {
                sequence: r"\q".to_string(),
                position: 3
            }
        );
        let err = GlobProgram::compile(r"trailing\", true).unwrap_err();
        assert!(matches!(err, ParseError::InvalidEscape { position: 8, .. }));
    }

    #[test]
    fn test_syntax_errors() {
        assert_eq!(
            GlobProgram::compile("", true).unwrap_err(),
            ParseError::EmptyExpression
        );
        assert_eq!(
            GlobProgram::compile("*.{jpg", true).unwrap_err(),
            ParseError::syntax("unclosed '{'", 2)
        );
        assert!(matches!(
            GlobProgram::compile("a}", true),
            Err(ParseError::InvalidSyntax { .. })
        ));
        assert!(matches!(
            GlobProgram::compile("{a,{b}}", true),
            Err(ParseError::InvalidSyntax { .. })
        ));
        assert_eq!(
            GlobProgram::compile("a{=b,c}", true).unwrap_err(),
            ParseError::syntax("empty capture name", 1)
        );
        assert!(matches!(
            GlobProgram::compile("{x}-{x}", true),
            Err(ParseError::InvalidSyntax { .. })
        ));
    }

    #[test]
    fn test_catch_all_detection() {
        assert!(glob("*").is_catch_all());
        assert!(glob("**").is_catch_all());
        assert!(glob("**/*").is_catch_all());
        assert!(glob("{anything}").is_catch_all());
        assert!(!glob("*.jpg").is_catch_all());
        assert!(!glob("a/**").is_catch_all());
    }

    #[test]
    fn test_pathological_pattern_terminates() {
        let g = glob("*a*a*a*a*a*a*a*b");
        let input = "a".repeat(200);
        assert!(!g.is_match(&input));
    }
}
