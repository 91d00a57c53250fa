//! Shader source preprocessor
//!
//! Resolves `#include<name>` directives (with `[a..b]` repetition and `{X}`
//! index substitution) and evaluates `#define`/`#ifdef`/`#if` blocks so the
//! backend only ever sees plain WGSL.

use std::collections::{BTreeMap, HashMap};

use crate::error::{EngineError, Result};

const MAX_INCLUDE_DEPTH: usize = 16;

/// Define table: name to optional value
pub type DefineMap = BTreeMap<String, Option<String>>;

/// Inputs for one processing run
pub struct ProcessingOptions<'a> {
    pub source_name: &'a str,
    /// `#define` lines injected ahead of the source
    pub defines: &'a str,
    pub index_parameters: &'a HashMap<String, i64>,
    pub includes: &'a dyn Fn(&str) -> Option<String>,
}

/// Output of the preprocessor
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedShader {
    pub code: String,
    /// Every define active at the end of the source
    pub defines: DefineMap,
}

impl ProcessedShader {
    /// Defines whose value is numeric, emitted as WGSL constants
    pub fn numeric_defines(&self) -> impl Iterator<Item = (&str, &str)> {
        self.defines.iter().filter_map(|(name, value)| {
            value
                .as_deref()
                .filter(|v| v.parse::<f64>().is_ok())
                .map(|v| (name.as_str(), v))
        })
    }
}

/// Parses `#define NAME [value]` lines into a define table
pub fn parse_defines(text: &str) -> DefineMap {
    let mut defines = DefineMap::new();
    for line in text.lines() {
        if let Some(rest) = line.trim().strip_prefix("#define") {
            insert_define(&mut defines, rest);
        }
    }
    defines
}

fn insert_define(defines: &mut DefineMap, rest: &str) {
    let mut parts = rest.trim().splitn(2, char::is_whitespace);
    if let Some(name) = parts.next().filter(|n| !n.is_empty()) {
        let value = parts
            .next()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        defines.insert(name.to_string(), value);
    }
}

/// Runs includes and conditional evaluation over `source`
pub fn process(source: &str, options: &ProcessingOptions<'_>) -> Result<ProcessedShader> {
    let mut preprocessor = Preprocessor {
        options,
        defines: parse_defines(options.defines),
        stack: Vec::new(),
        output: String::with_capacity(source.len()),
    };
    preprocessor.run(source, 0)?;
    if !preprocessor.stack.is_empty() {
        return Err(preprocessor.error("missing #endif"));
    }
    let code = substitute_index_parameters(&preprocessor.output, options.index_parameters);
    Ok(ProcessedShader {
        code,
        defines: preprocessor.defines,
    })
}

fn preprocess_error(source_name: &str, message: impl Into<String>) -> EngineError {
    EngineError::ShaderPreprocess {
        source_name: source_name.to_string(),
        message: message.into(),
    }
}

fn substitute_index_parameters(code: &str, index_parameters: &HashMap<String, i64>) -> String {
    let mut code = code.to_string();
    for (name, value) in index_parameters {
        code = code.replace(&format!("{{{}}}", name), &value.to_string());
    }
    code
}

struct IncludeDirective<'l> {
    name: &'l str,
    range: Option<(&'l str, Option<&'l str>)>,
    replacements: Vec<(&'l str, &'l str)>,
}

fn parse_include(line: &str) -> Option<IncludeDirective<'_>> {
    let rest = line.trim().strip_prefix("#include<")?;
    let close = rest.find('>')?;
    let name = &rest[..close];
    let mut tail = rest[close + 1..].trim();

    let mut replacements = Vec::new();
    if let Some(args) = tail.strip_prefix('(') {
        let end = args.find(')')?;
        let list: Vec<&str> = args[..end].split(',').map(str::trim).collect();
        for pair in list.chunks(2) {
            if let [from, to] = pair {
                replacements.push((*from, *to));
            }
        }
        tail = args[end + 1..].trim();
    }

    let range = match tail.strip_prefix('[') {
        Some(inner) => {
            let end = inner.find(']')?;
            let inner = &inner[..end];
            Some(match inner.split_once("..") {
                Some((start, stop)) => (start.trim(), Some(stop.trim())),
                None => (inner.trim(), None),
            })
        }
        None => None,
    };

    Some(IncludeDirective {
        name,
        range,
        replacements,
    })
}

#[derive(Debug)]
struct Branch {
    parent_active: bool,
    taken: bool,
    active: bool,
}

/// Single pass over the source: conditionals are evaluated as lines are
/// read, so includes and their index bounds see every define in effect at
/// that point and includes inside inactive blocks are never fetched
struct Preprocessor<'o, 'a> {
    options: &'o ProcessingOptions<'a>,
    defines: DefineMap,
    stack: Vec<Branch>,
    output: String,
}

impl Preprocessor<'_, '_> {
    fn error(&self, message: impl Into<String>) -> EngineError {
        preprocess_error(self.options.source_name, message)
    }

    fn active(&self) -> bool {
        self.stack.last().map(|b| b.active).unwrap_or(true)
    }

    fn push_branch(&mut self, cond: bool) {
        let active = self.active();
        self.stack.push(Branch {
            parent_active: active,
            taken: cond,
            active: active && cond,
        });
    }

    /// Handles `#if`-family lines; false when `trimmed` is not one
    fn conditional(&mut self, trimmed: &str) -> Result<bool> {
        if let Some(rest) = trimmed.strip_prefix("#ifdef") {
            let cond = self.defines.contains_key(rest.trim());
            self.push_branch(cond);
        } else if let Some(rest) = trimmed.strip_prefix("#ifndef") {
            let cond = !self.defines.contains_key(rest.trim());
            self.push_branch(cond);
        } else if let Some(rest) = trimmed.strip_prefix("#if") {
            // Conditions under an inactive parent are never evaluated
            let cond = self.active()
                && evaluate_expression(rest, &self.defines, self.options.source_name)?;
            self.push_branch(cond);
        } else if let Some(rest) = trimmed.strip_prefix("#elif") {
            let Some(branch) = self.stack.last() else {
                return Err(self.error("#elif without #if"));
            };
            let cond = branch.parent_active
                && !branch.taken
                && evaluate_expression(rest, &self.defines, self.options.source_name)?;
            if let Some(branch) = self.stack.last_mut() {
                branch.active = branch.parent_active && cond;
                branch.taken |= cond;
            }
        } else if trimmed.starts_with("#else") {
            let Some(branch) = self.stack.last_mut() else {
                return Err(self.error("#else without #if"));
            };
            branch.active = branch.parent_active && !branch.taken;
            branch.taken = true;
        } else if trimmed.starts_with("#endif") {
            if self.stack.pop().is_none() {
                return Err(self.error("#endif without #if"));
            }
        } else {
            return Ok(false);
        }
        Ok(true)
    }

    fn run(&mut self, source: &str, depth: usize) -> Result<()> {
        if depth > MAX_INCLUDE_DEPTH {
            return Err(self.error("include nesting is too deep"));
        }
        for line in source.lines() {
            let trimmed = line.trim();
            if self.conditional(trimmed)? || !self.active() {
                continue;
            }
            if let Some(directive) = parse_include(line) {
                self.include(&directive, depth)?;
            } else if let Some(rest) = trimmed.strip_prefix("#define") {
                insert_define(&mut self.defines, rest);
            } else if let Some(rest) = trimmed.strip_prefix("#undef") {
                self.defines.remove(rest.trim());
            } else if !trimmed.starts_with("#extension") {
                self.output.push_str(line);
                self.output.push('\n');
            }
        }
        Ok(())
    }

    fn include(&mut self, directive: &IncludeDirective<'_>, depth: usize) -> Result<()> {
        let mut body = (self.options.includes)(directive.name)
            .ok_or_else(|| EngineError::UnknownInclude(directive.name.to_string()))?;
        for (from, to) in &directive.replacements {
            body = body.replace(from, to);
        }
        match directive.range {
            None => self.run(&body, depth + 1),
            Some((start, None)) => {
                let index = self.resolve_index(start)?;
                self.run(&body.replace("{X}", &index.to_string()), depth + 1)
            }
            Some((start, Some(stop))) => {
                let start = self.resolve_index(start)?;
                let stop = self.resolve_index(stop)?;
                for index in start..stop {
                    self.run(&body.replace("{X}", &index.to_string()), depth + 1)?;
                }
                Ok(())
            }
        }
    }

    fn resolve_index(&self, token: &str) -> Result<i64> {
        if let Ok(value) = token.parse::<i64>() {
            return Ok(value);
        }
        if let Some(value) = self.options.index_parameters.get(token) {
            return Ok(*value);
        }
        self.defines
            .get(token)
            .and_then(|v| v.as_deref())
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or_else(|| self.error(format!("cannot resolve include index '{}'", token)))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Op(&'static str),
    LParen,
    RParen,
}

fn tokenize(expr: &str, source_name: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let value = text
                .parse::<f64>()
                .map_err(|_| preprocess_error(source_name, format!("bad number '{}'", text)))?;
            tokens.push(Token::Number(value));
        } else if c == '(' {
            tokens.push(Token::LParen);
            i += 1;
        } else if c == ')' {
            tokens.push(Token::RParen);
            i += 1;
        } else {
            let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
            let op = match two.as_str() {
                "&&" => Some("&&"),
                "||" => Some("||"),
                "==" => Some("=="),
                "!=" => Some("!="),
                ">=" => Some(">="),
                "<=" => Some("<="),
                _ => None,
            };
            if let Some(op) = op {
                tokens.push(Token::Op(op));
                i += 2;
                continue;
            }
            let op = match c {
                '!' => "!",
                '>' => ">",
                '<' => "<",
                _ => {
                    return Err(preprocess_error(
                        source_name,
                        format!("unexpected '{}' in condition", c),
                    ))
                }
            };
            tokens.push(Token::Op(op));
            i += 1;
        }
    }
    Ok(tokens)
}

struct ExpressionParser<'d> {
    tokens: Vec<Token>,
    pos: usize,
    defines: &'d DefineMap,
    source_name: &'d str,
}

impl ExpressionParser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn error(&self, message: &str) -> EngineError {
        preprocess_error(self.source_name, message)
    }

    fn or_expr(&mut self) -> Result<bool> {
        let mut value = self.and_expr()?;
        while self.peek() == Some(&Token::Op("||")) {
            self.pos += 1;
            let rhs = self.and_expr()?;
            value = value || rhs;
        }
        Ok(value)
    }

    fn and_expr(&mut self) -> Result<bool> {
        let mut value = self.unary()?;
        while self.peek() == Some(&Token::Op("&&")) {
            self.pos += 1;
            let rhs = self.unary()?;
            value = value && rhs;
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<bool> {
        if self.peek() == Some(&Token::Op("!")) {
            self.pos += 1;
            return Ok(!self.unary()?);
        }
        self.primary()
    }

    fn numeric_value(&self, name: &str) -> Option<f64> {
        match self.defines.get(name) {
            Some(Some(value)) => value.parse::<f64>().ok(),
            Some(None) => Some(1.0),
            None => None,
        }
    }

    fn primary(&mut self) -> Result<bool> {
        match self.next() {
            Some(Token::LParen) => {
                let value = self.or_expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err(self.error("expected ')'")),
                }
            }
            Some(Token::Ident(name)) if name == "defined" => {
                let parenthesized = self.peek() == Some(&Token::LParen);
                if parenthesized {
                    self.pos += 1;
                }
                let Some(Token::Ident(target)) = self.next() else {
                    return Err(self.error("expected identifier after defined"));
                };
                if parenthesized && self.next() != Some(Token::RParen) {
                    return Err(self.error("expected ')' after defined"));
                }
                Ok(self.defines.contains_key(&target))
            }
            Some(Token::Ident(name)) => {
                let lhs = self.numeric_value(&name);
                if let Some(Token::Op(op)) = self.peek().cloned() {
                    if matches!(op, "==" | "!=" | ">" | "<" | ">=" | "<=") {
                        self.pos += 1;
                        let rhs = match self.next() {
                            Some(Token::Number(n)) => Some(n),
                            Some(Token::Ident(other)) => self.numeric_value(&other),
                            _ => return Err(self.error("expected operand")),
                        };
                        let (Some(lhs), Some(rhs)) = (lhs, rhs) else {
                            return Ok(false);
                        };
                        return Ok(match op {
                            "==" => lhs == rhs,
                            "!=" => lhs != rhs,
                            ">" => lhs > rhs,
                            "<" => lhs < rhs,
                            ">=" => lhs >= rhs,
                            _ => lhs <= rhs,
                        });
                    }
                }
                Ok(lhs.is_some_and(|v| v != 0.0))
            }
            Some(Token::Number(n)) => Ok(n != 0.0),
            _ => Err(self.error("malformed condition")),
        }
    }
}

fn evaluate_expression(expr: &str, defines: &DefineMap, source_name: &str) -> Result<bool> {
    let tokens = tokenize(expr, source_name)?;
    let mut parser = ExpressionParser {
        tokens,
        pos: 0,
        defines,
        source_name,
    };
    let value = parser.or_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error("trailing tokens in condition"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str, defines: &str) -> Result<String> {
        let params = HashMap::from([("maxLights".to_string(), 3)]);
        let includes = |name: &str| match name {
            "light" => Some("light{X};".to_string()),
            "outer" => Some("#include<light>[0..2]".to_string()),
            "decl" => Some("#ifdef PREPASS\n@location({X}) mrt{X}: vec4<f32>,\n#endif".to_string()),
            "swap" => Some("uniform_A".to_string()),
            _ => None,
        };
        let options = ProcessingOptions {
            source_name: "test",
            defines,
            index_parameters: &params,
            includes: &includes,
        };
        process(source, &options).map(|p| p.code)
    }

    #[test]
    fn test_ifdef_else() {
        let src = "#ifdef A\na\n#else\nb\n#endif\n";
        assert_eq!(run(src, "#define A\n").unwrap(), "a\n");
        assert_eq!(run(src, "").unwrap(), "b\n");
    }

    #[test]
    fn test_nested_and_elif() {
        let src = "#if defined(A) && !defined(B)\none\n#elif N > 2\ntwo\n#else\nthree\n#endif\n";
        assert_eq!(run(src, "#define A\n").unwrap(), "one\n");
        assert_eq!(run(src, "#define A\n#define B\n#define N 3\n").unwrap(), "two\n");
        assert_eq!(run(src, "#define N 1\n").unwrap(), "three\n");
    }

    #[test]
    fn test_inactive_parent_hides_else() {
        let src = "#ifdef A\n#ifdef B\nb\n#else\nnot_b\n#endif\n#endif\n";
        assert_eq!(run(src, "").unwrap(), "");
        assert_eq!(run(src, "#define A\n").unwrap(), "not_b\n");
    }

    #[test]
    fn test_include_ranges() {
        assert_eq!(run("#include<light>[0..maxLights]", "").unwrap(), "light0;\nlight1;\nlight2;\n");
        assert_eq!(run("#include<light>[5]", "").unwrap(), "light5;\n");
        assert_eq!(run("#include<outer>", "").unwrap(), "light0;\nlight1;\n");
    }

    #[test]
    fn test_include_bounds_from_source_defines() {
        let src = "#define COUNT 2\n#include<light>[0..COUNT]\n";
        assert_eq!(run(src, "").unwrap(), "light0;\nlight1;\n");
        let src = "#undef COUNT\n#define COUNT 1\n#include<light>[0..COUNT]\n";
        assert_eq!(run(src, "#define COUNT 4\n").unwrap(), "light0;\n");
    }

    #[test]
    fn test_inactive_includes_are_skipped() {
        let src = "#ifdef MISSING\n#include<missing>\n#include<light>[0..UNKNOWN]\n#endif\nok\n";
        assert_eq!(run(src, "").unwrap(), "ok\n");
        let src = "#ifdef A\n#include<light>[0..2]\n#else\n#include<swap>\n#endif\n";
        assert_eq!(run(src, "").unwrap(), "uniform_A\n");
        assert!(matches!(run(src.replace("swap", "missing").as_str(), ""), Err(EngineError::UnknownInclude(_))));
    }

    #[test]
    fn test_include_uses_define_bounds() {
        let out = run("#include<decl>[1..SCENE_MRT_COUNT]", "#define PREPASS\n#define SCENE_MRT_COUNT 3\n").unwrap();
        assert_eq!(out, "@location(1) mrt1: vec4<f32>,\n@location(2) mrt2: vec4<f32>,\n");
    }

    #[test]
    fn test_include_replacements() {
        assert_eq!(run("#include<swap>(_A,_B)", "").unwrap(), "uniform_B\n");
    }

    #[test]
    fn test_source_define_and_errors() {
        assert_eq!(run("#define LOCAL\n#ifdef LOCAL\nx\n#endif", "").unwrap(), "x\n");
        assert!(matches!(run("#include<missing>", ""), Err(EngineError::UnknownInclude(_))));
        assert!(run("#endif", "").is_err());
        assert!(run("#ifdef A\nx", "").is_err());
    }

    #[test]
    fn test_numeric_defines() {
        let params = HashMap::new();
        let includes = |_: &str| None;
        let options = ProcessingOptions {
            source_name: "test",
            defines: "#define PBR\n#define NUM_SAMPLES 4\n#define ALPHATESTVALUE 0.5\n",
            index_parameters: &params,
            includes: &includes,
        };
        let processed = process("", &options).unwrap();
        let numeric: Vec<_> = processed.numeric_defines().collect();
        assert_eq!(numeric, vec![("ALPHATESTVALUE", "0.5"), ("NUM_SAMPLES", "4")]);
    }

    #[test]
    fn test_index_parameter_braces() {
        assert_eq!(run("const N = {maxLights};", "").unwrap(), "const N = 3;\n");
    }
}
