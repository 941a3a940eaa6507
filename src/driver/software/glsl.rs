// Shader declaration scanner
//
// The software driver doesn't execute graphics shaders; it only needs the
// interface a real compiler would expose: uniforms, vertex inputs, buffer
// blocks and the compute local size. Scanning is token based and tolerant of
// anything inside function bodies.

use std::collections::BTreeMap;

use crate::driver::{gl, NativeEnum};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformDecl {
    pub name: String,
    pub ty: String,
    pub location: Option<i32>,
    pub array_len: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDecl {
    pub name: String,
    pub ty: String,
    pub location: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDecl {
    pub name: String,
    pub binding: Option<u32>,
    pub storage: bool,
}

/// Interface of one compiled stage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reflection {
    pub version: Option<u32>,
    pub uniforms: Vec<UniformDecl>,
    pub inputs: Vec<InputDecl>,
    pub blocks: Vec<BlockDecl>,
    pub local_size: Option<[u32; 3]>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Tok<'a> {
    Ident(&'a str),
    Number(&'a str),
    Punct(char),
}

#[derive(Debug, Clone, Copy)]
struct Token<'a> {
    tok: Tok<'a>,
    line: u32,
}

const QUALIFIERS: &[&str] = &[
    "uniform", "in", "out", "inout", "buffer", "attribute", "varying", "const", "shared", "flat", "smooth",
    "noperspective", "centroid", "sample", "patch", "invariant", "precise", "highp", "mediump", "lowp",
    "readonly", "writeonly", "coherent", "volatile", "restrict",
];

const STORAGE: &[&str] = &["uniform", "in", "out", "buffer", "attribute", "varying", "shared", "const"];

struct Scanner {
    stage: NativeEnum,
    errors: Vec<String>,
    reflection: Reflection,
    has_main: bool,
}

/// Scan a stage's source. On failure the error is the diagnostic log.
pub fn scan(source: &str, stage: NativeEnum) -> Result<Reflection, String> {
    let mut scanner = Scanner {
        stage,
        errors: Vec::new(),
        reflection: Reflection::default(),
        has_main: false,
    };

    let tokens = scanner.lex(source);
    scanner.check_parens(&tokens);
    scanner.walk(&tokens);

    if !scanner.has_main {
        scanner.errors.push("ERROR: 0:0: 'main' : function not defined".to_string());
    }
    if stage == gl::COMPUTE_SHADER && scanner.reflection.local_size.is_none() {
        scanner
            .errors
            .push("ERROR: 0:0: compute shader does not declare a local work group size".to_string());
    }

    if scanner.errors.is_empty() {
        Ok(scanner.reflection)
    } else {
        Err(scanner.errors.join("\n"))
    }
}

impl Scanner {
    fn error(&mut self, line: u32, message: impl AsRef<str>) {
        self.errors.push(format!("ERROR: 0:{line}: {}", message.as_ref()));
    }

    fn lex<'a>(&mut self, source: &'a str) -> Vec<Token<'a>> {
        let bytes = source.as_bytes();
        let mut tokens = Vec::new();
        let mut line = 1u32;
        let mut line_start = true;
        let mut i = 0;

        while i < bytes.len() {
            let c = bytes[i];
            match c {
                b'\n' => {
                    line += 1;
                    line_start = true;
                    i += 1;
                }
                b' ' | b'\t' | b'\r' => i += 1,
                b'#' if line_start => {
                    let end = source[i..].find('\n').map_or(bytes.len(), |n| i + n);
                    let directive = source[i + 1..end].trim();
                    if let Some(rest) = directive.strip_prefix("version") {
                        match rest.split_whitespace().next().and_then(|v| v.parse().ok()) {
                            Some(version) => self.reflection.version = Some(version),
                            None => self.error(line, "'#version' : bad version number"),
                        }
                    }
                    i = end;
                }
                b'/' if bytes.get(i + 1) == Some(&b'/') => {
                    i = source[i..].find('\n').map_or(bytes.len(), |n| i + n);
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => match source[i + 2..].find("*/") {
                    Some(n) => {
                        line += source[i..i + 2 + n].matches('\n').count() as u32;
                        i += n + 4;
                    }
                    None => {
                        self.error(line, "unterminated comment");
                        i = bytes.len();
                    }
                },
                c if c.is_ascii_alphabetic() || c == b'_' => {
                    let start = i;
                    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                        i += 1;
                    }
                    tokens.push(Token { tok: Tok::Ident(&source[start..i]), line });
                    line_start = false;
                }
                c if c.is_ascii_digit() => {
                    let start = i;
                    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.') {
                        i += 1;
                    }
                    tokens.push(Token { tok: Tok::Number(&source[start..i]), line });
                    line_start = false;
                }
                _ => {
                    let ch = source[i..].chars().next().unwrap_or('?');
                    tokens.push(Token { tok: Tok::Punct(ch), line });
                    line_start = false;
                    i += ch.len_utf8();
                }
            }
        }
        tokens
    }

    fn check_parens(&mut self, tokens: &[Token<'_>]) {
        let mut depth = 0i32;
        for t in tokens {
            match t.tok {
                Tok::Punct('(') => depth += 1,
                Tok::Punct(')') => {
                    depth -= 1;
                    if depth < 0 {
                        self.error(t.line, "syntax error: unexpected ')'");
                        return;
                    }
                }
                _ => {}
            }
        }
        if depth != 0 {
            let line = tokens.last().map_or(0, |t| t.line);
            self.error(line, "syntax error: unbalanced parentheses");
        }
    }

    fn walk<'a>(&mut self, tokens: &[Token<'a>]) {
        let mut decl: Vec<Token<'a>> = Vec::new();
        let mut idx = 0;

        while idx < tokens.len() {
            let t = tokens[idx];
            match t.tok {
                Tok::Punct(';') => {
                    if !decl.is_empty() {
                        self.declaration(&decl);
                    }
                    decl.clear();
                }
                Tok::Punct('{') => {
                    let Some(close) = matching_brace(tokens, idx) else {
                        self.error(t.line, "syntax error: unexpected end of file, missing '}'");
                        return;
                    };
                    if matches!(decl.last(), Some(Token { tok: Tok::Punct(')'), .. })) {
                        self.function(&decl);
                        idx = close + 1;
                    } else {
                        self.block(&decl);
                        // Skip the optional instance name up to the terminating ';'
                        idx = close + 1;
                        while idx < tokens.len() && tokens[idx].tok != Tok::Punct(';') {
                            idx += 1;
                        }
                        idx += 1;
                    }
                    decl.clear();
                    continue;
                }
                Tok::Punct('}') => self.error(t.line, "syntax error: unexpected '}'"),
                _ => decl.push(t),
            }
            idx += 1;
        }

        if let Some(t) = decl.first() {
            self.error(t.line, "syntax error: unexpected end of file, missing ';'");
        }
    }

    fn function(&mut self, head: &[Token<'_>]) {
        let name = head
            .iter()
            .position(|t| t.tok == Tok::Punct('('))
            .and_then(|p| p.checked_sub(1))
            .map(|p| head[p].tok);
        if name == Some(Tok::Ident("main")) {
            if head.first().map(|t| t.tok) != Some(Tok::Ident("void")) {
                self.error(head[0].line, "'main' : must return void");
            }
            self.has_main = true;
        }
    }

    fn block(&mut self, head: &[Token<'_>]) {
        let Some(first) = head.first() else { return };
        let (layout, rest) = self.layout(head);
        let (storage, rest) = qualifiers(rest);
        let storage_block = match storage {
            Some("buffer") => true,
            Some("uniform") => false,
            _ => return,
        };
        match rest.first().map(|t| t.tok) {
            Some(Tok::Ident(name)) => self.reflection.blocks.push(BlockDecl {
                name: name.to_string(),
                binding: layout.get("binding").copied().flatten(),
                storage: storage_block,
            }),
            _ => self.error(first.line, "syntax error: block requires a name"),
        }
    }

    fn declaration(&mut self, decl: &[Token<'_>]) {
        let line = decl[0].line;
        if decl[0].tok == Tok::Ident("precision") {
            return;
        }
        let (layout, rest) = self.layout(decl);
        let (storage, rest) = qualifiers(rest);

        if rest.is_empty() {
            if storage == Some("in") && layout.keys().any(|k| k.starts_with("local_size_")) {
                if self.stage != gl::COMPUTE_SHADER {
                    self.error(line, "'local_size' : only valid in compute shaders");
                    return;
                }
                let axis = |name: &str| layout.get(name).copied().flatten().unwrap_or(1);
                let size = [axis("local_size_x"), axis("local_size_y"), axis("local_size_z")];
                if size.contains(&0) {
                    self.error(line, "'local_size' : work group size must be positive");
                    return;
                }
                self.reflection.local_size = Some(size);
            }
            return;
        }

        let (ty, name) = match (rest.first().map(|t| t.tok), rest.get(1).map(|t| t.tok)) {
            (Some(Tok::Ident(ty)), Some(Tok::Ident(name))) => (ty, name),
            _ => {
                if matches!(storage, Some("uniform" | "in" | "attribute" | "buffer")) {
                    self.error(line, "syntax error: expected a type and a name");
                }
                return;
            }
        };
        let array_len = match (rest.get(2).map(|t| t.tok), rest.get(3).map(|t| t.tok)) {
            (Some(Tok::Punct('[')), Some(Tok::Number(n))) => match parse_int(n) {
                Some(n) if n > 0 => n,
                _ => {
                    self.error(line, format!("'{name}' : array size must be a positive integer"));
                    return;
                }
            },
            _ => 1,
        };

        match storage {
            Some("uniform") => {
                if self.reflection.uniforms.iter().any(|u| u.name == name) {
                    self.error(line, format!("'{name}' : redefinition"));
                    return;
                }
                self.reflection.uniforms.push(UniformDecl {
                    name: name.to_string(),
                    ty: ty.to_string(),
                    location: layout.get("location").copied().flatten().map(|l| l as i32),
                    array_len,
                });
            }
            Some("in" | "attribute") if self.stage == gl::VERTEX_SHADER => {
                self.reflection.inputs.push(InputDecl {
                    name: name.to_string(),
                    ty: ty.to_string(),
                    location: layout.get("location").copied().flatten(),
                });
            }
            _ => {}
        }
    }

    /// Split a leading `layout(...)` qualifier off a declaration
    fn layout<'t, 'a>(&mut self, decl: &'t [Token<'a>]) -> (BTreeMap<String, Option<u32>>, &'t [Token<'a>]) {
        let mut entries = BTreeMap::new();
        if decl.first().map(|t| t.tok) != Some(Tok::Ident("layout")) {
            return (entries, decl);
        }
        let Some(close) = decl.iter().position(|t| t.tok == Tok::Punct(')')) else {
            self.error(decl[0].line, "syntax error: unterminated layout qualifier");
            return (entries, &[]);
        };

        let inner = decl.get(2..close).unwrap_or(&[]);
        for entry in inner.split(|t| t.tok == Tok::Punct(',')) {
            match entry.iter().map(|t| t.tok).collect::<Vec<_>>().as_slice() {
                [Tok::Ident(key)] => {
                    entries.insert(key.to_string(), None);
                }
                [Tok::Ident(key), Tok::Punct('='), Tok::Number(value)] => match parse_int(value) {
                    Some(v) => {
                        entries.insert(key.to_string(), Some(v));
                    }
                    None => self.error(decl[0].line, format!("'{key}' : invalid layout value '{value}'")),
                },
                _ => self.error(decl[0].line, "syntax error: malformed layout qualifier"),
            }
        }
        (entries, &decl[close + 1..])
    }
}

fn qualifiers<'t, 'a>(decl: &'t [Token<'a>]) -> (Option<&'a str>, &'t [Token<'a>]) {
    let mut storage = None;
    let mut rest = decl;
    while let Some(Token { tok: Tok::Ident(word), .. }) = rest.first() {
        if !QUALIFIERS.contains(word) {
            break;
        }
        if STORAGE.contains(word) {
            storage = Some(*word);
        }
        rest = &rest[1..];
    }
    (storage, rest)
}

fn matching_brace(tokens: &[Token<'_>], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, t) in tokens.iter().enumerate().skip(open) {
        match t.tok {
            Tok::Punct('{') => depth += 1,
            Tok::Punct('}') => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_int(text: &str) -> Option<u32> {
    let text = text.trim_end_matches(['u', 'U']);
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPUTE: &str = r#"#version 430
layout(local_size_x=64) in;
layout(location = 0) uniform int dt;
layout(std430, binding=0) buffer inblock { int num[]; };
layout(std430, binding=1) buffer outblock { int process[]; };
void main() { process[gl_GlobalInvocationID.x] = num[gl_GlobalInvocationID.x] * dt; }
"#;

    #[test]
    fn scans_compute_interface() {
        let r = scan(COMPUTE, gl::COMPUTE_SHADER).unwrap();
        assert_eq!(r.version, Some(430));
        assert_eq!(r.local_size, Some([64, 1, 1]));
        assert_eq!(r.uniforms.len(), 1);
        assert_eq!(r.uniforms[0].name, "dt");
        assert_eq!(r.uniforms[0].location, Some(0));
        assert_eq!(
            r.blocks,
            vec![
                BlockDecl { name: "inblock".into(), binding: Some(0), storage: true },
                BlockDecl { name: "outblock".into(), binding: Some(1), storage: true },
            ]
        );
    }

    #[test]
    fn scans_vertex_inputs_and_uniforms() {
        let src = "#version 330\n\
                   layout(location = 2) in vec2 pos;\n\
                   in vec4 color; // per vertex\n\
                   uniform mat4 MVP;\n\
                   uniform vec4 Corners[2];\n\
                   out vec4 vColor;\n\
                   void main() { vColor = color; gl_Position = MVP * vec4(pos, 0.0, 1.0); }\n";
        let r = scan(src, gl::VERTEX_SHADER).unwrap();
        assert_eq!(r.inputs.len(), 2);
        assert_eq!(r.inputs[0].location, Some(2));
        assert_eq!(r.inputs[1].name, "color");
        assert_eq!(r.uniforms[1].array_len, 2);
    }

    #[test]
    fn fragment_inputs_are_not_attributes() {
        let src = "in vec4 vColor; out vec4 frag; void main() { frag = vColor; }";
        let r = scan(src, gl::FRAGMENT_SHADER).unwrap();
        assert!(r.inputs.is_empty());
    }

    #[test]
    fn reports_missing_semicolon_with_line() {
        let src = "#version 330\nuniform float a\nvoid main() {}\n";
        let log = scan(src, gl::FRAGMENT_SHADER).unwrap_err();
        assert!(log.contains("ERROR: 0:2"), "{log}");
    }

    #[test]
    fn compute_without_local_size_fails() {
        let src = "#version 430\nvoid main() {}\n";
        let log = scan(src, gl::COMPUTE_SHADER).unwrap_err();
        assert!(log.contains("local work group size"));
    }

    #[test]
    fn missing_main_and_unbalanced_braces() {
        assert!(scan("void helper() {}", gl::VERTEX_SHADER).unwrap_err().contains("'main'"));
        assert!(scan("void main() { if (x) { }", gl::VERTEX_SHADER).unwrap_err().contains("missing '}'"));
    }
}
