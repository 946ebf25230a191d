use crate::compiler::lexer::{Lexer, Tok};

fn tokens(src: &str) -> Vec<Tok> {
    let mut lexer = Lexer::new(src, "test");
    let mut out = Vec::new();
    loop {
        let t = lexer.next_token().expect("lex error");
        let done = t.tok == Tok::Eof;
        out.push(t.tok);
        if done {
            break;
        }
    }
    out
}

#[test]
fn lexes_numbers_and_operators() {
    let toks = tokens("1 + 2 * 3 ^ 2");
    assert_eq!(
        toks,
        vec![
            Tok::Number(1.0),
            Tok::Plus,
            Tok::Number(2.0),
            Tok::Star,
            Tok::Number(3.0),
            Tok::Caret,
            Tok::Number(2.0),
            Tok::Eof,
        ]
    );
}

#[test]
fn lexes_keywords_distinctly_from_identifiers() {
    let toks = tokens("local function end");
    assert_eq!(toks[0], Tok::Local);
    assert_eq!(toks[1], Tok::Function);
    assert_eq!(toks[2], Tok::End);
}

#[test]
fn lexes_long_bracket_strings() {
    let toks = tokens("[[hello\nworld]]");
    match &toks[0] {
        Tok::Str(bytes) => assert_eq!(bytes, b"hello\nworld"),
        other => panic!("expected string, got {other:?}"),
    }
}

#[test]
fn lexes_comparison_and_concat_operators() {
    let toks = tokens("a <= b ~= c .. d");
    assert_eq!(toks[1], Tok::Le);
    assert_eq!(toks[3], Tok::Ne);
    assert_eq!(toks[5], Tok::DotDot);
}

#[test]
fn rejects_unterminated_string() {
    let mut lexer = Lexer::new("\"unterminated", "test");
    assert!(lexer.next_token().is_err());
}
