//! Candidate SQL normalization for ranking: comments stripped, keywords
//! uppercased, whitespace collapsed. Structurally identical queries compare equal
//! regardless of formatting, and normalizing twice changes nothing.

use lazy_static::lazy_static;
use regex::Regex;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Token, Tokenizer};

lazy_static! {
    static ref LINE_COMMENT: Regex = Regex::new(r"(?m)--.*$").unwrap();
    static ref BLOCK_COMMENT: Regex = Regex::new(r"(?s)/\*.*?\*/").unwrap();
}

const MAX_PASSES: usize = 8;

pub fn normalize_sql(sql: &str) -> String {
    let mut current = single_pass(sql);
    for _ in 1..MAX_PASSES {
        let next = single_pass(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn single_pass(sql: &str) -> String {
    let dialect = PostgreSqlDialect {};
    let rendered = match Tokenizer::new(&dialect, sql).tokenize() {
        Ok(tokens) => render_tokens(&tokens),
        // Unterminated literals and the like: comments and whitespace only
        Err(_) => {
            let without_block = BLOCK_COMMENT.replace_all(sql, " ");
            LINE_COMMENT.replace_all(&without_block, " ").into_owned()
        }
    };
    rendered.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn render_tokens(tokens: &[Token]) -> String {
    let mut out = String::with_capacity(tokens.len() * 4);
    for token in tokens {
        match token {
            // Comments collapse like any other whitespace
            Token::Whitespace(_) => out.push(' '),
            Token::Word(word) if word.quote_style.is_none() && word.keyword != Keyword::NoKeyword => {
                out.push_str(&word.value.to_uppercase())
            }
            Token::Word(word) if word.quote_style.is_some() => {
                let open = word.quote_style.unwrap_or('"');
                let close = if open == '[' { ']' } else { open };
                out.push(open);
                out.push_str(&word.value.replace(close, &format!("{}{}", close, close)));
                out.push(close);
            }
            Token::SingleQuotedString(s) => {
                out.push('\'');
                out.push_str(&s.replace('\'', "''"));
                out.push('\'');
            }
            Token::EscapedStringLiteral(s) => {
                out.push_str("E'");
                for ch in s.chars() {
                    match ch {
                        '\\' => out.push_str("\\\\"),
                        '\'' => out.push_str("\\'"),
                        '\n' => out.push_str("\\n"),
                        '\r' => out.push_str("\\r"),
                        '\t' => out.push_str("\\t"),
                        other => out.push(other),
                    }
                }
                out.push('\'');
            }
            other => out.push_str(&other.to_string()),
        }
    }
    out
}
