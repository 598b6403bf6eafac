//! Tokenization of share-configuration lines using `nom`.
//!
//! A line is a sequence of whitespace-separated tokens; each token is
//! either bare or a double-quoted string. Quoted tokens may contain
//! whitespace but never an embedded quote.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::map,
    sequence::delimited,
};

fn bare_token(input: &str) -> IResult<&str, String> {
    map(
        take_while1(|c: char| !c.is_whitespace() && c != '"'),
        str::to_owned,
    )
    .parse(input)
}

fn quoted_token(input: &str) -> IResult<&str, String> {
    map(
        delimited(char('"'), take_while(|c: char| c != '"'), char('"')),
        str::to_owned,
    )
    .parse(input)
}

fn token(input: &str) -> IResult<&str, String> {
    alt((quoted_token, bare_token)).parse(input)
}

/// Splits one configuration line into tokens.
///
/// # Errors
///
/// Returns a description of the first lexical problem (an unterminated
/// quote, a quote embedded mid-token, or a quoted token not followed by
/// a separator).
pub fn tokenize_line(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut remaining = line;

    loop {
        let (rest, ()) = map(multispace0, |_| ()).parse(remaining).map_err(
            |e: nom::Err<nom::error::Error<&str>>| format!("lexer error: {e}"),
        )?;
        remaining = rest;

        if remaining.is_empty() {
            break;
        }

        let was_quoted = remaining.starts_with('"');
        let (rest, tok) = token(remaining)
            .map_err(|_| format!("malformed token at: \"{remaining}\""))?;

        // A bare token must end at whitespace; running straight into a
        // quote means an embedded quote.
        if rest.starts_with('"') && !was_quoted {
            return Err(format!("embedded quote at: \"{remaining}\""));
        }
        // A closing quote must likewise be followed by a separator, not
        // more token text.
        if was_quoted && rest.chars().next().is_some_and(|c| !c.is_whitespace()) {
            return Err(format!("missing separator after quoted token at: \"{remaining}\""));
        }

        tokens.push(tok);
        remaining = rest;
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn tokenize_bare_tokens() {
        let tokens = tokenize_line("downloads ~/Downloads exec").unwrap();
        assert_eq!(tokens, vec!["downloads", "~/Downloads", "exec"]);
    }

    #[test]
    fn tokenize_quoted_token_with_space() {
        let tokens = tokenize_line(r#"myfiles "/mnt/my files""#).unwrap();
        assert_eq!(tokens, vec!["myfiles", "/mnt/my files"]);
    }

    #[test]
    fn tokenize_empty_line() {
        assert!(tokenize_line("").unwrap().is_empty());
        assert!(tokenize_line("   \t ").unwrap().is_empty());
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        assert!(tokenize_line(r#"shared "/mnt/open"#).is_err());
    }

    #[test]
    fn embedded_quote_is_an_error() {
        assert!(tokenize_line(r#"shared /mnt/ab"cd""#).is_err());
    }

    #[test]
    fn quoted_token_followed_by_text_is_an_error() {
        assert!(tokenize_line(r#"shared "/mnt/a b"c"#).is_err());
    }

    #[test]
    fn empty_quoted_token_is_kept() {
        let tokens = tokenize_line(r#""" /dest"#).unwrap();
        assert_eq!(tokens, vec!["", "/dest"]);
    }
}
