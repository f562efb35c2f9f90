//! Shell quoting utilities.

/// Quote a string for use as a single shell word.
/// Wraps the string in single quotes and escapes any embedded single quotes.
pub fn quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }

    if !needs_quoting(s) {
        return s.to_string();
    }

    // abc's -> 'abc'"'"'s'
    format!("'{}'", s.replace('\'', "'\"'\"'"))
}

fn needs_quoting(s: &str) -> bool {
    s.chars().any(|c| {
        matches!(
            c,
            ' ' | '\t'
                | '\n'
                | '\r'
                | '"'
                | '\''
                | '\\'
                | '$'
                | '`'
                | '!'
                | '*'
                | '?'
                | '['
                | ']'
                | '{'
                | '}'
                | '('
                | ')'
                | '<'
                | '>'
                | '|'
                | '&'
                | ';'
                | '#'
                | '~'
                | '='
                | '%'
        )
    })
}

/// Join arguments into one command line, quoting each word.
pub fn join_args<I, S>(args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter()
        .map(|s| quote(s.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote() {
        assert_eq!(quote("simple"), "simple");
        assert_eq!(quote("with space"), "'with space'");
        assert_eq!(quote("it's"), "'it'\"'\"'s'");
        assert_eq!(quote(""), "''");
        assert_eq!(quote("$var"), "'$var'");
        assert_eq!(quote("a;rm -rf /"), "'a;rm -rf /'");
    }

    #[test]
    fn test_join_args_round_trips_through_shell_parsing() {
        let args = vec!["echo", "hello world", "it's", "$(id)"];
        let joined = join_args(&args);
        assert_eq!(shell_words::split(&joined).unwrap(), args);
    }
}
