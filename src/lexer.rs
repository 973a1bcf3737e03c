use crate::error::Loc;

/// Marks the rest of a physical line as a comment.
pub const LINE_COMMENT: &str = "//";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub text: &'a str,
    pub loc: Loc,
}

fn is_space(c: char) -> bool {
    c.is_whitespace()
}

/// Splits source text into whitespace-delimited tokens, line by line.
///
/// A token beginning with `//` discards itself and the remainder of its line.
pub fn tokenize(src: &str) -> Vec<Token<'_>> {
    let mut toks = Vec::new();

    for (row, line) in src.lines().enumerate() {
        let mut start: Option<usize> = None;
        let mut col = 0usize;

        for (i, c) in line.char_indices() {
            if is_space(c) {
                if let Some(s) = start.take() {
                    if push_token(&mut toks, &line[s..i], row, col) {
                        break;
                    }
                }
                continue;
            }
            if start.is_none() {
                start = Some(i);
                col = line[..i].chars().count();
            }
        }

        if let Some(s) = start {
            push_token(&mut toks, &line[s..], row, col);
        }
    }

    toks
}

// returns true when the token opened a comment
fn push_token<'a>(toks: &mut Vec<Token<'a>>, text: &'a str, row: usize, col: usize) -> bool {
    if text.starts_with(LINE_COMMENT) {
        return true;
    }
    toks.push(Token {
        text,
        loc: Loc::new(row + 1, col + 1),
    });
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(src: &str) -> Vec<&str> {
        tokenize(src).into_iter().map(|t| t.text).collect()
    }

    #[test]
    fn splits_on_any_whitespace() {
        assert_eq!(texts("1  2\t+\n\nprint"), vec!["1", "2", "+", "print"]);
    }

    #[test]
    fn line_comment_drops_rest_of_line_only() {
        assert_eq!(
            texts("1 2 // 3 4\n5 //no-space\n6"),
            vec!["1", "2", "5", "6"]
        );
    }

    #[test]
    fn comment_marker_must_start_the_token() {
        assert_eq!(texts("a//b"), vec!["a//b"]);
    }

    #[test]
    fn locations_are_one_based() {
        let toks = tokenize("  10 20\n  if");
        assert_eq!(toks[0].loc, Loc::new(1, 3));
        assert_eq!(toks[1].loc, Loc::new(1, 6));
        assert_eq!(toks[2].loc, Loc::new(2, 3));
    }

    #[test]
    fn columns_count_characters_not_bytes() {
        let toks = tokenize("é 1");
        assert_eq!(toks[1].loc, Loc::new(1, 3));
    }
}
