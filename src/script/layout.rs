//! Turns indentation into explicit block markers before parsing.
//!
//! Logical lines end with [`NEWLINE`]; a line ending in `:` opens a block that
//! is wrapped in [`INDENT`] ... [`DEDENT`]. Comments are stripped, brackets and
//! a trailing backslash continue a logical line. Physical newlines are kept so
//! parser positions still map to source lines.

use crate::error::{Result, SupertoolError};

pub const NEWLINE: char = 1 as char;
pub const INDENT: char = 2 as char;
pub const DEDENT: char = 3 as char;

// a tab advances to the next multiple of eight columns
fn indentation(line: &str) -> usize {
    let mut width = 0;
    for c in line.chars() {
        match c {
            ' ' => width += 1,
            '\t' => width = (width / 8 + 1) * 8,
            _ => break,
        }
    }
    width
}

struct Scanned<'a> {
    // the line without its comment and trailing whitespace
    content: &'a str,
    depth_change: isize,
    continues: bool,
}

fn scan(line: &str, line_number: usize) -> Result<Scanned<'_>> {
    let mut in_string: Option<char> = None;
    let mut escaped = false;
    let mut depth_change = 0isize;
    let mut end = line.len();
    for (i, c) in line.char_indices() {
        if let Some(quote) = in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                in_string = None;
            }
            continue;
        }
        match c {
            '#' => {
                end = i;
                break;
            }
            '"' | '\'' => in_string = Some(c),
            '(' | '[' | '{' => depth_change += 1,
            ')' | ']' | '}' => depth_change -= 1,
            _ => {}
        }
    }
    if in_string.is_some() {
        return Err(SupertoolError::syntax(
            format!("EOL while scanning string literal (line {line_number})\n{line}"),
            line_number,
            line.len(),
        ));
    }
    let mut content = line[..end].trim_end();
    let continues = content.ends_with('\\');
    if continues {
        content = &content[..content.len() - 1];
    }
    Ok(Scanned {
        content,
        depth_change,
        continues,
    })
}

fn indentation_error(message: &str, line_number: usize, line: &str) -> SupertoolError {
    SupertoolError::syntax(
        format!("{message} (line {line_number})\n{line}"),
        line_number,
        indentation(line) + 1,
    )
}

pub fn layout(code: &str) -> Result<String> {
    let mut out = String::with_capacity(code.len() + 16);
    let mut stack: Vec<usize> = vec![0];
    let mut depth: isize = 0;
    let mut in_logical_line = false;
    let mut opens_block = false;
    let mut last_char: Option<char> = None;
    let mut last_line = 0;

    for (index, raw) in code.split('\n').enumerate() {
        let line_number = index + 1;
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        let scanned = scan(line, line_number)?;

        if !in_logical_line {
            if scanned.content.trim().is_empty() && !scanned.continues {
                out.push('\n');
                continue;
            }
            let indent = indentation(line);
            let top = stack.last().copied().unwrap_or(0);
            if opens_block {
                if indent <= top {
                    return Err(indentation_error("expected an indented block", line_number, line));
                }
                stack.push(indent);
                out.push(INDENT);
                opens_block = false;
            } else if indent > top {
                return Err(indentation_error("unexpected indent", line_number, line));
            } else {
                while indent < stack.last().copied().unwrap_or(0) {
                    stack.pop();
                    out.push(DEDENT);
                }
                if indent != stack.last().copied().unwrap_or(0) {
                    return Err(indentation_error(
                        "unindent does not match any outer indentation level",
                        line_number,
                        line,
                    ));
                }
            }
        }

        out.push_str(scanned.content);
        if let Some(c) = scanned.content.trim_end().chars().last() {
            last_char = Some(c);
        }
        last_line = line_number;
        depth = (depth + scanned.depth_change).max(0);
        if depth > 0 || scanned.continues {
            in_logical_line = true;
            out.push('\n');
            continue;
        }
        in_logical_line = false;
        if last_char == Some(':') {
            opens_block = true;
        } else {
            out.push(NEWLINE);
        }
        out.push('\n');
    }

    if in_logical_line {
        return Err(SupertoolError::syntax(
            format!("unexpected EOF while parsing (line {last_line})"),
            last_line,
            0,
        ));
    }
    if opens_block {
        return Err(SupertoolError::syntax(
            format!("expected an indented block (line {last_line})"),
            last_line,
            0,
        ));
    }
    while stack.len() > 1 {
        stack.pop();
        out.push(DEDENT);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_become_markers() {
        let text = layout("if x:\n    y = 1\nz = 2\n").unwrap();
        assert_eq!(text, format!("if x:\n{INDENT}    y = 1{NEWLINE}\n{DEDENT}z = 2{NEWLINE}\n\n"));
    }

    #[test]
    fn brackets_continue_lines() {
        let text = layout("x = [1,\n  2]\n").unwrap();
        assert_eq!(text.matches(NEWLINE).count(), 1);
    }

    #[test]
    fn comments_and_strings() {
        let text = layout("s = '# not a comment' # comment\n").unwrap();
        assert!(text.contains("'# not a comment'"));
        assert!(!text.contains("# comment"));
    }

    #[test]
    fn bad_indentation_is_reported() {
        assert!(layout("x = 1\n    y = 2\n").is_err());
        assert!(layout("if x:\ny = 2\n").is_err());
        assert!(layout("if x:\n        a = 1\n    b = 2\n").is_err());
        assert!(layout("for x in y:").is_err());
    }
}
