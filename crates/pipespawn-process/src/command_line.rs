//! Windows command-line flattening.
//!
//! `CreateProcessW` takes one string, which the child's C runtime splits
//! back into argv. Arguments are joined with spaces and quoted so that
//! split gives back the original list.

/// Join `argv` into a single command line using the MSVC quoting rules.
pub fn command_line_from_argv<S: AsRef<str>>(argv: &[S]) -> String {
    let mut line = String::new();
    for (i, arg) in argv.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        append_quoted(&mut line, arg.as_ref());
    }
    line
}

fn append_quoted(line: &mut String, arg: &str) {
    let needs_quotes = arg.is_empty() || arg.contains([' ', '\t', '\n', '\u{b}', '"']);
    if !needs_quotes {
        line.push_str(arg);
        return;
    }

    line.push('"');
    let mut backslashes = 0usize;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                // Backslashes before a quote are doubled, plus one for the quote.
                line.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                line.push('"');
                backslashes = 0;
            }
            _ => {
                line.extend(std::iter::repeat('\\').take(backslashes));
                line.push(c);
                backslashes = 0;
            }
        }
    }
    // Trailing backslashes would otherwise escape the closing quote.
    line.extend(std::iter::repeat('\\').take(backslashes * 2));
    line.push('"');
}
