//! Typed double confirmation for deleting absorbed shells

use std::io::{self, BufRead, Write};

const FIRST_ANSWER: &str = "yes";
const SECOND_ANSWER: &str = "delete duplicates";

fn ask<R: BufRead, W: Write>(input: &mut R, output: &mut W, prompt: &str) -> io::Result<String> {
    write!(output, "{}", prompt)?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Ask twice before any shell is deleted; anything but the exact answers declines
pub fn confirm_deletion<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    selector: &str,
) -> io::Result<bool> {
    writeln!(
        output,
        "Absorbed duplicates of '{}' will be permanently deleted after merging.",
        selector
    )?;

    let first = ask(input, output, "Type 'yes' to continue: ")?;
    if first != FIRST_ANSWER {
        writeln!(output, "Deletion declined.")?;
        return Ok(false);
    }

    let second = ask(input, output, "Type 'delete duplicates' to confirm: ")?;
    if second != SECOND_ANSWER {
        writeln!(output, "Deletion declined.")?;
        return Ok(false);
    }

    Ok(true)
}
