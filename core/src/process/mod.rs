//! External process plumbing: launching tools behind a wrapper script and
//! detecting their completion through a done-file.

pub mod completion;
pub mod launcher;

pub use completion::{read_marker, wait_for_completion, CompletionOutcome, DONE_MARKER};
pub use launcher::{LaunchHandle, LaunchMethod, LaunchRequest, ProcessLauncher, ShellLauncher};

/// Quotes one argument for a POSIX shell. Plain words pass through unchanged.
pub fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+%".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

pub fn shell_join(argv: &[String]) -> String {
    argv.iter().map(|a| shell_quote(a)).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_words_unquoted() {
        assert_eq!(shell_quote("example.com"), "example.com");
        assert_eq!(shell_quote("-silent"), "-silent");
    }

    #[test]
    fn test_metacharacters_are_quoted() {
        assert_eq!(shell_quote("a;b"), "'a;b'");
        assert_eq!(shell_quote("$(id)"), "'$(id)'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_embedded_single_quote() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
