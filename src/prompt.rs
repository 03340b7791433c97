//! Interactive confirmation and text prompts.

use std::io::{self, BufRead, Write};

pub trait Prompt {
    /// Ask a yes/no question; anything but an explicit yes declines.
    fn confirm(&self, question: &str) -> bool;
    /// Read one line of free text. `None` when no input is available.
    fn ask(&self, label: &str) -> Option<String>;
}

pub struct TerminalPrompt {
    assume_yes: bool,
    interactive: bool,
}

impl TerminalPrompt {
    pub fn new(assume_yes: bool, interactive: bool) -> Self {
        Self {
            assume_yes,
            interactive,
        }
    }
}

impl Prompt for TerminalPrompt {
    fn confirm(&self, question: &str) -> bool {
        if self.assume_yes {
            return true;
        }

        // One-shot mode without --yes declines instead of blocking on stdin
        if !self.interactive {
            eprintln!("{} - declined (use --yes to confirm non-interactively)", question);
            return false;
        }

        print!("{} [y/N]: ", question);
        io::stdout().flush().ok();

        let mut input = String::new();
        if io::stdin().lock().read_line(&mut input).is_ok() {
            let input = input.trim().to_lowercase();
            input == "y" || input == "yes"
        } else {
            false
        }
    }

    fn ask(&self, label: &str) -> Option<String> {
        print!("{}: ", label);
        io::stdout().flush().ok();

        let mut input = String::new();
        match io::stdin().lock().read_line(&mut input) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(input.trim_end_matches(['\r', '\n']).to_string()),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assume_yes_confirms_without_input() {
        let prompt = TerminalPrompt::new(true, false);
        assert!(prompt.confirm("Delete key?"));
    }

    #[test]
    fn test_non_interactive_declines() {
        let prompt = TerminalPrompt::new(false, false);
        assert!(!prompt.confirm("Delete key?"));
    }
}
