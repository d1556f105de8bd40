//! # Shell Completion Module
//!
//! Generates completion scripts through clap_complete.
//!
//! ## Usage
//!
//! ```bash
//! # Generate bash completions
//! pod-shuffle completion bash > ~/.local/share/bash-completion/completions/pod-shuffle
//!
//! # Generate zsh completions
//! pod-shuffle completion zsh > ~/.config/zsh/completions/_pod-shuffle
//! ```

use crate::cli::{Args, Shell};
use clap::{Command, CommandFactory};
use clap_complete::{generate, Generator, Shell as CompletionShell};
use std::io::{self, Write};

/// Generate shell completions for the given shell
pub fn generate_completions<G: Generator>(gen: G, cmd: &mut Command, out: &mut dyn Write) {
    let name = cmd.get_name().to_string();
    generate(gen, cmd, name, out);
}

/// Print the completion script for `shell` to stdout.
pub fn print_completions(shell: Shell) {
    let mut cmd = Args::command();
    generate_completions(shell_to_completion_shell(shell), &mut cmd, &mut io::stdout());
}

/// Convert our Shell enum to clap_complete's Shell enum
#[must_use]
pub fn shell_to_completion_shell(shell: Shell) -> CompletionShell {
    match shell {
        Shell::Bash => CompletionShell::Bash,
        Shell::Zsh => CompletionShell::Zsh,
        Shell::Fish => CompletionShell::Fish,
        Shell::PowerShell => CompletionShell::PowerShell,
        Shell::Elvish => CompletionShell::Elvish,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_conversion() {
        assert_eq!(shell_to_completion_shell(Shell::Bash), CompletionShell::Bash);
        assert_eq!(shell_to_completion_shell(Shell::Fish), CompletionShell::Fish);
        assert_eq!(
            shell_to_completion_shell(Shell::PowerShell),
            CompletionShell::PowerShell
        );
    }

    #[test]
    fn test_bash_script_mentions_subcommands() {
        let mut cmd = Args::command();
        let mut script = Vec::new();
        generate_completions(CompletionShell::Bash, &mut cmd, &mut script);

        let script = String::from_utf8_lossy(&script);
        assert!(script.contains("pod-shuffle"));
        assert!(script.contains("play"));
        assert!(script.contains("scan"));
    }
}
