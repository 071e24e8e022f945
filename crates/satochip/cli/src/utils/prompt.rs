//! Terminal prompts

use std::io::{self, BufRead, Write};

use colored::Colorize;
use satochip::{PinPrompt, ProvisioningHandler, SeedAction, SeedFormat, VersionMismatch};

/// Print `prompt` and read one trimmed line; `None` on end of input
pub(crate) fn input(prompt: &str) -> Option<String> {
    print!("{prompt}: ");
    io::stdout().flush().ok()?;
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()),
    }
}

/// Yes/no question; `None` on end of input
pub(crate) fn confirm(question: &str) -> Option<bool> {
    loop {
        let answer = input(&format!("{question} (y/n)"))?.to_lowercase();
        match answer.as_str() {
            "y" | "yes" => return Some(true),
            "n" | "no" => return Some(false),
            _ => println!("Please answer y or n"),
        }
    }
}

fn choose<T: Copy>(question: &str, options: &[(&str, T)]) -> Option<T> {
    println!("{question}");
    for (i, (label, _)) in options.iter().enumerate() {
        println!("  {}. {label}", i + 1);
    }
    loop {
        let choice = input("Choice")?;
        match choice.parse::<usize>() {
            Ok(n) if (1..=options.len()).contains(&n) => return Some(options[n - 1].1),
            _ => println!("Enter a number between 1 and {}", options.len()),
        }
    }
}

/// Interactive provisioning over stdin/stdout
#[derive(Debug, Default)]
pub(crate) struct TerminalHandler;

impl ProvisioningHandler for TerminalHandler {
    fn request_pin(&mut self, prompt: PinPrompt) -> Option<String> {
        match prompt {
            PinPrompt::Unlock => input("Enter PIN"),
            PinPrompt::New => input("Choose a PIN (4 to 64 characters)"),
            PinPrompt::Confirm => input("Repeat the PIN"),
        }
    }

    fn choose_two_factor(&mut self) -> Option<bool> {
        println!(
            "{}",
            "2FA requires a second device to approve every transaction. \
             It cannot be disabled without resetting the card."
                .yellow()
        );
        confirm("Enable 2FA")
    }

    fn show_two_factor_secret(&mut self, secret_hex: &str) -> bool {
        println!("2FA secret (import it in the approval app):");
        println!("  {}", secret_hex.bold());
        confirm("Has the secret been stored").unwrap_or(false)
    }

    fn choose_seed_action(&mut self) -> Option<SeedAction> {
        choose(
            "The card has no seed yet.",
            &[
                ("Create a new Electrum seed", SeedAction::Create(SeedFormat::Electrum)),
                ("Create a new BIP39 seed", SeedAction::Create(SeedFormat::Bip39)),
                ("Restore an existing seed", SeedAction::Restore),
            ],
        )
    }

    fn show_mnemonic(&mut self, phrase: &str) {
        println!("{}", "Write down these words and keep them offline:".yellow());
        println!("  {}", phrase.bold());
    }

    fn confirm_mnemonic(&mut self) -> Option<String> {
        input("Type the words again")
    }

    fn request_passphrase(&mut self) -> Option<String> {
        input("Seed passphrase (empty for none)")
    }

    fn request_seed(&mut self) -> Option<(String, SeedFormat)> {
        let format = choose(
            "Seed format:",
            &[
                ("BIP39", SeedFormat::Bip39),
                ("Electrum", SeedFormat::Electrum),
            ],
        )?;
        Some((input("Seed words")?, format))
    }

    fn warn_version(&mut self, mismatch: &VersionMismatch) {
        println!(
            "{} card protocol {} differs from supported {}",
            "Warning:".yellow().bold(),
            mismatch.card,
            mismatch.supported
        );
    }

    fn show_error(&mut self, message: &str) {
        println!("{} {message}", "Error:".red().bold());
    }
}
