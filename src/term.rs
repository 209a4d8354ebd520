/// Somewhere to read passphrases from.
/// Since rpassword only suppresses echo on a real tty, we need a custom
/// trait to make this testable.
pub trait PassphraseSource {
    fn passphrase(&mut self, prompt: &str) -> std::io::Result<String>;
}

/// Reads passphrases from the controlling terminal without echo.
pub struct Tty;

impl PassphraseSource for Tty {
    fn passphrase(&mut self, prompt: &str) -> std::io::Result<String> {
        rpassword::prompt_password(prompt)
    }
}

/// Returns the secret given on the command line.
/// If there is none, either asks for it or falls back to the empty secret,
/// which selects the well-known auth value.
pub fn secret_or_prompt<S: PassphraseSource>(
    secret: Option<String>,
    prompt: bool,
    what: &str,
    source: &mut S,
) -> std::io::Result<String> {
    match secret {
        Some(s) => Ok(s),
        None if prompt => {
            log::debug!("prompting for {} passphrase", what);
            source.passphrase(&format!("{} passphrase (empty for the well-known value): ", what))
        },
        None => Ok(String::new()),
    }
}
