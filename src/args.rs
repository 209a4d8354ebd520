use std::{ffi::OsString, path::PathBuf};
use clap::{Args, CommandFactory, Parser};


/// Options shared by all tools.
#[derive(Args)]
#[derive(Debug)]
pub struct CommonOpts {
    /// The path to the TPM device to use, or a TCTI string such as
    /// "swtpm:host=...,port=...". Defaults to /dev/tpm0.
    #[arg(long, allow_hyphen_values = true)]
    pub tpm: Option<String>,

    /// A string to hash for owner auth (uses the well-known value if no string is supplied).
    #[arg(long, allow_hyphen_values = true)]
    pub ownerauth: Option<String>,

    /// Interactively ask for every auth string not given on the command line.
    #[arg(long, default_value = "false")]
    pub prompt: bool,

    /// Path to configuration file.
    #[arg(short, long, allow_hyphen_values = true)]
    pub config: Option<PathBuf>,

    /// Print debugging information.
    #[arg(short, long, default_value = "false")]
    pub debug: bool,
}

#[derive(Parser)]
#[derive(Debug)]
#[command(name = "genaik", version, about, long_about = None)]
/// Create a new TPM attestation identity key and write its blob to a file.
pub struct GenAikOpts {
    #[command(flatten)]
    pub common: CommonOpts,

    /// The name of the file to create. Defaults to "aikblob".
    #[arg(long, allow_hyphen_values = true)]
    pub blob: Option<PathBuf>,

    /// A string to hash for SRK auth (uses the well-known value if no string is supplied).
    #[arg(long, allow_hyphen_values = true)]
    pub srkauth: Option<String>,

    /// A string to hash for an auth value for the new AIK
    /// (uses the well-known value if no string is supplied).
    #[arg(long, allow_hyphen_values = true)]
    pub aikauth: Option<String>,
}

#[derive(Parser)]
#[derive(Debug)]
#[command(name = "tpm-clear", version, about, long_about = None)]
/// Clear TPM ownership using the owner auth value.
pub struct ClearOpts {
    #[command(flatten)]
    pub common: CommonOpts,
}

/// Parses the process arguments, accepting Go-style single-dash long flags.
pub fn parse<T: Parser>() -> T {
    T::parse_from(normalize_flags::<T, _>(std::env::args_os()))
}

/// Rewrites single-dash long flags (`-blob x`, `-blob=x`) into the
/// double-dash form clap expects. Only names clap knows are rewritten,
/// and option values are passed through untouched, so that e.g.
/// `-ownerauth -blob` keeps "-blob" as the auth string.
pub fn normalize_flags<T: CommandFactory, I: IntoIterator<Item = OsString>>(args: I) -> Vec<OsString> {
    let cmd = T::command();
    let mut longs: Vec<(String, bool)> = cmd.get_arguments()
        .filter_map(|a| a.get_long().map(|long| (long.to_string(), a.get_action().takes_values())))
        .collect();
    longs.push(("help".to_string(), false));
    longs.push(("version".to_string(), false));
    let value_shorts: Vec<char> = cmd.get_arguments()
        .filter(|a| a.get_action().takes_values())
        .filter_map(|a| a.get_short())
        .collect();

    let mut args = args.into_iter();
    let mut normalized: Vec<OsString> = args.next().into_iter().collect();
    let mut expect_value = false;
    let mut verbatim = false;
    for arg in args {
        if verbatim || expect_value {
            expect_value = false;
            normalized.push(arg);
            continue;
        }
        let Some(s) = arg.to_str() else {
            normalized.push(arg);
            continue;
        };
        if s == "--" {
            verbatim = true;
        } else if let Some(rest) = s.strip_prefix("--") {
            expect_value = needs_separate_value(rest, &longs);
        } else if let Some(rest) = s.strip_prefix('-') {
            if longs.iter().any(|(name, _)| name == flag_name(rest)) {
                expect_value = needs_separate_value(rest, &longs);
                normalized.push(format!("-{}", s).into());
                continue;
            }
            let mut chars = rest.chars();
            expect_value = matches!((chars.next(), chars.next()), (Some(c), None) if value_shorts.contains(&c));
        }
        normalized.push(arg);
    }
    normalized
}

fn flag_name(flag: &str) -> &str {
    flag.split_once('=').map(|(name, _)| name).unwrap_or(flag)
}

fn needs_separate_value(flag: &str, longs: &[(String, bool)]) -> bool {
    !flag.contains('=') && longs.iter().any(|(name, takes_value)| name == flag && *takes_value)
}
