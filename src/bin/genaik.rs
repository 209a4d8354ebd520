use std::process::ExitCode;

use tpmtools::{
    args::{self, GenAikOpts},
    config::{Config, GenAikConfig},
    result::{Error, Result},
    term::{secret_or_prompt, Tty},
    tpm::TPM,
};

fn main() -> ExitCode {
    let opts: GenAikOpts = args::parse();
    tpmtools::init_logging(opts.common.debug);

    match run(opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        },
    }
}

fn run(opts: GenAikOpts) -> Result<()> {
    let file_config = Config::resolve(opts.common.config.as_deref())?;
    let prompt = opts.common.prompt;
    let mut tty = Tty;
    let config = GenAikConfig {
        blob: file_config.blob(opts.blob),
        tpm: file_config.tpm(opts.common.tpm),
        owner_secret: secret_or_prompt(opts.common.ownerauth, prompt, "Owner", &mut tty)
            .map_err(Error::PromptError)?,
        srk_secret: secret_or_prompt(opts.srkauth, prompt, "SRK", &mut tty)
            .map_err(Error::PromptError)?,
        aik_secret: secret_or_prompt(opts.aikauth, prompt, "AIK", &mut tty)
            .map_err(Error::PromptError)?,
    };
    tpmtools::commands::genaik::run(config, TPM::open)
}
