use std::process::ExitCode;

use tpmtools::{
    args::{self, ClearOpts},
    config::{ClearConfig, Config},
    result::{Error, Result},
    term::{secret_or_prompt, Tty},
    tpm::TPM,
};

fn main() -> ExitCode {
    let opts: ClearOpts = args::parse();
    tpmtools::init_logging(opts.common.debug);

    match run(opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        },
    }
}

fn run(opts: ClearOpts) -> Result<()> {
    let file_config = Config::resolve(opts.common.config.as_deref())?;
    let config = ClearConfig {
        tpm: file_config.tpm(opts.common.tpm),
        owner_secret: secret_or_prompt(opts.common.ownerauth, opts.common.prompt, "Owner", &mut Tty)
            .map_err(Error::PromptError)?,
    };
    tpmtools::commands::clear::run(config, TPM::open)
}
