use crate::{
    auth::AuthValue,
    config::ClearConfig,
    result::{Error, Result},
    tpm::{self, TpmOperations},
};

pub fn run<T, F>(config: ClearConfig, open_tpm: F) -> Result<()>
where
    T: TpmOperations,
    F: FnOnce(&str) -> tpm::Result<T>,
{
    let owner_auth = AuthValue::derive(&config.owner_secret);

    let mut tpm = open_tpm(&config.tpm)
        .map_err(|source| Error::DeviceOpen { path: config.tpm.clone(), source })?;

    log::info!("clearing TPM ownership");
    tpm.owner_clear(&owner_auth).map_err(Error::OwnerClear)?;

    Ok(())
}
