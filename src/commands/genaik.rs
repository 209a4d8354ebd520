use std::{fs::{OpenOptions, Permissions}, io::Write, os::unix::fs::{OpenOptionsExt, PermissionsExt}, path::Path};

use crate::{
    auth::AuthValue,
    config::GenAikConfig,
    result::{Error, Result},
    tpm::{self, TpmOperations},
};

pub fn run<T, F>(config: GenAikConfig, open_tpm: F) -> Result<()>
where
    T: TpmOperations,
    F: FnOnce(&str) -> tpm::Result<T>,
{
    let owner_auth = AuthValue::derive(&config.owner_secret);
    let srk_auth = AuthValue::derive(&config.srk_secret);
    let aik_auth = AuthValue::derive(&config.aik_secret);

    let blob = {
        let mut tpm = open_tpm(&config.tpm)
            .map_err(|source| Error::DeviceOpen { path: config.tpm.clone(), source })?;

        // TODO: certify the new identity once Privacy CA support exists
        log::info!("making new identity");
        tpm.make_identity(&srk_auth, &owner_auth, &aik_auth, None)
            .map_err(Error::MakeIdentity)?
    };

    log::info!(
        "writing {} byte identity blob with permissions 0600 to {}",
        blob.len(),
        config.blob.display(),
    );
    write_blob(&config.blob, &blob)
        .map_err(|source| Error::BlobWrite { path: config.blob.clone(), source })
}

fn write_blob(path: &Path, blob: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies to newly created files
    file.set_permissions(Permissions::from_mode(0o600))?;
    file.write_all(blob)?;
    file.sync_all()
}
