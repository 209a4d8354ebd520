use std::{fmt, str::FromStr};

use tss_esapi::{
    attributes::ObjectAttributes, constants::{
        response_code::{FormatOneResponseCode, FormatZeroResponseCode}, StartupType, Tss2ResponseCode
    }, handles::{
        AuthHandle, KeyHandle, ObjectHandle, PersistentTpmHandle, TpmHandle
    }, interface_types::{
        algorithm::{
            HashingAlgorithm, PublicAlgorithm, RsaSchemeAlgorithm
        }, key_bits::RsaKeyBits, resource_handles::{
            Hierarchy
        }
    }, structures::{
        Auth, Public, PublicKeyRsa, PublicRsaParametersBuilder, RsaExponent, RsaScheme,
        SymmetricDefinitionObject
    }, tcti_ldr::DeviceConfig, Context, TctiNameConf
};

use crate::{auth::AuthValue, blob::IdentityBlob};

/// Conventional persistent handle of the storage root key.
pub const SRK_PERSISTENT_HANDLE: u32 = 0x81000001;

const TCTI_PREFIXES: [&str; 4] = ["device:", "mssim:", "swtpm:", "tabrmd"];

/// Operations the command line tools need from a TPM.
pub trait TpmOperations {
    /// Creates a new attestation identity key and returns its blob.
    fn make_identity(
        &mut self,
        srk_auth: &AuthValue,
        owner_auth: &AuthValue,
        aik_auth: &AuthValue,
        privacy_ca: Option<&PrivacyCa>,
    ) -> Result<Vec<u8>>;

    /// Clears TPM ownership.
    fn owner_clear(&mut self, owner_auth: &AuthValue) -> Result<()>;
}

/// Privacy CA to certify a new identity with.
/// Certification is not implemented; passing one to `make_identity` is an error.
#[derive(Debug, Clone, PartialEq)]
pub struct PrivacyCa {
    pub label: Vec<u8>,
    pub public_key: Vec<u8>,
}

#[derive(Debug)]
#[derive(PartialEq)]
pub enum Error {
    TpmError(tss_esapi::Error),
    PrivacyCaUnsupported,
    BlobTooLarge,
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<tss_esapi::Error> for Error {
    fn from(value: tss_esapi::Error) -> Self {
        Error::TpmError(value)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TpmError(e) => write!(f, "{}", e),
            Error::PrivacyCaUnsupported => f.write_str("Privacy CA support is not implemented"),
            Error::BlobTooLarge => f.write_str("identity blob component exceeds 65535 bytes"),
        }
    }
}

impl std::error::Error for Error {}

/// Exclusive handle to a TPM. Shut down and released when dropped.
#[derive(Debug)]
pub struct TPM(Context);

impl TPM {
    /// Opens the TPM at the given device node or TCTI configuration string.
    pub fn open(tpm: &str) -> Result<Self> {
        log::info!("opening TPM {}", tpm);
        let ctx = Context::new(tcti_name_conf(tpm)?)?;
        let mut tpm = TPM(ctx);
        match tpm.0.startup(StartupType::Clear) {
            Ok(()) => {},
            Err(tss_esapi::Error::Tss2Error(Tss2ResponseCode::FormatZero(FormatZeroResponseCode(0x100)))) => {
                // TPM_RC_INITIALIZE: firmware already started it
                log::debug!("TPM already started");
            },
            Err(e) => return Err(e.into()),
        }
        Ok(tpm)
    }
}

impl Drop for TPM {
    fn drop(&mut self) {
        log::debug!("releasing TPM");
        if let Err(e) = self.0.shutdown(StartupType::State) {
            log::warn!("TPM shutdown failed: {}", e);
        }
    }
}

/// Maps a `-tpm` argument to a TCTI configuration.
/// Anything that isn't an explicit TCTI string is taken to be a device node.
pub fn tcti_name_conf(tpm: &str) -> Result<TctiNameConf> {
    if TCTI_PREFIXES.iter().any(|prefix| tpm.starts_with(prefix)) {
        Ok(TctiNameConf::from_str(tpm)?)
    } else {
        Ok(TctiNameConf::Device(DeviceConfig::from_str(tpm)?))
    }
}

enum Srk {
    Persistent(KeyHandle),
    Transient(KeyHandle),
}

impl Srk {
    fn handle(&self) -> KeyHandle {
        match self {
            Srk::Persistent(handle) | Srk::Transient(handle) => *handle,
        }
    }
}

impl TPM {
    /// Returns the SRK, creating a transient one in the owner hierarchy
    /// if none has been made persistent.
    fn load_srk(&mut self, srk_auth: Auth) -> Result<Srk> {
        let persistent_handle = PersistentTpmHandle::new(SRK_PERSISTENT_HANDLE)?;
        let lookup = self.0.execute_with_nullauth_session(|ctx| {
            ctx.tr_from_tpm_public(TpmHandle::Persistent(persistent_handle))
        });
        let srk = match lookup {
            Ok(handle) => {
                log::info!("using persistent SRK at {:#x}", SRK_PERSISTENT_HANDLE);
                Srk::Persistent(handle.into())
            },
            Err(tss_esapi::Error::Tss2Error(Tss2ResponseCode::FormatOne(FormatOneResponseCode(0x18b)))) => {
                log::info!("no persistent SRK found, creating a transient one");
                let template = srk_template()?;
                let cpkr = self.0.execute_with_nullauth_session(|ctx| {
                    ctx.create_primary(Hierarchy::Owner, template, Some(srk_auth.clone()), None, None, None)
                })?;
                Srk::Transient(cpkr.key_handle)
            },
            Err(e) => return Err(e.into()),
        };
        if let Err(e) = self.0.tr_set_auth(srk.handle().into(), srk_auth) {
            self.release_srk(srk);
            return Err(e.into())
        }
        Ok(srk)
    }

    /// Fails unless `owner_auth` authorizes the owner hierarchy.
    /// Using a persistent SRK never touches the owner hierarchy, so the
    /// owner auth is checked by changing it to its current value.
    fn verify_owner_auth(&mut self, owner_auth: Auth) -> Result<()> {
        self.0.tr_set_auth(ObjectHandle::Owner, owner_auth.clone())?;
        self.0.execute_with_nullauth_session(|ctx| {
            ctx.hierarchy_change_auth(AuthHandle::Owner, owner_auth)
        })?;
        Ok(())
    }

    fn release_srk(&mut self, srk: Srk) {
        let released = match srk {
            Srk::Transient(handle) => self.0.flush_context(handle.into()),
            Srk::Persistent(handle) => {
                let mut object: ObjectHandle = handle.into();
                self.0.tr_close(&mut object)
            },
        };
        if let Err(e) = released {
            log::warn!("couldn't release SRK handle: {}", e);
        }
    }
}

impl TpmOperations for TPM {
    fn make_identity(
        &mut self,
        srk_auth: &AuthValue,
        owner_auth: &AuthValue,
        aik_auth: &AuthValue,
        privacy_ca: Option<&PrivacyCa>,
    ) -> Result<Vec<u8>> {
        if privacy_ca.is_some() {
            return Err(Error::PrivacyCaUnsupported)
        }

        let owner_auth = owner_auth.to_tpm_auth()?;
        let srk_auth = srk_auth.to_tpm_auth()?;
        let aik_auth = aik_auth.to_tpm_auth()?;

        log::info!("checking owner auth");
        self.verify_owner_auth(owner_auth)?;
        let srk = self.load_srk(srk_auth)?;

        log::info!("creating AIK");
        let created = aik_template().and_then(|template| {
            self.0.execute_with_nullauth_session(|ctx| {
                ctx.create(srk.handle(), template, Some(aik_auth), None, None, None)
            })
        });
        self.release_srk(srk);
        let aik = created?;

        IdentityBlob::new(aik.out_public, aik.out_private).to_bytes()
    }

    fn owner_clear(&mut self, owner_auth: &AuthValue) -> Result<()> {
        // TPM2_Clear is only authorized through the lockout (or platform) hierarchy.
        self.0.tr_set_auth(ObjectHandle::Lockout, owner_auth.to_tpm_auth()?)?;
        log::info!("clearing TPM");
        self.0.execute_with_nullauth_session(|ctx| ctx.clear(AuthHandle::Lockout))?;
        Ok(())
    }
}

/// RSA-2048 restricted decryption key, the usual storage root key shape.
pub(crate) fn srk_template() -> tss_esapi::Result<Public> {
    let object_attributes = ObjectAttributes::builder()
        .with_fixed_tpm(true)
        .with_fixed_parent(true)
        .with_sensitive_data_origin(true)
        .with_user_with_auth(true)
        .with_no_da(true)
        .with_restricted(true)
        .with_decrypt(true)
        .build()?;

    let parameters = PublicRsaParametersBuilder::new_restricted_decryption_key(
        SymmetricDefinitionObject::AES_128_CFB,
        RsaKeyBits::Rsa2048,
        RsaExponent::default(),
    ).build()?;

    Public::builder()
        .with_public_algorithm(PublicAlgorithm::Rsa)
        .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
        .with_object_attributes(object_attributes)
        .with_rsa_parameters(parameters)
        .with_rsa_unique_identifier(PublicKeyRsa::default())
        .build()
}

/// RSA-2048 restricted signing key using RSASSA with SHA-256.
pub(crate) fn aik_template() -> tss_esapi::Result<Public> {
    let object_attributes = ObjectAttributes::builder()
        .with_fixed_tpm(true)
        .with_fixed_parent(true)
        .with_sensitive_data_origin(true)
        .with_user_with_auth(true)
        .with_restricted(true)
        .with_sign_encrypt(true)
        .build()?;

    let parameters = PublicRsaParametersBuilder::new()
        .with_scheme(RsaScheme::create(RsaSchemeAlgorithm::RsaSsa, Some(HashingAlgorithm::Sha256))?)
        .with_key_bits(RsaKeyBits::Rsa2048)
        .with_exponent(RsaExponent::default())
        .with_is_signing_key(true)
        .with_is_decryption_key(false)
        .with_restricted(true)
        .build()?;

    Public::builder()
        .with_public_algorithm(PublicAlgorithm::Rsa)
        .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
        .with_object_attributes(object_attributes)
        .with_rsa_parameters(parameters)
        .with_rsa_unique_identifier(PublicKeyRsa::default())
        .build()
}

#[cfg(test)]
mod tests {
    use testutil::tpm::SwTpm;
    use tss_esapi::{
        interface_types::{dynamic_handles::Persistent, resource_handles::Provision}, traits::UnMarshall
    };
    use super::*;

    fn persist_srk(tpm: &mut TPM, srk_auth: &AuthValue) {
        let srk_auth = srk_auth.to_tpm_auth().unwrap();
        let template = srk_template().unwrap();
        let persistent = Persistent::Persistent(PersistentTpmHandle::new(SRK_PERSISTENT_HANDLE).unwrap());
        tpm.0.execute_with_nullauth_session(|ctx| {
            let cpkr = ctx.create_primary(Hierarchy::Owner, template, Some(srk_auth), None, None, None)?;
            ctx.evict_control(Provision::Owner, cpkr.key_handle.into(), persistent)?;
            ctx.flush_context(cpkr.key_handle.into())
        }).unwrap();
    }

    fn assert_tpm_error<T: std::fmt::Debug>(result: Result<T>) {
        match result {
            Err(Error::TpmError(tss_esapi::Error::Tss2Error(_))) => {},
            other => panic!("expected TPM error, got {:#?}", other),
        }
    }

    #[test]
    fn plain_paths_are_device_nodes() {
        assert!(matches!(tcti_name_conf("/dev/tpm0").unwrap(), TctiNameConf::Device(_)));
        assert!(matches!(tcti_name_conf("/dev/tpmrm0").unwrap(), TctiNameConf::Device(_)));
    }

    #[test]
    fn explicit_tcti_strings_are_honored() {
        assert!(matches!(tcti_name_conf("device:/dev/tpm0").unwrap(), TctiNameConf::Device(_)));
        assert!(matches!(
            tcti_name_conf("swtpm:host=127.0.0.1,port=2321").unwrap(),
            TctiNameConf::Swtpm(_),
        ));
        assert!(matches!(
            tcti_name_conf("mssim:host=127.0.0.1,port=2321").unwrap(),
            TctiNameConf::Mssim(_),
        ));
    }

    #[test]
    fn opening_missing_device_fails() {
        assert!(TPM::open("/nonexistent/tpm0").is_err());
    }

    #[test]
    fn privacy_ca_is_rejected() {
        let Some(swtpm) = SwTpm::spawn() else { return };
        let mut tpm = TPM::open(&swtpm.tcti).unwrap();
        let pca = PrivacyCa { label: b"pca".to_vec(), public_key: vec![1, 2, 3] };
        let well_known = AuthValue::well_known();
        assert_eq!(
            tpm.make_identity(&well_known, &well_known, &well_known, Some(&pca)).unwrap_err(),
            Error::PrivacyCaUnsupported,
        );
    }

    #[test]
    fn make_identity_returns_restricted_signing_key_blob() {
        let Some(swtpm) = SwTpm::spawn() else { return };
        let mut tpm = TPM::open(&swtpm.tcti).unwrap();
        let well_known = AuthValue::well_known();
        let blob = tpm.make_identity(&well_known, &well_known, &well_known, None).unwrap();

        let public_len = u16::from_be_bytes([blob[0], blob[1]]) as usize;
        let public = Public::unmarshall(&blob[2..2 + public_len]).unwrap();
        let private_offset = 2 + public_len;
        let private_len = u16::from_be_bytes([blob[private_offset], blob[private_offset + 1]]) as usize;
        assert!(private_len > 0);
        assert_eq!(blob.len(), private_offset + 2 + private_len);

        let attributes = public.object_attributes();
        assert!(attributes.restricted());
        assert!(attributes.sign_encrypt());
        assert!(!attributes.decrypt());
    }

    #[test]
    fn make_identity_accepts_custom_srk_and_aik_auth() {
        let Some(swtpm) = SwTpm::spawn() else { return };
        let mut tpm = TPM::open(&swtpm.tcti).unwrap();
        let owner = AuthValue::well_known();
        let srk = AuthValue::derive("srk");
        let aik = AuthValue::derive("aik");
        let first = tpm.make_identity(&srk, &owner, &aik, None).unwrap();
        let second = tpm.make_identity(&srk, &owner, &aik, None).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn make_identity_with_wrong_owner_auth_fails() {
        let Some(swtpm) = SwTpm::spawn() else { return };
        let mut tpm = TPM::open(&swtpm.tcti).unwrap();
        let well_known = AuthValue::well_known();
        let err = tpm.make_identity(&well_known, &AuthValue::derive("secret"), &well_known, None).unwrap_err();
        match err {
            Error::TpmError(tss_esapi::Error::Tss2Error(_)) => {},
            e => panic!("identity created with wrong owner auth: {:#?}", e),
        }
    }

    #[test]
    fn persistent_srk_is_used_with_matching_srk_auth() {
        let Some(swtpm) = SwTpm::spawn() else { return };
        let mut tpm = TPM::open(&swtpm.tcti).unwrap();
        let owner = AuthValue::well_known();
        let srk = AuthValue::derive("srk");
        let aik = AuthValue::derive("aik");
        persist_srk(&mut tpm, &srk);

        let first = tpm.make_identity(&srk, &owner, &aik, None).unwrap();
        let second = tpm.make_identity(&srk, &owner, &aik, None).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn persistent_srk_with_wrong_srk_auth_fails() {
        let Some(swtpm) = SwTpm::spawn() else { return };
        let mut tpm = TPM::open(&swtpm.tcti).unwrap();
        let well_known = AuthValue::well_known();
        persist_srk(&mut tpm, &AuthValue::derive("srk"));

        assert_tpm_error(tpm.make_identity(&AuthValue::derive("not the srk"), &well_known, &well_known, None));
    }

    #[test]
    fn persistent_srk_still_requires_owner_auth() {
        let Some(swtpm) = SwTpm::spawn() else { return };
        let mut tpm = TPM::open(&swtpm.tcti).unwrap();
        let well_known = AuthValue::well_known();
        persist_srk(&mut tpm, &well_known);

        assert_tpm_error(tpm.make_identity(&well_known, &AuthValue::derive("secret"), &well_known, None));
        tpm.make_identity(&well_known, &well_known, &well_known, None).unwrap();
    }

    #[test]
    fn repeated_identities_do_not_leak_transient_srks() {
        let Some(swtpm) = SwTpm::spawn() else { return };
        let mut tpm = TPM::open(&swtpm.tcti).unwrap();
        let well_known = AuthValue::well_known();
        // swtpm only has room for a handful of loaded objects
        for _ in 0..8 {
            assert_tpm_error(tpm.make_identity(&well_known, &AuthValue::derive("secret"), &well_known, None));
            tpm.make_identity(&well_known, &well_known, &well_known, None).unwrap();
        }
    }

    #[test]
    fn owner_clear_with_well_known_auth_succeeds() {
        let Some(swtpm) = SwTpm::spawn() else { return };
        let mut tpm = TPM::open(&swtpm.tcti).unwrap();
        tpm.owner_clear(&AuthValue::well_known()).unwrap();
    }

    #[test]
    fn owner_clear_with_wrong_auth_fails() {
        let Some(swtpm) = SwTpm::spawn() else { return };
        let mut tpm = TPM::open(&swtpm.tcti).unwrap();
        match tpm.owner_clear(&AuthValue::derive("secret")).unwrap_err() {
            Error::TpmError(tss_esapi::Error::Tss2Error(_)) => {},
            e => panic!("wrong error: {:#?}", e),
        }
    }

    #[test]
    fn tpm_can_be_reopened_after_drop() {
        let Some(swtpm) = SwTpm::spawn() else { return };
        drop(TPM::open(&swtpm.tcti).unwrap());
        let mut tpm = TPM::open(&swtpm.tcti).unwrap();
        tpm.owner_clear(&AuthValue::well_known()).unwrap();
    }
}
