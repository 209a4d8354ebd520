use tss_esapi::{structures::{Private, Public}, traits::Marshall};

use crate::tpm::{Error, Result};

/// Public and private halves of a freshly created identity key.
///
/// Serialized as two big-endian u16 length-prefixed fields: the marshalled
/// TPMT_PUBLIC followed by the TPM2B_PRIVATE buffer, which together are
/// enough to load the key under the same parent.
#[derive(Debug)]
pub struct IdentityBlob {
    public: Public,
    private: Private,
}

impl IdentityBlob {
    pub fn new(public: Public, private: Private) -> Self {
        IdentityBlob { public, private }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let public = self.public.marshall()?;
        let private = self.private.value();
        let mut blob = Vec::with_capacity(public.len() + private.len() + 4);
        push_sized(&mut blob, &public)?;
        push_sized(&mut blob, private)?;
        Ok(blob)
    }
}

fn push_sized(blob: &mut Vec<u8>, field: &[u8]) -> Result<()> {
    let size = u16::try_from(field.len()).map_err(|_| Error::BlobTooLarge)?;
    blob.extend_from_slice(&size.to_be_bytes());
    blob.extend_from_slice(field);
    Ok(())
}
