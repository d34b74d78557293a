//! The signing capability
//!
//! The codec never touches private key material itself; it asks a `Signer` for
//! an RSA-PSS signature over a digest it has computed.

use core::convert::Infallible;

use rand_core::CryptoRngCore;

use rsa::{traits::PublicKeyParts, Pss, RsaPrivateKey, RsaPublicKey};

use sha2::Sha256;

use crate::image::Sha256Digest;
use crate::key::check_key_size;
use crate::{Error, Layout, Reason, RsaSignature};

/// Produces RSA-PSS (SHA-256, MGF1-SHA-256, salt length 32) signatures over
/// pre-computed SHA-256 digests with an RSA-3072 key
///
/// The signature is returned in its standard BE order.
/// Signing might be slow (e.g. a remote signing service), hence the method is async.
#[allow(async_fn_in_trait)]
pub trait Signer {
    /// The error returned when signing fails
    type Error;

    /// Sign the digest, treating it as already hashed
    async fn sign(&mut self, digest: &Sha256Digest) -> Result<RsaSignature, Self::Error>;
}

impl<T> Signer for &mut T
where
    T: Signer,
{
    type Error = T::Error;

    async fn sign(&mut self, digest: &Sha256Digest) -> Result<RsaSignature, Self::Error> {
        (**self).sign(digest).await
    }
}

/// A signer holding the RSA private key in-process
///
/// Useful for development and for simulating the PKI.
pub struct RsaSigner<'a, C> {
    priv_key: &'a RsaPrivateKey,
    rng: C,
}

impl<'a, C> RsaSigner<'a, C>
where
    C: CryptoRngCore,
{
    /// Create a new signer
    ///
    /// # Arguments
    /// * `priv_key` - RSA-3072 private key to sign with
    /// * `rng` - Random number generator for the PSS salt and the RSA blinding
    pub fn new(priv_key: &'a RsaPrivateKey, rng: C) -> Result<Self, Error> {
        check_key_size(priv_key)?;

        Ok(Self { priv_key, rng })
    }

    /// The public key matching the signing key
    pub fn pub_key(&self) -> RsaPublicKey {
        self.priv_key.to_public_key()
    }
}

impl<C> Signer for RsaSigner<'_, C>
where
    C: CryptoRngCore,
{
    type Error = rsa::Error;

    async fn sign(&mut self, digest: &Sha256Digest) -> Result<RsaSignature, Self::Error> {
        let pss = Pss::new_with_salt::<Sha256>(Layout::PSS_SALT_LEN);

        let signature = self.priv_key.sign_with_rng(&mut self.rng, pss, digest)?;

        let mut result = [0; Layout::KEY_LEN];

        // Always `size()` bytes long, and the key size was checked on creation
        debug_assert_eq!(signature.len(), self.priv_key.size());
        result.copy_from_slice(&signature);

        Ok(result)
    }
}

/// A signer returning a signature produced out of band by an external PKI
///
/// It does not look at the digest; verify the assembled artifact afterwards
/// to make sure the signature really is over it.
#[derive(Clone)]
pub struct PresignedSigner(RsaSignature);

impl PresignedSigner {
    /// Create a new signer from a raw RSA-3072 signature
    ///
    /// # Arguments
    /// * `signature` - The raw signature, in its standard BE order
    pub fn new(signature: &[u8]) -> Result<Self, Error> {
        let signature = signature
            .try_into()
            .map_err(|_| Error::new(Reason::SignatureLen(signature.len())))?;

        Ok(Self(signature))
    }
}

impl Signer for PresignedSigner {
    type Error = Infallible;

    async fn sign(&mut self, _digest: &Sha256Digest) -> Result<RsaSignature, Self::Error> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod test {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
    use rsa::{Pss, RsaPrivateKey, RsaPublicKey};

    use sha2::Sha256;

    use crate::test_keys::*;
    use crate::{ErrorKind, KeyError, Reason};

    use super::{PresignedSigner, RsaSigner, Signer};

    #[test]
    fn rsa_signer_signs_prehashed_digest() {
        let priv_key = RsaPrivateKey::from_pkcs8_pem(BOOT_KEY_PEM).unwrap();
        let mut signer = RsaSigner::new(&priv_key, StdRng::seed_from_u64(1)).unwrap();

        let digest = crate::digest(b"hello");
        let signature = embassy_futures::block_on(signer.sign(&digest)).unwrap();

        RsaPublicKey::from_public_key_pem(BOOT_PUB_PEM)
            .unwrap()
            .verify(Pss::new_with_salt::<Sha256>(32), &digest, &signature)
            .unwrap();
    }

    #[test]
    fn rsa_signer_rejects_small_key() {
        let priv_key = RsaPrivateKey::new(&mut StdRng::seed_from_u64(2), 1024).unwrap();

        let err = RsaSigner::new(&priv_key, StdRng::seed_from_u64(3))
            .err()
            .unwrap();

        assert_eq!(err.kind(), ErrorKind::Key);
        assert!(matches!(err.reason(), Reason::Key(KeyError::Size(1024))));
    }

    #[test]
    fn presigned_signer() {
        let mut signer = PresignedSigner::new(BOOT_SIG).unwrap();

        let signature = embassy_futures::block_on(signer.sign(&[0; 32])).unwrap();
        assert_eq!(&signature[..], BOOT_SIG);

        let err = PresignedSigner::new(&BOOT_SIG[1..]).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(matches!(err.reason(), Reason::SignatureLen(383)));
    }
}
