//! RSA public key material in the form expected by the Esp RSA peripheral

use embedded_io_async::Write;

use log::debug;

use num_traits::cast::ToPrimitive;
use num_traits::One;

use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::{spki, DecodePublicKey};
use rsa::{traits::PublicKeyParts, BigUint, RsaPublicKey};

use sha2::{Digest, Sha256};

use x509_cert::der::referenced::OwnedToRef;
use x509_cert::der::{Decode, DecodePem};
use x509_cert::Certificate;

use crate::image::Sha256Digest;
use crate::{Error, KeyError, Layout};

/// Where to load a trusted public key from
#[derive(Debug, Copy, Clone)]
pub enum KeySource<'a> {
    /// PEM-encoded SubjectPublicKeyInfo (`-----BEGIN PUBLIC KEY-----`)
    PemPublicKey(&'a str),
    /// PEM-encoded PKCS#1 RSA public key (`-----BEGIN RSA PUBLIC KEY-----`)
    PemRsaPublicKey(&'a str),
    /// DER-encoded SubjectPublicKeyInfo
    DerPublicKey(&'a [u8]),
    /// PEM-encoded X.509 certificate (`-----BEGIN CERTIFICATE-----`)
    PemCertificate(&'a str),
    /// DER-encoded X.509 certificate
    DerCertificate(&'a [u8]),
}

impl<'a> KeySource<'a> {
    /// Guess the source type from the content
    ///
    /// PEM input is told apart by its armour and label; binary input is assumed
    /// to be a DER certificate, which is what the PKI hands out.
    pub fn detect(data: &'a [u8]) -> Self {
        match core::str::from_utf8(data) {
            Ok(text) if text.trim_start().starts_with("-----BEGIN ") => {
                if text.contains("-----BEGIN CERTIFICATE-----") {
                    Self::PemCertificate(text)
                } else if text.contains("-----BEGIN RSA PUBLIC KEY-----") {
                    Self::PemRsaPublicKey(text)
                } else {
                    Self::PemPublicKey(text)
                }
            }
            _ => Self::DerCertificate(data),
        }
    }

    /// Extract the RSA public key
    fn rsa_pub_key(&self) -> Result<RsaPublicKey, KeyError> {
        match self {
            Self::PemPublicKey(pem) => RsaPublicKey::from_public_key_pem(pem).map_err(decode_error),
            Self::PemRsaPublicKey(pem) => {
                RsaPublicKey::from_pkcs1_pem(pem).map_err(KeyError::DecodePkcs1)
            }
            Self::DerPublicKey(der) => RsaPublicKey::from_public_key_der(der).map_err(decode_error),
            Self::PemCertificate(pem) => {
                let cert = Certificate::from_pem(pem.as_bytes())
                    .map_err(|e| KeyError::Decode(e.into()))?;

                Self::cert_pub_key(&cert)
            }
            Self::DerCertificate(der) => {
                let cert = Certificate::from_der(der).map_err(|e| KeyError::Decode(e.into()))?;

                Self::cert_pub_key(&cert)
            }
        }
    }

    fn cert_pub_key(cert: &Certificate) -> Result<RsaPublicKey, KeyError> {
        RsaPublicKey::try_from(cert.tbs_certificate.subject_public_key_info.owned_to_ref())
            .map_err(decode_error)
    }
}

fn decode_error(e: spki::Error) -> KeyError {
    match e {
        spki::Error::OidUnknown { .. } => KeyError::NotRsa,
        e => KeyError::Decode(e),
    }
}

/// ESP Secure Boot V2 RSA Public key
///
/// Embedded in the signature block, as well as used as-is for
/// generating the public key SHA-256 digest that needs to be burned into E-FUSE
///
/// This type is `repr(C)` and consists of byte arrays only, so its memory layout represents exactly
/// the layout of a serialized ESP Secure Boot V2 RSA public key.
#[derive(Clone, Eq, PartialEq)]
#[repr(C)]
pub struct SBV2RsaPubKey {
    /// RSA Public Modulus used for signature verification. (value ‘n’ in RFC8017).
    ///
    /// NOTE: LE order instead of (regular) BE order, as the Esp RSA peripheral uses LE.
    pub(crate) rsa_public_modulus: [u8; Layout::KEY_LEN],
    /// RSA Public Exponent used for signature verification (value ‘e’ in RFC8017).
    pub(crate) rsa_public_exponent: [u8; 4],
    /// Pre-calculated `R` (`2^(2 * 3072) mod n`), derived from ‘n’.
    ///
    /// NOTE: LE order instead of (regular) BE order, as the Esp RSA peripheral uses LE.
    pub(crate) rsa_precalc_r: [u8; Layout::KEY_LEN],
    /// Pre-calculated `M` (`-n^-1 mod 2^32`), derived from ‘n’. LE order.
    pub(crate) rsa_precalc_m: [u8; 4],
}

const _: () = assert!(core::mem::size_of::<SBV2RsaPubKey>() == Layout::PUB_KEY_LEN);

impl SBV2RsaPubKey {
    /// Load a trusted RSA-3072 public key
    ///
    /// # Arguments
    /// * `source` - PEM/DER public key or X.509 certificate carrying the key
    pub fn load(source: KeySource<'_>) -> Result<Self, Error> {
        let pub_key = source.rsa_pub_key()?;

        Self::create(&pub_key)
    }

    /// Create a new Secure Boot V2 RSA public key from the given RSA public key
    ///
    /// Fails if the key is not RSA-3072 or its exponent does not fit in 32 bits.
    pub fn create(pub_key: &RsaPublicKey) -> Result<Self, Error> {
        check_key_size(pub_key)?;

        let mut this = Self::new_empty();

        this.fill(pub_key)?;

        Ok(this)
    }

    /// The RSA public key, reconstructed from the stored little-endian fields
    pub fn rsa_pub_key(&self) -> Result<RsaPublicKey, Error> {
        RsaPublicKey::new(self.modulus(), BigUint::from(self.exponent()))
            .map_err(|e| KeyError::Rejected(e).into())
    }

    /// RSA modulus `n`
    pub fn modulus(&self) -> BigUint {
        BigUint::from_bytes_le(&self.rsa_public_modulus)
    }

    /// RSA public exponent `e`
    pub fn exponent(&self) -> u32 {
        u32::from_le_bytes(self.rsa_public_exponent)
    }

    /// Montgomery `R^2 mod n` used by the Esp RSA peripheral
    pub fn montgomery_rr(&self) -> BigUint {
        BigUint::from_bytes_le(&self.rsa_precalc_r)
    }

    /// Montgomery `-n^-1 mod 2^32` used by the Esp RSA peripheral
    pub fn montgomery_m(&self) -> u32 {
        u32::from_le_bytes(self.rsa_precalc_m)
    }

    /// The SHA-256 digest of the public key, as burned into the E-FUSE key digest block
    pub fn hash(&self) -> Sha256Digest {
        let mut hasher = Sha256::new();

        self.fill_hash(&mut hasher);

        hasher.finalize().into()
    }

    /// Save the Sha256 hash of the public key to the output
    ///
    /// The saved hash should then be burned into E-FUSE with the `espefuse` tool
    /// when Secure Boot V2 is being enabled for the Esp chip
    ///
    /// # Arguments
    /// * `out` - Output to write the hash to
    pub async fn save_hash<W>(&self, mut out: W) -> Result<(), W::Error>
    where
        W: Write,
    {
        out.write_all(&self.hash()).await
    }

    /// Serialize into the signature block key area
    pub(crate) fn write_to(&self, area: &mut [u8]) {
        let (modulus, rest) = area.split_at_mut(Layout::KEY_LEN);
        let (exponent, rest) = rest.split_at_mut(4);
        let (r, m) = rest.split_at_mut(Layout::KEY_LEN);

        modulus.copy_from_slice(&self.rsa_public_modulus);
        exponent.copy_from_slice(&self.rsa_public_exponent);
        r.copy_from_slice(&self.rsa_precalc_r);
        m.copy_from_slice(&self.rsa_precalc_m);
    }

    /// Deserialize from the signature block key area
    pub(crate) fn read_from(area: &[u8]) -> Self {
        let mut this = Self::new_empty();

        let (modulus, rest) = area.split_at(Layout::KEY_LEN);
        let (exponent, rest) = rest.split_at(4);
        let (r, m) = rest.split_at(Layout::KEY_LEN);

        this.rsa_public_modulus.copy_from_slice(modulus);
        this.rsa_public_exponent.copy_from_slice(exponent);
        this.rsa_precalc_r.copy_from_slice(r);
        this.rsa_precalc_m.copy_from_slice(m);

        this
    }

    /// Fill the Sha256 hash of the public key into the provided hasher
    fn fill_hash(&self, hasher: &mut Sha256) {
        hasher.update(self.rsa_public_modulus);
        hasher.update(self.rsa_public_exponent);
        hasher.update(self.rsa_precalc_r);
        hasher.update(self.rsa_precalc_m);
    }

    /// Create a new empty Secure Boot V2 RSA public key in uninitialized state
    pub(crate) const fn new_empty() -> Self {
        Self {
            rsa_public_modulus: [0; Layout::KEY_LEN],
            rsa_public_exponent: [0; 4],
            rsa_precalc_r: [0; Layout::KEY_LEN],
            rsa_precalc_m: [0; 4],
        }
    }

    /// Fill (initialize) the Secure Boot V2 RSA public key with the given RSA public key
    fn fill(&mut self, pub_key: &RsaPublicKey) -> Result<(), KeyError> {
        let n = pub_key.n();
        let e = pub_key.e().to_u32().ok_or(KeyError::Exponent)?;

        let m = montgomery_m(n).ok_or(KeyError::EvenModulus)?;
        let rr = montgomery_rr(n);

        debug!("Key Montgomery constant M: 0x{m:08x}");

        // Big-endian values are stored little-endian and zero-extended to the field size
        copy_le(&mut self.rsa_public_modulus, n);
        self.rsa_public_exponent = e.to_le_bytes();
        copy_le(&mut self.rsa_precalc_r, &rr);
        self.rsa_precalc_m = m.to_le_bytes();

        Ok(())
    }
}

impl core::fmt::Debug for SBV2RsaPubKey {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("SBV2RsaPubKey")
            .field("n", &self.modulus())
            .field("e", &self.exponent())
            .field("m", &self.montgomery_m())
            .finish_non_exhaustive()
    }
}

pub(crate) fn check_key_size(pub_key: &impl PublicKeyParts) -> Result<(), KeyError> {
    let bits = pub_key.n().bits();

    if bits != Layout::KEY_BITS {
        Err(KeyError::Size(bits))?;
    }

    Ok(())
}

/// `-n^-1 mod 2^32`
///
/// Only the low 32 bits of `n` matter, as `n * n^-1 = 1 (mod 2^32)` depends on nothing else.
/// `None` for an even `n`, which has no inverse.
pub fn montgomery_m(n: &BigUint) -> Option<u32> {
    let mut low = [0; 4];
    let bytes = n.to_bytes_le();
    let len = bytes.len().min(4);
    low[..len].copy_from_slice(&bytes[..len]);

    mod_inverse(u32::from_le_bytes(low) as u64, 1 << 32).map(|inv| (inv as u32).wrapping_neg())
}

/// `2^(2 * bits(n)) mod n`
pub fn montgomery_rr(n: &BigUint) -> BigUint {
    (BigUint::one() << (n.bits() * 2)) % n
}

/// Modular inverse of `a` modulo `modulus` with the extended Euclidean algorithm
fn mod_inverse(a: u64, modulus: u64) -> Option<u64> {
    let modulus = modulus as i128;

    let (mut old_r, mut r) = (a as i128 % modulus, modulus);
    let (mut old_s, mut s) = (1_i128, 0_i128);

    while r != 0 {
        let q = old_r / r;

        (old_r, r) = (r, old_r - q * r);
        (old_s, s) = (s, old_s - q * s);
    }

    (old_r == 1).then(|| old_s.rem_euclid(modulus) as u64)
}

/// Copy a big integer into a little-endian fixed-size field
fn copy_le(field: &mut [u8], value: &BigUint) {
    let bytes = value.to_bytes_le();

    field.fill(0);
    field[..bytes.len()].copy_from_slice(&bytes);
}

#[cfg(test)]
mod test {
    use num_traits::One;

    use rsa::pkcs8::DecodePublicKey;
    use rsa::{BigUint, RsaPublicKey};

    use crate::test_keys::*;
    use crate::{ErrorKind, KeyError, Reason};

    use super::{KeySource, SBV2RsaPubKey};

    #[test]
    fn mod_inverse() {
        assert_eq!(super::mod_inverse(3, 7), Some(5));
        assert_eq!(super::mod_inverse(4, 8), None);
        assert_eq!(super::mod_inverse(0x0b49ac9f, 1 << 32), Some(0x80306f5f));

        for a in [1_u64, 3, 0xffff_ffff, 0x1234_5679, 0x8000_0001] {
            let inv = super::mod_inverse(a, 1 << 32).unwrap();
            assert_eq!((a * inv) % (1 << 32), 1);
        }
    }

    #[test]
    fn montgomery_constants() {
        let key = SBV2RsaPubKey::load(KeySource::DerCertificate(BOOT_CERT_DER)).unwrap();
        let n = key.modulus();

        // Computed independently for this key
        assert_eq!(key.montgomery_m(), 0x7fcf90a1);

        let low = u32::from_le_bytes(n.to_bytes_le()[..4].try_into().unwrap());
        assert_eq!(low.wrapping_mul(key.montgomery_m()), u32::MAX);

        let rr = key.montgomery_rr();
        assert!(rr < n);
        assert_eq!(rr, (BigUint::one() << 6144) % &n);
    }

    #[test]
    fn all_sources_agree() {
        let pem = SBV2RsaPubKey::load(KeySource::PemPublicKey(BOOT_PUB_PEM)).unwrap();
        let der = SBV2RsaPubKey::load(KeySource::DerCertificate(BOOT_CERT_DER)).unwrap();
        let cert_pem = SBV2RsaPubKey::load(KeySource::PemCertificate(BOOT_CERT_PEM)).unwrap();

        let spki_der = {
            use rsa::pkcs8::EncodePublicKey;

            RsaPublicKey::from_public_key_pem(BOOT_PUB_PEM)
                .unwrap()
                .to_public_key_der()
                .unwrap()
        };
        let spki = SBV2RsaPubKey::load(KeySource::DerPublicKey(spki_der.as_bytes())).unwrap();

        assert_eq!(pem, der);
        assert_eq!(pem, cert_pem);
        assert_eq!(pem, spki);
        assert_eq!(pem.exponent(), 65537);
    }

    #[test]
    fn detect_source() {
        assert!(matches!(
            KeySource::detect(BOOT_PUB_PEM.as_bytes()),
            KeySource::PemPublicKey(_)
        ));
        assert!(matches!(
            KeySource::detect(BOOT_CERT_PEM.as_bytes()),
            KeySource::PemCertificate(_)
        ));
        assert!(matches!(
            KeySource::detect(BOOT_CERT_DER),
            KeySource::DerCertificate(_)
        ));
    }

    #[test]
    fn pkcs1_pem() {
        assert!(matches!(
            KeySource::detect(BOOT_PUB_PKCS1_PEM.as_bytes()),
            KeySource::PemRsaPublicKey(_)
        ));

        let pkcs1 = SBV2RsaPubKey::load(KeySource::detect(BOOT_PUB_PKCS1_PEM.as_bytes())).unwrap();
        let spki = SBV2RsaPubKey::load(KeySource::PemPublicKey(BOOT_PUB_PEM)).unwrap();

        assert_eq!(pkcs1, spki);
        assert_eq!(pkcs1.hash(), BOOT_KEY_DIGEST);

        let err = SBV2RsaPubKey::load(KeySource::PemRsaPublicKey(BOOT_PUB_PEM)).unwrap_err();
        assert!(matches!(err.reason(), Reason::Key(KeyError::DecodePkcs1(_))));
    }

    #[test]
    fn rejects_even_modulus() {
        let n = BigUint::one() << 3071;

        assert_eq!(super::montgomery_m(&n), None);
        assert_eq!(super::montgomery_m(&(n.clone() + 1_u32)), Some(u32::MAX));

        let pub_key = RsaPublicKey::new_unchecked(n, BigUint::from(65537_u32));
        let err = SBV2RsaPubKey::create(&pub_key).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Key);
        assert!(matches!(err.reason(), Reason::Key(KeyError::EvenModulus)));
    }

    #[test]
    fn rejects_small_key() {
        let err = SBV2RsaPubKey::load(KeySource::PemPublicKey(SMALL_PUB_PEM)).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Key);
        assert!(matches!(err.reason(), Reason::Key(KeyError::Size(2048))));
    }

    #[test]
    fn rejects_ec_key() {
        let err = SBV2RsaPubKey::load(KeySource::PemPublicKey(EC_PUB_PEM)).unwrap_err();
        assert!(matches!(err.reason(), Reason::Key(KeyError::NotRsa)));

        let err = SBV2RsaPubKey::load(KeySource::DerCertificate(EC_CERT_DER)).unwrap_err();
        assert!(matches!(err.reason(), Reason::Key(KeyError::NotRsa)));
    }

    #[test]
    fn rejects_garbage() {
        let err = SBV2RsaPubKey::load(KeySource::DerCertificate(&[0x30, 0x03, 1, 2])).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Key);
        assert!(matches!(err.reason(), Reason::Key(KeyError::Decode(_))));
    }

    #[test]
    fn rsa_key_round_trip() {
        let pub_key = RsaPublicKey::from_public_key_pem(OTA_PUB_PEM).unwrap();
        let key = SBV2RsaPubKey::create(&pub_key).unwrap();

        assert_eq!(key.rsa_pub_key().unwrap(), pub_key);
    }

    #[test]
    fn efuse_hash() {
        let key = SBV2RsaPubKey::load(KeySource::DerCertificate(BOOT_CERT_DER)).unwrap();

        let mut out = alloc::vec::Vec::new();
        embassy_futures::block_on(key.save_hash(VecWrite(&mut out))).unwrap();

        assert_eq!(out, BOOT_KEY_DIGEST);
    }
}
