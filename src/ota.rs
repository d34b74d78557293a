//! The OTA signature chained onto a boot-signed image
//!
//! The OTA record (the SHA-256 of an OTA signature block, followed by the block itself)
//! is appended unpadded to a boot-signed image. Its signature covers the whole
//! boot-signed image, signature sector included, and is made with a key independent
//! of the boot signing key.

use alloc::vec::Vec;
use core::ops::Deref;

use embedded_io_async::Write;

use log::{debug, info};

use crate::image::{self, check_len};
use crate::{Artifact, Error, Layout, Reason, SBV2RsaPubKey, SBV2RsaSignatureBlock, Signer};

/// A boot-signed image followed by the OTA record
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OtaSignedImage(Vec<u8>);

impl OtaSignedImage {
    /// The wrapped boot-signed image
    pub fn boot_signed(&self) -> &[u8] {
        &self.0[..self.body_end()]
    }

    /// The stored SHA-256 of the OTA signature block
    pub fn block_hash(&self) -> &[u8] {
        let start = self.body_end();

        &self.0[start..start + Layout::OTA_HASH_LEN]
    }

    /// The OTA signature block (not validated)
    pub fn block(&self) -> Result<SBV2RsaSignatureBlock, Error> {
        SBV2RsaSignatureBlock::parse(&self.0[self.body_end() + Layout::OTA_HASH_LEN..])
    }

    /// Save the OTA-signed image to the output
    ///
    /// # Arguments
    /// * `out` - Output to write the OTA-signed image to
    pub async fn save<W>(&self, mut out: W) -> Result<(), W::Error>
    where
        W: Write,
    {
        out.write_all(&self.0).await
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }

    fn body_end(&self) -> usize {
        self.0.len() - Layout::OTA_RECORD_LEN
    }
}

impl Deref for OtaSignedImage {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<Vec<u8>> for OtaSignedImage {
    type Error = Error;

    fn try_from(image: Vec<u8>) -> Result<Self, Self::Error> {
        check_len(&image, Layout::OTA_RECORD_LEN, Artifact::OtaSigned)?;

        Ok(Self(image))
    }
}

/// Wrap a boot-signed image with the OTA signature
///
/// # Arguments
/// * `boot_signed` - The boot-signed image; must be sector-aligned
/// * `pub_key` - Public key of the OTA signing key, to be embedded in the signature block
/// * `signer` - Signer producing the RSA-PSS signature over the boot-signed image digest
pub async fn sign_ota<S>(
    boot_signed: &[u8],
    pub_key: &SBV2RsaPubKey,
    mut signer: S,
) -> Result<OtaSignedImage, Error<S::Error>>
where
    S: Signer,
{
    let digest = image::digest_ota_body(boot_signed).map_err(|e| e.widen())?;

    let signature = signer
        .sign(&digest)
        .await
        .map_err(|e| Error::new(Reason::Signer(e)).on(Artifact::OtaSigned))?;

    let block = SBV2RsaSignatureBlock::pack(&digest, pub_key, &signature).to_bytes();
    let block_hash = image::digest(&block);

    let mut signed = Vec::with_capacity(boot_signed.len() + Layout::OTA_RECORD_LEN);
    signed.extend_from_slice(boot_signed);
    signed.extend_from_slice(&block_hash);
    signed.extend_from_slice(&block);

    info!("Image OTA-signed, {}B", signed.len());

    Ok(OtaSignedImage(signed))
}

/// Verify an OTA-signed image
///
/// Only the OTA signature is checked; the wrapped boot-signed image can be checked
/// separately with `verify_boot`.
///
/// Returns the validated OTA signature block.
///
/// # Arguments
/// * `signed` - The OTA-signed image
/// * `trusted` - The trusted OTA public key; the key embedded in the signature block is ignored
pub fn verify_ota(signed: &[u8], trusted: &SBV2RsaPubKey) -> Result<SBV2RsaSignatureBlock, Error> {
    verify(signed, trusted).map_err(|e| e.on(Artifact::OtaSigned))
}

fn verify(signed: &[u8], trusted: &SBV2RsaPubKey) -> Result<SBV2RsaSignatureBlock, Error> {
    check_len(signed, Layout::OTA_RECORD_LEN, Artifact::OtaSigned)?;

    let (body, record) = signed.split_at(signed.len() - Layout::OTA_RECORD_LEN);
    let (stored_hash, block) = record.split_at(Layout::OTA_HASH_LEN);

    if image::digest(block).as_slice() != stored_hash {
        Err(Error::new(Reason::BlockHash))?;
    }

    let block = SBV2RsaSignatureBlock::unpack(block)?;

    debug!("OTA signature block: {:?}", block);

    let digest = image::digest(body);

    block.verify_digest(&digest, &trusted.rsa_pub_key()?)?;

    info!("OTA signature verified ({}B signed)", body.len());

    Ok(block)
}

#[cfg(test)]
mod test {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use rsa::pkcs8::DecodePrivateKey;
    use rsa::RsaPrivateKey;

    use crate::test_keys::*;
    use crate::{
        verify_boot, Artifact, BootSignedImage, ErrorKind, KeySource, Layout, PresignedSigner,
        Reason, RsaSigner, SBV2RsaPubKey,
    };

    use super::{sign_ota, verify_ota, OtaSignedImage};

    fn boot_key() -> SBV2RsaPubKey {
        SBV2RsaPubKey::load(KeySource::DerCertificate(BOOT_CERT_DER)).unwrap()
    }

    fn ota_key() -> SBV2RsaPubKey {
        SBV2RsaPubKey::load(KeySource::DerCertificate(OTA_CERT_DER)).unwrap()
    }

    #[test]
    fn sign_and_verify() {
        let priv_key = RsaPrivateKey::from_pkcs8_pem(OTA_KEY_PEM).unwrap();
        let signer = RsaSigner::new(&priv_key, StdRng::seed_from_u64(0)).unwrap();

        let boot_signed = BootSignedImage::try_from(BOOT_SIGNED.to_vec()).unwrap();

        let signed =
            embassy_futures::block_on(sign_ota(&boot_signed, &ota_key(), signer)).unwrap();

        assert_eq!(signed.len(), 13536);
        assert_eq!(signed.len() % Layout::SECTOR_SIZE, 1248);
        assert_eq!(signed.boot_signed(), BOOT_SIGNED);
        assert_eq!(
            signed.block_hash(),
            crate::digest(&signed[BOOT_SIGNED.len() + 32..])
        );

        let block = verify_ota(&signed, &ota_key()).unwrap();
        assert_eq!(block, signed.block().unwrap());
        assert_eq!(block.digest(), &crate::digest(BOOT_SIGNED));

        // The boot signature inside stays valid
        verify_boot(signed.boot_signed(), &boot_key()).unwrap();

        let err = verify_ota(&signed, &boot_key()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(err.artifact(), Some(Artifact::OtaSigned));
    }

    #[test]
    fn presigned_matches_reference() {
        let signer = PresignedSigner::new(OTA_SIG).unwrap();

        let signed =
            embassy_futures::block_on(sign_ota(BOOT_SIGNED, &ota_key(), signer)).unwrap();

        assert_eq!(&signed[..], OTA_SIGNED);
    }

    #[test]
    fn verify_reference() {
        verify_ota(OTA_SIGNED, &ota_key()).unwrap();

        let err = verify_ota(OTA_SIGNED, &boot_key()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(matches!(err.reason(), Reason::Signature));
    }

    #[test]
    fn requires_boot_signed_alignment() {
        let signer = PresignedSigner::new(OTA_SIG).unwrap();

        let err = embassy_futures::block_on(sign_ota(&BOOT_SIGNED[..12000], &ota_key(), signer))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Alignment);
    }

    #[test]
    fn wrong_remainder() {
        let err = verify_ota(BOOT_SIGNED, &ota_key()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Alignment);

        let err = verify_ota(&OTA_SIGNED[..OTA_SIGNED.len() - 1], &ota_key()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Alignment);

        let err = OtaSignedImage::try_from(BOOT_SIGNED.to_vec()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Alignment);
    }

    #[test]
    fn corrupted_block_hash() {
        let mut signed = OTA_SIGNED.to_vec();
        signed[12288] ^= 0x01;

        let err = verify_ota(&signed, &ota_key()).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert!(matches!(err.reason(), Reason::BlockHash));
    }

    #[test]
    fn corrupted_block() {
        // Block changes are caught by the block hash before anything else
        let mut signed = OTA_SIGNED.to_vec();
        signed[12288 + 32 + Layout::SIGNATURE_OFFSET] ^= 0x01;

        let err = verify_ota(&signed, &ota_key()).unwrap_err();
        assert!(matches!(err.reason(), Reason::BlockHash));
    }

    #[test]
    fn corrupted_body() {
        for offset in [0, 100, 8192, 12287] {
            let mut signed = OTA_SIGNED.to_vec();
            signed[offset] ^= 0x01;

            let err = verify_ota(&signed, &ota_key()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Authentication);
            assert!(matches!(err.reason(), Reason::Digest));
        }
    }

    #[test]
    fn bad_header_with_consistent_hashes() {
        let signed = with_block_byte(Layout::MAGIC_OFFSET, 0x00);

        let err = verify_ota(&signed, &ota_key()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(matches!(err.reason(), Reason::Magic(0x00)));

        let signed = with_block_byte(Layout::VERSION_OFFSET, 0x03);

        let err = verify_ota(&signed, &ota_key()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(matches!(err.reason(), Reason::Version(0x03)));
        assert_eq!(err.artifact(), Some(Artifact::OtaSigned));
    }

    /// The reference OTA image with one block byte replaced, CRC and block hash fixed up
    fn with_block_byte(offset: usize, value: u8) -> alloc::vec::Vec<u8> {
        const CRC32: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

        let mut signed = OTA_SIGNED.to_vec();
        let start = 12288 + 32;

        {
            let block = &mut signed[start..];
            block[offset] = value;

            let crc = CRC32.checksum(&block[..Layout::CRC_COVERAGE]);
            block[Layout::CRC_OFFSET..Layout::CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        }

        let hash = crate::digest(&signed[start..]);
        signed[12288..start].copy_from_slice(&hash);

        signed
    }
}
