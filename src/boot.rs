//! Secure Boot V2 signing and verification of bootloader and application images

use alloc::vec::Vec;
use core::ops::Deref;

use embedded_io_async::Write;

use log::{debug, info};

use crate::image::{self, check_len};
use crate::{Artifact, Error, Layout, Reason, SBV2RsaPubKey, SBV2RsaSignatureBlock, Signer};

/// An image padded to a sector boundary and followed by one sector holding its signature block
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BootSignedImage(Vec<u8>);

impl BootSignedImage {
    /// The signed region, i.e. the aligned image without the signature sector
    pub fn payload(&self) -> &[u8] {
        &self.0[..self.0.len() - Layout::SECTOR_SIZE]
    }

    /// The signature block (not validated)
    pub fn block(&self) -> Result<SBV2RsaSignatureBlock, Error> {
        let start = self.0.len() - Layout::SECTOR_SIZE;

        SBV2RsaSignatureBlock::parse(&self.0[start..start + Layout::BLOCK_LEN])
    }

    /// Save the signed image to the output
    ///
    /// # Arguments
    /// * `out` - Output to write the signed image to
    pub async fn save<W>(&self, mut out: W) -> Result<(), W::Error>
    where
        W: Write,
    {
        out.write_all(&self.0).await
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl Deref for BootSignedImage {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<Vec<u8>> for BootSignedImage {
    type Error = Error;

    /// Accepts any sector-aligned buffer of at least one sector; the signature is not verified
    fn try_from(image: Vec<u8>) -> Result<Self, Self::Error> {
        check_len(&image, 0, Artifact::BootSigned)?;

        Ok(Self(image))
    }
}

/// Sign an image for Secure Boot V2
///
/// The image is padded with 0xFF to a sector boundary, its SHA-256 digest is signed
/// and the signature block is appended in a sector of its own, filled with 0xFF.
///
/// # Arguments
/// * `image` - Raw image to sign
/// * `pub_key` - Public key of the signing key, to be embedded in the signature block
/// * `signer` - Signer producing the RSA-PSS signature over the image digest
pub async fn sign_boot<S>(
    image: Vec<u8>,
    pub_key: &SBV2RsaPubKey,
    mut signer: S,
) -> Result<BootSignedImage, Error<S::Error>>
where
    S: Signer,
{
    let mut signed = image::align(image);

    let digest = image::digest(&signed);

    debug!("Boot digest: {:02x?}", digest);

    let signature = signer
        .sign(&digest)
        .await
        .map_err(|e| Error::new(Reason::Signer(e)).on(Artifact::BootSigned))?;

    let block = SBV2RsaSignatureBlock::pack(&digest, pub_key, &signature);

    signed.extend_from_slice(&block.to_bytes());
    signed.resize(signed.len() + Layout::SECTOR_SIZE - Layout::BLOCK_LEN, Layout::FILL_BYTE);

    info!("Image signed, {}B", signed.len());

    Ok(BootSignedImage(signed))
}

/// Verify a Secure Boot V2 signed image
///
/// Returns the validated signature block.
///
/// # Arguments
/// * `signed` - The signed image
/// * `trusted` - The trusted public key; the key embedded in the signature block is ignored
pub fn verify_boot(
    signed: &[u8],
    trusted: &SBV2RsaPubKey,
) -> Result<SBV2RsaSignatureBlock, Error> {
    verify(signed, trusted).map_err(|e| e.on(Artifact::BootSigned))
}

fn verify(signed: &[u8], trusted: &SBV2RsaPubKey) -> Result<SBV2RsaSignatureBlock, Error> {
    check_len(signed, 0, Artifact::BootSigned)?;

    let (region, sector) = signed.split_at(signed.len() - Layout::SECTOR_SIZE);

    let block = SBV2RsaSignatureBlock::unpack(&sector[..Layout::BLOCK_LEN])?;

    debug!("Signature block: {:?}", block);

    let digest = image::digest(region);

    block.verify_digest(&digest, &trusted.rsa_pub_key()?)?;

    info!("Boot signature verified ({}B signed)", region.len());

    Ok(block)
}
