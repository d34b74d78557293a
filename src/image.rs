//! Sector alignment and digesting of opaque image bytes

use alloc::vec::Vec;

use embedded_io_async::Read;

use log::{debug, info};

use sha2::{Digest, Sha256};

use crate::{Artifact, Error, Layout, Reason};

/// A SHA-256 digest
pub type Sha256Digest = [u8; Layout::DIGEST_LEN];

/// Pad the image with 0xFF to the next sector boundary
///
/// A no-op if the image is already sector-aligned. Idempotent.
pub fn align(mut image: Vec<u8>) -> Vec<u8> {
    let remainder = padding_len(image.len());

    if remainder > 0 {
        info!(
            "Image size ({}B) is not a multiple of {}B. Padding {remainder}B with 0xFF",
            image.len(),
            Layout::SECTOR_SIZE
        );

        image.resize(image.len() + remainder, Layout::FILL_BYTE);
    }

    image
}

/// SHA-256 of the provided bytes
pub fn digest(data: &[u8]) -> Sha256Digest {
    Sha256::digest(data).into()
}

/// SHA-256 of the image as it would look after `align`
///
/// This is the digest the boot signature is computed over.
/// The padding is hashed in place, so the image does not need to be copied.
pub fn digest_boot(image: &[u8]) -> Sha256Digest {
    let mut hasher = Sha256::new();

    hasher.update(image);

    let mut remainder = padding_len(image.len());
    let fill = [Layout::FILL_BYTE; 256];

    while remainder > 0 {
        let len = remainder.min(fill.len());
        hasher.update(&fill[..len]);
        remainder -= len;
    }

    let digest = hasher.finalize().into();

    debug!("Boot digest: {:02x?}", digest);

    digest
}

/// SHA-256 of a boot-signed image, signature sector included
///
/// This is the digest the OTA signature is computed over.
pub fn digest_ota_body(boot_signed: &[u8]) -> Result<Sha256Digest, Error> {
    check_len(boot_signed, 0, Artifact::BootSigned)?;

    let digest = digest(boot_signed);

    debug!("OTA body digest: {:02x?}", digest);

    Ok(digest)
}

/// Read a whole image from the provided input
///
/// # Arguments
/// * `read` - Input to read the image from
pub async fn read_image<R>(mut read: R) -> Result<Vec<u8>, R::Error>
where
    R: Read,
{
    let mut image = Vec::new();
    let mut buf = [0; 4096];

    loop {
        let len = read.read(&mut buf).await?;
        if len == 0 {
            break;
        }

        image.extend_from_slice(&buf[..len]);
    }

    Ok(image)
}

/// Number of 0xFF bytes `align` would append to an image of length `len`
pub(crate) fn padding_len(len: usize) -> usize {
    (Layout::SECTOR_SIZE - len % Layout::SECTOR_SIZE) % Layout::SECTOR_SIZE
}

/// Check that `image.len() % SECTOR_SIZE == remainder`
pub(crate) fn check_len(image: &[u8], remainder: usize, artifact: Artifact) -> Result<(), Error> {
    if image.len() % Layout::SECTOR_SIZE != remainder || image.len() < Layout::SECTOR_SIZE {
        Err(Error::new(Reason::ImageLen {
            len: image.len(),
            remainder,
        })
        .on(artifact))?;
    }

    Ok(())
}
