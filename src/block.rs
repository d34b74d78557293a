//! The ESP Secure Boot V2 RSA signature block codec

use embedded_io_async::Write;

use log::debug;

use rsa::{Pss, RsaPublicKey};

use sha2::Sha256;

use crate::image::Sha256Digest;
use crate::{Error, Layout, Reason, SBV2RsaPubKey};

/// A raw RSA-3072 signature
pub type RsaSignature = [u8; Layout::KEY_LEN];

/// A serialized signature block
pub type SignatureBlockBytes = [u8; Layout::BLOCK_LEN];

/// ESP Secure Boot V2 RSA Signature Block
/// https://docs.espressif.com/projects/esp-idf/en/stable/esp32/security/secure-boot-v2.html#signature-block-format
///
/// This type is `repr(C)` and consists of byte arrays only, so its memory layout represents exactly
/// the layout of a serialized ESP Secure Boot V2 RSA signature block.
///
/// Algorithms based on https://github.com/espressif/esptool/blob/master/espsecure
///
/// Note 1: In a boot-signed image, the rest of the 4K sector containing the block is filled with 0xFF.
/// Note 2: In an OTA-signed image, the block is not padded and is preceded by its own SHA-256 hash.
#[derive(Clone, Eq, PartialEq)]
#[repr(C)]
pub struct SBV2RsaSignatureBlock {
    /// Magic byte. Always 0xe7
    magic: u8,
    /// Version number byte. Always 0x02
    version: u8,
    /// Padding bytes. Reserved. Ignored.
    padding: [u8; 2],
    /// SHA-256 hash of the signed content
    sha256: Sha256Digest,
    /// RSA public key
    rsa_pub_key: SBV2RsaPubKey,
    /// RSA-PSS Signature result (section 8.1.1 of RFC8017) of the signed content,
    /// computed using following PSS parameters:
    /// SHA256 hash, MGF1 function, salt length 32 bytes, default trailer field (0xBC).
    ///
    /// NOTE: LE order instead of (regular) BE order, as the Esp RSA peripheral uses LE.
    rsa_pss_signature: RsaSignature,
    /// CRC32 of the preceding 1196 bytes. LE order.
    crc32: [u8; 4],
    /// Zero padding to length 1216 bytes.
    padding2: [u8; 16],
}

const _: () = assert!(core::mem::size_of::<SBV2RsaSignatureBlock>() == Layout::BLOCK_LEN);

impl SBV2RsaSignatureBlock {
    /// Assemble a signature block
    ///
    /// # Arguments
    /// * `digest` - SHA-256 digest of the signed content
    /// * `pub_key` - Public key matching the private key the signature was made with
    /// * `signature` - RSA-PSS signature over `digest`, in its native BE order
    pub fn pack(digest: &Sha256Digest, pub_key: &SBV2RsaPubKey, signature: &RsaSignature) -> Self {
        let mut block = Self::new_empty();

        block.sha256 = *digest;
        block.rsa_pub_key = pub_key.clone();
        block.rsa_pss_signature = *signature;
        block.rsa_pss_signature.reverse(); // To LE
        block.fill_crc32();

        block
    }

    /// Parse a signature block without validating anything but its length
    ///
    /// # Arguments
    /// * `data` - The 1216 bytes of the block
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        let data: &SignatureBlockBytes = data
            .try_into()
            .map_err(|_| Error::new(Reason::BlockLen(data.len())))?;

        let mut block = Self::new_empty();

        block.magic = data[Layout::MAGIC_OFFSET];
        block.version = data[Layout::VERSION_OFFSET];
        block
            .padding
            .copy_from_slice(&data[Layout::RESERVED_OFFSET..Layout::DIGEST_OFFSET]);
        block
            .sha256
            .copy_from_slice(&data[Layout::DIGEST_OFFSET..Layout::MODULUS_OFFSET]);
        block.rsa_pub_key =
            SBV2RsaPubKey::read_from(&data[Layout::MODULUS_OFFSET..Layout::SIGNATURE_OFFSET]);
        block
            .rsa_pss_signature
            .copy_from_slice(&data[Layout::SIGNATURE_OFFSET..Layout::CRC_OFFSET]);
        block
            .crc32
            .copy_from_slice(&data[Layout::CRC_OFFSET..Layout::PADDING_OFFSET]);
        block
            .padding2
            .copy_from_slice(&data[Layout::PADDING_OFFSET..Layout::BLOCK_LEN]);

        Ok(block)
    }

    /// Parse and validate a signature block (length, magic byte, version and CRC32, in that order)
    ///
    /// # Arguments
    /// * `data` - The 1216 bytes of the block
    pub fn unpack(data: &[u8]) -> Result<Self, Error> {
        let block = Self::parse(data)?;

        block.validate()?;

        Ok(block)
    }

    /// Check the magic byte, the version and the CRC32 of the signature block
    pub fn validate(&self) -> Result<(), Error> {
        if self.magic != Layout::MAGIC_BYTE {
            Err(Error::new(Reason::Magic(self.magic)))?;
        }

        if self.version != Layout::VERSION {
            Err(Error::new(Reason::Version(self.version)))?;
        }

        let stored = u32::from_le_bytes(self.crc32);
        let computed = u32::from_le_bytes(self.crc32());

        if stored != computed {
            Err(Error::new(Reason::Crc { stored, computed }))?;
        }

        Ok(())
    }

    /// Serialize the signature block
    pub fn to_bytes(&self) -> SignatureBlockBytes {
        let mut data = [0; Layout::BLOCK_LEN];

        data[Layout::MAGIC_OFFSET] = self.magic;
        data[Layout::VERSION_OFFSET] = self.version;
        data[Layout::RESERVED_OFFSET..Layout::DIGEST_OFFSET].copy_from_slice(&self.padding);
        data[Layout::DIGEST_OFFSET..Layout::MODULUS_OFFSET].copy_from_slice(&self.sha256);
        self.rsa_pub_key
            .write_to(&mut data[Layout::MODULUS_OFFSET..Layout::SIGNATURE_OFFSET]);
        data[Layout::SIGNATURE_OFFSET..Layout::CRC_OFFSET]
            .copy_from_slice(&self.rsa_pss_signature);
        data[Layout::CRC_OFFSET..Layout::PADDING_OFFSET].copy_from_slice(&self.crc32);
        data[Layout::PADDING_OFFSET..].copy_from_slice(&self.padding2);

        data
    }

    /// Save the Secure Boot V2 RSA signature block to the output
    ///
    /// # Arguments
    /// * `out` - Output to write the signature block to
    /// * `padded` - Whether to pad the output with 0xFF to a whole sector
    pub async fn save<W>(&self, mut out: W, padded: bool) -> Result<(), W::Error>
    where
        W: Write,
    {
        out.write_all(&self.to_bytes()).await?;

        if padded {
            let buf = [Layout::FILL_BYTE; 256];
            let mut remainder = Layout::SECTOR_SIZE - Layout::BLOCK_LEN;

            while remainder > 0 {
                let len = core::cmp::min(remainder, buf.len());
                out.write_all(&buf[..len]).await?;
                remainder -= len;
            }
        }

        Ok(())
    }

    /// Verify a digest and the signature over it against this signature block
    ///
    /// Only the trusted key is used for the signature check; the key embedded
    /// in the block is for the Esp RSA peripheral and is not a trust anchor.
    ///
    /// Arguments
    /// * `digest` - Sha-256 digest of the signed content, as computed by the verifier
    /// * `trusted` - The trusted public key
    pub fn verify_digest(&self, digest: &Sha256Digest, trusted: &RsaPublicKey) -> Result<(), Error> {
        if *digest != self.sha256 {
            Err(Error::new(Reason::Digest))?;
        }

        let pss = Pss::new_with_salt::<Sha256>(Layout::PSS_SALT_LEN);

        trusted
            .verify(pss, digest, &self.signature())
            .map_err(|_| Error::new(Reason::Signature))?;

        Ok(())
    }

    /// Magic byte
    pub fn magic(&self) -> u8 {
        self.magic
    }

    /// Version byte
    pub fn version(&self) -> u8 {
        self.version
    }

    /// The embedded SHA-256 digest of the signed content
    pub fn digest(&self) -> &Sha256Digest {
        &self.sha256
    }

    /// The embedded public key
    ///
    /// NOTE: Informational only. Never use it to decide whether the block is trusted.
    pub fn pub_key(&self) -> &SBV2RsaPubKey {
        &self.rsa_pub_key
    }

    /// The RSA-PSS signature in its native BE order
    pub fn signature(&self) -> RsaSignature {
        let mut signature = self.rsa_pss_signature;
        signature.reverse(); // To BE

        signature
    }

    /// The stored CRC32
    pub fn crc32_value(&self) -> u32 {
        u32::from_le_bytes(self.crc32)
    }

    /// Create an empty Secure Boot V2 RSA signature block in uninitialized state
    const fn new_empty() -> Self {
        Self {
            magic: Layout::MAGIC_BYTE,
            version: Layout::VERSION,
            padding: [0; 2],
            sha256: [0; Layout::DIGEST_LEN],
            rsa_pub_key: SBV2RsaPubKey::new_empty(),
            rsa_pss_signature: [0; Layout::KEY_LEN],
            crc32: [0; 4],
            padding2: [0; 16],
        }
    }

    /// Fill the CRC32 field of the Secure Boot V2 RSA signature block
    fn fill_crc32(&mut self) {
        self.crc32 = self.crc32();
    }

    /// Calculate the CRC32 over the first 1196 bytes of the serialized block
    fn crc32(&self) -> [u8; 4] {
        // CRC-32/ISO-HDLC, same as zlib's
        const CRC32: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

        let checksum = CRC32.checksum(&self.to_bytes()[..Layout::CRC_COVERAGE]);

        debug!("Signature block CRC32: 0x{checksum:08x}");

        checksum.to_le_bytes()
    }
}

impl core::fmt::Debug for SBV2RsaSignatureBlock {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("SBV2RsaSignatureBlock")
            .field("magic", &self.magic)
            .field("version", &self.version)
            .field("sha256", &self.sha256)
            .field("rsa_pub_key", &self.rsa_pub_key)
            .field("crc32", &self.crc32_value())
            .finish_non_exhaustive()
    }
}
