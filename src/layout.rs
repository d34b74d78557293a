//! Fixed layout of the ESP Secure Boot V2 (RSA) artifacts
//!
//! All sizes and offsets are dictated by the ROM bootloader and must not change.
//! https://docs.espressif.com/projects/esp-idf/en/stable/esp32/security/secure-boot-v2.html#signature-block-format

/// Sizes, offsets and magic values shared by all the components of the crate
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Layout;

impl Layout {
    /// Flash sector size; images are padded to it and the signature block occupies one sector
    pub const SECTOR_SIZE: usize = 4096;

    /// Byte used for padding images and the signature sector
    pub const FILL_BYTE: u8 = 0xff;

    /// Magic byte of the signature block (at offset 0)
    pub const MAGIC_BYTE: u8 = 0xe7;

    /// Version byte of the signature block (at offset 1)
    pub const VERSION: u8 = 0x02;

    /// RSA modulus size in bits. The only size supported by the Esp RSA peripheral for SBV2
    pub const KEY_BITS: usize = 3072;

    /// RSA modulus (and signature) size in bytes
    pub const KEY_LEN: usize = Self::KEY_BITS / 8;

    /// RSA-PSS salt length
    pub const PSS_SALT_LEN: usize = 32;

    /// SHA-256 digest length
    pub const DIGEST_LEN: usize = 32;

    pub const MAGIC_OFFSET: usize = 0;
    pub const VERSION_OFFSET: usize = 1;
    pub const RESERVED_OFFSET: usize = 2;
    pub const DIGEST_OFFSET: usize = 4;
    pub const MODULUS_OFFSET: usize = Self::DIGEST_OFFSET + Self::DIGEST_LEN;
    pub const EXPONENT_OFFSET: usize = Self::MODULUS_OFFSET + Self::KEY_LEN;
    pub const RR_OFFSET: usize = Self::EXPONENT_OFFSET + 4;
    pub const M_OFFSET: usize = Self::RR_OFFSET + Self::KEY_LEN;
    pub const SIGNATURE_OFFSET: usize = Self::M_OFFSET + 4;
    pub const CRC_OFFSET: usize = Self::SIGNATURE_OFFSET + Self::KEY_LEN;
    pub const PADDING_OFFSET: usize = Self::CRC_OFFSET + 4;

    /// Length of the public key area (n, e, rr, m) inside the signature block
    pub const PUB_KEY_LEN: usize = Self::SIGNATURE_OFFSET - Self::MODULUS_OFFSET;

    /// Number of leading signature block bytes covered by the CRC32
    pub const CRC_COVERAGE: usize = Self::CRC_OFFSET;

    /// Total length of a signature block
    pub const BLOCK_LEN: usize = Self::PADDING_OFFSET + 16;

    /// Length of the SHA-256 hash of the OTA signature block which precedes it
    pub const OTA_HASH_LEN: usize = Self::DIGEST_LEN;

    /// Length of the OTA record (block hash followed by the block) appended to a boot-signed image
    pub const OTA_RECORD_LEN: usize = Self::OTA_HASH_LEN + Self::BLOCK_LEN;
}

const _: () = assert!(Layout::MODULUS_OFFSET == 36);
const _: () = assert!(Layout::EXPONENT_OFFSET == 420);
const _: () = assert!(Layout::RR_OFFSET == 424);
const _: () = assert!(Layout::M_OFFSET == 808);
const _: () = assert!(Layout::SIGNATURE_OFFSET == 812);
const _: () = assert!(Layout::CRC_OFFSET == 1196);
const _: () = assert!(Layout::BLOCK_LEN == 1216);
const _: () = assert!(Layout::OTA_RECORD_LEN == 1248);
const _: () = assert!(Layout::OTA_RECORD_LEN < Layout::SECTOR_SIZE);
