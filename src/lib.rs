//! Utilities for ESP Secure Boot V2 RSA signature blocks and the OTA signature chained onto them
//!
//! Two signatures are supported:
//! - The Secure Boot V2 signature, verified by the ROM bootloader at power-on. The image is padded
//!   with 0xFF to a 4K boundary and followed by a 4K sector holding the signature block.
//! - The OTA signature, authenticating an already boot-signed image for field upgrades with a key
//!   independent of the boot key. The boot-signed image is followed by the SHA-256 of the OTA
//!   signature block and by the block itself, unpadded.
//!
//! The module is `no_std` (but needs `alloc` because Rust Crypto RSA needs it)
//! so that it can also be used on the chip itself for e.g. verifying image signatures
//! during OTA updates for baremetal apps.
//!
//! Private keys never need to be handed to the signing functions: signatures are requested
//! from a [`Signer`], which might as well be a remote PKI.
//!
//! * https://docs.espressif.com/projects/esp-idf/en/v5.3.1/esp32h2/security/secure-boot-v2.html#signature-block-format
#![no_std]

extern crate alloc;

pub use block::*;
pub use boot::*;
pub use error::*;
pub use image::*;
pub use key::*;
pub use layout::*;
pub use ota::*;
pub use signer::*;

mod block;
mod boot;
mod error;
mod image;
mod key;
mod layout;
mod ota;
mod signer;

#[cfg(test)]
mod test_keys;

/// The RSA crate is re-exported for user convenience
/// so that users of the lib do not have to explicitly depend on it
pub mod rsa {
    pub use ::rsa::*;
}
