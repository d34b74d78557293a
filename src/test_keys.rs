//! Shared test fixtures
//!
//! The golden artifacts were produced independently of this crate
//! for a 5000-byte image of zeros.

use core::convert::Infallible;

use alloc::vec::Vec;

use embedded_io_async::{ErrorType, Write};

pub static BOOT_KEY_PEM: &str = include_str!("../testdata/boot_key.pem");
pub static BOOT_PUB_PEM: &str = include_str!("../testdata/boot_pub.pem");
pub static BOOT_PUB_PKCS1_PEM: &str = include_str!("../testdata/boot_pub_pkcs1.pem");
pub static BOOT_CERT_PEM: &str = include_str!("../testdata/boot_cert.pem");
pub static BOOT_CERT_DER: &[u8] = include_bytes!("../testdata/boot_cert.der");

pub static OTA_KEY_PEM: &str = include_str!("../testdata/ota_key.pem");
pub static OTA_PUB_PEM: &str = include_str!("../testdata/ota_pub.pem");
pub static OTA_CERT_DER: &[u8] = include_bytes!("../testdata/ota_cert.der");

pub static SMALL_PUB_PEM: &str = include_str!("../testdata/small_pub.pem");
pub static EC_PUB_PEM: &str = include_str!("../testdata/ec_pub.pem");
pub static EC_CERT_DER: &[u8] = include_bytes!("../testdata/ec_cert.der");

/// Raw BE signature of the boot digest of the zero image
pub static BOOT_SIG: &[u8] = include_bytes!("../testdata/zeros5000.boot.sig");
/// The zero image, boot-signed
pub static BOOT_SIGNED: &[u8] = include_bytes!("../testdata/zeros5000-signed.bin");
/// Raw BE signature of the OTA digest of `BOOT_SIGNED`
pub static OTA_SIG: &[u8] = include_bytes!("../testdata/zeros5000.ota.sig");
/// `BOOT_SIGNED`, OTA-signed
pub static OTA_SIGNED: &[u8] = include_bytes!("../testdata/zeros5000-signed_ota.bin");

/// E-FUSE key digest of the boot key
pub static BOOT_KEY_DIGEST: [u8; 32] = [
    66, 75, 181, 110, 45, 200, 254, 51, 193, 128, 186, 133, 116, 47, 246, 223, 131, 205, 201, 187,
    29, 16, 233, 45, 4, 113, 121, 145, 220, 211, 91, 77,
];

pub struct VecWrite<'a>(pub &'a mut Vec<u8>);

impl ErrorType for VecWrite<'_> {
    type Error = Infallible;
}

impl Write for VecWrite<'_> {
    async fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        self.0.extend_from_slice(data);

        Ok(data.len())
    }
}
