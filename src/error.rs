use core::convert::Infallible;
use core::fmt::{self, Debug, Display};

use rsa::pkcs1;
use rsa::pkcs8::spki;

/// The closed set of error categories
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// Bad signature block length, magic byte or version, or a malformed raw signature
    Format,
    /// CRC32 of the signature block or SHA-256 of the OTA signature block does not match
    Integrity,
    /// Image digest does not match or the RSA-PSS signature is invalid
    Authentication,
    /// Unsupported key type or size, or an undecodable key or certificate
    Key,
    /// Image length is not a multiple of the sector size (or has the wrong OTA remainder)
    Alignment,
    /// The external signer failed
    Signer,
}

/// The artifact a failed check was run against
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Artifact {
    /// Public key or certificate
    Key,
    /// A standalone signature block
    SignatureBlock,
    /// An image signed for Secure Boot V2
    BootSigned,
    /// A boot-signed image wrapped with the OTA signature
    OtaSigned,
}

impl Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Key => write!(f, "Key"),
            Self::SignatureBlock => write!(f, "Signature block"),
            Self::BootSigned => write!(f, "Boot-signed image"),
            Self::OtaSigned => write!(f, "OTA-signed image"),
        }
    }
}

/// Problems with the supplied public key material
#[derive(Debug)]
pub enum KeyError {
    /// The key or certificate could not be decoded
    Decode(spki::Error),
    /// The PKCS#1 RSA public key could not be decoded
    DecodePkcs1(pkcs1::Error),
    /// The key is not an RSA key
    NotRsa,
    /// The RSA modulus is not 3072 bits long
    Size(usize),
    /// The RSA public exponent does not fit in 32 bits
    Exponent,
    /// The RSA modulus is even, so it has no Montgomery constant
    EvenModulus,
    /// The RSA backend rejected the key
    Rejected(rsa::Error),
}

impl Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "Decoding key failed: {e}"),
            Self::DecodePkcs1(e) => write!(f, "Decoding PKCS#1 key failed: {e}"),
            Self::NotRsa => write!(f, "Not an RSA key; Secure Boot V2 requires RSA-3072"),
            Self::Size(bits) => write!(
                f,
                "Key has length {bits} bits; Secure Boot V2 only supports RSA-3072"
            ),
            Self::Exponent => write!(f, "RSA public exponent does not fit in 32 bits"),
            Self::EvenModulus => write!(f, "RSA modulus is even"),
            Self::Rejected(e) => write!(f, "Invalid RSA key: {e}"),
        }
    }
}

/// The specific check that failed
#[derive(Debug)]
pub enum Reason<E> {
    /// Signature block is not exactly 1216 bytes long
    BlockLen(usize),
    /// Signature block has a wrong magic byte
    Magic(u8),
    /// Signature block has an unsupported version
    Version(u8),
    /// Stored CRC32 of the signature block does not match the computed one
    Crc { stored: u32, computed: u32 },
    /// Stored SHA-256 of the OTA signature block does not match the computed one
    BlockHash,
    /// The digest embedded in the signature block does not match the image digest
    Digest,
    /// The RSA-PSS signature does not verify against the trusted key
    Signature,
    /// The image length modulo the sector size is not the expected remainder
    ImageLen { len: usize, remainder: usize },
    /// A raw signature does not have the length of an RSA-3072 signature
    SignatureLen(usize),
    /// Unusable key material
    Key(KeyError),
    /// The external signer failed
    Signer(E),
}

impl<E> Reason<E> {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::BlockLen(_) | Self::Magic(_) | Self::Version(_) | Self::SignatureLen(_) => {
                ErrorKind::Format
            }
            Self::Crc { .. } | Self::BlockHash => ErrorKind::Integrity,
            Self::Digest | Self::Signature => ErrorKind::Authentication,
            Self::ImageLen { .. } => ErrorKind::Alignment,
            Self::Key(_) => ErrorKind::Key,
            Self::Signer(_) => ErrorKind::Signer,
        }
    }
}

impl<E> Display for Reason<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BlockLen(len) => write!(
                f,
                "Signature block has length {len}B, expected {}B",
                crate::Layout::BLOCK_LEN
            ),
            Self::Magic(magic) => write!(
                f,
                "Signature block has invalid magic byte 0x{magic:02x}, expected 0x{:02x}",
                crate::Layout::MAGIC_BYTE
            ),
            Self::Version(version) => write!(
                f,
                "Signature block has invalid version {version}, only version {} is supported",
                crate::Layout::VERSION
            ),
            Self::Crc { stored, computed } => write!(
                f,
                "Signature block CRC 0x{stored:08x} does not match, expected 0x{computed:08x}"
            ),
            Self::BlockHash => write!(f, "OTA signature hash is invalid"),
            Self::Digest => write!(
                f,
                "Signature block image digest does not match the actual image digest"
            ),
            Self::Signature => write!(f, "Invalid RSA-PSS signature"),
            Self::ImageLen { len, remainder } => write!(
                f,
                "Image length {len}B modulo {}B is not {remainder}B",
                crate::Layout::SECTOR_SIZE
            ),
            Self::SignatureLen(len) => write!(
                f,
                "Raw signature has length {len}B, expected {}B",
                crate::Layout::KEY_LEN
            ),
            Self::Key(e) => write!(f, "{e}"),
            Self::Signer(e) => write!(f, "Signing failed: {e}"),
        }
    }
}

/// Errors that can occur during key loading, signing and verification
///
/// `E` is the error type of the external signer, hence verification and key loading
/// use the default (`Infallible`).
#[derive(Debug)]
pub struct Error<E = Infallible> {
    artifact: Option<Artifact>,
    reason: Reason<E>,
}

impl<E> Error<E> {
    /// Create an error not (yet) attributed to a particular artifact
    pub const fn new(reason: Reason<E>) -> Self {
        Self {
            artifact: None,
            reason,
        }
    }

    /// Attribute the error to the given artifact, unless it is already attributed
    pub fn on(mut self, artifact: Artifact) -> Self {
        self.artifact.get_or_insert(artifact);
        self
    }

    /// The category of the error
    pub fn kind(&self) -> ErrorKind {
        self.reason.kind()
    }

    /// The check that failed
    pub fn reason(&self) -> &Reason<E> {
        &self.reason
    }

    /// The artifact the failed check was run against, if known
    pub fn artifact(&self) -> Option<Artifact> {
        self.artifact
    }

    /// Map the signer error to another one
    pub fn map<E2>(self, f: impl FnOnce(E) -> E2) -> Error<E2> {
        let reason = match self.reason {
            Reason::BlockLen(len) => Reason::BlockLen(len),
            Reason::Magic(magic) => Reason::Magic(magic),
            Reason::Version(version) => Reason::Version(version),
            Reason::Crc { stored, computed } => Reason::Crc { stored, computed },
            Reason::BlockHash => Reason::BlockHash,
            Reason::Digest => Reason::Digest,
            Reason::Signature => Reason::Signature,
            Reason::ImageLen { len, remainder } => Reason::ImageLen { len, remainder },
            Reason::SignatureLen(len) => Reason::SignatureLen(len),
            Reason::Key(e) => Reason::Key(e),
            Reason::Signer(e) => Reason::Signer(f(e)),
        };

        Error {
            artifact: self.artifact,
            reason,
        }
    }
}

impl Error {
    /// Widen an error of a non-signing operation so that it can be returned from a signing one
    pub fn widen<E>(self) -> Error<E> {
        self.map(|e| match e {})
    }
}

impl<E> From<Reason<E>> for Error<E> {
    fn from(reason: Reason<E>) -> Self {
        Self::new(reason)
    }
}

impl<E> From<KeyError> for Error<E> {
    fn from(e: KeyError) -> Self {
        Self::new(Reason::Key(e)).on(Artifact::Key)
    }
}

impl<E> Display for Error<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(artifact) = self.artifact {
            write!(f, "{artifact}: {}", self.reason)
        } else {
            write!(f, "{}", self.reason)
        }
    }
}

impl<E> core::error::Error for Error<E> where E: Debug + Display {}
