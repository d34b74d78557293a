//! A command-line interface to the `espsbv2` crate.

use std::fs::{self, File};
use std::io::{self, Write as _};
use std::path::{self, Path, PathBuf};

use anyhow::Context;

use clap::{Args, ColorChoice, Parser, Subcommand, ValueEnum};

use embedded_io_async::{ErrorType, Read, Write};

use espsbv2::rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use espsbv2::rsa::RsaPrivateKey;
use espsbv2::{
    BootSignedImage, KeySource, PresignedSigner, RsaSignature, RsaSigner, SBV2RsaPubKey,
    Sha256Digest, Signer,
};

use log::{debug, info, LevelFilter};

use rand::rngs::ThreadRng;
use rand::thread_rng;

use tempfile::NamedTempFile;

/// Sign and verify ESP32 images for ESP RSA Secure Boot V2 and for OTA upgrades
#[derive(Parser, Debug)]
#[command(version, about, long_about = None, arg_required_else_help = true, color = ColorChoice::Auto)]
struct Cli {
    /// Verbosity
    #[arg(short = 'l', long, default_value = "regular")]
    verbosity: Verbosity,

    #[command(subcommand)]
    command: Option<Command>,
}

/// Command
#[derive(Subcommand, Debug)]
enum Command {
    /// Generate signing key (RSA-3072 private key) in PEM or DER format
    GenKey {
        /// Signing key type
        #[arg(short = 't', long, default_value = "pem")]
        key_type: KeyType,

        /// Password to use for protecting the signing key (optional, if not specified the signing key will be unprotected)
        #[arg(short = 'p', long)]
        key_password: Option<String>,

        /// Public key (PEM) output file (optional)
        #[arg(short = 'u', long)]
        pub_key: Option<PathBuf>,

        /// Verifying key E-FUSE SHA-256 hash output file (optional)
        #[arg(short = 's', long)]
        hash: Option<PathBuf>,

        /// Signing key output file
        key: PathBuf,
    },
    /// Generate the SHA-256 hash of a certificate or public key (to be burned in the ESP32 E-FUSE)
    KeyDigest {
        /// Certificate (DER or PEM) or public key (PEM) input file
        cert: PathBuf,

        /// Verifying key E-FUSE SHA-256 hash output file
        hash: PathBuf,
    },
    /// Pad an image with 0xFF to a 4K sector boundary
    Align {
        /// The input file of the image to align
        image: PathBuf,

        /// Aligned image output file
        aligned: PathBuf,
    },
    /// Compute the SHA-256 digest a PKI has to sign
    Digest {
        /// Which signature the digest is for
        #[arg(short = 'g', long, default_value = "boot")]
        stage: Stage,

        /// The raw image (boot) or the boot-signed image (OTA)
        image: PathBuf,

        /// Digest output file
        digest: PathBuf,
    },
    /// Sign the digest of an image like a PKI would, producing a raw RSA-PSS signature
    PkiSign {
        #[command(flatten)]
        key: KeyArgs,

        /// Which signature to produce
        #[arg(short = 'g', long, default_value = "boot")]
        stage: Stage,

        /// The raw image (boot) or the boot-signed image (OTA)
        image: PathBuf,

        /// Raw signature output file
        signature: PathBuf,
    },
    /// Sign an image for Secure Boot V2
    SignBoot {
        #[command(flatten)]
        signing: SigningArgs,

        /// Signature sector output file (optional)
        #[arg(short = 'b', long)]
        block: Option<PathBuf>,

        /// The input file of the image to sign
        image: PathBuf,

        /// Signed image output file
        signed: PathBuf,
    },
    /// Verify Secure Boot V2 signed images against a certificate
    VerifyBoot {
        /// Certificate (DER or PEM) or public key (PEM) input file
        #[arg(short, long)]
        cert: PathBuf,

        /// The signed image files to verify
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Wrap a Secure Boot V2 signed image with the OTA signature
    SignOta {
        #[command(flatten)]
        signing: SigningArgs,

        /// The input file of the boot-signed image
        image: PathBuf,

        /// OTA-signed image output file
        signed: PathBuf,
    },
    /// Verify OTA-signed images against a certificate
    VerifyOta {
        /// Certificate (DER or PEM) or public key (PEM) input file
        #[arg(short, long)]
        cert: PathBuf,

        /// The OTA-signed image files to verify
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Boot-sign a bootloader and a firmware image, then OTA-sign the firmware, verifying each step
    SecureSim {
        /// Boot signing key input file
        #[arg(long)]
        boot_key: PathBuf,

        /// OTA signing key input file
        #[arg(long)]
        ota_key: PathBuf,

        /// Signing keys type
        #[arg(short = 't', long, default_value = "pem")]
        key_type: KeyType,

        /// Certificate to verify the boot-signed images against (optional, defaults to the boot key)
        #[arg(long)]
        boot_cert: Option<PathBuf>,

        /// Certificate to verify the OTA-signed image against (optional, defaults to the OTA key)
        #[arg(long)]
        ota_cert: Option<PathBuf>,

        /// The unsigned bootloader image
        bootloader: PathBuf,

        /// The unsigned firmware image
        firmware: PathBuf,

        /// Output directory for the signed images
        out_dir: PathBuf,
    },
}

/// Verbosity
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum Verbosity {
    Silent,
    #[default]
    Regular,
    Verbose,
}

impl Verbosity {
    fn log_level(&self) -> LevelFilter {
        match self {
            Self::Silent => LevelFilter::Off,
            Self::Regular => LevelFilter::Info,
            Self::Verbose => LevelFilter::Debug,
        }
    }
}

/// Which signature a digest or a raw signature is for
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum Stage {
    /// Secure Boot V2 signature over the aligned raw image
    #[default]
    Boot,
    /// OTA signature over the boot-signed image
    Ota,
}

impl Stage {
    fn digest(&self, image: &[u8]) -> anyhow::Result<Sha256Digest> {
        let digest = match self {
            Self::Boot => espsbv2::digest_boot(image),
            Self::Ota => espsbv2::digest_ota_body(image)?,
        };

        debug!("Digest: {}", hex::encode(digest));

        Ok(digest)
    }
}

/// Key type
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum KeyType {
    /// PEM key
    #[default]
    Pem,
    /// DER key
    Der,
}

impl KeyType {
    fn load(&self, path: &Path, password: Option<&str>) -> anyhow::Result<RsaPrivateKey> {
        let path = absolute(path, "key")?;

        let key = if let Some(password) = password {
            info!(
                "Loading password-protected signing key from `{}` (this will take some time)...",
                path.display()
            );

            match self {
                Self::Pem => RsaPrivateKey::from_pkcs8_encrypted_pem(
                    &fs::read_to_string(&path).context("Loading key failed")?,
                    password,
                )
                .context("Parsing PEM signature key failed")?,
                Self::Der => RsaPrivateKey::from_pkcs8_encrypted_der(
                    &fs::read(&path).context("Loading key failed")?,
                    password,
                )
                .context("Parsing DER signature key failed")?,
            }
        } else {
            debug!("Loading signing key from `{}`...", path.display());

            match self {
                Self::Pem => RsaPrivateKey::from_pkcs8_pem(
                    &fs::read_to_string(&path).context("Loading key failed")?,
                )
                .context("Parsing PEM signature key failed")?,
                Self::Der => {
                    RsaPrivateKey::from_pkcs8_der(&fs::read(&path).context("Loading key failed")?)
                        .context("Parsing DER signature key failed")?
                }
            }
        };

        debug!("Signing key loaded");

        Ok(key)
    }

    fn save(&self, key: &RsaPrivateKey, path: &Path, password: Option<&str>) -> anyhow::Result<()> {
        let data = if let Some(password) = password {
            info!("Key generation complete, saving with password protection (this will take some time)...");

            match self {
                Self::Pem => key
                    .to_pkcs8_encrypted_pem(thread_rng(), password.as_bytes(), LineEnding::LF)
                    .context("Generating PEM signature key failed")?
                    .as_bytes()
                    .to_vec(),
                Self::Der => key
                    .to_pkcs8_encrypted_der(thread_rng(), password.as_bytes())
                    .context("Generating DER signature key failed")?
                    .as_bytes()
                    .to_vec(),
            }
        } else {
            debug!("Key generation complete, saving...");

            match self {
                Self::Pem => key
                    .to_pkcs8_pem(LineEnding::LF)
                    .context("Generating PEM signature key failed")?
                    .as_bytes()
                    .to_vec(),
                Self::Der => key
                    .to_pkcs8_der()
                    .context("Generating DER signature key failed")?
                    .as_bytes()
                    .to_vec(),
            }
        };

        save(path, &data, "key")
    }
}

/// Private signing key
#[derive(Args, Debug)]
struct KeyArgs {
    /// Signing key input file
    #[arg(short, long)]
    key: PathBuf,

    /// Signing key type
    #[arg(short = 't', long, default_value = "pem")]
    key_type: KeyType,

    /// Password used for protecting the signing key (optional)
    #[arg(short = 'p', long)]
    key_password: Option<String>,
}

impl KeyArgs {
    fn load(&self) -> anyhow::Result<RsaPrivateKey> {
        self.key_type.load(&self.key, self.key_password.as_deref())
    }
}

/// Either a private key to sign with, or a raw signature produced by the PKI plus its certificate
#[derive(Args, Debug)]
struct SigningArgs {
    /// Signing key input file (the image is signed in-process)
    #[arg(short, long, required_unless_present = "signature", conflicts_with = "signature")]
    key: Option<PathBuf>,

    /// Signing key type
    #[arg(short = 't', long, default_value = "pem")]
    key_type: KeyType,

    /// Password used for protecting the signing key (optional)
    #[arg(short = 'p', long)]
    key_password: Option<String>,

    /// Raw RSA-PSS signature input file, as produced by the PKI
    #[arg(short = 'g', long, requires = "cert")]
    signature: Option<PathBuf>,

    /// Certificate (DER or PEM) or public key (PEM) of the signing key
    /// (optional when signing with a private key)
    #[arg(short, long)]
    cert: Option<PathBuf>,
}

impl SigningArgs {
    fn load(&self) -> anyhow::Result<Signing> {
        let cert = self.cert.as_deref().map(load_cert).transpose()?;

        if let Some(key) = &self.key {
            let priv_key = self.key_type.load(key, self.key_password.as_deref())?;
            let pub_key = SBV2RsaPubKey::create(&priv_key.to_public_key())
                .context("Unsupported signing key")?;

            if cert.as_ref().is_some_and(|cert| *cert != pub_key) {
                anyhow::bail!("The certificate does not match the signing key");
            }

            Ok(Signing {
                key: SigningKey::Private(priv_key),
                pub_key,
            })
        } else {
            let signature = self
                .signature
                .as_deref()
                .context("Either a signing key or a raw signature is required")?;
            let signature = absolute(signature, "signature")?;

            let signer = PresignedSigner::new(
                &fs::read(&signature)
                    .with_context(|| format!("Loading signature `{}` failed", signature.display()))?,
            )
            .with_context(|| format!("Parsing signature `{}` failed", signature.display()))?;

            Ok(Signing {
                key: SigningKey::Presigned(signer),
                pub_key: cert.context("A certificate is required with a raw signature")?,
            })
        }
    }
}

enum SigningKey {
    Private(RsaPrivateKey),
    Presigned(PresignedSigner),
}

/// Loaded signing material and the public key to embed and verify with
struct Signing {
    key: SigningKey,
    pub_key: SBV2RsaPubKey,
}

impl Signing {
    fn signer(&self) -> anyhow::Result<CliSigner<'_>> {
        Ok(match &self.key {
            SigningKey::Private(priv_key) => {
                CliSigner::Rsa(RsaSigner::new(priv_key, thread_rng())?)
            }
            SigningKey::Presigned(signer) => CliSigner::Presigned(signer.clone()),
        })
    }
}

enum CliSigner<'a> {
    Rsa(RsaSigner<'a, ThreadRng>),
    Presigned(PresignedSigner),
}

impl Signer for CliSigner<'_> {
    type Error = espsbv2::rsa::Error;

    async fn sign(&mut self, digest: &Sha256Digest) -> Result<RsaSignature, Self::Error> {
        match self {
            Self::Rsa(signer) => signer.sign(digest).await,
            Self::Presigned(signer) => signer.sign(digest).await.map_err(|e| match e {}),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    env_logger::builder()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .filter_level(args.verbosity.log_level())
        .init();

    if let Some(command) = args.command {
        let result = match command {
            Command::GenKey {
                key_type,
                key_password,
                pub_key,
                hash,
                key,
            } => gen_key(key_type, key_password, pub_key, hash, key),
            Command::KeyDigest { cert, hash } => key_digest(cert, hash),
            Command::Align { image, aligned } => align_image(image, aligned),
            Command::Digest {
                stage,
                image,
                digest,
            } => digest_image(stage, image, digest),
            Command::PkiSign {
                key,
                stage,
                image,
                signature,
            } => pki_sign(key, stage, image, signature),
            Command::SignBoot {
                signing,
                block,
                image,
                signed,
            } => sign_boot(signing, block, image, signed),
            Command::VerifyBoot { cert, images } => verify_boot(cert, images),
            Command::SignOta {
                signing,
                image,
                signed,
            } => sign_ota(signing, image, signed),
            Command::VerifyOta { cert, images } => verify_ota(cert, images),
            Command::SecureSim {
                boot_key,
                ota_key,
                key_type,
                boot_cert,
                ota_cert,
                bootloader,
                firmware,
                out_dir,
            } => secure_sim(
                key_type, boot_key, ota_key, boot_cert, ota_cert, bootloader, firmware, out_dir,
            ),
        };

        if let Err(err) = result {
            log::error!("{:#}", err);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn gen_key(
    key_type: KeyType,
    key_password: Option<String>,
    pub_key: Option<PathBuf>,
    hash: Option<PathBuf>,
    key: PathBuf,
) -> anyhow::Result<()> {
    info!("Generating RSA-3072 private key (this will take some time)...");

    let priv_key =
        RsaPrivateKey::new(&mut thread_rng(), 3072).context("Generating RSA key failed")?;

    key_type.save(&priv_key, &key, key_password.as_deref())?;

    if let Some(pub_key) = pub_key {
        let pem = priv_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .context("Generating PEM public key failed")?;

        save(&pub_key, pem.as_bytes(), "public key")?;
    }

    if let Some(hash) = hash {
        save_hash(&SBV2RsaPubKey::create(&priv_key.to_public_key())?, &hash)?;
    }

    Ok(())
}

fn key_digest(cert: PathBuf, hash: PathBuf) -> anyhow::Result<()> {
    save_hash(&load_cert(&cert)?, &hash)
}

fn align_image(image: PathBuf, aligned: PathBuf) -> anyhow::Result<()> {
    let data = load_image(&image)?;

    save(&aligned, &espsbv2::align(data), "aligned image")
}

fn digest_image(stage: Stage, image: PathBuf, digest: PathBuf) -> anyhow::Result<()> {
    let data = load_image(&image)?;

    let result = stage
        .digest(&data)
        .with_context(|| format!("Digesting image `{}` failed", image.display()))?;

    info!("{:?} digest: {}", stage, hex::encode(result));

    save(&digest, &result, "digest")
}

fn pki_sign(key: KeyArgs, stage: Stage, image: PathBuf, signature: PathBuf) -> anyhow::Result<()> {
    let priv_key = key.load()?;

    let data = load_image(&image)?;

    let digest = stage
        .digest(&data)
        .with_context(|| format!("Digesting image `{}` failed", image.display()))?;

    info!("Signing {:?} digest of `{}`...", stage, image.display());

    let raw = embassy_futures::block_on(async {
        RsaSigner::new(&priv_key, thread_rng())?
            .sign(&digest)
            .await
            .context("Signing failed")
    })?;

    save(&signature, &raw, "signature")
}

fn sign_boot(
    signing: SigningArgs,
    block: Option<PathBuf>,
    image: PathBuf,
    signed: PathBuf,
) -> anyhow::Result<()> {
    let signing = signing.load()?;

    let data = load_image(&image)?;

    info!("Signing image `{}`...", image.display());

    let result = embassy_futures::block_on(espsbv2::sign_boot(
        data,
        &signing.pub_key,
        signing.signer()?,
    ))
    .with_context(|| format!("Signing image `{}` failed", image.display()))?;

    // Catches PKI signatures not made over this very image
    let sig_block = espsbv2::verify_boot(&result, &signing.pub_key)
        .with_context(|| format!("Verifying signed image `{}` failed", image.display()))?;

    let mut signed_out = Output::create(&signed, "signed image")?;
    embassy_futures::block_on(result.save(signed_out.io()))
        .context("Writing signed image failed")?;

    let block_out = block
        .map(|block| {
            let mut out = Output::create(&block, "signature sector")?;
            embassy_futures::block_on(sig_block.save(out.io(), true))
                .context("Writing signature sector failed")?;

            anyhow::Ok(out)
        })
        .transpose()?;

    signed_out.commit()?;

    if let Some(block_out) = block_out {
        block_out.commit()?;
    }

    Ok(())
}

fn verify_boot(cert: PathBuf, images: Vec<PathBuf>) -> anyhow::Result<()> {
    let trusted = load_cert(&cert)?;

    for image in images {
        info!("Verifying image `{}`...", image.display());

        let data = load_image(&image)?;

        espsbv2::verify_boot(&data, &trusted)
            .with_context(|| format!("Image `{}` is not signed by `{}`", image.display(), cert.display()))?;

        info!("Image `{}` verified successfully", image.display());
    }

    Ok(())
}

fn sign_ota(signing: SigningArgs, image: PathBuf, signed: PathBuf) -> anyhow::Result<()> {
    let signing = signing.load()?;

    let data = load_image(&image)?;

    info!("OTA-signing image `{}`...", image.display());

    let result = embassy_futures::block_on(espsbv2::sign_ota(
        &data,
        &signing.pub_key,
        signing.signer()?,
    ))
    .with_context(|| format!("OTA-signing image `{}` failed", image.display()))?;

    espsbv2::verify_ota(&result, &signing.pub_key)
        .with_context(|| format!("Verifying OTA-signed image `{}` failed", image.display()))?;

    let mut out = Output::create(&signed, "OTA-signed image")?;
    embassy_futures::block_on(result.save(out.io()))
        .context("Writing OTA-signed image failed")?;

    out.commit()
}

fn verify_ota(cert: PathBuf, images: Vec<PathBuf>) -> anyhow::Result<()> {
    let trusted = load_cert(&cert)?;

    for image in images {
        info!("Verifying OTA image `{}`...", image.display());

        let data = load_image(&image)?;

        espsbv2::verify_ota(&data, &trusted)
            .with_context(|| format!("Image `{}` is not signed by `{}`", image.display(), cert.display()))?;

        info!("OTA image `{}` verified successfully", image.display());
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn secure_sim(
    key_type: KeyType,
    boot_key: PathBuf,
    ota_key: PathBuf,
    boot_cert: Option<PathBuf>,
    ota_cert: Option<PathBuf>,
    bootloader: PathBuf,
    firmware: PathBuf,
    out_dir: PathBuf,
) -> anyhow::Result<()> {
    let boot_priv = key_type.load(&boot_key, None)?;
    let ota_priv = key_type.load(&ota_key, None)?;

    let boot_pub = SBV2RsaPubKey::create(&boot_priv.to_public_key())
        .context("Unsupported boot signing key")?;
    let ota_pub =
        SBV2RsaPubKey::create(&ota_priv.to_public_key()).context("Unsupported OTA signing key")?;

    let boot_trusted = boot_cert
        .as_deref()
        .map(load_cert)
        .transpose()?
        .unwrap_or_else(|| boot_pub.clone());
    let ota_trusted = ota_cert
        .as_deref()
        .map(load_cert)
        .transpose()?
        .unwrap_or_else(|| ota_pub.clone());

    let sign = |image: &Path| -> anyhow::Result<BootSignedImage> {
        let data = load_image(image)?;

        info!("Signing image `{}`...", image.display());

        let signed = embassy_futures::block_on(espsbv2::sign_boot(
            data,
            &boot_pub,
            RsaSigner::new(&boot_priv, thread_rng())?,
        ))
        .with_context(|| format!("Signing image `{}` failed", image.display()))?;

        espsbv2::verify_boot(&signed, &boot_trusted)
            .with_context(|| format!("Verifying signed image `{}` failed", image.display()))?;

        Ok(signed)
    };

    let bootloader_signed = sign(&bootloader)?;
    let firmware_signed = sign(&firmware)?;

    info!("OTA-signing image `{}`...", firmware.display());

    let firmware_ota = embassy_futures::block_on(espsbv2::sign_ota(
        &firmware_signed,
        &ota_pub,
        RsaSigner::new(&ota_priv, thread_rng())?,
    ))
    .with_context(|| format!("OTA-signing image `{}` failed", firmware.display()))?;

    espsbv2::verify_ota(&firmware_ota, &ota_trusted)
        .with_context(|| format!("Verifying OTA-signed image `{}` failed", firmware.display()))?;

    fs::create_dir_all(&out_dir)
        .with_context(|| format!("Creating output directory `{}` failed", out_dir.display()))?;

    let bootloader_out = out_path(&out_dir, &bootloader, "-esp32signed.bin")?;
    let firmware_out = out_path(&out_dir, &firmware, "-esp32signed.bin")?;
    let firmware_ota_out = out_path(&out_dir, &firmware, "-esp32signed_ota.bin")?;

    // All three are written before any of them is moved into place
    let outputs = [
        write(&bootloader_out, &bootloader_signed, "signed image")?,
        write(&firmware_out, &firmware_signed, "signed image")?,
        write(&firmware_ota_out, &firmware_ota, "OTA-signed image")?,
    ];

    for output in outputs {
        output.commit()?;
    }

    info!(
        "Saved `{}`, `{}` and `{}`",
        bootloader_out.display(),
        firmware_out.display(),
        firmware_ota_out.display()
    );

    Ok(())
}

fn load_cert(path: &Path) -> anyhow::Result<SBV2RsaPubKey> {
    let path = absolute(path, "certificate")?;

    let data = fs::read(&path)
        .with_context(|| format!("Loading certificate `{}` failed", path.display()))?;

    let key = SBV2RsaPubKey::load(KeySource::detect(&data))
        .with_context(|| format!("Parsing certificate `{}` failed", path.display()))?;

    debug!("Loaded {:?} from `{}`", key, path.display());

    Ok(key)
}

fn load_image(path: &Path) -> anyhow::Result<Vec<u8>> {
    let path = absolute(path, "image")?;

    let file = File::open(&path)
        .with_context(|| format!("Loading image `{}` failed", path.display()))?;

    embassy_futures::block_on(espsbv2::read_image(FileAsyncIo(file)))
        .with_context(|| format!("Reading image `{}` failed", path.display()))
}

fn save_hash(key: &SBV2RsaPubKey, path: &Path) -> anyhow::Result<()> {
    let mut out = Output::create(path, "hash")?;

    embassy_futures::block_on(key.save_hash(out.io())).context("Writing hash failed")?;

    info!("Key hash: {}", hex::encode(key.hash()));

    out.commit()
}

fn save(path: &Path, data: &[u8], what: &'static str) -> anyhow::Result<()> {
    write(path, data, what)?.commit()
}

fn write(path: &Path, data: &[u8], what: &'static str) -> anyhow::Result<Output> {
    let mut out = Output::create(path, what)?;

    embassy_futures::block_on(out.io().write_all(data))
        .with_context(|| format!("Writing {what} failed"))?;

    Ok(out)
}

/// An output file, written under a temporary name next to its final path
///
/// Only `commit` moves it into place; dropping it uncommitted deletes it.
struct Output {
    file: NamedTempFile,
    path: PathBuf,
    what: &'static str,
}

impl Output {
    fn create(path: &Path, what: &'static str) -> anyhow::Result<Self> {
        let path = absolute(path, what)?;

        let dir = path
            .parent()
            .with_context(|| format!("Path `{}` has no parent directory", path.display()))?;

        let file = NamedTempFile::new_in(dir)
            .with_context(|| format!("Creating {what} `{}` failed", path.display()))?;

        Ok(Self { file, path, what })
    }

    fn io(&mut self) -> FileAsyncIo<&mut File> {
        FileAsyncIo(self.file.as_file_mut())
    }

    fn commit(self) -> anyhow::Result<()> {
        let Self { file, path, what } = self;

        file.persist(&path)
            .with_context(|| format!("Saving {what} `{}` failed", path.display()))?;

        info!("Saved {what} to `{}`", path.display());

        Ok(())
    }
}

fn absolute(path: &Path, what: &str) -> anyhow::Result<PathBuf> {
    path::absolute(path)
        .with_context(|| format!("Parsing {what} path `{}` failed", path.display()))
}

fn out_path(out_dir: &Path, image: &Path, suffix: &str) -> anyhow::Result<PathBuf> {
    let stem = image
        .file_stem()
        .with_context(|| format!("Image path `{}` has no file name", image.display()))?;

    let mut name = stem.to_os_string();
    name.push(suffix);

    Ok(out_dir.join(name))
}

/// A wrapper for types implementing `std::io::Read` and `std::io::Write` to implement `Read` and `Write` for async I/O.
struct FileAsyncIo<T>(T);

impl<T> ErrorType for FileAsyncIo<T> {
    type Error = io::Error;
}

impl<T> Read for FileAsyncIo<T>
where
    T: std::io::Read,
{
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.0.read(buf)
    }
}

impl<T> Write for FileAsyncIo<T>
where
    T: std::io::Write,
{
    async fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        self.0.write(data)
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::{save, write, Output};

    #[test]
    fn committed_output_replaces_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signed.bin");

        fs::write(&path, b"old").unwrap();

        save(&path, b"new", "signed image").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn uncommitted_output_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signed.bin");

        let out = write(&path, &[0xff; 5000], "signed image").unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

        drop(out);

        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn failed_output_keeps_previous_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signed.bin");

        fs::write(&path, b"old").unwrap();

        // Fails between writing and committing, e.g. a second output could not be created
        let result: anyhow::Result<()> = (|| {
            let first = write(&path, b"new", "signed image")?;
            let second = Output::create(&dir.path().join("missing").join("block.bin"), "block")?;

            first.commit()?;
            second.commit()
        })();

        assert!(result.is_err());
        assert_eq!(fs::read(&path).unwrap(), b"old");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
