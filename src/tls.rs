use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::TlsPaths;

#[derive(Error, Debug)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("no PEM certificate found in {0}")]
    NoCertificates(PathBuf),
    #[error("no PEM private key found in {0}")]
    NoPrivateKey(PathBuf),
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path).map(BufReader::new).map_err(|source| TlsError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Checks that the certificate chain and private key parse as PEM before
/// they are handed to the TLS server.
///
/// # Errors
///
/// Fails when either file cannot be read, the certificate file holds no
/// certificate, or the key file holds no private key.
pub fn check_identity(paths: &TlsPaths) -> Result<(), TlsError> {
    let io_error = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| TlsError::Io { path, source }
    };

    let mut cert_reader = open(&paths.cert)?;
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_error(&paths.cert))?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(paths.cert.clone()));
    }

    let mut key_reader = open(&paths.key)?;
    match rustls_pemfile::private_key(&mut key_reader).map_err(io_error(&paths.key))? {
        Some(_) => Ok(()),
        None => Err(TlsError::NoPrivateKey(paths.key.clone())),
    }
}
