//! Builds the `[ req ]` request of an OpenSSL config, prints its CSR and,
//! when the config names a usable CA, issues a certificate for it.
//!
//! ```text
//! cargo run --example issue -- /path/to/openssl.cnf
//! ```

use cakit::authority::CertificateAuthority;
use cakit::cert::extensions::AltNameKind;
use cakit::config::Config;
use cakit::error::CaKitError;
use cakit::key::KeyPair;
use cakit::request::CertificateRequest;

fn main() -> Result<(), CaKitError> {
    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: issue <openssl.cnf>");
        std::process::exit(2);
    };
    let config = Config::load(&path)?;

    let mut request = CertificateRequest::from_config(&config)?;
    // IP entries may hold a host placeholder; sign for loopback instead.
    for name in &mut request.alt_names {
        if name.kind == AltNameKind::Ip && name.value.parse::<std::net::IpAddr>().is_err() {
            name.value = "127.0.0.1".to_string();
        }
    }
    println!("subject: {}", request.subject);
    for name in &request.alt_names {
        println!("  {name}");
    }

    let key = KeyPair::generate_ecdsa_p256();
    let csr = request.sign(&key)?;
    println!("{}", csr.to_pem()?);

    match CertificateAuthority::open(&config) {
        Ok(mut ca) => {
            let cert = ca.issue_from_csr(&csr)?;
            println!("issued serial {}", cert.serial());
            println!("{}", cert.to_pem()?);
        }
        Err(e) => eprintln!("not issuing: {e}"),
    }
    Ok(())
}
