mod util;

use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::process::Command;

use cakit::authority::CertificateAuthority;
use cakit::cert::extensions::AltNameKind;
use cakit::config::Config;
use cakit::key::KeyPair;
use cakit::request::{CertificateRequest, Csr};
use openssl::nid::Nid;
use openssl::x509::{X509, X509NameRef, X509Req};
use regex::Regex;

fn fixture_request() -> CertificateRequest {
    let mut request = CertificateRequest::from_config(&Config::parse(util::FIXTURE).unwrap())
        .unwrap();
    for name in &mut request.alt_names {
        if name.kind == AltNameKind::Ip {
            name.value = "127.0.0.1".to_string();
        }
    }
    request
}

fn entry(name: &X509NameRef, nid: Nid) -> String {
    name.entries_by_nid(nid)
        .next()
        .unwrap()
        .data()
        .as_utf8()
        .unwrap()
        .to_string()
}

#[test]
fn test_openssl_crate_parses_csr() {
    for key in [
        KeyPair::generate_ecdsa_p256(),
        KeyPair::generate_ecdsa_p384(),
        KeyPair::generate_ed25519(),
    ] {
        let csr = fixture_request().sign(&key).unwrap();
        let req = X509Req::from_pem(csr.to_pem().unwrap().as_bytes()).expect("Failed to parse CSR");

        let public_key = req.public_key().unwrap();
        assert!(req.verify(&public_key).unwrap(), "CSR signature rejected");

        let subject = req.subject_name();
        assert_eq!(entry(subject, Nid::COUNTRYNAME), "US");
        assert_eq!(entry(subject, Nid::STATEORPROVINCENAME), "New Jersey");
        assert_eq!(entry(subject, Nid::LOCALITYNAME), "Princeton");
        assert_eq!(entry(subject, Nid::ORGANIZATIONNAME), "Princeton University");
        assert_eq!(entry(subject, Nid::ORGANIZATIONALUNITNAME), "PNI");
        assert_eq!(entry(subject, Nid::COMMONNAME), "rtcloud.princeton.edu");
        assert_eq!(req.extensions().unwrap().len(), 1);
    }
}

#[test]
fn test_openssl_crate_parses_issued_cert() {
    let dir = util::CaDir::new("copy_extensions = copy");
    let mut ca = CertificateAuthority::open(&dir.config()).unwrap();

    let leaf_key = KeyPair::generate_ecdsa_p384();
    let csr = fixture_request().sign(&leaf_key).unwrap();
    let cert = ca.issue_from_csr(&csr).unwrap();

    let x509 = X509::from_pem(cert.to_pem().unwrap().as_bytes()).expect("Failed to parse PEM");
    let ca_x509 = X509::from_pem(dir.ca.cert.to_pem().unwrap().as_bytes()).unwrap();

    assert_eq!(x509.version(), 2, "X509 version should be 3 (0-based index)");
    assert!(x509.verify(&ca_x509.public_key().unwrap()).unwrap());
    assert_eq!(
        x509.serial_number().to_bn().unwrap().to_dec_str().unwrap().to_string(),
        "1"
    );
    assert_eq!(
        x509.signature_algorithm().object().nid(),
        Nid::ECDSA_WITH_SHA256,
        "CA key is P-256"
    );
    assert_eq!(entry(x509.subject_name(), Nid::COMMONNAME), "rtcloud.princeton.edu");
    assert_eq!(entry(x509.issuer_name(), Nid::COMMONNAME), "rtcloud local CA");

    let names = x509.subject_alt_names().expect("SAN extension missing");
    let dns: Vec<&str> = names.iter().filter_map(|n| n.dnsname()).collect();
    assert_eq!(dns, ["princeton.edu", "localhost", "localhost"]);
    let ips: Vec<IpAddr> = names
        .iter()
        .filter_map(|n| n.ipaddress())
        .map(|b| IpAddr::from(<[u8; 4]>::try_from(b).unwrap()))
        .collect();
    assert_eq!(ips, [IpAddr::V4(Ipv4Addr::LOCALHOST)]);
}

/// Cross-checks with the `openssl` binary when it is installed.
#[test]
fn test_openssl_cli_reads_csr() {
    let dir = tempfile::tempdir().unwrap();
    let csr_path = dir.path().join("rtcloud.csr");
    let csr = fixture_request()
        .sign(&KeyPair::generate_ecdsa_p256())
        .unwrap();
    fs::write(&csr_path, csr.to_pem().unwrap()).unwrap();

    let output = match Command::new("openssl")
        .arg("req")
        .arg("-in")
        .arg(&csr_path)
        .arg("-noout")
        .arg("-text")
        .arg("-verify")
        .output()
    {
        Ok(output) => output,
        Err(e) => {
            eprintln!("skipping, openssl binary unavailable: {e}");
            return;
        }
    };
    assert!(
        output.status.success(),
        "OpenSSL command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let output_text = String::from_utf8_lossy(&output.stdout);
    let san = Regex::new(
        r"DNS:princeton\.edu, DNS:localhost, DNS:localhost, IP Address:127\.0\.0\.1",
    )
    .unwrap();
    assert!(san.is_match(&output_text), "SANs missing:\n{output_text}");
    assert!(output_text.contains("CN = rtcloud.princeton.edu") || output_text.contains("CN=rtcloud.princeton.edu"));

    // Our decoder agrees with what we wrote.
    let decoded = Csr::from_pem(&fs::read_to_string(&csr_path).unwrap()).unwrap();
    assert_eq!(decoded.to_request().unwrap(), fixture_request());
}
