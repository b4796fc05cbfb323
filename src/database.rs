//! The CA registry: OpenSSL's `serial` counter file and `index.txt` database.
//!
//! Index lines are tab separated:
//!
//! ```text
//! V	260101000000Z		01	unknown	/C=US/O=Example/CN=host.example
//! R	260101000000Z	250601120000Z,keyCompromise	02	unknown	/CN=other.example
//! ```
//!
//! Every write goes to `<file>.new` first and is renamed into place, leaving
//! the previous version as `<file>.old`. Writers hold `<index>.lock` for the
//! duration of an update; a held lock is reported, not waited on.

use std::ffi::OsString;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};

use crate::cert::Certificate;
use crate::cert::params::DistinguishedName;
use crate::error::CaKitError;
use crate::serial::Serial;

pub type Result<T> = std::result::Result<T, CaKitError>;

/// Filename column value; certificates are not written out per serial.
const UNKNOWN_FILE: &str = "unknown";

/// Revocation reasons `openssl ca -crl_reason` accepts.
const REVOCATION_REASONS: [&str; 8] = [
    "unspecified",
    "keyCompromise",
    "CACompromise",
    "affiliationChanged",
    "superseded",
    "cessationOfOperation",
    "certificateHold",
    "removeFromCRL",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryStatus {
    Valid,
    Revoked,
    Expired,
}

impl EntryStatus {
    fn flag(self) -> char {
        match self {
            EntryStatus::Valid => 'V',
            EntryStatus::Revoked => 'R',
            EntryStatus::Expired => 'E',
        }
    }
}

impl FromStr for EntryStatus {
    type Err = CaKitError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "V" => Ok(EntryStatus::Valid),
            "R" => Ok(EntryStatus::Revoked),
            "E" => Ok(EntryStatus::Expired),
            other => Err(CaKitError::DatabaseError(format!(
                "unknown index status '{other}'"
            ))),
        }
    }
}

/// One line of the index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub status: EntryStatus,
    pub expires: OffsetDateTime,
    /// Revocation time and optional reason, for `R` records.
    pub revoked: Option<(OffsetDateTime, Option<String>)>,
    pub serial: Serial,
    pub filename: String,
    pub subject: DistinguishedName,
}

impl IndexEntry {
    /// A `V` record for a freshly issued certificate.
    pub fn for_certificate(cert: &Certificate) -> Result<Self> {
        Ok(IndexEntry {
            status: EntryStatus::Valid,
            expires: cert.not_after(),
            revoked: None,
            serial: cert.serial(),
            filename: UNKNOWN_FILE.to_string(),
            subject: cert.subject()?,
        })
    }

    pub fn parse(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split('\t').collect();
        let [status, expires, revoked, serial, filename, subject] = fields[..] else {
            return Err(CaKitError::DatabaseError(format!(
                "index line has {} fields, expected 6: '{line}'",
                fields.len()
            )));
        };
        let status: EntryStatus = status.parse()?;

        let revoked = match (status, revoked) {
            (EntryStatus::Revoked, "") => {
                return Err(CaKitError::DatabaseError(format!(
                    "revoked record {serial} has no revocation date"
                )));
            }
            (_, "") => None,
            (_, value) => {
                let (date, reason) = match value.split_once(',') {
                    Some((date, reason)) => (date, Some(reason.to_string())),
                    None => (value, None),
                };
                Some((parse_asn1_time(date)?, reason))
            }
        };

        Ok(IndexEntry {
            status,
            expires: parse_asn1_time(expires)?,
            revoked,
            serial: serial.parse()?,
            filename: filename.to_string(),
            subject: DistinguishedName::from_oneline(subject)?,
        })
    }
}

impl fmt::Display for IndexEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let revoked = match &self.revoked {
            Some((at, Some(reason))) => format!("{},{reason}", format_asn1_time(*at)),
            Some((at, None)) => format_asn1_time(*at),
            None => String::new(),
        };
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}",
            self.status.flag(),
            format_asn1_time(self.expires),
            revoked,
            self.serial,
            self.filename,
            self.subject.to_oneline()
        )
    }
}

/// `YYMMDDHHMMSSZ` up to 2049, `YYYYMMDDHHMMSSZ` from 2050, as in X.509.
fn format_asn1_time(t: OffsetDateTime) -> String {
    let t = t.to_offset(time::UtcOffset::UTC);
    let year = if (1950..2050).contains(&t.year()) {
        format!("{:02}", t.year() % 100)
    } else {
        format!("{:04}", t.year())
    };
    format!(
        "{year}{:02}{:02}{:02}{:02}{:02}Z",
        u8::from(t.month()),
        t.day(),
        t.hour(),
        t.minute(),
        t.second()
    )
}

fn parse_asn1_time(s: &str) -> Result<OffsetDateTime> {
    let bad = || CaKitError::DatabaseError(format!("invalid index time '{s}'"));
    let digits = s.strip_suffix('Z').ok_or_else(bad)?;
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(bad());
    }
    let num = |range: std::ops::Range<usize>| -> Result<u32> {
        digits
            .get(range)
            .and_then(|d| d.parse().ok())
            .ok_or_else(bad)
    };

    let (year, rest) = match digits.len() {
        12 => {
            let yy = num(0..2)? as i32;
            (if yy < 50 { 2000 + yy } else { 1900 + yy }, 2)
        }
        14 => (num(0..4)? as i32, 4),
        _ => return Err(bad()),
    };
    let month = Month::try_from(num(rest..rest + 2)? as u8).map_err(|_| bad())?;
    let date = Date::from_calendar_date(year, month, num(rest + 2..rest + 4)? as u8)
        .map_err(|_| bad())?;
    let time = Time::from_hms(
        num(rest + 4..rest + 6)? as u8,
        num(rest + 6..rest + 8)? as u8,
        num(rest + 8..rest + 10)? as u8,
    )
    .map_err(|_| bad())?;
    Ok(PrimitiveDateTime::new(date, time).assume_utc())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Replaces `path` with `contents`, keeping the previous file as `.old`.
fn replace_file(path: &Path, contents: &str) -> Result<()> {
    let new = with_suffix(path, ".new");
    fs::write(&new, contents).map_err(|e| CaKitError::io(&new, e))?;
    if path.exists() {
        let old = with_suffix(path, ".old");
        fs::rename(path, &old).map_err(|e| CaKitError::io(path, e))?;
    }
    fs::rename(&new, path).map_err(|e| CaKitError::io(&new, e))
}

fn read_serial_file(path: &Path) -> Result<Serial> {
    let text = fs::read_to_string(path).map_err(|e| CaKitError::io(path, e))?;
    let line = text.lines().next().unwrap_or_default();
    line.parse().map_err(|_| {
        CaKitError::DatabaseError(format!(
            "{} does not hold a hex serial number",
            path.display()
        ))
    })
}

/// Exclusive writer lock, released on drop.
struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    fn acquire(index: &Path) -> Result<Self> {
        let path = with_suffix(index, ".lock");
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(LockGuard { path }),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(CaKitError::DatabaseError(
                format!("{} is held by another writer", path.display()),
            )),
            Err(e) => Err(CaKitError::io(&path, e)),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("failed to release {}: {e}", self.path.display());
        }
    }
}

/// The serial counter and index database of one CA.
#[derive(Debug)]
pub struct CaDatabase {
    index_path: PathBuf,
    serial_path: PathBuf,
    next_serial: Serial,
    entries: Vec<IndexEntry>,
}

impl CaDatabase {
    /// Creates an empty index and a serial file starting at `first_serial`,
    /// or at a random serial when none is given.
    ///
    /// Fails if either file already exists.
    pub fn initialize(
        index_path: impl Into<PathBuf>,
        serial_path: impl Into<PathBuf>,
        first_serial: Option<Serial>,
    ) -> Result<Self> {
        let index_path = index_path.into();
        let serial_path = serial_path.into();
        for path in [&index_path, &serial_path] {
            if path.exists() {
                return Err(CaKitError::DatabaseError(format!(
                    "{} already exists",
                    path.display()
                )));
            }
        }

        let next_serial = first_serial.unwrap_or_else(Serial::random);
        fs::write(&index_path, "").map_err(|e| CaKitError::io(&index_path, e))?;
        fs::write(&serial_path, format!("{next_serial}\n"))
            .map_err(|e| CaKitError::io(&serial_path, e))?;
        log::info!(
            "initialized CA database {} starting at serial {next_serial}",
            index_path.display()
        );

        Ok(CaDatabase {
            index_path,
            serial_path,
            next_serial,
            entries: Vec::new(),
        })
    }

    /// Loads existing serial and index files.
    pub fn open(index_path: impl Into<PathBuf>, serial_path: impl Into<PathBuf>) -> Result<Self> {
        let index_path = index_path.into();
        let serial_path = serial_path.into();

        let next_serial = read_serial_file(&serial_path)?;
        let text = fs::read_to_string(&index_path).map_err(|e| CaKitError::io(&index_path, e))?;
        let entries = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                IndexEntry::parse(line).map_err(|e| {
                    CaKitError::DatabaseError(format!(
                        "{} line {}: {e}",
                        index_path.display(),
                        n + 1
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        log::debug!(
            "opened CA database {} with {} records, next serial {next_serial}",
            index_path.display(),
            entries.len()
        );
        Ok(CaDatabase {
            index_path,
            serial_path,
            next_serial,
            entries,
        })
    }

    /// The serial the next issuance must use.
    pub fn next_serial(&self) -> &Serial {
        &self.next_serial
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn serial_path(&self) -> &Path {
        &self.serial_path
    }

    pub fn find_by_serial(&self, serial: &Serial) -> Option<&IndexEntry> {
        self.entries.iter().find(|e| e.serial == *serial)
    }

    /// A still valid record for `subject`, if any.
    pub fn find_valid_by_subject(&self, subject: &DistinguishedName) -> Option<&IndexEntry> {
        self.entries
            .iter()
            .find(|e| e.status == EntryStatus::Valid && e.subject == *subject)
    }

    /// Records `cert`, which must carry [`Self::next_serial`].
    ///
    /// The incremented serial is written first, then the index gains exactly
    /// one `V` line.
    pub fn record_issuance(&mut self, cert: &Certificate) -> Result<()> {
        let entry = IndexEntry::for_certificate(cert)?;
        if entry.serial != self.next_serial {
            return Err(CaKitError::DatabaseError(format!(
                "certificate serial {} is not the reserved serial {}",
                entry.serial, self.next_serial
            )));
        }

        let _lock = LockGuard::acquire(&self.index_path)?;
        let on_disk = read_serial_file(&self.serial_path)?;
        if on_disk != self.next_serial {
            return Err(CaKitError::DatabaseError(format!(
                "serial file moved to {on_disk} since it was read as {}",
                self.next_serial
            )));
        }

        let following = self.next_serial.next();
        replace_file(&self.serial_path, &format!("{following}\n"))?;

        self.entries.push(entry);
        if let Err(e) = self.write_index() {
            self.entries.pop();
            return Err(e);
        }
        self.next_serial = following;

        log::info!(
            "recorded serial {} for {}",
            cert.serial(),
            self.entries.last().map(|e| e.subject.to_oneline()).unwrap_or_default()
        );
        Ok(())
    }

    /// Marks the valid record with `serial` as revoked now.
    pub fn revoke(&mut self, serial: &Serial, reason: Option<&str>) -> Result<()> {
        self.revoke_at(serial, reason, OffsetDateTime::now_utc())
    }

    pub fn revoke_at(
        &mut self,
        serial: &Serial,
        reason: Option<&str>,
        at: OffsetDateTime,
    ) -> Result<()> {
        if let Some(reason) = reason {
            if !REVOCATION_REASONS.contains(&reason) {
                return Err(CaKitError::InvalidInput(format!(
                    "unknown revocation reason '{reason}'"
                )));
            }
        }

        let _lock = LockGuard::acquire(&self.index_path)?;
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.serial == *serial)
            .ok_or_else(|| CaKitError::DatabaseError(format!("no record for serial {serial}")))?;
        if entry.status == EntryStatus::Revoked {
            return Err(CaKitError::DatabaseError(format!(
                "serial {serial} is already revoked"
            )));
        }

        let previous = entry.clone();
        entry.status = EntryStatus::Revoked;
        entry.revoked = Some((at.replace_nanosecond(0).unwrap_or(at), reason.map(str::to_string)));

        if let Err(e) = self.write_index() {
            if let Some(entry) = self.entries.iter_mut().find(|e| e.serial == *serial) {
                *entry = previous;
            }
            return Err(e);
        }
        log::info!("revoked serial {serial}");
        Ok(())
    }

    /// Turns valid records that expired before `now` into `E` records.
    /// Returns how many changed.
    pub fn update_expired(&mut self, now: OffsetDateTime) -> Result<usize> {
        let _lock = LockGuard::acquire(&self.index_path)?;
        let previous = self.entries.clone();
        let mut changed = 0;
        for entry in &mut self.entries {
            if entry.status == EntryStatus::Valid && entry.expires < now {
                entry.status = EntryStatus::Expired;
                changed += 1;
            }
        }
        if changed > 0 {
            if let Err(e) = self.write_index() {
                self.entries = previous;
                return Err(e);
            }
            log::info!("marked {changed} records expired");
        }
        Ok(changed)
    }

    fn write_index(&self) -> Result<()> {
        let text: String = self.entries.iter().map(|e| format!("{e}\n")).collect();
        replace_file(&self.index_path, &text)
    }
}
