//! Newline-delimited audit records for finalised rounds.
//!
//! A record is six ASCII lines:
//!
//! ```text
//! round:<round id>
//! params:<hex parameter fingerprint>
//! admitted:<hex peer id>:<hex proof digest> ...
//! rejected:<hex peer id> ...
//! sum:<canonical sum coordinates>
//! hash:<hex BLAKE2b-256 over the lines above>
//! ```
//!
//! Peer ids are hex encoded so arbitrary identifiers survive the
//! whitespace-separated layout.  Records are not needed for correctness; they
//! let an operator check after the fact which peers a server admitted.

use std::fs::{create_dir_all, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::digest::fingerprint;

/// Parsed contents of an audit record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    /// Round identifier.
    pub round_id: u64,
    /// Hex fingerprint of the protocol parameters.
    pub params: String,
    /// `(peer id, hex proof digest)` for every admitted peer.
    pub admitted: Vec<(String, String)>,
    /// Peers whose submission was rejected.
    pub rejected: Vec<String>,
    /// The server's accumulator.
    pub sum: Vec<i64>,
}

fn body_lines(record: &AuditRecord) -> [String; 5] {
    let admitted = record
        .admitted
        .iter()
        .map(|(peer, digest)| format!("{}:{digest}", hex::encode(peer)))
        .collect::<Vec<_>>()
        .join(" ");
    let rejected = record
        .rejected
        .iter()
        .map(hex::encode)
        .collect::<Vec<_>>()
        .join(" ");
    let sum = record
        .sum
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    [
        format!("round:{}", record.round_id),
        format!("params:{}", record.params),
        format!("admitted:{admitted}"),
        format!("rejected:{rejected}"),
        format!("sum:{sum}"),
    ]
}

/// Computes the hex digest over the body lines of a record.
pub fn compute_digest(record: &AuditRecord) -> String {
    let lines = body_lines(record);
    hex::encode(fingerprint(lines.iter().map(|l| l.as_bytes())))
}

/// Writes a record using the provided writer function.
pub fn write_record<W>(mut write_line: W, record: &AuditRecord) -> io::Result<()>
where
    W: FnMut(&str) -> io::Result<()>,
{
    for line in body_lines(record) {
        write_line(&line)?;
    }
    write_line(&format!("hash:{}", compute_digest(record)))
}

/// Renders a record into owned lines.
pub fn record_lines(record: &AuditRecord) -> Vec<String> {
    let mut lines: Vec<String> = body_lines(record).into();
    lines.push(format!("hash:{}", compute_digest(record)));
    lines
}

fn field<'a>(line: Option<&'a str>, prefix: &str) -> Result<&'a str, String> {
    let line = line.ok_or_else(|| format!("missing {prefix} line"))?;
    line.strip_prefix(prefix)
        .map(str::trim)
        .ok_or_else(|| format!("missing {prefix} prefix"))
}

fn decode_peer(token: &str) -> Result<String, String> {
    let raw = hex::decode(token).map_err(|_| format!("invalid peer id {token:?}"))?;
    String::from_utf8(raw).map_err(|_| format!("peer id {token:?} is not utf-8"))
}

/// Parses a record and returns its contents and stored hash.
pub fn parse_record<'a, I>(lines: I) -> Result<(AuditRecord, String), String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut iter = lines.into_iter();
    let round_id = field(iter.next(), "round:")?
        .parse::<u64>()
        .map_err(|_| "invalid integer in round:".to_string())?;
    let params = field(iter.next(), "params:")?.to_string();
    let admitted = field(iter.next(), "admitted:")?
        .split_whitespace()
        .map(|tok| {
            let (peer, digest) = tok
                .split_once(':')
                .ok_or_else(|| format!("malformed admission {tok:?}"))?;
            Ok((decode_peer(peer)?, digest.to_string()))
        })
        .collect::<Result<Vec<_>, String>>()?;
    let rejected = field(iter.next(), "rejected:")?
        .split_whitespace()
        .map(decode_peer)
        .collect::<Result<Vec<_>, String>>()?;
    let sum = field(iter.next(), "sum:")?
        .split_whitespace()
        .map(|tok| {
            tok.parse::<i64>()
                .map_err(|_| "invalid integer in sum:".to_string())
        })
        .collect::<Result<Vec<_>, String>>()?;
    let stored_hash = field(iter.next(), "hash:")?.to_string();
    Ok((
        AuditRecord {
            round_id,
            params,
            admitted,
            rejected,
            sum,
        },
        stored_hash,
    ))
}

/// Verifies that a record matches its stored hash digest.
pub fn verify_record_lines<'a, I>(lines: I) -> Result<AuditRecord, String>
where
    I: IntoIterator<Item = &'a str>,
{
    let (record, stored_hash) = parse_record(lines)?;
    if compute_digest(&record) == stored_hash {
        Ok(record)
    } else {
        Err("hash mismatch".to_string())
    }
}

/// Stores `record` as `<dir>/<label>_round_<id>.txt` and returns the path.
///
/// An existing record for the same label and round is replaced.
pub fn store_record(dir: &Path, label: &str, record: &AuditRecord) -> io::Result<PathBuf> {
    create_dir_all(dir)?;
    let path = dir.join(format!("{label}_round_{:04}.txt", record.round_id));
    let mut out = BufWriter::new(File::create(&path)?);
    write_record(|line| writeln!(out, "{line}"), record)?;
    out.flush()?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn sample() -> AuditRecord {
        AuditRecord {
            round_id: 4,
            params: "00ff".into(),
            admitted: vec![("peer a".into(), "abcd".into()), ("b".into(), "0123".into())],
            rejected: vec!["mallory".into()],
            sum: vec![3, -5, 12, 0],
        }
    }

    #[test]
    fn write_record_format() {
        let mut lines = Vec::new();
        write_record(
            |line| {
                lines.push(line.to_string());
                Ok(())
            },
            &sample(),
        )
        .unwrap();
        assert_eq!(lines[0], "round:4");
        assert_eq!(lines[2], "admitted:706565722061:abcd 62:0123");
        assert_eq!(lines[3], "rejected:6d616c6c6f7279");
        assert_eq!(lines[4], "sum:3 -5 12 0");
        assert_eq!(lines[5].len(), "hash:".len() + 64);
        assert_eq!(lines, record_lines(&sample()));
    }

    #[test]
    fn parse_and_verify() {
        let lines = record_lines(&sample());
        let record = verify_record_lines(lines.iter().map(String::as_str)).unwrap();
        assert_eq!(record, sample());

        let empty = AuditRecord {
            admitted: Vec::new(),
            rejected: Vec::new(),
            ..sample()
        };
        let lines = record_lines(&empty);
        assert_eq!(lines[3], "rejected:");
        assert_eq!(
            verify_record_lines(lines.iter().map(String::as_str)).unwrap(),
            empty
        );
    }

    #[test]
    fn verify_rejects_tampering() {
        let mut lines = record_lines(&sample());
        lines[4] = "sum:3 -5 12 1".into();
        assert_eq!(
            verify_record_lines(lines.iter().map(String::as_str)),
            Err("hash mismatch".to_string())
        );
        assert!(verify_record_lines(["round:1"]).is_err());
        assert!(verify_record_lines(["round:x"]).is_err());
    }

    #[test]
    fn stored_record_verifies() {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let tmp_dir = std::env::temp_dir().join(format!("p4p_audit_test_{unique}"));
        let path = store_record(&tmp_dir, "server1", &sample()).unwrap();
        assert!(path.ends_with("server1_round_0004.txt"));
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 6);
        assert_eq!(verify_record_lines(contents.lines()).unwrap(), sample());
        fs::remove_dir_all(&tmp_dir).unwrap();
    }
}
