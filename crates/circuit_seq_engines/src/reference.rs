#![forbid(unsafe_code)]

use std::fmt::Write as _;

use circuit_seq_contracts::sample::{
    ReferenceAttachment, ReferenceUpload, REFERENCE_DESCRIPTION_MAX_LEN,
};
use circuit_seq_contracts::{ContractViolation, Validate};
use sha2::{Digest, Sha256};

const FALLBACK_DESCRIPTION: &str = "reference sequence";
// Only the head of the upload is scanned for a header line.
const HEADER_SCAN_LIMIT: usize = 4096;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for b in digest {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Human-readable description of an uploaded reference: the first FASTA
/// header line, else the uploaded file name.
pub fn describe(upload: &ReferenceUpload) -> String {
    let head = &upload.bytes[..upload.bytes.len().min(HEADER_SCAN_LIMIT)];
    let text = String::from_utf8_lossy(head);
    let header = text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.strip_prefix('>'))
        .map(clean)
        .filter(|s| !s.is_empty());
    header
        .or_else(|| upload.file_name.as_deref().map(clean))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| FALLBACK_DESCRIPTION.to_string())
}

pub fn attachment_for(upload: &ReferenceUpload) -> Result<ReferenceAttachment, ContractViolation> {
    upload.validate()?;
    ReferenceAttachment::v1(
        describe(upload),
        sha256_hex(&upload.bytes),
        upload.bytes.len() as u64,
    )
}

fn clean(raw: &str) -> String {
    let collapsed: String = raw
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let trimmed = collapsed.trim();
    let mut end = trimmed.len().min(REFERENCE_DESCRIPTION_MAX_LEN);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].trim_end().to_string()
}
