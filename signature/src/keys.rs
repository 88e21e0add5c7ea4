//! KV key and blob path layout.
//!
//! ```text
//! {prefix}:smp:{identity}:{seq_20d}:{sample_id}  -> Sample (msgpack)
//! {prefix}:sid:{sample_id}                       -> "{seq}:{identity}"
//! {prefix}:pri:{identity}                        -> primary sample id
//! {prefix}:prof:{identity}                       -> TrainingProfile (msgpack)
//! {bucket}/{identity}/{random}.{ext}             -> binary content
//! ```
//!
//! The sequence is zero-padded to 20 digits so a prefix scan returns a
//! gallery in enrollment order.

/// Build the KV key for a sample record.
pub fn sample_key(prefix: &str, identity: &str, seq: i64, sample_id: &str) -> String {
    format!("{prefix}:smp:{identity}:{seq:020}:{sample_id}")
}

/// Return the KV prefix for listing one identity's gallery.
pub fn gallery_prefix(prefix: &str, identity: &str) -> String {
    format!("{prefix}:smp:{identity}:")
}

/// Return the KV key for the sample-id reverse index.
pub fn sid_key(prefix: &str, sample_id: &str) -> String {
    format!("{prefix}:sid:{sample_id}")
}

pub fn sid_value(identity: &str, seq: i64) -> String {
    format!("{seq}:{identity}")
}

/// Decode a reverse index value into (identity, seq).
pub fn parse_sid_value(data: &[u8]) -> Result<(String, i64), String> {
    let s = std::str::from_utf8(data).map_err(|e| e.to_string())?;
    let (seq, identity) = s
        .split_once(':')
        .ok_or_else(|| format!("malformed sid value {s:?}"))?;
    let seq: i64 = seq
        .parse()
        .map_err(|e: std::num::ParseIntError| e.to_string())?;
    Ok((identity.to_string(), seq))
}

pub fn primary_key(prefix: &str, identity: &str) -> String {
    format!("{prefix}:pri:{identity}")
}

pub fn profile_key(prefix: &str, identity: &str) -> String {
    format!("{prefix}:prof:{identity}")
}

pub fn blob_path(bucket: &str, identity: &str, random: &str, ext: &str) -> String {
    format!("{bucket}/{identity}/{random}.{ext}")
}
