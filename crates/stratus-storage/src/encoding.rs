/// Key encoder for storage keys
pub struct KeyEncoder;

impl KeyEncoder {
    /// Prefix shared by all audit entries
    pub const AUDIT_PREFIX: &'static str = "audit/";

    /// Encode an audit entry key: audit/{sequence}
    ///
    /// The sequence is zero-padded so lexical key order equals append order.
    pub fn encode_audit_key(sequence: u64) -> String {
        format!("{}{:020}", Self::AUDIT_PREFIX, sequence)
    }

    /// Parse the sequence number back out of an audit key
    pub fn parse_audit_key(key: &str) -> Option<u64> {
        key.strip_prefix(Self::AUDIT_PREFIX)?.parse().ok()
    }
}
