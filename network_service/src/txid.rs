// network_service/src/txid.rs
use sv::util::sha256d;

/// Display form txid (byte reversed hex) of a serialized transaction.
pub fn txid_for_raw_tx(raw_tx: &[u8]) -> String {
    sha256d(raw_tx).encode()
}

pub fn verify_txid(raw_tx: &[u8], txid: &str) -> bool {
    txid_for_raw_tx(raw_tx).eq_ignore_ascii_case(txid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txid_is_reversed_double_sha256() {
        let raw = b"not really a transaction";
        let mut internal = sha256d(raw).0;
        internal.reverse();
        assert_eq!(txid_for_raw_tx(raw), hex::encode(internal));
        assert!(verify_txid(raw, &txid_for_raw_tx(raw).to_uppercase()));
        assert!(!verify_txid(b"other bytes", &txid_for_raw_tx(raw)));
    }
}
