use chrono::Utc;
use std::time::SystemTime;

/// Returns the current unix timestamp (seconds elapsed since 1970-01-01)
#[inline]
pub fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Closed timelike curve, reality compromised")
        .as_secs()
}

/// Timestamp string in the form the clients' timestamp packet expects.
pub fn packet_timestamp() -> String {
    Utc::now().format("%Y:%m:%d: %H:%M:%S.000").to_string()
}

/// Timestamp string stamped onto Blue Burst simple mail at emission.
pub fn mail_timestamp() -> String {
    Utc::now().format("%Y.%m.%d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mail_timestamp_shape() {
        let ts = mail_timestamp();
        // YYYY.MM.DD HH:MM
        assert_eq!(ts.len(), 16);
        assert_eq!(&ts[4..5], ".");
        assert_eq!(&ts[10..11], " ");
        assert_eq!(&ts[13..14], ":");
    }
}
