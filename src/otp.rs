use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Deserialize;

use crate::database::OtpRecord;
use crate::parse_timestamp;

/// Generates a random code with exactly `digits` decimal digits.
pub fn generate_otp(digits: u32) -> i64 {
    let digits = digits.clamp(1, 9);
    let low = if digits == 1 { 0 } else { 10_i64.pow(digits - 1) };
    let high = 10_i64.pow(digits);
    rand::thread_rng().gen_range(low..high)
}

#[derive(Debug, PartialEq, Eq)]
pub enum OtpCheck {
    Valid,
    Expired,
    Mismatch,
}

/// Expiry is checked before the code itself, so a stale correct code still fails.
pub fn check_otp(record: &OtpRecord, submitted: i64, now: DateTime<Utc>, ttl: Duration) -> OtpCheck {
    let Some(created_at) = parse_timestamp(&record.created_at) else {
        log::warn!("OTP {} has an unreadable timestamp", record.id);
        return OtpCheck::Expired;
    };

    if now - created_at > ttl {
        OtpCheck::Expired
    } else if record.otp != submitted {
        OtpCheck::Mismatch
    } else {
        OtpCheck::Valid
    }
}

/// An OTP as submitted by clients: either a JSON number or a numeric string.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum SubmittedOtp {
    Number(i64),
    Text(String),
}

impl SubmittedOtp {
    pub fn value(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format_timestamp;

    fn record(otp: i64, created_at: DateTime<Utc>) -> OtpRecord {
        OtpRecord {
            id: 1,
            email: "a@b.c".to_string(),
            otp,
            attempts: 0,
            created_at: format_timestamp(created_at),
        }
    }

    #[test]
    fn test_generate_otp_has_requested_digits() {
        for _ in 0..200 {
            let otp = generate_otp(5);
            assert!((10_000..=99_999).contains(&otp), "{otp}");
        }
        assert!((100_000..=999_999).contains(&generate_otp(6)));
    }

    #[test]
    fn test_check_otp() {
        // Stored timestamps carry milliseconds only
        let now = parse_timestamp(&format_timestamp(Utc::now())).unwrap();
        let ttl = Duration::seconds(180);

        assert_eq!(check_otp(&record(12345, now), 12345, now, ttl), OtpCheck::Valid);
        assert_eq!(check_otp(&record(12345, now), 54321, now, ttl), OtpCheck::Mismatch);

        let stale = now - Duration::seconds(181);
        assert_eq!(check_otp(&record(12345, stale), 12345, now, ttl), OtpCheck::Expired);

        let edge = now - Duration::seconds(180);
        assert_eq!(check_otp(&record(12345, edge), 12345, now, ttl), OtpCheck::Valid);
    }

    #[test]
    fn test_submitted_otp_forms() {
        let n: SubmittedOtp = serde_json::from_str("12345").unwrap();
        let s: SubmittedOtp = serde_json::from_str("\" 12345 \"").unwrap();
        let bad: SubmittedOtp = serde_json::from_str("\"12a45\"").unwrap();
        assert_eq!(n.value(), Some(12345));
        assert_eq!(s.value(), Some(12345));
        assert_eq!(bad.value(), None);
    }
}
