//! Short, human-readable photo ids (6 characters, base62).

use uuid::Uuid;

const BASE62: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const SHORT_ID_LENGTH: usize = 6;

/// Derive a 6-character base62 id from a UUID by folding its halves.
pub fn from_uuid(id: Uuid) -> String {
    let (hi, lo) = id.as_u64_pair();
    encode(hi ^ lo)
}

fn encode(mut value: u64) -> String {
    let mut out = Vec::with_capacity(SHORT_ID_LENGTH);
    while value > 0 && out.len() < SHORT_ID_LENGTH {
        out.push(BASE62[(value % 62) as usize]);
        value /= 62;
    }
    while out.len() < SHORT_ID_LENGTH {
        out.push(BASE62[0]);
    }
    out.reverse();
    String::from_utf8(out).expect("base62 alphabet is ascii")
}

/// Validate the 6-character base62 shape.
pub fn is_valid(short_id: &str) -> bool {
    short_id.len() == SHORT_ID_LENGTH && short_id.bytes().all(|b| BASE62.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_and_alphabet() {
        for _ in 0..50 {
            let sid = from_uuid(Uuid::new_v4());
            assert!(is_valid(&sid), "invalid short id: {sid}");
        }
    }

    #[test]
    fn test_deterministic() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(from_uuid(id), from_uuid(id));
    }

    #[test]
    fn test_zero_pads() {
        assert_eq!(encode(0), "000000");
        assert_eq!(encode(61).chars().last(), Some('z'));
    }

    #[test]
    fn test_is_valid_rejects() {
        assert!(!is_valid("abc"));
        assert!(!is_valid("abc!12"));
        assert!(!is_valid("toolong1"));
    }
}
