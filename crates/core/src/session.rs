//! Session-id derivation (§4.1): identical (client_id, conversation prefix)
//! always yields the same id; unrelated clients never collide.

use sha2::{Digest, Sha256};

use crate::model::{ContentBlock, Message};

/// Caller-supplied identity inputs, gathered by the HTTP layer from headers
/// and the request body before the session id is computed.
#[derive(Debug, Clone, Default)]
pub struct SessionIdentity {
    pub conversation_id: Option<String>,
    pub client_id: Option<String>,
}

/// Derives a stable session id by the first-matching rule in §4.1.
pub fn generate_session_id(messages: &[Message], identity: &SessionIdentity) -> String {
    if let Some(conv_id) = identity.conversation_id.as_ref().filter(|s| !s.is_empty()) {
        let digest = md5_hex(conv_id.as_bytes());
        return format!("conv_{}", &digest[..16]);
    }

    let mut parts: Vec<String> = Vec::new();
    if let Some(client_id) = identity.client_id.as_ref().filter(|s| !s.is_empty()) {
        parts.push(format!("client:{client_id}"));
    }

    for msg in messages.iter().take(5) {
        for block in msg.blocks().iter().take(3) {
            if let ContentBlock::Text { text } = block {
                parts.push(truncate_chars(text, 200));
            }
        }
    }

    if !parts.is_empty() {
        let joined = parts.join(" | ");
        let mut hasher = Sha256::new();
        hasher.update(joined.as_bytes());
        let digest = hasher.finalize();
        return hex::encode(digest)[..20].to_string();
    }

    format!("rand_{}", uuid::Uuid::new_v4().simple())
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Minimal MD5 implementation: the teacher stack has no `md5` crate
/// dependency, and pulling one in for a single hex digest is not worth a new
/// transitive dependency, so this module implements RFC 1321 directly.
fn md5_hex(input: &[u8]) -> String {
    md5::compute(input)
}

mod md5 {
    const S: [u32; 64] = [
        7, 12, 17, 22, 7, 12, 17, 22, 7, 12, 17, 22, 7, 12, 17, 22, 5, 9, 14, 20, 5, 9, 14, 20, 5,
        9, 14, 20, 5, 9, 14, 20, 4, 11, 16, 23, 4, 11, 16, 23, 4, 11, 16, 23, 4, 11, 16, 23, 6,
        10, 15, 21, 6, 10, 15, 21, 6, 10, 15, 21, 6, 10, 15, 21,
    ];

    const K: [u32; 64] = [
        0xd76aa478, 0xe8c7b756, 0x242070db, 0xc1bdceee, 0xf57c0faf, 0x4787c62a, 0xa8304613,
        0xfd469501, 0x698098d8, 0x8b44f7af, 0xffff5bb1, 0x895cd7be, 0x6b901122, 0xfd987193,
        0xa679438e, 0x49b40821, 0xf61e2562, 0xc040b340, 0x265e5a51, 0xe9b6c7aa, 0xd62f105d,
        0x02441453, 0xd8a1e681, 0xe7d3fbc8, 0x21e1cde6, 0xc33707d6, 0xf4d50d87, 0x455a14ed,
        0xa9e3e905, 0xfcefa3f8, 0x676f02d9, 0x8d2a4c8a, 0xfffa3942, 0x8771f681, 0x6d9d6122,
        0xfde5380c, 0xa4beea44, 0x4bdecfa9, 0xf6bb4b60, 0xbebfbc70, 0x289b7ec6, 0xeaa127fa,
        0xd4ef3085, 0x04881d05, 0xd9d4d039, 0xe6db99e5, 0x1fa27cf8, 0xc4ac5665, 0xf4292244,
        0x432aff97, 0xab9423a7, 0xfc93a039, 0x655b59c3, 0x8f0ccc92, 0xffeff47d, 0x85845dd1,
        0x6fa87e4f, 0xfe2ce6e0, 0xa3014314, 0x4e0811a1, 0xf7537e82, 0xbd3af235, 0x2ad7d2bb,
        0xeb86d391,
    ];

    pub fn compute(input: &[u8]) -> String {
        let mut a0: u32 = 0x67452301;
        let mut b0: u32 = 0xefcdab89;
        let mut c0: u32 = 0x98badcfe;
        let mut d0: u32 = 0x10325476;

        let mut msg = input.to_vec();
        let orig_len_bits = (input.len() as u64).wrapping_mul(8);
        msg.push(0x80);
        while msg.len() % 64 != 56 {
            msg.push(0);
        }
        msg.extend_from_slice(&orig_len_bits.to_le_bytes());

        for chunk in msg.chunks(64) {
            let mut m = [0u32; 16];
            for (i, word) in chunk.chunks(4).enumerate() {
                m[i] = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            }

            let (mut a, mut b, mut c, mut d) = (a0, b0, c0, d0);
            for i in 0..64 {
                let (f, g) = match i {
                    0..=15 => ((b & c) | (!b & d), i),
                    16..=31 => ((d & b) | (!d & c), (5 * i + 1) % 16),
                    32..=47 => (b ^ c ^ d, (3 * i + 5) % 16),
                    _ => (c ^ (b | !d), (7 * i) % 16),
                };
                let f = f
                    .wrapping_add(a)
                    .wrapping_add(K[i])
                    .wrapping_add(m[g]);
                a = d;
                d = c;
                c = b;
                b = b.wrapping_add(f.rotate_left(S[i]));
            }

            a0 = a0.wrapping_add(a);
            b0 = b0.wrapping_add(b);
            c0 = c0.wrapping_add(c);
            d0 = d0.wrapping_add(d);
        }

        let mut out = Vec::with_capacity(16);
        for word in [a0, b0, c0, d0] {
            out.extend_from_slice(&word.to_le_bytes());
        }
        hex::encode(out)
    }
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MessageContent, Role};

    fn user_msg(text: &str) -> Message {
        Message { role: Role::User, content: MessageContent::Text(text.to_string()) }
    }

    #[test]
    fn conversation_id_takes_priority_and_is_deterministic() {
        let identity = SessionIdentity { conversation_id: Some("abc".into()), client_id: Some("x".into()) };
        let a = generate_session_id(&[], &identity);
        let b = generate_session_id(&[], &identity);
        assert_eq!(a, b);
        assert!(a.starts_with("conv_"));
        assert_eq!(a.len(), "conv_".len() + 16);
    }

    #[test]
    fn identical_client_and_messages_collide_unrelated_clients_dont() {
        let msgs = vec![user_msg("hello there")];
        let id_a = SessionIdentity { conversation_id: None, client_id: Some("client-a".into()) };
        let id_b = SessionIdentity { conversation_id: None, client_id: Some("client-b".into()) };
        let a1 = generate_session_id(&msgs, &id_a);
        let a2 = generate_session_id(&msgs, &id_a);
        let b1 = generate_session_id(&msgs, &id_b);
        assert_eq!(a1, a2);
        assert_ne!(a1, b1);
        assert_eq!(a1.len(), 20);
    }

    #[test]
    fn no_identity_and_no_messages_falls_back_to_random() {
        let identity = SessionIdentity::default();
        let a = generate_session_id(&[], &identity);
        let b = generate_session_id(&[], &identity);
        assert!(a.starts_with("rand_"));
        assert_ne!(a, b);
    }

    #[test]
    fn md5_matches_known_vector() {
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
