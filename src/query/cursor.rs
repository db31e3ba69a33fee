//! Opaque resume points for paginated scans.
//!
//! A cursor's plain form is `id:path:field.direction:...`. It is obfuscated
//! with an unauthenticated stream cipher under a fixed key and a random
//! nonce, then base64url-encoded. Tokens are not tamper-proof.

use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use chacha20::ChaCha20;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::domain::{Result, StoreError};
use crate::store::backend::Direction;

const CURSOR_KEY: [u8; 32] = *b"2f8472d791c48224ec9753505d60e205";
const NONCE_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorOrder {
    pub field: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Identity field value of the last record on the page.
    pub id: String,
    /// Store path of the last record on the page.
    pub path: String,
    pub orders: Vec<CursorOrder>,
}

impl Cursor {
    pub fn new(id: impl Into<String>, path: impl Into<String>, orders: Vec<CursorOrder>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            orders,
        }
    }

    /// An unpositioned cursor carrying only the sort specification.
    pub fn with_orders(orders: Vec<CursorOrder>) -> Self {
        Self {
            id: String::new(),
            path: String::new(),
            orders,
        }
    }

    pub fn add_order(&mut self, field: impl Into<String>, direction: Direction) {
        self.orders.push(CursorOrder {
            field: field.into(),
            direction,
        });
    }

    /// Whether the cursor points at a record and can be handed out.
    pub fn is_positioned(&self) -> bool {
        !self.id.is_empty() && !self.path.is_empty()
    }

    pub fn plain(&self) -> String {
        let mut parts = Vec::with_capacity(self.orders.len() + 2);
        parts.push(self.id.clone());
        parts.push(self.path.clone());
        for order in &self.orders {
            parts.push(format!("{}.{}", order.field, order.direction.code()));
        }
        parts.join(":")
    }

    fn from_plain(plain: &str) -> Result<Self> {
        let mut parts = plain.split(':');
        let id = parts.next().unwrap_or_default();
        let path = parts
            .next()
            .ok_or_else(|| StoreError::malformed_cursor("missing path segment"))?;

        let mut orders = Vec::new();
        for part in parts {
            // Field paths may be dotted; the direction code never is.
            let Some((field, code)) = part
                .rsplit_once('.')
                .filter(|(field, _)| !field.is_empty())
            else {
                return Err(StoreError::malformed_cursor(format!(
                    "order segment `{part}` must be `field.direction`"
                )));
            };
            let code: i64 = code.parse().map_err(|err| {
                StoreError::malformed_cursor(format!("failed to parse direction: {err}"))
            })?;
            let direction = Direction::from_code(code).ok_or_else(|| {
                StoreError::malformed_cursor(format!("unknown direction code {code}"))
            })?;
            orders.push(CursorOrder {
                field: field.to_string(),
                direction,
            });
        }

        Ok(Self::new(id, path, orders))
    }

    pub fn encode(&self) -> String {
        CursorCodec::default().encode(self)
    }

    /// Decode a token; an empty token means "no cursor".
    pub fn decode(token: &str) -> Result<Option<Self>> {
        CursorCodec::default().decode(token)
    }
}

/// Encrypts and decrypts cursor tokens under one key.
#[derive(Clone)]
pub struct CursorCodec {
    key: [u8; 32],
}

impl Default for CursorCodec {
    fn default() -> Self {
        Self { key: CURSOR_KEY }
    }
}

impl CursorCodec {
    pub fn with_key(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn encode(&self, cursor: &Cursor) -> String {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let mut body = cursor.plain().into_bytes();
        let mut cipher = ChaCha20::new(&self.key.into(), &nonce.into());
        cipher.apply_keystream(&mut body);

        let mut token = Vec::with_capacity(NONCE_LEN + body.len());
        token.extend_from_slice(&nonce);
        token.extend_from_slice(&body);
        URL_SAFE.encode(token)
    }

    pub fn decode(&self, token: &str) -> Result<Option<Cursor>> {
        if token.is_empty() {
            return Ok(None);
        }
        let raw = URL_SAFE
            .decode(token)
            .map_err(|err| StoreError::malformed_cursor(format!("invalid base64: {err}")))?;
        if raw.len() < NONCE_LEN {
            return Err(StoreError::malformed_cursor("token shorter than its nonce"));
        }

        let (nonce, body) = raw.split_at(NONCE_LEN);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        nonce_bytes.copy_from_slice(nonce);
        let mut plain = body.to_vec();
        let mut cipher = ChaCha20::new(&self.key.into(), &nonce_bytes.into());
        cipher.apply_keystream(&mut plain);

        let plain = String::from_utf8(plain)
            .map_err(|_| StoreError::malformed_cursor("ciphertext did not decrypt to text"))?;
        Cursor::from_plain(&plain).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Cursor {
        Cursor::new(
            "u5",
            "users/u5",
            vec![
                CursorOrder {
                    field: "num".into(),
                    direction: Direction::Asc,
                },
                CursorOrder {
                    field: "id".into(),
                    direction: Direction::Desc,
                },
            ],
        )
    }

    #[test]
    fn plain_form_lists_orders_with_codes() {
        assert_eq!(sample().plain(), "u5:users/u5:num.1:id.2");
    }

    #[test]
    fn encode_decode_round_trip() {
        let cursor = sample();
        let token = cursor.encode();
        let decoded = Cursor::decode(&token).unwrap().expect("cursor present");
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn encoding_is_randomized() {
        let cursor = sample();
        let first = cursor.encode();
        let second = cursor.encode();
        assert_ne!(first, second);
        assert_eq!(Cursor::decode(&first).unwrap(), Cursor::decode(&second).unwrap());
    }

    #[test]
    fn cursor_without_orders_round_trips() {
        let cursor = Cursor::new("a", "col/a", Vec::new());
        let decoded = Cursor::decode(&cursor.encode()).unwrap().unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn dotted_field_paths_round_trip() {
        let cursor = Cursor::new(
            "i1",
            "items/i1",
            vec![
                CursorOrder {
                    field: "meta.rank".into(),
                    direction: Direction::Desc,
                },
                CursorOrder {
                    field: "a.b.c".into(),
                    direction: Direction::Asc,
                },
            ],
        );
        assert_eq!(cursor.plain(), "i1:items/i1:meta.rank.2:a.b.c.1");
        let decoded = Cursor::decode(&cursor.encode()).unwrap().expect("cursor present");
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn empty_token_is_no_cursor() {
        assert_eq!(Cursor::decode("").unwrap(), None);
    }

    #[test]
    fn garbage_tokens_fail() {
        assert!(matches!(
            Cursor::decode("***not-base64***"),
            Err(StoreError::MalformedCursor(_))
        ));
        assert!(matches!(
            Cursor::decode(&URL_SAFE.encode(b"short")),
            Err(StoreError::MalformedCursor(_))
        ));
    }

    #[test]
    fn malformed_plain_forms_fail() {
        assert!(Cursor::from_plain("onlyid").is_err());
        assert!(Cursor::from_plain("id:path:num").is_err());
        assert!(Cursor::from_plain("id:path:.1").is_err());
        assert!(Cursor::from_plain("id:path:meta.rank.x").is_err());
        assert!(Cursor::from_plain("id:path:num.x").is_err());
        assert!(Cursor::from_plain("id:path:num.9").is_err());
        assert!(Cursor::from_plain("id:path").unwrap().orders.is_empty());
    }

    #[test]
    fn tokens_from_another_key_do_not_decode_to_the_same_cursor() {
        let other = CursorCodec::with_key([7u8; 32]);
        let token = other.encode(&sample());
        assert_eq!(other.decode(&token).unwrap(), Some(sample()));
        assert_ne!(
            CursorCodec::default().decode(&token).ok().flatten(),
            Some(sample())
        );
    }

    #[test]
    fn positioned_requires_id_and_path() {
        assert!(sample().is_positioned());
        assert!(!Cursor::with_orders(sample().orders).is_positioned());
    }
}
