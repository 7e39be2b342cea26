//! Mute link tokens and access-token checks.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs target ids so an unauthenticated mute link can prove it was issued
/// by this server.
///
/// Tokens are `hex(HMAC-SHA256(secret, target_id))`. They never expire;
/// rotating the secret invalidates every outstanding link.
#[derive(Clone)]
pub struct MuteTokens {
    secret: Vec<u8>,
}

impl MuteTokens {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length
        HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size")
    }

    /// Token for a target id
    pub fn generate(&self, target_id: &str) -> String {
        let mut mac = self.mac();
        mac.update(target_id.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of a token against a target id
    pub fn verify(&self, target_id: &str, token: &str) -> bool {
        let Ok(expected) = hex::decode(token) else {
            return false;
        };
        let mut mac = self.mac();
        mac.update(target_id.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }

    /// Public mute URL for a target, `<base>/mute/<id>/<token>`
    pub fn mute_url(&self, base_url: &str, target_id: &str) -> String {
        format!(
            "{}/mute/{}/{}",
            base_url.trim_end_matches('/'),
            target_id,
            self.generate(target_id)
        )
    }
}

impl std::fmt::Debug for MuteTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuteTokens").finish_non_exhaustive()
    }
}

/// Shared access token guarding the webhook and inspection endpoints.
#[derive(Clone)]
pub struct AccessToken {
    tag: Vec<u8>,
}

const ACCESS_CONTEXT: &[u8] = b"sifa-access-token";

impl AccessToken {
    pub fn new(token: impl AsRef<[u8]>) -> Self {
        Self {
            tag: Self::tag_for(token.as_ref()).finalize().into_bytes().to_vec(),
        }
    }

    fn tag_for(token: &[u8]) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(token).expect("HMAC can take key of any size");
        mac.update(ACCESS_CONTEXT);
        mac
    }

    /// Compare a presented token without leaking timing information.
    pub fn verify(&self, candidate: &str) -> bool {
        Self::tag_for(candidate.as_bytes())
            .verify_slice(&self.tag)
            .is_ok()
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mute_token_round_trip() {
        let tokens = MuteTokens::new("s3cret");
        for id in ["backup", "db/replica", "", "ünïcode"] {
            let token = tokens.generate(id);
            assert!(tokens.verify(id, &token));
        }
    }

    #[test]
    fn test_mute_token_is_bound_to_target() {
        let tokens = MuteTokens::new("s3cret");
        let token = tokens.generate("backup");
        assert!(!tokens.verify("backup2", &token));
        assert!(!tokens.verify("backup", "not-hex"));
        assert!(!tokens.verify("backup", ""));
    }

    #[test]
    fn test_mute_token_is_deterministic_and_keyed() {
        let a = MuteTokens::new("s3cret");
        let b = MuteTokens::new("s3cret");
        let other = MuteTokens::new("rotated");

        assert_eq!(a.generate("backup"), b.generate("backup"));
        assert_eq!(a.generate("backup").len(), 64);
        assert!(!other.verify("backup", &a.generate("backup")));
    }

    #[test]
    fn test_mute_url() {
        let tokens = MuteTokens::new("s3cret");
        let url = tokens.mute_url("https://sifa.example.com/", "backup");
        assert_eq!(
            url,
            format!("https://sifa.example.com/mute/backup/{}", tokens.generate("backup"))
        );
    }

    #[test]
    fn test_access_token() {
        let token = AccessToken::new("letmein");
        assert!(token.verify("letmein"));
        assert!(!token.verify("letmein "));
        assert!(!token.verify(""));
    }
}
