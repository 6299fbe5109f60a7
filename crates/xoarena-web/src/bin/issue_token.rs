//! Mints a token for the shared-secret issuer, for local play-testing.
//!
//! Usage: `XOARENA_ISSUER_SECRET=... issue_token <fid> <domain> [ttl_secs]`

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;

/// Same shape as `auth::jwt::Claims`; the server rejects anything else.
#[derive(Serialize)]
struct Claims {
    sub: String,
    aud: String,
    exp: usize,
}

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let (Some(fid), Some(domain)) = (args.next(), args.next()) else {
        anyhow::bail!("usage: issue_token <fid> <domain> [ttl_secs]");
    };
    let fid: u64 = fid.parse()?;
    if fid == 0 {
        anyhow::bail!("fid must be a positive integer");
    }
    let ttl_secs: u64 = args.next().map(|v| v.parse()).transpose()?.unwrap_or(3600);

    let secret = std::env::var("XOARENA_ISSUER_SECRET")
        .map_err(|_| anyhow::anyhow!("XOARENA_ISSUER_SECRET is not set"))?;

    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    let claims = Claims {
        sub: fid.to_string(),
        aud: domain.to_ascii_lowercase(),
        exp: (now + ttl_secs) as usize,
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    println!("{token}");
    Ok(())
}
