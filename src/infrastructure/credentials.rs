use std::env;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::domain::bot::{ExchangeCredential, Venue};
use crate::domain::ports::CredentialResolver;

/// Resolves credentials from process environment variables named
/// `CRED_<id>_*`. A stand-in for the real (out-of-scope) credential store;
/// fine for single-operator deployments and local development.
pub struct EnvCredentialResolver;

#[async_trait]
impl CredentialResolver for EnvCredentialResolver {
    async fn resolve(&self, credential_id: &str) -> Result<ExchangeCredential> {
        let key = env_var(credential_id, "API_KEY")?;
        let secret = env_var(credential_id, "API_SECRET")?;
        let venue_raw = env_var(credential_id, "VENUE")?;
        let venue = Venue::from_str(&venue_raw)?;
        let testnet = env_bool(credential_id, "TESTNET", false)?;
        let trade_permission = env_bool(credential_id, "TRADE_PERMISSION", true)?;
        let withdraw_permission = env_bool(credential_id, "WITHDRAW_PERMISSION", false)?;

        let credential = ExchangeCredential {
            id: credential_id.to_string(),
            venue,
            api_key: key,
            api_secret: secret,
            testnet,
            trade_permission,
            withdraw_permission,
        };
        credential.validate()?;
        Ok(credential)
    }
}

fn env_var(credential_id: &str, suffix: &str) -> Result<String> {
    let name = format!("CRED_{credential_id}_{suffix}");
    env::var(&name).context(format!("missing environment variable {name}"))
}

fn env_bool(credential_id: &str, suffix: &str, default: bool) -> Result<bool> {
    let name = format!("CRED_{credential_id}_{suffix}");
    match env::var(&name) {
        Ok(raw) => raw.parse::<bool>().context(format!("failed to parse {name}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_fails_loudly_when_key_is_missing() {
        let resolver = EnvCredentialResolver;
        let err = resolver.resolve("nonexistent-credential-id").await.unwrap_err();
        assert!(err.to_string().contains("missing environment variable"));
    }
}
