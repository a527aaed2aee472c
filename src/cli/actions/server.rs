use crate::attesta::{self, AuthService, ServicePolicy};
use crate::cli::actions::Action;
use crate::keysigner::{signing_key_from_encoded, KeySigner};
use crate::primary::{PrimaryConfig, PrimaryDelegationClient};
use crate::session::SessionPolicy;
use crate::store::{memory::memory_pool, postgres};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use std::{fs, sync::Arc};
use url::Url;

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    let Action::Server(opts) = action;

    let seed = SecretString::from(
        fs::read_to_string(&opts.signing_key)
            .with_context(|| format!("could not read signing key file {}", opts.signing_key))?
            .trim()
            .to_string(),
    );

    let signing_key =
        signing_key_from_encoded(seed.expose_secret()).context("invalid signing key seed")?;

    let pool = if opts.dsn == "memory:" {
        memory_pool(opts.pool_size)
    } else {
        let dsn = Url::parse(&opts.dsn).context("invalid database DSN")?;
        postgres::connect_pool(dsn.as_str(), opts.pool_size)
            .await
            .context("could not connect to the database")?
    };

    let mut primary_config = PrimaryConfig::default();
    if let Some(proxy) = opts.proxy {
        primary_config = primary_config.with_proxy(proxy);
    }

    let primary = Arc::new(
        PrimaryDelegationClient::new(primary_config)
            .context("could not build the primary discovery client")?,
    );

    let signer = KeySigner::new(opts.issuer, signing_key)
        .with_max_duration_ms(opts.cert_max_duration_ms);

    let session = SessionPolicy::default()
        .with_ephemeral_session_duration_ms(opts.ephemeral_duration_ms)
        .with_authentication_duration_ms(opts.authentication_duration_ms);

    let mut policy = ServicePolicy::default()
        .with_session(session)
        .with_staged_ttl_ms(opts.staged_ttl_ms)
        .with_secure_cookies(opts.secure_cookies);

    if let Some(audience) = opts.audience {
        policy = policy.with_audience(audience);
    }

    let service = Arc::new(AuthService::new(Arc::new(pool), primary, signer, policy));

    attesta::new(opts.port, service).await?;

    Ok(())
}
