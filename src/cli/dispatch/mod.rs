use crate::cli::actions::{Action, ServerOptions};
use anyhow::{anyhow, Result};

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let required = |name: &str| -> Result<String> {
        matches
            .get_one::<String>(name)
            .map(String::to_string)
            .ok_or_else(|| anyhow!("missing required argument: --{name}"))
    };

    Ok(Action::Server(ServerOptions {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        dsn: required("dsn")?,
        issuer: required("issuer")?,
        signing_key: required("signing-key")?,
        pool_size: matches.get_one::<usize>("pool-size").copied().unwrap_or(50),
        proxy: matches.get_one::<String>("proxy").map(String::to_string),
        audience: matches.get_one::<String>("audience").map(String::to_string),
        ephemeral_duration_ms: matches
            .get_one::<u64>("ephemeral-duration")
            .copied()
            .unwrap_or(3_600_000),
        authentication_duration_ms: matches
            .get_one::<u64>("authentication-duration")
            .copied()
            .unwrap_or(1_209_600_000),
        cert_max_duration_ms: matches
            .get_one::<u64>("cert-max-duration")
            .copied()
            .unwrap_or(86_400_000),
        staged_ttl_ms: matches
            .get_one::<u64>("staged-ttl")
            .copied()
            .unwrap_or(900_000),
        secure_cookies: matches.get_flag("secure-cookies"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    #[test]
    fn test_handler_defaults() {
        let matches = commands::new().get_matches_from(vec![
            "attesta",
            "--dsn",
            "memory:",
            "--issuer",
            "login.example.com",
            "--signing-key",
            "/etc/attesta/key.seed",
        ]);

        let Action::Server(opts) = handler(&matches).unwrap();

        assert_eq!(opts.port, 8080);
        assert_eq!(opts.dsn, "memory:");
        assert_eq!(opts.issuer, "login.example.com");
        assert_eq!(opts.pool_size, 50);
        assert_eq!(opts.proxy, None);
        assert_eq!(opts.audience, None);
        assert_eq!(opts.ephemeral_duration_ms, 3_600_000);
        assert_eq!(opts.authentication_duration_ms, 1_209_600_000);
        assert_eq!(opts.cert_max_duration_ms, 86_400_000);
        assert_eq!(opts.staged_ttl_ms, 900_000);
        assert!(!opts.secure_cookies);
    }
}
