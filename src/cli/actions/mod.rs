pub mod server;

#[derive(Debug)]
pub enum Action {
    Server(ServerOptions),
}

/// Everything the server action needs, resolved from flags and environment.
#[derive(Debug)]
pub struct ServerOptions {
    pub port: u16,
    pub dsn: String,
    pub issuer: String,
    pub signing_key: String,
    pub pool_size: usize,
    pub proxy: Option<String>,
    pub audience: Option<String>,
    pub ephemeral_duration_ms: u64,
    pub authentication_duration_ms: u64,
    pub cert_max_duration_ms: u64,
    pub staged_ttl_ms: u64,
    pub secure_cookies: bool,
}
