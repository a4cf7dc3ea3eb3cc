use clap::Parser;
use iamdb_clock::{Clock, DurationSecs, System};
use iamdb_tokens::{issuers::CommandTokenIssuer, CredentialCache, TokenScope, TokenStatus};
use std::time::Duration;
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The region hosting the database
    #[arg(short, long, env = "AWS_REGION")]
    region: String,

    /// The database endpoint, optionally with a port
    #[arg(long, env = "DB_HOST")]
    host: String,

    /// The database user configured for token authentication
    #[arg(short, long, env = "DB_USER")]
    username: String,

    /// Lead time, in seconds, before expiry at which tokens are refreshed
    #[arg(long, default_value_t = 60)]
    safety_margin: u64,

    /// How often, in seconds, to ask the cache for a token
    #[arg(long, default_value_t = 30)]
    interval: u64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let cache = CredentialCache::new(CommandTokenIssuer::aws_cli())
        .with_safety_margin(DurationSecs(opts.safety_margin));
    let scope = TokenScope::new(opts.region, opts.host, opts.username);

    let mut interval = time::interval(Duration::from_secs(opts.interval));
    loop {
        interval.tick().await;

        let token = cache.get_token(&scope).await?;
        let now = System.now();
        let status = token.status_at(now, cache.safety_margin());
        match status {
            TokenStatus::Fresh => tracing::info!(
                ?status,
                token = format_args!("{:#?}", token.secret()),
                expiry = token.expiry().0,
                remaining = token.until_expired_at(now).0,
                "pulled token"
            ),
            TokenStatus::Stale | TokenStatus::Expired => tracing::error!(
                ?status,
                expiry = token.expiry().0,
                "cache returned a token it should have refreshed"
            ),
        }
    }
}
