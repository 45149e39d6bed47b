use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use tokenart_service::caching::SessionCache;
use tokenart_service::config::Config;
use tokenart_service::metrics;
use tokenart_service::probe::{ImageProbe, render};
use tokenart_service::resolver::{ImageService, ResolutionState};
use tokenart_service::tokens::{SubgraphTokenList, load_user_tokens};
use tokenart_sources::{Identifier, UriNormalizer};

use settings::{Command, Settings};

mod logging;
mod output;
mod settings;

fn main() {
    match execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}

fn execute() -> Result<()> {
    let Settings {
        mut config,
        log_level,
        command,
    } = Settings::get()?;
    config.logging.level = log_level;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: The runtime is not started yet, so this is single-threaded.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("tokenart-worker")
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(run(config, command))
}

async fn run(config: Config, command: Command) -> Result<()> {
    match command {
        Command::Normalize { identifiers } => {
            let normalizer = UriNormalizer::new(config.gateways.clone());
            let candidates: Vec<_> = identifiers
                .into_iter()
                .map(Identifier::from)
                .map(|identifier| {
                    let urls = normalizer.normalize(&identifier);
                    (identifier, urls)
                })
                .collect();
            output::print_candidates(&candidates);
        }
        Command::Resolve { identifiers } => {
            let identifiers: Vec<_> = identifiers.into_iter().map(Identifier::from).collect();
            let states = resolve_all(&config, &identifiers).await?;
            let resolutions: Vec<_> = identifiers.into_iter().zip(states).collect();
            output::print_resolutions(&resolutions);
        }
        Command::EndSession => {
            SessionCache::from_config(&config)?.end_session();
            tracing::info!("Ended the artwork session");
        }
        Command::Tokens {
            bridge,
            chain,
            account,
            search,
            resolve,
        } => {
            let bridge_config = config
                .bridge(&bridge)
                .with_context(|| format!("bridge `{bridge}` is not enabled"))?;
            let provider =
                SubgraphTokenList::from_config(&config).context("failed to create HTTP client")?;

            let tokens = load_user_tokens(&provider, bridge_config, chain, account.as_deref())
                .await
                .context("failed to load token list")?
                .filter(&search);
            tracing::info!(
                bridge = %bridge_config.label,
                eip721 = tokens.eip721.len(),
                eip1155 = tokens.eip1155.len(),
                "Loaded tokens"
            );

            if resolve {
                let identifiers: Vec<_> = tokens
                    .iter()
                    .map(|token| token.image.clone().unwrap_or_else(|| Identifier::new("")))
                    .collect();
                let states = resolve_all(&config, &identifiers).await?;
                output::print_tokens(&tokens, Some(&states));
            } else {
                output::print_tokens(&tokens, None);
            }
        }
    }

    Ok(())
}

/// Resolves all `identifiers` concurrently, each through its own controller.
async fn resolve_all(config: &Config, identifiers: &[Identifier]) -> Result<Vec<ResolutionState>> {
    let service = ImageService::new(config, tokio::runtime::Handle::current())?;
    let probe = Arc::new(ImageProbe::from_config(config).context("failed to create HTTP client")?);

    let renders = identifiers.iter().map(|identifier| {
        let controller = service.controller();
        let probe = probe.clone();
        async move {
            controller.set_identifier(identifier.clone());
            render(&controller, &probe).await
        }
    });

    Ok(join_all(renders).await)
}
