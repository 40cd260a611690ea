//! CLI runner - executes commands

use crate::activity::generate_source_id_hash;
use crate::adapter::{
    AdapterContext, ArticleAdapter, ChatAdapter, PlatformAdapter, PlatformSource, ReachAdapter,
    RepoAdapter, SocialAdapter,
};
use crate::cli::commands::{Cli, Commands};
use crate::config::EngineConfig;
use crate::engine::{iterate, Iteration, RunOutcome, RunReport};
use crate::error::{Error, Result};
use crate::http::{HttpClient, HttpClientConfig, UnifiedApiClient, UnifiedBudgetProbe};
use crate::pool::{Credential, CredentialPool, PooledCaller};
use crate::queue::{ContinuationQueue, JsonlQueue, MemoryQueue, TriggerMessage};
use crate::store::{ActivitySink, FileIntegrationStore, IntegrationStore, JsonlSink, MemorySink};
use crate::types::{Integration, OptionStringExt, Platform};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        match &self.cli.command {
            Commands::Run {
                message,
                store,
                activities,
                queue,
            } => {
                self.run_message(
                    message,
                    store.as_deref(),
                    activities.as_deref(),
                    queue.as_deref(),
                )
                .await
            }
            Commands::Inspect { message } => self.inspect(message),
            Commands::Hash {
                member,
                activity_type,
                timestamp,
                platform,
            } => {
                let id = generate_source_id_hash(member, activity_type, timestamp, platform)?;
                println!("{id}");
                Ok(())
            }
        }
    }

    /// Load configuration, then apply environment overrides
    fn load_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.cli.config {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::default(),
        };
        config.apply_process_env()?;
        Ok(config)
    }

    fn load_message(path: &Path) -> Result<TriggerMessage> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "Failed to read message file '{}': {}",
                path.display(),
                e
            ))
        })?;
        TriggerMessage::from_json(&content)
    }

    /// Run one invocation for the message in `message_path`
    async fn run_message(
        &self,
        message_path: &Path,
        store_path: Option<&Path>,
        activities_path: Option<&Path>,
        queue_path: Option<&Path>,
    ) -> Result<()> {
        let config = self.load_config()?;
        let message = Self::load_message(message_path)?;

        let store: Arc<dyn IntegrationStore> = match store_path {
            Some(path) => Arc::new(FileIntegrationStore::from_file(path)?),
            None => Arc::new(FileIntegrationStore::in_memory()),
        };
        let sink: Arc<dyn ActivitySink> = match activities_path {
            Some(path) => Arc::new(JsonlSink::new(path)),
            None => Arc::new(MemorySink::new()),
        };
        let queue: Arc<dyn ContinuationQueue> = match queue_path {
            Some(path) => Arc::new(JsonlQueue::new(path)),
            None => Arc::new(MemoryQueue::new()),
        };

        if message.sleep > 0 {
            info!(seconds = message.sleep, "Waiting before continuation");
            tokio::time::sleep(Duration::from_secs(message.sleep)).await;
        }

        let mut ctx = AdapterContext::new(message.tenant.clone(), sink, queue, store)
            .with_onboarding(message.onboarding);
        if let Some(id) = message.integration_id.clone() {
            ctx = ctx.with_integration_id(id);
        }

        let report = run_trigger(&config, &message, ctx, build_source(&config)?).await?;
        self.output_report(&message, &report);
        Ok(())
    }

    /// Print the checkpoint carried by a message
    fn inspect(&self, message_path: &Path) -> Result<()> {
        let message = Self::load_message(message_path)?;
        let state = &message.state;

        self.output_message(&json!({
            "group": message.group_key(),
            "onboarding": message.onboarding,
            "sleep": message.sleep,
            "endpoint": state.endpoint.as_ref().map(ToString::to_string),
            "page": state.page,
            "endpoints": state.endpoints.iter().map(ToString::to_string).collect::<Vec<_>>(),
        }));
        Ok(())
    }

    fn output_report(&self, message: &TriggerMessage, report: &RunReport) {
        let stats = &report.stats;
        let mut summary = json!({
            "integration": message.integration,
            "tenant": message.tenant,
            "pages": stats.pages,
            "records": stats.records,
            "activities": stats.activities,
            "limitCount": stats.limit_count,
            "elapsedMs": stats.elapsed.as_millis() as u64,
        });
        match &report.outcome {
            RunOutcome::Completed => summary["outcome"] = json!("completed"),
            RunOutcome::LimitReached {
                checkpoint,
                wait_seconds,
            } => {
                summary["outcome"] = json!("limit_reached");
                summary["waitSeconds"] = json!(wait_seconds);
                summary["checkpoint"] = json!(checkpoint);
            }
        }
        self.output_message(&summary);
    }

    fn output_message(&self, msg: &Value) {
        if self.cli.verbose {
            println!("{}", serde_json::to_string_pretty(msg).unwrap_or_default());
        } else {
            println!("{}", serde_json::to_string(msg).unwrap_or_default());
        }
    }
}

/// Gateway client with per-platform pacing from `config`
pub fn build_source(config: &EngineConfig) -> Result<UnifiedApiClient> {
    let mut builder = HttpClientConfig::builder()
        .base_url(config.api.base_url.clone())
        .timeout(Duration::from_secs(config.api.timeout_secs));
    if let Some(token) = config.api.token.clone().none_if_empty() {
        builder = builder.bearer_token(token);
    }

    let mut client = UnifiedApiClient::new(HttpClient::with_config(builder.build())?);
    for platform in [Platform::Slack, Platform::Twitter, Platform::Devto, Platform::Github] {
        if let Some(pacing) = config.platforms.get(platform).pacing() {
            client = client.with_pacing(platform, pacing);
        }
    }
    Ok(client)
}

fn credentials(config: &EngineConfig) -> Vec<Credential> {
    let tokens: Vec<String> = if config.pool.tokens.is_empty() {
        config.api.token.clone().into_iter().collect()
    } else {
        config.pool.tokens.clone()
    };
    tokens
        .into_iter()
        .filter(|t| !t.is_empty())
        .enumerate()
        .map(|(i, token)| Credential::new(format!("token-{i}"), token))
        .collect()
}

fn required(value: Option<&String>, field: &str, integration: Integration) -> Result<String> {
    value
        .cloned()
        .none_if_empty()
        .ok_or_else(|| Error::config(format!("{integration} message needs args.{field}")))
}

/// Build the adapter a trigger message asks for
pub async fn build_adapter(
    config: &EngineConfig,
    message: &TriggerMessage,
    ctx: AdapterContext,
    client: UnifiedApiClient,
) -> Result<Box<dyn PlatformAdapter>> {
    let integration = message.integration;
    let platform_config = config.platforms.get(integration.platform());
    let retry = config.retry.policy();
    let args = &message.args;
    let source: Arc<dyn PlatformSource> = Arc::new(client.clone());

    let adapter: Box<dyn PlatformAdapter> = match integration {
        Integration::Slack => {
            let guild_id = required(args.guild_id.as_ref(), "guildId", integration)?;
            let mut adapter = ChatAdapter::load(ctx, source, guild_id)
                .await?
                .with_retry(retry);
            if let Some(retrospect) = platform_config.retrospect() {
                adapter = adapter.with_max_retrospect(retrospect);
            }
            Box::new(adapter)
        }
        Integration::Twitter => {
            let profile_id = required(args.profile_id.as_ref(), "profileId", integration)?;
            let mut adapter = SocialAdapter::load(ctx, source, profile_id, args.hashtags.clone())
                .await?
                .with_seen_followers(args.followers.clone());
            if let Some(retrospect) = platform_config.retrospect() {
                adapter = adapter.with_max_retrospect(retrospect);
            }
            Box::new(adapter)
        }
        Integration::TwitterReach => {
            let profile_id = required(args.profile_id.as_ref(), "profileId", integration)?;
            Box::new(
                ReachAdapter::from_subjects(ctx, source, profile_id, args.subjects.clone())
                    .with_retry(retry),
            )
        }
        Integration::Devto => {
            Box::new(ArticleAdapter::new(ctx, source, args.articles.clone()).with_retry(retry))
        }
        Integration::Github => {
            let credentials = credentials(config);
            if credentials.is_empty() {
                return Err(Error::config(
                    "github integration needs pool.tokens or api.token",
                ));
            }
            let pool = CredentialPool::with_credentials(credentials, config.pool.pool_config());
            let caller = PooledCaller::new(pool, ctx.tenant.clone())
                .with_retry(retry)
                .with_probe(Arc::new(UnifiedBudgetProbe::new(client, Platform::Github)));
            Box::new(RepoAdapter::new(ctx, source, caller, args.repos.clone()))
        }
    };
    Ok(adapter)
}

/// Build the adapter for `message` and drive one invocation
pub async fn run_trigger(
    config: &EngineConfig,
    message: &TriggerMessage,
    ctx: AdapterContext,
    client: UnifiedApiClient,
) -> Result<RunReport> {
    let mut adapter = build_adapter(config, message, ctx, client).await?;
    let configured = config.platforms.get(message.integration.platform()).global_limit;

    let iteration = Iteration::new(
        adapter.universe(),
        message.state.clone(),
        message.onboarding,
        adapter.global_limit(configured),
        message.limit_count,
    );

    info!(
        group = %message.group_key(),
        onboarding = message.onboarding,
        resume = !message.state.is_empty(),
        limit_count = message.limit_count,
        "Starting invocation"
    );
    iterate(&mut *adapter, iteration, config.run_mode()).await
}
