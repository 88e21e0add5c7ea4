//! Utility functions for CLI commands.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;

use autograph_cli::{Config, Context, Output, OutputFormat, load_config};
use autograph_kv::RedbStore;
use autograph_recognition::{
    DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT, HttpRecognizer, MAX_RETRY_BACKOFF, Offline, Recognizer,
};
use autograph_signature::{
    FsBlobStore, MediaType, NewSample, SampleValidator, Session, SignatureService,
    ValidatorConfig, VerifyMode,
};

use crate::Cli;

/// Gets the global configuration.
pub fn get_config(cli: &Cli) -> anyhow::Result<Config> {
    load_config(cli.config.as_deref())
}

/// Gets the context to use. Without any configured context an offline
/// context named `default` is used.
pub fn get_context(cli: &Cli) -> anyhow::Result<Context> {
    let cfg = get_config(cli)?;
    match (cfg.resolve_context(cli.context.as_deref()), cli.context.as_deref()) {
        (Some(ctx), _) => Ok(ctx.clone()),
        (None, Some(name)) => anyhow::bail!("context '{}' not found", name),
        (None, None) => Ok(Context {
            name: "default".into(),
            ..Default::default()
        }),
    }
}

pub fn output(cli: &Cli) -> Output {
    Output::new(OutputFormat::from_json_flag(cli.json), cli.output.clone())
}

/// The acting user, recorded on every operation.
pub fn session() -> Session {
    let actor = std::env::var("USER").unwrap_or_else(|_| "cli".to_string());
    Session::new(actor)
}

pub fn verify_mode(ctx: &Context) -> anyhow::Result<VerifyMode> {
    if ctx.mode.is_empty() {
        return Ok(VerifyMode::default());
    }
    ctx.mode.parse().map_err(anyhow::Error::msg)
}

/// Creates the recognition client for a context.
pub fn create_recognizer(ctx: &Context) -> anyhow::Result<Arc<dyn Recognizer>> {
    if ctx.base_url.is_empty() {
        return Ok(Arc::new(Offline));
    }
    let mut builder = HttpRecognizer::builder(&ctx.base_url);
    if !ctx.api_key.is_empty() {
        builder = builder.api_key(&ctx.api_key);
    }
    if let Some(timeout) = ctx.timeout() {
        builder = builder.timeout(timeout);
    }
    if let Some(retries) = ctx.max_retries {
        builder = builder.max_retries(retries);
    }
    Ok(Arc::new(builder.build()?))
}

/// How long an unresolved training record blocks retraining: one training
/// request with every retry and backoff, plus a minute of slack.
pub fn training_lease(ctx: &Context) -> Duration {
    let timeout = ctx.timeout().unwrap_or(DEFAULT_TIMEOUT);
    let attempts = ctx
        .max_retries
        .unwrap_or(DEFAULT_MAX_RETRIES)
        .saturating_add(1);
    timeout
        .saturating_add(MAX_RETRY_BACKOFF)
        .saturating_mul(attempts)
        .saturating_add(Duration::from_secs(60))
}

/// Opens the service over the context's data directory.
pub fn open_service(ctx: &Context) -> anyhow::Result<SignatureService> {
    let data_dir = ctx.data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("create data directory {}", data_dir.display()))?;

    let kv = RedbStore::open(data_dir.join("meta.redb"))
        .with_context(|| format!("open metadata store in {}", data_dir.display()))?;
    let blobs = FsBlobStore::new(data_dir.join("blobs"));

    let mut validator = ValidatorConfig::default();
    if let Some(max) = ctx.max_sample_bytes {
        validator = validator.with_max_bytes(max);
    }

    let mut builder = SignatureService::builder(
        Arc::new(kv),
        Arc::new(blobs),
        create_recognizer(ctx)?,
    )
    .validator(SampleValidator::new(validator))
    .training_lease(training_lease(ctx))
    .mode(verify_mode(ctx)?);
    if let Some(threshold) = ctx.threshold {
        builder = builder.default_threshold(threshold);
    }
    Ok(builder.build())
}

/// Reads an image file into an enrollment input, taking the media type from
/// the file extension.
pub fn read_sample(path: &str) -> anyhow::Result<NewSample> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let media_type = MediaType::from_extension(ext)
        .ok_or_else(|| anyhow::anyhow!("{}: unsupported file type (png, jpg, webp)", path))?;
    let content = std::fs::read(path).with_context(|| format!("read {}", path))?;
    Ok(NewSample::new(content, media_type.as_str()))
}
