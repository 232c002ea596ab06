use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context as _, bail};
use clap::Parser;
use deepfry::{
    EditorSession, EffectField, EffectParameters, SessionEvent, SessionOptions,
    config::{self, AppConfig},
    export,
};

const DECODE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Parser, Debug)]
#[command(name = "deepfry", version, about = "Deep-fry an image on the GPU")]
struct Cli {
    /// Image to fry.
    input: PathBuf,

    /// Directory the export is written to (default: config `export_dir`, then `.`).
    #[arg(short, long)]
    out_dir: Option<PathBuf>,

    /// Preset to apply first: classic, nuclear or glowingEyes.
    #[arg(short, long)]
    preset: Option<String>,

    /// Individual overrides applied after the preset, e.g. `--set bulge=0.4`.
    #[arg(long = "set", value_name = "FIELD=VALUE", value_parser = parse_assignment)]
    assignments: Vec<(EffectField, f32)>,

    /// JSON file with starting parameters.
    #[arg(long)]
    params: Option<PathBuf>,

    /// Write the final parameters to this JSON file.
    #[arg(long)]
    save_params: Option<PathBuf>,

    /// Export quality override (0-100); replaces the `compression` parameter.
    #[arg(short, long)]
    quality: Option<f32>,

    /// Persist `--out-dir` and `--preset` as the new defaults.
    #[arg(long)]
    remember: bool,
}

fn parse_assignment(raw: &str) -> Result<(EffectField, f32), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=VALUE, got `{raw}`"))?;
    let field = name.parse::<EffectField>().map_err(|err| err.to_string())?;
    let value = value
        .trim()
        .parse::<f32>()
        .map_err(|err| format!("{field}: {err}"))?;
    Ok((field, value))
}

fn starting_params(cli: &Cli) -> anyhow::Result<EffectParameters> {
    let Some(path) = &cli.params else {
        return Ok(EffectParameters::default());
    };
    EffectParameters::load(path)
        .with_context(|| format!("could not read parameters from {}", path.display()))
}

fn resolve_out_dir(cli: &Cli, config: &AppConfig) -> PathBuf {
    cli.out_dir
        .clone()
        .or_else(|| config.export_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."))
}

fn apply_edits(session: &mut EditorSession, cli: &Cli, config: &AppConfig) -> anyhow::Result<()> {
    if let Some(preset) = cli.preset.as_deref().or(config.default_preset.as_deref()) {
        session.apply_preset(preset)?;
    }
    for &(field, value) in &cli.assignments {
        session.set(field, value)?;
    }
    if let Some(quality) = cli.quality.or(config.default_quality) {
        session.set(EffectField::Compression, quality)?;
    }
    session
        .params()
        .validate()
        .context("parameters out of range")?;
    Ok(())
}

fn remember_defaults(cli: &Cli, mut config: AppConfig) {
    if let Some(dir) = &cli.out_dir {
        config.export_dir = Some(dir.clone());
    }
    if let Some(preset) = &cli.preset {
        config.default_preset = Some(preset.clone());
    }
    config.save();
}

fn run(cli: &Cli) -> anyhow::Result<PathBuf> {
    let config = AppConfig::load();
    let adapter = config::resolve_adapter_preference(&config);

    let mut session = EditorSession::new(SessionOptions {
        adapter,
        initial: starting_params(cli)?,
    });
    apply_edits(&mut session, cli, &config)?;

    session.request_asset(&cli.input);
    match session.wait_for_asset(DECODE_TIMEOUT) {
        Some(SessionEvent::Loaded {
            source_name,
            display_size,
        }) => {
            tracing::info!(
                source = %source_name,
                width = display_size.0,
                height = display_size.1,
                "rendered"
            );
        }
        Some(SessionEvent::DecodeFailed(err)) | Some(SessionEvent::RenderFailed(err)) => {
            return Err(err).with_context(|| format!("could not fry {}", cli.input.display()));
        }
        None => bail!("timed out decoding {}", cli.input.display()),
    }
    if let Some(status) = session.gpu_status() {
        tracing::debug!(
            adapter = status.adapter_name.as_deref().unwrap_or("n/a"),
            backend = status.adapter_backend.as_deref().unwrap_or("n/a"),
            "gpu in use"
        );
    }

    let bytes = session.export()?;
    let out_dir = resolve_out_dir(cli, &config);
    let path = export::write_export(&out_dir, &bytes)
        .with_context(|| format!("could not write export into {}", out_dir.display()))?;

    if let Some(params_path) = &cli.save_params {
        session
            .params()
            .save(params_path)
            .with_context(|| format!("could not save parameters to {}", params_path.display()))?;
    }
    if cli.remember {
        remember_defaults(cli, config);
    }
    session.close();
    Ok(path)
}

fn report(path: &Path) {
    println!("{}", path.display());
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let path = run(&cli)?;
    report(&path);
    Ok(())
}
