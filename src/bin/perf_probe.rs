use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use deepfry::{
    EffectParameters, ImageAsset, Preset,
    asset::is_supported_image,
    config::{self, AppConfig},
    export,
    processing::{gpu::GpuSurface, reference, render::RenderContext},
};
use rayon::prelude::*;

fn list_image_files(dir: &Path, limit: usize) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("read_dir failed for {}", dir.display()))?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_supported_image(p))
        .collect();
    files.sort();
    files.truncate(limit);
    Ok(files)
}

fn median_ms(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) * 0.5
    } else {
        sorted[mid]
    }
}

fn elapsed_ms(t0: Instant) -> f64 {
    t0.elapsed().as_secs_f64() * 1000.0
}

fn build_params() -> EffectParameters {
    let mut p = EffectParameters::default();
    Preset::Nuclear.overrides().apply_to(&mut p);
    p.bulge = 0.4;
    p.sharpness = 0.5;
    p
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args();
    let _bin = args.next();
    let dir = args
        .next()
        .map(PathBuf::from)
        .context("usage: perf_probe <image-dir> [count]")?;
    let count = args
        .next()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(20);

    let files = list_image_files(&dir, count)?;
    if files.is_empty() {
        anyhow::bail!("No images found in {}", dir.display());
    }
    eprintln!("Using {} images from {}", files.len(), dir.display());

    let decode_start = Instant::now();
    let decoded: Vec<(ImageAsset, f64)> = files
        .par_iter()
        .map(|path| -> Result<(ImageAsset, f64)> {
            let t0 = Instant::now();
            let asset = ImageAsset::open(path)
                .with_context(|| format!("decode failed for {}", path.display()))?;
            Ok((asset, elapsed_ms(t0)))
        })
        .collect::<Result<_>>()?;
    let decode_wall_s = decode_start.elapsed().as_secs_f64();
    let decode_samples: Vec<f64> = decoded.iter().map(|(_, ms)| *ms).collect();

    let adapter = config::resolve_adapter_preference(&AppConfig::load());
    let surface = GpuSurface::open(adapter).context("gpu surface unavailable")?;
    let mut context = RenderContext::open(&surface).context("effects program failed to build")?;
    let params = build_params();

    let mut upload_samples = Vec::with_capacity(decoded.len());
    let mut render_samples = Vec::with_capacity(decoded.len());
    let mut export_samples = Vec::with_capacity(decoded.len());
    let mut cpu_samples = Vec::with_capacity(decoded.len());
    let mut export_bytes = 0usize;
    for (asset, _) in &decoded {
        let t0 = Instant::now();
        context.upload(asset);
        upload_samples.push(elapsed_ms(t0));

        let t0 = Instant::now();
        context.render(&params, asset.display_size())?;
        render_samples.push(elapsed_ms(t0));

        let t0 = Instant::now();
        let bytes = export::export(&context, params.export_quality())?;
        export_samples.push(elapsed_ms(t0));
        export_bytes += bytes.len();

        let t0 = Instant::now();
        let _frame = reference::render(asset.bitmap(), &params, asset.display_size());
        cpu_samples.push(elapsed_ms(t0));
    }
    let ledger = surface.ledger().clone();
    context.close();

    let status = surface.status();
    println!("METRIC file_count={}", files.len());
    println!(
        "METRIC adapter={}",
        status.adapter_name.as_deref().unwrap_or("n/a")
    );
    println!("METRIC decode_wall_s={:.2}", decode_wall_s);
    println!("METRIC decode_ms_median={:.2}", median_ms(&decode_samples));
    println!("METRIC upload_ms_median={:.2}", median_ms(&upload_samples));
    println!("METRIC render_ms_median={:.2}", median_ms(&render_samples));
    println!("METRIC export_ms_median={:.2}", median_ms(&export_samples));
    println!("METRIC cpu_reference_ms_median={:.2}", median_ms(&cpu_samples));
    println!("METRIC export_bytes_total={}", export_bytes);
    println!("METRIC leaked_handles={}", ledger.counts().total());

    Ok(())
}
