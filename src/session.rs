use std::{
    path::PathBuf,
    sync::mpsc,
    time::{Duration, Instant},
};

use crate::{
    asset::ImageAsset,
    error::{DeepFryError, InitError, Result},
    export,
    params::{EffectField, EffectOverrides, EffectParameters, ParameterStore},
    presets,
    processing::{
        gpu::{AdapterPreference, GpuSurface, ResourceLedger, RuntimeStatus},
        render::RenderContext,
    },
};

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions {
    pub adapter: AdapterPreference,
    pub initial: EffectParameters,
}

/// Outcome of a background decode, reported by [`EditorSession::poll`].
#[derive(Debug)]
pub enum SessionEvent {
    /// Asset decoded, uploaded and rendered once.
    Loaded {
        source_name: String,
        display_size: (u32, u32),
    },
    /// Decode failed; the previous asset and frame are untouched.
    DecodeFailed(DeepFryError),
    /// Decode succeeded but the GPU could not take the asset.
    RenderFailed(DeepFryError),
}

struct Decoded {
    generation: u64,
    result: Result<ImageAsset>,
}

struct GpuState {
    // Field order matters: the context must go before its surface.
    context: RenderContext,
    surface: GpuSurface,
}

/// One editing session: the parameter store, the current asset and the GPU
/// resources that render it.
///
/// GPU resources are opened with the first asset. A fatal init failure puts
/// the session in a degraded state where every GPU operation reports the
/// same [`InitError`].
pub struct EditorSession {
    options: SessionOptions,
    store: ParameterStore,
    asset: Option<ImageAsset>,
    gpu: Option<GpuState>,
    degraded: Option<InitError>,
    generation: u64,
    pending: bool,
    tx: mpsc::SyncSender<Decoded>,
    rx: mpsc::Receiver<Decoded>,
}

impl EditorSession {
    pub fn new(options: SessionOptions) -> Self {
        let (tx, rx) = mpsc::sync_channel(8);
        Self {
            options,
            store: ParameterStore::new(options.initial),
            asset: None,
            gpu: None,
            degraded: None,
            generation: 0,
            pending: false,
            tx,
            rx,
        }
    }

    pub fn params(&self) -> &EffectParameters {
        self.store.params()
    }

    pub fn asset(&self) -> Option<&ImageAsset> {
        self.asset.as_ref()
    }

    pub fn degraded(&self) -> Option<&InitError> {
        self.degraded.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.pending
    }

    pub fn gpu_status(&self) -> Option<&RuntimeStatus> {
        self.gpu.as_ref().map(|gpu| gpu.surface.status())
    }

    /// Ledger of the open surface, if any.
    pub fn ledger(&self) -> Option<ResourceLedger> {
        self.gpu.as_ref().map(|gpu| gpu.surface.ledger().clone())
    }

    /// Starts decoding `path` in the background. Any decode still in flight
    /// becomes stale and its result is dropped when it arrives.
    pub fn request_asset(&mut self, path: impl Into<PathBuf>) -> u64 {
        let path = path.into();
        self.generation += 1;
        self.pending = true;
        let generation = self.generation;
        tracing::debug!(path = %path.display(), generation, "asset requested");

        let tx = self.tx.clone();
        std::thread::spawn(move || {
            let started = Instant::now();
            let result = ImageAsset::open(&path);
            tracing::debug!(
                path = %path.display(),
                generation,
                ok = result.is_ok(),
                elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
                "decode finished"
            );
            let _ = tx.send(Decoded { generation, result });
        });
        generation
    }

    /// Drains finished decodes without blocking.
    pub fn poll(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(decoded) = self.rx.try_recv() {
            if let Some(event) = self.handle_decoded(decoded) {
                events.push(event);
            }
        }
        events
    }

    /// Blocks until the latest requested decode is handled, or `timeout` passes.
    pub fn wait_for_asset(&mut self, timeout: Duration) -> Option<SessionEvent> {
        let deadline = Instant::now() + timeout;
        while self.pending {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(decoded) => {
                    if let Some(event) = self.handle_decoded(decoded) {
                        return Some(event);
                    }
                }
                Err(_) => return None,
            }
        }
        None
    }

    fn handle_decoded(&mut self, decoded: Decoded) -> Option<SessionEvent> {
        if decoded.generation != self.generation {
            tracing::debug!(
                generation = decoded.generation,
                current = self.generation,
                "stale decode discarded"
            );
            return None;
        }
        self.pending = false;
        match decoded.result {
            Ok(asset) => {
                let source_name = asset.source_name().to_string();
                let display_size = asset.display_size();
                match self.install_asset(asset) {
                    Ok(()) => Some(SessionEvent::Loaded {
                        source_name,
                        display_size,
                    }),
                    Err(err) => Some(SessionEvent::RenderFailed(err)),
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "asset decode failed");
                Some(SessionEvent::DecodeFailed(err))
            }
        }
    }

    /// Uploads `asset` and renders it once. Decodes still in flight become stale.
    pub fn set_asset(&mut self, asset: ImageAsset) -> Result<()> {
        self.generation += 1;
        self.pending = false;
        self.install_asset(asset)
    }

    fn install_asset(&mut self, asset: ImageAsset) -> Result<()> {
        let gpu = self.ensure_gpu()?;
        gpu.context.upload(&asset);
        tracing::info!(
            source = asset.source_name(),
            width = asset.width(),
            height = asset.height(),
            display_width = asset.display_size().0,
            display_height = asset.display_size().1,
            "asset loaded"
        );
        self.asset = Some(asset);
        self.render()
    }

    pub fn set(&mut self, field: EffectField, value: f32) -> Result<()> {
        self.store.set(field, value);
        self.parameters_changed()
    }

    pub fn merge(&mut self, overrides: &EffectOverrides) -> Result<()> {
        self.store.merge(overrides);
        self.parameters_changed()
    }

    pub fn replace_params(&mut self, params: EffectParameters) -> Result<()> {
        self.store.replace(params);
        self.parameters_changed()
    }

    /// Returns every parameter to its neutral default.
    pub fn reset_params(&mut self) -> Result<()> {
        self.store.reset();
        self.parameters_changed()
    }

    /// Merges the named preset; an unknown name changes nothing.
    pub fn apply_preset(&mut self, name: &str) -> Result<EffectOverrides> {
        let overrides = presets::apply(&mut self.store, name)?;
        self.parameters_changed()?;
        Ok(overrides)
    }

    fn parameters_changed(&mut self) -> Result<()> {
        if self.asset.is_none() {
            return Ok(());
        }
        self.render()
    }

    /// Renders the current asset with the current parameters.
    pub fn render(&mut self) -> Result<()> {
        if let Some(err) = &self.degraded {
            return Err(err.clone().into());
        }
        let Some(asset) = self.asset.clone() else {
            return Err(DeepFryError::NoAsset);
        };
        let params = *self.store.params();
        let reopened = self.gpu.is_none();
        let gpu = self.ensure_gpu()?;
        if reopened {
            gpu.context.upload(&asset);
        }
        gpu.context.render(&params, asset.display_size())
    }

    /// Encodes the last rendered frame at the quality the store's `compression` implies.
    pub fn export(&self) -> Result<Vec<u8>> {
        if let Some(err) = &self.degraded {
            return Err(err.clone().into());
        }
        let Some(gpu) = &self.gpu else {
            return Err(DeepFryError::NoRenderedFrame);
        };
        export::export(&gpu.context, self.store.params().export_quality())
    }

    /// Releases every GPU resource. The parameters and asset are kept, and
    /// the next asset or render reopens the GPU.
    pub fn close(&mut self) {
        self.generation += 1;
        self.pending = false;
        if let Some(GpuState { context, surface }) = self.gpu.take() {
            context.close();
            drop(surface);
            tracing::debug!("session gpu resources released");
        }
    }

    fn ensure_gpu(&mut self) -> Result<&mut GpuState> {
        if let Some(err) = &self.degraded {
            return Err(err.clone().into());
        }
        if self.gpu.is_none() {
            let opened = GpuSurface::open(self.options.adapter).and_then(|surface| {
                let context = RenderContext::open(&surface)?;
                Ok(GpuState { context, surface })
            });
            match opened {
                Ok(state) => self.gpu = Some(state),
                Err(err) => {
                    tracing::error!(error = %err, "gpu initialization failed, session degraded");
                    self.degraded = Some(err.clone());
                    return Err(err.into());
                }
            }
        }
        self.gpu
            .as_mut()
            .ok_or_else(|| DeepFryError::RenderAborted("gpu state missing".to_string()))
    }
}

impl Drop for EditorSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};

    use crate::processing::gpu::is_available;

    use super::*;

    const WAIT: Duration = Duration::from_secs(30);

    fn write_png(dir: &std::path::Path, name: &str, width: u32, height: u32) -> PathBuf {
        let img = DynamicImage::ImageRgba8(ImageBuffer::from_fn(width, height, |x, y| {
            Rgba([(x * 5 % 256) as u8, (y * 9 % 256) as u8, 90, 255])
        }));
        let mut bytes = Cursor::new(Vec::new());
        img.write_to(&mut bytes, ImageFormat::Png).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, bytes.into_inner()).unwrap();
        path
    }

    #[test]
    fn export_before_any_render_is_an_error() {
        let session = EditorSession::new(SessionOptions::default());
        assert!(matches!(session.export(), Err(DeepFryError::NoRenderedFrame)));
    }

    #[test]
    fn render_without_asset_is_an_error() {
        let mut session = EditorSession::new(SessionOptions::default());
        assert!(matches!(session.render(), Err(DeepFryError::NoAsset)));
    }

    #[test]
    fn parameter_edits_without_asset_only_touch_the_store() {
        let mut session = EditorSession::new(SessionOptions::default());
        session.set(EffectField::Bulge, 0.5).unwrap();
        session.apply_preset("nuclear").unwrap();
        assert_eq!(session.params().bulge, 0.5);
        assert_eq!(session.params().pixelation, 8.0);
        assert!(session.ledger().is_none());
    }

    #[test]
    fn unknown_preset_leaves_store_untouched() {
        let mut session = EditorSession::new(SessionOptions::default());
        let err = session.apply_preset("Classic").unwrap_err();
        assert!(matches!(err, DeepFryError::PresetNotFound(_)));
        assert_eq!(*session.params(), EffectParameters::default());
    }

    #[test]
    fn initial_parameters_come_from_options() {
        let mut initial = EffectParameters::default();
        initial.noise = 0.25;
        let session = EditorSession::new(SessionOptions {
            initial,
            ..SessionOptions::default()
        });
        assert_eq!(session.params().noise, 0.25);
    }

    #[test]
    fn failed_decode_is_reported_and_keeps_state() {
        let mut session = EditorSession::new(SessionOptions::default());
        session.request_asset("/nonexistent/dir/photo.png");
        assert!(session.is_loading());
        match session.wait_for_asset(WAIT) {
            Some(SessionEvent::DecodeFailed(DeepFryError::AssetDecode { source_name, .. })) => {
                assert_eq!(source_name, "photo.png");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(!session.is_loading());
        assert!(session.asset().is_none());
    }

    #[test]
    fn only_the_latest_request_is_reported() {
        let mut session = EditorSession::new(SessionOptions::default());
        session.request_asset("/nonexistent/first.png");
        let latest = session.request_asset("/nonexistent/second.png");
        assert_eq!(latest, 2);
        match session.wait_for_asset(WAIT) {
            Some(SessionEvent::DecodeFailed(DeepFryError::AssetDecode { source_name, .. })) => {
                assert_eq!(source_name, "second.png");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        std::thread::sleep(Duration::from_millis(50));
        assert!(session.poll().is_empty());
    }

    #[test]
    fn replace_and_reset_params_without_asset() {
        let mut session = EditorSession::new(SessionOptions::default());
        let mut params = EffectParameters::default();
        params.glow_intensity = 0.8;
        params.posterize = 4.0;
        session.replace_params(params).unwrap();
        assert_eq!(*session.params(), params);

        session.reset_params().unwrap();
        assert_eq!(*session.params(), EffectParameters::default());
    }

    fn exported_size(session: &EditorSession) -> (u32, u32) {
        let bytes = session.export().unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        (decoded.width(), decoded.height())
    }

    #[test]
    fn direct_upload_supersedes_pending_decode() {
        if !is_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let older = write_png(dir.path(), "older.png", 64, 48);

        let mut session = EditorSession::new(SessionOptions::default());
        session.request_asset(&older);
        let newer = ImageAsset::from_image(
            "newer.png",
            DynamicImage::ImageRgba8(ImageBuffer::from_pixel(40, 30, Rgba([9, 8, 7, 255]))),
        )
        .unwrap();
        session.set_asset(newer).unwrap();
        assert!(!session.is_loading());

        std::thread::sleep(Duration::from_millis(500));
        assert!(session.poll().is_empty());
        assert_eq!(session.asset().map(|a| a.source_name()), Some("newer.png"));
        assert_eq!(exported_size(&session), (40, 30));
    }

    #[test]
    fn stale_successful_decode_is_discarded() {
        if !is_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let older = write_png(dir.path(), "older.png", 64, 48);
        let newer = write_png(dir.path(), "newer.png", 40, 30);

        let mut session = EditorSession::new(SessionOptions::default());
        session.request_asset(&older);
        session.request_asset(&newer);
        match session.wait_for_asset(WAIT) {
            Some(SessionEvent::Loaded { source_name, .. }) => assert_eq!(source_name, "newer.png"),
            other => panic!("unexpected event: {other:?}"),
        }

        std::thread::sleep(Duration::from_millis(500));
        assert!(session.poll().is_empty());
        assert_eq!(session.asset().map(|a| a.source_name()), Some("newer.png"));
        assert_eq!(exported_size(&session), (40, 30));
    }

    #[test]
    fn loaded_asset_renders_and_exports() {
        if !is_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "wide.png", 1500, 1000);

        let mut session = EditorSession::new(SessionOptions::default());
        session.request_asset(&path);
        match session.wait_for_asset(WAIT) {
            Some(SessionEvent::Loaded {
                source_name,
                display_size,
            }) => {
                assert_eq!(source_name, "wide.png");
                assert_eq!(display_size, (1024, 682));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        session.apply_preset("classic").unwrap();
        let bytes = session.export().unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1024, 682));
    }

    #[test]
    fn decode_failure_keeps_previous_asset() {
        if !is_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let good = write_png(dir.path(), "good.png", 64, 48);
        let bad = dir.path().join("bad.png");
        std::fs::write(&bad, b"not a png").unwrap();

        let mut session = EditorSession::new(SessionOptions::default());
        session.request_asset(&good);
        assert!(matches!(
            session.wait_for_asset(WAIT),
            Some(SessionEvent::Loaded { .. })
        ));
        let before = session.export().unwrap();

        session.request_asset(&bad);
        assert!(matches!(
            session.wait_for_asset(WAIT),
            Some(SessionEvent::DecodeFailed(_))
        ));
        assert_eq!(session.asset().map(|a| a.source_name()), Some("good.png"));
        assert_eq!(session.export().unwrap(), before);
    }

    #[test]
    fn close_releases_gpu_resources() {
        if !is_available() {
            return;
        }
        let mut session = EditorSession::new(SessionOptions::default());
        let asset = ImageAsset::from_image(
            "flat.png",
            DynamicImage::ImageRgba8(ImageBuffer::from_pixel(8, 8, Rgba([1, 2, 3, 255]))),
        )
        .unwrap();
        session.set_asset(asset).unwrap();
        let ledger = session.ledger().unwrap();
        assert!(ledger.counts().total() > 0);

        session.close();
        assert_eq!(ledger.counts().total(), 0);
        assert!(matches!(session.export(), Err(DeepFryError::NoRenderedFrame)));

        session.render().unwrap();
        assert!(session.export().is_ok());
    }
}
