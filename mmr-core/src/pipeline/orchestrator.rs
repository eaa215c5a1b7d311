use serde::Serialize;
use snafu::{ResultExt, ensure};
use std::{
    marker::PhantomData,
    path::{Path, PathBuf},
    time::Instant,
};
use tracing::*;

use crate::{
    buffer::ImageBuffer,
    classify::{ClassificationResult, ClassifyConfig},
    descriptor::Descriptor,
    error::*,
    inference::{
        config::EngineConfig, engine::InferenceEngine, handle::EngineHandle, session::OnnxEngine,
    },
    pipeline::{
        job::{DescriptorMode, JobInput, PipelineJob},
        state::{PipelineError, PipelineState},
        timing::{DescriptorTiming, StageTimings},
    },
};

#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    pub image: PathBuf,
    pub image_size: [u32; 2],
    pub crop_size: [u32; 2],
    #[serde(skip)]
    pub descriptor: Descriptor,
    pub result: ClassificationResult,
    pub label: String,
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub model_name: String,
    pub model_version: u32,
    pub mode: DescriptorMode,
    pub timing: DescriptorTiming,
    pub stages: StageTimings,
    pub frames: Vec<FrameReport>,
}

/// Drives frames through load, engine init, crop, descriptor, classify and
/// dispose, in that order.
///
/// Every run that initializes an engine disposes it before returning,
/// whether the run succeeded or not.
pub struct PipelineOrchestrator<E: InferenceEngine = OnnxEngine> {
    state: PipelineState,
    history: Vec<PipelineState>,
    classify: ClassifyConfig,
    save_crops: Option<PathBuf>,
    _engine: PhantomData<fn() -> E>,
}

impl<E: InferenceEngine> Default for PipelineOrchestrator<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: InferenceEngine> PipelineOrchestrator<E> {
    pub fn new() -> Self {
        Self {
            state: PipelineState::Uninitialized,
            history: vec![PipelineState::Uninitialized],
            classify: ClassifyConfig::default(),
            save_crops: None,
            _engine: PhantomData,
        }
    }

    pub fn with_classify(mut self, classify: ClassifyConfig) -> Self {
        self.classify = classify;
        self
    }

    pub fn with_save_crops(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_crops = Some(dir.into());
        self
    }

    pub fn from_job(job: &PipelineJob) -> Self {
        let orchestrator = Self::new().with_classify(job.classify.clone());
        match &job.save_crops {
            Some(dir) => orchestrator.with_save_crops(dir),
            None => orchestrator,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// States reached by the last run, in order.
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    pub fn run(
        &mut self,
        config: &EngineConfig,
        input: &JobInput,
    ) -> Result<PipelineReport, PipelineError> {
        self.execute(config, std::slice::from_ref(input), DescriptorMode::Single)
    }

    /// Runs every input on one engine, one descriptor call per frame.
    pub fn run_all(
        &mut self,
        config: &EngineConfig,
        inputs: &[JobInput],
    ) -> Result<PipelineReport, PipelineError> {
        self.execute(config, inputs, DescriptorMode::Single)
    }

    /// Like [`run_all`](Self::run_all) with one batched descriptor call.
    /// Models without a batched path fail with `UnsupportedOperation`.
    pub fn run_batch(
        &mut self,
        config: &EngineConfig,
        inputs: &[JobInput],
    ) -> Result<PipelineReport, PipelineError> {
        self.execute(config, inputs, DescriptorMode::Batch)
    }

    pub fn run_job(&mut self, job: &PipelineJob) -> Result<PipelineReport, PipelineError> {
        self.execute(&job.engine, &job.inputs, job.mode)
    }

    fn enter(&mut self, state: PipelineState) {
        debug!("pipeline state -> {state}");
        self.state = state;
        self.history.push(state);
    }

    fn fail(&self, stage: PipelineState, source: MmrError) -> PipelineError {
        error!("{} failed: {}", stage.operation(), source);
        PipelineError {
            stage,
            reached: self.state,
            source,
        }
    }

    /// Moves to `next` when `result` is `Ok`.
    fn advance<T>(
        &mut self,
        next: PipelineState,
        result: Result<T, MmrError>,
    ) -> Result<T, PipelineError> {
        match result {
            Ok(value) => {
                self.enter(next);
                Ok(value)
            }
            Err(source) => Err(self.fail(next, source)),
        }
    }

    fn execute(
        &mut self,
        config: &EngineConfig,
        inputs: &[JobInput],
        mode: DescriptorMode,
    ) -> Result<PipelineReport, PipelineError> {
        self.state = PipelineState::Uninitialized;
        self.history = vec![PipelineState::Uninitialized];

        let images = load_images(inputs);
        let images = self.advance(PipelineState::ImageLoaded, images)?;

        let started = Instant::now();
        let handle = EngineHandle::<E>::initialize(config.clone());
        let init = started.elapsed();
        let mut handle = self.advance(PipelineState::EngineReady, handle)?;

        let outcome = self.engine_stages(&mut handle, inputs, &images, mode);

        let released = handle.dispose();
        if released.is_ok() {
            self.enter(PipelineState::Disposed);
        }
        let mut report = outcome?;
        released.map_err(|source| self.fail(PipelineState::Disposed, source))?;
        report.stages.init = init;

        info!(
            "{} frame(s) classified, {} descriptor(s) in {:?}",
            report.frames.len(),
            report.timing.descriptors(),
            report.timing.elapsed()
        );
        Ok(report)
    }

    fn engine_stages(
        &mut self,
        handle: &mut EngineHandle<E>,
        inputs: &[JobInput],
        images: &[ImageBuffer],
        mode: DescriptorMode,
    ) -> Result<PipelineReport, PipelineError> {
        let model_version = handle
            .model_version()
            .map_err(|source| self.fail(PipelineState::EngineReady, source))?;

        let specs = inputs
            .iter()
            .map(|input| input.crop.to_spec())
            .collect::<Result<Vec<_>, _>>();
        let specs = self.advance(PipelineState::CropSpecReady, specs)?;

        let mut stages = StageTimings::default();
        let started = Instant::now();
        let crops = images
            .iter()
            .zip(&specs)
            .map(|(image, spec)| handle.crop_image(image, spec))
            .collect::<Result<Vec<_>, _>>()
            .inspect(|_| stages.crop = started.elapsed())
            .and_then(|crops| {
                save_crops(self.save_crops.as_deref(), &crops)?;
                Ok(crops)
            });
        let crops = self.advance(PipelineState::Cropped, crops)?;

        let mut timing = DescriptorTiming::default();
        let descriptors = match mode {
            DescriptorMode::Single => crops
                .iter()
                .map(|crop| timing.time(1, || handle.compute_descriptor(crop)))
                .collect::<Result<Vec<_>, _>>(),
            DescriptorMode::Batch => {
                timing.time(crops.len(), || handle.compute_descriptor_batch(&crops))
            }
        };
        let descriptors = self.advance(PipelineState::DescriptorComputed, descriptors)?;
        match timing.throughput() {
            Some(rate) => info!("descriptors: {:?}, {:.1}/s", timing.elapsed(), rate),
            None => info!("descriptors: {:?}, throughput unavailable", timing.elapsed()),
        }

        let classify = self.classify.clone();
        let started = Instant::now();
        let results = descriptors
            .iter()
            .map(|descriptor| handle.classify_with(descriptor, &classify))
            .collect::<Result<Vec<_>, _>>();
        stages.classify = started.elapsed();
        let results = self.advance(PipelineState::Classified, results)?;

        let frames = inputs
            .iter()
            .zip(images)
            .zip(crops)
            .zip(descriptors)
            .zip(results)
            .map(|((((input, image), crop), descriptor), result)| FrameReport {
                image: input.image.path().to_path_buf(),
                image_size: [image.width(), image.height()],
                crop_size: [crop.width(), crop.height()],
                descriptor,
                label: result.label(),
                confidence: result.confidence(),
                result,
            })
            .collect();

        Ok(PipelineReport {
            model_name: handle.config().model_name.clone(),
            model_version,
            mode,
            timing,
            stages,
            frames,
        })
    }
}

fn load_images(inputs: &[JobInput]) -> Result<Vec<ImageBuffer>, MmrError> {
    ensure!(!inputs.is_empty(), JobEmptySnafu {});
    inputs.iter().map(|input| input.image.load()).collect()
}

fn save_crops(dir: Option<&Path>, crops: &[ImageBuffer]) -> Result<(), MmrError> {
    let Some(dir) = dir else {
        return Ok(());
    };
    std::fs::create_dir_all(dir).context(OutputDirSnafu {
        path: dir.display().to_string(),
    })?;
    for (index, crop) in crops.iter().enumerate() {
        crop.save(dir.join(format!("crop_{index:03}.png")))?;
    }
    info!("saved {} crop(s) to {}", crops.len(), dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buffer::ColorModel,
        consts::MODULE_PATH_ENV_NAME,
        crop::params::CropInput,
        error::ErrorKind,
        inference::{
            config::ComputeMode,
            testing::{FakeEngine, counts, fake_config},
        },
        pipeline::job::ImageSource,
    };

    use PipelineState::*;

    /// Writes a synthetic 800x600 frame and returns its path.
    fn frame_file(name: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let dir = std::env::temp_dir().join("mmr-orchestrator-test");
        std::fs::create_dir_all(&dir)?;
        let data = (0..600u32)
            .flat_map(|y| (0..800u32).flat_map(move |x| [(x % 256) as u8, (y % 256) as u8, 90]))
            .collect();
        let path = dir.join(format!("{name}.png"));
        ImageBuffer::from_raw(800, 600, ColorModel::Rgb, data)?.save(&path)?;
        Ok(path)
    }

    fn plate_input(image: PathBuf, col: f64, row: f64) -> JobInput {
        JobInput {
            image: ImageSource::File(image),
            crop: CropInput {
                cols: vec![col],
                rows: vec![row],
                aux_values: vec![80.0, 2.0],
            },
        }
    }

    #[test]
    fn test_run_reaches_classified() -> Result<(), Box<dyn std::error::Error>> {
        let input = plate_input(frame_file("run")?, 400.0, 350.0);
        let mut orchestrator = PipelineOrchestrator::<FakeEngine>::new();

        let report = orchestrator.run(&fake_config("orch-run"), &input)?;
        assert_eq!(report.frames.len(), 1);
        let frame = &report.frames[0];
        assert_eq!(frame.image_size, [800, 600]);
        assert_eq!(frame.crop_size, [224, 224]);
        assert!(!frame.label.is_empty());
        assert!((0.0..=1.0).contains(&frame.confidence.unwrap()));
        assert_eq!(report.timing.descriptors(), 1);

        assert_eq!(
            orchestrator.history(),
            &[
                Uninitialized,
                ImageLoaded,
                EngineReady,
                CropSpecReady,
                Cropped,
                DescriptorComputed,
                Classified,
                Disposed
            ]
        );
        assert_eq!(counts("orch-run").disposed, 1);
        Ok(())
    }

    #[test]
    fn test_malformed_crop_never_crops() -> Result<(), Box<dyn std::error::Error>> {
        let mut input = plate_input(frame_file("malformed")?, 400.0, 350.0);
        input.crop.cols.push(420.0);
        input.crop.rows.push(360.0);

        let mut orchestrator = PipelineOrchestrator::<FakeEngine>::new();
        let err = orchestrator
            .run(&fake_config("orch-malformed"), &input)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CropParams);
        assert_eq!((err.stage, err.reached), (CropSpecReady, EngineReady));
        assert!(!orchestrator.history().contains(&Cropped));
        assert_eq!(orchestrator.state(), Disposed);

        let counts = counts("orch-malformed");
        assert_eq!((counts.crops, counts.disposed), (0, 1));
        Ok(())
    }

    #[test]
    fn test_crop_failure_still_disposes() -> Result<(), Box<dyn std::error::Error>> {
        let input = plate_input(frame_file("outside")?, 900.0, 350.0);
        let mut orchestrator = PipelineOrchestrator::<FakeEngine>::new();
        let err = orchestrator
            .run(&fake_config("orch-outside"), &input)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidCropInput);
        assert_eq!(err.stage, Cropped);
        assert_eq!(orchestrator.state(), Disposed);
        assert_eq!(counts("orch-outside").disposed, 1);
        Ok(())
    }

    #[test]
    fn test_missing_image_skips_engine() {
        let input = plate_input("/nonexistent/car.jpg".into(), 400.0, 350.0);
        let mut orchestrator = PipelineOrchestrator::<FakeEngine>::new();
        let err = orchestrator
            .run(&fake_config("orch-no-image"), &input)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ImageLoad);
        assert_eq!(err.stage, ImageLoaded);
        assert_eq!(orchestrator.state(), Uninitialized);
        assert_eq!(counts("orch-no-image"), Default::default());
    }

    #[test]
    fn test_engine_init_failure_has_nothing_to_dispose() -> Result<(), Box<dyn std::error::Error>> {
        let input = plate_input(frame_file("no-engine")?, 400.0, 350.0);
        let mut config = fake_config("orch-no-engine");
        config.module_path = "/nonexistent/mmr/modules".into();

        let mut orchestrator = PipelineOrchestrator::<FakeEngine>::new();
        let err = orchestrator.run(&config, &input).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EngineInit);
        assert_eq!(err.stage, EngineReady);
        assert!(!orchestrator.history().contains(&Disposed));
        assert_eq!(counts("orch-no-engine").disposed, 0);
        Ok(())
    }

    #[test]
    fn test_empty_job_rejected() {
        let mut orchestrator = PipelineOrchestrator::<FakeEngine>::new();
        let err = orchestrator
            .run_all(&fake_config("orch-empty"), &[])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(counts("orch-empty").initialized, 0);
    }

    #[test]
    fn test_batch_unsupported_propagates() -> Result<(), Box<dyn std::error::Error>> {
        let input = plate_input(frame_file("unsupported")?, 400.0, 350.0);
        let mut orchestrator = PipelineOrchestrator::<FakeEngine>::new();
        let err = orchestrator
            .run_batch(&fake_config("orch-single"), &[input])
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
        assert_eq!(err.stage, DescriptorComputed);
        let counts = counts("orch-single");
        assert_eq!((counts.descriptors, counts.disposed), (0, 1));
        Ok(())
    }

    #[test]
    fn test_batch_matches_run_all() -> Result<(), Box<dyn std::error::Error>> {
        let image = frame_file("batch")?;
        let inputs = [
            plate_input(image.clone(), 400.0, 350.0),
            plate_input(image.clone(), 250.0, 300.0),
            JobInput {
                image: ImageSource::File(image),
                crop: CropInput {
                    cols: vec![100.0, 500.0],
                    rows: vec![80.0, 420.0],
                    aux_values: vec![],
                },
            },
        ];
        let config = fake_config("orch-batch");

        let single = PipelineOrchestrator::<FakeEngine>::new().run_all(&config, &inputs)?;
        let batched = PipelineOrchestrator::<FakeEngine>::new().run_batch(&config, &inputs)?;

        assert_eq!(batched.mode, DescriptorMode::Batch);
        assert_eq!(batched.timing.descriptors(), inputs.len());
        for (a, b) in single.frames.iter().zip(&batched.frames) {
            assert!(a.descriptor.max_abs_diff(&b.descriptor)? < 1e-6);
            assert_eq!(a.label, b.label);
        }

        let counts = counts("orch-batch");
        assert_eq!((counts.initialized, counts.disposed, counts.batches), (2, 2, 1));
        Ok(())
    }

    #[test]
    fn test_save_crops() -> Result<(), Box<dyn std::error::Error>> {
        let input = plate_input(frame_file("save")?, 400.0, 350.0);
        let dir = std::env::temp_dir().join("mmr-orchestrator-crops");
        let _ = std::fs::remove_dir_all(&dir);

        PipelineOrchestrator::<FakeEngine>::new()
            .with_save_crops(&dir)
            .run(&fake_config("orch-save"), &input)?;

        let saved = ImageBuffer::load(dir.join("crop_000.png"))?;
        assert_eq!(saved.dimensions(), (224, 224));
        Ok(())
    }

    #[test]
    fn test_report_json() -> Result<(), Box<dyn std::error::Error>> {
        let input = plate_input(frame_file("json")?, 400.0, 350.0);
        let report =
            PipelineOrchestrator::<FakeEngine>::new().run(&fake_config("orch-json"), &input)?;

        let json = serde_json::to_value(&report)?;
        assert_eq!(json["model_name"], "orch-json");
        assert_eq!(json["mode"], "single");
        assert!(json["frames"][0].get("descriptor").is_none());
        assert!(json["timing"]["descriptors"].is_u64());
        for stage in ["init_ms", "crop_ms", "classify_ms"] {
            assert!(json["stages"][stage].as_f64().is_some_and(|ms| ms >= 0.0));
        }
        Ok(())
    }

    /// Needs `MMR_MODULE_PATH` pointing at a module directory that holds the
    /// catalog model, its manifest and `car_cz.jpg`.
    #[test]
    #[ignore]
    fn test_car_cz_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
        let module_path = PathBuf::from(std::env::var(MODULE_PATH_ENV_NAME)?);
        let config = EngineConfig::new(&module_path, "MMR_VCMMCT_FAST_2024Q2.dat", ComputeMode::Cpu);
        let input = JobInput {
            image: ImageSource::File(module_path.join("car_cz.jpg")),
            crop: CropInput {
                cols: vec![475.0],
                rows: vec![573.0],
                aux_values: vec![257.7, 2.0],
            },
        };

        let mut orchestrator = PipelineOrchestrator::<OnnxEngine>::new();
        let report = orchestrator.run(&config, &input)?;
        let frame = &report.frames[0];
        assert!(!frame.label.is_empty());
        assert!((0.0..=1.0).contains(&frame.confidence.unwrap_or(-1.0)));
        assert!(orchestrator.history().contains(&Classified));
        assert_eq!(orchestrator.state(), Disposed);
        Ok(())
    }
}
