//! Asynchronous detection pipeline with two frames of latency.
//!
//! For input frame N the scheduler immediately queues channel extraction,
//! dispatches the cascade for frame N−1 (whose channels just became
//! available) onto a worker, and delivers the completed result for frame
//! N−2 together with the texture that produced it. In steady state three
//! frames are active: N in the channel stage, N−1 on the CPU, N−2 being
//! consumed. Transitions are driven by the arrival of the next frame, not
//! by timers.
//!
//! Frame states: `Received → GpuQueued → GpuRetrieved → CpuRunning →
//! Delivered`. A per-frame duty-cycle flag can skip the cascade while still
//! producing channels; skipped frames report the most recent completed
//! detections. Worker failures are captured and re-raised on the next
//! delivery. Dropping the pipeline blocks once on the in-flight worker and
//! discards its result.
use crate::detector::{choose_best, Detector};
use crate::error::{DetectorError, Result};
use crate::gpu::{ChannelProvider, CpuChannels, FrameInput, GpuChannels, TextureId};
use crate::image::RgbU8;
use crate::types::Detection;
use log::debug;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// Result delivered to the consumer, paired with its source texture.
#[derive(Clone, Debug)]
pub struct PipelineOutput {
    pub texture: TextureId,
    pub frame_index: u64,
    pub detections: Vec<Detection>,
}

type WorkerPayload = Result<(Vec<Detection>, f64)>;

enum TaskHandle<T> {
    #[cfg(feature = "parallel")]
    Pending(std::sync::mpsc::Receiver<std::thread::Result<T>>),
    #[cfg(not(feature = "parallel"))]
    Ready(Option<std::thread::Result<T>>),
}

fn spawn_task<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> TaskHandle<T> {
    #[cfg(feature = "parallel")]
    {
        let (tx, rx) = std::sync::mpsc::channel();
        rayon::spawn(move || {
            let _ = tx.send(catch_unwind(AssertUnwindSafe(f)));
        });
        TaskHandle::Pending(rx)
    }
    #[cfg(not(feature = "parallel"))]
    TaskHandle::Ready(Some(catch_unwind(AssertUnwindSafe(f))))
}

impl<T> TaskHandle<T> {
    /// Block until the worker finishes; panics become worker errors.
    fn join(self) -> Result<T> {
        let outcome = match self {
            #[cfg(feature = "parallel")]
            TaskHandle::Pending(rx) => rx
                .recv()
                .map_err(|_| DetectorError::worker("worker exited without a result"))?,
            #[cfg(not(feature = "parallel"))]
            TaskHandle::Ready(slot) => slot.expect("task joined twice"),
        };
        outcome.map_err(|payload| {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "worker panicked".to_string());
            DetectorError::worker(msg)
        })
    }
}

/// An in-flight cascade evaluation (frame in the `CpuRunning` state).
struct InflightFrame {
    frame_index: u64,
    texture: TextureId,
    ran_detection: bool,
    task: TaskHandle<WorkerPayload>,
}

#[derive(Default)]
struct Timings {
    read_ms: f64,
    detect_ms: f64,
    complete_ms: f64,
}

pub struct DetectionPipeline {
    provider: Box<dyn ChannelProvider>,
    detector: Arc<Detector>,
    input_size: (usize, usize),
    detection_size: (usize, usize),
    /// Detections are produced at detection resolution and scaled back up.
    scale: f64,
    single_object: bool,
    /// Duty flag of the frame currently in the channel stage.
    queued_detection: bool,
    inflight: Option<InflightFrame>,
    last_detections: Vec<Detection>,
    frame_index: u64,
    timings: Timings,
}

impl DetectionPipeline {
    /// Create a pipeline for a fixed input size.
    ///
    /// `min_object_width` (source pixels) selects the detection resolution:
    /// the input is downscaled so the model window corresponds to objects of
    /// at least that width. `use_gpu` selects the tiled channel stage.
    pub fn new(
        detector: Arc<Detector>,
        input_size: (usize, usize),
        min_object_width: usize,
        use_gpu: bool,
    ) -> Result<Self> {
        if input_size.0 == 0 || input_size.1 == 0 {
            return Err(DetectorError::config("pipeline input size must be non-empty"));
        }
        let (model_w, _) = detector.window_size();
        let detection_width = if min_object_width > 0 {
            (input_size.0 * model_w / min_object_width).max(model_w)
        } else {
            input_size.0
        };
        let scale = input_size.0 as f64 / detection_width as f64;
        let detection_size = (
            (input_size.0 as f64 / scale).round() as usize,
            (input_size.1 as f64 / scale).round() as usize,
        );

        let provider: Box<dyn ChannelProvider> = if use_gpu {
            Box::new(GpuChannels::new(&detector, detection_size)?)
        } else {
            Box::new(CpuChannels::new(detector.clone(), detection_size))
        };
        debug!(
            "pipeline: input {}x{}, detection {}x{}, scale {scale:.3}",
            input_size.0, input_size.1, detection_size.0, detection_size.1
        );

        Ok(Self {
            provider,
            detector,
            input_size,
            detection_size,
            scale,
            single_object: false,
            queued_detection: true,
            inflight: None,
            last_detections: Vec::new(),
            frame_index: 0,
            timings: Timings::default(),
        })
    }

    /// Keep only the best-scoring detection per frame.
    pub fn set_single_object(&mut self, flag: bool) {
        self.single_object = flag;
    }

    pub fn detection_size(&self) -> (usize, usize) {
        self.detection_size
    }

    /// Feed one frame; returns the completed result for frame N−2 once the
    /// pipeline has warmed up.
    ///
    /// `do_detection` is the duty-cycle flag: when false the channel stage
    /// still runs, but the cascade is skipped for this frame and the most
    /// recent detections are reported in its place.
    pub fn process(
        &mut self,
        frame: &FrameInput<'_>,
        do_detection: bool,
    ) -> Result<Option<PipelineOutput>> {
        let started = Instant::now();
        if frame.size() != self.input_size {
            return Err(DetectorError::input(format!(
                "frame size {:?} does not match pipeline size {:?}",
                frame.size(),
                self.input_size
            )));
        }

        // Channels for frame N−1 become available now: GpuQueued → GpuRetrieved.
        let read_start = Instant::now();
        let retrieved = self.provider.retrieve()?;
        self.timings.read_ms += read_start.elapsed().as_secs_f64() * 1000.0;

        // Queue the channel stage for frame N: Received → GpuQueued.
        let scaled;
        let detection_frame = if self.detection_size != self.input_size {
            match frame {
                FrameInput::Buffer(view) => {
                    scaled = resize_rgb8(view, self.detection_size);
                    FrameInput::Buffer(scaled.as_view())
                }
                FrameInput::Texture { .. } => {
                    return Err(DetectorError::input(
                        "texture input cannot be rescaled; set min_object_width to 0",
                    ))
                }
            }
        } else {
            frame.clone()
        };
        let texture = self.provider.enqueue(&detection_frame)?;
        let this_frame = self.frame_index;
        self.frame_index += 1;
        debug!("frame {this_frame}: queued (texture {texture})");

        // Deliver frame N−2: CpuRunning → Delivered.
        let delivery = match self.inflight.take() {
            Some(frame) => Some(self.deliver(frame)?),
            None => None,
        };

        // Dispatch the cascade for frame N−1: GpuRetrieved → CpuRunning.
        if let Some((prev_texture, pyramid)) = retrieved {
            let prev_index = this_frame - 1;
            let ran = self.queued_detection;
            let detector = self.detector.clone();
            let scale = self.scale;
            let single = self.single_object;
            let reuse = self.last_detections.clone();
            let task = spawn_task(move || -> WorkerPayload {
                let t0 = Instant::now();
                let mut dets = if ran {
                    let mut dets = pyramid.detect(&detector);
                    for d in &mut dets {
                        d.x = (d.x as f64 * scale) as f32;
                        d.y = (d.y as f64 * scale) as f32;
                        d.w = (d.w as f64 * scale) as f32;
                        d.h = (d.h as f64 * scale) as f32;
                    }
                    dets
                } else {
                    reuse
                };
                if single {
                    choose_best(&mut dets);
                }
                Ok((dets, t0.elapsed().as_secs_f64() * 1000.0))
            });
            self.inflight = Some(InflightFrame {
                frame_index: prev_index,
                texture: prev_texture,
                ran_detection: ran,
                task,
            });
            debug!("frame {prev_index}: cascade dispatched");
        }
        self.queued_detection = do_detection;

        self.timings.complete_ms += started.elapsed().as_secs_f64() * 1000.0;
        Ok(delivery)
    }

    fn deliver(&mut self, frame: InflightFrame) -> Result<PipelineOutput> {
        let (detections, detect_ms) = frame.task.join()??;
        self.timings.detect_ms += detect_ms;
        if frame.ran_detection {
            self.last_detections = detections.clone();
        }
        debug!(
            "frame {}: delivered with {} detections",
            frame.frame_index,
            detections.len()
        );
        Ok(PipelineOutput {
            texture: frame.texture,
            frame_index: frame.frame_index,
            detections,
        })
    }

    /// Drain the pipeline: deliver the in-flight CPU frame, then run the
    /// cascade synchronously for the frame still in the channel stage.
    pub fn flush(&mut self) -> Result<Vec<PipelineOutput>> {
        let mut out = Vec::new();
        if let Some(frame) = self.inflight.take() {
            out.push(self.deliver(frame)?);
        }
        if let Some((texture, pyramid)) = self.provider.retrieve()? {
            let frame_index = self.frame_index.saturating_sub(1);
            let mut detections = if self.queued_detection {
                let mut dets = pyramid.detect(&self.detector);
                for d in &mut dets {
                    d.x = (d.x as f64 * self.scale) as f32;
                    d.y = (d.y as f64 * self.scale) as f32;
                    d.w = (d.w as f64 * self.scale) as f32;
                    d.h = (d.h as f64 * self.scale) as f32;
                }
                dets
            } else {
                self.last_detections.clone()
            };
            if self.single_object {
                choose_best(&mut detections);
            }
            out.push(PipelineOutput {
                texture,
                frame_index,
                detections,
            });
        }
        Ok(out)
    }

    /// Accumulated stage timings in milliseconds.
    pub fn summary(&self) -> HashMap<String, f64> {
        HashMap::from([
            ("read".to_string(), self.timings.read_ms),
            ("detect".to_string(), self.timings.detect_ms),
            ("complete".to_string(), self.timings.complete_ms),
        ])
    }
}

impl Drop for DetectionPipeline {
    fn drop(&mut self) {
        // Block once on the outstanding worker and discard its result; an
        // in-flight failure must not propagate out of the destructor.
        if let Some(frame) = self.inflight.take() {
            let _ = frame.task.join();
        }
    }
}

/// Bilinear resize of an interleaved RGB view.
fn resize_rgb8(view: &RgbU8<'_>, size: (usize, usize)) -> crate::image::io::ColorImageU8 {
    use crate::channels::color::planar_from_rgb8;
    use crate::channels::resample::resample_planar;

    let planar = planar_from_rgb8(view);
    let resized = resample_planar(&planar, size.0, size.1, 1.0);
    let mut data = vec![0u8; size.0 * size.1 * 3];
    for y in 0..size.1 {
        for x in 0..size.0 {
            for c in 0..3 {
                let v = (resized.get(c, x, y) * 255.0).clamp(0.0, 255.0).round() as u8;
                data[(y * size.0 + x) * 3 + c] = v;
            }
        }
    }
    crate::image::io::ColorImageU8::new(size.0, size.1, data)
}
