#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use camera_effects::{
    CpuPixelBuffer, DisplaySurface, EffectConfig, EffectEngine, EffectProcessor, Error, Frame,
    LoadCompletion, Pipeline, PixelFormat, ProcessCompletion, Size, TimedSample, Timestamp,
};

pub const SIZE: Size = Size {
    width: 8,
    height: 4,
};

/// Byte value of every pixel in a frame produced by [`ScriptedEngine`].
pub const PROCESSED_FILL: u8 = 0xEE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    Succeed,
    Fail,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessMode {
    /// Complete on the submitting thread with a recoloured copy.
    Inline,
    /// Keep the completion until [`ScriptedEngine::release_frames`].
    Hold,
    Fail,
    /// Drop the completion without calling it.
    Forget,
}

struct Script {
    accept_init: AtomicBool,
    load: Mutex<LoadMode>,
    process: Mutex<ProcessMode>,
    held_frames: Mutex<Vec<(Frame, ProcessCompletion)>>,
    held_loads: Mutex<Vec<LoadCompletion>>,
    unloads: AtomicUsize,
    method_calls: Mutex<Vec<(String, String)>>,
    surface_sizes: Mutex<Vec<Size>>,
}

/// An effect engine whose behaviour is set by the test.
#[derive(Clone)]
pub struct ScriptedEngine {
    script: Arc<Script>,
    created: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    pub fn new(process: ProcessMode) -> Self {
        ScriptedEngine {
            script: Arc::new(Script {
                accept_init: AtomicBool::new(true),
                load: Mutex::new(LoadMode::Succeed),
                process: Mutex::new(process),
                held_frames: Mutex::new(Vec::new()),
                held_loads: Mutex::new(Vec::new()),
                unloads: AtomicUsize::new(0),
                method_calls: Mutex::new(Vec::new()),
                surface_sizes: Mutex::new(Vec::new()),
            }),
            created: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn reject_init(&self, reject: bool) {
        self.script.accept_init.store(!reject, Ordering::SeqCst);
    }

    pub fn set_load(&self, mode: LoadMode) {
        *self.script.load.lock().unwrap() = mode;
    }

    pub fn set_process(&self, mode: ProcessMode) {
        *self.script.process.lock().unwrap() = mode;
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn unloads(&self) -> usize {
        self.script.unloads.load(Ordering::SeqCst)
    }

    pub fn held_frames(&self) -> usize {
        self.script.held_frames.lock().unwrap().len()
    }

    /// Sizes passed to `surface_changed`, in order.
    pub fn surface_sizes(&self) -> Vec<Size> {
        self.script.surface_sizes.lock().unwrap().clone()
    }

    pub fn method_calls(&self) -> Vec<(String, String)> {
        self.script.method_calls.lock().unwrap().clone()
    }

    /// Complete every held frame successfully.
    pub fn release_frames(&self) {
        let held: Vec<_> = self.script.held_frames.lock().unwrap().drain(..).collect();
        for (frame, completion) in held {
            completion(Ok(recolour(&frame)));
        }
    }

    /// Complete every held load with `result`.
    pub fn release_loads(&self, succeed: bool) {
        let held: Vec<_> = self.script.held_loads.lock().unwrap().drain(..).collect();
        for completion in held {
            completion(if succeed {
                Ok(())
            } else {
                Err(Error::EffectLoadFailed("held".into()))
            });
        }
    }

    pub fn pipeline(&self, surface: RecordingSurface) -> Pipeline<RecordingSurface> {
        let config = EffectConfig {
            credential: "test-credential".into(),
            effect_path: "effects/test_BG".into(),
            render_size: SIZE,
            ..EffectConfig::default()
        };
        Pipeline::new(Arc::new(self.clone()), config, surface)
    }
}

impl EffectEngine for ScriptedEngine {
    fn initialize(&self, credential: &str, _resource_paths: &[PathBuf]) -> bool {
        assert_eq!(credential, "test-credential");
        self.script.accept_init.load(Ordering::SeqCst)
    }

    fn create_processor(&self, _render_size: Size) -> Result<Arc<dyn EffectProcessor>, Error> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedProcessor {
            script: Arc::clone(&self.script),
        }))
    }
}

struct ScriptedProcessor {
    script: Arc<Script>,
}

impl EffectProcessor for ScriptedProcessor {
    fn load_effect(&self, path: &str, completion: LoadCompletion) {
        let mode = *self.script.load.lock().unwrap();
        match mode {
            LoadMode::Succeed => completion(Ok(())),
            LoadMode::Fail => completion(Err(Error::EffectLoadFailed(path.into()))),
            LoadMode::Hold => self.script.held_loads.lock().unwrap().push(completion),
        }
    }

    fn unload_effect(&self) {
        self.script.unloads.fetch_add(1, Ordering::SeqCst);
    }

    fn surface_changed(&self, size: Size) {
        self.script.surface_sizes.lock().unwrap().push(size);
    }

    fn process_frame(&self, frame: Frame, completion: ProcessCompletion) {
        let mode = *self.script.process.lock().unwrap();
        match mode {
            ProcessMode::Inline => completion(Ok(recolour(&frame))),
            ProcessMode::Hold => self
                .script
                .held_frames
                .lock()
                .unwrap()
                .push((frame, completion)),
            ProcessMode::Fail => completion(Err(Error::FrameDropped)),
            ProcessMode::Forget => drop(completion),
        }
    }

    fn call_method(&self, method: &str, param: &str) -> bool {
        self.script
            .method_calls
            .lock()
            .unwrap()
            .push((method.into(), param.into()));
        true
    }
}

fn recolour(frame: &Frame) -> Frame {
    let buffer = CpuPixelBuffer::filled(frame.pixel_format(), frame.size(), PROCESSED_FILL)
        .expect("test frames are uncompressed");
    Frame::new(buffer, frame.timestamp())
}

/// A display surface that records what it receives.
#[derive(Clone)]
pub struct RecordingSurface {
    ready: Arc<AtomicBool>,
    samples: Arc<Mutex<Vec<TimedSample>>>,
}

impl RecordingSurface {
    pub fn ready() -> Self {
        RecordingSurface {
            ready: Arc::new(AtomicBool::new(true)),
            samples: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn never_ready() -> Self {
        let surface = Self::ready();
        surface.ready.store(false, Ordering::SeqCst);
        surface
    }

    pub fn samples(&self) -> Vec<TimedSample> {
        self.samples.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().unwrap().len()
    }
}

impl DisplaySurface for RecordingSurface {
    fn is_ready_for_more_data(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn enqueue(&mut self, sample: TimedSample) {
        self.samples.lock().unwrap().push(sample);
    }
}

/// A raw camera frame and a handle to its buffer for lock inspection.
pub fn camera_frame(index: i64) -> (Frame, Arc<CpuPixelBuffer>) {
    let y: Vec<u8> = (0..SIZE.width * SIZE.height)
        .map(|i| (i as i64 + index) as u8)
        .collect();
    let uv = vec![0x80; (SIZE.width * SIZE.height / 2) as usize];
    let buffer = Arc::new(
        CpuPixelBuffer::with_planes(PixelFormat::Nv12FullRange, SIZE, vec![y, uv])
            .expect("valid test layout"),
    );
    let frame = Frame::from_shared(buffer.clone(), Timestamp::new(index, 30));
    (frame, buffer)
}

/// A uniformly filled NV12 frame of `size`.
pub fn sized_frame(size: Size, index: i64) -> Frame {
    let buffer = CpuPixelBuffer::filled(PixelFormat::Nv12FullRange, size, index as u8)
        .expect("valid test layout");
    Frame::new(buffer, Timestamp::new(index, 30))
}
