use crate::overlay;
use image::RgbImage;
use rollcall_core::{Embedding, FaceMatcher, FrameRecognizer, KnownFace, MatcherError, Recognition};
use rollcall_hw::{Camera, CameraError, FrameError, FrameSource};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("matcher error: {0}")]
    Matcher(#[from] MatcherError),
    #[error("frame encoding failed: {0}")]
    Frame(#[from] FrameError),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
}

/// Opens the capture device on demand.
pub trait CameraOpener: Send {
    fn open(&mut self) -> Result<Box<dyn FrameSource>, CameraError>;
}

/// Opens a V4L2 device by path.
pub struct V4lOpener {
    pub device: String,
    pub width: u32,
    pub height: u32,
}

impl CameraOpener for V4lOpener {
    fn open(&mut self) -> Result<Box<dyn FrameSource>, CameraError> {
        let camera = Camera::open(&self.device, self.width, self.height)?;
        Ok(Box::new(camera))
    }
}

/// One processed camera frame.
pub struct CapturedFrame {
    /// Annotated JPEG, present when rendering was requested.
    pub jpeg: Option<Vec<u8>>,
    pub recognized: Vec<Recognition>,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    StartCamera {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    StopCamera {
        reply: oneshot::Sender<bool>,
    },
    CameraRunning {
        reply: oneshot::Sender<bool>,
    },
    Encode {
        image: RgbImage,
        reply: oneshot::Sender<Result<Vec<Embedding>, EngineError>>,
    },
    Capture {
        roster: Arc<Vec<KnownFace>>,
        render: bool,
        reply: oneshot::Sender<Result<Option<CapturedFrame>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Open the camera. Succeeds without reopening when it is already running.
    pub async fn start_camera(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::StartCamera { reply })
            .await?
    }

    /// Release the camera. Returns whether it was running.
    pub async fn stop_camera(&self) -> Result<bool, EngineError> {
        self.request(|reply| EngineRequest::StopCamera { reply }).await
    }

    pub async fn camera_running(&self) -> Result<bool, EngineError> {
        self.request(|reply| EngineRequest::CameraRunning { reply })
            .await
    }

    /// Detect and encode every face in a still image.
    pub async fn encode(&self, image: RgbImage) -> Result<Vec<Embedding>, EngineError> {
        self.request(|reply| EngineRequest::Encode { image, reply })
            .await?
    }

    /// Read one frame and match it against `roster`.
    ///
    /// Returns `None` when the camera is stopped. A failed read releases the
    /// camera and reports the error.
    pub async fn capture(
        &self,
        roster: Arc<Vec<KnownFace>>,
        render: bool,
    ) -> Result<Option<CapturedFrame>, EngineError> {
        self.request(|reply| EngineRequest::Capture {
            roster,
            render,
            reply,
        })
        .await?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the matcher and, while started, the camera. Requests are
/// handled one at a time so concurrent viewers never read the device at once.
pub fn spawn_engine(
    matcher: Box<dyn FaceMatcher>,
    opener: Box<dyn CameraOpener>,
    recognizer: FrameRecognizer,
    jpeg_quality: u8,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);
    let mut engine = Engine {
        matcher,
        opener,
        camera: None,
        recognizer,
        jpeg_quality,
    };

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                engine.handle(req);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

struct Engine {
    matcher: Box<dyn FaceMatcher>,
    opener: Box<dyn CameraOpener>,
    camera: Option<Box<dyn FrameSource>>,
    recognizer: FrameRecognizer,
    jpeg_quality: u8,
}

impl Engine {
    fn handle(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::StartCamera { reply } => {
                let _ = reply.send(self.start_camera());
            }
            EngineRequest::StopCamera { reply } => {
                let was_running = self.camera.take().is_some();
                if was_running {
                    tracing::info!("camera released");
                }
                let _ = reply.send(was_running);
            }
            EngineRequest::CameraRunning { reply } => {
                let _ = reply.send(self.camera.is_some());
            }
            EngineRequest::Encode { image, reply } => {
                let _ = reply.send(self.encode(&image));
            }
            EngineRequest::Capture {
                roster,
                render,
                reply,
            } => {
                let _ = reply.send(self.capture(&roster, render));
            }
        }
    }

    fn start_camera(&mut self) -> Result<(), EngineError> {
        if self.camera.is_some() {
            return Ok(());
        }
        let camera = self.opener.open()?;
        self.camera = Some(camera);
        tracing::info!("camera started");
        Ok(())
    }

    fn encode(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EngineError> {
        let faces = self
            .matcher
            .detect_and_encode(image.as_raw(), image.width(), image.height())?;
        tracing::debug!(faces = faces.len(), "encoded still image");
        Ok(faces.into_iter().map(|f| f.embedding).collect())
    }

    fn capture(
        &mut self,
        roster: &[KnownFace],
        render: bool,
    ) -> Result<Option<CapturedFrame>, EngineError> {
        let Some(camera) = self.camera.as_mut() else {
            return Ok(None);
        };
        let frame = match camera.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "frame read failed; releasing camera");
                self.camera = None;
                return Err(e.into());
            }
        };

        let recognized = self.recognizer.recognize(
            self.matcher.as_mut(),
            &frame.data,
            frame.width,
            frame.height,
            roster,
        )?;
        tracing::trace!(
            sequence = frame.sequence,
            recognized = recognized.len(),
            "frame processed"
        );

        let jpeg = if render {
            let mut image = frame.into_image()?;
            overlay::draw_recognitions(&mut image, &recognized);
            Some(rollcall_hw::encode_jpeg(&image, self.jpeg_quality)?)
        } else {
            None
        };

        Ok(Some(CapturedFrame { jpeg, recognized }))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted matcher and camera for exercising the engine without hardware.

    use super::*;
    use rollcall_core::{DetectedFace, FaceBox, EMBEDDING_DIM};
    use rollcall_hw::Frame;
    use std::sync::Mutex;

    /// Returns the same faces for every image.
    pub struct FixedMatcher {
        pub faces: Vec<DetectedFace>,
    }

    impl FaceMatcher for FixedMatcher {
        fn detect_and_encode(
            &mut self,
            _rgb: &[u8],
            _width: u32,
            _height: u32,
        ) -> Result<Vec<DetectedFace>, MatcherError> {
            Ok(self.faces.clone())
        }
    }

    pub fn embedding(v: f32) -> Embedding {
        Embedding::new([v; EMBEDDING_DIM])
    }

    pub fn face(v: f32) -> DetectedFace {
        DetectedFace {
            embedding: embedding(v),
            location: FaceBox {
                top: 2,
                right: 6,
                bottom: 6,
                left: 2,
            },
        }
    }

    /// Emits blank frames; fails every read once `fail` is set.
    pub struct BlankSource {
        pub fail: Arc<Mutex<bool>>,
        pub sequence: u32,
    }

    impl FrameSource for BlankSource {
        fn read_frame(&mut self) -> Result<Frame, CameraError> {
            if *self.fail.lock().unwrap() {
                return Err(CameraError::CaptureFailed("unplugged".into()));
            }
            self.sequence += 1;
            Frame::from_rgb(vec![0; 32 * 32 * 3], 32, 32, self.sequence)
                .map_err(|e| CameraError::CaptureFailed(e.to_string()))
        }
    }

    pub struct BlankOpener {
        pub fail: Arc<Mutex<bool>>,
        pub available: bool,
    }

    impl CameraOpener for BlankOpener {
        fn open(&mut self) -> Result<Box<dyn FrameSource>, CameraError> {
            if !self.available {
                return Err(CameraError::DeviceNotFound("/dev/video0".into()));
            }
            Ok(Box::new(BlankSource {
                fail: self.fail.clone(),
                sequence: 0,
            }))
        }
    }

    pub fn spawn_fake(faces: Vec<DetectedFace>, available: bool) -> (EngineHandle, Arc<Mutex<bool>>) {
        let fail = Arc::new(Mutex::new(false));
        let handle = spawn_engine(
            Box::new(FixedMatcher { faces }),
            Box::new(BlankOpener {
                fail: fail.clone(),
                available,
            }),
            FrameRecognizer::new(0.6, 1),
            80,
        )
        .unwrap();
        (handle, fail)
    }
}
