//! gzip stream sessions
//!
//! A [`StreamSession`] owns one open file, its direction and its codec state
//! across a sequence of reads or writes. Each call picks the hardware or the
//! software engine through the codec selector; both engines drive the same
//! gzip stream, so the output is one well-formed gzip file whichever path
//! handled each call.

mod mode;
mod read;
mod write;

pub use mode::{Access, OpenMode};

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::Compression;
use tracing::{debug, error};

use crate::codec::{CodecState, Flush, GzipDeflater, GzipInflater, StepStatus, Strategy};
use crate::config::ModeConfig;
use crate::device::{AcceleratorEngine, DeflateEngine, EngineMetrics, SoftwareEngine};
use crate::dispatch::{self, CodecPath, Direction, PathStatistics};
use crate::error::{CodecStatus, GzError, GzResult};
use crate::utils::{try_alloc, LogExt};

/// Output chunk used while finishing a compress session
const FINISH_CHUNK: usize = 4096;

/// What to open
#[derive(Debug)]
pub enum Target {
    /// Opened fresh according to the mode string
    Path(PathBuf),

    /// Inherited descriptor, adopted as is
    Descriptor(File),
}

impl From<&str> for Target {
    fn from(path: &str) -> Self {
        Target::Path(PathBuf::from(path))
    }
}

impl From<&Path> for Target {
    fn from(path: &Path) -> Self {
        Target::Path(path.to_path_buf())
    }
}

impl From<&PathBuf> for Target {
    fn from(path: &PathBuf) -> Self {
        Target::Path(path.clone())
    }
}

impl From<PathBuf> for Target {
    fn from(path: PathBuf) -> Self {
        Target::Path(path)
    }
}

impl From<File> for Target {
    fn from(file: File) -> Self {
        Target::Descriptor(file)
    }
}

#[cfg(unix)]
impl From<std::os::fd::OwnedFd> for Target {
    fn from(fd: std::os::fd::OwnedFd) -> Self {
        Target::Descriptor(File::from(fd))
    }
}

enum Codec {
    Deflate(GzipDeflater),
    Inflate(GzipInflater),
}

/// Engines of one session; the accelerator is attached on first use
#[derive(Default)]
struct Engines {
    software: SoftwareEngine,
    hardware: Option<AcceleratorEngine>,
}

impl Engines {
    fn get(&mut self, path: CodecPath) -> GzResult<&mut dyn DeflateEngine> {
        match path {
            CodecPath::Software => Ok(&mut self.software),
            CodecPath::Hardware => {
                if self.hardware.is_none() {
                    self.hardware = Some(AcceleratorEngine::new()?);
                }
                let engine = self.hardware.as_mut().ok_or_else(|| {
                    GzError::InvalidArgument("accelerator engine unavailable".to_string())
                })?;
                Ok(engine)
            }
        }
    }
}

/// Counters of one session
#[derive(Debug, Clone)]
pub struct SessionMetrics {
    pub paths: PathStatistics,
    pub software: EngineMetrics,

    /// `None` until the hardware path is first used
    pub hardware: Option<EngineMetrics>,
}

/// One open gzip stream
pub struct StreamSession {
    file: File,
    origin: Option<PathBuf>,
    direction: Direction,
    config: ModeConfig,
    state: CodecState,
    codec: Codec,
    engines: Engines,
    sticky: Option<String>,
    stats: PathStatistics,
    closed: bool,
}

impl StreamSession {
    /// Open `target` with the process-wide [`ModeConfig`].
    ///
    /// # Errors
    /// Returns `GzError::InvalidArgument` for a bad mode string or an
    /// unusable target.
    pub fn open<T: Into<Target>>(target: T, mode: &str) -> GzResult<Self> {
        Self::open_with(target, mode, *ModeConfig::global())
    }

    /// Open `target` with an explicit configuration.
    ///
    /// # Errors
    /// Returns `GzError::InvalidArgument` for a bad mode string or an
    /// unusable target.
    pub fn open_with<T: Into<Target>>(target: T, mode: &str, config: ModeConfig) -> GzResult<Self> {
        let mode: OpenMode = mode.parse()?;

        let (file, origin) = match target.into() {
            Target::Path(path) => {
                let file = mode.access.options().open(&path).map_err(|e| {
                    GzError::InvalidArgument(format!("cannot open {}: {}", path.display(), e))
                })?;
                (file, Some(path))
            }
            Target::Descriptor(file) => {
                check_access(&file, mode.direction)?;
                (file, None)
            }
        };
        let meta = file
            .metadata()
            .map_err(|e| GzError::InvalidArgument(format!("unusable descriptor: {}", e)))?;
        if meta.is_dir() {
            return Err(GzError::InvalidArgument("target is a directory".to_string()));
        }

        let codec = match mode.direction {
            Direction::Compress => Codec::Deflate(GzipDeflater::new(mode.level, mode.strategy)),
            Direction::Decompress => Codec::Inflate(GzipInflater::new()),
        };

        debug!(
            origin = ?origin,
            direction = ?mode.direction,
            level = mode.level.level(),
            strategy = ?mode.strategy,
            "opened gzip stream"
        );

        Ok(Self {
            file,
            origin,
            direction: mode.direction,
            config,
            state: CodecState::new(mode.level, mode.strategy),
            codec,
            engines: Engines::default(),
            sticky: None,
            stats: PathStatistics::new(),
            closed: false,
        })
    }

    /// Finish the stream and release the descriptor.
    ///
    /// Compress sessions write out every byte the encoder still holds, the
    /// gzip trailer included, before the descriptor is closed.
    ///
    /// # Errors
    /// Returns the sticky error of a poisoned session, or whatever
    /// finishing the encoder and writing its output reports.
    pub fn close(mut self) -> GzResult<CodecStatus> {
        self.closed = true;
        if let Some(msg) = self.sticky.take() {
            return Err(GzError::SessionPoisoned(msg));
        }
        match self.direction {
            Direction::Compress => self.finish()?,
            Direction::Decompress => {}
        }
        debug!(
            origin = ?self.origin,
            total_in = self.state.total_in,
            total_out = self.state.total_out,
            "closed gzip stream"
        );
        Ok(CodecStatus::Ok)
    }

    /// Drive the encoder to stream end, writing each chunk as it comes
    fn finish(&mut self) -> GzResult<()> {
        let path = dispatch::select(self.config.mode(self.direction), self.config.threshold(self.direction), 0);
        let mut chunk = try_alloc(FINISH_CHUNK)?;

        let Codec::Deflate(encoder) = &mut self.codec else {
            return Ok(());
        };
        let engine = self.engines.get(path)?;
        loop {
            let step = encoder.step(engine, &[], &mut chunk, Flush::Finish)?;
            self.state.record(&step);
            self.file.write_all(&chunk[..step.produced])?;
            if step.status == StepStatus::StreamEnd {
                break;
            }
        }
        self.file.flush()?;
        Ok(())
    }

    /// Record a failure; the session is unusable from now on
    fn poison(&mut self, err: GzError) -> GzError {
        error!(origin = ?self.origin, error = %err, "gzip stream failed");
        self.sticky = Some(err.to_string());
        err
    }

    fn check_usable(&self, expected: Direction) -> GzResult<()> {
        if let Some(msg) = &self.sticky {
            return Err(GzError::SessionPoisoned(msg.clone()));
        }
        if self.direction != expected {
            return Err(GzError::InvalidArgument(format!(
                "session opened for {:?}",
                self.direction
            )));
        }
        Ok(())
    }

    /// Direction fixed by the mode string
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Compression level from the mode string
    pub fn level(&self) -> Compression {
        self.state.level
    }

    /// Deflate strategy from the mode string
    pub fn strategy(&self) -> Strategy {
        self.state.strategy
    }

    /// Total bytes consumed by the codec
    pub fn total_in(&self) -> u64 {
        self.state.total_in
    }

    /// Total bytes produced by the codec
    pub fn total_out(&self) -> u64 {
        self.state.total_out
    }

    /// Sticky error, if an earlier call failed
    pub fn error(&self) -> Option<&str> {
        self.sticky.as_deref()
    }

    /// Codec selection settings of this session
    pub fn config(&self) -> &ModeConfig {
        &self.config
    }

    /// Per-path call counters and engine counters
    pub fn metrics(&self) -> SessionMetrics {
        SessionMetrics {
            paths: self.stats.clone(),
            software: self.engines.software.metrics(),
            hardware: self.engines.hardware.as_ref().map(|e| e.metrics()),
        }
    }
}

/// Reject an inherited descriptor whose access mode cannot serve `direction`
#[cfg(unix)]
fn check_access(file: &File, direction: Direction) -> GzResult<()> {
    use std::os::fd::AsRawFd;

    // SAFETY: F_GETFL only reads the status flags of a descriptor `file` owns.
    let flags = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_GETFL) };
    if flags < 0 {
        return Err(GzError::InvalidArgument(format!(
            "unusable descriptor: {}",
            std::io::Error::last_os_error()
        )));
    }

    let usable = match flags & libc::O_ACCMODE {
        libc::O_RDWR => true,
        libc::O_RDONLY => direction == Direction::Decompress,
        libc::O_WRONLY => direction == Direction::Compress,
        _ => false,
    };
    if !usable {
        return Err(GzError::InvalidArgument(format!(
            "descriptor access mode does not allow {:?}",
            direction
        )));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_access(_file: &File, _direction: Direction) -> GzResult<()> {
    Ok(())
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if self.closed || self.sticky.is_some() || self.direction != Direction::Compress {
            return;
        }
        self.finish()
            .log_warning("gzip stream dropped without close; finishing it failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CodecMode;
    use std::io::Read;

    #[test]
    fn test_open_rejects_bad_targets() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.gz");

        assert!(matches!(
            StreamSession::open_with(missing.as_path(), "rb", ModeConfig::default()),
            Err(GzError::InvalidArgument(_))
        ));
        assert!(matches!(
            StreamSession::open_with(dir.path(), "rb", ModeConfig::default()),
            Err(GzError::InvalidArgument(_))
        ));
        assert!(matches!(
            StreamSession::open_with(dir.path().join("x.gz"), "r+", ModeConfig::default()),
            Err(GzError::InvalidArgument(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_descriptor_access_mode_must_fit_direction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fd.gz");
        std::fs::write(&path, b"").unwrap();
        let config = ModeConfig::uniform(CodecMode::SoftwareOnly);

        let read_only = File::open(&path).unwrap();
        assert!(matches!(
            StreamSession::open_with(read_only, "w", config),
            Err(GzError::InvalidArgument(_))
        ));

        let write_only = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        assert!(matches!(
            StreamSession::open_with(write_only, "rb", config),
            Err(GzError::InvalidArgument(_))
        ));

        let append_only = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        StreamSession::open_with(append_only, "a", config).unwrap().close().unwrap();

        let both = std::fs::OpenOptions::new().read(true).write(true).open(&path).unwrap();
        StreamSession::open_with(both, "r", config).unwrap().close().unwrap();
    }

    #[test]
    fn test_session_carries_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mode.gz");

        let session = StreamSession::open_with(&path, "w6f", ModeConfig::default()).unwrap();
        assert_eq!(session.direction(), Direction::Compress);
        assert_eq!(session.level(), Compression::new(6));
        assert_eq!(session.strategy(), Strategy::Filtered);
        assert!(session.error().is_none());
        session.close().unwrap();

        let session = StreamSession::open_with(&path, "r", ModeConfig::default()).unwrap();
        assert_eq!(session.direction(), Direction::Decompress);
        assert_eq!(session.close().unwrap(), CodecStatus::Ok);
    }

    #[test]
    fn test_close_of_empty_compress_session_writes_valid_member() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.gz");

        StreamSession::open_with(&path, "w", ModeConfig::uniform(CodecMode::SoftwareOnly))
            .unwrap()
            .close()
            .unwrap();

        let mut plain = Vec::new();
        flate2::read::GzDecoder::new(File::open(&path).unwrap())
            .read_to_end(&mut plain)
            .unwrap();
        assert!(plain.is_empty());
    }

    #[test]
    fn test_drop_finishes_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dropped.gz");

        {
            let mut session =
                StreamSession::open_with(&path, "w", ModeConfig::uniform(CodecMode::SoftwareOnly)).unwrap();
            session.write(b"not closed explicitly").unwrap();
        }

        let mut plain = Vec::new();
        flate2::read::GzDecoder::new(File::open(&path).unwrap())
            .read_to_end(&mut plain)
            .unwrap();
        assert_eq!(plain, b"not closed explicitly");
    }

    #[test]
    fn test_wrong_direction_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dir.gz");

        let mut session = StreamSession::open_with(&path, "w", ModeConfig::default()).unwrap();
        let mut buf = [0u8; 4];
        assert!(matches!(session.read(&mut buf), Err(GzError::InvalidArgument(_))));
        assert!(session.error().is_none());
        session.close().unwrap();
    }
}
