use std::{
    io::Read,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::{Duration, Instant},
};

use anyhow::Context;

use super::expression::Frame;

/// Yields one still image on demand.
pub trait FrameSource: Send {
    fn capture(&mut self) -> anyhow::Result<Frame>;

    fn describe(&self) -> String;
}

fn media_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("bmp") => "image/bmp",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

/// Runs a capture program that writes one encoded image to stdout, e.g.
/// `fswebcam --no-banner -` or an `ffmpeg -frames:v 1 -f image2pipe -` call.
///
/// A run that outlives `timeout` is killed and counts as a failed capture.
pub struct CommandFrames {
    program: String,
    args: Vec<String>,
    media_type: String,
    timeout: Duration,
}

impl CommandFrames {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

    pub fn new(command: &[String], media_type: impl Into<String>) -> anyhow::Result<Self> {
        let (program, args) = command
            .split_first()
            .context("capture command is empty")?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            media_type: media_type.into(),
            timeout: Self::DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl FrameSource for CommandFrames {
    fn capture(&mut self) -> anyhow::Result<Frame> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to run `{}`", self.program))?;

        let mut stdout = child.stdout.take().context("capture stdout not piped")?;
        let reader = std::thread::spawn(move || {
            let mut bytes = Vec::new();
            stdout.read_to_end(&mut bytes).map(|_| bytes)
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                anyhow::bail!("`{}` gave no frame within {:?}", self.program, self.timeout);
            }
            std::thread::sleep(Duration::from_millis(10));
        };

        let bytes = reader
            .join()
            .map_err(|_| anyhow::anyhow!("capture reader panicked"))?
            .with_context(|| format!("cannot read output of `{}`", self.program))?;
        if !status.success() {
            anyhow::bail!("`{}` exited with {}", self.program, status);
        }
        Ok(Frame::new(bytes, self.media_type.clone()))
    }

    fn describe(&self) -> String {
        format!("command `{}`", self.program)
    }
}

/// Cycles through the image files of a directory in name order.
pub struct DirectoryFrames {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
}

impl DirectoryFrames {
    pub fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        let mut files = std::fs::read_dir(&dir)
            .with_context(|| format!("frame directory `{}` not readable", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect::<Vec<_>>();
        files.sort();

        if files.is_empty() {
            anyhow::bail!("frame directory `{}` has no images", dir.display());
        }

        Ok(Self {
            dir,
            files,
            next: 0,
        })
    }
}

impl FrameSource for DirectoryFrames {
    fn capture(&mut self) -> anyhow::Result<Frame> {
        let path = &self.files[self.next % self.files.len()];
        self.next = (self.next + 1) % self.files.len();
        let bytes =
            std::fs::read(path).with_context(|| format!("cannot read frame `{}`", path.display()))?;
        Ok(Frame::new(bytes, media_type_for(path)))
    }

    fn describe(&self) -> String {
        format!("directory `{}`", self.dir.display())
    }
}
