//! Sessions - the long-running jobs
//!
//! - [`EffectSession`]: runs the record track through the voice effects and
//!   writes the result, or serves it frame by frame.
//! - [`MixerSession`]: mixes a processed voice PCM file with bgm and music
//!   layers into a stereo file, or serves the mix frame by frame.
//! - [`TranscodeSession`]: rewrites a media file as WAV in its native format.
//!
//! Each session runs on one thread. Status, progress and the abort flag live
//! in a [`SessionHandle`] that other threads can clone and poll.
//!
//! ```text
//! UNINIT ──init──▶ INITIALIZED ──start──▶ STARTED ──▶ COMPLETED
//!                                            │
//!                                            └──────▶ ERROR
//! ```

mod effects;
mod mixer;
mod transcode;

pub use effects::EffectSession;
pub use mixer::MixerSession;
pub use transcode::TranscodeSession;

use std::sync::{Arc, Mutex, MutexGuard};

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Uninit,
    Initialized,
    Started,
    Completed,
    Error,
}

#[derive(Debug, Default)]
struct SessionState {
    status: SessionStatus,
    progress: i32,
    abort: bool,
}

/// Shared view of a session's status, progress and abort flag
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    state: Arc<Mutex<SessionState>>,
}

impl SessionHandle {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> SessionStatus {
        self.lock().status
    }

    /// Percentage of the current job, 0-100
    pub fn progress(&self) -> i32 {
        self.lock().progress
    }

    /// Ask the running job to stop after the current block
    pub fn stop(&self) {
        log::info!("session_stop");
        self.lock().abort = true;
    }

    pub fn is_aborted(&self) -> bool {
        self.lock().abort
    }

    pub(crate) fn set_status(&self, status: SessionStatus) {
        self.lock().status = status;
    }

    pub(crate) fn set_progress(&self, progress: i32) {
        self.lock().progress = progress.clamp(0, 100);
    }

    /// Forget a stop request that no job has honoured yet
    pub(crate) fn clear_abort(&self) {
        self.lock().abort = false;
    }

    /// Enter STARTED with zero progress
    ///
    /// A stop requested before the job starts stays pending, so the job ends
    /// at its first block.
    pub(crate) fn begin(&self) {
        let mut state = self.lock();
        state.status = SessionStatus::Started;
        state.progress = 0;
    }

    /// Enter COMPLETED; the job has consumed any stop request
    ///
    /// A job that ran to the end reports 100; a stopped one keeps the last
    /// progress it reached.
    pub(crate) fn complete(&self) {
        let mut state = self.lock();
        state.status = SessionStatus::Completed;
        if !state.abort {
            state.progress = 100;
        }
        state.abort = false;
    }

    /// Enter ERROR keeping the last progress
    pub(crate) fn fail(&self) {
        let mut state = self.lock();
        state.status = SessionStatus::Error;
        state.abort = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_is_shared() {
        let handle = SessionHandle::default();
        let other = handle.clone();
        assert_eq!(handle.status(), SessionStatus::Uninit);

        handle.begin();
        other.set_progress(140);
        assert_eq!(handle.progress(), 100);
        other.stop();
        assert!(handle.is_aborted());

        handle.complete();
        assert!(!other.is_aborted());
        handle.begin();
        assert_eq!(other.progress(), 0);
        assert_eq!(other.status(), SessionStatus::Started);
    }

    #[test]
    fn test_stop_before_begin_is_kept() {
        let handle = SessionHandle::default();
        handle.stop();
        handle.begin();
        assert!(handle.is_aborted());
        handle.fail();
        assert!(!handle.is_aborted());
        assert_eq!(handle.status(), SessionStatus::Error);

        handle.stop();
        handle.clear_abort();
        assert!(!handle.is_aborted());
    }

    #[test]
    fn test_stopped_job_keeps_progress() {
        let handle = SessionHandle::default();
        handle.begin();
        handle.set_progress(37);
        handle.stop();
        handle.complete();
        assert_eq!(handle.status(), SessionStatus::Completed);
        assert_eq!(handle.progress(), 37);
        assert!(!handle.is_aborted());
    }

    #[test]
    fn test_error_keeps_progress() {
        let handle = SessionHandle::default();
        handle.begin();
        handle.set_progress(42);
        handle.fail();
        assert_eq!(handle.progress(), 42);
    }
}
