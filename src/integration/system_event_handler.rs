use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared flag that aborts every integration holding a clone of it.
///
/// ## Example
/// ```
/// use switchopt::integration::system_event_handler::KillIntegrationToken;
/// let token = KillIntegrationToken::new();
/// let handle = token.clone();
/// handle.activate();
/// assert!(token.is_activated());
/// ```
#[derive(Clone, Debug, Default)]
pub struct KillIntegrationToken {
    flag: Arc<AtomicBool>
}
impl KillIntegrationToken {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn activate(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
    pub fn deactivate(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
    pub fn is_activated(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SystemEvent {
    KillIntegration,
    MaxNumStepsReached { max_num_steps: usize }
}

/// Decides, before every integration step, whether integration has to stop.
#[derive(Clone, Debug)]
pub struct SystemEventHandler {
    max_num_steps: usize,
    kill_integration_token: Option<KillIntegrationToken>
}
impl SystemEventHandler {
    pub fn new(max_num_steps: usize, kill_integration_token: Option<KillIntegrationToken>) -> Self {
        Self { max_num_steps, kill_integration_token }
    }
    /// Step budget for integrating over `duration` seconds.  Durations shorter than a second get the
    /// budget of one second.
    pub fn new_for_duration(max_num_steps_per_second: usize, duration: f64, kill_integration_token: Option<KillIntegrationToken>) -> Self {
        let max_num_steps = (max_num_steps_per_second as f64 * duration.max(1.0)).ceil() as usize;
        Self::new(max_num_steps, kill_integration_token)
    }
    pub fn check_event(&self, num_steps: usize) -> Option<SystemEvent> {
        if let Some(token) = &self.kill_integration_token {
            if token.is_activated() { return Some(SystemEvent::KillIntegration); }
        }
        if num_steps >= self.max_num_steps {
            return Some(SystemEvent::MaxNumStepsReached { max_num_steps: self.max_num_steps });
        }
        None
    }
    pub fn max_num_steps(&self) -> usize {
        self.max_num_steps
    }
}
