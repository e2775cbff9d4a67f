use std::time::Duration;

/// Session-wide settings, owned by the dashboard controller and handed to
/// each component when it is built.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Origin serving `/api/*`, e.g. "http://192.168.4.1".
    pub base_url: String,
    /// Anti-forgery token sent as `X-CSRFToken` on every request.
    pub csrf_token: Option<String>,
    pub poll_period: Duration,
    pub fetch_timeout: Duration,
    pub frame_interval: Duration,
    pub command_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let poll_period = Duration::from_millis(100);
        Self {
            base_url: "http://localhost".into(),
            csrf_token: None,
            poll_period,
            fetch_timeout: poll_period,
            frame_interval: Duration::from_millis(16),
            command_timeout: Duration::from_secs(2),
        }
    }
}

impl SessionConfig {
    pub fn poll(&self) -> PollConfig {
        PollConfig { period: self.poll_period, timeout: self.fetch_timeout }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollConfig {
    pub period: Duration,
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        SessionConfig::default().poll()
    }
}
