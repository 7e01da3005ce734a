//! Thin wrapper around systemd sd_notify integration.
//!
//! All functions are no-ops when `enabled` is false or on non-Linux platforms.
//! This keeps the runner free from `#[cfg]` conditionals.

/// Holds the runtime flag controlling whether sd-notify messages are sent.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SystemdNotifier {
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    enabled: bool,
}

impl SystemdNotifier {
    pub(crate) fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Send `READY=1` once every watcher that could start is running.
    pub(crate) fn notify_ready(&self) {
        self.send(Message::Ready);
    }

    /// Send `STOPPING=1` before watchers are drained.
    pub(crate) fn notify_stopping(&self) {
        self.send(Message::Stopping);
    }

    /// Send `STATUS=<msg>`, shown by `systemctl status`.
    pub(crate) fn notify_status(&self, msg: &str) {
        self.send(Message::Status(msg));
    }

    #[cfg(target_os = "linux")]
    fn send(&self, msg: Message<'_>) {
        use sd_notify::NotifyState;

        if !self.enabled {
            return;
        }
        let state = match msg {
            Message::Ready => NotifyState::Ready,
            Message::Stopping => NotifyState::Stopping,
            Message::Status(text) => NotifyState::Status(text),
        };
        if let Err(e) = sd_notify::notify(false, &[state]) {
            tracing::debug!(error = %e, ?msg, "sd_notify failed");
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn send(&self, _msg: Message<'_>) {}
}

#[derive(Debug, Clone, Copy)]
enum Message<'a> {
    Ready,
    Stopping,
    Status(&'a str),
}
