use std::io::Write;
use std::sync::{Arc, Mutex};
use futures::channel::mpsc::Sender;
use log::{debug, warn};

use crate::bridge::events::Notification;

/// Receives translated notifications on behalf of the application layer.
///
/// Emitting never blocks; a sink that can not keep up drops the notification and logs it.
pub trait EventSink {
    fn emit(&mut self, notification: Notification);
}

impl EventSink for Sender<Notification> {
    fn emit(&mut self, notification: Notification) {
        let event = notification.event;
        if let Err(err) = self.try_send(notification) {
            warn!("Dropping {} notification: {}", event, err);
        }
    }
}

impl EventSink for Vec<Notification> {
    fn emit(&mut self, notification: Notification) {
        self.push(notification);
    }
}

/// Collects notifications so that a host can poll for them. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct BufferedSink {
    inner: Arc<Mutex<Vec<Notification>>>,
}

impl BufferedSink {
    pub fn new() -> Self {
        BufferedSink::default()
    }

    pub fn drain(&self) -> Vec<Notification> {
        let mut inner = self.inner.lock().expect("Failed to lock BufferedSink inner");
        std::mem::take(&mut *inner)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("Failed to lock BufferedSink inner").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for BufferedSink {
    fn emit(&mut self, notification: Notification) {
        self.inner.lock().expect("Failed to lock BufferedSink inner").push(notification);
    }
}

/// Writes every notification as a single line of JSON.
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesSink { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_line(&mut self, notification: &Notification) -> Result<(), std::io::Error> {
        serde_json::to_writer(&mut self.writer, notification)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

impl<W: Write> EventSink for JsonLinesSink<W> {
    fn emit(&mut self, notification: Notification) {
        debug!("Emitting {} for {}", notification.event, notification.id());
        if let Err(err) = self.write_line(&notification) {
            warn!("Failed to write {} notification: {:?}", notification.event, err);
        }
    }
}
