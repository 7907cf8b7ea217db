//! Shell-integration decoder
//!
//! Observes the raw output stream and turns recognised sequences into
//! [`ShellIntegrationEvent`]s. The decoder never edits the stream: the caller
//! forwards every chunk to the virtual terminal unchanged.

use tracing::{debug, trace};

use super::codec::{default_codecs, ShellIntegrationCodec};
use super::scanner::OscScanner;
use super::ShellIntegrationEvent;

pub struct ShellIntegrationDecoder {
    scanner: OscScanner,
    codecs: Vec<Box<dyn ShellIntegrationCodec>>,
    enabled: bool,
}

impl Default for ShellIntegrationDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellIntegrationDecoder {
    /// Decoder with the default codec set
    pub fn new() -> Self {
        Self::with_codecs(default_codecs())
    }

    pub fn with_codecs(codecs: Vec<Box<dyn ShellIntegrationCodec>>) -> Self {
        Self {
            scanner: OscScanner::new(),
            codecs,
            enabled: true,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turning the decoder off also drops any half-read sequence.
    pub fn set_enabled(&mut self, enabled: bool) {
        if !enabled {
            self.scanner.reset();
        }
        self.enabled = enabled;
    }

    pub fn add_codec(&mut self, codec: Box<dyn ShellIntegrationCodec>) {
        self.codecs.push(codec);
    }

    /// True while a sequence is split across chunks
    pub fn has_partial(&self) -> bool {
        self.scanner.in_sequence()
    }

    /// Decode one output chunk, returning events in stream order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ShellIntegrationEvent> {
        let mut events = Vec::new();
        if !self.enabled {
            return events;
        }

        let codecs = &self.codecs;
        self.scanner.feed(chunk, |body| {
            let Ok(body) = std::str::from_utf8(body) else {
                debug!("Ignoring non UTF-8 OSC body ({} bytes)", body.len());
                return;
            };
            for codec in codecs {
                if let Some(event) = codec.decode(body) {
                    trace!("{} codec decoded {:?}", codec.name(), event);
                    events.push(event);
                    return;
                }
            }
        });
        events
    }

    /// End of stream: an unterminated sequence is treated as plain output.
    pub fn finish(&mut self) {
        if self.scanner.in_sequence() {
            debug!("Output ended inside an OSC sequence; discarding it");
        }
        self.scanner.reset();
    }
}
