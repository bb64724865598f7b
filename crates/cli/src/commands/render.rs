//! Terminal rendering of a run through the transcript builder.

use toolrelay_core::error::ProtocolError;
use toolrelay_core::stream::StreamEvent;
use toolrelay_protocol::transcript::{Status, TranscriptBuilder};
use tracing::warn;

/// Feeds decoded events into a transcript, showing tool progress on stderr.
#[derive(Default)]
pub struct Renderer {
    transcript: TranscriptBuilder,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, item: Result<StreamEvent, ProtocolError>) {
        match &item {
            Ok(StreamEvent::ToolStart { tool, .. }) => eprintln!("  ... {tool}"),
            Ok(StreamEvent::ToolEnd { tool, .. }) => eprintln!("  ok  {tool}"),
            Err(e) => eprintln!("  [Skipped frame] {e}"),
            _ => {}
        }
        if let Err(e) = self.transcript.apply_decoded(item) {
            warn!(error = %e, "Inconsistent event stream");
        }
    }

    /// Print the transcript. Returns an error when the run failed or never
    /// finished.
    pub fn finish(self) -> Result<(), Box<dyn std::error::Error>> {
        println!("{}", self.transcript.render());
        match self.transcript.status() {
            Status::Complete => Ok(()),
            Status::Failed(message) => Err(message.clone().into()),
            Status::Connecting | Status::Streaming => {
                Err("stream ended before the run finished".into())
            }
        }
    }
}
