//! Scripted multi-interactive session
//!
//! Mounts a number of in-process interactives against in-memory
//! collaborators, lets each one play a short script (features, height,
//! state, log, attachment write), then saves every interactive the way a
//! page navigation would.

use anyhow::Context;
use ih_channel::FrameLink;
use ih_core::{
    HostConfig, HostEvent, HostSession, InteractiveInstance, LearnerIdentity, SaveSummary,
    SessionContext,
};
use ih_protocol::{
    AttachmentOperation, AttachmentUrlRequest, Envelope, HostMessage, InteractiveMessage,
    LogEvent, Mode, RequestId, SupportedFeatures,
};
use ih_test_utils::{
    MemoryObjectStorage, MemoryStore, RecordingCoordinator, RecordingTelemetry, StaticCredentials,
};
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;

/// Shape of the simulated page
#[derive(Debug, Clone, Copy)]
pub struct Scenario {
    /// Interactives that answer every request
    pub interactives: usize,
    /// Interactives that never answer state requests
    pub silent: usize,
    /// Interactives rendered in report mode
    pub report: usize,
}

/// What happened
#[derive(Debug)]
pub struct SimulationReport {
    pub mounted: usize,
    pub summary: SaveSummary,
    pub writes: usize,
    pub folders: usize,
    pub telemetry: usize,
    pub slow: bool,
    pub finished_late: bool,
}

impl SimulationReport {
    pub fn passed(&self) -> bool {
        self.summary.is_complete()
    }

    pub fn to_json(&self) -> Value {
        json!({
            "mounted": self.mounted,
            "saved": self.summary.saved.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "skipped": self.summary.skipped.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "failed": self.summary.failed_labels(),
            "writes": self.writes,
            "folders": self.folders,
            "telemetry": self.telemetry,
            "slow": self.slow,
            "finishedLate": self.finished_late,
        })
    }

    pub fn generate_text(&self) -> String {
        let mut out = String::new();
        out.push_str("Session Report\n");
        out.push_str("==============\n");
        out.push_str(&format!("  Mounted:        {}\n", self.mounted));
        out.push_str(&format!("  Saved:          {}\n", self.summary.saved.len()));
        out.push_str(&format!("  Skipped:        {}\n", self.summary.skipped.len()));
        out.push_str(&format!("  Failed:         {}\n", self.summary.failed.len()));
        for error in &self.summary.failed {
            out.push_str(&format!("    - {error}\n"));
        }
        out.push_str(&format!("  State writes:   {}\n", self.writes));
        out.push_str(&format!("  Folders:        {}\n", self.folders));
        out.push_str(&format!("  Telemetry:      {}\n", self.telemetry));
        out.push_str(&format!("  Slow saves:     {}\n", self.slow));
        out.push_str(&format!(
            "  Status:         {}\n",
            if self.passed() { "SAVED" } else { "SOME ITEMS DID NOT SAVE" }
        ));
        out
    }
}

/// Run one scripted session
///
/// # Errors
/// Fails if an interactive never completes its handshake.
pub async fn run(config: HostConfig, scenario: Scenario) -> anyhow::Result<SimulationReport> {
    let store = MemoryStore::new();
    let storage = MemoryObjectStorage::new();
    let telemetry = RecordingTelemetry::new();
    let context = SessionContext::builder(
        store.clone(),
        storage.clone(),
        StaticCredentials::new("simulated-jwt"),
        RecordingCoordinator::new(),
    )
    .config(config)
    .identity(LearnerIdentity::Anonymous {
        run_key: "simulated-run".to_string(),
    })
    .telemetry(telemetry.clone())
    .build();
    let session = HostSession::new(context);
    let mut events = session.subscribe();

    let total = scenario.interactives + scenario.silent + scenario.report;
    let mut peers = Vec::with_capacity(total);
    for index in 0..total {
        let silent = index >= scenario.interactives && index < scenario.interactives + scenario.silent;
        let mode = if index >= scenario.interactives + scenario.silent {
            Mode::Report
        } else {
            Mode::Runtime
        };
        let id = format!("interactive_{index}");
        let instance = InteractiveInstance::new(id.as_str(), format!("https://interactives.local/{id}"))
            .with_label(format!("Interactive {index}"))
            .with_authored_state(json!({ "index": index }))
            .with_mode(mode);

        let (host, frame) = FrameLink::pair();
        session.mount_interactive(instance, host);
        peers.push(tokio::spawn(play(frame, index, silent)));
    }

    wait_connected(&mut events, total)
        .await
        .context("interactives did not finish their handshake")?;

    let summary = session.save_all().await;
    let (slow, finished_late) = save_signals(&mut events);
    let report = SimulationReport {
        mounted: total,
        summary,
        writes: store.writes().len(),
        folders: storage.folders_created(),
        telemetry: telemetry.events().len(),
        slow,
        finished_late,
    };

    session.clear();
    for peer in peers {
        peer.abort();
    }
    Ok(report)
}

async fn wait_connected(
    events: &mut broadcast::Receiver<HostEvent>,
    expected: usize,
) -> anyhow::Result<()> {
    let mut connected = 0;
    let deadline = std::time::Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        while connected < expected {
            match events.recv().await {
                Ok(HostEvent::Connected { id, generation }) => {
                    tracing::debug!(interactive = %id, %generation, "simulated interactive connected");
                    connected += 1;
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
    .await?;
    anyhow::ensure!(connected == expected, "only {connected} of {expected} connected");
    Ok(())
}

fn save_signals(events: &mut broadcast::Receiver<HostEvent>) -> (bool, bool) {
    let (mut slow, mut late) = (false, false);
    while let Ok(event) = events.try_recv() {
        match event {
            HostEvent::SavesSlow => slow = true,
            HostEvent::SavesFinishedLate => late = true,
            _ => {}
        }
    }
    (slow, late)
}

fn send(link: &FrameLink, message: &InteractiveMessage) -> bool {
    match Envelope::try_from(message) {
        Ok(envelope) => link.send(envelope).is_ok(),
        Err(e) => {
            tracing::warn!("failed to encode simulated message: {}", e);
            false
        }
    }
}

/// Frame-side script for one interactive
async fn play(mut link: FrameLink, index: usize, silent: bool) {
    loop {
        match link.recv().await {
            Some(envelope) if envelope.is_hello() => break,
            Some(_) => {}
            None => return,
        }
    }
    if link.send(Envelope::hello()).is_err() {
        return;
    }

    let mut features = Map::new();
    features.insert("aspectRatio".to_string(), json!(1.5));
    let script = [
        InteractiveMessage::SupportedFeatures(SupportedFeatures {
            api_version: Some(1),
            features,
        }),
        InteractiveMessage::Height(240.0),
        InteractiveMessage::InteractiveState(json!({ "step": 1, "index": index })),
        InteractiveMessage::Log(LogEvent {
            event: "simulated".to_string(),
            value: Some(json!(index)),
            data: None,
        }),
        InteractiveMessage::GetAttachmentUrl(AttachmentUrlRequest {
            request_id: RequestId(1),
            name: "notes.txt".to_string(),
            operation: AttachmentOperation::Write,
            content_type: Some("text/plain".to_string()),
            expires_in: None,
        }),
    ];
    for message in &script {
        if !send(&link, message) {
            return;
        }
    }

    let mut step = 1;
    while let Some(envelope) = link.recv().await {
        match envelope.decode_outbound() {
            Ok(HostMessage::GetInteractiveState(_)) if !silent => {
                step += 1;
                let state = json!({ "step": step, "index": index });
                if !send(&link, &InteractiveMessage::InteractiveState(state)) {
                    return;
                }
            }
            Ok(message) => {
                tracing::debug!(index, kind = message.kind(), "simulated interactive received");
            }
            Err(e) => tracing::warn!(index, "undecodable host message: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn silent_interactives_are_reported() {
        let config = HostConfig::default()
            .with_handshake_retry(Duration::from_millis(10))
            .with_state_request_timeout(Duration::from_millis(200))
            .with_save_watchdog(Duration::from_millis(50));
        let report = run(
            config,
            Scenario {
                interactives: 2,
                silent: 1,
                report: 1,
            },
        )
        .await
        .unwrap();

        assert_eq!(report.mounted, 4);
        assert_eq!(report.summary.saved.len(), 2);
        assert_eq!(report.summary.skipped.len(), 1);
        assert_eq!(report.summary.failed_labels(), vec!["Interactive 2".to_string()]);
        assert!(report.slow);
        assert!(!report.passed());
    }
}
