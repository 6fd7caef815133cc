//! Hardware input bridge
//!
//! Sensor callbacks (RFID readers, buttons, the distance sensor, the drawing
//! recognizer, the camera) land here, get checked and debounced, and are
//! pushed onto the workshop event loop. Nothing here touches workshop state.
//!
//! [`run_line_source`] drives the bridge from text commands, one per line,
//! so a workshop can be exercised from a terminal without any sensors.

use std::collections::HashMap;
use std::hash::Hash;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use rift_domain::{DomainError, Role, RolePair, WorkshopEvent};

use crate::application::EventSender;

/// Drops repeats of the same key inside a time window.
#[derive(Debug)]
pub struct Debouncer<K> {
    window: Duration,
    last: HashMap<K, Instant>,
}

impl<K: Eq + Hash> Debouncer<K> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: HashMap::new(),
        }
    }

    /// True when `key` was not accepted within the window before `now`.
    pub fn accept(&mut self, key: K, now: Instant) -> bool {
        match self.last.get(&key) {
            Some(previous) if now.saturating_duration_since(*previous) < self.window => false,
            _ => {
                self.last.insert(key, now);
                true
            }
        }
    }

    pub fn clear(&mut self) {
        self.last.clear();
    }
}

pub struct HardwareBridge {
    events: EventSender,
    roles: RolePair,
    rfid: Mutex<Debouncer<(String, String)>>,
    buttons: Mutex<Debouncer<Role>>,
}

impl HardwareBridge {
    pub fn new(events: EventSender, roles: RolePair, debounce: Duration) -> Self {
        Self {
            events,
            roles,
            rfid: Mutex::new(Debouncer::new(debounce)),
            buttons: Mutex::new(Debouncer::new(debounce)),
        }
    }

    fn role(&self, name: &str) -> Result<Role, DomainError> {
        let role = Role::new(name)?;
        if self.roles.contains(&role) {
            Ok(role)
        } else {
            Err(DomainError::unknown_role(name))
        }
    }

    /// Returns whether the event reached the loop.
    async fn push(&self, event: WorkshopEvent) -> bool {
        let kind = event.kind();
        match self.events.send(event).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(event = kind, error = %e, "Dropping hardware event");
                false
            }
        }
    }

    pub async fn on_rfid_read(&self, uid: &str, reader: &str) -> bool {
        let uid = uid.trim();
        let reader = reader.trim();
        if uid.is_empty() {
            tracing::warn!(reader, "Ignoring empty RFID read");
            return false;
        }
        let fresh = self
            .rfid
            .lock()
            .await
            .accept((uid.to_string(), reader.to_string()), Instant::now());
        if !fresh {
            tracing::trace!(uid, reader, "Debounced RFID read");
            return false;
        }
        tracing::debug!(uid, reader, "RFID read");
        self.push(WorkshopEvent::Rfid {
            uid: uid.to_string(),
            reader: reader.to_string(),
        })
        .await
    }

    pub async fn on_button_press(&self, role: &str) -> bool {
        let role = match self.role(role) {
            Ok(role) => role,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring button press");
                return false;
            }
        };
        if !self.buttons.lock().await.accept(role.clone(), Instant::now()) {
            tracing::trace!(role = %role, "Debounced button press");
            return false;
        }
        self.push(WorkshopEvent::Button { role }).await
    }

    pub async fn on_distance(&self, cm: f32) -> bool {
        if !cm.is_finite() || cm < 0.0 {
            tracing::warn!(cm, "Ignoring bad distance sample");
            return false;
        }
        self.push(WorkshopEvent::Distance { cm }).await
    }

    pub async fn on_recognition(&self, role: &str, label: &str, distance: f32) -> bool {
        let role = match self.role(role) {
            Ok(role) => role,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring recognition result");
                return false;
            }
        };
        if label.trim().is_empty() || !distance.is_finite() || distance < 0.0 {
            tracing::warn!(role = %role, label, distance, "Ignoring bad recognition result");
            return false;
        }
        self.push(WorkshopEvent::Recognition {
            role,
            label: label.trim().to_string(),
            distance,
        })
        .await
    }

    pub async fn on_frame(&self, role: &str, image: Vec<u8>) -> bool {
        let role = match self.role(role) {
            Ok(role) => role,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring camera frame");
                return false;
            }
        };
        if image.is_empty() {
            tracing::warn!(role = %role, "Ignoring empty camera frame");
            return false;
        }
        self.push(WorkshopEvent::ClientFrame { role, image }).await
    }

    /// Operator reset. Also forgets debounce history.
    pub async fn reset(&self) -> bool {
        self.rfid.lock().await.clear();
        self.buttons.lock().await.clear();
        self.push(WorkshopEvent::Reset).await
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CommandParseError {
    #[error("Empty command")]
    Empty,
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
    #[error("Invalid number '{0}'")]
    InvalidNumber(String),
}

/// One line of bench input.
#[derive(Debug, Clone, PartialEq)]
pub enum BenchCommand {
    Rfid { uid: String, reader: String },
    Button { role: String },
    Distance { cm: f32 },
    Recognise { role: String, label: String, distance: f32 },
    Frame { role: String, path: PathBuf },
    Reset,
}

pub fn parse_command(line: &str) -> Result<BenchCommand, CommandParseError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some((&command, args)) = parts.split_first() else {
        return Err(CommandParseError::Empty);
    };

    let number = |raw: &str| {
        raw.parse::<f32>()
            .map_err(|_| CommandParseError::InvalidNumber(raw.to_string()))
    };

    match (command.to_ascii_lowercase().as_str(), args) {
        ("rfid", [uid, reader]) => Ok(BenchCommand::Rfid {
            uid: uid.to_string(),
            reader: reader.to_string(),
        }),
        ("rfid", _) => Err(CommandParseError::Usage("rfid <uid> <reader>")),
        ("button", [role]) => Ok(BenchCommand::Button {
            role: role.to_string(),
        }),
        ("button", _) => Err(CommandParseError::Usage("button <role>")),
        ("distance", [cm]) => Ok(BenchCommand::Distance { cm: number(*cm)? }),
        ("distance", _) => Err(CommandParseError::Usage("distance <cm>")),
        ("recognise" | "recognize", [role, label, distance]) => Ok(BenchCommand::Recognise {
            role: role.to_string(),
            label: label.to_string(),
            distance: number(*distance)?,
        }),
        ("recognise" | "recognize", _) => {
            Err(CommandParseError::Usage("recognise <role> <label> <distance>"))
        }
        ("frame", [role, path]) => Ok(BenchCommand::Frame {
            role: role.to_string(),
            path: PathBuf::from(*path),
        }),
        ("frame", _) => Err(CommandParseError::Usage("frame <role> <path>")),
        ("reset", []) => Ok(BenchCommand::Reset),
        ("reset", _) => Err(CommandParseError::Usage("reset")),
        (other, _) => Err(CommandParseError::UnknownCommand(other.to_string())),
    }
}

async fn apply(bridge: &HardwareBridge, command: BenchCommand) -> bool {
    match command {
        BenchCommand::Rfid { uid, reader } => bridge.on_rfid_read(&uid, &reader).await,
        BenchCommand::Button { role } => bridge.on_button_press(&role).await,
        BenchCommand::Distance { cm } => bridge.on_distance(cm).await,
        BenchCommand::Recognise {
            role,
            label,
            distance,
        } => bridge.on_recognition(&role, &label, distance).await,
        BenchCommand::Frame { role, path } => match tokio::fs::read(&path).await {
            Ok(image) => bridge.on_frame(&role, image).await,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read frame");
                false
            }
        },
        BenchCommand::Reset => bridge.reset().await,
    }
}

/// Feed bench commands from `reader` until EOF or shutdown.
/// Returns how many commands produced an event.
pub async fn run_line_source<R>(reader: R, bridge: &HardwareBridge, shutdown: CancellationToken) -> usize
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut delivered = 0;

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Bench input failed");
                break;
            }
        };
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }

        match parse_command(&line) {
            Ok(command) => {
                if apply(bridge, command).await {
                    delivered += 1;
                }
            }
            Err(e) => tracing::warn!(line = %line, error = %e, "Ignoring bench command"),
        }
    }

    tracing::debug!(delivered, "Bench input closed");
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::RuntimeEvent;
    use std::io::Write;
    use tokio::io::BufReader;
    use tokio::sync::mpsc;

    fn bridge(debounce: Duration) -> (HardwareBridge, mpsc::Receiver<RuntimeEvent>) {
        let (tx, rx) = mpsc::channel(32);
        let bridge = HardwareBridge::new(EventSender::new(tx), RolePair::default(), debounce);
        (bridge, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<RuntimeEvent>) -> Vec<WorkshopEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                RuntimeEvent::Workshop(event) => events.push(event),
                other => panic!("unexpected event {other:?}"),
            }
        }
        events
    }

    #[test]
    fn debouncer_drops_repeats_inside_the_window() {
        let mut debouncer = Debouncer::new(Duration::from_millis(500));
        let t0 = Instant::now();

        assert!(debouncer.accept("a", t0));
        assert!(!debouncer.accept("a", t0 + Duration::from_millis(100)));
        assert!(debouncer.accept("b", t0 + Duration::from_millis(100)));
        assert!(debouncer.accept("a", t0 + Duration::from_millis(600)));
    }

    #[tokio::test]
    async fn rfid_reads_are_debounced_per_reader() {
        let (bridge, mut rx) = bridge(Duration::from_secs(60));

        assert!(bridge.on_rfid_read("A1", "altar").await);
        assert!(!bridge.on_rfid_read("A1", "altar").await);
        assert!(bridge.on_rfid_read("A1", "dream").await);
        assert!(!bridge.on_rfid_read("  ", "altar").await);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            WorkshopEvent::Rfid {
                uid: "A1".into(),
                reader: "altar".into()
            }
        );
    }

    #[tokio::test]
    async fn bad_reads_are_dropped() {
        let (bridge, mut rx) = bridge(Duration::ZERO);

        assert!(!bridge.on_button_press("ghost").await);
        assert!(!bridge.on_distance(f32::NAN).await);
        assert!(!bridge.on_distance(-3.0).await);
        assert!(!bridge.on_recognition("dream", "fire", f32::INFINITY).await);
        assert!(!bridge.on_recognition("ghost", "fire", 0.1).await);
        assert!(!bridge.on_frame("dream", Vec::new()).await);
        assert!(drain(&mut rx).is_empty());

        assert!(bridge.on_button_press("nightmare").await);
        assert!(bridge.on_distance(42.0).await);
        assert!(bridge.on_recognition("dream", "water", 0.2).await);
        assert_eq!(drain(&mut rx).len(), 3);
    }

    #[tokio::test]
    async fn reset_forgets_debounce_history() {
        let (bridge, mut rx) = bridge(Duration::from_secs(60));

        assert!(bridge.on_button_press("dream").await);
        assert!(!bridge.on_button_press("dream").await);
        assert!(bridge.reset().await);
        assert!(bridge.on_button_press("dream").await);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert_eq!(events[1], WorkshopEvent::Reset);
    }

    #[tokio::test]
    async fn closed_loop_drops_events() {
        let (bridge, rx) = bridge(Duration::ZERO);
        drop(rx);
        assert!(!bridge.on_distance(10.0).await);
    }

    #[test]
    fn parses_bench_commands() {
        assert_eq!(
            parse_command("rfid A1 altar"),
            Ok(BenchCommand::Rfid {
                uid: "A1".into(),
                reader: "altar".into()
            })
        );
        assert_eq!(
            parse_command("  BUTTON dream "),
            Ok(BenchCommand::Button {
                role: "dream".into()
            })
        );
        assert_eq!(
            parse_command("recognize nightmare sun 0.25"),
            Ok(BenchCommand::Recognise {
                role: "nightmare".into(),
                label: "sun".into(),
                distance: 0.25
            })
        );
        assert_eq!(parse_command("reset"), Ok(BenchCommand::Reset));

        assert_eq!(parse_command(""), Err(CommandParseError::Empty));
        assert_eq!(
            parse_command("distance far"),
            Err(CommandParseError::InvalidNumber("far".into()))
        );
        assert!(matches!(
            parse_command("rfid A1"),
            Err(CommandParseError::Usage(_))
        ));
        assert_eq!(
            parse_command("dance"),
            Err(CommandParseError::UnknownCommand("dance".into()))
        );
    }

    #[tokio::test]
    async fn line_source_feeds_the_bridge() {
        let mut frame = tempfile::NamedTempFile::new().unwrap();
        frame.write_all(&[0x89, 0x50, 0x4E, 0x47]).unwrap();

        let script = format!(
            "# warm-up\nrfid A1 altar\n\nbutton ghost\nnonsense\ndistance 12.5\nframe dream {}\nframe dream /no/such/file\n",
            frame.path().display()
        );
        let (bridge, mut rx) = bridge(Duration::ZERO);

        let delivered = run_line_source(
            BufReader::new(script.as_bytes()),
            &bridge,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(delivered, 3);
        let events = drain(&mut rx);
        assert_eq!(events[1], WorkshopEvent::Distance { cm: 12.5 });
        assert!(matches!(
            &events[2],
            WorkshopEvent::ClientFrame { image, .. } if image == &vec![0x89, 0x50, 0x4E, 0x47]
        ));
    }

    #[tokio::test]
    async fn line_source_stops_on_shutdown() {
        let (bridge, _rx) = bridge(Duration::ZERO);
        let (_writer, reader) = tokio::io::duplex(64);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let delivered = run_line_source(BufReader::new(reader), &bridge, shutdown).await;
        assert_eq!(delivered, 0);
    }
}
