//! Pending descriptors, destination-choice tokens and command parsing

use std::collections::VecDeque;

use crate::types::{Descriptor, Destination, JobId, PendingId};

/// Descriptors waiting for the requester to pick a destination
///
/// Bounded: when full, the oldest entry is evicted and handed back to the caller so an
/// uploaded descriptor file can be removed.
#[derive(Debug)]
pub struct PendingDescriptors {
    entries: VecDeque<(PendingId, Descriptor)>,
    last_id: u64,
    capacity: usize,
}

/// Default number of descriptors kept waiting
pub const DEFAULT_PENDING_CAPACITY: usize = 256;

impl Default for PendingDescriptors {
    fn default() -> Self {
        Self::new(DEFAULT_PENDING_CAPACITY)
    }
}

impl PendingDescriptors {
    /// Create a store holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            last_id: 0,
            capacity: capacity.max(1),
        }
    }

    /// Park a descriptor, returning its id and the evicted entry if the store was full
    pub fn insert(&mut self, descriptor: Descriptor) -> (PendingId, Option<Descriptor>) {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front().map(|(_, d)| d)
        } else {
            None
        };
        self.last_id += 1;
        let id = PendingId(self.last_id);
        self.entries.push_back((id, descriptor));
        (id, evicted)
    }

    /// Remove and return a parked descriptor
    pub fn take(&mut self, id: PendingId) -> Option<Descriptor> {
        let index = self.entries.iter().position(|(p, _)| *p == id)?;
        self.entries.remove(index).map(|(_, d)| d)
    }

    /// Number of parked descriptors
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is parked
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A destination button press
///
/// Encoded once when the keyboard is built and decoded once when the press arrives;
/// nothing else looks inside the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestinationChoice {
    /// Descriptor the choice applies to
    pub pending: PendingId,
    /// Chosen destination
    pub destination: Destination,
}

impl DestinationChoice {
    fn tag(destination: Destination) -> &'static str {
        match destination {
            Destination::DirectReturn => "dr",
            Destination::RemoteUpload => "ru",
        }
    }

    /// Callback token, e.g. `dr:17`
    pub fn encode(&self) -> String {
        format!("{}:{}", Self::tag(self.destination), self.pending.0)
    }

    /// Parse a callback token; anything malformed is `None`
    pub fn decode(token: &str) -> Option<Self> {
        let (tag, id) = token.split_once(':')?;
        let destination = match tag {
            "dr" => Destination::DirectReturn,
            "ru" => Destination::RemoteUpload,
            _ => return None,
        };
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            pending: PendingId(id.parse().ok()?),
            destination,
        })
    }
}

/// What a text message asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/start`
    Start,
    /// `/jobs` (owner only)
    Jobs,
    /// `/cancel <id>` (owner only); `None` when the id is missing or malformed
    Cancel(Option<JobId>),
    /// A magnet link
    Magnet(Descriptor),
    /// Anything else
    Other,
}

impl Command {
    /// Interpret a message text
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if let Some(descriptor) = Descriptor::parse_magnet(text) {
            return Command::Magnet(descriptor);
        }

        let mut words = text.split_whitespace();
        let Some(first) = words.next() else {
            return Command::Other;
        };
        // "/cancel@relay_bot 3" in group chats
        let command = first.split('@').next().unwrap_or(first);
        match command {
            "/start" | "/help" => Command::Start,
            "/jobs" => Command::Jobs,
            "/cancel" => Command::Cancel(words.next().and_then(|w| w.parse().ok())),
            _ => Command::Other,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn magnet(n: u32) -> Descriptor {
        Descriptor::Magnet(format!("magnet:?xt=urn:btih:{n}"))
    }

    #[test]
    fn test_pending_ids_are_monotonic_and_taken_once() {
        let mut pending = PendingDescriptors::default();
        let (a, _) = pending.insert(magnet(1));
        let (b, _) = pending.insert(magnet(2));

        assert!(b > a);
        assert_eq!(pending.take(a), Some(magnet(1)));
        assert_eq!(pending.take(a), None);
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_full_store_evicts_oldest() {
        let mut pending = PendingDescriptors::new(2);
        let file = Descriptor::File(PathBuf::from("/tmp/inbox/a.torrent"));
        let (first, _) = pending.insert(file.clone());
        pending.insert(magnet(2));

        let (_, evicted) = pending.insert(magnet(3));

        assert_eq!(evicted, Some(file));
        assert_eq!(pending.take(first), None);
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn test_choice_token_decodes_what_it_encodes() {
        let choice = DestinationChoice {
            pending: PendingId(17),
            destination: Destination::RemoteUpload,
        };
        assert_eq!(choice.encode(), "ru:17");
        assert_eq!(DestinationChoice::decode("ru:17"), Some(choice));
        assert_eq!(
            DestinationChoice::decode("dr:3").map(|c| c.destination),
            Some(Destination::DirectReturn)
        );
    }

    #[test]
    fn test_malformed_choice_tokens_rejected() {
        for token in [
            "",
            "dr",
            "dr:",
            "xx:1",
            "dr:-1",
            "dr:+1",
            "dr:1:2",
            "telegram_1",
            "google_drive_1",
            "ru:99999999999999999999999",
        ] {
            assert_eq!(DestinationChoice::decode(token), None, "{token:?}");
        }
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!(Command::parse("/start"), Command::Start);
        assert_eq!(Command::parse("/jobs@relay_bot"), Command::Jobs);
        assert_eq!(Command::parse("/cancel 12"), Command::Cancel(Some(JobId(12))));
        assert_eq!(Command::parse("/cancel"), Command::Cancel(None));
        assert_eq!(Command::parse("/cancel abc"), Command::Cancel(None));
        assert_eq!(
            Command::parse("  magnet:?xt=urn:btih:1 "),
            Command::Magnet(magnet(1))
        );
        assert_eq!(Command::parse("hello"), Command::Other);
        assert_eq!(Command::parse("   "), Command::Other);
    }
}
