use tokio::sync::RwLock;

use lanchat_shared::TranscriptEntry;

/// Append-only log of everything shown to the local participant.
///
/// Appends may come from any task; readers take snapshots and never block
/// writers for longer than a clone.
#[derive(Debug)]
pub struct Transcript {
    entries: RwLock<Vec<TranscriptEntry>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    pub async fn append(&self, entry: TranscriptEntry) {
        self.entries.write().await.push(entry);
    }

    pub async fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.entries.read().await.clone()
    }

    /// Every entry rendered on its own line, each terminated by `\n`.
    pub async fn render(&self) -> String {
        let entries = self.entries.read().await;
        let mut out = String::new();
        for entry in entries.iter() {
            out.push_str(&entry.render());
            out.push('\n');
        }
        out
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_render_blob() {
        let transcript = Transcript::new();
        let time = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        transcript
            .append(TranscriptEntry::chat("alice", "hi", time))
            .await;
        transcript
            .append(TranscriptEntry::system("bob joined the chat"))
            .await;

        assert_eq!(
            transcript.render().await,
            "[08:00:00] alice: hi\nbob joined the chat\n"
        );
    }

    #[tokio::test]
    async fn test_concurrent_appends() {
        let transcript = Arc::new(Transcript::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let transcript = transcript.clone();
            handles.push(tokio::spawn(async move {
                transcript
                    .append(TranscriptEntry::notice(format!("line {i}")))
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(transcript.len().await, 32);
        assert_eq!(transcript.render().await.lines().count(), 32);
    }
}
