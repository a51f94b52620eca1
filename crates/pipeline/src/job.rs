use std::fmt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Characters that are not allowed in uploaded file names
const INVALID_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Upper bound for a generated file name, extension included
const MAX_FILENAME_LEN: usize = 200;

/// Identity of the caller a job runs for; one running job per owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub i64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where status notifications for a job are delivered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRoute {
    /// Chat or channel the caller is reachable on
    pub channel: i64,
    /// Message that progress updates edit in place, if the caller posted one
    pub message: Option<i64>,
}

/// One unit of work: fetch a source at a quality and upload it for an owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub source: String,
    pub quality: String,
    pub owner: OwnerId,
    pub title: String,
    pub sequence: u32,
    #[serde(default)]
    pub reply: Option<ReplyRoute>,
}

/// Key identifying a job's progress state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub owner: OwnerId,
    pub sequence: u32,
}

impl Job {
    pub fn new(
        source: impl Into<String>,
        quality: impl Into<String>,
        owner: OwnerId,
        title: impl Into<String>,
        sequence: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            quality: quality.into(),
            owner,
            title: title.into(),
            sequence,
            reply: None,
        }
    }

    pub fn with_reply(mut self, reply: ReplyRoute) -> Self {
        self.reply = Some(reply);
        self
    }

    pub fn key(&self) -> JobKey {
        JobKey {
            owner: self.owner,
            sequence: self.sequence,
        }
    }

    /// Short label used in logs and notifications, e.g. `Frieren_Ep7`
    pub fn label(&self) -> String {
        format!("{}_Ep{}", self.title, self.sequence)
    }

    /// File name the upload sink stores the stream under
    pub fn upload_file_name(&self) -> String {
        sanitize_filename(&format!("{}_Ep{}_{}.mp4", self.title, self.sequence, self.quality))
    }
}

/// Replace characters that are invalid on common filesystems and cap the length,
/// keeping the extension intact
pub fn sanitize_filename(name: &str) -> String {
    let mut cleaned: String = name
        .chars()
        .map(|c| if INVALID_FILENAME_CHARS.contains(&c) { '_' } else { c })
        .collect();

    if cleaned.chars().count() > MAX_FILENAME_LEN {
        let (stem, ext) = match cleaned.rsplit_once('.') {
            Some((stem, ext)) if ext.chars().count() < MAX_FILENAME_LEN / 2 => {
                (stem.to_string(), Some(ext.to_string()))
            }
            _ => (cleaned.clone(), None),
        };
        let budget = match &ext {
            Some(ext) => MAX_FILENAME_LEN.saturating_sub(ext.chars().count() + 1),
            None => MAX_FILENAME_LEN,
        };
        let stem: String = stem.chars().take(budget).collect();
        cleaned = match ext {
            Some(ext) => format!("{}.{}", stem, ext),
            None => stem,
        };
    }

    cleaned.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_upload_file_name() {
        let job = Job::new("https://example.org/ep/7", "1080p", OwnerId(42), "Show: Part 2", 7);
        assert_eq!(job.upload_file_name(), "Show_ Part 2_Ep7_1080p.mp4");
        assert_eq!(job.label(), "Show: Part 2_Ep7");
    }

    #[test]
    fn test_deserialize_without_id_generates_one() {
        let json = r#"{"source":"s","quality":"720p","owner":1,"title":"t","sequence":3}"#;
        let a: Job = serde_json::from_str(json).unwrap();
        let b: Job = serde_json::from_str(json).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.owner, OwnerId(1));
        assert!(a.reply.is_none());
    }

    #[test]
    fn test_long_name_keeps_extension() {
        let long = format!("{}.mp4", "a".repeat(500));
        let cleaned = sanitize_filename(&long);
        assert_eq!(cleaned.chars().count(), MAX_FILENAME_LEN);
        assert!(cleaned.ends_with(".mp4"));
    }

    proptest! {
        #[test]
        fn test_sanitized_names_are_safe(name in ".{0,400}") {
            let cleaned = sanitize_filename(&name);
            prop_assert!(!cleaned.chars().any(|c| INVALID_FILENAME_CHARS.contains(&c)));
            prop_assert!(cleaned.chars().count() <= MAX_FILENAME_LEN);
        }
    }
}
