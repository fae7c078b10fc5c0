pub mod database;

pub use database::Database;

use serde::{Deserialize, Serialize};

/// A catalog entry. Never mutated after registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub id: i64,
    pub title: String,
    pub artist: String,
    pub external_ref: String,
    pub source_key: String,
}

/// One index entry under an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    pub song_id: i64,
    pub anchor_time_ms: u32,
}

/// The unique catalog key for a recording.
pub fn source_key(title: &str, artist: &str) -> String {
    format!("{title}---{artist}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_key_joins_title_and_artist() {
        assert_eq!(source_key("Hound Dog", "Big Mama Thornton"), "Hound Dog---Big Mama Thornton");
    }
}
