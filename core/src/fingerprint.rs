/*
    spotify-bridge-rs | Rust CLI tool to transfer Spotify playlists to YouTube Music.
    Copyright (C) 2025  Israel Alberto Roldan Vega

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

//! Normalized track identity used for deduplication between the two
//! services. Two tracks with equal fingerprints are treated as the same
//! song; collisions between genuinely different songs are an accepted
//! approximation.

use crate::models::Track;
use std::collections::HashSet;
use std::fmt;

/// Separator between the title and artist halves. Not expected to appear
/// in either field.
const SEPARATOR: char = '|';

/// Case-folded, whitespace-trimmed `(title, primary artist)` pair. The
/// primary artist is the first credited one; the artist half is empty when
/// the track has no credited artists.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(title: &str, artists: &[String]) -> Self {
        let title = title.trim().to_lowercase();
        let artist = artists
            .first()
            .map(|a| a.trim().to_lowercase())
            .unwrap_or_default();
        Fingerprint(format!("{}{}{}", title, SEPARATOR, artist))
    }

    pub fn of(track: &Track) -> Self {
        Self::new(&track.title, &track.artists)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Builds the membership set for a collection of tracks. Applied to the
/// destination side before diffing, and to nothing else, so that both sides
/// go through the exact same normalization.
pub fn build_set(tracks: &[Track]) -> HashSet<Fingerprint> {
    tracks.iter().map(Fingerprint::of).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_symmetry() {
        let a = Fingerprint::new("Song", &["Artist A".to_string(), "Artist B".to_string()]);
        let b = Fingerprint::new("  song  ", &["artist a".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_first_artist_only() {
        let a = Fingerprint::new("Song", &["Lead".to_string(), "Feature".to_string()]);
        let b = Fingerprint::new("Song", &["Lead".to_string()]);
        let c = Fingerprint::new("Song", &["Feature".to_string()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_no_artists_yields_empty_half() {
        let fp = Fingerprint::new("Instrumental", &[]);
        assert_eq!(fp.as_str(), "instrumental|");
    }

    #[test]
    fn test_build_set_membership() {
        let existing = vec![
            Track::new("One", vec!["A".to_string()]),
            Track::new("Two", vec!["B".to_string()]),
        ];
        let set = build_set(&existing);

        assert!(set.contains(&Fingerprint::new("ONE", &["a ".to_string()])));
        assert!(!set.contains(&Fingerprint::new("Three", &["A".to_string()])));
    }

    #[test]
    fn test_titles_equal_artists_differ() {
        let a = Fingerprint::new("Hurt", &["Nine Inch Nails".to_string()]);
        let b = Fingerprint::new("Hurt", &["Johnny Cash".to_string()]);
        assert_ne!(a, b);
    }
}
