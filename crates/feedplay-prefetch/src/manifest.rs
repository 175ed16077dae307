//! Manifest text parsing.
//!
//! Only URL extraction is performed: the scheduler needs the ordered list of
//! segment addresses (and the init segment, when the playlist declares one)
//! to range-read the first bytes of each. Tags other than `#EXT-X-MAP` and
//! `#EXT-X-STREAM-INF` are ignored.

use feedplay_core::{Error, Result};
use url::Url;

/// Tag marking a variant entry in a master playlist.
const STREAM_INF: &str = "#EXT-X-STREAM-INF";

/// Tag carrying the init segment of fragmented-MP4 playlists.
const MAP_TAG: &str = "#EXT-X-MAP:";

/// Whether a playlist lists media segments or variant playlists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    Media,
    Master,
}

/// URLs extracted from a manifest, all absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub kind: ManifestKind,
    /// Init segment declared by `#EXT-X-MAP`, if any.
    pub init_segment: Option<Url>,
    /// Segment addresses (media playlist) or variant playlists (master), in
    /// document order.
    pub uris: Vec<Url>,
}

impl Manifest {
    /// Addresses worth warming: the init segment first, then the first
    /// `count` media segments.
    pub fn warm_targets(&self, count: usize) -> Vec<Url> {
        self.init_segment
            .iter()
            .chain(self.uris.iter())
            .take(count + usize::from(self.init_segment.is_some()))
            .cloned()
            .collect()
    }
}

/// Parse a manifest body, resolving relative references against `base`.
///
/// Unresolvable entries are skipped with a debug log rather than failing the
/// whole manifest.
pub fn parse(body: &str, base: &Url) -> Result<Manifest> {
    let body = body.trim_start_matches('\u{feff}');
    if body.trim().is_empty() {
        return Err(Error::Manifest(format!("empty manifest at {base}")));
    }
    if !body.trim_start().starts_with("#EXTM3U") {
        tracing::debug!(url = %base, "Manifest has no #EXTM3U header; parsing leniently");
    }

    let mut kind = ManifestKind::Media;
    let mut init_segment = None;
    let mut uris = Vec::new();

    for line in body.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if line.starts_with('#') {
            if line.starts_with(STREAM_INF) {
                kind = ManifestKind::Master;
            } else if line.starts_with(MAP_TAG) && init_segment.is_none() {
                init_segment = quoted_attribute(&line[MAP_TAG.len()..], "URI")
                    .and_then(|uri| resolve(base, uri));
            }
            continue;
        }
        if let Some(url) = resolve(base, line) {
            uris.push(url);
        }
    }

    Ok(Manifest {
        kind,
        init_segment,
        uris,
    })
}

fn resolve(base: &Url, reference: &str) -> Option<Url> {
    match base.join(reference) {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::debug!(base = %base, reference, error = %e, "Skipping unresolvable manifest entry");
            None
        }
    }
}

/// Extract `NAME="value"` from a tag attribute list.
fn quoted_attribute<'a>(attributes: &'a str, name: &str) -> Option<&'a str> {
    attributes.split(',').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key.trim() != name {
            return None;
        }
        Some(value.trim().trim_matches('"'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://cdn.example/videos/abc/index.m3u8?token=t").unwrap()
    }

    #[test]
    fn media_playlist_relative_and_absolute() {
        let body = "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXTINF:4.0,\nseg0.ts\n#EXTINF:4.0,\n/abs/seg1.ts\n#EXTINF:4.0,\nhttps://other.example/seg2.ts\n#EXT-X-ENDLIST\n";
        let manifest = parse(body, &base()).unwrap();
        assert_eq!(manifest.kind, ManifestKind::Media);
        let uris: Vec<&str> = manifest.uris.iter().map(Url::as_str).collect();
        assert_eq!(
            uris,
            vec![
                "https://cdn.example/videos/abc/seg0.ts",
                "https://cdn.example/abs/seg1.ts",
                "https://other.example/seg2.ts",
            ]
        );
    }

    #[test]
    fn master_playlist_detected() {
        let body = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360\n360p/index.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=2000000\n720p/index.m3u8\n";
        let manifest = parse(body, &base()).unwrap();
        assert_eq!(manifest.kind, ManifestKind::Master);
        assert_eq!(manifest.uris.len(), 2);
        assert_eq!(
            manifest.uris[0].as_str(),
            "https://cdn.example/videos/abc/360p/index.m3u8"
        );
    }

    #[test]
    fn init_segment_from_map_tag() {
        let body = "#EXTM3U\n#EXT-X-MAP:URI=\"init.mp4\",BYTERANGE=\"720@0\"\n#EXTINF:2.0,\nchunk-1.m4s\n#EXTINF:2.0,\nchunk-2.m4s\n#EXTINF:2.0,\nchunk-3.m4s\n";
        let manifest = parse(body, &base()).unwrap();
        assert_eq!(
            manifest.init_segment.as_ref().map(Url::as_str),
            Some("https://cdn.example/videos/abc/init.mp4")
        );
        let targets: Vec<String> = manifest
            .warm_targets(2)
            .iter()
            .map(|u| u.path().rsplit('/').next().unwrap().to_string())
            .collect();
        assert_eq!(targets, vec!["init.mp4", "chunk-1.m4s", "chunk-2.m4s"]);
    }

    #[test]
    fn lenient_without_header() {
        let manifest = parse("a.ts\nb.ts\n", &base()).unwrap();
        assert_eq!(manifest.uris.len(), 2);
    }

    #[test]
    fn empty_body_is_error() {
        assert!(matches!(parse("  \n", &base()), Err(Error::Manifest(_))));
    }

    #[test]
    fn crlf_and_bom_tolerated() {
        let body = "\u{feff}#EXTM3U\r\n#EXTINF:4,\r\nseg0.ts\r\n";
        let manifest = parse(body, &base()).unwrap();
        assert_eq!(manifest.uris.len(), 1);
        assert!(manifest.uris[0].as_str().ends_with("/seg0.ts"));
    }

    #[test]
    fn warm_targets_caps_count() {
        let body = "#EXTM3U\nseg0.ts\nseg1.ts\nseg2.ts\n";
        let manifest = parse(body, &base()).unwrap();
        assert_eq!(manifest.warm_targets(2).len(), 2);
        assert_eq!(manifest.warm_targets(10).len(), 3);
    }
}
